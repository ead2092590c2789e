//! Multicast socket construction.
//!
//! The std and tokio sockets cannot set options before `bind`, so sockets are
//! built with `socket2` and handed to tokio afterwards. Both functions must be
//! called from inside a tokio runtime.

use crate::error::constants::ERR_NOT_MULTICAST;
use crate::error::{ProtocolError, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

fn udp_socket() -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    Ok(socket)
}

fn into_tokio(socket: Socket) -> std::io::Result<UdpSocket> {
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Socket for sending to a group through the interface owning `local_ip`
pub fn publisher_socket(local_ip: Ipv4Addr, ttl: u32, loopback: bool) -> Result<UdpSocket> {
    let build = || -> std::io::Result<UdpSocket> {
        let socket = udp_socket()?;
        socket.bind(&SockAddr::from(SocketAddrV4::new(local_ip, 0)))?;
        socket.set_multicast_ttl_v4(ttl)?;
        if !local_ip.is_unspecified() {
            socket.set_multicast_if_v4(&local_ip)?;
        }
        socket.set_multicast_loop_v4(loopback)?;
        into_tokio(socket)
    };
    build().map_err(|e| {
        ProtocolError::ConnectionFailed(format!("multicast publisher on {local_ip}: {e}"))
    })
}

/// Interface a subscriber joins on; loopback maps to any
pub fn join_interface(local_ip: Ipv4Addr) -> Ipv4Addr {
    if local_ip.is_loopback() {
        Ipv4Addr::UNSPECIFIED
    } else {
        local_ip
    }
}

/// Address a subscriber binds to for a group on `port`.
///
/// Linux delivers group traffic only to sockets bound to the group address or
/// the wildcard, never to one bound to a NIC address. The interface choice
/// lives in the join instead.
pub fn subscriber_bind_addr(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)
}

/// Socket bound to the group port on all interfaces and joined to `group` on
/// the interface owning `local_ip`
pub fn subscriber_socket(group: SocketAddr, local_ip: Ipv4Addr) -> Result<UdpSocket> {
    let SocketAddr::V4(group) = group else {
        return Err(ProtocolError::ConnectionFailed(format!(
            "{ERR_NOT_MULTICAST}: {group}"
        )));
    };
    if !group.ip().is_multicast() {
        return Err(ProtocolError::ConnectionFailed(format!(
            "{ERR_NOT_MULTICAST}: {group}"
        )));
    }

    let interface = join_interface(local_ip);
    let build = || -> std::io::Result<UdpSocket> {
        let socket = udp_socket()?;
        socket.bind(&SockAddr::from(subscriber_bind_addr(group.port())))?;
        socket.join_multicast_v4(group.ip(), &interface)?;
        into_tokio(socket)
    };
    build().map_err(|e| {
        ProtocolError::ConnectionFailed(format!(
            "failed to join multicast group {group} on {interface}: {e}"
        ))
    })
}
