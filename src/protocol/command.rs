//! # Command Envelope
//!
//! A received packet as handed to the application: the header, the raw body
//! and, on the server, the peer it came from. The body is only decoded when
//! the application asks for a concrete type.

use crate::core::header::{NetObject, PacketHeader};
use crate::core::packet::Packet;
use crate::core::wire::WireReader;
use crate::error::{ProtocolError, Result};
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    header: PacketHeader,
    payload: Bytes,
    peer: Option<SocketAddr>,
}

impl Command {
    pub fn new(header: PacketHeader, payload: Bytes, peer: Option<SocketAddr>) -> Self {
        Self {
            header,
            payload,
            peer,
        }
    }

    pub fn from_packet(packet: Packet, peer: Option<SocketAddr>) -> Self {
        Self::new(packet.header, packet.payload, peer)
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Body bytes following the header
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Remote endpoint of the session this arrived on (server side only)
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn system_id(&self) -> i64 {
        self.header.system_id
    }

    pub fn send_time(&self) -> i64 {
        self.header.send_time
    }

    pub fn is<T: NetObject>(&self) -> bool {
        self.header.is::<T>()
    }

    pub fn is_other_version<T: NetObject>(&self) -> bool {
        self.header.is_other_version::<T>()
    }

    /// Decode the body as `T`.
    ///
    /// Fails with `UnexpectedMessage` unless the header identifies `T`.
    /// Does not consume the envelope, so repeated calls give the same result.
    pub fn decode<T: NetObject>(&self) -> Result<T> {
        if !self.is::<T>() {
            return Err(ProtocolError::UnexpectedMessage {
                expected: T::type_name(),
                object_id: self.header.object_id,
                object_version: self.header.object_version,
            });
        }
        T::decode(&mut WireReader::new(&self.payload))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId: {}", self.header.object_id)
    }
}
