//! # UDP Publisher
//!
//! Sends one packet per datagram to a multicast group. Packets are stamped
//! with the publisher's `system_id` so subscribers can drop traffic from
//! other systems sharing the group.

use crate::config::MulticastConfig;
use crate::core::header::NetObject;
use crate::core::packet::encode_message;
use crate::error::constants::ERR_PUBLISHER_NOT_RUNNING;
use crate::error::{ProtocolError, Result};
use crate::transport::multicast::publisher_socket;
use crate::utils::metrics::Metrics;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, RwLock};
use tokio::net::UdpSocket;
use tracing::{info, instrument, warn};

struct Target {
    socket: Arc<UdpSocket>,
    group: SocketAddr,
}

pub struct UdpPublisher {
    mark: String,
    config: MulticastConfig,
    system_id: i64,
    target: RwLock<Option<Target>>,
    metrics: Arc<Metrics>,
}

impl UdpPublisher {
    pub fn new(mark: impl Into<String>, config: MulticastConfig, system_id: i64) -> Self {
        Self {
            mark: mark.into(),
            config,
            system_id,
            target: RwLock::new(None),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn mark(&self) -> &str {
        &self.mark
    }

    pub fn system_id(&self) -> i64 {
        self.system_id
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn is_running(&self) -> bool {
        self.target.read().map(|t| t.is_some()).unwrap_or(false)
    }

    /// Group the publisher sends to, while running
    pub fn group(&self) -> Option<SocketAddr> {
        self.target.read().ok().and_then(|t| t.as_ref().map(|t| t.group))
    }

    /// Local address of the sending socket, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.target
            .read()
            .ok()
            .and_then(|t| t.as_ref().and_then(|t| t.socket.local_addr().ok()))
    }

    /// Start publishing to the configured group
    pub fn start_configured(&self, local_ip: Ipv4Addr) -> Result<()> {
        self.start(self.config.group_addr(), local_ip)
    }

    /// Bind a sending socket on `local_ip` and target `group`
    ///
    /// Restarting replaces the previous socket.
    #[instrument(skip(self), fields(mark = %self.mark))]
    pub fn start(&self, group: SocketAddr, local_ip: Ipv4Addr) -> Result<()> {
        let socket = publisher_socket(local_ip, self.config.ttl, self.config.loopback)?;
        let mut target = self
            .target
            .write()
            .map_err(|_| ProtocolError::Custom("publisher state poisoned".to_string()))?;
        *target = Some(Target {
            socket: Arc::new(socket),
            group,
        });
        info!(%group, %local_ip, system_id = self.system_id, "Multicast publisher started");
        Ok(())
    }

    /// Encode `message` and send it as a single datagram
    ///
    /// Returns the number of bytes sent. `send_time` defaults to now.
    pub async fn send<T: NetObject>(&self, message: &T, send_time: Option<i64>) -> Result<usize> {
        let (socket, group) = {
            let target = self
                .target
                .read()
                .map_err(|_| ProtocolError::Custom("publisher state poisoned".to_string()))?;
            match target.as_ref() {
                Some(t) => (Arc::clone(&t.socket), t.group),
                None => {
                    return Err(ProtocolError::NotConnected(
                        ERR_PUBLISHER_NOT_RUNNING.to_string(),
                    ))
                }
            }
        };

        let bytes = encode_message(message, self.system_id, send_time)?;
        if bytes.len() > self.config.max_datagram_size {
            return Err(ProtocolError::OversizedPacket(bytes.len()));
        }

        let sent = match socket.send_to(&bytes, group).await {
            Ok(sent) => sent,
            Err(e) => {
                self.metrics.send_failure();
                return Err(e.into());
            }
        };
        if sent < bytes.len() {
            self.metrics.send_failure();
            warn!(mark = %self.mark, expected = bytes.len(), sent, "Short datagram write");
        } else {
            self.metrics.datagram_sent(sent as u64);
        }
        Ok(sent)
    }

    pub fn stop(&self) {
        if let Ok(mut target) = self.target.write() {
            if let Some(target) = target.take() {
                info!(mark = %self.mark, group = %target.group, "Multicast publisher stopped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::Heartbeat;

    #[tokio::test]
    async fn test_send_while_stopped_is_not_connected() {
        let publisher = UdpPublisher::new("unit", MulticastConfig::default(), 7);
        let result = publisher.send(&Heartbeat { task_id: 1 }, None).await;
        assert!(matches!(result, Err(ProtocolError::NotConnected(_))));
    }

    #[tokio::test]
    async fn test_oversized_message_is_refused() {
        let config = MulticastConfig {
            max_datagram_size: 24,
            ..MulticastConfig::default()
        };
        let publisher = UdpPublisher::new("unit", config, 7);
        let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        publisher
            .start(receiver.local_addr().unwrap(), Ipv4Addr::LOCALHOST)
            .unwrap();

        let result = publisher.send(&Heartbeat { task_id: 1 }, None).await;
        assert!(matches!(result, Err(ProtocolError::OversizedPacket(27))));
        assert_eq!(publisher.metrics().snapshot().datagrams_sent, 0);
    }

    #[tokio::test]
    async fn test_unicast_target_receives_stamped_packet() {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let publisher = UdpPublisher::new("unit", MulticastConfig::default(), 99);
        publisher
            .start(receiver.local_addr().unwrap(), Ipv4Addr::LOCALHOST)
            .unwrap();

        let sent = publisher
            .send(&Heartbeat { task_id: 3 }, Some(1_700_000_000_000))
            .await
            .unwrap();
        assert_eq!(sent, 27);

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        let packet = crate::core::packet::Packet::from_bytes(bytes::Bytes::copy_from_slice(&buf[..len]))
            .unwrap();
        assert_eq!(packet.header.system_id, 99);
        assert_eq!(packet.header.send_time, 1_700_000_000_000);
        assert!(packet.header.is::<Heartbeat>());

        publisher.stop();
        assert!(!publisher.is_running());
    }
}
