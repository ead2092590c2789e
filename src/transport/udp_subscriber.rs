//! # UDP Subscriber
//!
//! Joins a multicast group and turns valid datagrams into commands. A
//! datagram is dropped when its header is unreadable, when it was stamped by
//! another system, or when it is shorter than its header declares.
//!
//! The accepted system id normally comes from the TCP client
//! ([`TcpClient::system_id`](crate::transport::tcp_client::TcpClient::system_id))
//! and can be updated while running with [`UdpSubscriber::set_system_id`].

use crate::config::MulticastConfig;
use crate::core::datagram::inspect_datagram;
use crate::error::{ProtocolError, Result};
use crate::protocol::command::Command;
use crate::transport::multicast::subscriber_socket;
use crate::utils::metrics::Metrics;
use crate::utils::queue::push_bounded;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct SubscriberShared {
    mark: String,
    config: MulticastConfig,
    system_id: AtomicI64,
    pending: StdMutex<VecDeque<Command>>,
    commands: mpsc::Sender<Command>,
    metrics: Arc<Metrics>,
}

struct Running {
    cancel: CancellationToken,
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

pub struct UdpSubscriber {
    shared: Arc<SubscriberShared>,
    running: StdMutex<Option<Running>>,
}

impl UdpSubscriber {
    /// Create a stopped subscriber and the receiver for accepted commands
    pub fn new(mark: impl Into<String>, config: MulticastConfig) -> (Self, mpsc::Receiver<Command>) {
        let (commands_tx, commands_rx) = mpsc::channel(config.event_queue_limit.max(1));
        let subscriber = Self {
            shared: Arc::new(SubscriberShared {
                mark: mark.into(),
                config,
                system_id: AtomicI64::new(0),
                pending: StdMutex::new(VecDeque::new()),
                commands: commands_tx,
                metrics: Arc::new(Metrics::new()),
            }),
            running: StdMutex::new(None),
        };
        (subscriber, commands_rx)
    }

    pub fn mark(&self) -> &str {
        &self.shared.mark
    }

    pub fn system_id(&self) -> i64 {
        self.shared.system_id.load(Ordering::Acquire)
    }

    /// Change the accepted system id, e.g. after the TCP link reconnects
    pub fn set_system_id(&self, system_id: i64) {
        self.shared.system_id.store(system_id, Ordering::Release);
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.shared.metrics)
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().map(|r| r.is_some()).unwrap_or(false)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .ok()
            .and_then(|r| r.as_ref().map(|r| r.local_addr))
    }

    /// Join `group` on the interface of `local_endpoint`
    ///
    /// `local_endpoint` is usually the TCP client's local address; a loopback
    /// endpoint joins on any interface.
    #[instrument(skip(self), fields(mark = %self.shared.mark))]
    pub fn start(&self, group: SocketAddr, local_endpoint: SocketAddr, system_id: i64) -> Result<()> {
        self.shared.config.validate_strict()?;
        let local_ip = match local_endpoint.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };
        let socket = subscriber_socket(group, local_ip)?;
        info!(%group, %local_ip, system_id, "Joined multicast group");
        self.run(socket, system_id)
    }

    /// Receive on an already bound socket
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start_with_socket(&self, socket: std::net::UdpSocket, system_id: i64) -> Result<()> {
        self.shared.config.validate_strict()?;
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket)?;
        self.run(socket, system_id)
    }

    fn run(&self, socket: UdpSocket, system_id: i64) -> Result<()> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| ProtocolError::Custom("subscriber state poisoned".to_string()))?;
        if running.is_some() {
            return Err(ProtocolError::ConnectionFailed(format!(
                "{} is already running",
                self.shared.mark
            )));
        }

        let local_addr = socket.local_addr()?;
        self.set_system_id(system_id);

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(receive_loop(
                Arc::clone(&self.shared),
                socket,
                cancel.clone(),
            )),
            tokio::spawn(dispatch_loop(Arc::clone(&self.shared), cancel.clone())),
        ];
        *running = Some(Running {
            cancel,
            local_addr,
            tasks,
        });
        info!(mark = %self.shared.mark, %local_addr, "Multicast subscriber started");
        Ok(())
    }

    /// Leave the group and wait for the loops to end
    pub async fn stop(&self) {
        let running = self.running.lock().ok().and_then(|mut r| r.take());
        let Some(running) = running else {
            return;
        };
        running.cancel.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!(mark = %self.shared.mark, error = %e, "Subscriber task ended abnormally");
            }
        }
        info!(mark = %self.shared.mark, "Multicast subscriber stopped");
        self.shared.metrics.log_metrics(&self.shared.mark);
    }
}

#[instrument(skip_all, fields(mark = %shared.mark))]
async fn receive_loop(shared: Arc<SubscriberShared>, socket: UdpSocket, cancel: CancellationToken) {
    // One byte of slack so an oversized datagram is seen as such
    let mut buf = vec![0u8; shared.config.max_datagram_size + 1];

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        let (len, peer) = match received {
            Ok(received) => received,
            Err(e) => {
                debug!(error = %e, "Datagram receive failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                }
                continue;
            }
        };
        if len > shared.config.max_datagram_size {
            shared.metrics.datagram_dropped();
            warn!(%peer, len, "Dropped oversized datagram");
            continue;
        }

        let expected = shared.system_id.load(Ordering::Acquire);
        match inspect_datagram(&buf[..len], expected) {
            Ok(packet) => {
                shared.metrics.datagram_received(len as u64);
                let command = Command::from_packet(packet, Some(peer));
                let evicted = match shared.pending.lock() {
                    Ok(mut pending) => {
                        push_bounded(&mut pending, command, shared.config.event_queue_limit)
                    }
                    Err(_) => false,
                };
                if evicted {
                    shared.metrics.command_dropped();
                    warn!("Pending queue full, dropped oldest command");
                }
            }
            Err(rejection) => {
                shared.metrics.datagram_dropped();
                warn!(%peer, len, %rejection, "Dropped datagram");
            }
        }
    }
}

async fn dispatch_loop(shared: Arc<SubscriberShared>, cancel: CancellationToken) {
    let mut ticker = interval(shared.config.dispatch_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        loop {
            let next = shared.pending.lock().ok().and_then(|mut q| q.pop_front());
            let Some(command) = next else {
                break;
            };
            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = shared.commands.send(command) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_system_id_while_stopped() {
        let (subscriber, _commands) = UdpSubscriber::new("unit", MulticastConfig::default());
        assert_eq!(subscriber.system_id(), 0);
        subscriber.set_system_id(42);
        assert_eq!(subscriber.system_id(), 42);
        assert!(!subscriber.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_is_refused() {
        let (subscriber, _commands) = UdpSubscriber::new("unit", MulticastConfig::default());
        let first = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let second = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        subscriber.start_with_socket(first, 1).unwrap();
        assert!(matches!(
            subscriber.start_with_socket(second, 1),
            Err(ProtocolError::ConnectionFailed(_))
        ));
        subscriber.stop().await;
        assert!(!subscriber.is_running());
    }

    #[tokio::test]
    async fn test_zero_dispatch_interval_refuses_to_start() {
        let config = MulticastConfig {
            dispatch_interval: Duration::ZERO,
            ..MulticastConfig::default()
        };
        let (subscriber, _commands) = UdpSubscriber::new("unit", config);
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        assert!(matches!(
            subscriber.start_with_socket(socket, 1),
            Err(ProtocolError::ConfigError(_))
        ));
        assert!(!subscriber.is_running());
    }

    #[tokio::test]
    async fn test_stop_returns_promptly() {
        let (subscriber, _commands) = UdpSubscriber::new("unit", MulticastConfig::default());
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        subscriber.start_with_socket(socket, 1).unwrap();
        tokio::time::timeout(Duration::from_secs(1), subscriber.stop())
            .await
            .unwrap();
    }
}
