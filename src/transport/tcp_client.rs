//! # TCP Client
//!
//! Connects to a server and runs a receive loop, a dispatch loop and, when
//! `heartbeat_interval` is set, a heartbeat loop. Received commands are handed
//! to the application on the event channel in arrival order.
//!
//! The client remembers the `system_id` of the last packet it received; that
//! is the id a multicast subscriber must accept.

use crate::config::ClientConfig;
use crate::core::codec::PacketCodec;
use crate::core::header::NetObject;
use crate::core::packet::encode_message;
use crate::error::constants::ERR_NOT_CONNECTED;
use crate::error::{ProtocolError, Result};
use crate::protocol::command::Command;
use crate::protocol::message::Heartbeat;
use crate::protocol::task::TaskIdGenerator;
use crate::utils::metrics::Metrics;
use crate::utils::queue::push_bounded;
use crate::utils::timeout::with_timeout_error;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What the client hands to the application
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A command received from the server
    Command(Command),
    /// The connection ended without `stop` being called
    Disconnected { reason: String },
}

struct ClientShared {
    mark: String,
    config: ClientConfig,
    system_id: AtomicI64,
    connected: AtomicBool,
    writer: Mutex<Option<OwnedWriteHalf>>,
    pending: StdMutex<VecDeque<Command>>,
    events: mpsc::Sender<ClientEvent>,
    task_ids: Arc<TaskIdGenerator>,
    metrics: Arc<Metrics>,
}

impl ClientShared {
    async fn send_bytes(&self, bytes: &Bytes) -> Result<()> {
        let result = with_timeout_error(
            async {
                let mut writer = self.writer.lock().await;
                let stream = writer
                    .as_mut()
                    .ok_or_else(|| ProtocolError::NotConnected(ERR_NOT_CONNECTED.to_string()))?;
                stream.write_all(bytes).await?;
                stream.flush().await?;
                Ok(())
            },
            self.config.send_timeout,
        )
        .await;

        match &result {
            Ok(()) => self.metrics.packet_sent(bytes.len() as u64),
            Err(ProtocolError::NotConnected(_)) => {}
            Err(e) => {
                self.metrics.send_failure();
                warn!(mark = %self.mark, error = %e, "Send failed");
            }
        }
        result
    }
}

struct Connection {
    cancel: CancellationToken,
    local_addr: SocketAddr,
    peer: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

pub struct TcpClient {
    shared: Arc<ClientShared>,
    connection: StdMutex<Option<Connection>>,
}

impl TcpClient {
    /// Create a disconnected client and the receiver for its events
    pub fn new(mark: impl Into<String>, config: ClientConfig) -> (Self, mpsc::Receiver<ClientEvent>) {
        Self::with_task_ids(mark, config, Arc::new(TaskIdGenerator::new()))
    }

    /// Like [`TcpClient::new`], drawing heartbeat task ids from `task_ids`
    pub fn with_task_ids(
        mark: impl Into<String>,
        config: ClientConfig,
        task_ids: Arc<TaskIdGenerator>,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_limit.max(1));
        let client = Self {
            shared: Arc::new(ClientShared {
                mark: mark.into(),
                config,
                system_id: AtomicI64::new(0),
                connected: AtomicBool::new(false),
                writer: Mutex::new(None),
                pending: StdMutex::new(VecDeque::new()),
                events: events_tx,
                task_ids,
                metrics: Arc::new(Metrics::new()),
            }),
            connection: StdMutex::new(None),
        };
        (client, events_rx)
    }

    pub fn mark(&self) -> &str {
        &self.shared.mark
    }

    /// System id of the last packet received; 0 before the first one
    pub fn system_id(&self) -> i64 {
        self.shared.system_id.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connection
            .lock()
            .ok()
            .and_then(|c| c.as_ref().map(|c| c.local_addr))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.connection
            .lock()
            .ok()
            .and_then(|c| c.as_ref().map(|c| c.peer))
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.shared.metrics)
    }

    pub fn task_ids(&self) -> Arc<TaskIdGenerator> {
        Arc::clone(&self.shared.task_ids)
    }

    /// Connect to the configured server address
    pub async fn connect_configured(&self) -> Result<()> {
        let addr: SocketAddr = self.shared.config.address.parse().map_err(|e| {
            ProtocolError::ConnectionFailed(format!(
                "invalid server address '{}': {e}",
                self.shared.config.address
            ))
        })?;
        self.connect(addr).await
    }

    /// Connect to `addr` and start the background loops
    #[instrument(skip(self), fields(mark = %self.shared.mark))]
    pub async fn connect(&self, addr: SocketAddr) -> Result<()> {
        self.shared.config.validate_strict()?;
        if self.is_connected() {
            return Err(ProtocolError::ConnectionFailed(format!(
                "{} is already connected",
                self.shared.mark
            )));
        }
        // Reap loops of a connection that dropped on its own
        self.stop().await;

        let stream = tokio::time::timeout(self.shared.config.connection_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::ConnectionFailed(format!("timed out connecting to {addr}")))?
            .map_err(|e| ProtocolError::ConnectionFailed(format!("failed to connect to {addr}: {e}")))?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let local_addr = stream
            .local_addr()
            .map_err(|e| ProtocolError::ConnectionFailed(format!("no local address: {e}")))?;

        let (reader, writer) = stream.into_split();
        *self.shared.writer.lock().await = Some(writer);
        self.shared.connected.store(true, Ordering::Release);
        self.shared.metrics.connection_established();

        let cancel = CancellationToken::new();
        let mut tasks = vec![
            tokio::spawn(receive_loop(
                Arc::clone(&self.shared),
                reader,
                cancel.clone(),
            )),
            tokio::spawn(dispatch_loop(Arc::clone(&self.shared), cancel.clone())),
        ];
        if self.shared.config.heartbeat_interval.is_some() {
            tasks.push(tokio::spawn(heartbeat_loop(
                Arc::clone(&self.shared),
                cancel.clone(),
            )));
        }

        if let Ok(mut connection) = self.connection.lock() {
            *connection = Some(Connection {
                cancel,
                local_addr,
                peer: addr,
                tasks,
            });
        }

        info!(%addr, %local_addr, "Connected to server");
        Ok(())
    }

    /// Send `message` to the server
    pub async fn send<T: NetObject>(&self, message: &T) -> Result<()> {
        if !self.is_connected() {
            return Err(ProtocolError::NotConnected(ERR_NOT_CONNECTED.to_string()));
        }
        let bytes = encode_message(message, self.system_id(), None)?;
        self.shared.send_bytes(&bytes).await
    }

    /// Close the connection and wait for the loops to end
    pub async fn stop(&self) {
        let connection = self.connection.lock().ok().and_then(|mut c| c.take());
        let Some(connection) = connection else {
            return;
        };

        connection.cancel.cancel();
        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if self.shared.connected.swap(false, Ordering::AcqRel) {
            self.shared.metrics.connection_closed();
        }
        for task in connection.tasks {
            if let Err(e) = task.await {
                warn!(mark = %self.shared.mark, error = %e, "Client task ended abnormally");
            }
        }
        info!(mark = %self.shared.mark, peer = %connection.peer, "Client stopped");
    }
}

#[instrument(skip_all, fields(mark = %shared.mark))]
async fn receive_loop(shared: Arc<ClientShared>, reader: OwnedReadHalf, cancel: CancellationToken) {
    let mut frames = FramedRead::new(reader, PacketCodec::new(shared.config.max_packet_size));

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            next = frames.next() => match next {
                Some(Ok(packet)) => {
                    shared.metrics.packet_received(packet.encoded_len() as u64);
                    shared.system_id.store(packet.header.system_id, Ordering::Release);
                    let command = Command::from_packet(packet, None);
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
                Some(Err(e)) => {
                    if !e.is_transport() {
                        shared.metrics.protocol_error();
                    }
                    break format!("receive failed: {e}");
                }
                None => break "connection closed by server".to_string(),
            }
        }
    };

    warn!(reason = %reason, "Disconnected from server");
    if shared.connected.swap(false, Ordering::AcqRel) {
        shared.metrics.connection_closed();
    }
    shared.writer.lock().await.take();

    // Let the dispatch loop flush what was already received first
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = flush_pending(&shared) => {}
    }
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = shared.events.send(ClientEvent::Disconnected { reason }) => {}
    }
    cancel.cancel();
}

async fn flush_pending(shared: &ClientShared) {
    loop {
        let next = shared.pending.lock().ok().and_then(|mut q| q.pop_front());
        let Some(command) = next else {
            break;
        };
        if shared.events.send(ClientEvent::Command(command)).await.is_err() {
            break;
        }
    }
}

async fn dispatch_loop(shared: Arc<ClientShared>, cancel: CancellationToken) {
    let mut ticker = interval(shared.config.dispatch_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = flush_pending(&shared) => {}
        }
    }
}

async fn heartbeat_loop(shared: Arc<ClientShared>, cancel: CancellationToken) {
    let Some(period) = shared.config.heartbeat_interval else {
        return;
    };
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let heartbeat = Heartbeat { task_id: shared.task_ids.next() };
                let system_id = shared.system_id.load(Ordering::Acquire);
                match encode_message(&heartbeat, system_id, None) {
                    Ok(bytes) => {
                        if let Err(e) = shared.send_bytes(&bytes).await {
                            debug!(mark = %shared.mark, error = %e, "Heartbeat not sent");
                        }
                    }
                    Err(e) => warn!(mark = %shared.mark, error = %e, "Failed to encode heartbeat"),
                }
            }
        }
    }
}
