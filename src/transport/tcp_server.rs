//! # TCP Server
//!
//! Accepts connections and runs four kinds of tasks:
//! - the accept loop
//! - one read loop per session, framing packets with [`PacketCodec`]
//! - the dispatch loop, handing queued commands to the application every
//!   `dispatch_interval`
//! - the liveness sweep, evicting sessions silent for `heartbeat_timeout`
//!
//! Every suspension point races the server's [`CancellationToken`], so
//! [`TcpServer::stop`] returns promptly.
//!
//! The server answers two built-in requests itself: heartbeats are echoed
//! (when `echo_heartbeat` is set) and `RequestUdpAddress` is answered with the
//! configured multicast group. Both are still forwarded to the application.

use crate::config::ServerConfig;
use crate::core::codec::PacketCodec;
use crate::core::header::NetObject;
use crate::core::packet::encode_message;
use crate::error::constants::ERR_SERVER_NOT_RUNNING;
use crate::error::{ProtocolError, Result};
use crate::protocol::command::Command;
use crate::protocol::message::{Heartbeat, RequestUdpAddress, ResponseUdpAddress};
use crate::transport::session::Session;
use crate::transport::session_manager::{ServerEvent, SessionManager};
use crate::utils::metrics::Metrics;
use crate::utils::system_id::process_system_id;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

struct ServerShared {
    mark: String,
    config: ServerConfig,
    system_id: i64,
    manager: SessionManager,
    metrics: Arc<Metrics>,
}

struct Running {
    cancel: CancellationToken,
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

pub struct TcpServer {
    shared: Arc<ServerShared>,
    running: StdMutex<Option<Running>>,
}

impl TcpServer {
    /// Create a stopped server and the receiver for its events
    pub fn new(mark: impl Into<String>, config: ServerConfig) -> (Self, mpsc::Receiver<ServerEvent>) {
        let mark = mark.into();
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_limit.max(1));
        let metrics = Arc::new(Metrics::new());
        let system_id = config.system_id.unwrap_or_else(process_system_id);
        let manager = SessionManager::new(
            mark.clone(),
            events_tx,
            Arc::clone(&metrics),
            config.send_timeout,
            config.event_queue_limit,
        );

        let server = Self {
            shared: Arc::new(ServerShared {
                mark,
                config,
                system_id,
                manager,
                metrics,
            }),
            running: StdMutex::new(None),
        };
        (server, events_rx)
    }

    pub fn mark(&self) -> &str {
        &self.shared.mark
    }

    /// Run identifier stamped into every packet this server sends
    pub fn system_id(&self) -> i64 {
        self.shared.system_id
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.shared.metrics)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.is_some())
            .unwrap_or(false)
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .ok()
            .and_then(|running| running.as_ref().map(|r| r.local_addr))
    }

    pub fn session_count(&self) -> usize {
        self.shared.manager.len()
    }

    /// Remote endpoints of all live sessions
    pub fn sessions(&self) -> Vec<SocketAddr> {
        self.shared.manager.keys()
    }

    /// Bind and start serving. Returns the bound address (useful with port 0).
    #[instrument(skip(self), fields(mark = %self.shared.mark, address = %self.shared.config.address))]
    pub async fn start(&self) -> Result<SocketAddr> {
        self.shared.config.validate_strict()?;
        if self.is_running() {
            return Err(ProtocolError::ConnectionFailed(format!(
                "{} is already running",
                self.shared.mark
            )));
        }

        let address: SocketAddr = self.shared.config.address.parse().map_err(|e| {
            ProtocolError::ConnectionFailed(format!(
                "invalid listen address '{}': {e}",
                self.shared.config.address
            ))
        })?;

        let listener = TcpListener::bind(address).await.map_err(|e| {
            error!(error = %e, "Failed to bind listener");
            ProtocolError::ConnectionFailed(format!("failed to bind {address}: {e}"))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ProtocolError::ConnectionFailed(format!("no local address: {e}")))?;

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(accept_loop(
                Arc::clone(&self.shared),
                listener,
                cancel.clone(),
            )),
            tokio::spawn(dispatch_loop(Arc::clone(&self.shared), cancel.clone())),
            tokio::spawn(sweep_loop(Arc::clone(&self.shared), cancel.clone())),
        ];

        let mut running = self
            .running
            .lock()
            .map_err(|_| ProtocolError::Custom("server state poisoned".to_string()))?;
        *running = Some(Running {
            cancel,
            local_addr,
            tasks,
        });

        info!(%local_addr, system_id = self.shared.system_id, "Server started");
        Ok(local_addr)
    }

    /// Stop accepting, close every session and wait for the loops to end
    #[instrument(skip(self), fields(mark = %self.shared.mark))]
    pub async fn stop(&self) {
        let running = self.running.lock().ok().and_then(|mut r| r.take());
        let Some(running) = running else {
            debug!("Stop requested but server is not running");
            return;
        };

        running.cancel.cancel();
        self.shared.manager.close_all().await;
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Server task ended abnormally");
            }
        }

        info!("Server stopped");
        self.shared.metrics.log_metrics(&self.shared.mark);
    }

    /// Send `message` to every session. Returns how many it reached.
    pub async fn broadcast<T: NetObject>(&self, message: &T) -> Result<usize> {
        self.ensure_running()?;
        let bytes = encode_message(message, self.shared.system_id, None)?;
        Ok(self.shared.manager.broadcast(&bytes).await)
    }

    /// Send `message` to the session of `peer`
    pub async fn send_to<T: NetObject>(&self, peer: SocketAddr, message: &T) -> Result<()> {
        self.ensure_running()?;
        let bytes = encode_message(message, self.shared.system_id, None)?;
        self.shared.manager.send_to(&peer, &bytes).await
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ProtocolError::NotConnected(ERR_SERVER_NOT_RUNNING.to_string()))
        }
    }
}

async fn accept_loop(shared: Arc<ServerShared>, listener: TcpListener, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if shared.manager.len() >= shared.config.max_connections {
                        warn!(
                            mark = %shared.mark,
                            %peer,
                            max_connections = shared.config.max_connections,
                            "Connection limit reached, rejecting client"
                        );
                        continue;
                    }

                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(mark = %shared.mark, %peer, error = %e, "Failed to set TCP_NODELAY");
                    }

                    let (reader, writer) = stream.into_split();
                    let session = Arc::new(Session::new(
                        shared.manager.next_session_id(),
                        peer,
                        writer,
                        cancel.child_token(),
                    ));
                    shared.manager.add(Arc::clone(&session)).await;
                    info!(mark = %shared.mark, %peer, session_id = session.id(), "Client connected");

                    tokio::spawn(read_loop(Arc::clone(&shared), session, reader));
                }
                Err(e) => {
                    error!(mark = %shared.mark, error = %e, "Error accepting connection");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                    }
                }
            }
        }
    }
    debug!(mark = %shared.mark, "Accept loop finished");
}

#[instrument(skip_all, fields(mark = %shared.mark, peer = %session.key(), session_id = session.id()))]
async fn read_loop(shared: Arc<ServerShared>, session: Arc<Session>, reader: OwnedReadHalf) {
    let mut frames = FramedRead::new(reader, PacketCodec::new(shared.config.max_packet_size));
    let token = session.token().clone();
    let key = session.key();

    let reason = loop {
        tokio::select! {
            _ = token.cancelled() => break "cancelled",
            next = frames.next() => match next {
                Some(Ok(packet)) => {
                    shared.metrics.packet_received(packet.encoded_len() as u64);
                    let command = Command::from_packet(packet, Some(key));
                    if command.is::<Heartbeat>() {
                        session.touch();
                    }
                    answer_builtin(&shared, &session, &command).await;
                    if session.is_closed() {
                        break "cancelled";
                    }
                    shared.manager.enqueue(key, command);
                }
                Some(Err(e)) if e.is_transport() => {
                    warn!(error = %e, "Transport error, closing session");
                    break "transport error";
                }
                Some(Err(e)) => {
                    shared.metrics.protocol_error();
                    warn!(error = %e, "Framing error, closing session");
                    break "framing error";
                }
                None => break "closed by peer",
            }
        }
    };

    debug!(reason, "Read loop finished");
    shared.manager.remove(key, session.id()).await;
}

/// Reply to requests the server handles on its own
async fn answer_builtin(shared: &ServerShared, session: &Session, command: &Command) {
    let reply = if command.is::<Heartbeat>() && shared.config.echo_heartbeat {
        command
            .decode::<Heartbeat>()
            .and_then(|heartbeat| encode_message(&heartbeat, shared.system_id, None))
    } else if command.is::<RequestUdpAddress>() {
        let Some(group) = shared.config.multicast_group else {
            debug!("Multicast address requested but no group is configured");
            return;
        };
        command.decode::<RequestUdpAddress>().and_then(|request| {
            let response = ResponseUdpAddress {
                task_id: request.task_id,
                ip: group.ip().to_string(),
                port: i32::from(group.port()),
            };
            encode_message(&response, shared.system_id, None)
        })
    } else {
        return;
    };

    let bytes = match reply {
        Ok(bytes) => bytes,
        Err(e) => {
            shared.metrics.protocol_error();
            warn!(error = %e, command = %command, "Malformed built-in request");
            return;
        }
    };

    match session.send(&bytes, shared.config.send_timeout).await {
        Ok(()) => shared.metrics.packet_sent(bytes.len() as u64),
        Err(e) => {
            warn!(error = %e, "Failed to answer built-in request, removing session");
            shared.metrics.send_failure();
            shared.manager.remove(session.key(), session.id()).await;
        }
    }
}

async fn dispatch_loop(shared: Arc<ServerShared>, cancel: CancellationToken) {
    let mut ticker = interval(shared.config.dispatch_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = shared.manager.dispatch_pending() => {}
        }
    }
    debug!(mark = %shared.mark, "Dispatch loop finished");
}

async fn sweep_loop(shared: Arc<ServerShared>, cancel: CancellationToken) {
    let period = shared.config.sweep_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = shared
                    .manager
                    .sweep_expired(Instant::now(), shared.config.heartbeat_timeout)
                    .await;
                if !evicted.is_empty() {
                    info!(mark = %shared.mark, evicted = evicted.len(), "Liveness sweep evicted sessions");
                }
            }
        }
    }
    debug!(mark = %shared.mark, "Sweep loop finished");
}
