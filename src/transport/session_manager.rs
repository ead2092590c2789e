//! # Session Manager
//!
//! Owns every live TCP session of a server and the per-session queues of
//! received commands. It is the only place session lifecycle changes happen:
//! sessions are added on accept, superseded when the same `ip:port`
//! reconnects, removed on EOF, transport error, liveness timeout or stop.
//!
//! Removal is keyed by `(key, session_id)` so that a stale read loop never
//! removes the session that replaced it.

use crate::error::constants::ERR_SESSION_NOT_FOUND;
use crate::error::{ProtocolError, Result};
use crate::protocol::command::Command;
use crate::transport::session::Session;
use crate::utils::metrics::Metrics;
use crate::utils::queue::push_bounded;
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What the server hands to the application
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A command received from a session, in per-session arrival order
    Command(Command),
    /// A session was added or removed; `sessions` is the new count
    MembershipChanged { sessions: usize },
}

type PendingQueue = StdMutex<VecDeque<Command>>;

pub struct SessionManager {
    mark: String,
    sessions: DashMap<SocketAddr, Arc<Session>>,
    pending: DashMap<SocketAddr, PendingQueue>,
    next_id: AtomicU64,
    metrics: Arc<Metrics>,
    events: mpsc::Sender<ServerEvent>,
    send_timeout: Duration,
    pending_limit: usize,
}

impl SessionManager {
    pub fn new(
        mark: impl Into<String>,
        events: mpsc::Sender<ServerEvent>,
        metrics: Arc<Metrics>,
        send_timeout: Duration,
        pending_limit: usize,
    ) -> Self {
        Self {
            mark: mark.into(),
            sessions: DashMap::new(),
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            metrics,
            events,
            send_timeout,
            pending_limit,
        }
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn keys(&self) -> Vec<SocketAddr> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn get(&self, key: &SocketAddr) -> Option<Arc<Session>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn notify_membership(&self) {
        let sessions = self.len();
        match self
            .events
            .try_send(ServerEvent::MembershipChanged { sessions })
        {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(mark = %self.mark, sessions, "Event queue full, membership change not delivered")
            }
            Err(TrySendError::Closed(_)) => {
                debug!(mark = %self.mark, "Event receiver dropped")
            }
        }
    }

    /// Register a freshly accepted session.
    ///
    /// A live session under the same key is closed and returned.
    pub async fn add(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let key = session.key();
        let previous = self.sessions.insert(key, session);
        self.metrics.connection_established();

        if let Some(stale) = &previous {
            warn!(
                mark = %self.mark,
                peer = %key,
                session_id = stale.id(),
                "Reconnect from same endpoint, superseding stale session"
            );
            stale.close().await;
            // Commands read from the stale connection must not surface under the new one
            self.pending.remove(&key);
            self.metrics.connection_closed();
            self.metrics.session_superseded();
        }

        self.notify_membership();
        previous
    }

    /// Remove the session `session_id` under `key`.
    ///
    /// Returns `false` when that session is already gone or was superseded.
    pub async fn remove(&self, key: SocketAddr, session_id: u64) -> bool {
        let Some((_, session)) = self
            .sessions
            .remove_if(&key, |_, session| session.id() == session_id)
        else {
            return false;
        };

        session.close().await;
        self.pending.remove(&key);
        self.metrics.connection_closed();
        info!(mark = %self.mark, peer = %key, session_id, "Session removed");
        self.notify_membership();
        true
    }

    /// Mark the session under `key` as alive now
    pub fn touch(&self, key: &SocketAddr) -> bool {
        match self.sessions.get(key) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Queue a received command for the next dispatch pass.
    ///
    /// Each session queue holds at most `pending_limit` commands; when the
    /// application falls behind, the oldest is dropped.
    pub fn enqueue(&self, key: SocketAddr, command: Command) {
        let queue = self.pending.entry(key).or_default();
        let evicted = match queue.lock() {
            Ok(mut queue) => push_bounded(&mut queue, command, self.pending_limit),
            Err(_) => false,
        };
        if evicted {
            self.metrics.command_dropped();
            warn!(mark = %self.mark, peer = %key, "Pending queue full, dropped oldest command");
        }
    }

    /// Number of commands waiting for dispatch
    pub fn pending_len(&self) -> usize {
        self.pending
            .iter()
            .map(|entry| entry.value().lock().map(|q| q.len()).unwrap_or(0))
            .sum()
    }

    /// Hand every queued command to the application, session by session.
    ///
    /// Queues whose session no longer exists are dropped unread. Returns the
    /// number of commands delivered.
    pub async fn dispatch_pending(&self) -> usize {
        let keys: Vec<SocketAddr> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut delivered = 0;

        for key in keys {
            if !self.sessions.contains_key(&key) {
                if let Some((_, orphan)) = self.pending.remove(&key) {
                    let dropped = orphan.lock().map(|q| q.len()).unwrap_or(0);
                    debug!(mark = %self.mark, peer = %key, dropped, "Dropping queue of removed session");
                }
                continue;
            }

            let drained: Vec<Command> = match self.pending.get(&key) {
                Some(queue) => queue
                    .lock()
                    .map(|mut q| q.drain(..).collect())
                    .unwrap_or_default(),
                None => continue,
            };

            for command in drained {
                if self.events.send(ServerEvent::Command(command)).await.is_err() {
                    debug!(mark = %self.mark, "Event receiver dropped, discarding commands");
                    return delivered;
                }
                delivered += 1;
            }
        }

        delivered
    }

    /// Remove every session silent for longer than `timeout` as of `now`
    pub async fn sweep_expired(&self, now: Instant, timeout: Duration) -> Vec<SocketAddr> {
        let expired: Vec<(SocketAddr, u64, Duration)> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let idle = entry.value().idle_for(now);
                (idle > timeout).then(|| (*entry.key(), entry.value().id(), idle))
            })
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for (key, session_id, idle) in expired {
            if self.remove(key, session_id).await {
                warn!(
                    mark = %self.mark,
                    peer = %key,
                    idle_ms = idle.as_millis() as u64,
                    "Heartbeat timeout, session evicted"
                );
                self.metrics.session_evicted();
                evicted.push(key);
            }
        }
        evicted
    }

    /// Send pre-encoded bytes to every session.
    ///
    /// A failing recipient is removed; the others are unaffected. Returns the
    /// number of sessions the packet reached.
    pub async fn broadcast(&self, bytes: &Bytes) -> usize {
        let targets = self.snapshot();
        if targets.is_empty() {
            debug!(mark = %self.mark, "No sessions online, nothing to broadcast to");
            return 0;
        }

        let results = join_all(
            targets
                .iter()
                .map(|session| session.send(bytes, self.send_timeout)),
        )
        .await;

        let mut delivered = 0;
        for (session, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => {
                    self.metrics.packet_sent(bytes.len() as u64);
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        mark = %self.mark,
                        peer = %session.key(),
                        error = %e,
                        "Send failed, removing session"
                    );
                    self.metrics.send_failure();
                    self.remove(session.key(), session.id()).await;
                }
            }
        }
        delivered
    }

    /// Send pre-encoded bytes to one session, removing it on failure
    pub async fn send_to(&self, key: &SocketAddr, bytes: &Bytes) -> Result<()> {
        let session = self
            .get(key)
            .ok_or_else(|| ProtocolError::NotConnected(format!("{ERR_SESSION_NOT_FOUND} {key}")))?;

        match session.send(bytes, self.send_timeout).await {
            Ok(()) => {
                self.metrics.packet_sent(bytes.len() as u64);
                Ok(())
            }
            Err(e) => {
                warn!(mark = %self.mark, peer = %key, error = %e, "Send failed, removing session");
                self.metrics.send_failure();
                self.remove(*key, session.id()).await;
                Err(e)
            }
        }
    }

    /// Remove every session
    pub async fn close_all(&self) {
        for session in self.snapshot() {
            self.remove(session.key(), session.id()).await;
        }
        self.pending.clear();
    }
}
