//! Per-connection state owned by the session manager.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout::with_timeout_error;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type SessionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One accepted connection.
///
/// Writes are serialized by an async mutex so concurrent broadcasts never
/// interleave packets. The token is a child of the server token; cancelling
/// it ends the session's read loop.
pub struct Session {
    id: u64,
    key: SocketAddr,
    writer: Mutex<SessionWriter>,
    cancel: CancellationToken,
    last_active: StdMutex<Instant>,
}

impl Session {
    pub fn new<W>(id: u64, key: SocketAddr, writer: W, cancel: CancellationToken) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            key,
            writer: Mutex::new(Box::new(writer)),
            cancel,
            last_active: StdMutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote `ip:port` of the peer
    pub fn key(&self) -> SocketAddr {
        self.key
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Write one encoded packet, bounded by `send_timeout`
    pub async fn send(&self, bytes: &Bytes, send_timeout: Duration) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        with_timeout_error(
            async {
                let mut writer = self.writer.lock().await;
                writer.write_all(bytes).await?;
                writer.flush().await?;
                Ok(())
            },
            send_timeout,
        )
        .await
    }

    /// Record activity at `now`
    pub fn touch_at(&self, now: Instant) {
        if let Ok(mut last) = self.last_active.lock() {
            *last = now;
        }
    }

    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    pub fn last_active(&self) -> Instant {
        self.last_active
            .lock()
            .map(|last| *last)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    /// Silence as of `now`
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active())
    }

    /// Cancel the read loop and shut the write half down
    pub async fn close(&self) {
        self.cancel.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("closed", &self.is_closed())
            .finish()
    }
}
