//! Observability and Metrics
//!
//! Counters for monitoring transport throughput and session health.
//!
//! Each server, client, publisher and subscriber owns its own `Metrics`
//! (shared with its loops through an `Arc`); there is no process-global
//! instance. Uses atomic counters for thread-safe collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one transport endpoint
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted or established
    pub connections_total: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Sessions removed by the liveness sweep
    pub sessions_evicted: AtomicU64,
    /// Sessions replaced by a reconnect from the same endpoint
    pub sessions_superseded: AtomicU64,
    /// Total packets sent over TCP
    pub packets_sent: AtomicU64,
    /// Total packets received over TCP
    pub packets_received: AtomicU64,
    /// Total bytes sent (TCP and UDP)
    pub bytes_sent: AtomicU64,
    /// Total bytes received (TCP and UDP)
    pub bytes_received: AtomicU64,
    /// Datagrams published
    pub datagrams_sent: AtomicU64,
    /// Datagrams accepted by the subscriber
    pub datagrams_received: AtomicU64,
    /// Datagrams rejected (bad header, foreign system, truncated)
    pub datagrams_dropped: AtomicU64,
    /// Sends that failed and caused a session removal
    pub send_failures: AtomicU64,
    /// Framing and codec errors
    pub protocol_errors: AtomicU64,
    /// Received commands discarded because the pending queue was full
    pub commands_dropped: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            sessions_evicted: AtomicU64::new(0),
            sessions_superseded: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            datagrams_sent: AtomicU64::new(0),
            datagrams_received: AtomicU64::new(0),
            datagrams_dropped: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            commands_dropped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        // Saturating: a close racing a stop must not wrap the gauge
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    /// Record a session removed by the liveness sweep
    pub fn session_evicted(&self) {
        self.sessions_evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session replaced by a reconnect
    pub fn session_superseded(&self) {
        self.sessions_superseded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a packet sent
    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a packet received
    pub fn packet_received(&self, byte_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a datagram published
    pub fn datagram_sent(&self, byte_count: u64) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a datagram accepted
    pub fn datagram_received(&self, byte_count: u64) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a datagram rejected
    pub fn datagram_dropped(&self) {
        self.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed send
    pub fn send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a protocol error
    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a queued command discarded on overflow
    pub fn command_dropped(&self) {
        self.commands_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            sessions_superseded: self.sessions_superseded.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            datagrams_dropped: self.datagrams_dropped.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self, mark: &str) {
        let snapshot = self.snapshot();
        info!(
            mark,
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            sessions_evicted = snapshot.sessions_evicted,
            sessions_superseded = snapshot.sessions_superseded,
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            datagrams_sent = snapshot.datagrams_sent,
            datagrams_received = snapshot.datagrams_received,
            datagrams_dropped = snapshot.datagrams_dropped,
            send_failures = snapshot.send_failures,
            protocol_errors = snapshot.protocol_errors,
            commands_dropped = snapshot.commands_dropped,
            uptime_seconds = snapshot.uptime_seconds,
            "Transport metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub sessions_evicted: u64,
    pub sessions_superseded: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub datagrams_dropped: u64,
    pub send_failures: u64,
    pub protocol_errors: u64,
    pub commands_dropped: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_gauge_never_wraps() {
        let metrics = Metrics::new();
        metrics.connection_established();
        metrics.connection_closed();
        metrics.connection_closed();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 1);
        assert_eq!(snapshot.connections_active, 0);
    }

    #[test]
    fn test_byte_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.packet_sent(27);
        metrics.datagram_sent(100);
        metrics.packet_received(30);
        metrics.datagram_received(5);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_sent, 127);
        assert_eq!(snapshot.bytes_received, 35);
        assert_eq!(snapshot.packets_sent, 1);
        assert_eq!(snapshot.datagrams_sent, 1);
    }
}
