use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tracks degraded-service counters for the relay.
///
/// The observer-facing API never throws for transient network conditions;
/// these counters are how operators see handshake failures, poll failures
/// and dropped payloads that would otherwise be invisible.
#[derive(Clone, Default)]
pub struct RelayMetrics {
    /// Updates accepted by the publisher (lifetime counter)
    published: Arc<AtomicU64>,

    /// Updates handed to observer callbacks
    deliveries: Arc<AtomicU64>,

    /// Push handshakes that failed or timed out
    handshake_failures: Arc<AtomicU64>,

    /// Live channels that errored or closed unexpectedly
    channel_drops: Arc<AtomicU64>,

    /// Subscriptions promoted from Polling back to Live
    promotions: Arc<AtomicU64>,

    /// Poll ticks that failed (network or parse)
    poll_failures: Arc<AtomicU64>,

    /// Push payloads dropped for non-numeric coordinates
    malformed_drops: Arc<AtomicU64>,

    /// Deliveries suppressed by the dedup window
    duplicates_suppressed: Arc<AtomicU64>,

    /// Currently open WebSocket fan-out connections
    ws_connections: Arc<AtomicU64>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_failure(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_channel_drop(&self) {
        self.channel_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_drop(&self) {
        self.malformed_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_suppressed(&self) {
        self.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_ws_connection(&self) {
        self.ws_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_ws_connection(&self) {
        self.ws_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn handshake_failures(&self) -> u64 {
        self.handshake_failures.load(Ordering::Relaxed)
    }

    pub fn poll_failures(&self) -> u64 {
        self.poll_failures.load(Ordering::Relaxed)
    }

    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    pub fn duplicates_suppressed(&self) -> u64 {
        self.duplicates_suppressed.load(Ordering::Relaxed)
    }

    /// Get snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            channel_drops: self.channel_drops.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            malformed_drops: self.malformed_drops.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            ws_connections: self.ws_connections.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of relay counters at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub deliveries: u64,
    pub handshake_failures: u64,
    pub channel_drops: u64,
    pub promotions: u64,
    pub poll_failures: u64,
    pub malformed_drops: u64,
    pub duplicates_suppressed: u64,
    pub ws_connections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = RelayMetrics::new();
        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.published, 0);
        assert_eq!(snapshot.deliveries, 0);
        assert_eq!(snapshot.handshake_failures, 0);
        assert_eq!(snapshot.ws_connections, 0);
    }

    #[test]
    fn test_counters_record() {
        let metrics = RelayMetrics::new();

        metrics.record_published();
        metrics.record_published();
        metrics.record_delivery();
        metrics.record_handshake_failure();
        metrics.record_poll_failure();
        metrics.record_duplicate_suppressed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.published, 2);
        assert_eq!(snapshot.deliveries, 1);
        assert_eq!(snapshot.handshake_failures, 1);
        assert_eq!(snapshot.poll_failures, 1);
        assert_eq!(snapshot.duplicates_suppressed, 1);
    }

    #[test]
    fn test_ws_connection_tracking() {
        let metrics = RelayMetrics::new();

        metrics.increment_ws_connection();
        metrics.increment_ws_connection();
        assert_eq!(metrics.snapshot().ws_connections, 2);

        metrics.decrement_ws_connection();
        assert_eq!(metrics.snapshot().ws_connections, 1);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = RelayMetrics::new();
        let clone = metrics.clone();

        clone.record_delivery();
        assert_eq!(metrics.deliveries(), 1);
    }
}
