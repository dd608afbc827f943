//! Metrics registry
//!
//! - Counters only, monotonic
//! - Reset only on construction
//! - Atomic, lock-free; Relaxed ordering is enough for counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for the subscription manager
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Channels opened on the transport
    channels_opened: AtomicU64,
    /// Channels closed on the transport (graceful, forced or orphaned)
    channels_closed: AtomicU64,
    /// Opened channels the transport gave up on (failed handshake or lost)
    channels_lost: AtomicU64,
    /// Open attempts that failed, sync or async
    open_failures: AtomicU64,
    /// teardown_all invocations
    forced_teardowns: AtomicU64,
    /// Raw payloads received from the transport
    events_received: AtomicU64,
    /// Handler invocations that completed
    events_delivered: AtomicU64,
    /// Events dropped by a filter predicate
    events_filtered: AtomicU64,
    /// Payloads rejected during normalization
    events_malformed: AtomicU64,
    /// Handler invocations that failed
    handler_failures: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Channel lifecycle

    pub fn increment_channels_opened(&self) {
        self.channels_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_channels_closed(&self) {
        self.channels_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_channels_lost(&self) {
        self.channels_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_open_failures(&self) {
        self.open_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_forced_teardowns(&self) {
        self.forced_teardowns.fetch_add(1, Ordering::Relaxed);
    }

    // Dispatch

    pub fn increment_events_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_events_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_events_filtered(&self) {
        self.events_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_events_malformed(&self) {
        self.events_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_handler_failures(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            channels_opened: self.channels_opened.load(Ordering::Relaxed),
            channels_closed: self.channels_closed.load(Ordering::Relaxed),
            channels_lost: self.channels_lost.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            forced_teardowns: self.forced_teardowns.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_filtered: self.events_filtered.load(Ordering::Relaxed),
            events_malformed: self.events_malformed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub channels_opened: u64,
    pub channels_closed: u64,
    pub channels_lost: u64,
    pub open_failures: u64,
    pub forced_teardowns: u64,
    pub events_received: u64,
    pub events_delivered: u64,
    pub events_filtered: u64,
    pub events_malformed: u64,
    pub handler_failures: u64,
}

impl MetricsSnapshot {
    /// Channels currently open according to the counters
    pub fn channels_live(&self) -> u64 {
        self.channels_opened
            .saturating_sub(self.channels_closed)
            .saturating_sub(self.channels_lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_increment_counters() {
        let registry = MetricsRegistry::new();

        registry.increment_channels_opened();
        registry.increment_channels_opened();
        registry.increment_channels_opened();
        registry.increment_channels_closed();
        registry.increment_channels_lost();
        registry.increment_events_filtered();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.channels_opened, 3);
        assert_eq!(snapshot.channels_closed, 1);
        assert_eq!(snapshot.channels_lost, 1);
        assert_eq!(snapshot.channels_live(), 1);
        assert_eq!(snapshot.events_filtered, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let registry = MetricsRegistry::new();
        registry.increment_handler_failures();

        let json = serde_json::to_value(registry.snapshot()).unwrap();
        assert_eq!(json["handler_failures"], 1);
        assert_eq!(json["events_delivered"], 0);
    }
}
