//! Bus throughput counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal atomic counters, shared by reference from the bus
#[derive(Debug, Default)]
pub(crate) struct BusMetrics {
    pub events_published: AtomicU64,
    pub events_handled: AtomicU64,
    pub handler_errors: AtomicU64,
}

impl BusMetrics {
    pub fn record_publish(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handled(&self) {
        self.events_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of bus activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusMetricsSnapshot {
    pub events_published: u64,
    pub events_handled: u64,
    pub handler_errors: u64,
    pub subscriber_count: usize,
}

impl BusMetrics {
    pub fn snapshot(&self, subscriber_count: usize) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_handled: self.events_handled.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            subscriber_count,
        }
    }
}
