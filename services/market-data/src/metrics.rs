//! Per-client throughput and connection counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ClientMetrics {
    pub messages_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub parse_errors: AtomicU64,
    pub connections: AtomicU64,
    pub disconnections: AtomicU64,
    pub reconnect_attempts: AtomicU64,
}

impl ClientMetrics {
    pub fn record_message(&self, size: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnection(&self) {
        self.disconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ClientMetricsSnapshot {
        ClientMetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            disconnections: self.disconnections.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientMetricsSnapshot {
    pub messages_received: u64,
    pub bytes_received: u64,
    pub parse_errors: u64,
    pub connections: u64,
    pub disconnections: u64,
    pub reconnect_attempts: u64,
}
