//! Process-wide event bus linking Vela's producers and consumers.
//!
//! One instance is shared via `Arc<EventBus>` across every service; it is the
//! only piece of global mutable state in the platform. Handlers for an event
//! are invoked in descending priority order, handler failures are isolated
//! and counted, and a bounded ring buffer retains recent events for
//! inspection.

mod bus;
pub mod events;
mod metrics;

pub use bus::{
    Event, EventBus, EventHandler, PublishOptions, SubscribeOptions, SubscriptionId,
};
pub use metrics::BusMetricsSnapshot;

use thiserror::Error;

/// Result alias for bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors surfaced by bus operations
#[derive(Debug, Error)]
pub enum BusError {
    /// `wait_for` expired before a matching event arrived
    #[error("timed out after {timeout_ms}ms waiting for '{event}'")]
    WaitTimeout {
        /// Event name that was awaited
        event: String,
        /// How long we waited
        timeout_ms: u64,
    },

    /// Payload could not be serialized for publication
    #[error("failed to encode event payload: {0}")]
    Encode(#[from] serde_json::Error),
}
