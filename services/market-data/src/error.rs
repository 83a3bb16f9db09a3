//! Error types for the market-data service.

use thiserror::Error;
use vela_types::Venue;

pub type Result<T> = std::result::Result<T, MarketDataError>;

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("connection failed for {venue}: {reason}")]
    ConnectionFailed {
        venue: Venue,
        reason: String,
    },

    #[error("connection timeout for {venue} after {timeout_ms}ms")]
    ConnectionTimeout {
        venue: Venue,
        timeout_ms: u64,
    },

    #[error("max reconnect attempts ({max_attempts}) exceeded for {venue}")]
    MaxReconnectAttemptsExceeded {
        venue: Venue,
        max_attempts: u32,
    },

    #[error("parse error for {venue}: {message}")]
    Parse {
        venue: Venue,
        message: String,
    },

    /// Field missing from a venue message
    #[error("missing field in {venue} message: {field}")]
    MissingField {
        venue: Venue,
        field: &'static str,
    },

    #[error("client for {venue} is not running")]
    NotRunning {
        venue: Venue,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("domain error: {0}")]
    Domain(#[from] vela_types::TypesError),
}
