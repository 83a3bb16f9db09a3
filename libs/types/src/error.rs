//! Error types for domain parsing and accounting.

use thiserror::Error;

/// Result type alias for domain-type operations
pub type Result<T> = std::result::Result<T, TypesError>;

/// Errors produced while constructing or mutating domain types
#[derive(Debug, Error, PartialEq)]
pub enum TypesError {
    /// Trading pair could not be parsed into BASE/QUOTE form
    #[error("invalid trading pair: {0}")]
    InvalidPair(String),

    /// Timeframe string did not match `{integer}{m|h|d|w|M}`
    #[error("invalid timeframe: {0}")]
    InvalidTimeframe(String),

    /// Unknown venue name
    #[error("unknown venue: {0}")]
    UnknownVenue(String),

    /// Candle failed a structural invariant
    #[error("invalid candle at {timestamp}: {reason}")]
    InvalidCandle {
        /// Timestamp of the offending candle (ms)
        timestamp: i64,
        /// Which invariant was violated
        reason: String,
    },

    /// Attempted an order state transition the lifecycle forbids
    #[error("illegal order transition from {from} to {to}")]
    IllegalTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Position mutation would break an accounting invariant
    #[error("position accounting error: {0}")]
    Accounting(String),

    /// Value outside the 8-decimal fixed-point representable range
    #[error("value out of fixed-point range: {0}")]
    FixedPointRange(String),
}
