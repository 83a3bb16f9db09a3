//! Ingestion error types.

use thiserror::Error;
use vela_types::Venue;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("exchange fetch failed on {venue}: {reason}")]
    Fetch {
        venue: Venue,
        reason: String,
    },

    /// Gave up after the configured retry budget
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: String,
    },

    #[error("job {0} was cancelled")]
    Cancelled(uuid::Uuid),

    #[error("job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("invalid date range: {from} .. {to}")]
    InvalidRange {
        from: i64,
        to: i64,
    },

    #[error("storage error: {0}")]
    Storage(#[from] vela_storage::StorageError),

    #[error("domain error: {0}")]
    Domain(#[from] vela_types::TypesError),
}
