//! Storage error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("domain error: {0}")]
    Domain(#[from] vela_types::TypesError),

    /// A candle file failed structural checks while decoding
    #[error("corrupt candle file {path}: {reason}")]
    CorruptFile {
        path: String,
        reason: String,
    },

    #[error("{entity} not found: {key}")]
    NotFound {
        entity: &'static str,
        key: String,
    },
}
