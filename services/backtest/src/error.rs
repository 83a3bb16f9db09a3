//! Backtest error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BacktestError>;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("not enough data: {have} candles, need at least {need}")]
    InsufficientData {
        have: usize,
        need: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("empty parameter grid")]
    EmptyGrid,

    #[error("strategy error: {0}")]
    Strategy(#[from] vela_trading::TradingError),

    #[error("storage error: {0}")]
    Storage(#[from] vela_storage::StorageError),

    #[error("{entity} not found: {key}")]
    NotFound {
        entity: &'static str,
        key: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
