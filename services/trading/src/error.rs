//! Trading-core error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TradingError>;

#[derive(Debug, Error)]
pub enum TradingError {
    /// Input failed validation; messages name every violated rule
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{entity} not found: {key}")]
    NotFound {
        entity: &'static str,
        key: String,
    },

    /// Ownership mismatch on a user-scoped entity
    #[error("access denied to {entity} {key}")]
    Forbidden {
        entity: &'static str,
        key: String,
    },

    /// Operation conflicts with current state (e.g. updating a terminal order)
    #[error("conflict: {0}")]
    Conflict(String),

    /// The risk manager denied the trade
    #[error("risk denied: {}", .failed_checks.join(", "))]
    RiskDenied {
        failed_checks: Vec<String>,
    },

    #[error("strategy error: {0}")]
    Strategy(String),

    #[error("domain error: {0}")]
    Domain(#[from] vela_types::TypesError),

    #[error("storage error: {0}")]
    Storage(#[from] vela_storage::StorageError),

    #[error("market data error: {0}")]
    MarketData(#[from] vela_market_data::MarketDataError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TradingError {
    /// Stable machine-readable code for transport-layer mapping
    pub fn code(&self) -> &'static str {
        match self {
            TradingError::Validation(_) => "VALIDATION",
            TradingError::NotFound { .. } => "NOT_FOUND",
            TradingError::Forbidden { .. } => "FORBIDDEN",
            TradingError::Conflict(_) => "CONFLICT",
            TradingError::RiskDenied { .. } => "RISK_DENIED",
            TradingError::Strategy(_) => "STRATEGY",
            TradingError::Domain(_) => "DOMAIN",
            TradingError::Storage(_) => "STORAGE",
            TradingError::MarketData(_) => "MARKET_DATA",
            TradingError::Json(_) => "ENCODING",
        }
    }
}
