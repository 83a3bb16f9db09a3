//! Strategy records and lifecycle.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pair::Pair;
use crate::signal::Signal;
use crate::venue::Venue;
use crate::UserId;

/// Built-in strategy families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    MeanReversion,
    Momentum,
    Grid,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::MeanReversion => "mean_reversion",
            StrategyKind::Momentum => "momentum",
            StrategyKind::Grid => "grid",
        }
    }
}

/// Lifecycle: `inactive → active → {paused | inactive | error}`;
/// `paused → {active, inactive}`; `error` clears only via deactivate+activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    Inactive,
    Active,
    Paused,
    Error,
}

impl StrategyStatus {
    pub fn can_transition_to(&self, next: StrategyStatus) -> bool {
        use StrategyStatus::*;
        match (self, next) {
            (Inactive, Active) => true,
            (Active, Paused) | (Active, Inactive) | (Active, Error) => true,
            (Paused, Active) | (Paused, Inactive) => true,
            (Error, Inactive) => true,
            _ => false,
        }
    }
}

/// Rolling performance counters for one strategy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub total_pnl: Decimal,
}

/// A configured strategy instance owned by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub id: String,
    pub user_id: UserId,
    pub kind: StrategyKind,
    pub pair: Pair,
    pub exchange: Venue,
    /// Strategy-specific parameters, schema owned by the strategy type
    pub params: Value,
    pub status: StrategyStatus,
    pub performance: StrategyPerformance,
    /// Timestamps (ms) of trades attributed to this strategy
    pub trade_times: Vec<i64>,
    /// Recent emitted signals, newest last, bounded by the runtime
    pub signals: Vec<Signal>,
    pub last_run_at: Option<i64>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_edges() {
        use StrategyStatus::*;
        assert!(Inactive.can_transition_to(Active));
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(Active.can_transition_to(Error));
        assert!(Error.can_transition_to(Inactive));
        // error does not resume directly
        assert!(!Error.can_transition_to(Active));
        assert!(!Inactive.can_transition_to(Paused));
    }
}
