//! Event names and payload shapes used across the platform.
//!
//! Payloads travel the bus as `serde_json::Value`; the structs here are the
//! typed builders/parsers for them, so producers and consumers agree on keys.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// Market data
pub const MARKET_PRICE_UPDATE: &str = "market:priceUpdate";
pub const MARKET_AGGREGATED_PRICE: &str = "market:aggregatedPrice";
pub const MARKET_DATA: &str = "market:data";

// Strategy and coordination
pub const STRATEGY_SIGNAL: &str = "trading:strategySignal";
pub const SIGNAL_BLOCKED: &str = "trading:signalBlocked";

// Order lifecycle
pub const ORDER_CREATED: &str = "trading:orderCreated";
pub const ORDER_OPENED: &str = "trading:orderOpened";
pub const ORDER_PARTIALLY_FILLED: &str = "trading:orderPartiallyFilled";
pub const ORDER_FILLED: &str = "trading:orderFilled";
pub const ORDER_CANCELLED: &str = "trading:orderCancelled";
pub const ORDER_REJECTED: &str = "trading:orderRejected";
pub const ORDER_COMPLETED: &str = "trading:orderCompleted";

// Risk
pub const RISK_CHECK_FAILED: &str = "risk:checkFailed";
pub const CIRCUIT_BREAKER_TRIGGERED: &str = "risk:circuitBreakerTriggered";
pub const CIRCUIT_BREAKER_RESET: &str = "risk:circuitBreakerReset";

/// `trading:strategySignal` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySignalEvent {
    pub strategy_id: String,
    pub user_id: String,
    pub signal: Value,
    pub ts: i64,
}

/// `trading:signalBlocked` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBlockedEvent {
    pub signal: Value,
    pub reason: String,
}

/// Payload for every `trading:order*` lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order: Value,
    pub user_id: String,
}

/// `risk:checkFailed` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCheckFailedEvent {
    pub user_id: String,
    pub trade_params: Value,
    pub failed_checks: Vec<String>,
    pub ts: i64,
}

/// `risk:circuitBreakerTriggered` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerEvent {
    pub user_id: String,
    pub reasons: Vec<String>,
    /// Suspension length in milliseconds
    pub duration: u64,
    pub ts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strategy_signal_round_trips() {
        let evt = StrategySignalEvent {
            strategy_id: "s1".into(),
            user_id: "u1".into(),
            signal: json!({"action": "buy"}),
            ts: 42,
        };
        let value = serde_json::to_value(&evt).unwrap();
        assert_eq!(value["strategy_id"], "s1");
        let back: StrategySignalEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back.ts, 42);
    }
}
