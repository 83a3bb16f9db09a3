//! Trading-core configuration.
//!
//! Every struct deserializes from the platform TOML file with
//! environment-variable overrides (`VELA__RISK__MAX_DAILY_TRADES=50`); the
//! `Default` impls carry the documented production defaults.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pre-trade risk limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Max single-trade value as a fraction of portfolio value
    pub max_position_size: Decimal,
    /// Max total exposure as a fraction of portfolio value
    pub max_total_exposure: Decimal,
    /// Max per-asset concentration as a fraction of portfolio value
    pub max_concentration: Decimal,
    /// Max realized daily loss as a fraction of initial equity
    pub max_daily_loss: Decimal,
    pub max_daily_trades: u32,
    /// Max daily traded volume in quote currency
    pub max_daily_volume: Decimal,
    /// Max drawdown from peak equity, in percent
    pub max_drawdown_pct: Decimal,
    pub max_consecutive_losses: u32,
    /// Circuit-breaker suspension length in milliseconds
    pub circuit_breaker_duration_ms: u64,
    pub trade_cooldown_ms: i64,
    /// Max tolerated slippage between expected and executed price, in percent
    pub max_slippage_pct: Decimal,
    /// Max tolerated deviation from market price, in percent
    pub max_price_deviation_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: dec!(0.2),
            max_total_exposure: dec!(0.8),
            max_concentration: dec!(0.4),
            max_daily_loss: dec!(0.05),
            max_daily_trades: 100,
            max_daily_volume: dec!(100000),
            max_drawdown_pct: dec!(10),
            max_consecutive_losses: 5,
            circuit_breaker_duration_ms: 3_600_000,
            trade_cooldown_ms: 1000,
            max_slippage_pct: dec!(2),
            max_price_deviation_pct: dec!(5),
        }
    }
}

/// Bounds enforced by the order validator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderLimits {
    pub min_order_amount: Decimal,
    pub max_order_amount: Decimal,
    /// Max decimal places accepted on amounts
    pub amount_precision: u32,
    /// Order value bounds in quote currency
    pub min_order_value: Decimal,
    pub max_order_value: Decimal,
    /// Above this value the validator attaches a large-order warning
    pub large_order_value: Decimal,
}

impl Default for OrderLimits {
    fn default() -> Self {
        Self {
            min_order_amount: dec!(0.00000001),
            max_order_amount: dec!(1000000),
            amount_precision: 8,
            min_order_value: dec!(1),
            max_order_value: dec!(10000000),
            large_order_value: dec!(100000),
        }
    }
}

/// Strategy scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    /// Per-strategy daily trade cap, matched by local date
    pub max_daily_trades_per_strategy: u32,
    /// Candle history handed to strategies each tick
    pub context_window: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 30_000,
            max_daily_trades_per_strategy: 10,
            context_window: 50,
        }
    }
}

/// Aggregate trading-core configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub risk: RiskConfig,
    pub order_limits: OrderLimits,
    pub scheduler: SchedulerConfig,
}

impl TradingConfig {
    /// Load from a TOML file, then apply `VELA__*` environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("VELA").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
