//! Strategy contract, built-in strategies, factory and scheduler.

pub mod context;
pub mod grid;
pub mod indicators;
pub mod mean_reversion;
pub mod momentum;
pub mod runtime;

pub use context::{BollingerBands, IndicatorSet, MarketCtx};
pub use grid::GridStrategy;
pub use mean_reversion::MeanReversionStrategy;
pub use momentum::MomentumStrategy;
pub use runtime::{MarketSnapshotSource, StrategyScheduler};

use serde_json::Value;

use vela_types::{Signal, StrategyKind};

use crate::{Result, TradingError};

/// The contract every strategy implements. Instances are owned by one
/// scheduler slot and never shared, so `&mut self` is fine.
pub trait Strategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Evaluate the market and produce a signal (possibly `hold`)
    fn generate_signal(&mut self, ctx: &MarketCtx) -> Result<Signal>;

    /// Apply a partial parameter update
    fn update_params(&mut self, params: &Value) -> Result<()>;

    /// Current effective parameters
    fn config(&self) -> Value;
}

/// One tunable parameter, with the grid the optimizer may enumerate
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: Value,
    pub grid: Vec<Value>,
}

/// Builds strategies from their tagged kind plus a parameter object
pub struct StrategyFactory;

impl StrategyFactory {
    pub fn build(kind: StrategyKind, params: &Value) -> Result<Box<dyn Strategy>> {
        Ok(match kind {
            StrategyKind::MeanReversion => Box::new(MeanReversionStrategy::new(params)?),
            StrategyKind::Momentum => Box::new(MomentumStrategy::new(params)?),
            StrategyKind::Grid => Box::new(GridStrategy::new(params)?),
        })
    }

    /// Parameter schema for a strategy kind
    pub fn param_schema(kind: StrategyKind) -> Vec<ParamSpec> {
        match kind {
            StrategyKind::MeanReversion => MeanReversionStrategy::param_schema(),
            StrategyKind::Momentum => MomentumStrategy::param_schema(),
            StrategyKind::Grid => GridStrategy::param_schema(),
        }
    }
}

pub(crate) fn decimal_param(
    params: &Value,
    name: &'static str,
    default: rust_decimal::Decimal,
) -> Result<rust_decimal::Decimal> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|_| TradingError::Validation(vec![format!("bad parameter {name}: {value}")])),
    }
}

pub(crate) fn usize_param(params: &Value, name: &'static str, default: usize) -> Result<usize> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| TradingError::Validation(vec![format!("bad parameter {name}: {value}")])),
    }
}

pub(crate) fn bool_param(params: &Value, name: &'static str, default: bool) -> Result<bool> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_bool()
            .ok_or_else(|| TradingError::Validation(vec![format!("bad parameter {name}: {value}")])),
    }
}
