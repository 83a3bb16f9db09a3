//! Backtest run configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::slippage::SlippageModel;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_balance: Decimal,
    pub maker_fee: Decimal,
    /// Applied symmetrically to simulated executions
    pub taker_fee: Decimal,
    pub slippage: SlippageModel,
    /// Candle history visible to the strategy at each step
    pub context_window: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            maker_fee: dec!(0.001),
            taker_fee: dec!(0.002),
            slippage: SlippageModel::default(),
            context_window: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_defaults() {
        let config = BacktestConfig::default();
        assert_eq!(config.initial_balance, dec!(10000));
        assert_eq!(config.taker_fee, dec!(0.002));
        assert!(matches!(config.slippage, SlippageModel::None));
    }

    #[test]
    fn deserializes_slippage_variants() {
        let config: BacktestConfig =
            serde_json::from_str(r#"{"slippage": {"model": "fixed", "bps": 5}}"#).unwrap();
        assert!(matches!(config.slippage, SlippageModel::Fixed { bps: 5 }));
    }
}
