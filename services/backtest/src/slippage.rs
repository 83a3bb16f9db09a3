//! Slippage models applied to simulated executions.
//!
//! Slippage is always adverse: buys execute above the target price, sells
//! below. The dynamic model widens a fixed bps figure by current volatility
//! (stddev of returns over the context window).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use vela_types::OrderSide;

const BPS: Decimal = dec!(10000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum SlippageModel {
    #[default]
    None,
    Fixed {
        bps: u32,
    },
    Dynamic {
        bps: u32,
    },
}

impl SlippageModel {
    /// Adverse execution price for a `side` order targeting `target`
    pub fn apply(&self, side: OrderSide, target: Decimal, volatility: Decimal) -> Decimal {
        let slip = match self {
            SlippageModel::None => return target,
            SlippageModel::Fixed { bps } => Decimal::from(*bps) / BPS,
            SlippageModel::Dynamic { bps } => {
                Decimal::from(*bps) / BPS * (Decimal::ONE + volatility)
            }
        };
        match side {
            OrderSide::Buy => target * (Decimal::ONE + slip),
            OrderSide::Sell => target * (Decimal::ONE - slip),
        }
    }
}
