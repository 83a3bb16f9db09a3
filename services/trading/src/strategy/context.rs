//! Market context handed to strategies on every evaluation.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use vela_types::{Candle, Pair};

use super::indicators::{bollinger, ema, rsi, sma, Bollinger};

/// Indicator snapshot derived from the context window
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub sma20: Option<Decimal>,
    pub sma50: Option<Decimal>,
    pub ema12: Option<Decimal>,
    pub ema26: Option<Decimal>,
    pub rsi14: Option<Decimal>,
    pub bollinger: Option<BollingerBands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
}

impl From<Bollinger> for BollingerBands {
    fn from(b: Bollinger) -> Self {
        Self { upper: b.upper, middle: b.middle, lower: b.lower }
    }
}

/// Everything a strategy sees at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct MarketCtx {
    pub timestamp: i64,
    pub pair: Pair,
    pub price: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Window of recent candles, oldest first, current last
    pub recent_candles: Vec<Candle>,
    pub indicators: IndicatorSet,
}

impl MarketCtx {
    /// Build a context from a candle window (oldest first). The final candle
    /// is "now"; indicators fill in as the window allows.
    pub fn from_candles(pair: Pair, candles: &[Candle]) -> Option<Self> {
        let current = *candles.last()?;
        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let indicators = IndicatorSet {
            sma20: sma(&closes, 20),
            sma50: sma(&closes, 50),
            ema12: ema(&closes, 12),
            ema26: ema(&closes, 26),
            rsi14: rsi(&closes, 14),
            bollinger: bollinger(&closes, 20, dec!(2)).map(Into::into),
        };
        Some(Self {
            timestamp: current.timestamp,
            pair,
            price: current.close,
            open: current.open,
            high: current.high,
            low: current.low,
            close: current.close,
            volume: current.volume,
            recent_candles: candles.to_vec(),
            indicators,
        })
    }

    /// Convenience for tests and synthetic ticks: a context with explicit
    /// indicator values and no candle history.
    pub fn synthetic(pair: Pair, price: Decimal, indicators: IndicatorSet) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            pair,
            price,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
            recent_candles: Vec::new(),
            indicators,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, close: Decimal) -> Candle {
        Candle {
            timestamp: ts,
            open: close,
            high: close + dec!(1),
            low: close - dec!(1),
            close,
            volume: dec!(1),
        }
    }

    #[test]
    fn indicators_appear_as_window_grows() {
        let pair = Pair::parse("BTC/USD").unwrap();

        let short: Vec<Candle> = (0..10).map(|i| candle(i, Decimal::from(100 + i))).collect();
        let ctx = MarketCtx::from_candles(pair.clone(), &short).unwrap();
        assert!(ctx.indicators.sma20.is_none());
        assert!(ctx.indicators.rsi14.is_none());

        let long: Vec<Candle> = (0..60).map(|i| candle(i, Decimal::from(100 + i))).collect();
        let ctx = MarketCtx::from_candles(pair, &long).unwrap();
        assert!(ctx.indicators.sma20.is_some());
        assert!(ctx.indicators.sma50.is_some());
        assert!(ctx.indicators.ema26.is_some());
        assert!(ctx.indicators.bollinger.is_some());
        assert_eq!(ctx.price, dec!(159));
        assert_eq!(ctx.timestamp, 59);
    }

    #[test]
    fn empty_window_yields_no_context() {
        assert!(MarketCtx::from_candles(Pair::parse("BTC/USD").unwrap(), &[]).is_none());
    }
}
