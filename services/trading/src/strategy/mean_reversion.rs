//! Bollinger + RSI mean-reversion strategy.
//!
//! Enters short when price stretches above the upper band with an overbought
//! RSI, long on the mirrored condition. Exits at the band middle when
//! `take_profit_at_mean` is set, otherwise at the protective stop.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use vela_types::{Signal, SignalAction, StrategyKind};

use super::{bool_param, decimal_param, MarketCtx, ParamSpec, Strategy};
use crate::Result;

#[derive(Debug, Clone, Copy)]
struct OpenTrade {
    side: SignalAction,
    entry: Decimal,
}

pub struct MeanReversionStrategy {
    rsi_overbought: Decimal,
    rsi_oversold: Decimal,
    stop_loss_pct: Decimal,
    take_profit_at_mean: bool,
    /// Fraction of balance committed per entry
    position_pct: Decimal,
    open: Option<OpenTrade>,
}

impl MeanReversionStrategy {
    pub fn new(params: &Value) -> Result<Self> {
        Ok(Self {
            rsi_overbought: decimal_param(params, "rsi_overbought", dec!(70))?,
            rsi_oversold: decimal_param(params, "rsi_oversold", dec!(30))?,
            stop_loss_pct: decimal_param(params, "stop_loss_pct", dec!(0.02))?,
            take_profit_at_mean: bool_param(params, "take_profit_at_mean", true)?,
            position_pct: decimal_param(params, "position_pct", dec!(0.1))?,
            open: None,
        })
    }

    pub fn param_schema() -> Vec<ParamSpec> {
        vec![
            ParamSpec {
                name: "rsi_overbought",
                default: json!(70),
                grid: vec![json!(65), json!(70), json!(75), json!(80)],
            },
            ParamSpec {
                name: "rsi_oversold",
                default: json!(30),
                grid: vec![json!(20), json!(25), json!(30), json!(35)],
            },
            ParamSpec {
                name: "stop_loss_pct",
                default: json!(0.02),
                grid: vec![json!(0.01), json!(0.02), json!(0.03)],
            },
            ParamSpec {
                name: "position_pct",
                default: json!(0.1),
                grid: vec![json!(0.05), json!(0.1), json!(0.2)],
            },
        ]
    }

    /// Confidence blends RSI extremity with distance past the band, clamped
    /// to [0.5, 1].
    fn entry_confidence(&self, rsi_excess: Decimal, band_excess: Decimal) -> Decimal {
        (dec!(0.5) + rsi_excess / dec!(100) + band_excess).clamp(dec!(0.5), Decimal::ONE)
    }

    fn check_exit(&mut self, ctx: &MarketCtx, middle: Decimal) -> Option<Signal> {
        let open = self.open?;
        let price = ctx.price;
        match open.side {
            SignalAction::Sell => {
                // short: profit at the mean, stop above entry
                let stop = open.entry * (Decimal::ONE + self.stop_loss_pct);
                if self.take_profit_at_mean && price <= middle {
                    self.open = None;
                    return Some(self.close_signal(SignalAction::Buy, price, "reverted to mean"));
                }
                if price >= stop {
                    self.open = None;
                    return Some(self.close_signal(SignalAction::Buy, price, "stop loss"));
                }
            }
            SignalAction::Buy => {
                let stop = open.entry * (Decimal::ONE - self.stop_loss_pct);
                if self.take_profit_at_mean && price >= middle {
                    self.open = None;
                    return Some(self.close_signal(SignalAction::Sell, price, "reverted to mean"));
                }
                if price <= stop {
                    self.open = None;
                    return Some(self.close_signal(SignalAction::Sell, price, "stop loss"));
                }
            }
            SignalAction::Hold => {}
        }
        None
    }

    fn close_signal(&self, action: SignalAction, price: Decimal, reason: &str) -> Signal {
        Signal {
            action,
            confidence: dec!(0.9),
            price,
            amount: self.position_pct,
            reason: reason.to_string(),
            stop_loss: None,
            take_profit: None,
            trailing_stop: None,
        }
    }
}

impl Strategy for MeanReversionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MeanReversion
    }

    fn generate_signal(&mut self, ctx: &MarketCtx) -> Result<Signal> {
        let (Some(bb), Some(rsi)) = (ctx.indicators.bollinger, ctx.indicators.rsi14) else {
            return Ok(Signal::hold(ctx.price, "indicators warming up"));
        };

        if let Some(exit) = self.check_exit(ctx, bb.middle) {
            return Ok(exit);
        }
        if self.open.is_some() {
            return Ok(Signal::hold(ctx.price, "position open"));
        }

        let price = ctx.price;
        if price > bb.upper && rsi > self.rsi_overbought {
            let confidence = self.entry_confidence(
                rsi - self.rsi_overbought,
                (price - bb.upper) / bb.upper,
            );
            self.open = Some(OpenTrade { side: SignalAction::Sell, entry: price });
            return Ok(Signal {
                action: SignalAction::Sell,
                confidence,
                price,
                amount: self.position_pct,
                reason: format!("price {price} above upper band {}, rsi {rsi}", bb.upper),
                stop_loss: Some(price * (Decimal::ONE + self.stop_loss_pct)),
                take_profit: self.take_profit_at_mean.then_some(bb.middle),
                trailing_stop: None,
            });
        }

        if price < bb.lower && rsi < self.rsi_oversold {
            let confidence = self.entry_confidence(
                self.rsi_oversold - rsi,
                (bb.lower - price) / bb.lower,
            );
            self.open = Some(OpenTrade { side: SignalAction::Buy, entry: price });
            return Ok(Signal {
                action: SignalAction::Buy,
                confidence,
                price,
                amount: self.position_pct,
                reason: format!("price {price} below lower band {}, rsi {rsi}", bb.lower),
                stop_loss: Some(price * (Decimal::ONE - self.stop_loss_pct)),
                take_profit: self.take_profit_at_mean.then_some(bb.middle),
                trailing_stop: None,
            });
        }

        Ok(Signal::hold(price, "inside bands"))
    }

    fn update_params(&mut self, params: &Value) -> Result<()> {
        self.rsi_overbought = decimal_param(params, "rsi_overbought", self.rsi_overbought)?;
        self.rsi_oversold = decimal_param(params, "rsi_oversold", self.rsi_oversold)?;
        self.stop_loss_pct = decimal_param(params, "stop_loss_pct", self.stop_loss_pct)?;
        self.take_profit_at_mean = bool_param(params, "take_profit_at_mean", self.take_profit_at_mean)?;
        self.position_pct = decimal_param(params, "position_pct", self.position_pct)?;
        Ok(())
    }

    fn config(&self) -> Value {
        json!({
            "rsi_overbought": self.rsi_overbought,
            "rsi_oversold": self.rsi_oversold,
            "stop_loss_pct": self.stop_loss_pct,
            "take_profit_at_mean": self.take_profit_at_mean,
            "position_pct": self.position_pct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{BollingerBands, IndicatorSet};
    use vela_types::Pair;

    fn ctx(price: Decimal, bb: BollingerBands, rsi: Decimal) -> MarketCtx {
        MarketCtx::synthetic(
            Pair::parse("BTC/USD").unwrap(),
            price,
            IndicatorSet {
                rsi14: Some(rsi),
                bollinger: Some(bb),
                ..Default::default()
            },
        )
    }

    fn bands(upper: Decimal, middle: Decimal, lower: Decimal) -> BollingerBands {
        BollingerBands { upper, middle, lower }
    }

    #[test]
    fn overbought_above_band_enters_short() {
        // price=105, bb={100,95,90}, rsi=75, overbought=70
        let mut strategy = MeanReversionStrategy::new(&json!({})).unwrap();
        let signal = strategy
            .generate_signal(&ctx(dec!(105), bands(dec!(100), dec!(95), dec!(90)), dec!(75)))
            .unwrap();

        assert_eq!(signal.action, SignalAction::Sell);
        assert_eq!(signal.stop_loss, Some(dec!(107.1)));
        assert_eq!(signal.take_profit, Some(dec!(95)));
        assert!(signal.confidence >= dec!(0.5) && signal.confidence <= Decimal::ONE);
    }

    #[test]
    fn oversold_below_band_enters_long() {
        let mut strategy = MeanReversionStrategy::new(&json!({})).unwrap();
        let signal = strategy
            .generate_signal(&ctx(dec!(85), bands(dec!(100), dec!(95), dec!(90)), dec!(25)))
            .unwrap();

        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.stop_loss, Some(dec!(83.3)));
        assert_eq!(signal.take_profit, Some(dec!(95)));
    }

    #[test]
    fn holds_inside_bands() {
        let mut strategy = MeanReversionStrategy::new(&json!({})).unwrap();
        let signal = strategy
            .generate_signal(&ctx(dec!(95), bands(dec!(100), dec!(95), dec!(90)), dec!(50)))
            .unwrap();
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[test]
    fn short_takes_profit_at_mean() {
        let mut strategy = MeanReversionStrategy::new(&json!({})).unwrap();
        let bb = bands(dec!(100), dec!(95), dec!(90));
        strategy.generate_signal(&ctx(dec!(105), bb, dec!(75))).unwrap();

        // price falls to the middle band: close the short with a buy
        let exit = strategy.generate_signal(&ctx(dec!(94), bb, dec!(55))).unwrap();
        assert_eq!(exit.action, SignalAction::Buy);
        assert!(exit.reason.contains("mean"));

        // flat again afterwards
        let after = strategy.generate_signal(&ctx(dec!(94), bb, dec!(55))).unwrap();
        assert_eq!(after.action, SignalAction::Hold);
    }

    #[test]
    fn short_stops_out_above_entry() {
        let mut strategy = MeanReversionStrategy::new(&json!({})).unwrap();
        let bb = bands(dec!(100), dec!(95), dec!(90));
        strategy.generate_signal(&ctx(dec!(105), bb, dec!(75))).unwrap();

        // 105 * 1.02 = 107.1
        let exit = strategy.generate_signal(&ctx(dec!(107.2), bb, dec!(80))).unwrap();
        assert_eq!(exit.action, SignalAction::Buy);
        assert!(exit.reason.contains("stop"));
    }

    #[test]
    fn holds_without_indicators() {
        let mut strategy = MeanReversionStrategy::new(&json!({})).unwrap();
        let bare = MarketCtx::synthetic(
            Pair::parse("BTC/USD").unwrap(),
            dec!(100),
            IndicatorSet::default(),
        );
        let signal = strategy.generate_signal(&bare).unwrap();
        assert_eq!(signal.action, SignalAction::Hold);
    }
}
