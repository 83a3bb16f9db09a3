//! EMA-cross momentum strategy with a MACD filter and trailing stop.
//!
//! The MACD signal line is approximated as `0.8 · macd_line` rather than the
//! classical 9-period EMA of the line, which keeps the filter stateless; the
//! histogram therefore reduces to `0.2 · macd_line`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use vela_types::{Signal, SignalAction, StrategyKind};

use super::{decimal_param, usize_param, MarketCtx, ParamSpec, Strategy};
use crate::Result;

const MACD_SIGNAL_FACTOR: Decimal = dec!(0.8);

#[derive(Debug, Clone, Copy)]
struct OpenTrade {
    side: SignalAction,
    entry: Decimal,
    /// High-watermark for longs, low-watermark for shorts
    watermark: Decimal,
}

pub struct MomentumStrategy {
    macd_threshold: Decimal,
    min_trend_strength: Decimal,
    trailing_stop_pct: Decimal,
    /// Candles inspected for the trend-strength vote
    trend_window: usize,
    position_pct: Decimal,
    open: Option<OpenTrade>,
}

impl MomentumStrategy {
    pub fn new(params: &Value) -> Result<Self> {
        Ok(Self {
            macd_threshold: decimal_param(params, "macd_threshold", Decimal::ZERO)?,
            min_trend_strength: decimal_param(params, "min_trend_strength", dec!(0.3))?,
            trailing_stop_pct: decimal_param(params, "trailing_stop_pct", dec!(0.05))?,
            trend_window: usize_param(params, "trend_window", 10)?,
            position_pct: decimal_param(params, "position_pct", dec!(0.1))?,
            open: None,
        })
    }

    pub fn param_schema() -> Vec<ParamSpec> {
        vec![
            ParamSpec {
                name: "macd_threshold",
                default: json!(0),
                grid: vec![json!(0), json!(0.1), json!(0.5)],
            },
            ParamSpec {
                name: "min_trend_strength",
                default: json!(0.3),
                grid: vec![json!(0.2), json!(0.3), json!(0.5)],
            },
            ParamSpec {
                name: "trailing_stop_pct",
                default: json!(0.05),
                grid: vec![json!(0.03), json!(0.05), json!(0.08)],
            },
            ParamSpec {
                name: "position_pct",
                default: json!(0.1),
                grid: vec![json!(0.05), json!(0.1), json!(0.2)],
            },
        ]
    }

    /// `|ups − downs| / (ups + downs)` over the trailing window
    fn trend_strength(&self, ctx: &MarketCtx) -> Decimal {
        let closes: Vec<Decimal> = ctx.recent_candles.iter().map(|c| c.close).collect();
        let window = closes.len().min(self.trend_window + 1);
        if window < 2 {
            // No history (synthetic tick): treat the trend filter as passed.
            return Decimal::ONE;
        }
        let slice = &closes[closes.len() - window..];
        let mut up = 0u32;
        let mut down = 0u32;
        for w in slice.windows(2) {
            if w[1] > w[0] {
                up += 1;
            } else if w[1] < w[0] {
                down += 1;
            }
        }
        let total = up + down;
        if total == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(up.abs_diff(down)) / Decimal::from(total)
    }

    fn check_exit(&mut self, price: Decimal, crossed_down: bool, crossed_up: bool) -> Option<Signal> {
        let open = self.open.as_mut()?;
        match open.side {
            SignalAction::Buy => {
                open.watermark = open.watermark.max(price);
                let trail = open.watermark * (Decimal::ONE - self.trailing_stop_pct);
                if price <= trail {
                    let exit = self.exit_signal(SignalAction::Sell, price, "trailing stop", trail);
                    self.open = None;
                    return Some(exit);
                }
                if crossed_down {
                    let exit = self.exit_signal(SignalAction::Sell, price, "bearish cross", trail);
                    self.open = None;
                    return Some(exit);
                }
            }
            SignalAction::Sell => {
                open.watermark = open.watermark.min(price);
                let trail = open.watermark * (Decimal::ONE + self.trailing_stop_pct);
                if price >= trail {
                    let exit = self.exit_signal(SignalAction::Buy, price, "trailing stop", trail);
                    self.open = None;
                    return Some(exit);
                }
                if crossed_up {
                    let exit = self.exit_signal(SignalAction::Buy, price, "bullish cross", trail);
                    self.open = None;
                    return Some(exit);
                }
            }
            SignalAction::Hold => {}
        }
        None
    }

    fn exit_signal(&self, action: SignalAction, price: Decimal, reason: &str, trail: Decimal) -> Signal {
        Signal {
            action,
            confidence: dec!(0.8),
            price,
            amount: self.position_pct,
            reason: reason.to_string(),
            stop_loss: None,
            take_profit: None,
            trailing_stop: Some(trail),
        }
    }
}

impl Strategy for MomentumStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Momentum
    }

    fn generate_signal(&mut self, ctx: &MarketCtx) -> Result<Signal> {
        let (Some(ema12), Some(ema26)) = (ctx.indicators.ema12, ctx.indicators.ema26) else {
            return Ok(Signal::hold(ctx.price, "indicators warming up"));
        };

        let macd_line = ema12 - ema26;
        let signal_line = MACD_SIGNAL_FACTOR * macd_line;
        let histogram = macd_line - signal_line;
        let crossed_up = ema12 > ema26;
        let crossed_down = ema12 < ema26;

        if let Some(exit) = self.check_exit(ctx.price, crossed_down, crossed_up) {
            return Ok(exit);
        }
        if self.open.is_some() {
            return Ok(Signal::hold(ctx.price, "riding trend"));
        }

        let strength = self.trend_strength(ctx);
        let price = ctx.price;

        if crossed_up && histogram > self.macd_threshold && strength >= self.min_trend_strength {
            self.open = Some(OpenTrade { side: SignalAction::Buy, entry: price, watermark: price });
            let trail = price * (Decimal::ONE - self.trailing_stop_pct);
            return Ok(Signal {
                action: SignalAction::Buy,
                confidence: (dec!(0.5) + strength / dec!(2)).clamp(dec!(0.5), Decimal::ONE),
                price,
                amount: self.position_pct,
                reason: format!("bullish cross, histogram {histogram}, strength {strength}"),
                stop_loss: None,
                take_profit: None,
                trailing_stop: Some(trail),
            });
        }

        if crossed_down && histogram < -self.macd_threshold && strength >= self.min_trend_strength {
            self.open = Some(OpenTrade { side: SignalAction::Sell, entry: price, watermark: price });
            let trail = price * (Decimal::ONE + self.trailing_stop_pct);
            return Ok(Signal {
                action: SignalAction::Sell,
                confidence: (dec!(0.5) + strength / dec!(2)).clamp(dec!(0.5), Decimal::ONE),
                price,
                amount: self.position_pct,
                reason: format!("bearish cross, histogram {histogram}, strength {strength}"),
                stop_loss: None,
                take_profit: None,
                trailing_stop: Some(trail),
            });
        }

        Ok(Signal::hold(price, "no qualified trend"))
    }

    fn update_params(&mut self, params: &Value) -> Result<()> {
        self.macd_threshold = decimal_param(params, "macd_threshold", self.macd_threshold)?;
        self.min_trend_strength =
            decimal_param(params, "min_trend_strength", self.min_trend_strength)?;
        self.trailing_stop_pct = decimal_param(params, "trailing_stop_pct", self.trailing_stop_pct)?;
        self.trend_window = usize_param(params, "trend_window", self.trend_window)?;
        self.position_pct = decimal_param(params, "position_pct", self.position_pct)?;
        Ok(())
    }

    fn config(&self) -> Value {
        json!({
            "macd_threshold": self.macd_threshold,
            "min_trend_strength": self.min_trend_strength,
            "trailing_stop_pct": self.trailing_stop_pct,
            "trend_window": self.trend_window,
            "position_pct": self.position_pct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_types::{Candle, Pair};

    fn ascending_ctx(len: usize) -> MarketCtx {
        let candles: Vec<Candle> = (0..len)
            .map(|i| {
                let close = Decimal::from(100 + i);
                Candle {
                    timestamp: i as i64 * 60_000,
                    open: close - dec!(1),
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                    volume: dec!(5),
                }
            })
            .collect();
        MarketCtx::from_candles(Pair::parse("BTC/USD").unwrap(), &candles).unwrap()
    }

    fn descending_ctx(len: usize) -> MarketCtx {
        let candles: Vec<Candle> = (0..len)
            .map(|i| {
                let close = Decimal::from(500 - i as i64);
                Candle {
                    timestamp: i as i64 * 60_000,
                    open: close + dec!(1),
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                    volume: dec!(5),
                }
            })
            .collect();
        MarketCtx::from_candles(Pair::parse("BTC/USD").unwrap(), &candles).unwrap()
    }

    #[test]
    fn ascending_series_triggers_one_long_entry() {
        let mut strategy = MomentumStrategy::new(&json!({})).unwrap();

        let entry = strategy.generate_signal(&ascending_ctx(40)).unwrap();
        assert_eq!(entry.action, SignalAction::Buy);
        assert!(entry.trailing_stop.is_some());

        // still trending: no second entry while the position is open
        let followup = strategy.generate_signal(&ascending_ctx(41)).unwrap();
        assert_eq!(followup.action, SignalAction::Hold);
    }

    #[test]
    fn descending_series_triggers_short_entry() {
        let mut strategy = MomentumStrategy::new(&json!({})).unwrap();
        let entry = strategy.generate_signal(&descending_ctx(40)).unwrap();
        assert_eq!(entry.action, SignalAction::Sell);
    }

    #[test]
    fn long_exits_on_trailing_stop() {
        let mut strategy = MomentumStrategy::new(&json!({"trailing_stop_pct": 0.05})).unwrap();
        strategy.generate_signal(&ascending_ctx(40)).unwrap();

        // collapse far below the watermark
        let mut candles: Vec<Candle> = (0..40)
            .map(|i| {
                let close = Decimal::from(100 + i);
                Candle {
                    timestamp: i as i64 * 60_000,
                    open: close,
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                    volume: dec!(5),
                }
            })
            .collect();
        let crash = dec!(120);
        candles.push(Candle {
            timestamp: 40 * 60_000,
            open: crash,
            high: crash,
            low: crash,
            close: crash,
            volume: dec!(5),
        });
        let ctx = MarketCtx::from_candles(Pair::parse("BTC/USD").unwrap(), &candles).unwrap();

        let exit = strategy.generate_signal(&ctx).unwrap();
        assert_eq!(exit.action, SignalAction::Sell);
        assert!(exit.reason.contains("trailing stop"));
    }

    #[test]
    fn warmup_produces_hold() {
        let mut strategy = MomentumStrategy::new(&json!({})).unwrap();
        let signal = strategy.generate_signal(&ascending_ctx(10)).unwrap();
        assert_eq!(signal.action, SignalAction::Hold);
    }
}
