//! Grid trading strategy.
//!
//! Lays `levels` price rungs symmetrically around a center price, `spacing`
//! percent apart: buys below, sells above. A price crossing a pending rung
//! fills it and opens the opposite side one rung away. When price walks far
//! enough from the center the whole grid recenters, at most once per five
//! minutes.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use vela_types::{Signal, SignalAction, StrategyKind};

use super::{decimal_param, usize_param, MarketCtx, ParamSpec, Strategy};
use crate::Result;

const REBALANCE_MIN_INTERVAL_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
struct GridLevel {
    price: Decimal,
    side: SignalAction,
    pending: bool,
}

pub struct GridStrategy {
    levels: usize,
    spacing_pct: Decimal,
    amount_per_level: Decimal,
    /// Fraction of the half-grid span that triggers a recenter
    rebalance_threshold: Decimal,
    center: Option<Decimal>,
    rungs: Vec<GridLevel>,
    last_rebalance_ts: i64,
}

impl GridStrategy {
    pub fn new(params: &Value) -> Result<Self> {
        let levels = usize_param(params, "levels", 10)?;
        Ok(Self {
            levels: levels.max(2),
            spacing_pct: decimal_param(params, "spacing_pct", dec!(0.01))?,
            amount_per_level: decimal_param(params, "amount_per_level", dec!(0.05))?,
            rebalance_threshold: decimal_param(params, "rebalance_threshold", dec!(0.8))?,
            center: params
                .get("center_price")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            rungs: Vec::new(),
            last_rebalance_ts: 0,
        })
    }

    pub fn param_schema() -> Vec<ParamSpec> {
        vec![
            ParamSpec {
                name: "levels",
                default: json!(10),
                grid: vec![json!(6), json!(10), json!(16)],
            },
            ParamSpec {
                name: "spacing_pct",
                default: json!(0.01),
                grid: vec![json!(0.005), json!(0.01), json!(0.02)],
            },
            ParamSpec {
                name: "amount_per_level",
                default: json!(0.05),
                grid: vec![json!(0.02), json!(0.05), json!(0.1)],
            },
        ]
    }

    fn build_grid(&mut self, center: Decimal, now: i64) {
        self.center = Some(center);
        self.last_rebalance_ts = now;
        self.rungs.clear();
        let half = (self.levels / 2) as i64;
        for step in 1..=half {
            let offset = self.spacing_pct * Decimal::from(step);
            self.rungs.push(GridLevel {
                price: center * (Decimal::ONE - offset),
                side: SignalAction::Buy,
                pending: true,
            });
            self.rungs.push(GridLevel {
                price: center * (Decimal::ONE + offset),
                side: SignalAction::Sell,
                pending: true,
            });
        }
        self.rungs.sort_by(|a, b| a.price.cmp(&b.price));
    }

    /// Half the price span the grid covers
    fn half_range(&self, center: Decimal) -> Decimal {
        center * self.spacing_pct * Decimal::from(self.levels / 2)
    }

    fn should_rebalance(&self, price: Decimal, center: Decimal, now: i64) -> bool {
        let drift = (price - center).abs();
        drift >= self.rebalance_threshold * self.half_range(center)
            && now - self.last_rebalance_ts >= REBALANCE_MIN_INTERVAL_MS
    }

    /// First pending rung the price has crossed, if any
    fn crossed_rung(&mut self, price: Decimal) -> Option<usize> {
        self.rungs.iter().position(|rung| {
            rung.pending
                && match rung.side {
                    SignalAction::Buy => price <= rung.price,
                    SignalAction::Sell => price >= rung.price,
                    SignalAction::Hold => false,
                }
        })
    }

    /// Fill rung `idx` and arm the opposite side one spacing step away
    fn fill_rung(&mut self, idx: usize) -> GridLevel {
        let rung = self.rungs[idx];
        self.rungs[idx].pending = false;

        let (opposite_side, opposite_price) = match rung.side {
            SignalAction::Buy => (SignalAction::Sell, rung.price * (Decimal::ONE + self.spacing_pct)),
            _ => (SignalAction::Buy, rung.price * (Decimal::ONE - self.spacing_pct)),
        };

        // Re-arm an existing rung at that price if present, else add one.
        let near = self
            .rungs
            .iter_mut()
            .find(|r| r.side == opposite_side && close_to(r.price, opposite_price));
        match near {
            Some(existing) => existing.pending = true,
            None => {
                self.rungs.push(GridLevel {
                    price: opposite_price,
                    side: opposite_side,
                    pending: true,
                });
                self.rungs.sort_by(|a, b| a.price.cmp(&b.price));
            }
        }
        rung
    }
}

/// Within a tenth of a percent
fn close_to(a: Decimal, b: Decimal) -> bool {
    if b == Decimal::ZERO {
        return a == b;
    }
    ((a - b) / b).abs() < dec!(0.001)
}

impl Strategy for GridStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Grid
    }

    fn generate_signal(&mut self, ctx: &MarketCtx) -> Result<Signal> {
        let price = ctx.price;
        let now = ctx.timestamp;

        let center = match self.center {
            Some(center) => center,
            None => {
                self.build_grid(price, now);
                return Ok(Signal::hold(price, "grid initialized"));
            }
        };
        if self.rungs.is_empty() {
            self.build_grid(center, now);
        }

        if self.should_rebalance(price, center, now) {
            self.build_grid(price, now);
            return Ok(Signal::hold(price, "grid recentered"));
        }

        if let Some(idx) = self.crossed_rung(price) {
            let rung = self.fill_rung(idx);
            return Ok(Signal {
                action: rung.side,
                confidence: dec!(0.6),
                price: rung.price,
                amount: self.amount_per_level,
                reason: format!("grid rung {} at {}", rung.side.as_str(), rung.price),
                stop_loss: None,
                take_profit: None,
                trailing_stop: None,
            });
        }

        Ok(Signal::hold(price, "between rungs"))
    }

    fn update_params(&mut self, params: &Value) -> Result<()> {
        let levels = usize_param(params, "levels", self.levels)?;
        let spacing = decimal_param(params, "spacing_pct", self.spacing_pct)?;
        let rebuilt = levels != self.levels || spacing != self.spacing_pct;
        self.levels = levels.max(2);
        self.spacing_pct = spacing;
        self.amount_per_level = decimal_param(params, "amount_per_level", self.amount_per_level)?;
        self.rebalance_threshold =
            decimal_param(params, "rebalance_threshold", self.rebalance_threshold)?;
        if rebuilt {
            // Geometry changed: rebuild around the current center on next tick.
            self.rungs.clear();
        }
        Ok(())
    }

    fn config(&self) -> Value {
        json!({
            "levels": self.levels,
            "spacing_pct": self.spacing_pct,
            "amount_per_level": self.amount_per_level,
            "rebalance_threshold": self.rebalance_threshold,
            "center_price": self.center,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_types::Pair;

    fn ctx_at(price: Decimal, ts: i64) -> MarketCtx {
        let mut ctx = MarketCtx::synthetic(
            Pair::parse("BTC/USD").unwrap(),
            price,
            Default::default(),
        );
        ctx.timestamp = ts;
        ctx
    }

    #[test]
    fn first_tick_builds_symmetric_grid() {
        let mut grid = GridStrategy::new(&json!({"levels": 6, "spacing_pct": 0.01})).unwrap();
        let signal = grid.generate_signal(&ctx_at(dec!(100), 0)).unwrap();
        assert_eq!(signal.action, SignalAction::Hold);

        let buys = grid.rungs.iter().filter(|r| r.side == SignalAction::Buy).count();
        let sells = grid.rungs.iter().filter(|r| r.side == SignalAction::Sell).count();
        assert_eq!(buys, 3);
        assert_eq!(sells, 3);
        assert!(grid.rungs.iter().filter(|r| r.side == SignalAction::Buy).all(|r| r.price < dec!(100)));
        assert!(grid.rungs.iter().filter(|r| r.side == SignalAction::Sell).all(|r| r.price > dec!(100)));
    }

    #[test]
    fn falling_price_fills_buy_rung_and_arms_sell() {
        let mut grid = GridStrategy::new(&json!({"levels": 6, "spacing_pct": 0.01})).unwrap();
        grid.generate_signal(&ctx_at(dec!(100), 0)).unwrap();

        // drop through the first buy rung at 99
        let signal = grid.generate_signal(&ctx_at(dec!(98.9), 1000)).unwrap();
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.price, dec!(99.00));

        // that rung is now consumed; a sell is armed one spacing above it
        let armed_sell = grid
            .rungs
            .iter()
            .any(|r| r.side == SignalAction::Sell && r.pending && close_to(r.price, dec!(99.99)));
        assert!(armed_sell);
    }

    #[test]
    fn bounce_after_fill_trades_the_opposite_rung() {
        let mut grid = GridStrategy::new(&json!({"levels": 6, "spacing_pct": 0.01})).unwrap();
        grid.generate_signal(&ctx_at(dec!(100), 0)).unwrap();
        grid.generate_signal(&ctx_at(dec!(98.9), 1000)).unwrap();

        // price pops back up through the newly armed sell at ~99.99
        let signal = grid.generate_signal(&ctx_at(dec!(100.0), 2000)).unwrap();
        assert_eq!(signal.action, SignalAction::Sell);
    }

    #[test]
    fn rebalance_waits_out_the_minimum_interval() {
        let mut grid = GridStrategy::new(
            &json!({"levels": 6, "spacing_pct": 0.01, "rebalance_threshold": 0.5}),
        )
        .unwrap();
        grid.generate_signal(&ctx_at(dec!(100), 0)).unwrap();

        // enormous drift, but too soon after grid construction
        let early = grid.generate_signal(&ctx_at(dec!(140), 60_000)).unwrap();
        assert_ne!(early.reason, "grid recentered");

        let late = grid
            .generate_signal(&ctx_at(dec!(140), REBALANCE_MIN_INTERVAL_MS + 1))
            .unwrap();
        assert_eq!(late.reason, "grid recentered");
        assert_eq!(grid.center, Some(dec!(140)));
    }
}
