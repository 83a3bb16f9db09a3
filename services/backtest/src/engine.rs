//! Deterministic candle replay.
//!
//! Each step builds the same market context live strategies see (prior-window
//! indicators included), asks the strategy for a signal, executes it against
//! the step's close with slippage and fees, and records equity. Insufficient
//! balance or holdings silently skips the action (logged); at end of run all
//! holdings are force-closed at the final close.

use std::collections::VecDeque;
use std::time::Instant;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vela_trading::strategy::indicators::returns_stddev;
use vela_trading::{MarketCtx, Strategy};
use vela_types::{Candle, OrderSide, Pair, Signal, SignalAction};

use crate::config::BacktestConfig;
use crate::metrics::{summarize, BacktestSummary};
use crate::{BacktestError, Result};

/// Minimum candles before a replay is meaningful
const MIN_CANDLES: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedTrade {
    pub side: OrderSide,
    pub amount: Decimal,
    /// Execution price after slippage
    pub price: Decimal,
    pub fee: Decimal,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: i64,
    pub balance: Decimal,
    pub holdings_value: Decimal,
    pub total_equity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawdownPoint {
    pub ts: i64,
    pub drawdown: Decimal,
    pub drawdown_pct: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub ts: i64,
    pub signal: Signal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub summary: BacktestSummary,
    pub trades: Vec<ExecutedTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub signals: Vec<SignalRecord>,
    pub drawdowns: Vec<DrawdownPoint>,
}

pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    /// Replay `candles` (oldest first) through `strategy`
    pub fn run(
        &self,
        strategy: &mut dyn Strategy,
        pair: &Pair,
        candles: &[Candle],
    ) -> Result<BacktestReport> {
        if candles.len() < MIN_CANDLES {
            return Err(BacktestError::InsufficientData {
                have: candles.len(),
                need: MIN_CANDLES,
            });
        }
        let started = Instant::now();

        let mut state = ReplayState::new(self.config.initial_balance);
        let window = self.config.context_window.max(MIN_CANDLES);

        for i in 0..candles.len() {
            let start = (i + 1).saturating_sub(window);
            let slice = &candles[start..=i];
            let Some(ctx) = MarketCtx::from_candles(pair.clone(), slice) else {
                continue;
            };
            let candle = &candles[i];

            let signal = strategy.generate_signal(&ctx)?;
            if signal.is_actionable() {
                state.signals.push(SignalRecord { ts: candle.timestamp, signal: signal.clone() });
                self.execute(&mut state, &signal, candle, slice);
            }

            state.mark(candle.timestamp, candle.close);
        }

        // Force-close whatever is still held at the final close.
        let last = candles.last().expect("len checked");
        if state.holdings > Decimal::ZERO {
            let amount = state.holdings;
            self.fill(&mut state, OrderSide::Sell, amount, last.close, last.timestamp);
            state.mark(last.timestamp, last.close);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let summary = summarize(
            self.config.initial_balance,
            state.balance,
            state.trades.len(),
            &state.round_trips,
            &state.equity,
            duration_ms,
        );

        Ok(BacktestReport {
            summary,
            trades: state.trades,
            equity_curve: state.equity,
            signals: state.signals,
            drawdowns: state.drawdowns,
        })
    }

    fn execute(&self, state: &mut ReplayState, signal: &Signal, candle: &Candle, window: &[Candle]) {
        let side = match signal.action {
            SignalAction::Buy => OrderSide::Buy,
            SignalAction::Sell => OrderSide::Sell,
            SignalAction::Hold => return,
        };

        let closes: Vec<Decimal> = window.iter().map(|c| c.close).collect();
        let volatility = returns_stddev(&closes).unwrap_or(Decimal::ZERO);
        let exec = self.config.slippage.apply(side, candle.close, volatility);
        if exec <= Decimal::ZERO {
            return;
        }

        // Amounts in (0, 1] are a fraction of the current balance.
        let amount = if signal.amount > Decimal::ZERO && signal.amount <= Decimal::ONE {
            state.balance * signal.amount / exec
        } else {
            signal.amount
        };
        if amount <= Decimal::ZERO {
            return;
        }

        match side {
            OrderSide::Buy => {
                let cost = amount * exec;
                let fee = cost * self.config.taker_fee;
                if cost + fee > state.balance {
                    debug!(ts = candle.timestamp, "buy skipped: insufficient balance");
                    return;
                }
            }
            OrderSide::Sell => {
                if amount > state.holdings {
                    debug!(ts = candle.timestamp, "sell skipped: insufficient holdings");
                    return;
                }
            }
        }
        self.fill(state, side, amount, exec, candle.timestamp);
    }

    fn fill(&self, state: &mut ReplayState, side: OrderSide, amount: Decimal, price: Decimal, ts: i64) {
        let value = amount * price;
        let fee = value * self.config.taker_fee;
        match side {
            OrderSide::Buy => {
                state.balance -= value + fee;
                state.holdings += amount;
                state.open_buys.push_back((amount, price));
            }
            OrderSide::Sell => {
                state.balance += value - fee;
                state.holdings -= amount;
                let realized = state.match_fifo(amount, price);
                state.round_trips.push(realized);
            }
        }
        state.trades.push(ExecutedTrade { side, amount, price, fee, ts });
    }
}

struct ReplayState {
    balance: Decimal,
    holdings: Decimal,
    /// FIFO queue of unmatched buys, as (amount, price)
    open_buys: VecDeque<(Decimal, Decimal)>,
    /// Realized P&L per matched sell
    round_trips: Vec<f64>,
    trades: Vec<ExecutedTrade>,
    equity: Vec<EquityPoint>,
    drawdowns: Vec<DrawdownPoint>,
    signals: Vec<SignalRecord>,
    peak_equity: Decimal,
}

impl ReplayState {
    fn new(initial_balance: Decimal) -> Self {
        Self {
            balance: initial_balance,
            holdings: Decimal::ZERO,
            open_buys: VecDeque::new(),
            round_trips: Vec::new(),
            trades: Vec::new(),
            equity: Vec::new(),
            drawdowns: Vec::new(),
            signals: Vec::new(),
            peak_equity: initial_balance,
        }
    }

    /// Match a sell against prior unmatched buys, oldest first, and return
    /// `(exit − entry) · amount` summed over the matched chunks.
    fn match_fifo(&mut self, mut amount: Decimal, exit_price: Decimal) -> f64 {
        let mut pnl = Decimal::ZERO;
        while amount > Decimal::ZERO {
            let Some((open_amount, entry_price)) = self.open_buys.front_mut() else {
                break;
            };
            let matched = amount.min(*open_amount);
            pnl += (exit_price - *entry_price) * matched;
            *open_amount -= matched;
            amount -= matched;
            if *open_amount <= Decimal::ZERO {
                self.open_buys.pop_front();
            }
        }
        pnl.to_f64().unwrap_or(0.0)
    }

    /// Record equity and the drawdown series point for this step
    fn mark(&mut self, ts: i64, close: Decimal) {
        let holdings_value = self.holdings * close;
        let total_equity = self.balance + holdings_value;
        self.equity.push(EquityPoint { ts, balance: self.balance, holdings_value, total_equity });

        self.peak_equity = self.peak_equity.max(total_equity);
        let drawdown = self.peak_equity - total_equity;
        let drawdown_pct = if self.peak_equity > Decimal::ZERO {
            drawdown / self.peak_equity * Decimal::from(100)
        } else {
            Decimal::ZERO
        };
        self.drawdowns.push(DrawdownPoint { ts, drawdown, drawdown_pct });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use vela_trading::strategy::StrategyFactory;
    use vela_types::StrategyKind;

    fn candle(ts: i64, close: Decimal) -> Candle {
        Candle {
            timestamp: ts,
            open: close,
            high: close + dec!(0.5),
            low: close - dec!(0.5),
            close,
            volume: dec!(10),
        }
    }

    fn ascending(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| candle(i as i64 * 3_600_000, dec!(100) + Decimal::from(i)))
            .collect()
    }

    #[test]
    fn refuses_empty_series() {
        let engine = BacktestEngine::new(BacktestConfig::default());
        let mut strategy = StrategyFactory::build(StrategyKind::Momentum, &json!({})).unwrap();
        let pair = Pair::parse("BTC/USD").unwrap();
        assert!(matches!(
            engine.run(strategy.as_mut(), &pair, &[]),
            Err(BacktestError::InsufficientData { .. })
        ));
    }

    #[test]
    fn fees_reduce_balance_on_both_sides() {
        // Scripted strategy: buy once, then hold until forced close.
        struct BuyOnce {
            bought: bool,
        }
        impl Strategy for BuyOnce {
            fn kind(&self) -> StrategyKind {
                StrategyKind::Momentum
            }
            fn generate_signal(&mut self, ctx: &MarketCtx) -> vela_trading::Result<Signal> {
                if self.bought {
                    return Ok(Signal::hold(ctx.price, "done"));
                }
                self.bought = true;
                Ok(Signal {
                    action: SignalAction::Buy,
                    confidence: dec!(1),
                    price: ctx.price,
                    amount: dec!(0.5), // half the balance
                    reason: "scripted".into(),
                    stop_loss: None,
                    take_profit: None,
                    trailing_stop: None,
                })
            }
            fn update_params(&mut self, _: &serde_json::Value) -> vela_trading::Result<()> {
                Ok(())
            }
            fn config(&self) -> serde_json::Value {
                json!({})
            }
        }

        let engine = BacktestEngine::new(BacktestConfig::default());
        let pair = Pair::parse("BTC/USD").unwrap();
        // flat prices: only fees move the balance
        let candles: Vec<Candle> = (0..5).map(|i| candle(i, dec!(100))).collect();
        let report = engine
            .run(&mut BuyOnce { bought: false }, &pair, &candles)
            .unwrap();

        assert_eq!(report.trades.len(), 2); // entry + forced close
        assert!(report.summary.final_balance < dec!(10000));
        assert!(report.summary.total_return_pct < 0.0);
    }

    #[test]
    fn momentum_on_linear_ascent_wins_once() {
        // 60 candles strictly ascending 100 → 160 (spec scenario)
        let candles: Vec<Candle> = (0..60)
            .map(|i| candle(i as i64 * 3_600_000, dec!(100) + Decimal::from(i)))
            .collect();
        // fee-free run: the entry and the forced close must not dent equity
        let engine = BacktestEngine::new(BacktestConfig {
            maker_fee: Decimal::ZERO,
            taker_fee: Decimal::ZERO,
            ..Default::default()
        });
        let mut strategy = StrategyFactory::build(StrategyKind::Momentum, &json!({})).unwrap();
        let pair = Pair::parse("BTC/USD").unwrap();

        let report = engine.run(strategy.as_mut(), &pair, &candles).unwrap();

        // one entry plus the forced close at the last candle
        let buys = report.trades.iter().filter(|t| t.side == OrderSide::Buy).count();
        let sells = report.trades.iter().filter(|t| t.side == OrderSide::Sell).count();
        assert_eq!(buys, 1);
        assert_eq!(sells, 1);
        assert_eq!(report.trades[1].ts, candles.last().unwrap().timestamp);

        assert!(report.summary.total_return_pct > 0.0);
        assert_eq!(report.summary.win_rate, 100.0);
        assert_eq!(report.summary.max_drawdown_pct, 0.0);
    }

    #[test]
    fn identical_inputs_replay_identically() {
        let candles = ascending(80);
        let engine = BacktestEngine::new(BacktestConfig {
            slippage: crate::SlippageModel::Fixed { bps: 5 },
            ..Default::default()
        });
        let pair = Pair::parse("BTC/USD").unwrap();

        let mut a = StrategyFactory::build(StrategyKind::Momentum, &json!({})).unwrap();
        let mut b = StrategyFactory::build(StrategyKind::Momentum, &json!({})).unwrap();
        let first = engine.run(a.as_mut(), &pair, &candles).unwrap();
        let second = engine.run(b.as_mut(), &pair, &candles).unwrap();

        assert_eq!(first.trades, second.trades);
        assert_eq!(first.equity_curve, second.equity_curve);
        assert_eq!(first.signals, second.signals);
        assert_eq!(first.summary.final_balance, second.summary.final_balance);
        assert_eq!(first.summary.sharpe_ratio, second.summary.sharpe_ratio);
    }

    #[test]
    fn oversold_sell_is_skipped_silently() {
        struct SellFirst;
        impl Strategy for SellFirst {
            fn kind(&self) -> StrategyKind {
                StrategyKind::Grid
            }
            fn generate_signal(&mut self, ctx: &MarketCtx) -> vela_trading::Result<Signal> {
                Ok(Signal {
                    action: SignalAction::Sell,
                    confidence: dec!(1),
                    price: ctx.price,
                    amount: dec!(5),
                    reason: "scripted".into(),
                    stop_loss: None,
                    take_profit: None,
                    trailing_stop: None,
                })
            }
            fn update_params(&mut self, _: &serde_json::Value) -> vela_trading::Result<()> {
                Ok(())
            }
            fn config(&self) -> serde_json::Value {
                json!({})
            }
        }

        let engine = BacktestEngine::new(BacktestConfig::default());
        let pair = Pair::parse("BTC/USD").unwrap();
        let report = engine.run(&mut SellFirst, &pair, &ascending(10)).unwrap();
        assert!(report.trades.is_empty());
        assert_eq!(report.summary.final_balance, dec!(10000));
    }
}
