//! Performance metrics derived from a completed replay.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::EquityPoint;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    pub total_return_pct: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// Gross wins over gross losses; `None` when there were no losses
    pub profit_factor: Option<f64>,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub duration_ms: u64,
}

/// Compute the summary from realized round-trip P&Ls and the equity curve.
/// `round_trips` holds one figure per FIFO-matched sell.
pub fn summarize(
    initial_balance: Decimal,
    final_balance: Decimal,
    total_trades: usize,
    round_trips: &[f64],
    equity: &[EquityPoint],
    duration_ms: u64,
) -> BacktestSummary {
    let initial_f = initial_balance.to_f64().unwrap_or(0.0);
    let final_f = final_balance.to_f64().unwrap_or(0.0);
    let total_return_pct = if initial_f > 0.0 {
        (final_f - initial_f) / initial_f * 100.0
    } else {
        0.0
    };

    let wins: Vec<f64> = round_trips.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = round_trips.iter().copied().filter(|p| *p < 0.0).collect();
    let gross_win: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();

    let win_rate = if round_trips.is_empty() {
        0.0
    } else {
        wins.len() as f64 / round_trips.len() as f64 * 100.0
    };
    let avg_win = if wins.is_empty() { 0.0 } else { gross_win / wins.len() as f64 };
    let avg_loss = if losses.is_empty() { 0.0 } else { gross_loss / losses.len() as f64 };
    let profit_factor = if gross_loss > 0.0 { Some(gross_win / gross_loss) } else { None };

    let (max_drawdown, max_drawdown_pct) = max_drawdown(equity);

    BacktestSummary {
        initial_balance,
        final_balance,
        total_return_pct,
        total_trades,
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        win_rate,
        avg_win,
        avg_loss,
        profit_factor,
        max_drawdown,
        max_drawdown_pct,
        sharpe_ratio: sharpe(equity),
        duration_ms,
    }
}

/// Largest decline from a running equity peak, absolute and in percent
pub fn max_drawdown(equity: &[EquityPoint]) -> (f64, f64) {
    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    let mut worst_pct = 0.0f64;
    for point in equity {
        let value = point.total_equity.to_f64().unwrap_or(0.0);
        peak = peak.max(value);
        let drawdown = peak - value;
        if drawdown > worst {
            worst = drawdown;
            worst_pct = if peak > 0.0 { drawdown / peak * 100.0 } else { 0.0 };
        }
    }
    (worst, worst_pct)
}

/// Annualized Sharpe ratio (√252) over per-step equity returns
pub fn sharpe(equity: &[EquityPoint]) -> f64 {
    if equity.len() < 2 {
        return 0.0;
    }
    let values: Vec<f64> = equity
        .iter()
        .map(|p| p.total_equity.to_f64().unwrap_or(0.0))
        .collect();
    let returns: Vec<f64> = values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.is_empty() {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let stddev = variance.sqrt();
    if stddev == 0.0 {
        return 0.0;
    }
    mean / stddev * TRADING_DAYS_PER_YEAR.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn equity(values: &[i64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| EquityPoint {
                ts: i as i64,
                balance: Decimal::from(*v),
                holdings_value: Decimal::ZERO,
                total_equity: Decimal::from(*v),
            })
            .collect()
    }

    #[test]
    fn drawdown_measures_from_running_peak() {
        let (dd, dd_pct) = max_drawdown(&equity(&[100, 120, 90, 110, 80]));
        assert!((dd - 40.0).abs() < 1e-9);
        assert!((dd_pct - (40.0 / 120.0 * 100.0)).abs() < 1e-9);
    }

    #[test]
    fn monotone_curve_has_zero_drawdown() {
        let (dd, dd_pct) = max_drawdown(&equity(&[100, 101, 105, 110]));
        assert_eq!(dd, 0.0);
        assert_eq!(dd_pct, 0.0);
    }

    #[test]
    fn sharpe_positive_for_steady_growth() {
        let curve: Vec<i64> = (0..100).map(|i| 10_000 + i * 10).collect();
        assert!(sharpe(&equity(&curve)) > 0.0);
    }

    #[test]
    fn summary_splits_wins_and_losses() {
        let eq = equity(&[10_000, 10_050, 10_030, 10_100]);
        let summary = summarize(
            dec!(10000),
            dec!(10100),
            4,
            &[50.0, -20.0, 70.0],
            &eq,
            12,
        );
        assert_eq!(summary.winning_trades, 2);
        assert_eq!(summary.losing_trades, 1);
        assert!((summary.win_rate - 2.0 / 3.0 * 100.0).abs() < 1e-9);
        assert!((summary.avg_win - 60.0).abs() < 1e-9);
        assert!((summary.avg_loss - 20.0).abs() < 1e-9);
        assert!((summary.profit_factor.unwrap() - 6.0).abs() < 1e-9);
        assert!((summary.total_return_pct - 1.0).abs() < 1e-9);
    }

    #[test]
    fn no_losses_means_no_profit_factor() {
        let summary = summarize(dec!(100), dec!(200), 1, &[100.0], &equity(&[100, 200]), 1);
        assert_eq!(summary.profit_factor, None);
        assert_eq!(summary.win_rate, 100.0);
    }
}
