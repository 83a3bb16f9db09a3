//! Walk-forward parameter optimization.
//!
//! Splits use a fixed train window advancing by the test size, so train
//! windows overlap across splits; that mirrors how the platform has always
//! scored parameters and is intentional. Within each split every grid
//! combination is scored on the train window and the winner is confirmed on
//! the unseen test window.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use vela_trading::strategy::StrategyFactory;
use vela_types::{Candle, Pair, StrategyKind};

use crate::config::BacktestConfig;
use crate::engine::BacktestEngine;
use crate::metrics::BacktestSummary;
use crate::{BacktestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    SharpeRatio,
    TotalReturn,
    ProfitFactor,
    WinRate,
    CalmarRatio,
    Composite,
}

impl Metric {
    /// Score a summary. Higher is better for every metric.
    pub fn score(&self, summary: &BacktestSummary) -> f64 {
        match self {
            Metric::SharpeRatio => summary.sharpe_ratio,
            Metric::TotalReturn => summary.total_return_pct,
            Metric::ProfitFactor => profit_factor_score(summary),
            Metric::WinRate => summary.win_rate,
            Metric::CalmarRatio => {
                if summary.max_drawdown_pct > 0.0 {
                    summary.total_return_pct / summary.max_drawdown_pct
                } else {
                    summary.total_return_pct
                }
            }
            Metric::Composite => {
                0.3 * summary.sharpe_ratio
                    + 0.25 * summary.total_return_pct
                    + 0.2 * profit_factor_score(summary)
                    + 0.15 * summary.win_rate
                    - 0.1 * summary.max_drawdown_pct
            }
        }
    }
}

/// A lossless profit factor bridge: no losses scores as the gross win total
fn profit_factor_score(summary: &BacktestSummary) -> f64 {
    summary
        .profit_factor
        .unwrap_or(summary.avg_win * summary.winning_trades as f64)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub train_ratio: f64,
    pub n_splits: usize,
    pub metric: Metric,
    /// Combinations with fewer train trades are discarded (relaxed to 1 for
    /// short series or single-combination grids)
    pub min_trades: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            train_ratio: 0.7,
            n_splits: 3,
            metric: Metric::SharpeRatio,
            min_trades: 10,
        }
    }
}

/// Index geometry of one walk-forward split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIndices {
    pub train_start: usize,
    pub train_end: usize,
    pub test_start: usize,
    pub test_end: usize,
}

/// One scored grid combination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinationScore {
    pub params: Value,
    pub score: f64,
    pub trades: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitResult {
    pub indices: SplitIndices,
    pub best_params: Value,
    pub train_score: f64,
    pub test_score: f64,
    pub test_trades: usize,
    pub all_results: Vec<CombinationScore>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub splits: Vec<SplitResult>,
    pub mean_train_score: f64,
    pub std_train_score: f64,
    pub mean_test_score: f64,
    pub std_test_score: f64,
    pub min_test_score: f64,
    pub max_test_score: f64,
    /// `max(0, 1 − σ/μ)` over test scores, when the mean is positive
    pub consistency: Option<f64>,
    pub recommendations: Vec<String>,
}

pub struct WalkForwardOptimizer {
    backtest_config: BacktestConfig,
    config: OptimizerConfig,
}

impl WalkForwardOptimizer {
    pub fn new(backtest_config: BacktestConfig, config: OptimizerConfig) -> Self {
        Self { backtest_config, config }
    }

    /// Split geometry for a series of length `n`:
    /// `split = ⌊n/S⌋`, `train = ⌊split·ratio⌋`, `test = split − train`,
    /// split `i` starting at `i · test`.
    pub fn split_indices(&self, n: usize) -> Vec<SplitIndices> {
        let split_size = n / self.config.n_splits;
        let train_size = (split_size as f64 * self.config.train_ratio) as usize;
        let test_size = split_size - train_size;
        if train_size == 0 || test_size == 0 {
            return Vec::new();
        }
        (0..self.config.n_splits)
            .map(|i| {
                let start = i * test_size;
                SplitIndices {
                    train_start: start,
                    train_end: start + train_size,
                    test_start: start + train_size,
                    test_end: start + train_size + test_size,
                }
            })
            .filter(|s| s.test_end <= n)
            .collect()
    }

    /// Grid-search `param_grid` over walk-forward splits of `candles`
    pub fn optimize(
        &self,
        kind: StrategyKind,
        pair: &Pair,
        candles: &[Candle],
        param_grid: &BTreeMap<String, Vec<Value>>,
    ) -> Result<OptimizationReport> {
        if param_grid.is_empty() || param_grid.values().all(Vec::is_empty) {
            return Err(BacktestError::EmptyGrid);
        }
        let combinations = cartesian(param_grid);
        let splits = self.split_indices(candles.len());
        if splits.is_empty() {
            return Err(BacktestError::InsufficientData {
                have: candles.len(),
                need: self.config.n_splits * 2,
            });
        }

        // Short series and degenerate grids keep every combination.
        let min_trades = if candles.len() < 100 || combinations.len() == 1 {
            1
        } else {
            self.config.min_trades
        };

        let engine = BacktestEngine::new(self.backtest_config.clone());
        let mut split_results = Vec::with_capacity(splits.len());

        for (split_idx, indices) in splits.iter().enumerate() {
            let train = &candles[indices.train_start..indices.train_end];
            let test = &candles[indices.test_start..indices.test_end];

            let mut all_results = Vec::with_capacity(combinations.len());
            for params in &combinations {
                let mut strategy = StrategyFactory::build(kind, params)?;
                let report = engine.run(strategy.as_mut(), pair, train)?;
                all_results.push(CombinationScore {
                    params: params.clone(),
                    score: self.config.metric.score(&report.summary),
                    trades: report.summary.total_trades,
                });
            }

            let best = all_results
                .iter()
                .filter(|c| c.trades >= min_trades)
                .max_by(|a, b| a.score.total_cmp(&b.score))
                // Everything filtered out: fall back to the raw argmax.
                .or_else(|| all_results.iter().max_by(|a, b| a.score.total_cmp(&b.score)))
                .expect("non-empty grid")
                .clone();

            let mut confirm = StrategyFactory::build(kind, &best.params)?;
            let test_report = engine.run(confirm.as_mut(), pair, test)?;
            let test_score = self.config.metric.score(&test_report.summary);

            debug!(
                split = split_idx,
                train_score = best.score,
                test_score,
                "walk-forward split scored"
            );
            split_results.push(SplitResult {
                indices: *indices,
                best_params: best.params.clone(),
                train_score: best.score,
                test_score,
                test_trades: test_report.summary.total_trades,
                all_results,
            });
        }

        let report = self.aggregate(split_results);
        info!(
            splits = report.splits.len(),
            mean_test = report.mean_test_score,
            "optimization finished"
        );
        Ok(report)
    }

    fn aggregate(&self, splits: Vec<SplitResult>) -> OptimizationReport {
        let train: Vec<f64> = splits.iter().map(|s| s.train_score).collect();
        let test: Vec<f64> = splits.iter().map(|s| s.test_score).collect();
        let (mean_train, std_train) = mean_std(&train);
        let (mean_test, std_test) = mean_std(&test);
        let min_test = test.iter().copied().fold(f64::INFINITY, f64::min);
        let max_test = test.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let consistency = if mean_test > 0.0 {
            Some((1.0 - std_test / mean_test).max(0.0))
        } else {
            None
        };

        let mut recommendations = Vec::new();
        if mean_train > 1.5 * mean_test {
            recommendations.push(
                "train scores well above test scores: parameters look overfit".to_string(),
            );
        }
        if let Some(c) = consistency {
            if c < 0.5 {
                recommendations
                    .push("test scores vary widely across splits: low consistency".to_string());
            }
        }
        let avg_test_trades =
            splits.iter().map(|s| s.test_trades).sum::<usize>() as f64 / splits.len().max(1) as f64;
        if avg_test_trades < self.config.min_trades as f64 {
            recommendations.push(format!(
                "average of {avg_test_trades:.1} test trades is below the {} minimum: results are thin",
                self.config.min_trades
            ));
        }

        OptimizationReport {
            splits,
            mean_train_score: mean_train,
            std_train_score: std_train,
            mean_test_score: mean_test,
            std_test_score: std_test,
            min_test_score: min_test,
            max_test_score: max_test,
            consistency,
            recommendations,
        }
    }
}

/// Cartesian product of the grid, as parameter objects in stable key order
fn cartesian(grid: &BTreeMap<String, Vec<Value>>) -> Vec<Value> {
    let mut combinations = vec![json!({})];
    for (key, values) in grid {
        if values.is_empty() {
            continue;
        }
        let mut next = Vec::with_capacity(combinations.len() * values.len());
        for base in &combinations {
            for value in values {
                let mut combined = base.clone();
                combined[key] = value.clone();
                next.push(combined);
            }
        }
        combinations = next;
    }
    combinations
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, variance.sqrt())
}
