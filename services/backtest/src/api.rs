//! Service facade the transport layer calls. Plain request/response structs;
//! HTTP, auth and sessions live elsewhere.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use vela_storage::{BacktestFilter, BacktestPage, CandleStore, MetadataStore};
use vela_trading::strategy::StrategyFactory;
use vela_types::{BacktestKind, BacktestRecord, Pair, StrategyKind, Timeframe, UserId, Venue};

use crate::config::BacktestConfig;
use crate::engine::{BacktestEngine, BacktestReport};
use crate::optimizer::{OptimizationReport, OptimizerConfig, WalkForwardOptimizer};
use crate::{BacktestError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub user_id: UserId,
    pub exchange: Venue,
    pub pair: Pair,
    pub timeframe: Timeframe,
    pub strategy_type: StrategyKind,
    #[serde(default)]
    pub strategy_params: Value,
    #[serde(default)]
    pub config: BacktestConfig,
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub user_id: UserId,
    pub exchange: Venue,
    pub pair: Pair,
    pub timeframe: Timeframe,
    pub strategy_type: StrategyKind,
    /// Explicit grid; when empty the strategy's declared schema grid is used
    #[serde(default)]
    pub param_grid: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    pub config: BacktestConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    pub from: i64,
    pub to: i64,
}

/// Runs backtests/optimizations over stored candles and persists the results
pub struct BacktestService {
    store: Arc<CandleStore>,
    metadata: Arc<MetadataStore>,
}

impl BacktestService {
    pub fn new(store: Arc<CandleStore>, metadata: Arc<MetadataStore>) -> Self {
        Self { store, metadata }
    }

    pub fn run(&self, request: RunRequest) -> Result<(Uuid, BacktestReport)> {
        let candles =
            self.store
                .read_range(&request.pair, request.timeframe, request.from, request.to)?;
        let engine = BacktestEngine::new(request.config.clone());
        let mut strategy =
            StrategyFactory::build(request.strategy_type, &request.strategy_params)?;
        let report = engine.run(strategy.as_mut(), &request.pair, &candles)?;

        let id = self.persist(
            &request.user_id,
            BacktestKind::Run,
            request.exchange,
            &request.pair,
            request.timeframe,
            request.strategy_type,
            request.strategy_params.clone(),
            serde_json::to_value(&request.config)?,
            serde_json::to_value(&report)?,
        )?;
        info!(backtest = %id, user = %request.user_id, candles = candles.len(), "backtest stored");
        Ok((id, report))
    }

    pub fn optimize(&self, request: OptimizeRequest) -> Result<(Uuid, OptimizationReport)> {
        let candles =
            self.store
                .read_range(&request.pair, request.timeframe, request.from, request.to)?;

        let grid = if request.param_grid.is_empty() {
            declared_grid(request.strategy_type)
        } else {
            request.param_grid.clone()
        };

        let optimizer =
            WalkForwardOptimizer::new(request.config.clone(), request.optimizer.clone());
        let report =
            optimizer.optimize(request.strategy_type, &request.pair, &candles, &grid)?;

        let id = self.persist(
            &request.user_id,
            BacktestKind::Optimize,
            request.exchange,
            &request.pair,
            request.timeframe,
            request.strategy_type,
            json!(grid),
            serde_json::to_value(&request.optimizer)?,
            serde_json::to_value(&report)?,
        )?;
        info!(optimization = %id, user = %request.user_id, "optimization stored");
        Ok((id, report))
    }

    pub fn history(&self, user_id: &UserId, filter: &BacktestFilter) -> Result<BacktestPage> {
        Ok(self.metadata.list_backtests(user_id, filter)?)
    }

    pub fn get(&self, id: Uuid, user_id: &UserId) -> Result<BacktestRecord> {
        self.metadata
            .get_backtest(id, user_id)?
            .ok_or_else(|| BacktestError::NotFound { entity: "backtest", key: id.to_string() })
    }

    #[allow(clippy::too_many_arguments)]
    fn persist(
        &self,
        user_id: &UserId,
        kind: BacktestKind,
        exchange: Venue,
        pair: &Pair,
        timeframe: Timeframe,
        strategy_type: StrategyKind,
        strategy_params: Value,
        backtest_config: Value,
        result: Value,
    ) -> Result<Uuid> {
        let record = BacktestRecord {
            id: Uuid::new_v4(),
            user_id: user_id.clone(),
            kind,
            exchange,
            pair: pair.clone(),
            timeframe,
            strategy_type: strategy_type.as_str().to_string(),
            strategy_params,
            backtest_config,
            result,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        self.metadata.insert_backtest(&record)?;
        Ok(record.id)
    }
}

/// Grid declared by the strategy's parameter schema
fn declared_grid(kind: StrategyKind) -> BTreeMap<String, Vec<Value>> {
    StrategyFactory::param_schema(kind)
        .into_iter()
        .map(|spec| (spec.name.to_string(), spec.grid))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_grids_are_nonempty() {
        for kind in [StrategyKind::MeanReversion, StrategyKind::Momentum, StrategyKind::Grid] {
            let grid = declared_grid(kind);
            assert!(!grid.is_empty(), "{kind:?} has no grid");
            assert!(grid.values().all(|v| !v.is_empty()));
        }
    }
}
