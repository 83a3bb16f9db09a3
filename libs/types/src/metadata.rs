//! Durable metadata rows: ingestion jobs, data sources, gaps, backtest records.
//!
//! These mirror the relational tables owned by the metadata store. Candle data
//! itself lives in the columnar store; these rows describe it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::pair::Pair;
use crate::timeframe::Timeframe;
use crate::venue::Venue;
use crate::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "RUNNING" => Some(JobStatus::Running),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            "CANCELLED" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

/// One chunked backfill run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: Uuid,
    pub pair: Pair,
    pub timeframe: Timeframe,
    pub exchange: Venue,
    pub status: JobStatus,
    pub priority: i32,
    pub candles_fetched: u64,
    pub candles_stored: u64,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,
}

impl IngestionJob {
    pub fn new(pair: Pair, timeframe: Timeframe, exchange: Venue, priority: i32, now: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            pair,
            timeframe,
            exchange,
            status: JobStatus::Pending,
            priority,
            candles_fetched: 0,
            candles_stored: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}

/// Coverage summary for one (pair, timeframe, exchange) series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub pair: Pair,
    pub timeframe: Timeframe,
    pub exchange: Venue,
    pub earliest_date: i64,
    pub latest_date: i64,
    pub total_candles: u64,
    pub file_path: String,
    pub file_size: u64,
    pub is_complete: bool,
    pub last_updated: i64,
}

/// A detected hole in a candle series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataGap {
    pub id: Uuid,
    pub pair: Pair,
    pub timeframe: Timeframe,
    pub gap_start: i64,
    pub gap_end: i64,
    pub reason: String,
    pub is_repaired: bool,
    pub detected_at: i64,
    pub repaired_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BacktestKind {
    Run,
    Optimize,
}

impl BacktestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BacktestKind::Run => "RUN",
            BacktestKind::Optimize => "OPTIMIZE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUN" => Some(BacktestKind::Run),
            "OPTIMIZE" => Some(BacktestKind::Optimize),
            _ => None,
        }
    }
}

/// A persisted backtest or optimization run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: BacktestKind,
    pub exchange: Venue,
    pub pair: Pair,
    pub timeframe: Timeframe,
    pub strategy_type: String,
    pub strategy_params: Value,
    pub backtest_config: Value,
    pub result: Value,
    pub created_at: i64,
}
