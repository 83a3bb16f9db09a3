//! Relational metadata store: ingestion jobs, data sources, gaps and
//! backtest records.
//!
//! Backed by embedded SQLite in WAL mode. All writes are idempotent upserts
//! keyed by id or by the (pair, timeframe, exchange) composite.

use std::path::Path;
use std::str::FromStr;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use vela_types::{
    BacktestKind, BacktestRecord, DataGap, DataSource, IngestionJob, JobStatus, Pair, Timeframe,
    UserId, Venue,
};

use crate::{Result, StorageError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ingestion_job (
    id              TEXT PRIMARY KEY,
    pair            TEXT NOT NULL,
    timeframe       TEXT NOT NULL,
    exchange        TEXT NOT NULL,
    status          TEXT NOT NULL,
    priority        INTEGER NOT NULL DEFAULT 1,
    candles_fetched INTEGER NOT NULL DEFAULT 0,
    candles_stored  INTEGER NOT NULL DEFAULT 0,
    created_at      INTEGER NOT NULL,
    started_at      INTEGER,
    completed_at    INTEGER,
    error_message   TEXT
);
CREATE TABLE IF NOT EXISTS data_source (
    pair          TEXT NOT NULL,
    timeframe     TEXT NOT NULL,
    exchange      TEXT NOT NULL,
    earliest_date INTEGER NOT NULL,
    latest_date   INTEGER NOT NULL,
    total_candles INTEGER NOT NULL,
    file_path     TEXT NOT NULL,
    file_size     INTEGER NOT NULL,
    is_complete   INTEGER NOT NULL DEFAULT 0,
    last_updated  INTEGER NOT NULL,
    PRIMARY KEY (pair, timeframe, exchange)
);
CREATE TABLE IF NOT EXISTS data_gap (
    id          TEXT PRIMARY KEY,
    pair        TEXT NOT NULL,
    timeframe   TEXT NOT NULL,
    gap_start   INTEGER NOT NULL,
    gap_end     INTEGER NOT NULL,
    reason      TEXT NOT NULL,
    is_repaired INTEGER NOT NULL DEFAULT 0,
    detected_at INTEGER NOT NULL,
    repaired_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_gap_series ON data_gap (pair, timeframe, is_repaired);
CREATE TABLE IF NOT EXISTS backtest_result (
    id              TEXT PRIMARY KEY,
    user_id         TEXT NOT NULL,
    kind            TEXT NOT NULL,
    exchange        TEXT NOT NULL,
    pair            TEXT NOT NULL,
    timeframe       TEXT NOT NULL,
    strategy_type   TEXT NOT NULL,
    strategy_params TEXT NOT NULL,
    backtest_config TEXT NOT NULL,
    result          TEXT NOT NULL,
    created_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_backtest_user ON backtest_result (user_id, created_at);
";

/// Filters for listing persisted backtests
#[derive(Debug, Clone, Default)]
pub struct BacktestFilter {
    pub kind: Option<BacktestKind>,
    pub strategy_type: Option<String>,
    /// Inclusive created_at lower bound (ms)
    pub from: Option<i64>,
    /// Inclusive created_at upper bound (ms)
    pub to: Option<i64>,
    /// 1-based page number
    pub page: u32,
    pub limit: u32,
}

/// One page of backtest records plus the unpaged total
#[derive(Debug, Clone)]
pub struct BacktestPage {
    pub records: Vec<BacktestRecord>,
    pub total: u64,
}

/// SQLite-backed metadata store
pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // --- ingestion jobs ---

    pub fn upsert_job(&self, job: &IngestionJob) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO ingestion_job
               (id, pair, timeframe, exchange, status, priority, candles_fetched,
                candles_stored, created_at, started_at, completed_at, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
               status = excluded.status,
               candles_fetched = excluded.candles_fetched,
               candles_stored = excluded.candles_stored,
               started_at = excluded.started_at,
               completed_at = excluded.completed_at,
               error_message = excluded.error_message",
            params![
                job.id.to_string(),
                job.pair.canonical(),
                job.timeframe.to_string(),
                job.exchange.as_str(),
                job.status.as_str(),
                job.priority,
                job.candles_fetched,
                job.candles_stored,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.error_message,
            ],
        )?;
        Ok(())
    }

    pub fn get_job(&self, id: Uuid) -> Result<Option<IngestionJob>> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, pair, timeframe, exchange, status, priority, candles_fetched,
                        candles_stored, created_at, started_at, completed_at, error_message
                 FROM ingestion_job WHERE id = ?1",
                params![id.to_string()],
                job_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Update only the progress counters, leaving status untouched so a
    /// concurrent cancellation is never overwritten
    pub fn update_job_progress(&self, id: Uuid, fetched: u64, stored: u64) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE ingestion_job SET candles_fetched = ?2, candles_stored = ?3 WHERE id = ?1",
            params![id.to_string(), fetched, stored],
        )?;
        Ok(())
    }

    /// Mark a job CANCELLED if it is still PENDING or RUNNING
    pub fn cancel_job(&self, id: Uuid) -> Result<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE ingestion_job SET status = 'CANCELLED'
             WHERE id = ?1 AND status IN ('PENDING', 'RUNNING')",
            params![id.to_string()],
        )?;
        Ok(changed > 0)
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<IngestionJob>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, pair, timeframe, exchange, status, priority, candles_fetched,
                    candles_stored, created_at, started_at, completed_at, error_message
             FROM ingestion_job WHERE status = ?1
             ORDER BY priority DESC, created_at ASC",
        )?;
        let jobs = stmt
            .query_map(params![status.as_str()], job_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    // --- data sources ---

    pub fn upsert_data_source(&self, source: &DataSource) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO data_source
               (pair, timeframe, exchange, earliest_date, latest_date, total_candles,
                file_path, file_size, is_complete, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(pair, timeframe, exchange) DO UPDATE SET
               earliest_date = excluded.earliest_date,
               latest_date = excluded.latest_date,
               total_candles = excluded.total_candles,
               file_path = excluded.file_path,
               file_size = excluded.file_size,
               is_complete = excluded.is_complete,
               last_updated = excluded.last_updated",
            params![
                source.pair.canonical(),
                source.timeframe.to_string(),
                source.exchange.as_str(),
                source.earliest_date,
                source.latest_date,
                source.total_candles,
                source.file_path,
                source.file_size,
                source.is_complete,
                source.last_updated,
            ],
        )?;
        Ok(())
    }

    pub fn get_data_source(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        exchange: Venue,
    ) -> Result<Option<DataSource>> {
        self.conn
            .lock()
            .query_row(
                "SELECT pair, timeframe, exchange, earliest_date, latest_date, total_candles,
                        file_path, file_size, is_complete, last_updated
                 FROM data_source WHERE pair = ?1 AND timeframe = ?2 AND exchange = ?3",
                params![pair.canonical(), timeframe.to_string(), exchange.as_str()],
                source_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    // --- gaps ---

    pub fn upsert_gap(&self, gap: &DataGap) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO data_gap
               (id, pair, timeframe, gap_start, gap_end, reason, is_repaired,
                detected_at, repaired_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
               is_repaired = excluded.is_repaired,
               repaired_at = excluded.repaired_at",
            params![
                gap.id.to_string(),
                gap.pair.canonical(),
                gap.timeframe.to_string(),
                gap.gap_start,
                gap.gap_end,
                gap.reason,
                gap.is_repaired,
                gap.detected_at,
                gap.repaired_at,
            ],
        )?;
        Ok(())
    }

    /// Unrepaired gaps for a series, oldest first
    pub fn open_gaps(&self, pair: &Pair, timeframe: Timeframe) -> Result<Vec<DataGap>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, pair, timeframe, gap_start, gap_end, reason, is_repaired,
                    detected_at, repaired_at
             FROM data_gap
             WHERE pair = ?1 AND timeframe = ?2 AND is_repaired = 0
             ORDER BY gap_start ASC",
        )?;
        let gaps = stmt
            .query_map(params![pair.canonical(), timeframe.to_string()], gap_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(gaps)
    }

    pub fn mark_gap_repaired(&self, id: Uuid, repaired_at: i64) -> Result<()> {
        let changed = self.conn.lock().execute(
            "UPDATE data_gap SET is_repaired = 1, repaired_at = ?2 WHERE id = ?1",
            params![id.to_string(), repaired_at],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound { entity: "data_gap", key: id.to_string() });
        }
        Ok(())
    }

    // --- backtest records ---

    pub fn insert_backtest(&self, record: &BacktestRecord) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO backtest_result
               (id, user_id, kind, exchange, pair, timeframe, strategy_type,
                strategy_params, backtest_config, result, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id.to_string(),
                record.user_id,
                record.kind.as_str(),
                record.exchange.as_str(),
                record.pair.canonical(),
                record.timeframe.to_string(),
                record.strategy_type,
                record.strategy_params.to_string(),
                record.backtest_config.to_string(),
                record.result.to_string(),
                record.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_backtest(&self, id: Uuid, user_id: &str) -> Result<Option<BacktestRecord>> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, user_id, kind, exchange, pair, timeframe, strategy_type,
                        strategy_params, backtest_config, result, created_at
                 FROM backtest_result WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), user_id],
                backtest_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_backtests(&self, user_id: &UserId, filter: &BacktestFilter) -> Result<BacktestPage> {
        let mut clauses = vec!["user_id = ?1".to_string()];
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(user_id.clone())];

        if let Some(kind) = filter.kind {
            args.push(Box::new(kind.as_str().to_string()));
            clauses.push(format!("kind = ?{}", args.len()));
        }
        if let Some(ref st) = filter.strategy_type {
            args.push(Box::new(st.clone()));
            clauses.push(format!("strategy_type = ?{}", args.len()));
        }
        if let Some(from) = filter.from {
            args.push(Box::new(from));
            clauses.push(format!("created_at >= ?{}", args.len()));
        }
        if let Some(to) = filter.to {
            args.push(Box::new(to));
            clauses.push(format!("created_at <= ?{}", args.len()));
        }
        let where_clause = clauses.join(" AND ");

        let conn = self.conn.lock();
        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM backtest_result WHERE {where_clause}"),
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row.get(0),
        )?;

        let limit = filter.limit.max(1);
        let offset = filter.page.saturating_sub(1) * limit;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, user_id, kind, exchange, pair, timeframe, strategy_type,
                    strategy_params, backtest_config, result, created_at
             FROM backtest_result WHERE {where_clause}
             ORDER BY created_at DESC LIMIT {limit} OFFSET {offset}"
        ))?;
        let records = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                backtest_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(BacktestPage { records, total })
    }
}

fn parse_col<T: FromStr>(raw: String, what: &str) -> rusqlite::Result<T> {
    raw.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("bad {what}: {raw}").into(),
        )
    })
}

fn parse_json(raw: String) -> rusqlite::Result<Value> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<IngestionJob> {
    let status: String = row.get(4)?;
    Ok(IngestionJob {
        id: parse_col(row.get::<_, String>(0)?, "uuid")?,
        pair: parse_col(row.get::<_, String>(1)?, "pair")?,
        timeframe: parse_col(row.get::<_, String>(2)?, "timeframe")?,
        exchange: parse_col(row.get::<_, String>(3)?, "venue")?,
        status: JobStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("bad status: {status}").into(),
            )
        })?,
        priority: row.get(5)?,
        candles_fetched: row.get(6)?,
        candles_stored: row.get(7)?,
        created_at: row.get(8)?,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
        error_message: row.get(11)?,
    })
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<DataSource> {
    Ok(DataSource {
        pair: parse_col(row.get::<_, String>(0)?, "pair")?,
        timeframe: parse_col(row.get::<_, String>(1)?, "timeframe")?,
        exchange: parse_col(row.get::<_, String>(2)?, "venue")?,
        earliest_date: row.get(3)?,
        latest_date: row.get(4)?,
        total_candles: row.get(5)?,
        file_path: row.get(6)?,
        file_size: row.get(7)?,
        is_complete: row.get(8)?,
        last_updated: row.get(9)?,
    })
}

fn gap_from_row(row: &Row<'_>) -> rusqlite::Result<DataGap> {
    Ok(DataGap {
        id: parse_col(row.get::<_, String>(0)?, "uuid")?,
        pair: parse_col(row.get::<_, String>(1)?, "pair")?,
        timeframe: parse_col(row.get::<_, String>(2)?, "timeframe")?,
        gap_start: row.get(3)?,
        gap_end: row.get(4)?,
        reason: row.get(5)?,
        is_repaired: row.get(6)?,
        detected_at: row.get(7)?,
        repaired_at: row.get(8)?,
    })
}

fn backtest_from_row(row: &Row<'_>) -> rusqlite::Result<BacktestRecord> {
    let kind: String = row.get(2)?;
    Ok(BacktestRecord {
        id: parse_col(row.get::<_, String>(0)?, "uuid")?,
        user_id: row.get(1)?,
        kind: BacktestKind::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("bad kind: {kind}").into(),
            )
        })?,
        exchange: parse_col(row.get::<_, String>(3)?, "venue")?,
        pair: parse_col(row.get::<_, String>(4)?, "pair")?,
        timeframe: parse_col(row.get::<_, String>(5)?, "timeframe")?,
        strategy_type: row.get(6)?,
        strategy_params: parse_json(row.get::<_, String>(7)?)?,
        backtest_config: parse_json(row.get::<_, String>(8)?)?,
        result: parse_json(row.get::<_, String>(9)?)?,
        created_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pair() -> Pair {
        Pair::parse("BTC/USD").unwrap()
    }

    #[test]
    fn job_round_trip_and_cancel() {
        let store = MetadataStore::open_in_memory().unwrap();
        let mut job = IngestionJob::new(pair(), Timeframe::H1, Venue::Kraken, 1, 1000);
        store.upsert_job(&job).unwrap();

        job.status = JobStatus::Running;
        job.candles_fetched = 500;
        store.upsert_job(&job).unwrap();

        let loaded = store.get_job(job.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.candles_fetched, 500);

        assert!(store.cancel_job(job.id).unwrap());
        assert_eq!(store.get_job(job.id).unwrap().unwrap().status, JobStatus::Cancelled);
        // already terminal: no-op
        assert!(!store.cancel_job(job.id).unwrap());
    }

    #[test]
    fn data_source_upsert_is_idempotent() {
        let store = MetadataStore::open_in_memory().unwrap();
        let mut source = DataSource {
            pair: pair(),
            timeframe: Timeframe::H1,
            exchange: Venue::Kraken,
            earliest_date: 100,
            latest_date: 200,
            total_candles: 10,
            file_path: "BTC-USD/1h".into(),
            file_size: 1024,
            is_complete: false,
            last_updated: 1000,
        };
        store.upsert_data_source(&source).unwrap();
        source.latest_date = 300;
        source.total_candles = 20;
        store.upsert_data_source(&source).unwrap();

        let loaded = store
            .get_data_source(&pair(), Timeframe::H1, Venue::Kraken)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.latest_date, 300);
        assert_eq!(loaded.total_candles, 20);
    }

    #[test]
    fn gaps_filter_repaired() {
        let store = MetadataStore::open_in_memory().unwrap();
        let gap = DataGap {
            id: Uuid::new_v4(),
            pair: pair(),
            timeframe: Timeframe::H1,
            gap_start: 100,
            gap_end: 200,
            reason: "missing candles".into(),
            is_repaired: false,
            detected_at: 1000,
            repaired_at: None,
        };
        store.upsert_gap(&gap).unwrap();
        assert_eq!(store.open_gaps(&pair(), Timeframe::H1).unwrap().len(), 1);

        store.mark_gap_repaired(gap.id, 2000).unwrap();
        assert!(store.open_gaps(&pair(), Timeframe::H1).unwrap().is_empty());
    }

    #[test]
    fn backtest_listing_pages_and_filters() {
        let store = MetadataStore::open_in_memory().unwrap();
        for i in 0..5 {
            let record = BacktestRecord {
                id: Uuid::new_v4(),
                user_id: "u1".into(),
                kind: if i % 2 == 0 { BacktestKind::Run } else { BacktestKind::Optimize },
                exchange: Venue::Binance,
                pair: pair(),
                timeframe: Timeframe::H1,
                strategy_type: "momentum".into(),
                strategy_params: json!({}),
                backtest_config: json!({}),
                result: json!({"i": i}),
                created_at: 1000 + i,
            };
            store.insert_backtest(&record).unwrap();
        }

        let page = store
            .list_backtests(
                &"u1".to_string(),
                &BacktestFilter { kind: Some(BacktestKind::Run), page: 1, limit: 2, ..Default::default() },
            )
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.records.len(), 2);
        // newest first
        assert_eq!(page.records[0].result["i"], 4);

        let missing = store.get_backtest(Uuid::new_v4(), "u1").unwrap();
        assert!(missing.is_none());

        // ownership: another user cannot read it
        let someone_elses = store.get_backtest(page.records[0].id, "u2").unwrap();
        assert!(someone_elses.is_none());
    }
}
