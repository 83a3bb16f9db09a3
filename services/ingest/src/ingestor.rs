//! Chunked historical backfill.
//!
//! Each run is a durable `IngestionJob` row. The loop fetches one chunk,
//! validates, appends to the columnar store, persists progress, then checks
//! the job row for cancellation before sleeping out the rate limit. Transient
//! fetch failures retry with linear-multiple backoff (`retry_delay · attempt`)
//! up to `max_retries`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use vela_storage::{CandleStore, MetadataStore};
use vela_types::{Candle, DataSource, IngestionJob, JobStatus, Pair, Timeframe, Venue};

use crate::client::ExchangeClient;
use crate::{IngestError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestorConfig {
    pub exchange: Venue,
    pub rate_limit_ms: u64,
    pub chunk_size: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            exchange: Venue::Kraken,
            rate_limit_ms: 100,
            chunk_size: 1000,
            max_retries: 3,
            retry_delay_ms: 5000,
        }
    }
}

pub struct HistoricalIngestor {
    config: IngestorConfig,
    client: Arc<dyn ExchangeClient>,
    store: Arc<CandleStore>,
    metadata: Arc<MetadataStore>,
}

impl HistoricalIngestor {
    pub fn new(
        config: IngestorConfig,
        client: Arc<dyn ExchangeClient>,
        store: Arc<CandleStore>,
        metadata: Arc<MetadataStore>,
    ) -> Self {
        Self { config, client, store, metadata }
    }

    pub fn store(&self) -> &Arc<CandleStore> {
        &self.store
    }

    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    /// Backfill `[start, end)` for one series. Returns the completed job row.
    pub async fn ingest(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        start: i64,
        end: i64,
        priority: i32,
    ) -> Result<IngestionJob> {
        if start >= end {
            return Err(IngestError::InvalidRange { from: start, to: end });
        }
        let now = chrono::Utc::now().timestamp_millis();
        let mut job = IngestionJob::new(pair.clone(), timeframe, self.config.exchange, priority, now);
        self.metadata.upsert_job(&job)?;

        job.status = JobStatus::Running;
        job.started_at = Some(chrono::Utc::now().timestamp_millis());
        self.metadata.upsert_job(&job)?;
        info!(job = %job.id, pair = %pair, timeframe = %timeframe, start, end, "ingestion started");

        match self.run_chunks(&mut job, pair, timeframe, start, end).await {
            Ok(()) => {
                job.status = JobStatus::Completed;
                job.completed_at = Some(chrono::Utc::now().timestamp_millis());
                self.metadata.upsert_job(&job)?;
                self.refresh_data_source(pair, timeframe)?;
                info!(job = %job.id, fetched = job.candles_fetched, stored = job.candles_stored,
                      "ingestion completed");
                Ok(job)
            }
            Err(IngestError::Cancelled(id)) => {
                // The row already says CANCELLED; keep its bookkeeping current.
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(chrono::Utc::now().timestamp_millis());
                self.metadata.upsert_job(&job)?;
                warn!(job = %id, "ingestion cancelled");
                Err(IngestError::Cancelled(id))
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error_message = Some(e.to_string());
                job.completed_at = Some(chrono::Utc::now().timestamp_millis());
                self.metadata.upsert_job(&job)?;
                warn!(job = %job.id, error = %e, "ingestion failed");
                Err(e)
            }
        }
    }

    async fn run_chunks(
        &self,
        job: &mut IngestionJob,
        pair: &Pair,
        timeframe: Timeframe,
        start: i64,
        end: i64,
    ) -> Result<()> {
        let tf = timeframe.millis();
        let mut current = start;

        while current < end {
            let candles = self.fetch_with_retry(pair, timeframe, current).await?;
            if candles.is_empty() {
                break;
            }
            job.candles_fetched += candles.len() as u64;

            let valid: Vec<Candle> = candles
                .iter()
                .filter(|c| c.timestamp < end)
                .filter(|c| match c.validate() {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(job = %job.id, error = %e, "dropping invalid candle");
                        false
                    }
                })
                .copied()
                .collect();

            if !valid.is_empty() {
                self.store.append_candles(pair, timeframe, &valid)?;
                job.candles_stored += valid.len() as u64;
            }

            let last_ts = candles.last().expect("non-empty").timestamp;
            current = last_ts + tf;
            // Counters only: a concurrent cancel must not be overwritten.
            self.metadata
                .update_job_progress(job.id, job.candles_fetched, job.candles_stored)?;

            // Cancellation is observed between chunks, via the job row.
            if let Some(row) = self.metadata.get_job(job.id)? {
                if row.status == JobStatus::Cancelled {
                    return Err(IngestError::Cancelled(job.id));
                }
            }

            if current < end {
                tokio::time::sleep(Duration::from_millis(self.config.rate_limit_ms)).await;
            }
        }
        Ok(())
    }

    async fn fetch_with_retry(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        from: i64,
    ) -> Result<Vec<Candle>> {
        let mut last_error = String::new();
        for attempt in 1..=self.config.max_retries {
            match self
                .client
                .fetch_candles(pair, timeframe, from, self.config.chunk_size)
                .await
            {
                Ok(candles) => return Ok(candles),
                Err(e) => {
                    last_error = e.to_string();
                    warn!(attempt, error = %last_error, "fetch failed, backing off");
                    let backoff = self.config.retry_delay_ms * u64::from(attempt);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
        Err(IngestError::RetriesExhausted {
            attempts: self.config.max_retries,
            last_error,
        })
    }

    /// Rebuild the `data_source` row from what the store actually holds
    pub fn refresh_data_source(&self, pair: &Pair, timeframe: Timeframe) -> Result<()> {
        let Some(range) = self.store.available_range(pair, timeframe)? else {
            return Ok(());
        };
        let source = DataSource {
            pair: pair.clone(),
            timeframe,
            exchange: self.config.exchange,
            earliest_date: range.earliest,
            latest_date: range.latest,
            total_candles: range.total_candles,
            file_path: format!("{}/{}", pair.file_form(), timeframe),
            file_size: 0,
            is_complete: false,
            last_updated: chrono::Utc::now().timestamp_millis(),
        };
        self.metadata.upsert_data_source(&source)?;
        Ok(())
    }

    pub fn cancel(&self, job_id: Uuid) -> Result<bool> {
        Ok(self.metadata.cancel_job(job_id)?)
    }
}
