//! Historical-data service facade for the transport layer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use vela_types::{Candle, DataGap, IngestionJob, Pair, Timeframe, Venue};

use crate::gaps::GapDetector;
use crate::ingestor::HistoricalIngestor;
use crate::{IngestError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub pairs: Vec<Pair>,
    pub timeframes: Vec<Timeframe>,
    pub start_date: i64,
    pub end_date: i64,
    /// `true`: fire and forget, job ids come back immediately
    #[serde(default)]
    pub r#async: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub pair: Pair,
    pub timeframe: Timeframe,
    pub from: i64,
    pub to: i64,
    pub limit: Option<usize>,
}

pub struct HistoricalDataService {
    ingestor: Arc<HistoricalIngestor>,
    detector: Arc<GapDetector>,
}

impl HistoricalDataService {
    pub fn new(ingestor: Arc<HistoricalIngestor>, exchange: Venue) -> Self {
        let detector = Arc::new(GapDetector::new(Arc::clone(&ingestor), exchange));
        Self { ingestor, detector }
    }

    /// Run (or spawn) one ingestion per (pair, timeframe) combination
    pub async fn ingest(&self, request: IngestRequest) -> Result<Value> {
        let mut results = Vec::new();
        for pair in &request.pairs {
            for timeframe in &request.timeframes {
                if request.r#async {
                    let ingestor = Arc::clone(&self.ingestor);
                    let pair_owned = pair.clone();
                    let timeframe = *timeframe;
                    let (start, end) = (request.start_date, request.end_date);
                    tokio::spawn(async move {
                        let _ = ingestor.ingest(&pair_owned, timeframe, start, end, 1).await;
                    });
                    results.push(json!({
                        "pair": pair.canonical(),
                        "timeframe": timeframe.to_string(),
                        "scheduled": true,
                    }));
                } else {
                    let job = self
                        .ingestor
                        .ingest(pair, *timeframe, request.start_date, request.end_date, 1)
                        .await?;
                    results.push(json!({
                        "pair": pair.canonical(),
                        "timeframe": timeframe.to_string(),
                        "job_id": job.id,
                        "candles_stored": job.candles_stored,
                    }));
                }
            }
        }
        Ok(json!({ "results": results }))
    }

    /// Warm recent history: the trailing 30 days for each series
    pub async fn prefetch(&self, pairs: &[Pair], timeframes: &[Timeframe]) -> Result<Value> {
        let now = chrono::Utc::now().timestamp_millis();
        let request = IngestRequest {
            pairs: pairs.to_vec(),
            timeframes: timeframes.to_vec(),
            start_date: now - 30 * 86_400_000,
            end_date: now,
            r#async: true,
        };
        self.ingest(request).await
    }

    pub fn status(&self, job_id: Uuid) -> Result<IngestionJob> {
        self.ingestor
            .metadata()
            .get_job(job_id)?
            .ok_or(IngestError::JobNotFound(job_id))
    }

    pub fn gaps(&self, pair: &Pair, timeframe: Timeframe) -> Result<Vec<DataGap>> {
        self.detector.detect_gaps(pair, timeframe)
    }

    pub async fn repair(&self, pair: &Pair, timeframe: Timeframe) -> Result<usize> {
        self.detector.repair_gaps(pair, timeframe).await
    }

    pub fn read(&self, request: &ReadRequest) -> Result<Vec<Candle>> {
        let mut candles = self.ingestor.store().read_range(
            &request.pair,
            request.timeframe,
            request.from,
            request.to,
        )?;
        if let Some(limit) = request.limit {
            candles.truncate(limit);
        }
        Ok(candles)
    }
}
