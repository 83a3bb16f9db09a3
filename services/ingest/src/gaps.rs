//! Gap detection and repair.
//!
//! A gap is any pair of neighboring stored candles further apart than
//! `1.5 · timeframe`. A series with no `data_source` row at all is treated as
//! one gap covering everything since 2020-01-01. Repairs re-ingest each open
//! gap at priority 2.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use vela_storage::MetadataStore;
use vela_types::{DataGap, Pair, Timeframe, Venue};

use crate::ingestor::HistoricalIngestor;
use crate::Result;

/// 2020-01-01T00:00:00Z, the assumed start of useful history
pub const HISTORY_EPOCH_MS: i64 = 1_577_836_800_000;

/// Priority used for repair ingestions
const REPAIR_PRIORITY: i32 = 2;

pub struct GapDetector {
    ingestor: Arc<HistoricalIngestor>,
    exchange: Venue,
}

impl GapDetector {
    pub fn new(ingestor: Arc<HistoricalIngestor>, exchange: Venue) -> Self {
        Self { ingestor, exchange }
    }

    /// Detect and persist gaps for one series. Returns the open gaps
    /// (previously known ones included).
    pub fn detect_gaps(&self, pair: &Pair, timeframe: Timeframe) -> Result<Vec<DataGap>> {
        let metadata = self.ingestor.metadata();
        let now = chrono::Utc::now().timestamp_millis();

        let Some(source) = metadata.get_data_source(pair, timeframe, self.exchange)? else {
            // Never ingested: the whole modern era is missing.
            self.persist_new_gap(
                metadata,
                pair,
                timeframe,
                HISTORY_EPOCH_MS,
                now,
                "no data source",
                now,
            )?;
            return Ok(metadata.open_gaps(pair, timeframe)?);
        };

        let candles = self.ingestor.store().read_range(
            pair,
            timeframe,
            source.earliest_date,
            source.latest_date,
        )?;
        let tf = timeframe.millis();
        let threshold = tf + tf / 2;

        for window in candles.windows(2) {
            let delta = window[1].timestamp - window[0].timestamp;
            if delta > threshold {
                self.persist_new_gap(
                    metadata,
                    pair,
                    timeframe,
                    window[0].timestamp + tf,
                    window[1].timestamp - tf,
                    "missing candles",
                    now,
                )?;
            }
        }
        Ok(metadata.open_gaps(pair, timeframe)?)
    }

    /// Ingest every open gap at repair priority; successfully covered gaps
    /// are marked repaired. Returns how many were repaired.
    pub async fn repair_gaps(&self, pair: &Pair, timeframe: Timeframe) -> Result<usize> {
        let metadata = self.ingestor.metadata();
        let open = metadata.open_gaps(pair, timeframe)?;
        let tf = timeframe.millis();
        let mut repaired = 0;

        for gap in open {
            info!(pair = %pair, timeframe = %timeframe, start = gap.gap_start, end = gap.gap_end,
                  "repairing gap");
            // End is inclusive of the last missing slot.
            self.ingestor
                .ingest(pair, timeframe, gap.gap_start, gap.gap_end + tf, REPAIR_PRIORITY)
                .await?;

            let filled = self
                .ingestor
                .store()
                .read_range(pair, timeframe, gap.gap_start, gap.gap_end)?;
            if !filled.is_empty() {
                metadata
                    .mark_gap_repaired(gap.id, chrono::Utc::now().timestamp_millis())?;
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    #[allow(clippy::too_many_arguments)]
    fn persist_new_gap(
        &self,
        metadata: &MetadataStore,
        pair: &Pair,
        timeframe: Timeframe,
        start: i64,
        end: i64,
        reason: &str,
        now: i64,
    ) -> Result<()> {
        // Re-detection must not duplicate a known open gap.
        let exists = metadata
            .open_gaps(pair, timeframe)?
            .iter()
            .any(|g| g.gap_start == start && g.gap_end == end);
        if exists {
            return Ok(());
        }
        metadata.upsert_gap(&DataGap {
            id: Uuid::new_v4(),
            pair: pair.clone(),
            timeframe,
            gap_start: start,
            gap_end: end,
            reason: reason.to_string(),
            is_repaired: false,
            detected_at: now,
            repaired_at: None,
        })?;
        Ok(())
    }
}
