//! Column-oriented candle files.
//!
//! Layout on disk: `<base>/<BASE-QUOTE>/<timeframe>/YYYY-MM.vcf`, one file per
//! calendar month of the first candle in an appended batch. Each file holds
//! candles sorted by timestamp, stored column-wise: a fixed header followed by
//! six zstd-compressed `i64` little-endian columns (timestamp in ms, then
//! OHLCV as 8-decimal fixed point).
//!
//! Appends use read-merge-rewrite: the existing file is decoded, merged with
//! the new batch, deduplicated by timestamp (last write wins), sorted, and the
//! result is written to a temp file and renamed into place. A per-file mutex
//! serializes writers.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use vela_types::fixed::{from_fixed, to_fixed};
use vela_types::{Candle, Pair, Timeframe};

use crate::{Result, StorageError};

const MAGIC: [u8; 4] = *b"VCF1";
const VERSION: u16 = 1;
const COLUMNS: usize = 6;
const ZSTD_LEVEL: i32 = 3;

/// Summary of what the store holds for one series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailableRange {
    /// Timestamp of the earliest stored candle (ms)
    pub earliest: i64,
    /// Timestamp of the latest stored candle (ms)
    pub latest: i64,
    pub total_candles: u64,
    pub total_files: u64,
}

/// Columnar candle store rooted at a base directory
pub struct CandleStore {
    base: PathBuf,
    /// One lock per physical file, keyed by its relative path
    file_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CandleStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into(), file_locks: DashMap::new() }
    }

    /// Merge `candles` into the month file of the batch's first candle.
    /// Returns the number of candles the file holds afterwards.
    pub fn append_candles(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<usize> {
        let Some(first) = candles.first() else {
            return Ok(0);
        };
        let path = self.month_path(pair, timeframe, month_key(first.timestamp));
        let lock = self.lock_for(&path);
        let _guard = lock.lock();

        let mut merged: BTreeMap<i64, Candle> = BTreeMap::new();
        if path.exists() {
            for candle in read_file(&path)? {
                merged.insert(candle.timestamp, candle);
            }
        }
        // Last write wins on duplicate timestamps.
        for candle in candles {
            merged.insert(candle.timestamp, *candle);
        }

        let sorted: Vec<Candle> = merged.into_values().collect();
        write_file_atomic(&path, &sorted)?;
        debug!(pair = %pair, timeframe = %timeframe, file = %path.display(),
               appended = candles.len(), total = sorted.len(), "candles appended");
        Ok(sorted.len())
    }

    /// All candles with `from <= ts <= to`, merged across the month files in
    /// range plus one neighbor on each side, sorted ascending, deduplicated.
    pub fn read_range(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
        from: i64,
        to: i64,
    ) -> Result<Vec<Candle>> {
        if from > to {
            return Ok(Vec::new());
        }
        let mut merged: BTreeMap<i64, Candle> = BTreeMap::new();
        for key in month_keys_between(from, to) {
            let path = self.month_path(pair, timeframe, key);
            if !path.exists() {
                continue;
            }
            for candle in read_file(&path)? {
                if candle.timestamp >= from && candle.timestamp <= to {
                    merged.insert(candle.timestamp, candle);
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Earliest/latest coverage for a series, or `None` when nothing stored
    pub fn available_range(
        &self,
        pair: &Pair,
        timeframe: Timeframe,
    ) -> Result<Option<AvailableRange>> {
        let dir = self.series_dir(pair, timeframe);
        let mut files = list_month_files(&dir)?;
        if files.is_empty() {
            return Ok(None);
        }
        files.sort();

        let mut total_candles = 0u64;
        for file in &files {
            total_candles += read_row_count(file)? as u64;
        }
        let first = read_file(&files[0])?;
        let last = read_file(files.last().expect("non-empty"))?;
        let (Some(earliest), Some(latest)) = (first.first(), last.last()) else {
            return Ok(None);
        };
        Ok(Some(AvailableRange {
            earliest: earliest.timestamp,
            latest: latest.timestamp,
            total_candles,
            total_files: files.len() as u64,
        }))
    }

    /// Drop all candles strictly older than `cutoff`. Whole months before the
    /// cutoff are unlinked; the boundary month is rewritten.
    pub fn delete_before(&self, pair: &Pair, timeframe: Timeframe, cutoff: i64) -> Result<u64> {
        let dir = self.series_dir(pair, timeframe);
        let mut removed = 0u64;
        for file in list_month_files(&dir)? {
            let lock = self.lock_for(&file);
            let _guard = lock.lock();
            let candles = read_file(&file)?;
            let keep: Vec<Candle> = candles
                .iter()
                .copied()
                .filter(|c| c.timestamp >= cutoff)
                .collect();
            removed += (candles.len() - keep.len()) as u64;
            if keep.is_empty() {
                fs::remove_file(&file)?;
            } else if keep.len() != candles.len() {
                write_file_atomic(&file, &keep)?;
            }
        }
        Ok(removed)
    }

    fn series_dir(&self, pair: &Pair, timeframe: Timeframe) -> PathBuf {
        self.base.join(pair.file_form()).join(timeframe.to_string())
    }

    fn month_path(&self, pair: &Pair, timeframe: Timeframe, key: (i32, u32)) -> PathBuf {
        self.series_dir(pair, timeframe)
            .join(format!("{:04}-{:02}.vcf", key.0, key.1))
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let key = path.to_string_lossy().to_string();
        self.file_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn month_key(ts_ms: i64) -> (i32, u32) {
    let dt: DateTime<Utc> = DateTime::from_timestamp_millis(ts_ms).unwrap_or_default();
    (dt.year(), dt.month())
}

/// Month keys covering `[from, to]` plus one neighbor on each side. Appends
/// land in the month of a batch's first candle, so reads peek next door.
fn month_keys_between(from: i64, to: i64) -> Vec<(i32, u32)> {
    let (mut year, mut month) = prev_month(month_key(from));
    let end = next_month(month_key(to));
    let mut keys = Vec::new();
    loop {
        keys.push((year, month));
        if (year, month) == end {
            break;
        }
        (year, month) = next_month((year, month));
    }
    keys
}

fn prev_month((year, month): (i32, u32)) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn next_month((year, month): (i32, u32)) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn list_month_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("vcf") {
            files.push(path);
        }
    }
    Ok(files)
}

fn corrupt(path: &Path, reason: impl Into<String>) -> StorageError {
    StorageError::CorruptFile {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

fn read_row_count(path: &Path) -> Result<usize> {
    let mut file = fs::File::open(path)?;
    let mut header = [0u8; 10];
    file.read_exact(&mut header)
        .map_err(|_| corrupt(path, "truncated header"))?;
    if header[0..4] != MAGIC {
        return Err(corrupt(path, "bad magic"));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(corrupt(path, format!("unsupported version {version}")));
    }
    Ok(u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize)
}

fn read_file(path: &Path) -> Result<Vec<Candle>> {
    let bytes = fs::read(path)?;
    if bytes.len() < 10 {
        return Err(corrupt(path, "truncated header"));
    }
    if bytes[0..4] != MAGIC {
        return Err(corrupt(path, "bad magic"));
    }
    let rows = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;

    let mut offset = 10usize;
    let mut columns: Vec<Vec<i64>> = Vec::with_capacity(COLUMNS);
    for _ in 0..COLUMNS {
        if offset + 4 > bytes.len() {
            return Err(corrupt(path, "truncated column header"));
        }
        let len = u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        offset += 4;
        if offset + len > bytes.len() {
            return Err(corrupt(path, "truncated column block"));
        }
        let raw = zstd::stream::decode_all(&bytes[offset..offset + len])
            .map_err(|e| corrupt(path, format!("zstd: {e}")))?;
        offset += len;
        if raw.len() != rows * 8 {
            return Err(corrupt(path, "column length mismatch"));
        }
        let column = raw
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes(c.try_into().expect("8-byte chunk")))
            .collect();
        columns.push(column);
    }

    let mut candles = Vec::with_capacity(rows);
    let mut prev_ts = i64::MIN;
    for i in 0..rows {
        let ts = columns[0][i];
        if ts <= prev_ts {
            return Err(corrupt(path, "timestamps not strictly increasing"));
        }
        prev_ts = ts;
        candles.push(Candle {
            timestamp: ts,
            open: from_fixed(columns[1][i]),
            high: from_fixed(columns[2][i]),
            low: from_fixed(columns[3][i]),
            close: from_fixed(columns[4][i]),
            volume: from_fixed(columns[5][i]),
        });
    }
    Ok(candles)
}

fn write_file_atomic(path: &Path, candles: &[Candle]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut columns: Vec<Vec<i64>> = vec![Vec::with_capacity(candles.len()); COLUMNS];
    for candle in candles {
        columns[0].push(candle.timestamp);
        columns[1].push(to_fixed(candle.open)?);
        columns[2].push(to_fixed(candle.high)?);
        columns[3].push(to_fixed(candle.low)?);
        columns[4].push(to_fixed(candle.close)?);
        columns[5].push(to_fixed(candle.volume)?);
    }

    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(&MAGIC)?;
    file.write_all(&VERSION.to_le_bytes())?;
    file.write_all(&(candles.len() as u32).to_le_bytes())?;
    for column in &columns {
        let mut raw = Vec::with_capacity(column.len() * 8);
        for value in column {
            raw.extend_from_slice(&value.to_le_bytes());
        }
        let compressed = zstd::stream::encode_all(&raw[..], ZSTD_LEVEL)
            .map_err(|e| corrupt(path, format!("zstd encode: {e}")))?;
        file.write_all(&(compressed.len() as u32).to_le_bytes())?;
        file.write_all(&compressed)?;
    }
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path) {
        warn!(tmp = %tmp.display(), target = %path.display(), error = %e, "rename failed");
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_key_boundaries() {
        // 2024-01-31T23:59:59.999Z and 2024-02-01T00:00:00Z
        assert_eq!(month_key(1_706_745_599_999), (2024, 1));
        assert_eq!(month_key(1_706_745_600_000), (2024, 2));
    }

    #[test]
    fn month_enumeration_includes_neighbors() {
        // mid-March to mid-April 2024 → Feb, Mar, Apr, May
        let keys = month_keys_between(1_710_500_000_000, 1_713_100_000_000);
        assert_eq!(keys, vec![(2024, 2), (2024, 3), (2024, 4), (2024, 5)]);
    }

    #[test]
    fn month_enumeration_crosses_year() {
        // mid-December 2023 to mid-January 2024 → Nov..Feb
        let keys = month_keys_between(1_702_500_000_000, 1_705_200_000_000);
        assert_eq!(
            keys,
            vec![(2023, 11), (2023, 12), (2024, 1), (2024, 2)]
        );
    }
}
