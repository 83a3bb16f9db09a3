//! Round-trip and dedup behavior of the columnar candle store.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use vela_storage::CandleStore;
use vela_types::{Candle, Pair, Timeframe};

const HOUR_MS: i64 = 3_600_000;
// 2024-03-01T00:00:00Z
const BASE_TS: i64 = 1_709_251_200_000;

fn candle(ts: i64, close: Decimal) -> Candle {
    Candle {
        timestamp: ts,
        open: close - dec!(1),
        high: close + dec!(2),
        low: close - dec!(2),
        close,
        volume: dec!(12.5),
    }
}

fn series(count: usize) -> Vec<Candle> {
    (0..count)
        .map(|i| candle(BASE_TS + i as i64 * HOUR_MS, dec!(50000) + Decimal::from(i)))
        .collect()
}

#[test]
fn append_then_read_returns_sorted_dedup_set() {
    let dir = tempfile::tempdir().unwrap();
    let store = CandleStore::new(dir.path());
    let pair = Pair::parse("BTC/USD").unwrap();

    let candles = series(48);
    // Append out of order and with a duplicated timestamp carrying new values.
    let mut shuffled = candles.clone();
    shuffled.reverse();
    store.append_candles(&pair, Timeframe::H1, &shuffled).unwrap();

    let replacement = candle(BASE_TS + 10 * HOUR_MS, dec!(99999));
    store.append_candles(&pair, Timeframe::H1, &[replacement]).unwrap();

    let read = store
        .read_range(&pair, Timeframe::H1, BASE_TS, BASE_TS + 100 * HOUR_MS)
        .unwrap();

    assert_eq!(read.len(), 48);
    for pair_of in read.windows(2) {
        assert!(pair_of[0].timestamp < pair_of[1].timestamp);
    }
    // last write wins
    assert_eq!(read[10].close, dec!(99999));
    // untouched neighbors survive exactly
    assert_eq!(read[11], candles[11]);
}

#[test]
fn read_range_filters_by_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let store = CandleStore::new(dir.path());
    let pair = Pair::parse("ETH/USDT").unwrap();

    store.append_candles(&pair, Timeframe::H1, &series(24)).unwrap();

    let slice = store
        .read_range(
            &pair,
            Timeframe::H1,
            BASE_TS + 5 * HOUR_MS,
            BASE_TS + 9 * HOUR_MS,
        )
        .unwrap();
    assert_eq!(slice.len(), 5);
    assert_eq!(slice[0].timestamp, BASE_TS + 5 * HOUR_MS);
    assert_eq!(slice[4].timestamp, BASE_TS + 9 * HOUR_MS);
}

#[test]
fn available_range_counts_files_and_candles() {
    let dir = tempfile::tempdir().unwrap();
    let store = CandleStore::new(dir.path());
    let pair = Pair::parse("BTC/USD").unwrap();

    assert!(store.available_range(&pair, Timeframe::H1).unwrap().is_none());

    // Two separate monthly batches: March and April 2024.
    let march = series(24);
    let april: Vec<Candle> = (0..24)
        .map(|i| candle(1_711_929_600_000 + i as i64 * HOUR_MS, dec!(60000)))
        .collect();
    store.append_candles(&pair, Timeframe::H1, &march).unwrap();
    store.append_candles(&pair, Timeframe::H1, &april).unwrap();

    let range = store.available_range(&pair, Timeframe::H1).unwrap().unwrap();
    assert_eq!(range.total_files, 2);
    assert_eq!(range.total_candles, 48);
    assert_eq!(range.earliest, BASE_TS);
    assert_eq!(range.latest, 1_711_929_600_000 + 23 * HOUR_MS);
}

#[test]
fn delete_before_trims_and_unlinks() {
    let dir = tempfile::tempdir().unwrap();
    let store = CandleStore::new(dir.path());
    let pair = Pair::parse("BTC/USD").unwrap();

    store.append_candles(&pair, Timeframe::H1, &series(48)).unwrap();
    let removed = store
        .delete_before(&pair, Timeframe::H1, BASE_TS + 10 * HOUR_MS)
        .unwrap();
    assert_eq!(removed, 10);

    let rest = store
        .read_range(&pair, Timeframe::H1, BASE_TS, BASE_TS + 1000 * HOUR_MS)
        .unwrap();
    assert_eq!(rest.len(), 38);
    assert_eq!(rest[0].timestamp, BASE_TS + 10 * HOUR_MS);

    // Deleting everything unlinks the file.
    store.delete_before(&pair, Timeframe::H1, i64::MAX / 2).unwrap();
    assert!(store.available_range(&pair, Timeframe::H1).unwrap().is_none());
}
