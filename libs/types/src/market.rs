//! Market data shapes: candles, tickers, order books, aggregated prices.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::pair::Pair;
use crate::venue::Venue;

/// One OHLCV candle. Immutable once written to the columnar store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, milliseconds since epoch
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Check the structural invariants: `low <= {open, close} <= high`,
    /// `volume >= 0`, `close > 0`.
    pub fn validate(&self) -> Result<(), TypesError> {
        let fail = |reason: &str| TypesError::InvalidCandle {
            timestamp: self.timestamp,
            reason: reason.to_string(),
        };
        if self.timestamp <= 0 {
            return Err(fail("timestamp missing or non-positive"));
        }
        if self.high < self.low {
            return Err(fail("high below low"));
        }
        if self.open <= Decimal::ZERO {
            return Err(fail("open not positive"));
        }
        if self.close <= Decimal::ZERO {
            return Err(fail("close not positive"));
        }
        if self.low > self.open || self.open > self.high {
            return Err(fail("open outside low..high"));
        }
        if self.low > self.close || self.close > self.high {
            return Err(fail("close outside low..high"));
        }
        if self.volume < Decimal::ZERO {
            return Err(fail("negative volume"));
        }
        Ok(())
    }
}

/// Normalized 24h ticker from one venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub exchange: Venue,
    pub pair: Pair,
    pub price: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub volume: Decimal,
    /// Venue timestamp, milliseconds since epoch
    pub ts: i64,
}

/// One price level of an order book side
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

/// Order book snapshot or incremental update from one venue.
/// Bids are sorted descending by price, asks ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub exchange: Venue,
    pub pair: Pair,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub ts: i64,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }
}

/// A public trade print from one venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTick {
    pub exchange: Venue,
    pub pair: Pair,
    pub price: Decimal,
    pub amount: Decimal,
    /// `buy` or `sell` aggressor side when the venue reports it
    pub side: Option<String>,
    pub ts: i64,
}

/// Kinds of normalized market data events a venue client emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketDataKind {
    Ticker,
    Orderbook,
    OrderbookUpdate,
    Trade,
    AggregatedTrade,
}

impl MarketDataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketDataKind::Ticker => "ticker",
            MarketDataKind::Orderbook => "orderbook",
            MarketDataKind::OrderbookUpdate => "orderbook_update",
            MarketDataKind::Trade => "trade",
            MarketDataKind::AggregatedTrade => "aggregated_trade",
        }
    }
}

/// Cross-venue aggregated price for one pair at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPrice {
    pub pair: Pair,
    /// Volume-weighted average price across reporting venues
    pub vwap: Decimal,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub spread: Decimal,
    pub spread_pct: Decimal,
    pub total_volume: Decimal,
    pub exchange_count: usize,
    pub exchanges: Vec<Venue>,
    pub ts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            timestamp: 1_700_000_000_000,
            open,
            high,
            low,
            close,
            volume: dec!(10),
        }
    }

    #[test]
    fn well_formed_candle_validates() {
        assert!(candle(dec!(100), dec!(110), dec!(95), dec!(105)).validate().is_ok());
    }

    #[test]
    fn inverted_range_rejected() {
        let c = candle(dec!(100), dec!(90), dec!(110), dec!(100));
        assert!(c.validate().is_err());
    }

    #[test]
    fn close_above_high_rejected() {
        let c = candle(dec!(100), dec!(110), dec!(95), dec!(111));
        assert!(c.validate().is_err());
    }

    #[test]
    fn negative_volume_rejected() {
        let mut c = candle(dec!(100), dec!(110), dec!(95), dec!(105));
        c.volume = dec!(-1);
        assert!(c.validate().is_err());
    }
}
