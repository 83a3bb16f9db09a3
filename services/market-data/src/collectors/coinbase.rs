//! Coinbase Exchange WebSocket frame parsing.
//!
//! Product ids are dash-separated (`BTC-USD`); every message tags itself with
//! a `type` field and timestamps are RFC 3339.

use chrono::DateTime;
use serde_json::{json, Value};

use vela_types::{BookLevel, MarketDataKind, OrderBook, Pair, Ticker, TradeTick, Venue};

use super::{decimal_field, decimal_value, VenueParser};
use crate::{MarketDataError, MarketDataEvent, MarketPayload, Result};

pub struct CoinbaseParser;

impl CoinbaseParser {
    pub fn new() -> Self {
        Self
    }

    fn channel(kind: MarketDataKind) -> &'static str {
        match kind {
            MarketDataKind::Ticker => "ticker",
            MarketDataKind::Orderbook | MarketDataKind::OrderbookUpdate => "level2_batch",
            MarketDataKind::Trade | MarketDataKind::AggregatedTrade => "matches",
        }
    }

    fn parse_ticker(&self, v: &Value) -> Result<MarketDataEvent> {
        let venue = Venue::Coinbase;
        let pair = product_pair(v)?;
        let ts = rfc3339_ms(v.get("time"));
        let ticker = Ticker {
            exchange: venue,
            pair: pair.clone(),
            price: decimal_field(venue, v, "price")?,
            bid: decimal_field(venue, v, "best_bid")?,
            ask: decimal_field(venue, v, "best_ask")?,
            high_24h: decimal_field(venue, v, "high_24h")?,
            low_24h: decimal_field(venue, v, "low_24h")?,
            volume: decimal_field(venue, v, "volume_24h")?,
            ts,
        };
        Ok(MarketDataEvent {
            kind: MarketDataKind::Ticker,
            exchange: venue,
            pair,
            data: MarketPayload::Ticker(ticker),
            ts,
        })
    }

    fn parse_match(&self, v: &Value) -> Result<MarketDataEvent> {
        let venue = Venue::Coinbase;
        let pair = product_pair(v)?;
        let ts = rfc3339_ms(v.get("time"));
        let trade = TradeTick {
            exchange: venue,
            pair: pair.clone(),
            price: decimal_field(venue, v, "price")?,
            amount: decimal_field(venue, v, "size")?,
            side: v.get("side").and_then(Value::as_str).map(str::to_string),
            ts,
        };
        Ok(MarketDataEvent {
            kind: MarketDataKind::Trade,
            exchange: venue,
            pair,
            data: MarketPayload::Trade(trade),
            ts,
        })
    }

    fn parse_snapshot(&self, v: &Value) -> Result<MarketDataEvent> {
        let venue = Venue::Coinbase;
        let pair = product_pair(v)?;
        let ts = chrono::Utc::now().timestamp_millis();
        let book = OrderBook {
            exchange: venue,
            pair: pair.clone(),
            bids: ladder(venue, v.get("bids"))?,
            asks: ladder(venue, v.get("asks"))?,
            ts,
        };
        Ok(MarketDataEvent {
            kind: MarketDataKind::Orderbook,
            exchange: venue,
            pair,
            data: MarketPayload::Book(book),
            ts,
        })
    }

    /// `l2update` frames carry `changes: [[side, price, size], ...]`
    fn parse_l2update(&self, v: &Value) -> Result<MarketDataEvent> {
        let venue = Venue::Coinbase;
        let pair = product_pair(v)?;
        let ts = rfc3339_ms(v.get("time"));
        let mut bids = Vec::new();
        let mut asks = Vec::new();
        if let Some(Value::Array(changes)) = v.get("changes") {
            for change in changes {
                let Some(parts) = change.as_array().filter(|p| p.len() == 3) else {
                    continue;
                };
                let level = BookLevel {
                    price: decimal_value(venue, &parts[1], "price")?,
                    amount: decimal_value(venue, &parts[2], "size")?,
                };
                match parts[0].as_str() {
                    Some("buy") => bids.push(level),
                    Some("sell") => asks.push(level),
                    _ => {}
                }
            }
        }
        let book = OrderBook { exchange: venue, pair: pair.clone(), bids, asks, ts };
        Ok(MarketDataEvent {
            kind: MarketDataKind::OrderbookUpdate,
            exchange: venue,
            pair,
            data: MarketPayload::Book(book),
            ts,
        })
    }
}

impl VenueParser for CoinbaseParser {
    fn venue(&self) -> Venue {
        Venue::Coinbase
    }

    fn wire_symbol(&self, pair: &Pair) -> String {
        pair.file_form()
    }

    fn subscribe_frame(&self, kind: MarketDataKind, pair: &Pair) -> Result<String> {
        Ok(json!({
            "type": "subscribe",
            "product_ids": [self.wire_symbol(pair)],
            "channels": [Self::channel(kind)],
        })
        .to_string())
    }

    fn unsubscribe_frame(&self, kind: MarketDataKind, pair: &Pair) -> Result<String> {
        Ok(json!({
            "type": "unsubscribe",
            "product_ids": [self.wire_symbol(pair)],
            "channels": [Self::channel(kind)],
        })
        .to_string())
    }

    fn parse(&self, text: &str) -> Result<Vec<MarketDataEvent>> {
        let v: Value = serde_json::from_str(text)?;
        match v.get("type").and_then(Value::as_str) {
            Some("ticker") => Ok(vec![self.parse_ticker(&v)?]),
            Some("match") | Some("last_match") => Ok(vec![self.parse_match(&v)?]),
            Some("snapshot") => Ok(vec![self.parse_snapshot(&v)?]),
            Some("l2update") => Ok(vec![self.parse_l2update(&v)?]),
            Some("error") => Err(MarketDataError::Parse {
                venue: Venue::Coinbase,
                message: v
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
            // subscriptions ack, heartbeats
            _ => Ok(Vec::new()),
        }
    }
}

fn product_pair(v: &Value) -> Result<Pair> {
    let product = v
        .get("product_id")
        .and_then(Value::as_str)
        .ok_or(MarketDataError::MissingField { venue: Venue::Coinbase, field: "product_id" })?;
    Pair::parse(product).map_err(Into::into)
}

fn rfc3339_ms(time: Option<&Value>) -> i64 {
    time.and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis())
}

fn ladder(venue: Venue, side: Option<&Value>) -> Result<Vec<BookLevel>> {
    let Some(Value::Array(levels)) = side else {
        return Ok(Vec::new());
    };
    levels
        .iter()
        .filter_map(Value::as_array)
        .map(|parts| {
            Ok(BookLevel {
                price: decimal_value(venue, &parts[0], "price")?,
                amount: decimal_value(venue, &parts[1], "size")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_ticker_frame() {
        let parser = CoinbaseParser::new();
        let frame = r#"{"type":"ticker","product_id":"BTC-USD",
            "price":"50000.25","best_bid":"49999","best_ask":"50001",
            "high_24h":"51000","low_24h":"48000","volume_24h":"8000.1",
            "time":"2024-03-01T12:00:00.000000Z"}"#;
        let events = parser.parse(frame).unwrap();
        assert_eq!(events.len(), 1);
        let MarketPayload::Ticker(ref t) = events[0].data else {
            panic!("expected ticker");
        };
        assert_eq!(t.price, dec!(50000.25));
        assert_eq!(events[0].pair.canonical(), "BTC/USD");
        assert_eq!(events[0].ts, 1_709_294_400_000);
    }

    #[test]
    fn parses_match_as_trade() {
        let parser = CoinbaseParser::new();
        let frame = r#"{"type":"match","product_id":"ETH-USD","price":"3000",
            "size":"1.5","side":"sell","time":"2024-03-01T12:00:00Z"}"#;
        let events = parser.parse(frame).unwrap();
        let MarketPayload::Trade(ref t) = events[0].data else {
            panic!("expected trade");
        };
        assert_eq!(t.amount, dec!(1.5));
        assert_eq!(t.side.as_deref(), Some("sell"));
    }

    #[test]
    fn snapshot_produces_sorted_ladders() {
        let parser = CoinbaseParser::new();
        let frame = r#"{"type":"snapshot","product_id":"BTC-USD",
            "bids":[["49999","1.0"],["49998","2.0"]],
            "asks":[["50001","0.5"],["50002","1.2"]]}"#;
        let events = parser.parse(frame).unwrap();
        let MarketPayload::Book(ref book) = events[0].data else {
            panic!("expected book");
        };
        assert_eq!(book.best_bid(), Some(dec!(49999)));
        assert_eq!(book.best_ask(), Some(dec!(50001)));
    }

    #[test]
    fn error_frames_surface() {
        let parser = CoinbaseParser::new();
        let frame = r#"{"type":"error","message":"Failed to subscribe"}"#;
        assert!(parser.parse(frame).is_err());
    }
}
