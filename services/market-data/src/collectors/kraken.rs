//! Kraken WebSocket frame parsing.
//!
//! Kraken data frames are arrays `[channelID, payload, channelName, pair]`
//! rather than tagged objects, and bitcoin trades as `XBT`. Timestamps arrive
//! as fractional seconds.

use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;

use vela_types::{MarketDataKind, Pair, Ticker, TradeTick, Venue};

use super::{decimal_value, VenueParser};
use crate::{MarketDataError, MarketDataEvent, MarketPayload, Result};

pub struct KrakenParser {
    /// wire pair (`XBT/USD`) → canonical pair (`BTC/USD`)
    symbols: RwLock<HashMap<String, Pair>>,
}

impl KrakenParser {
    pub fn new() -> Self {
        Self { symbols: RwLock::new(HashMap::new()) }
    }

    fn channel(kind: MarketDataKind) -> &'static str {
        match kind {
            MarketDataKind::Ticker => "ticker",
            MarketDataKind::Orderbook | MarketDataKind::OrderbookUpdate => "book",
            MarketDataKind::Trade | MarketDataKind::AggregatedTrade => "trade",
        }
    }

    fn lookup(&self, wire: &str) -> Result<Pair> {
        if let Some(pair) = self.symbols.read().get(wire) {
            return Ok(pair.clone());
        }
        // Unmapped wire pair: undo the XBT substitution and parse.
        Pair::parse(&wire.replace("XBT", "BTC")).map_err(Into::into)
    }

    fn parse_ticker(&self, payload: &Value, pair: Pair) -> Result<MarketDataEvent> {
        let venue = Venue::Kraken;
        let ts = chrono::Utc::now().timestamp_millis();
        let first = |field: &'static str| -> Result<Value> {
            payload
                .get(field)
                .and_then(|arr| arr.get(0))
                .cloned()
                .ok_or(MarketDataError::MissingField { venue, field })
        };
        // c = [last price, lot volume]; h/l/v index 1 is the 24h window.
        let last = first("c")?;
        let bid = first("b")?;
        let ask = first("a")?;
        let day = |field: &'static str| -> Result<Value> {
            payload
                .get(field)
                .and_then(|arr| arr.get(1))
                .cloned()
                .ok_or(MarketDataError::MissingField { venue, field })
        };
        let ticker = Ticker {
            exchange: venue,
            pair: pair.clone(),
            price: decimal_value(venue, &last, "c")?,
            bid: decimal_value(venue, &bid, "b")?,
            ask: decimal_value(venue, &ask, "a")?,
            high_24h: decimal_value(venue, &day("h")?, "h")?,
            low_24h: decimal_value(venue, &day("l")?, "l")?,
            volume: decimal_value(venue, &day("v")?, "v")?,
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

    fn parse_trades(&self, payload: &Value, pair: Pair) -> Result<Vec<MarketDataEvent>> {
        let venue = Venue::Kraken;
        let Some(trades) = payload.as_array() else {
            return Ok(Vec::new());
        };
        trades
            .iter()
            .filter_map(Value::as_array)
            .map(|parts| {
                let ts = parts
                    .get(2)
                    .and_then(|t| t.as_str().map(str::to_string).or_else(|| t.as_f64().map(|f| f.to_string())))
                    .and_then(|s| s.parse::<f64>().ok())
                    .map(|secs| (secs * 1000.0) as i64)
                    .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
                let side = parts.get(3).and_then(Value::as_str).map(|s| {
                    if s == "b" { "buy".to_string() } else { "sell".to_string() }
                });
                let trade = TradeTick {
                    exchange: venue,
                    pair: pair.clone(),
                    price: decimal_value(venue, &parts[0], "price")?,
                    amount: decimal_value(venue, &parts[1], "volume")?,
                    side,
                    ts,
                };
                Ok(MarketDataEvent {
                    kind: MarketDataKind::Trade,
                    exchange: venue,
                    pair: pair.clone(),
                    data: MarketPayload::Trade(trade),
                    ts,
                })
            })
            .collect()
    }
}

impl VenueParser for KrakenParser {
    fn venue(&self) -> Venue {
        Venue::Kraken
    }

    fn wire_symbol(&self, pair: &Pair) -> String {
        // Kraken still names bitcoin XBT.
        let base = if pair.base() == "BTC" { "XBT" } else { pair.base() };
        let wire = format!("{}/{}", base, pair.quote());
        self.symbols.write().insert(wire.clone(), pair.clone());
        wire
    }

    fn subscribe_frame(&self, kind: MarketDataKind, pair: &Pair) -> Result<String> {
        Ok(json!({
            "event": "subscribe",
            "pair": [self.wire_symbol(pair)],
            "subscription": { "name": Self::channel(kind) },
        })
        .to_string())
    }

    fn unsubscribe_frame(&self, kind: MarketDataKind, pair: &Pair) -> Result<String> {
        Ok(json!({
            "event": "unsubscribe",
            "pair": [self.wire_symbol(pair)],
            "subscription": { "name": Self::channel(kind) },
        })
        .to_string())
    }

    fn parse(&self, text: &str) -> Result<Vec<MarketDataEvent>> {
        let v: Value = serde_json::from_str(text)?;

        // Object frames are status/heartbeat/subscription events.
        let Some(frame) = v.as_array() else {
            return Ok(Vec::new());
        };
        if frame.len() < 4 {
            return Ok(Vec::new());
        }

        let channel = frame[frame.len() - 2].as_str().unwrap_or_default();
        let wire_pair = frame[frame.len() - 1].as_str().unwrap_or_default();
        let pair = self.lookup(wire_pair)?;
        let payload = &frame[1];

        if channel == "ticker" {
            Ok(vec![self.parse_ticker(payload, pair)?])
        } else if channel == "trade" {
            self.parse_trades(payload, pair)
        } else {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn btc_becomes_xbt_on_the_wire() {
        let parser = KrakenParser::new();
        assert_eq!(parser.wire_symbol(&Pair::parse("BTC/USD").unwrap()), "XBT/USD");
        assert_eq!(parser.wire_symbol(&Pair::parse("ETH/EUR").unwrap()), "ETH/EUR");
    }

    #[test]
    fn parses_ticker_array_frame() {
        let parser = KrakenParser::new();
        parser.wire_symbol(&Pair::parse("BTC/USD").unwrap());
        let frame = r#"[42,{"a":["50001.0",1,"1.0"],"b":["49999.0",1,"1.0"],
            "c":["50000.5","0.01"],"h":["50500.0","51000.0"],
            "l":["49000.0","48500.0"],"v":["120.5","340.9"]},"ticker","XBT/USD"]"#;
        let events = parser.parse(frame).unwrap();
        assert_eq!(events.len(), 1);
        let MarketPayload::Ticker(ref t) = events[0].data else {
            panic!("expected ticker");
        };
        assert_eq!(t.price, dec!(50000.5));
        assert_eq!(t.high_24h, dec!(51000.0));
        // reverse mapping restores BTC
        assert_eq!(events[0].pair.canonical(), "BTC/USD");
    }

    #[test]
    fn parses_trade_batch() {
        let parser = KrakenParser::new();
        parser.wire_symbol(&Pair::parse("BTC/USD").unwrap());
        let frame = r#"[42,[["50000.1","0.5","1700000000.123","b","l",""],
            ["50000.2","0.3","1700000000.456","s","m",""]],"trade","XBT/USD"]"#;
        let events = parser.parse(frame).unwrap();
        assert_eq!(events.len(), 2);
        let MarketPayload::Trade(ref t) = events[0].data else {
            panic!("expected trade");
        };
        assert_eq!(t.side.as_deref(), Some("buy"));
        assert_eq!(t.ts, 1_700_000_000_123);
    }

    #[test]
    fn heartbeats_are_ignored() {
        let parser = KrakenParser::new();
        assert!(parser.parse(r#"{"event":"heartbeat"}"#).unwrap().is_empty());
    }
}
