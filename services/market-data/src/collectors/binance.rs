//! Binance WebSocket frame parsing.
//!
//! Streams are lowercase `<symbol>@<channel>`; payloads tag themselves with
//! an `e` event field except partial depth snapshots, which are recognized by
//! their `bids`/`asks` keys.

use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use vela_types::{BookLevel, MarketDataKind, OrderBook, Pair, Ticker, TradeTick, Venue};

use super::{decimal_field, decimal_value, VenueParser};
use crate::{MarketDataError, MarketDataEvent, MarketPayload, Result};

pub struct BinanceParser {
    /// wire symbol (uppercase) → canonical pair
    symbols: RwLock<HashMap<String, Pair>>,
    next_request_id: AtomicU64,
}

impl BinanceParser {
    pub fn new() -> Self {
        Self {
            symbols: RwLock::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
        }
    }

    fn stream_name(kind: MarketDataKind) -> &'static str {
        match kind {
            MarketDataKind::Ticker => "ticker",
            MarketDataKind::Orderbook => "depth20@100ms",
            MarketDataKind::OrderbookUpdate => "depth@100ms",
            MarketDataKind::Trade => "trade",
            MarketDataKind::AggregatedTrade => "aggTrade",
        }
    }

    fn frame(&self, method: &str, kind: MarketDataKind, pair: &Pair) -> String {
        let symbol = self.wire_symbol(pair).to_lowercase();
        let stream = format!("{}@{}", symbol, Self::stream_name(kind));
        json!({
            "method": method,
            "params": [stream],
            "id": self.next_request_id.fetch_add(1, Ordering::Relaxed),
        })
        .to_string()
    }

    fn lookup(&self, symbol: &str) -> Result<Pair> {
        if let Some(pair) = self.symbols.read().get(symbol) {
            return Ok(pair.clone());
        }
        Pair::parse(symbol).map_err(Into::into)
    }

    fn parse_ticker(&self, v: &Value) -> Result<MarketDataEvent> {
        let venue = Venue::Binance;
        let symbol = str_field(v, "s")?;
        let pair = self.lookup(symbol)?;
        let ts = v.get("E").and_then(Value::as_i64).unwrap_or_default();
        let ticker = Ticker {
            exchange: venue,
            pair: pair.clone(),
            price: decimal_field(venue, v, "c")?,
            bid: decimal_field(venue, v, "b")?,
            ask: decimal_field(venue, v, "a")?,
            high_24h: decimal_field(venue, v, "h")?,
            low_24h: decimal_field(venue, v, "l")?,
            volume: decimal_field(venue, v, "v")?,
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

    fn parse_trade(&self, v: &Value, aggregated: bool) -> Result<MarketDataEvent> {
        let venue = Venue::Binance;
        let symbol = str_field(v, "s")?;
        let pair = self.lookup(symbol)?;
        let ts = v.get("T").and_then(Value::as_i64).unwrap_or_default();
        // `m` = buyer is maker, i.e. the aggressor sold.
        let side = v.get("m").and_then(Value::as_bool).map(|maker| {
            if maker { "sell".to_string() } else { "buy".to_string() }
        });
        let trade = TradeTick {
            exchange: venue,
            pair: pair.clone(),
            price: decimal_field(venue, v, "p")?,
            amount: decimal_field(venue, v, "q")?,
            side,
            ts,
        };
        Ok(MarketDataEvent {
            kind: if aggregated {
                MarketDataKind::AggregatedTrade
            } else {
                MarketDataKind::Trade
            },
            exchange: venue,
            pair,
            data: MarketPayload::Trade(trade),
            ts,
        })
    }

    fn parse_depth(&self, v: &Value) -> Result<Option<MarketDataEvent>> {
        let venue = Venue::Binance;
        // Partial depth snapshots carry no symbol; only usable when exactly
        // one symbol is subscribed on this connection channel.
        let symbols = self.symbols.read();
        let Some(pair) = symbols.values().next().cloned() else {
            return Ok(None);
        };
        drop(symbols);

        let ts = chrono::Utc::now().timestamp_millis();
        let book = OrderBook {
            exchange: venue,
            pair: pair.clone(),
            bids: parse_ladder(venue, v.get("bids"))?,
            asks: parse_ladder(venue, v.get("asks"))?,
            ts,
        };
        Ok(Some(MarketDataEvent {
            kind: MarketDataKind::Orderbook,
            exchange: venue,
            pair,
            data: MarketPayload::Book(book),
            ts,
        }))
    }
}

impl VenueParser for BinanceParser {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn wire_symbol(&self, pair: &Pair) -> String {
        // Binance quotes dollars as USDT.
        let quote = if pair.quote() == "USD" { "USDT" } else { pair.quote() };
        let symbol = format!("{}{}", pair.base(), quote);
        self.symbols.write().insert(symbol.clone(), pair.clone());
        symbol
    }

    fn subscribe_frame(&self, kind: MarketDataKind, pair: &Pair) -> Result<String> {
        Ok(self.frame("SUBSCRIBE", kind, pair))
    }

    fn unsubscribe_frame(&self, kind: MarketDataKind, pair: &Pair) -> Result<String> {
        Ok(self.frame("UNSUBSCRIBE", kind, pair))
    }

    fn parse(&self, text: &str) -> Result<Vec<MarketDataEvent>> {
        let v: Value = serde_json::from_str(text)?;

        // Subscription acks look like {"result":null,"id":N}.
        if v.get("result").is_some() || v.get("id").is_some() && v.get("e").is_none() {
            return Ok(Vec::new());
        }

        match v.get("e").and_then(Value::as_str) {
            Some("24hrTicker") => Ok(vec![self.parse_ticker(&v)?]),
            Some("trade") => Ok(vec![self.parse_trade(&v, false)?]),
            Some("aggTrade") => Ok(vec![self.parse_trade(&v, true)?]),
            Some(_) => Ok(Vec::new()),
            None if v.get("bids").is_some() && v.get("asks").is_some() => {
                Ok(self.parse_depth(&v)?.into_iter().collect())
            }
            None => Ok(Vec::new()),
        }
    }
}

fn str_field<'a>(v: &'a Value, field: &'static str) -> Result<&'a str> {
    v.get(field)
        .and_then(Value::as_str)
        .ok_or(MarketDataError::MissingField { venue: Venue::Binance, field })
}

fn parse_ladder(venue: Venue, side: Option<&Value>) -> Result<Vec<BookLevel>> {
    let Some(Value::Array(levels)) = side else {
        return Ok(Vec::new());
    };
    levels
        .iter()
        .map(|level| {
            let entries = level.as_array().ok_or_else(|| MarketDataError::Parse {
                venue,
                message: "ladder level is not an array".into(),
            })?;
            Ok(BookLevel {
                price: decimal_value(venue, &entries[0], "price")?,
                amount: decimal_value(venue, &entries[1], "amount")?,
            })
        })
        .collect()
}
