//! Venue wire-format parsers.
//!
//! Each venue speaks its own JSON dialect; a [`VenueParser`] translates wire
//! frames into normalized [`MarketDataEvent`]s and builds the venue's
//! subscribe/unsubscribe frames. Symbol mapping is a per-venue lookup table
//! applied on egress and reversed on ingress (e.g. `BTC/USD` → `XBT/USD` on
//! kraken, `BTC/USDT` on binance).

mod binance;
mod coinbase;
mod kraken;

pub use binance::BinanceParser;
pub use coinbase::CoinbaseParser;
pub use kraken::KrakenParser;

use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use vela_types::{MarketDataKind, Pair, Venue};

use crate::{MarketDataError, MarketDataEvent, Result};

/// Translates one venue's wire format to and from normalized shapes
pub trait VenueParser: Send + Sync {
    fn venue(&self) -> Venue;

    /// Venue-native symbol for a canonical pair, remembering the reverse
    /// mapping for ingress translation
    fn wire_symbol(&self, pair: &Pair) -> String;

    /// JSON subscribe frame for one (channel, pair)
    fn subscribe_frame(&self, kind: MarketDataKind, pair: &Pair) -> Result<String>;

    /// JSON unsubscribe frame for one (channel, pair)
    fn unsubscribe_frame(&self, kind: MarketDataKind, pair: &Pair) -> Result<String>;

    /// Parse one text frame. Control frames (heartbeats, subscription acks)
    /// produce an empty vec.
    fn parse(&self, text: &str) -> Result<Vec<MarketDataEvent>>;
}

/// Build the parser for a venue
pub fn parser_for(venue: Venue) -> Box<dyn VenueParser> {
    match venue {
        Venue::Binance => Box::new(BinanceParser::new()),
        Venue::Coinbase => Box::new(CoinbaseParser::new()),
        Venue::Kraken => Box::new(KrakenParser::new()),
    }
}

pub(crate) fn decimal_field(venue: Venue, value: &Value, field: &'static str) -> Result<Decimal> {
    let raw = value
        .get(field)
        .ok_or(MarketDataError::MissingField { venue, field })?;
    decimal_value(venue, raw, field)
}

pub(crate) fn decimal_value(venue: Venue, raw: &Value, field: &'static str) -> Result<Decimal> {
    match raw {
        Value::String(s) => Decimal::from_str(s).map_err(|_| MarketDataError::Parse {
            venue,
            message: format!("bad decimal in {field}: {s}"),
        }),
        Value::Number(n) => Decimal::from_str(&n.to_string()).map_err(|_| MarketDataError::Parse {
            venue,
            message: format!("bad decimal in {field}: {n}"),
        }),
        other => Err(MarketDataError::Parse {
            venue,
            message: format!("non-numeric {field}: {other}"),
        }),
    }
}
