//! Market-data service: one WebSocket client per venue, venue-specific wire
//! parsers, and an aggregator that normalizes everything onto the event bus
//! and computes cross-venue VWAP.

pub mod aggregator;
pub mod client;
pub mod collectors;
pub mod config;
pub mod metrics;

mod error;

pub use aggregator::{AggregatorHandle, MarketDataAggregator};
pub use client::{ClientEvent, ConnectionState, VenueClient};
pub use config::{AggregatorConfig, VenueConfig};
pub use error::{MarketDataError, Result};

use serde::{Deserialize, Serialize};
use vela_types::{MarketDataKind, OrderBook, Pair, Ticker, TradeTick, Venue};

/// One normalized market-data event as rebroadcast by the aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataEvent {
    #[serde(rename = "type")]
    pub kind: MarketDataKind,
    pub exchange: Venue,
    pub pair: Pair,
    pub data: MarketPayload,
    pub ts: i64,
}

/// Payload variants carried by [`MarketDataEvent`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarketPayload {
    Ticker(Ticker),
    Book(OrderBook),
    Trade(TradeTick),
}
