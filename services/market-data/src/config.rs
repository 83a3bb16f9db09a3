//! Venue and aggregator configuration.

use serde::{Deserialize, Serialize};
use vela_types::Venue;

/// Connection policy for one venue client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub venue: Venue,
    /// WebSocket endpoint; empty string selects the venue's production URL
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay; actual delay is `delay · 2^(attempt-1)`
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Expected message cadence; silence for `2 · heartbeat` forces a reconnect
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_heartbeat_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl VenueConfig {
    pub fn for_venue(venue: Venue) -> Self {
        Self {
            venue,
            url: default_url(venue).to_string(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    pub fn endpoint(&self) -> String {
        if self.url.is_empty() {
            default_url(self.venue).to_string()
        } else {
            self.url.clone()
        }
    }
}

fn default_url(venue: Venue) -> &'static str {
    match venue {
        Venue::Binance => "wss://stream.binance.com:9443/ws",
        Venue::Coinbase => "wss://ws-feed.exchange.coinbase.com",
        Venue::Kraken => "wss://ws.kraken.com",
    }
}

/// Aggregator-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    pub venues: Vec<VenueConfig>,
    /// VWAP recomputation cadence in milliseconds
    #[serde(default = "default_aggregation_interval_ms")]
    pub aggregation_interval_ms: u64,
    /// Rolling trade cache per pair
    #[serde(default = "default_max_cached_trades")]
    pub max_cached_trades: usize,
}

fn default_aggregation_interval_ms() -> u64 {
    1000
}

fn default_max_cached_trades() -> usize {
    1000
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            venues: Venue::ALL.iter().copied().map(VenueConfig::for_venue).collect(),
            aggregation_interval_ms: default_aggregation_interval_ms(),
            max_cached_trades: default_max_cached_trades(),
        }
    }
}
