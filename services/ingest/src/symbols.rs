//! Per-venue symbol normalization tables.
//!
//! Canonical pairs map to venue-native symbols through a lookup table built
//! at startup and extensible from configuration. The defaults cover the
//! substitutions the venues are known for: kraken's `XBT` and binance's
//! dollar-as-`USDT` quoting.

use std::collections::HashMap;

use vela_types::{Pair, Venue};

/// Substitution table for one direction (canonical leg → venue leg)
type LegMap = HashMap<&'static str, &'static str>;

pub struct SymbolTable {
    venue: Venue,
    base_subs: LegMap,
    quote_subs: LegMap,
    /// Exact-pair overrides from configuration, canonical → wire
    overrides: HashMap<String, String>,
}

impl SymbolTable {
    pub fn for_venue(venue: Venue) -> Self {
        let mut base_subs = LegMap::new();
        let mut quote_subs = LegMap::new();
        match venue {
            Venue::Kraken => {
                base_subs.insert("BTC", "XBT");
                quote_subs.insert("BTC", "XBT");
            }
            Venue::Binance => {
                quote_subs.insert("USD", "USDT");
            }
            Venue::Coinbase => {}
        }
        Self { venue, base_subs, quote_subs, overrides: HashMap::new() }
    }

    /// Add an exact-pair override (`BTC/USD` → some venue-specific symbol)
    pub fn with_override(mut self, canonical: &str, wire: &str) -> Self {
        self.overrides.insert(canonical.to_string(), wire.to_string());
        self
    }

    pub fn venue(&self) -> Venue {
        self.venue
    }

    /// Venue-native symbol for a canonical pair
    pub fn wire_symbol(&self, pair: &Pair) -> String {
        if let Some(wire) = self.overrides.get(&pair.canonical()) {
            return wire.clone();
        }
        let base = self.base_subs.get(pair.base()).copied().unwrap_or(pair.base());
        let quote = self.quote_subs.get(pair.quote()).copied().unwrap_or(pair.quote());
        match self.venue {
            Venue::Kraken | Venue::Coinbase => format!("{base}/{quote}"),
            Venue::Binance => format!("{base}{quote}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kraken_substitutes_xbt() {
        let table = SymbolTable::for_venue(Venue::Kraken);
        assert_eq!(table.wire_symbol(&Pair::parse("BTC/USD").unwrap()), "XBT/USD");
        assert_eq!(table.wire_symbol(&Pair::parse("ETH/BTC").unwrap()), "ETH/XBT");
    }

    #[test]
    fn binance_concatenates_and_tethers() {
        let table = SymbolTable::for_venue(Venue::Binance);
        assert_eq!(table.wire_symbol(&Pair::parse("BTC/USD").unwrap()), "BTCUSDT");
        assert_eq!(table.wire_symbol(&Pair::parse("ETH/EUR").unwrap()), "ETHEUR");
    }

    #[test]
    fn coinbase_passes_through() {
        let table = SymbolTable::for_venue(Venue::Coinbase);
        assert_eq!(table.wire_symbol(&Pair::parse("BTC/USD").unwrap()), "BTC/USD");
    }

    #[test]
    fn overrides_win() {
        let table = SymbolTable::for_venue(Venue::Kraken).with_override("DOGE/USD", "XDG/USD");
        assert_eq!(table.wire_symbol(&Pair::parse("DOGE/USD").unwrap()), "XDG/USD");
    }
}
