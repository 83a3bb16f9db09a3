//! Trading pair normalization.
//!
//! The canonical form is `BASE/QUOTE` uppercase. Feeds and user input arrive
//! as `BASE-QUOTE`, `BASE/QUOTE` or concatenated `BASEQUOTE`; all three are
//! normalized on ingress.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TypesError;

/// Quote currencies recognized when splitting concatenated symbols like
/// `BTCUSDT`. Longest suffix wins.
const KNOWN_QUOTES: [&str; 8] = ["USDT", "USDC", "BUSD", "USD", "EUR", "GBP", "BTC", "ETH"];

/// A normalized trading pair (`BASE/QUOTE`, both uppercase)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    base: String,
    quote: String,
}

impl Pair {
    /// Build a pair from already-separated components
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Result<Self, TypesError> {
        let base = base.into().trim().to_ascii_uppercase();
        let quote = quote.into().trim().to_ascii_uppercase();
        if !is_valid_leg(&base) || !is_valid_leg(&quote) {
            return Err(TypesError::InvalidPair(format!("{base}/{quote}")));
        }
        Ok(Self { base, quote })
    }

    /// Parse any of the accepted forms: `BTC/USD`, `BTC-USD`, `BTCUSD`
    pub fn parse(raw: &str) -> Result<Self, TypesError> {
        let trimmed = raw.trim();
        if let Some((base, quote)) = trimmed.split_once('/').or_else(|| trimmed.split_once('-')) {
            return Self::new(base, quote);
        }

        let upper = trimmed.to_ascii_uppercase();
        for quote in KNOWN_QUOTES {
            if let Some(base) = upper.strip_suffix(quote) {
                if !base.is_empty() {
                    return Self::new(base, quote);
                }
            }
        }
        Err(TypesError::InvalidPair(raw.to_string()))
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// Canonical `BASE/QUOTE` form
    pub fn canonical(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }

    /// Filesystem-safe form used by the columnar store (`BASE-QUOTE`)
    pub fn file_form(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }
}

fn is_valid_leg(leg: &str) -> bool {
    (2..=10).contains(&leg.len()) && leg.bytes().all(|b| b.is_ascii_uppercase())
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Pair {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Pair {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Pair> for String {
    fn from(pair: Pair) -> Self {
        pair.canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_all_forms() {
        let canonical = Pair::parse("BTC/USD").unwrap();
        assert_eq!(Pair::parse("btc-usd").unwrap(), canonical);
        assert_eq!(Pair::parse("BTCUSD").unwrap(), canonical);
        assert_eq!(canonical.canonical(), "BTC/USD");
    }

    #[test]
    fn concatenated_prefers_longest_quote() {
        // BTCUSDT must split as BTC/USDT, not BTCUSD/T
        let pair = Pair::parse("BTCUSDT").unwrap();
        assert_eq!(pair.base(), "BTC");
        assert_eq!(pair.quote(), "USDT");
    }

    #[test]
    fn file_form_is_dash_separated() {
        assert_eq!(Pair::parse("ETH/EUR").unwrap().file_form(), "ETH-EUR");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Pair::parse("").is_err());
        assert!(Pair::parse("B/USD").is_err());
        assert!(Pair::parse("TOOLONGBASEPAIR/USD").is_err());
        assert!(Pair::parse("XYZQQ").is_err());
    }
}
