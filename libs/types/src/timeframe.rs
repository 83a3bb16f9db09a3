//! Candle timeframe parsing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TypesError;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;
const WEEK_MS: i64 = 7 * DAY_MS;
// Months are approximated as 30 days.
const MONTH_MS: i64 = 30 * DAY_MS;

/// A candle duration with the grammar `{integer}{m|h|d|w|M}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    count: u32,
    unit: TimeframeUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TimeframeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl Timeframe {
    pub const M1: Timeframe = Timeframe { count: 1, unit: TimeframeUnit::Minute };
    pub const M5: Timeframe = Timeframe { count: 5, unit: TimeframeUnit::Minute };
    pub const H1: Timeframe = Timeframe { count: 1, unit: TimeframeUnit::Hour };
    pub const D1: Timeframe = Timeframe { count: 1, unit: TimeframeUnit::Day };

    /// Parse `5m`, `1h`, `4h`, `1d`, `1w`, `1M`. Unit is case-sensitive:
    /// lowercase `m` is minutes, uppercase `M` is months.
    pub fn parse(raw: &str) -> Result<Self, TypesError> {
        let raw = raw.trim();
        let split = raw.len().checked_sub(1).filter(|_| raw.is_ascii());
        let Some(split) = split else {
            return Err(TypesError::InvalidTimeframe(raw.to_string()));
        };
        let (digits, unit) = raw.split_at(split);
        let count: u32 = digits
            .parse()
            .map_err(|_| TypesError::InvalidTimeframe(raw.to_string()))?;
        if count == 0 {
            return Err(TypesError::InvalidTimeframe(raw.to_string()));
        }
        let unit = match unit {
            "m" => TimeframeUnit::Minute,
            "h" => TimeframeUnit::Hour,
            "d" => TimeframeUnit::Day,
            "w" => TimeframeUnit::Week,
            "M" => TimeframeUnit::Month,
            _ => return Err(TypesError::InvalidTimeframe(raw.to_string())),
        };
        Ok(Self { count, unit })
    }

    /// Duration of one candle in milliseconds
    pub fn millis(&self) -> i64 {
        let unit_ms = match self.unit {
            TimeframeUnit::Minute => MINUTE_MS,
            TimeframeUnit::Hour => HOUR_MS,
            TimeframeUnit::Day => DAY_MS,
            TimeframeUnit::Week => WEEK_MS,
            TimeframeUnit::Month => MONTH_MS,
        };
        i64::from(self.count) * unit_ms
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            TimeframeUnit::Minute => "m",
            TimeframeUnit::Hour => "h",
            TimeframeUnit::Day => "d",
            TimeframeUnit::Week => "w",
            TimeframeUnit::Month => "M",
        };
        write!(f, "{}{}", self.count, unit)
    }
}

impl FromStr for Timeframe {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Timeframe {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_unit() {
        assert_eq!(Timeframe::parse("1m").unwrap().millis(), 60_000);
        assert_eq!(Timeframe::parse("5m").unwrap().millis(), 300_000);
        assert_eq!(Timeframe::parse("1h").unwrap().millis(), 3_600_000);
        assert_eq!(Timeframe::parse("1d").unwrap().millis(), 86_400_000);
        assert_eq!(Timeframe::parse("1w").unwrap().millis(), 604_800_000);
        assert_eq!(Timeframe::parse("1M").unwrap().millis(), 2_592_000_000);
    }

    #[test]
    fn minute_and_month_are_distinct() {
        assert_ne!(
            Timeframe::parse("1m").unwrap(),
            Timeframe::parse("1M").unwrap()
        );
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "h", "0m", "-1h", "10x", "1.5h"] {
            assert!(Timeframe::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn display_round_trips() {
        for s in ["1m", "15m", "4h", "1d", "1w", "3M"] {
            assert_eq!(Timeframe::parse(s).unwrap().to_string(), s);
        }
    }
}
