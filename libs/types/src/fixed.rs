//! 8-decimal fixed-point bridge for on-disk candle columns.
//!
//! Prices and volumes are persisted as `i64` with 8 implied decimal places.
//! The range covers ±92 billion at full precision, which comfortably holds
//! any crypto price or candle volume the platform handles.

use rust_decimal::Decimal;

use crate::error::TypesError;

/// Implied decimal places in the fixed-point representation
pub const FIXED_SCALE: u32 = 8;

const FIXED_ONE: i64 = 100_000_000;

/// Convert a `Decimal` to 8-dp fixed point, rejecting values that overflow.
pub fn to_fixed(value: Decimal) -> Result<i64, TypesError> {
    let scaled = value * Decimal::from(FIXED_ONE);
    let rounded = scaled.round();
    rounded
        .try_into()
        .map_err(|_| TypesError::FixedPointRange(value.to_string()))
}

/// Convert an 8-dp fixed-point integer back to `Decimal`. Exact.
pub fn from_fixed(raw: i64) -> Decimal {
    Decimal::new(raw, FIXED_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_trips_typical_prices() {
        for value in [dec!(0.00000001), dec!(1), dec!(50000.12345678), dec!(92000000000)] {
            assert_eq!(from_fixed(to_fixed(value).unwrap()), value);
        }
    }

    #[test]
    fn rounds_excess_precision() {
        // 9 decimal places round to 8
        assert_eq!(
            from_fixed(to_fixed(dec!(1.234567894)).unwrap()),
            dec!(1.23456789)
        );
    }

    #[test]
    fn overflow_is_an_error() {
        assert!(to_fixed(dec!(99999999999999)).is_err());
    }
}
