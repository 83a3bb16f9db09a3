//! Windowed technical indicators over close-price slices.
//!
//! All functions return `None` until the window holds enough data. Prices stay
//! in `Decimal`; the Bollinger standard deviation bridges through `f64` for
//! the square root.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Arithmetic mean of the last `period` values
pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().copied().sum::<Decimal>() / Decimal::from(period))
}

/// Exponential moving average with `α = 2/(period+1)`, seeded by the SMA of
/// the first `period` values
pub fn ema(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let alpha = Decimal::from(2) / Decimal::from(period + 1);
    let mut ema = values[..period].iter().copied().sum::<Decimal>() / Decimal::from(period);
    for value in &values[period..] {
        ema = alpha * value + (Decimal::ONE - alpha) * ema;
    }
    Some(ema)
}

/// Relative strength index with Wilder smoothing
pub fn rsi(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }
    let deltas: Vec<Decimal> = values.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = deltas[..period]
        .iter()
        .map(|d| d.max(&Decimal::ZERO))
        .sum::<Decimal>()
        / Decimal::from(period);
    let mut avg_loss = deltas[..period]
        .iter()
        .map(|d| (-*d).max(Decimal::ZERO))
        .sum::<Decimal>()
        / Decimal::from(period);

    let n = Decimal::from(period);
    for delta in &deltas[period..] {
        let gain = delta.max(&Decimal::ZERO);
        let loss = (-*delta).max(Decimal::ZERO);
        avg_gain = (avg_gain * (n - Decimal::ONE) + gain) / n;
        avg_loss = (avg_loss * (n - Decimal::ONE) + loss) / n;
    }

    if avg_loss == Decimal::ZERO {
        return Some(Decimal::from(100));
    }
    let rs = avg_gain / avg_loss;
    Some(Decimal::from(100) - Decimal::from(100) / (Decimal::ONE + rs))
}

/// Bollinger bands: middle = SMA, width = `std_devs · σ`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bollinger {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
}

pub fn bollinger(values: &[Decimal], period: usize, std_devs: Decimal) -> Option<Bollinger> {
    let middle = sma(values, period)?;
    let window = &values[values.len() - period..];
    let variance = window
        .iter()
        .map(|v| {
            let diff = *v - middle;
            diff * diff
        })
        .sum::<Decimal>()
        / Decimal::from(period);
    let sigma = Decimal::from_f64(variance.to_f64()?.sqrt())?;
    Some(Bollinger {
        upper: middle + std_devs * sigma,
        middle,
        lower: middle - std_devs * sigma,
    })
}

/// Standard deviation of simple returns, used by dynamic slippage models
pub fn returns_stddev(values: &[Decimal]) -> Option<Decimal> {
    if values.len() < 2 {
        return None;
    }
    let returns: Vec<Decimal> = values
        .windows(2)
        .filter(|w| w[0] != Decimal::ZERO)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.is_empty() {
        return None;
    }
    let mean = returns.iter().copied().sum::<Decimal>() / Decimal::from(returns.len());
    let variance = returns
        .iter()
        .map(|r| {
            let d = *r - mean;
            d * d
        })
        .sum::<Decimal>()
        / Decimal::from(returns.len());
    Decimal::from_f64(variance.to_f64()?.sqrt())
}
