//! Strategy output signals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::Hold => "hold",
        }
    }
}

/// What a strategy wants to do right now.
///
/// `confidence` is clamped to `[0, 1]` at construction; exits carry the
/// protective levels the strategy computed at entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    pub confidence: Decimal,
    pub price: Decimal,
    pub amount: Decimal,
    pub reason: String,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub trailing_stop: Option<Decimal>,
}

impl Signal {
    /// A do-nothing signal
    pub fn hold(price: Decimal, reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::Hold,
            confidence: Decimal::ZERO,
            price,
            amount: Decimal::ZERO,
            reason: reason.into(),
            stop_loss: None,
            take_profit: None,
            trailing_stop: None,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action != SignalAction::Hold
    }

    /// Clamp confidence into `[0, 1]`
    pub fn with_confidence(mut self, confidence: Decimal) -> Self {
        self.confidence = confidence.clamp(Decimal::ZERO, Decimal::ONE);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn hold_is_not_actionable() {
        assert!(!Signal::hold(dec!(100), "flat").is_actionable());
    }

    #[test]
    fn confidence_is_clamped() {
        let s = Signal::hold(dec!(1), "x").with_confidence(dec!(1.7));
        assert_eq!(s.confidence, Decimal::ONE);
        let s = Signal::hold(dec!(1), "x").with_confidence(dec!(-0.2));
        assert_eq!(s.confidence, Decimal::ZERO);
    }
}
