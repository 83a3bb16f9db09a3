//! Order lifecycle types and fill accounting.
//!
//! The status machine is strictly monotonic:
//! `pending → open → {partial → filled | filled | cancelled | rejected | expired}`.
//! Terminal states never transition again.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypesError;
use crate::pair::Pair;
use crate::venue::Venue;
use crate::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    Oco,
}

impl OrderType {
    /// Types that require a limit price
    pub fn requires_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StopLimit | OrderType::Oco)
    }

    /// Types that require a stop trigger price
    pub fn requires_stop_price(&self) -> bool {
        matches!(self, OrderType::Stop | OrderType::StopLimit | OrderType::Oco)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    #[serde(rename = "GTC")]
    GoodTilCancelled,
    #[serde(rename = "IOC")]
    ImmediateOrCancel,
    #[serde(rename = "FOK")]
    FillOrKill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Open,
    Partial,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Whether the lifecycle permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Pending, Open) | (Pending, Rejected) | (Pending, Cancelled) => true,
            (Open, Partial) | (Open, Filled) | (Open, Cancelled) | (Open, Rejected) | (Open, Expired) => true,
            (Partial, Filled) | (Partial, Cancelled) | (Partial, Expired) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Open => "open",
            OrderStatus::Partial => "partial",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
        }
    }
}

/// One execution against an order. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeFill {
    pub trade_id: String,
    pub price: Decimal,
    pub amount: Decimal,
    pub fee: Decimal,
    pub side: OrderSide,
    pub ts: i64,
}

/// An order owned by one user on one venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: UserId,
    pub exchange: Venue,
    pub pair: Pair,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    pub filled_amount: Decimal,
    pub remaining_amount: Decimal,
    pub average_price: Option<Decimal>,
    pub fee: Decimal,
    pub fee_currency: String,
    pub strategy_id: Option<String>,
    pub trades: Vec<TradeFill>,
    pub created_at: i64,
    pub updated_at: i64,
    pub filled_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    /// Venue-assigned identifier once submitted
    pub external_id: Option<String>,
}

impl Order {
    /// Whether the user may still cancel: pending, open or partially filled
    pub fn can_cancel(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Pending | OrderStatus::Open | OrderStatus::Partial
        )
    }

    /// Move to `next`, enforcing the lifecycle machine.
    pub fn transition(&mut self, next: OrderStatus, now: i64) -> Result<(), TypesError> {
        if !self.status.can_transition_to(next) {
            return Err(TypesError::IllegalTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        match next {
            OrderStatus::Filled => self.filled_at = Some(now),
            OrderStatus::Cancelled => self.cancelled_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    /// Append a fill and recompute `filled_amount`, `remaining_amount`,
    /// `average_price` (amount-weighted) and cumulative `fee`.
    ///
    /// The caller decides the resulting status transition; this keeps the
    /// arithmetic in one place while the manager serializes lifecycle moves.
    pub fn apply_fill(&mut self, fill: TradeFill, now: i64) {
        self.filled_amount += fill.amount;
        self.remaining_amount = (self.amount - self.filled_amount).max(Decimal::ZERO);
        self.fee += fill.fee;
        self.trades.push(fill);

        let total: Decimal = self.trades.iter().map(|t| t.amount).sum();
        if total > Decimal::ZERO {
            let weighted: Decimal = self.trades.iter().map(|t| t.price * t.amount).sum();
            self.average_price = Some(weighted / total);
        }
        self.updated_at = now;
    }

    pub fn is_fully_filled(&self) -> bool {
        self.remaining_amount <= Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(amount: Decimal) -> Order {
        Order {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            exchange: Venue::Binance,
            pair: Pair::parse("BTC/USDT").unwrap(),
            order_type: OrderType::Limit,
            side: OrderSide::Buy,
            amount,
            price: Some(dec!(50000)),
            stop_price: None,
            time_in_force: TimeInForce::GoodTilCancelled,
            status: OrderStatus::Open,
            filled_amount: Decimal::ZERO,
            remaining_amount: amount,
            average_price: None,
            fee: Decimal::ZERO,
            fee_currency: "USDT".into(),
            strategy_id: None,
            trades: Vec::new(),
            created_at: 0,
            updated_at: 0,
            filled_at: None,
            cancelled_at: None,
            external_id: None,
        }
    }

    fn fill(price: Decimal, amount: Decimal) -> TradeFill {
        TradeFill {
            trade_id: "t".into(),
            price,
            amount,
            fee: dec!(1),
            side: OrderSide::Buy,
            ts: 1,
        }
    }

    #[test]
    fn filled_plus_remaining_equals_amount() {
        let mut o = order(dec!(2));
        o.apply_fill(fill(dec!(50000), dec!(0.5)), 1);
        assert_eq!(o.filled_amount + o.remaining_amount, o.amount);
        o.apply_fill(fill(dec!(51000), dec!(1.5)), 2);
        assert_eq!(o.filled_amount + o.remaining_amount, o.amount);
        assert!(o.is_fully_filled());
    }

    #[test]
    fn average_price_is_amount_weighted() {
        let mut o = order(dec!(3));
        o.apply_fill(fill(dec!(100), dec!(1)), 1);
        o.apply_fill(fill(dec!(130), dec!(2)), 2);
        assert_eq!(o.average_price, Some(dec!(120)));
    }

    #[test]
    fn terminal_states_refuse_transitions() {
        let mut o = order(dec!(1));
        o.transition(OrderStatus::Filled, 5).unwrap();
        assert!(o.transition(OrderStatus::Cancelled, 6).is_err());
        assert_eq!(o.filled_at, Some(5));
    }

    #[test]
    fn pending_cannot_jump_to_filled() {
        let mut o = order(dec!(1));
        o.status = OrderStatus::Pending;
        assert!(o.transition(OrderStatus::Filled, 1).is_err());
        assert!(o.transition(OrderStatus::Open, 1).is_ok());
    }

    #[test]
    fn can_cancel_tracks_status() {
        let mut o = order(dec!(1));
        assert!(o.can_cancel());
        o.transition(OrderStatus::Filled, 1).unwrap();
        assert!(!o.can_cancel());
    }
}
