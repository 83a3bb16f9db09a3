//! Position accounting: weighted-average entry, realized and unrealized P&L.
//!
//! The arithmetic here is pure; keyed storage, locking and event wiring live
//! in the position manager. Invariants maintained by every mutation:
//! `available + locked = total >= 0` and `total_cost >= 0`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::order::OrderSide;

/// A fill applied to a position, with the realized P&L it produced (sells)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionTrade {
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub realized_pnl: Decimal,
    pub ts: i64,
}

/// Holdings of one asset for one user on one venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub total_amount: Decimal,
    pub available_amount: Decimal,
    pub locked_amount: Decimal,
    pub average_entry_price: Decimal,
    pub total_cost: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_fees: Decimal,
    pub trades: Vec<PositionTrade>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Position {
    pub fn new(now: i64) -> Self {
        Self {
            total_amount: Decimal::ZERO,
            available_amount: Decimal::ZERO,
            locked_amount: Decimal::ZERO,
            average_entry_price: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            trades: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a buy fill. Cost basis includes the fee, and the average entry
    /// becomes the cost-weighted mean over all open inventory.
    pub fn apply_buy(&mut self, amount: Decimal, price: Decimal, fee: Decimal, ts: i64) {
        let cost = amount * price + fee;
        let new_total = self.total_amount + amount;
        if new_total > Decimal::ZERO {
            self.average_entry_price = (self.total_cost + cost) / new_total;
        }
        self.total_amount = new_total;
        self.available_amount += amount;
        self.total_cost += cost;
        self.total_fees += fee;
        self.updated_at = ts;
        self.trades.push(PositionTrade {
            side: OrderSide::Buy,
            amount,
            price,
            fee,
            realized_pnl: Decimal::ZERO,
            ts,
        });
    }

    /// Apply a sell fill. Realizes `amount · price − fee − amount · avg_entry`
    /// and removes the matching cost basis, floored at zero.
    pub fn apply_sell(
        &mut self,
        amount: Decimal,
        price: Decimal,
        fee: Decimal,
        ts: i64,
    ) -> Result<Decimal, TypesError> {
        if amount > self.total_amount {
            return Err(TypesError::Accounting(format!(
                "sell of {amount} exceeds position of {}",
                self.total_amount
            )));
        }
        let cost_basis = amount * self.average_entry_price;
        let realized = amount * price - fee - cost_basis;

        self.total_amount -= amount;
        self.available_amount = (self.available_amount - amount).max(Decimal::ZERO);
        self.total_cost = (self.total_cost - cost_basis).max(Decimal::ZERO);
        self.realized_pnl += realized;
        self.total_fees += fee;
        self.updated_at = ts;
        if self.total_amount == Decimal::ZERO {
            self.average_entry_price = Decimal::ZERO;
            self.total_cost = Decimal::ZERO;
            self.unrealized_pnl = Decimal::ZERO;
        }
        self.trades.push(PositionTrade {
            side: OrderSide::Sell,
            amount,
            price,
            fee,
            realized_pnl: realized,
            ts,
        });
        Ok(realized)
    }

    /// Move `amount` from available to locked
    pub fn lock(&mut self, amount: Decimal) -> Result<(), TypesError> {
        if amount > self.available_amount {
            return Err(TypesError::Accounting(format!(
                "cannot lock {amount}: only {} available",
                self.available_amount
            )));
        }
        self.available_amount -= amount;
        self.locked_amount += amount;
        Ok(())
    }

    /// Move `amount` from locked back to available
    pub fn unlock(&mut self, amount: Decimal) -> Result<(), TypesError> {
        if amount > self.locked_amount {
            return Err(TypesError::Accounting(format!(
                "cannot unlock {amount}: only {} locked",
                self.locked_amount
            )));
        }
        self.locked_amount -= amount;
        self.available_amount += amount;
        Ok(())
    }

    /// Mark to `current_price`: `total · price − total_cost` while holding
    pub fn update_unrealized(&mut self, current_price: Decimal) {
        self.unrealized_pnl = if self.total_amount > Decimal::ZERO {
            self.total_amount * current_price - self.total_cost
        } else {
            Decimal::ZERO
        };
    }

    /// Current value of the holdings at `price`
    pub fn value_at(&self, price: Decimal) -> Decimal {
        self.total_amount * price
    }
}
