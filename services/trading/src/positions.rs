//! Keyed position store with per-key serialized mutation and P&L reports.
//!
//! Keys are `userId:exchange:asset`. Every mutation for one key goes through
//! that key's mutex, which is the single-writer discipline the accounting
//! invariants rely on.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use vela_types::{OrderSide, Position, TradeFill, UserId, Venue};

use crate::{Result, TradingError};

/// `userId:exchange:asset`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub user_id: UserId,
    pub exchange: Venue,
    pub asset: String,
}

impl PositionKey {
    pub fn new(user_id: impl Into<UserId>, exchange: Venue, asset: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            exchange,
            asset: asset.into().to_ascii_uppercase(),
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.user_id, self.exchange, self.asset)
    }
}

/// Portfolio rollup for one user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_value: Decimal,
    pub total_cost: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_fees: Decimal,
    pub position_count: usize,
}

/// One asset's share of portfolio value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationSlice {
    pub asset: String,
    pub value: Decimal,
    pub share: Decimal,
}

/// Realized P&L over a lookback window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PnlPeriod {
    Day,
    Week,
    Month,
    All,
}

impl PnlPeriod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "24h" => Some(PnlPeriod::Day),
            "7d" => Some(PnlPeriod::Week),
            "30d" => Some(PnlPeriod::Month),
            "all" => Some(PnlPeriod::All),
            _ => None,
        }
    }

    fn cutoff(&self, now: i64) -> i64 {
        const DAY_MS: i64 = 86_400_000;
        match self {
            PnlPeriod::Day => now - DAY_MS,
            PnlPeriod::Week => now - 7 * DAY_MS,
            PnlPeriod::Month => now - 30 * DAY_MS,
            PnlPeriod::All => i64::MIN,
        }
    }
}

pub struct PositionManager {
    positions: DashMap<PositionKey, Arc<Mutex<Position>>>,
}

impl PositionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { positions: DashMap::new() })
    }

    /// Fold an executed fill into the keyed position. Returns the realized
    /// P&L (zero for buys).
    pub fn update_position_from_trade(
        &self,
        user_id: &UserId,
        exchange: Venue,
        asset: &str,
        fill: &TradeFill,
    ) -> Result<Decimal> {
        let key = PositionKey::new(user_id.clone(), exchange, asset);
        let slot = self.slot(&key);
        let mut position = slot.lock();
        let realized = match fill.side {
            OrderSide::Buy => {
                position.apply_buy(fill.amount, fill.price, fill.fee, fill.ts);
                Decimal::ZERO
            }
            OrderSide::Sell => position.apply_sell(fill.amount, fill.price, fill.fee, fill.ts)?,
        };
        debug!(key = %key, side = fill.side.as_str(), amount = %fill.amount, "position updated");
        Ok(realized)
    }

    pub fn get(&self, key: &PositionKey) -> Option<Position> {
        self.positions.get(key).map(|slot| slot.lock().clone())
    }

    pub fn lock_amount(&self, key: &PositionKey, amount: Decimal) -> Result<()> {
        let slot = self
            .positions
            .get(key)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| TradingError::NotFound { entity: "position", key: key.to_string() })?;
        let mut position = slot.lock();
        position.lock(amount).map_err(Into::into)
    }

    pub fn unlock_amount(&self, key: &PositionKey, amount: Decimal) -> Result<()> {
        let slot = self
            .positions
            .get(key)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| TradingError::NotFound { entity: "position", key: key.to_string() })?;
        let mut position = slot.lock();
        position.unlock(amount).map_err(Into::into)
    }

    /// Mark one position to market
    pub fn update_unrealized(&self, key: &PositionKey, price: Decimal) {
        if let Some(slot) = self.positions.get(key) {
            slot.lock().update_unrealized(price);
        }
    }

    /// All of a user's positions with their keys
    pub fn user_positions(&self, user_id: &UserId) -> Vec<(PositionKey, Position)> {
        self.positions
            .iter()
            .filter(|e| &e.key().user_id == user_id)
            .map(|e| (e.key().clone(), e.value().lock().clone()))
            .collect()
    }

    /// Portfolio rollup at last marked prices
    pub fn portfolio_summary(&self, user_id: &UserId) -> PortfolioSummary {
        let mut summary = PortfolioSummary::default();
        for (_, position) in self.user_positions(user_id) {
            summary.total_cost += position.total_cost;
            summary.total_value += position.total_cost + position.unrealized_pnl;
            summary.realized_pnl += position.realized_pnl;
            summary.unrealized_pnl += position.unrealized_pnl;
            summary.total_fees += position.total_fees;
            summary.position_count += 1;
        }
        summary
    }

    /// Value share per asset. Assets with zero value are omitted.
    pub fn allocation(&self, user_id: &UserId) -> Vec<AllocationSlice> {
        let positions = self.user_positions(user_id);
        let total: Decimal = positions
            .iter()
            .map(|(_, p)| p.total_cost + p.unrealized_pnl)
            .sum();
        let mut slices: Vec<AllocationSlice> = positions
            .into_iter()
            .filter_map(|(key, p)| {
                let value = p.total_cost + p.unrealized_pnl;
                if value <= Decimal::ZERO {
                    return None;
                }
                let share = if total > Decimal::ZERO { value / total } else { Decimal::ZERO };
                Some(AllocationSlice { asset: key.asset, value, share })
            })
            .collect();
        slices.sort_by(|a, b| b.value.cmp(&a.value));
        slices
    }

    /// Realized P&L and trade counts within a lookback window
    pub fn pnl_report(&self, user_id: &UserId, period: PnlPeriod) -> serde_json::Value {
        let now = chrono::Utc::now().timestamp_millis();
        let cutoff = period.cutoff(now);
        let mut realized = Decimal::ZERO;
        let mut fees = Decimal::ZERO;
        let mut trades = 0usize;
        for (_, position) in self.user_positions(user_id) {
            for trade in &position.trades {
                if trade.ts >= cutoff {
                    realized += trade.realized_pnl;
                    fees += trade.fee;
                    trades += 1;
                }
            }
        }
        json!({
            "realized_pnl": realized,
            "fees": fees,
            "trades": trades,
            "from": if cutoff == i64::MIN { json!(null) } else { json!(cutoff) },
            "to": now,
        })
    }

    /// Trade value currently deployed, for the risk exposure checks
    pub fn total_exposure(&self, user_id: &UserId) -> Decimal {
        self.user_positions(user_id)
            .iter()
            .map(|(_, p)| p.total_cost + p.unrealized_pnl)
            .sum()
    }

    fn slot(&self, key: &PositionKey) -> Arc<Mutex<Position>> {
        self.positions
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Position::new(chrono::Utc::now().timestamp_millis())))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fill(side: OrderSide, amount: Decimal, price: Decimal, fee: Decimal, ts: i64) -> TradeFill {
        TradeFill {
            trade_id: ts.to_string(),
            price,
            amount,
            fee,
            side,
            ts,
        }
    }

    #[test]
    fn spec_scenario_realizes_expected_pnl() {
        let manager = PositionManager::new();
        let user = "u1".to_string();

        manager
            .update_position_from_trade(&user, Venue::Kraken, "BTC", &fill(OrderSide::Buy, dec!(1), dec!(50000), dec!(10), 1))
            .unwrap();
        manager
            .update_position_from_trade(&user, Venue::Kraken, "BTC", &fill(OrderSide::Buy, dec!(1), dec!(60000), dec!(12), 2))
            .unwrap();
        let realized = manager
            .update_position_from_trade(&user, Venue::Kraken, "BTC", &fill(OrderSide::Sell, dec!(1), dec!(70000), dec!(15), 3))
            .unwrap();

        assert_eq!(realized, dec!(14974));
        let key = PositionKey::new("u1", Venue::Kraken, "BTC");
        let position = manager.get(&key).unwrap();
        assert_eq!(position.total_amount, dec!(1));
        assert_eq!(position.average_entry_price, dec!(55011));
        assert_eq!(position.total_fees, dec!(37));
    }

    #[test]
    fn keys_isolate_users_and_venues() {
        let manager = PositionManager::new();
        manager
            .update_position_from_trade(&"a".to_string(), Venue::Kraken, "BTC", &fill(OrderSide::Buy, dec!(1), dec!(100), dec!(0), 1))
            .unwrap();
        manager
            .update_position_from_trade(&"a".to_string(), Venue::Binance, "BTC", &fill(OrderSide::Buy, dec!(2), dec!(100), dec!(0), 1))
            .unwrap();
        manager
            .update_position_from_trade(&"b".to_string(), Venue::Kraken, "BTC", &fill(OrderSide::Buy, dec!(3), dec!(100), dec!(0), 1))
            .unwrap();

        let a_kraken = manager.get(&PositionKey::new("a", Venue::Kraken, "BTC")).unwrap();
        assert_eq!(a_kraken.total_amount, dec!(1));
        assert_eq!(manager.user_positions(&"a".to_string()).len(), 2);
        assert_eq!(manager.user_positions(&"b".to_string()).len(), 1);
    }

    #[test]
    fn allocation_shares_sum_to_one() {
        let manager = PositionManager::new();
        let user = "u1".to_string();
        manager
            .update_position_from_trade(&user, Venue::Kraken, "BTC", &fill(OrderSide::Buy, dec!(1), dec!(300), dec!(0), 1))
            .unwrap();
        manager
            .update_position_from_trade(&user, Venue::Kraken, "ETH", &fill(OrderSide::Buy, dec!(1), dec!(100), dec!(0), 1))
            .unwrap();

        let allocation = manager.allocation(&user);
        assert_eq!(allocation.len(), 2);
        assert_eq!(allocation[0].asset, "BTC");
        assert_eq!(allocation[0].share, dec!(0.75));
        let total: Decimal = allocation.iter().map(|s| s.share).sum();
        assert_eq!(total, Decimal::ONE);
    }

    #[test]
    fn pnl_report_filters_by_window() {
        let manager = PositionManager::new();
        let user = "u1".to_string();
        let now = chrono::Utc::now().timestamp_millis();
        let old = now - 40 * 86_400_000;

        manager
            .update_position_from_trade(&user, Venue::Kraken, "BTC", &fill(OrderSide::Buy, dec!(2), dec!(100), dec!(0), old))
            .unwrap();
        manager
            .update_position_from_trade(&user, Venue::Kraken, "BTC", &fill(OrderSide::Sell, dec!(1), dec!(150), dec!(0), old))
            .unwrap();
        manager
            .update_position_from_trade(&user, Venue::Kraken, "BTC", &fill(OrderSide::Sell, dec!(1), dec!(180), dec!(1), now))
            .unwrap();

        let day = manager.pnl_report(&user, PnlPeriod::Day);
        assert_eq!(day["trades"], 1);
        assert_eq!(day["realized_pnl"], json!("79"));

        let all = manager.pnl_report(&user, PnlPeriod::All);
        assert_eq!(all["trades"], 3);
    }

    #[test]
    fn lock_unlock_round_trip() {
        let manager = PositionManager::new();
        let user = "u1".to_string();
        manager
            .update_position_from_trade(&user, Venue::Kraken, "BTC", &fill(OrderSide::Buy, dec!(5), dec!(10), dec!(0), 1))
            .unwrap();
        let key = PositionKey::new("u1", Venue::Kraken, "BTC");

        manager.lock_amount(&key, dec!(3)).unwrap();
        let position = manager.get(&key).unwrap();
        assert_eq!(position.locked_amount, dec!(3));
        assert_eq!(position.available_amount, dec!(2));

        assert!(manager.lock_amount(&key, dec!(3)).is_err());
        manager.unlock_amount(&key, dec!(3)).unwrap();
        assert!(manager.unlock_amount(&key, dec!(1)).is_err());

        // unknown key is a NotFound, not a new position
        let missing = PositionKey::new("u1", Venue::Kraken, "DOGE");
        assert!(matches!(
            manager.lock_amount(&missing, dec!(1)),
            Err(TradingError::NotFound { .. })
        ));
    }
}
