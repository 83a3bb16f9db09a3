//! The coordinator wires strategy signals through risk into orders, and fills
//! back into positions, entirely over the event bus. It holds capability
//! handles to its collaborators and nothing holds a reference back.

use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{info, warn};

use vela_bus::{events, EventBus, PublishOptions, SubscribeOptions};
use vela_types::{Order, OrderSide, OrderType, Pair, SignalAction, TimeInForce, UserId, Venue};

use crate::orders::{OrderManager, OrderRequest};
use crate::positions::PositionManager;
use crate::risk::{PortfolioSnapshot, RiskManager, TradeIntent};
use crate::strategy::StrategyScheduler;

/// Seed equity assumed for users until account data says otherwise
const DEFAULT_INITIAL_EQUITY: Decimal = rust_decimal_macros::dec!(10000);

pub struct TradingCoordinator {
    bus: Arc<EventBus>,
    scheduler: Arc<StrategyScheduler>,
    risk: Arc<RiskManager>,
    orders: Arc<OrderManager>,
    positions: Arc<PositionManager>,
    /// Initial equity per user, fed by the account layer
    equity: DashMap<UserId, Decimal>,
}

impl TradingCoordinator {
    pub fn new(
        bus: Arc<EventBus>,
        scheduler: Arc<StrategyScheduler>,
        risk: Arc<RiskManager>,
        orders: Arc<OrderManager>,
        positions: Arc<PositionManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            scheduler,
            risk,
            orders,
            positions,
            equity: DashMap::new(),
        })
    }

    pub fn set_initial_equity(&self, user_id: &UserId, equity: Decimal) {
        self.equity.insert(user_id.clone(), equity);
    }

    /// Subscribe the wiring handlers on the bus
    pub fn attach(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let signal_handler: vela_bus::EventHandler = Arc::new(move |event| {
            let this = Arc::clone(&this);
            Box::pin(async move {
                this.on_strategy_signal(event.data.as_ref()).await;
                Ok(())
            })
        });
        self.bus.subscribe(
            events::STRATEGY_SIGNAL,
            signal_handler,
            SubscribeOptions::default(),
        );

        let this = Arc::clone(self);
        let fill_handler: vela_bus::EventHandler = Arc::new(move |event| {
            let this = Arc::clone(&this);
            Box::pin(async move {
                this.on_order_filled(event.data.as_ref()).await;
                Ok(())
            })
        });
        self.bus.subscribe(
            events::ORDER_FILLED,
            fill_handler,
            SubscribeOptions::default(),
        );

        let this = Arc::clone(self);
        let breaker_handler: vela_bus::EventHandler = Arc::new(move |event| {
            let this = Arc::clone(&this);
            Box::pin(async move {
                this.on_circuit_breaker(event.data.as_ref()).await;
                Ok(())
            })
        });
        self.bus.subscribe(
            events::CIRCUIT_BREAKER_TRIGGERED,
            breaker_handler,
            SubscribeOptions::default(),
        );
        info!("trading coordinator attached");
    }

    /// strategySignal → risk gate → order
    async fn on_strategy_signal(&self, data: &Value) {
        let Some(parsed) = ParsedSignal::from_payload(data) else {
            warn!("malformed strategy signal payload");
            return;
        };

        let portfolio = self.portfolio_snapshot(&parsed.user_id, &parsed.pair);
        let amount = normalize_amount(parsed.amount, parsed.price, &portfolio);
        let intent = TradeIntent {
            pair: parsed.pair.clone(),
            exchange: parsed.exchange,
            side: parsed.side,
            amount,
            price: parsed.price,
            expected_price: None,
            market_price: None,
        };

        let outcome = self.risk.check_trade(&parsed.user_id, &intent, &portfolio).await;
        if !outcome.allowed {
            self.bus
                .publish(
                    events::SIGNAL_BLOCKED,
                    json!({
                        "signal": data,
                        "reason": outcome.failed_checks.join(", "),
                    }),
                    PublishOptions::default(),
                )
                .await;
            return;
        }

        let request = OrderRequest {
            user_id: parsed.user_id.clone(),
            exchange: parsed.exchange,
            pair: parsed.pair,
            order_type: OrderType::Limit,
            side: parsed.side,
            amount,
            price: Some(parsed.price),
            stop_price: None,
            time_in_force: TimeInForce::GoodTilCancelled,
            strategy_id: Some(parsed.strategy_id),
        };
        match self.orders.create_order(request).await {
            Ok((order, _report)) => {
                info!(order = %order.id, user = %order.user_id, "signal converted to order");
            }
            Err(e) => {
                warn!(error = %e, "order creation from signal failed");
                self.bus
                    .publish(
                        events::SIGNAL_BLOCKED,
                        json!({ "signal": data, "reason": e.to_string() }),
                        PublishOptions::default(),
                    )
                    .await;
            }
        }
    }

    /// orderFilled → position update + strategy attribution + orderCompleted
    async fn on_order_filled(&self, data: &Value) {
        let Some(order) = data
            .get("order")
            .and_then(|o| serde_json::from_value::<Order>(o.clone()).ok())
        else {
            warn!("malformed orderFilled payload");
            return;
        };
        let Some(fill) = order.trades.last() else {
            return;
        };

        let realized = match self.positions.update_position_from_trade(
            &order.user_id,
            order.exchange,
            order.pair.base(),
            fill,
        ) {
            Ok(realized) => realized,
            Err(e) => {
                warn!(order = %order.id, error = %e, "position update failed");
                Decimal::ZERO
            }
        };

        if let Some(strategy_id) = &order.strategy_id {
            if let Err(e) = self
                .scheduler
                .record_trade(strategy_id, fill.ts, realized)
                .await
            {
                warn!(strategy = %strategy_id, error = %e, "trade attribution failed");
            }
        }

        self.bus
            .publish(
                events::ORDER_COMPLETED,
                json!({
                    "order": order,
                    "user_id": order.user_id,
                    "realized_pnl": realized,
                    "ts": fill.ts,
                }),
                PublishOptions::default(),
            )
            .await;
    }

    /// circuitBreakerTriggered → halt the user's automation
    async fn on_circuit_breaker(&self, data: &Value) {
        let Some(user_id) = data.get("user_id").and_then(Value::as_str) else {
            return;
        };
        let user_id = user_id.to_string();

        let active = self
            .scheduler
            .user_strategies(&user_id, vela_types::StrategyStatus::Active)
            .await;
        for id in &active {
            if let Err(e) = self.scheduler.deactivate(id).await {
                warn!(strategy = %id, error = %e, "deactivation failed");
            }
        }
        let cancelled = self.orders.cancel_all_for_user(&user_id).await;
        info!(
            user = %user_id,
            strategies = active.len(),
            orders = cancelled,
            "user automation halted by circuit breaker"
        );
    }

    /// Assemble the risk manager's view of the user's portfolio
    fn portfolio_snapshot(&self, user_id: &UserId, pair: &Pair) -> PortfolioSnapshot {
        let initial_equity = self
            .equity
            .get(user_id)
            .map(|e| *e)
            .unwrap_or(DEFAULT_INITIAL_EQUITY);
        let summary = self.positions.portfolio_summary(user_id);
        let equity = initial_equity + summary.realized_pnl + summary.unrealized_pnl;
        // Concentration counts the asset across every venue it is held on.
        let asset_value = self
            .positions
            .user_positions(user_id)
            .into_iter()
            .filter(|(key, _)| key.asset == pair.base())
            .map(|(_, p)| p.total_cost + p.unrealized_pnl)
            .sum();
        PortfolioSnapshot {
            total_value: equity.max(Decimal::ZERO),
            current_exposure: self.positions.total_exposure(user_id),
            asset_value,
            equity,
            initial_equity,
        }
    }
}

struct ParsedSignal {
    strategy_id: String,
    user_id: UserId,
    pair: Pair,
    exchange: Venue,
    side: OrderSide,
    price: Decimal,
    amount: Decimal,
}

impl ParsedSignal {
    fn from_payload(data: &Value) -> Option<Self> {
        let signal = data.get("signal")?;
        let action: SignalAction =
            serde_json::from_value(signal.get("action")?.clone()).ok()?;
        let side = match action {
            SignalAction::Buy => OrderSide::Buy,
            SignalAction::Sell => OrderSide::Sell,
            SignalAction::Hold => return None,
        };
        Some(Self {
            strategy_id: data.get("strategy_id")?.as_str()?.to_string(),
            user_id: data.get("user_id")?.as_str()?.to_string(),
            pair: Pair::parse(data.get("pair")?.as_str()?).ok()?,
            exchange: serde_json::from_value(data.get("exchange")?.clone()).ok()?,
            side,
            price: serde_json::from_value(signal.get("price")?.clone()).ok()?,
            amount: serde_json::from_value(signal.get("amount")?.clone()).ok()?,
        })
    }
}

/// Amounts in (0, 1] are a fraction of portfolio value; convert to units
fn normalize_amount(amount: Decimal, price: Decimal, portfolio: &PortfolioSnapshot) -> Decimal {
    if amount > Decimal::ZERO && amount <= Decimal::ONE && price > Decimal::ZERO {
        (portfolio.total_value * amount) / price
    } else {
        amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fractional_amounts_become_units() {
        let portfolio = PortfolioSnapshot {
            total_value: dec!(10000),
            current_exposure: Decimal::ZERO,
            asset_value: Decimal::ZERO,
            equity: dec!(10000),
            initial_equity: dec!(10000),
        };
        // 10% of 10k at price 100 → 10 units
        assert_eq!(normalize_amount(dec!(0.1), dec!(100), &portfolio), dec!(10));
        // amounts above 1 are taken literally
        assert_eq!(normalize_amount(dec!(5), dec!(100), &portfolio), dec!(5));
    }

    #[test]
    fn signal_payload_parses() {
        let payload = json!({
            "strategy_id": "s1",
            "user_id": "u1",
            "pair": "BTC/USD",
            "exchange": "kraken",
            "signal": { "action": "buy", "price": "50000", "amount": "0.1" },
            "ts": 1,
        });
        let parsed = ParsedSignal::from_payload(&payload).unwrap();
        assert_eq!(parsed.side, OrderSide::Buy);
        assert_eq!(parsed.price, dec!(50000));
    }

    #[test]
    fn hold_signals_are_dropped() {
        let payload = json!({
            "strategy_id": "s1",
            "user_id": "u1",
            "pair": "BTC/USD",
            "exchange": "kraken",
            "signal": { "action": "hold", "price": "1", "amount": "0" },
        });
        assert!(ParsedSignal::from_payload(&payload).is_none());
    }
}
