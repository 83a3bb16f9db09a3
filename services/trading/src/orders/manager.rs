//! Order lifecycle management.
//!
//! Creation validates, persists to the TTL cache, enqueues and emits
//! `orderCreated`. A single worker drains the queue in series, which keeps
//! submissions per user serialized: it opens the order, hands it to the venue
//! executor (real or simulated) and folds the resulting fills back in.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use vela_bus::{events, EventBus, PublishOptions};
use vela_storage::{Cache, TRADING_STATE_TTL};
use vela_types::{Order, OrderSide, OrderStatus, Pair, TradeFill, UserId};

use super::{OrderRequest, OrderUpdate, OrderValidator, ValidationReport};
use crate::config::OrderLimits;
use crate::{Result, TradingError};

/// Venue-side execution of an opened order
#[async_trait]
pub trait VenueExecutor: Send + Sync {
    /// Submit the order; returns the fills produced (possibly partial).
    /// An error rejects the order.
    async fn submit(&self, order: &Order) -> Result<Vec<TradeFill>>;
}

/// Paper executor: fills the full amount at the limit price (or the provided
/// reference price for market orders) with a proportional taker fee.
pub struct SimulatedExecutor {
    pub taker_fee: Decimal,
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self { taker_fee: rust_decimal_macros::dec!(0.002) }
    }
}

#[async_trait]
impl VenueExecutor for SimulatedExecutor {
    async fn submit(&self, order: &Order) -> Result<Vec<TradeFill>> {
        let Some(price) = order.price else {
            return Err(TradingError::Validation(vec![
                "simulated execution requires a reference price".to_string(),
            ]));
        };
        Ok(vec![TradeFill {
            trade_id: Uuid::new_v4().to_string(),
            price,
            amount: order.amount,
            fee: order.amount * price * self.taker_fee,
            side: order.side,
            ts: chrono::Utc::now().timestamp_millis(),
        }])
    }
}

/// Filters for listing a user's orders
#[derive(Debug, Clone, Default)]
pub struct UserOrderFilter {
    pub status: Option<OrderStatus>,
    pub pair: Option<Pair>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub limit: Option<usize>,
}

/// Aggregate order statistics for one user
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OrderStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub total_volume: Decimal,
    pub total_fees: Decimal,
}

pub struct OrderManager {
    validator: OrderValidator,
    bus: Arc<EventBus>,
    cache: Arc<dyn Cache>,
    executor: Arc<dyn VenueExecutor>,
    orders: DashMap<Uuid, Order>,
    queue_tx: mpsc::Sender<Uuid>,
    queue_rx: parking_lot::Mutex<Option<mpsc::Receiver<Uuid>>>,
}

impl OrderManager {
    pub fn new(
        limits: OrderLimits,
        bus: Arc<EventBus>,
        cache: Arc<dyn Cache>,
        executor: Arc<dyn VenueExecutor>,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(1024);
        Arc::new(Self {
            validator: OrderValidator::new(limits),
            bus,
            cache,
            executor,
            orders: DashMap::new(),
            queue_tx,
            queue_rx: parking_lot::Mutex::new(Some(queue_rx)),
        })
    }

    /// Start the single-worker queue processor
    pub fn run(self: &Arc<Self>) {
        let Some(mut queue) = self.queue_rx.lock().take() else {
            warn!("order processor already running");
            return;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(order_id) = queue.recv().await {
                this.process(order_id).await;
            }
            info!("order processor stopped");
        });
    }

    /// Validate, persist and enqueue a new order
    pub async fn create_order(&self, request: OrderRequest) -> Result<(Order, ValidationReport)> {
        let report = self.validator.validate(&request)?;
        let now = chrono::Utc::now().timestamp_millis();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            exchange: request.exchange,
            pair: request.pair.clone(),
            order_type: request.order_type,
            side: request.side,
            amount: request.amount,
            price: request.price,
            stop_price: request.stop_price,
            time_in_force: request.time_in_force,
            status: OrderStatus::Pending,
            filled_amount: Decimal::ZERO,
            remaining_amount: request.amount,
            average_price: None,
            fee: Decimal::ZERO,
            fee_currency: request.pair.quote().to_string(),
            strategy_id: request.strategy_id,
            trades: Vec::new(),
            created_at: now,
            updated_at: now,
            filled_at: None,
            cancelled_at: None,
            external_id: None,
        };

        self.orders.insert(order.id, order.clone());
        self.persist(&order).await;
        if self.queue_tx.send(order.id).await.is_err() {
            error!(order = %order.id, "order queue closed");
        }
        self.emit(events::ORDER_CREATED, &order).await;
        info!(order = %order.id, side = order.side.as_str(), pair = %order.pair, "order created");
        Ok((order, report))
    }

    pub fn get_order(&self, id: Uuid, user_id: &UserId) -> Result<Order> {
        let order = self
            .orders
            .get(&id)
            .map(|o| o.clone())
            .ok_or_else(|| TradingError::NotFound { entity: "order", key: id.to_string() })?;
        if &order.user_id != user_id {
            return Err(TradingError::Forbidden { entity: "order", key: id.to_string() });
        }
        Ok(order)
    }

    pub fn get_user_orders(&self, user_id: &UserId, filter: &UserOrderFilter) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| {
                let o = entry.value();
                &o.user_id == user_id
                    && filter.status.map_or(true, |s| o.status == s)
                    && filter.pair.as_ref().map_or(true, |p| &o.pair == p)
                    && filter.from.map_or(true, |f| o.created_at >= f)
                    && filter.to.map_or(true, |t| o.created_at <= t)
            })
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by_key(|o| std::cmp::Reverse(o.created_at));
        if let Some(limit) = filter.limit {
            orders.truncate(limit);
        }
        orders
    }

    /// Amend amount/price within validator rules
    pub async fn update_order(
        &self,
        id: Uuid,
        user_id: &UserId,
        update: OrderUpdate,
    ) -> Result<Order> {
        let mut entry = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| TradingError::NotFound { entity: "order", key: id.to_string() })?;
        if &entry.user_id != user_id {
            return Err(TradingError::Forbidden { entity: "order", key: id.to_string() });
        }
        self.validator.validate_update(&entry, &update)?;

        if let Some(amount) = update.amount {
            entry.amount = amount;
            entry.remaining_amount = amount - entry.filled_amount;
        }
        if let Some(price) = update.price {
            entry.price = Some(price);
        }
        entry.updated_at = chrono::Utc::now().timestamp_millis();
        let order = entry.clone();
        drop(entry);
        self.persist(&order).await;
        Ok(order)
    }

    pub async fn cancel_order(&self, id: Uuid, user_id: &UserId) -> Result<Order> {
        let order = {
            let mut entry = self
                .orders
                .get_mut(&id)
                .ok_or_else(|| TradingError::NotFound { entity: "order", key: id.to_string() })?;
            if &entry.user_id != user_id {
                return Err(TradingError::Forbidden { entity: "order", key: id.to_string() });
            }
            if !entry.can_cancel() {
                return Err(TradingError::Conflict(format!(
                    "order {} is {} and cannot be cancelled",
                    id,
                    entry.status.as_str()
                )));
            }
            entry.transition(OrderStatus::Cancelled, chrono::Utc::now().timestamp_millis())?;
            entry.clone()
        };
        self.persist(&order).await;
        self.emit(events::ORDER_CANCELLED, &order).await;
        info!(order = %id, "order cancelled");
        Ok(order)
    }

    /// Cancel everything still cancellable for a user. Returns the count.
    pub async fn cancel_all_for_user(&self, user_id: &UserId) -> usize {
        let ids: Vec<Uuid> = self
            .orders
            .iter()
            .filter(|e| &e.value().user_id == user_id && e.value().can_cancel())
            .map(|e| *e.key())
            .collect();
        let mut cancelled = 0;
        for id in ids {
            if self.cancel_order(id, user_id).await.is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn get_order_stats(&self, user_id: &UserId) -> OrderStats {
        let mut stats = OrderStats::default();
        for entry in self.orders.iter() {
            let o = entry.value();
            if &o.user_id != user_id {
                continue;
            }
            stats.total += 1;
            *stats.by_status.entry(o.status.as_str().to_string()).or_default() += 1;
            if let Some(avg) = o.average_price {
                stats.total_volume += o.filled_amount * avg;
            }
            stats.total_fees += o.fee;
        }
        stats
    }

    /// Queue worker body: open, submit, account fills
    async fn process(&self, id: Uuid) {
        let now = chrono::Utc::now().timestamp_millis();

        let opened = {
            let Some(mut entry) = self.orders.get_mut(&id) else {
                return;
            };
            // Cancelled while queued: nothing to do.
            if entry.status != OrderStatus::Pending {
                return;
            }
            if entry.transition(OrderStatus::Open, now).is_err() {
                return;
            }
            entry.clone()
        };
        self.persist(&opened).await;
        self.emit(events::ORDER_OPENED, &opened).await;

        match self.executor.submit(&opened).await {
            Ok(fills) => {
                for fill in fills {
                    self.apply_fill(id, fill).await;
                }
            }
            Err(e) => {
                warn!(order = %id, error = %e, "submission failed");
                let rejected = {
                    let Some(mut entry) = self.orders.get_mut(&id) else {
                        return;
                    };
                    let _ = entry.transition(OrderStatus::Rejected, now);
                    entry.clone()
                };
                self.persist(&rejected).await;
                self.emit(events::ORDER_REJECTED, &rejected).await;
            }
        }
    }

    /// Fold one fill into the order, moving it to partial or filled
    pub async fn apply_fill(&self, id: Uuid, fill: TradeFill) {
        let now = chrono::Utc::now().timestamp_millis();
        let (order, event) = {
            let Some(mut entry) = self.orders.get_mut(&id) else {
                return;
            };
            entry.apply_fill(fill, now);
            let event = if entry.is_fully_filled() {
                if entry.transition(OrderStatus::Filled, now).is_err() {
                    return;
                }
                events::ORDER_FILLED
            } else {
                if entry.status == OrderStatus::Open
                    && entry.transition(OrderStatus::Partial, now).is_err()
                {
                    return;
                }
                events::ORDER_PARTIALLY_FILLED
            };
            (entry.clone(), event)
        };
        self.persist(&order).await;
        self.emit(event, &order).await;
    }

    async fn persist(&self, order: &Order) {
        let key = format!("order:{}", order.id);
        match serde_json::to_value(order) {
            Ok(value) => {
                if let Err(e) = self.cache.set(&key, value, TRADING_STATE_TTL).await {
                    warn!(order = %order.id, error = %e, "cache write failed");
                }
            }
            Err(e) => warn!(order = %order.id, error = %e, "order serialization failed"),
        }
    }

    async fn emit(&self, event: &str, order: &Order) {
        let payload = json!({
            "order": order,
            "user_id": order.user_id,
            "ts": order.updated_at,
        });
        self.bus.publish(event, payload, PublishOptions::default()).await;
    }
}
