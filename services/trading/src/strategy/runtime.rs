//! Strategy scheduler: owns the registered strategies, ticks the active set
//! on a fixed cadence, and emits their signals on the event bus.
//!
//! Ticks are non-reentrant: a tick that arrives while the previous one is
//! still running is dropped, guarded by a real mutex rather than a flag.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local};
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info};

use vela_bus::{events, EventBus, PublishOptions};
use vela_storage::CandleStore;
use vela_types::{
    Candle, Pair, Signal, StrategyRecord, StrategyStatus, Timeframe, UserId, Venue,
};

use crate::config::SchedulerConfig;
use crate::strategy::{MarketCtx, Strategy, StrategyFactory};
use crate::{Result, TradingError};

const MAX_RETAINED_SIGNALS: usize = 100;

/// Provides the market context strategies evaluate against. The live
/// implementation reads stored candles plus the aggregator's current price;
/// tests substitute synthetic snapshots.
pub trait MarketSnapshotSource: Send + Sync {
    fn context(&self, pair: &Pair, exchange: Venue, window: usize) -> Option<MarketCtx>;
}

/// Live source: recent stored candles with the aggregated price patched in
/// as the current close.
pub struct StoreSnapshotSource {
    store: Arc<CandleStore>,
    aggregator: vela_market_data::AggregatorHandle,
    timeframe: Timeframe,
}

impl StoreSnapshotSource {
    pub fn new(
        store: Arc<CandleStore>,
        aggregator: vela_market_data::AggregatorHandle,
        timeframe: Timeframe,
    ) -> Self {
        Self { store, aggregator, timeframe }
    }
}

impl MarketSnapshotSource for StoreSnapshotSource {
    fn context(&self, pair: &Pair, _exchange: Venue, window: usize) -> Option<MarketCtx> {
        let now = chrono::Utc::now().timestamp_millis();
        let from = now - self.timeframe.millis() * (window as i64 + 1);
        let mut candles = self.store.read_range(pair, self.timeframe, from, now).ok()?;
        if candles.len() > window {
            candles.drain(..candles.len() - window);
        }

        // Patch the live price in as a synthetic current candle.
        if let Some(price) = self.aggregator.latest_price(pair) {
            let last_ts = candles.last().map(|c| c.timestamp).unwrap_or(now - 1);
            candles.push(Candle {
                timestamp: last_ts.max(now - 1) + 1,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: rust_decimal::Decimal::ZERO,
            });
        }
        MarketCtx::from_candles(pair.clone(), &candles)
    }
}

struct StrategySlot {
    record: StrategyRecord,
    /// Present while the strategy is active or paused
    instance: Option<Box<dyn Strategy>>,
}

/// Owns strategy instances and drives them on a periodic tick
pub struct StrategyScheduler {
    config: SchedulerConfig,
    bus: Arc<EventBus>,
    source: Arc<dyn MarketSnapshotSource>,
    slots: DashMap<String, Arc<Mutex<StrategySlot>>>,
    tick_guard: Mutex<()>,
    shutdown: watch::Sender<bool>,
}

impl StrategyScheduler {
    pub fn new(
        config: SchedulerConfig,
        bus: Arc<EventBus>,
        source: Arc<dyn MarketSnapshotSource>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            bus,
            source,
            slots: DashMap::new(),
            tick_guard: Mutex::new(()),
            shutdown,
        })
    }

    /// Register a strategy definition (inactive until activated)
    pub fn register(&self, record: StrategyRecord) {
        info!(strategy = %record.id, kind = record.kind.as_str(), "strategy registered");
        self.slots.insert(
            record.id.clone(),
            Arc::new(Mutex::new(StrategySlot { record, instance: None })),
        );
    }

    pub async fn activate(&self, id: &str) -> Result<()> {
        let slot = self.slot(id)?;
        let mut slot = slot.lock().await;
        self.transition(&mut slot.record, StrategyStatus::Active)?;
        if slot.instance.is_none() {
            let instance = StrategyFactory::build(slot.record.kind, &slot.record.params)?;
            slot.instance = Some(instance);
        }
        slot.record.error = None;
        Ok(())
    }

    pub async fn pause(&self, id: &str) -> Result<()> {
        let slot = self.slot(id)?;
        let mut slot = slot.lock().await;
        self.transition(&mut slot.record, StrategyStatus::Paused)
    }

    pub async fn deactivate(&self, id: &str) -> Result<()> {
        let slot = self.slot(id)?;
        let mut slot = slot.lock().await;
        self.transition(&mut slot.record, StrategyStatus::Inactive)?;
        slot.instance = None;
        Ok(())
    }

    /// All strategy ids belonging to `user_id` in the given status
    pub async fn user_strategies(&self, user_id: &UserId, status: StrategyStatus) -> Vec<String> {
        // Snapshot the slots first; a shard guard must not span an await.
        let slots: Vec<Arc<Mutex<StrategySlot>>> =
            self.slots.iter().map(|e| Arc::clone(e.value())).collect();
        let mut ids = Vec::new();
        for slot in slots {
            let slot = slot.lock().await;
            if &slot.record.user_id == user_id && slot.record.status == status {
                ids.push(slot.record.id.clone());
            }
        }
        ids
    }

    pub async fn record(&self, id: &str) -> Result<StrategyRecord> {
        let slot = self.slot(id)?;
        let slot = slot.lock().await;
        Ok(slot.record.clone())
    }

    /// Attribute an executed trade to a strategy (called on fills)
    pub async fn record_trade(&self, id: &str, ts: i64, pnl: rust_decimal::Decimal) -> Result<()> {
        let slot = self.slot(id)?;
        let mut slot = slot.lock().await;
        slot.record.trade_times.push(ts);
        let perf = &mut slot.record.performance;
        perf.total_trades += 1;
        perf.total_pnl += pnl;
        if pnl > rust_decimal::Decimal::ZERO {
            perf.winning_trades += 1;
        } else if pnl < rust_decimal::Decimal::ZERO {
            perf.losing_trades += 1;
        }
        Ok(())
    }

    /// Start the periodic tick loop
    pub fn run(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(this.config.tick_interval_ms));
            loop {
                tokio::select! {
                    _ = interval.tick() => this.tick().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("strategy scheduler stopping");
                            return;
                        }
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// One evaluation pass over every active strategy. Overlapping calls are
    /// dropped, never queued.
    pub async fn tick(&self) {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            debug!("tick dropped: previous still running");
            return;
        };

        let ids: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let Some(slot) = self.slots.get(&id).map(|s| Arc::clone(s.value())) else {
                continue;
            };
            let mut slot = slot.lock().await;
            if slot.record.status != StrategyStatus::Active {
                continue;
            }

            let now = chrono::Utc::now().timestamp_millis();
            if self.daily_trades(&slot.record, now) >= self.config.max_daily_trades_per_strategy {
                debug!(strategy = %id, "daily trade limit reached");
                continue;
            }

            let Some(ctx) = self.source.context(
                &slot.record.pair,
                slot.record.exchange,
                self.config.context_window,
            ) else {
                debug!(strategy = %id, "no market context available");
                continue;
            };

            let Some(instance) = slot.instance.as_mut() else {
                continue;
            };
            match instance.generate_signal(&ctx) {
                Ok(signal) => {
                    slot.record.last_run_at = Some(now);
                    push_signal(&mut slot.record, signal.clone());
                    if signal.is_actionable() {
                        self.emit_signal(&slot.record, signal, now).await;
                    }
                }
                Err(e) => {
                    // Isolate the failure: this strategy goes to error state,
                    // the rest of the pass continues.
                    error!(strategy = %id, error = %e, "strategy execution failed");
                    slot.record.status = StrategyStatus::Error;
                    slot.record.error = Some(e.to_string());
                }
            }
        }
    }

    async fn emit_signal(&self, record: &StrategyRecord, signal: Signal, now: i64) {
        let payload = json!({
            "strategy_id": record.id,
            "user_id": record.user_id,
            "signal": signal,
            "pair": record.pair.canonical(),
            "exchange": record.exchange,
            "ts": now,
        });
        info!(strategy = %record.id, action = signal.action.as_str(), "signal emitted");
        self.bus
            .publish(events::STRATEGY_SIGNAL, payload, PublishOptions::default())
            .await;
    }

    fn daily_trades(&self, record: &StrategyRecord, now: i64) -> u32 {
        let today = local_date(now);
        record
            .trade_times
            .iter()
            .filter(|ts| local_date(**ts) == today)
            .count() as u32
    }

    fn slot(&self, id: &str) -> Result<Arc<Mutex<StrategySlot>>> {
        self.slots
            .get(id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| TradingError::NotFound { entity: "strategy", key: id.to_string() })
    }

    fn transition(&self, record: &mut StrategyRecord, next: StrategyStatus) -> Result<()> {
        if !record.status.can_transition_to(next) {
            return Err(TradingError::Conflict(format!(
                "strategy {} cannot move from {:?} to {:?}",
                record.id, record.status, next
            )));
        }
        record.status = next;
        Ok(())
    }
}

fn push_signal(record: &mut StrategyRecord, signal: Signal) {
    record.signals.push(signal);
    if record.signals.len() > MAX_RETAINED_SIGNALS {
        let excess = record.signals.len() - MAX_RETAINED_SIGNALS;
        record.signals.drain(..excess);
    }
}

fn local_date(ts_ms: i64) -> (i32, u32, u32) {
    let dt: DateTime<Local> = DateTime::from_timestamp_millis(ts_ms)
        .map(|utc| utc.with_timezone(&Local))
        .unwrap_or_default();
    (dt.year(), dt.month(), dt.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use vela_types::{SignalAction, StrategyKind, StrategyPerformance};

    struct FixedSource {
        price: rust_decimal::Decimal,
    }

    impl MarketSnapshotSource for FixedSource {
        fn context(&self, pair: &Pair, _exchange: Venue, _window: usize) -> Option<MarketCtx> {
            let candles: Vec<Candle> = (0..40)
                .map(|i| {
                    let close = self.price + rust_decimal::Decimal::from(i);
                    Candle {
                        timestamp: i * 60_000,
                        open: close,
                        high: close,
                        low: close,
                        close,
                        volume: dec!(1),
                    }
                })
                .collect();
            MarketCtx::from_candles(pair.clone(), &candles)
        }
    }

    fn record(id: &str) -> StrategyRecord {
        StrategyRecord {
            id: id.to_string(),
            user_id: "u1".into(),
            kind: StrategyKind::Momentum,
            pair: Pair::parse("BTC/USD").unwrap(),
            exchange: Venue::Kraken,
            params: Value::Null,
            status: StrategyStatus::Inactive,
            performance: StrategyPerformance::default(),
            trade_times: Vec::new(),
            signals: Vec::new(),
            last_run_at: None,
            error: None,
        }
    }

    fn scheduler() -> (Arc<StrategyScheduler>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::default());
        let source = Arc::new(FixedSource { price: dec!(100) });
        let scheduler = StrategyScheduler::new(SchedulerConfig::default(), Arc::clone(&bus), source);
        (scheduler, bus)
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_enforced() {
        let (scheduler, _bus) = scheduler();
        scheduler.register(record("s1"));

        // cannot pause before activating
        assert!(scheduler.pause("s1").await.is_err());
        scheduler.activate("s1").await.unwrap();
        scheduler.pause("s1").await.unwrap();
        scheduler.activate("s1").await.unwrap();
        scheduler.deactivate("s1").await.unwrap();
        assert_eq!(
            scheduler.record("s1").await.unwrap().status,
            StrategyStatus::Inactive
        );
    }

    #[tokio::test]
    async fn tick_emits_signal_from_active_strategy() {
        let (scheduler, bus) = scheduler();
        scheduler.register(record("s1"));
        scheduler.activate("s1").await.unwrap();

        scheduler.tick().await;

        // the ascending fixture produces a momentum buy on the first tick
        let history = bus.history(Some(events::STRATEGY_SIGNAL), 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].data["signal"]["action"], "buy");
        let rec = scheduler.record("s1").await.unwrap();
        assert!(rec.last_run_at.is_some());
        assert_eq!(rec.signals.len(), 1);
        assert_eq!(rec.signals[0].action, SignalAction::Buy);
    }

    #[tokio::test]
    async fn inactive_strategies_are_skipped() {
        let (scheduler, bus) = scheduler();
        scheduler.register(record("s1"));

        scheduler.tick().await;
        assert!(bus.history(Some(events::STRATEGY_SIGNAL), 10).is_empty());
    }

    #[tokio::test]
    async fn daily_trade_limit_blocks_execution() {
        let (scheduler, bus) = scheduler();
        let mut rec = record("s1");
        let now = chrono::Utc::now().timestamp_millis();
        rec.trade_times = (0..SchedulerConfig::default().max_daily_trades_per_strategy)
            .map(|_| now)
            .collect();
        scheduler.register(rec);
        scheduler.activate("s1").await.unwrap();

        scheduler.tick().await;
        assert!(bus.history(Some(events::STRATEGY_SIGNAL), 10).is_empty());
    }

    struct SlowSource {
        calls: Arc<std::sync::atomic::AtomicU64>,
    }

    impl MarketSnapshotSource for SlowSource {
        fn context(&self, pair: &Pair, _exchange: Venue, _window: usize) -> Option<MarketCtx> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            // Widen the tick long enough for an overlapping one to arrive.
            std::thread::sleep(Duration::from_millis(50));
            let candles: Vec<Candle> = (0..40)
                .map(|i| {
                    let close = rust_decimal::Decimal::from(100 + i);
                    Candle {
                        timestamp: i * 60_000,
                        open: close,
                        high: close,
                        low: close,
                        close,
                        volume: dec!(1),
                    }
                })
                .collect();
            MarketCtx::from_candles(pair.clone(), &candles)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlapping_ticks_are_dropped() {
        let bus = Arc::new(EventBus::default());
        let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let source = Arc::new(SlowSource { calls: Arc::clone(&calls) });
        let scheduler = StrategyScheduler::new(SchedulerConfig::default(), bus, source);
        scheduler.register(record("s1"));
        scheduler.activate("s1").await.unwrap();

        let racing = Arc::clone(&scheduler);
        let first = tokio::spawn(async move { racing.tick().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // arrives while the first tick is still inside the guard: dropped
        scheduler.tick().await;
        first.await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        // guard released: the next tick evaluates normally
        scheduler.tick().await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn record_trade_updates_performance() {
        let (scheduler, _bus) = scheduler();
        scheduler.register(record("s1"));
        scheduler.record_trade("s1", 1000, dec!(25)).await.unwrap();
        scheduler.record_trade("s1", 2000, dec!(-10)).await.unwrap();

        let rec = scheduler.record("s1").await.unwrap();
        assert_eq!(rec.performance.total_trades, 2);
        assert_eq!(rec.performance.winning_trades, 1);
        assert_eq!(rec.performance.losing_trades, 1);
        assert_eq!(rec.performance.total_pnl, dec!(15));
    }
}
