//! The bus itself: subscriptions, dispatch, history.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::metrics::{BusMetrics, BusMetricsSnapshot};
use crate::{BusError, Result};

/// Default per-handler timeout for concurrent dispatch
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// Default history ring capacity
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// A delivered event: name, payload and publication metadata
#[derive(Debug, Clone)]
pub struct Event {
    pub name: Arc<str>,
    pub data: Arc<Value>,
    /// Publication time, milliseconds since epoch
    pub ts: i64,
    /// Monotonic sequence number assigned at publish
    pub id: u64,
}

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Async event handler. Return `Err` to have the failure logged and counted;
/// failures never propagate to sibling handlers.
pub type EventHandler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// Identifier returned by `subscribe`, needed to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy)]
pub struct SubscribeOptions {
    /// Higher priority handlers run first
    pub priority: i32,
    /// Auto-unsubscribe after the first successful dispatch
    pub once: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self { priority: 0, once: false }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PublishOptions {
    /// `true`: run handlers concurrently, each bounded by `timeout`.
    /// `false`: run sequentially in the caller's flow.
    pub concurrent: bool,
    pub timeout: Duration,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self { concurrent: false, timeout: DEFAULT_HANDLER_TIMEOUT }
    }
}

struct Subscription {
    id: SubscriptionId,
    priority: i32,
    once: bool,
    handler: EventHandler,
}

/// Priority-ordered, timed, async pub/sub with bounded history
pub struct EventBus {
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    history: RwLock<VecDeque<Event>>,
    history_capacity: usize,
    metrics: BusMetrics,
    next_sub_id: AtomicU64,
    next_event_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl EventBus {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            metrics: BusMetrics::default(),
            next_sub_id: AtomicU64::new(1),
            next_event_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for `event`. Handlers with higher priority are
    /// dispatched first; ties preserve subscription order.
    pub fn subscribe(
        &self,
        event: &str,
        handler: EventHandler,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_sub_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self.subscriptions.write();
        let list = subs.entry(event.to_string()).or_default();
        let sub = Subscription { id, priority: options.priority, once: options.once, handler };
        // Keep the list sorted by descending priority; stable insertion point
        // after equal priorities preserves registration order.
        let pos = list
            .iter()
            .position(|s| s.priority < options.priority)
            .unwrap_or(list.len());
        list.insert(pos, sub);
        debug!(event, priority = options.priority, once = options.once, "subscribed");
        id
    }

    /// Remove one subscription. Returns whether it existed.
    pub fn unsubscribe(&self, event: &str, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        if let Some(list) = subs.get_mut(event) {
            let before = list.len();
            list.retain(|s| s.id != id);
            let removed = list.len() != before;
            if list.is_empty() {
                subs.remove(event);
            }
            removed
        } else {
            false
        }
    }

    /// Publish `data` under `event` to all current subscribers.
    ///
    /// Returns the number of handlers that completed without error. The event
    /// is recorded in history whether or not anyone is listening.
    pub async fn publish(&self, event: &str, data: Value, options: PublishOptions) -> usize {
        let record = Event {
            name: Arc::from(event),
            data: Arc::new(data),
            ts: chrono::Utc::now().timestamp_millis(),
            id: self.next_event_id.fetch_add(1, Ordering::Relaxed),
        };
        self.metrics.record_publish();
        self.push_history(record.clone());

        // Snapshot handlers before any await so the lock never spans one.
        let handlers: Vec<(SubscriptionId, bool, EventHandler)> = {
            let subs = self.subscriptions.read();
            match subs.get(event) {
                Some(list) => list
                    .iter()
                    .map(|s| (s.id, s.once, Arc::clone(&s.handler)))
                    .collect(),
                None => return 0,
            }
        };

        let mut succeeded: Vec<SubscriptionId> = Vec::new();
        let mut ok_count = 0usize;

        if options.concurrent {
            let futures = handlers.iter().map(|(id, _, handler)| {
                let fut = handler(record.clone());
                let id = *id;
                async move {
                    match tokio::time::timeout(options.timeout, fut).await {
                        Ok(Ok(())) => (id, Ok(())),
                        Ok(Err(e)) => (id, Err(e)),
                        Err(_) => (id, Err(anyhow::anyhow!("handler timed out"))),
                    }
                }
            });
            for (id, result) in join_all(futures).await {
                self.record_outcome(event, id, result, &mut succeeded, &mut ok_count);
            }
        } else {
            for (id, _, handler) in &handlers {
                let result = handler(record.clone()).await;
                self.record_outcome(event, *id, result, &mut succeeded, &mut ok_count);
            }
        }

        // Auto-unsubscribe `once` handlers that dispatched successfully.
        let once_done: Vec<SubscriptionId> = handlers
            .iter()
            .filter(|(id, once, _)| *once && succeeded.contains(id))
            .map(|(id, _, _)| *id)
            .collect();
        for id in once_done {
            self.unsubscribe(event, id);
        }

        ok_count
    }

    fn record_outcome(
        &self,
        event: &str,
        id: SubscriptionId,
        result: anyhow::Result<()>,
        succeeded: &mut Vec<SubscriptionId>,
        ok_count: &mut usize,
    ) {
        match result {
            Ok(()) => {
                self.metrics.record_handled();
                succeeded.push(id);
                *ok_count += 1;
            }
            Err(e) => {
                self.metrics.record_error();
                warn!(event, error = %e, "event handler failed");
            }
        }
    }

    /// Wait for the next `event` whose payload satisfies `filter` (if any).
    pub async fn wait_for(
        &self,
        event: &str,
        timeout: Duration,
        filter: Option<Box<dyn Fn(&Value) -> bool + Send + Sync>>,
    ) -> Result<Event> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let filter = filter.map(Arc::new);

        let handler: EventHandler = Arc::new(move |evt: Event| {
            let tx = tx.clone();
            let filter = filter.clone();
            Box::pin(async move {
                let matches = filter.as_ref().map_or(true, |f| f(&evt.data));
                if matches {
                    let _ = tx.send(evt);
                }
                Ok(())
            })
        });

        // High priority so waiters observe the event before regular handlers
        // mutate downstream state.
        let sub_id = self.subscribe(
            event,
            handler,
            SubscribeOptions { priority: i32::MAX, once: false },
        );

        let result = tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Some(evt) => return evt,
                    None => std::future::pending::<()>().await,
                }
            }
        })
        .await;

        self.unsubscribe(event, sub_id);

        result.map_err(|_| BusError::WaitTimeout {
            event: event.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    /// Most recent events, optionally filtered by name, newest last
    pub fn history(&self, event: Option<&str>, limit: usize) -> Vec<Event> {
        let history = self.history.read();
        let iter = history.iter().filter(|e| match event {
            Some(name) => e.name.as_ref() == name,
            None => true,
        });
        let matching: Vec<Event> = iter.cloned().collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).collect()
    }

    pub fn metrics(&self) -> BusMetricsSnapshot {
        let subscriber_count = self.subscriptions.read().values().map(Vec::len).sum();
        self.metrics.snapshot(subscriber_count)
    }

    fn push_history(&self, event: Event) {
        let mut history = self.history.write();
        if history.len() == self.history_capacity {
            history.pop_front();
        }
        history.push_back(event);
    }
}
