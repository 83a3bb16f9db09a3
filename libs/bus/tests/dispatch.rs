//! Dispatch-order and isolation behavior of the event bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use vela_bus::{EventBus, EventHandler, PublishOptions, SubscribeOptions};

fn recording_handler(log: Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> EventHandler {
    Arc::new(move |_| {
        let log = Arc::clone(&log);
        Box::pin(async move {
            log.lock().push(tag);
            Ok(())
        })
    })
}

#[tokio::test]
async fn handlers_run_in_descending_priority_order() {
    let bus = EventBus::default();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    bus.subscribe(
        "evt",
        recording_handler(Arc::clone(&log), "low"),
        SubscribeOptions { priority: -5, ..Default::default() },
    );
    bus.subscribe(
        "evt",
        recording_handler(Arc::clone(&log), "high"),
        SubscribeOptions { priority: 10, ..Default::default() },
    );
    bus.subscribe(
        "evt",
        recording_handler(Arc::clone(&log), "mid"),
        SubscribeOptions::default(),
    );

    bus.publish("evt", json!({}), PublishOptions::default()).await;

    assert_eq!(*log.lock(), vec!["high", "mid", "low"]);
}

#[tokio::test]
async fn failing_handler_does_not_stop_siblings() {
    let bus = EventBus::default();
    let hits = Arc::new(AtomicU64::new(0));

    let failing: EventHandler =
        Arc::new(|_| Box::pin(async { Err(anyhow::anyhow!("deliberate failure")) }));
    bus.subscribe(
        "evt",
        failing,
        SubscribeOptions { priority: 100, ..Default::default() },
    );

    let hits_clone = Arc::clone(&hits);
    let counting: EventHandler = Arc::new(move |_| {
        let hits = Arc::clone(&hits_clone);
        Box::pin(async move {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });
    bus.subscribe("evt", counting, SubscribeOptions::default());

    let ok = bus.publish("evt", json!({}), PublishOptions::default()).await;

    assert_eq!(ok, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    let metrics = bus.metrics();
    assert_eq!(metrics.handler_errors, 1);
    assert_eq!(metrics.events_handled, 1);
}

#[tokio::test]
async fn slow_handler_times_out_in_concurrent_mode() {
    let bus = EventBus::default();

    let slow: EventHandler = Arc::new(|_| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
    });
    bus.subscribe("evt", slow, SubscribeOptions::default());

    let start = std::time::Instant::now();
    let ok = bus
        .publish(
            "evt",
            json!({}),
            PublishOptions { concurrent: true, timeout: Duration::from_millis(50) },
        )
        .await;

    assert_eq!(ok, 0);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(bus.metrics().handler_errors, 1);
}

#[tokio::test]
async fn wait_for_applies_filter() {
    let bus = Arc::new(EventBus::default());

    let publisher = Arc::clone(&bus);
    let task = tokio::spawn(async move {
        for i in 0..5 {
            publisher
                .publish("tick", json!({ "i": i }), PublishOptions::default())
                .await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let event = bus
        .wait_for(
            "tick",
            Duration::from_secs(2),
            Some(Box::new(|data| data["i"] == 3)),
        )
        .await
        .unwrap();

    assert_eq!(event.data["i"], 3);
    task.await.unwrap();
}

#[tokio::test]
async fn wait_for_times_out_when_nothing_matches() {
    let bus = EventBus::default();
    let err = bus
        .wait_for("never", Duration::from_millis(30), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("never"));
}
