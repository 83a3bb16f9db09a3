//! Bus observer feeding executed fills back into risk accounting.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use vela_bus::{events, EventBus, SubscribeOptions};

use super::RiskManager;

/// Subscribes the risk manager to `trading:orderFilled` so daily counters,
/// realized P&L and loss streaks track live execution.
pub struct RiskObserver;

impl RiskObserver {
    pub fn attach(risk: Arc<RiskManager>, bus: &EventBus) {
        let risk_for_completed = Arc::clone(&risk);
        let handler: vela_bus::EventHandler = Arc::new(move |event| {
            let risk = Arc::clone(&risk);
            Box::pin(async move {
                let data = event.data.as_ref();
                let Some(user_id) = data.get("user_id").and_then(Value::as_str) else {
                    return Ok(());
                };
                let order = data.get("order").cloned().unwrap_or(Value::Null);

                let amount = decimal_at(&order, "filled_amount");
                let price = decimal_at(&order, "average_price");
                let fee = decimal_at(&order, "fee");
                let realized = data
                    .get("realized_pnl")
                    .and_then(|v| serde_json::from_value::<Decimal>(v.clone()).ok())
                    .unwrap_or(Decimal::ZERO);
                let ts = data
                    .get("ts")
                    .and_then(Value::as_i64)
                    .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

                debug!(user = user_id, %realized, "risk observer recording fill");
                risk.record_fill(&user_id.to_string(), amount * price, fee, realized, ts);
                Ok(())
            })
        });
        // Risk accounting must see fills before lower-priority consumers.
        bus.subscribe(
            events::ORDER_FILLED,
            handler,
            SubscribeOptions { priority: 50, once: false },
        );

        let risk = risk_for_completed;
        let completed: vela_bus::EventHandler = Arc::new(move |event| {
            let risk = Arc::clone(&risk);
            Box::pin(async move {
                let data = event.data.as_ref();
                let Some(user_id) = data.get("user_id").and_then(Value::as_str) else {
                    return Ok(());
                };
                let realized = data
                    .get("realized_pnl")
                    .and_then(|v| serde_json::from_value::<Decimal>(v.clone()).ok())
                    .unwrap_or(Decimal::ZERO);
                let ts = data
                    .get("ts")
                    .and_then(Value::as_i64)
                    .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
                risk.record_realized(&user_id.to_string(), realized, ts);
                Ok(())
            })
        });
        bus.subscribe(
            events::ORDER_COMPLETED,
            completed,
            SubscribeOptions { priority: 50, once: false },
        );
    }
}

fn decimal_at(value: &Value, field: &str) -> Decimal {
    value
        .get(field)
        .and_then(|v| serde_json::from_value::<Decimal>(v.clone()).ok())
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use serde_json::json;
    use vela_bus::PublishOptions;

    #[tokio::test]
    async fn filled_orders_feed_daily_stats() {
        let bus = Arc::new(EventBus::default());
        let risk = RiskManager::new(RiskConfig::default(), Arc::clone(&bus));
        RiskObserver::attach(Arc::clone(&risk), &bus);

        bus.publish(
            events::ORDER_FILLED,
            json!({
                "user_id": "u1",
                "order": { "filled_amount": "1", "average_price": "100", "fee": "2" },
                "realized_pnl": "-10",
                "ts": chrono::Utc::now().timestamp_millis(),
            }),
            PublishOptions::default(),
        )
        .await;

        // a loss was recorded: the streak moved off zero; a subsequent check
        // within the cooldown window must fail on cooldown as well
        let outcome = risk
            .check_trade(
                &"u1".to_string(),
                &crate::risk::TradeIntent {
                    pair: vela_types::Pair::parse("BTC/USD").unwrap(),
                    exchange: vela_types::Venue::Kraken,
                    side: vela_types::OrderSide::Buy,
                    amount: rust_decimal_macros::dec!(0.01),
                    price: rust_decimal_macros::dec!(100),
                    expected_price: None,
                    market_price: None,
                },
                &crate::risk::PortfolioSnapshot {
                    total_value: rust_decimal_macros::dec!(10000),
                    current_exposure: Decimal::ZERO,
                    asset_value: Decimal::ZERO,
                    equity: rust_decimal_macros::dec!(10000),
                    initial_equity: rust_decimal_macros::dec!(10000),
                },
            )
            .await;
        assert!(outcome
            .failed_checks
            .contains(&crate::risk::category::COOLDOWN.to_string()));
    }
}
