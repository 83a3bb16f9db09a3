//! Pre-trade risk gating.
//!
//! `check_trade` runs every check and returns the composite verdict; the
//! caller gets one entry per check plus the deduplicated categories that
//! failed. Failures in the drawdown, consecutive-loss or daily-limit
//! categories trip the per-user circuit breaker.

mod observer;

pub use observer::RiskObserver;

use std::sync::Arc;

use chrono::{DateTime, Datelike, Local};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use vela_bus::{events, EventBus, PublishOptions};
use vela_types::{OrderSide, Pair, UserId, Venue};

use crate::config::RiskConfig;

/// Check categories as they appear in `failed_checks` and breaker reasons
pub mod category {
    pub const CIRCUIT_BREAKER: &str = "circuitBreaker";
    pub const DAILY_LIMITS: &str = "dailyLimits";
    pub const POSITION_SIZE: &str = "positionSize";
    pub const TOTAL_EXPOSURE: &str = "totalExposure";
    pub const CONCENTRATION: &str = "concentration";
    pub const COOLDOWN: &str = "cooldown";
    pub const DRAWDOWN: &str = "drawdown";
    pub const CONSECUTIVE_LOSSES: &str = "consecutiveLosses";
    pub const SLIPPAGE: &str = "slippage";
    pub const PRICE_DEVIATION: &str = "priceDeviation";
}

/// Categories whose failure trips the circuit breaker
const BREAKER_CATEGORIES: [&str; 3] = [
    category::DRAWDOWN,
    category::CONSECUTIVE_LOSSES,
    category::DAILY_LIMITS,
];

/// The trade the risk manager is asked to approve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub pair: Pair,
    pub exchange: Venue,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Decimal,
    /// Price the strategy expected, for the slippage check
    pub expected_price: Option<Decimal>,
    /// Current market price, for the deviation check
    pub market_price: Option<Decimal>,
}

impl TradeIntent {
    pub fn value(&self) -> Decimal {
        self.amount * self.price
    }
}

/// Portfolio figures supplied by the caller at check time
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub total_value: Decimal,
    /// Value currently deployed across all positions
    pub current_exposure: Decimal,
    /// Value currently held in the traded asset
    pub asset_value: Decimal,
    pub equity: Decimal,
    pub initial_equity: Decimal,
}

/// Result of one individual check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub category: String,
    pub allowed: bool,
    pub reason: Option<String>,
    pub metrics: serde_json::Value,
}

impl CheckResult {
    fn pass(name: &str, category: &str, metrics: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            allowed: true,
            reason: None,
            metrics,
        }
    }

    fn fail(name: &str, category: &str, reason: String, metrics: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            allowed: false,
            reason: Some(reason),
            metrics,
        }
    }
}

/// Composite verdict for one `check_trade` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCheckOutcome {
    pub allowed: bool,
    pub checks: Vec<CheckResult>,
    /// Deduplicated categories of failing checks
    pub failed_checks: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct DailyStats {
    date: (i32, u32, u32),
    trade_count: u32,
    volume: Decimal,
    fees: Decimal,
    realized_pnl: Decimal,
}

#[derive(Debug, Clone)]
struct CircuitBreakerState {
    triggered_at: i64,
    duration_ms: u64,
    reasons: Vec<String>,
}

#[derive(Debug, Default)]
struct UserRiskState {
    daily: DailyStats,
    last_trade_at: Option<i64>,
    peak_equity: Decimal,
    consecutive_losses: u32,
    breaker: Option<CircuitBreakerState>,
}

/// Stateful per-user risk manager
pub struct RiskManager {
    config: RiskConfig,
    bus: Arc<EventBus>,
    states: DashMap<UserId, Arc<Mutex<UserRiskState>>>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { config, bus, states: DashMap::new() })
    }

    /// Run every check against the intent. Emits `risk:checkFailed` and, for
    /// breaker-category failures, `risk:circuitBreakerTriggered`.
    pub async fn check_trade(
        &self,
        user_id: &UserId,
        intent: &TradeIntent,
        portfolio: &PortfolioSnapshot,
    ) -> RiskCheckOutcome {
        let now = chrono::Utc::now().timestamp_millis();
        let state = self.state(user_id);
        let outcome = {
            let mut state = state.lock();
            state.roll_daily(now);
            self.evaluate(&mut state, intent, portfolio, now)
        };

        if !outcome.allowed {
            warn!(user = %user_id, failed = ?outcome.failed_checks, "trade denied");
            self.bus
                .publish(
                    events::RISK_CHECK_FAILED,
                    json!({
                        "user_id": user_id,
                        "trade_params": intent,
                        "failed_checks": outcome.failed_checks,
                        "ts": now,
                    }),
                    PublishOptions::default(),
                )
                .await;

            let trip: Vec<String> = outcome
                .failed_checks
                .iter()
                .filter(|c| BREAKER_CATEGORIES.contains(&c.as_str()))
                .cloned()
                .collect();
            if !trip.is_empty() {
                self.trip_breaker(user_id, trip, now).await;
            }
        }
        outcome
    }

    /// Manually clear a user's circuit breaker
    pub async fn reset(&self, user_id: &UserId) {
        let state = self.state(user_id);
        state.lock().breaker = None;
        info!(user = %user_id, "circuit breaker reset");
        self.bus
            .publish(
                events::CIRCUIT_BREAKER_RESET,
                json!({ "user_id": user_id, "ts": chrono::Utc::now().timestamp_millis() }),
                PublishOptions::default(),
            )
            .await;
    }

    /// Whether the user's breaker is currently active
    pub fn breaker_active(&self, user_id: &UserId) -> bool {
        let now = chrono::Utc::now().timestamp_millis();
        let state = self.state(user_id);
        let state = state.lock();
        state
            .breaker
            .as_ref()
            .is_some_and(|b| now - b.triggered_at < b.duration_ms as i64)
    }

    /// Fold an executed fill into the user's daily accounting. Wins reset the
    /// consecutive-loss streak.
    pub fn record_fill(
        &self,
        user_id: &UserId,
        value: Decimal,
        fee: Decimal,
        realized_pnl: Decimal,
        ts: i64,
    ) {
        let state = self.state(user_id);
        let mut state = state.lock();
        state.roll_daily(ts);
        state.daily.trade_count += 1;
        state.daily.volume += value;
        state.daily.fees += fee;
        state.daily.realized_pnl += realized_pnl;
        state.last_trade_at = Some(ts);
        if realized_pnl < Decimal::ZERO {
            state.consecutive_losses += 1;
        } else if realized_pnl > Decimal::ZERO {
            state.consecutive_losses = 0;
        }
    }

    /// Attribute realized P&L after position accounting settles (sells).
    /// Loss streaks advance here; wins reset them.
    pub fn record_realized(&self, user_id: &UserId, realized_pnl: Decimal, ts: i64) {
        if realized_pnl == Decimal::ZERO {
            return;
        }
        let state = self.state(user_id);
        let mut state = state.lock();
        state.roll_daily(ts);
        state.daily.realized_pnl += realized_pnl;
        if realized_pnl < Decimal::ZERO {
            state.consecutive_losses += 1;
        } else {
            state.consecutive_losses = 0;
        }
    }

    async fn trip_breaker(&self, user_id: &UserId, reasons: Vec<String>, now: i64) {
        let duration_ms = self.config.circuit_breaker_duration_ms;
        {
            let state = self.state(user_id);
            let mut state = state.lock();
            state.breaker = Some(CircuitBreakerState {
                triggered_at: now,
                duration_ms,
                reasons: reasons.clone(),
            });
        }
        warn!(user = %user_id, ?reasons, "circuit breaker triggered");
        self.bus
            .publish(
                events::CIRCUIT_BREAKER_TRIGGERED,
                json!({
                    "user_id": user_id,
                    "reasons": reasons,
                    "duration": duration_ms,
                    "ts": now,
                }),
                PublishOptions::default(),
            )
            .await;
    }

    fn evaluate(
        &self,
        state: &mut UserRiskState,
        intent: &TradeIntent,
        portfolio: &PortfolioSnapshot,
        now: i64,
    ) -> RiskCheckOutcome {
        let cfg = &self.config;
        let value = intent.value();
        let mut checks = Vec::with_capacity(12);

        // 1. circuit breaker
        match &state.breaker {
            Some(b) if now - b.triggered_at < b.duration_ms as i64 => {
                let remaining = b.duration_ms as i64 - (now - b.triggered_at);
                checks.push(CheckResult::fail(
                    "circuitBreaker",
                    category::CIRCUIT_BREAKER,
                    format!("circuit breaker active for another {remaining}ms"),
                    json!({ "remaining_ms": remaining, "reasons": b.reasons }),
                ));
            }
            Some(_) => {
                // Expired: clear and pass.
                state.breaker = None;
                checks.push(CheckResult::pass("circuitBreaker", category::CIRCUIT_BREAKER, json!({})));
            }
            None => checks.push(CheckResult::pass("circuitBreaker", category::CIRCUIT_BREAKER, json!({}))),
        }

        // 2. daily loss
        let daily_loss = (-state.daily.realized_pnl).max(Decimal::ZERO);
        let loss_limit = portfolio.initial_equity * cfg.max_daily_loss;
        checks.push(if daily_loss >= loss_limit && loss_limit > Decimal::ZERO {
            CheckResult::fail(
                "dailyLoss",
                category::DAILY_LIMITS,
                format!("daily loss {daily_loss} at or above limit {loss_limit}"),
                json!({ "daily_loss": daily_loss, "limit": loss_limit }),
            )
        } else {
            CheckResult::pass("dailyLoss", category::DAILY_LIMITS, json!({ "daily_loss": daily_loss }))
        });

        // 3. daily trade count
        checks.push(if state.daily.trade_count >= cfg.max_daily_trades {
            CheckResult::fail(
                "dailyTradeCount",
                category::DAILY_LIMITS,
                format!("{} trades today, limit {}", state.daily.trade_count, cfg.max_daily_trades),
                json!({ "trades": state.daily.trade_count }),
            )
        } else {
            CheckResult::pass("dailyTradeCount", category::DAILY_LIMITS, json!({ "trades": state.daily.trade_count }))
        });

        // 4. daily volume
        let projected_volume = state.daily.volume + value;
        checks.push(if projected_volume > cfg.max_daily_volume {
            CheckResult::fail(
                "dailyVolume",
                category::DAILY_LIMITS,
                format!("projected daily volume {projected_volume} above {}", cfg.max_daily_volume),
                json!({ "projected": projected_volume }),
            )
        } else {
            CheckResult::pass("dailyVolume", category::DAILY_LIMITS, json!({ "projected": projected_volume }))
        });

        // 5. position size
        let size_ratio = ratio(value, portfolio.total_value);
        checks.push(if size_ratio > cfg.max_position_size {
            CheckResult::fail(
                "positionSize",
                category::POSITION_SIZE,
                format!("trade is {size_ratio} of portfolio, limit {}", cfg.max_position_size),
                json!({ "ratio": size_ratio }),
            )
        } else {
            CheckResult::pass("positionSize", category::POSITION_SIZE, json!({ "ratio": size_ratio }))
        });

        // 6. total exposure
        let exposure_ratio = ratio(portfolio.current_exposure + value, portfolio.total_value);
        checks.push(if exposure_ratio > cfg.max_total_exposure {
            CheckResult::fail(
                "totalExposure",
                category::TOTAL_EXPOSURE,
                format!("exposure would reach {exposure_ratio}, limit {}", cfg.max_total_exposure),
                json!({ "ratio": exposure_ratio }),
            )
        } else {
            CheckResult::pass("totalExposure", category::TOTAL_EXPOSURE, json!({ "ratio": exposure_ratio }))
        });

        // 7. asset concentration
        let concentration = ratio(portfolio.asset_value + value, portfolio.total_value);
        checks.push(if concentration > cfg.max_concentration {
            CheckResult::fail(
                "concentration",
                category::CONCENTRATION,
                format!("asset concentration would reach {concentration}, limit {}", cfg.max_concentration),
                json!({ "ratio": concentration }),
            )
        } else {
            CheckResult::pass("concentration", category::CONCENTRATION, json!({ "ratio": concentration }))
        });

        // 8. cooldown
        let since_last = state.last_trade_at.map(|t| now - t);
        checks.push(match since_last {
            Some(elapsed) if elapsed < cfg.trade_cooldown_ms => CheckResult::fail(
                "cooldown",
                category::COOLDOWN,
                format!("only {elapsed}ms since last trade, cooldown {}ms", cfg.trade_cooldown_ms),
                json!({ "elapsed_ms": elapsed }),
            ),
            _ => CheckResult::pass("cooldown", category::COOLDOWN, json!({ "elapsed_ms": since_last })),
        });

        // 9. drawdown (updates the peak)
        state.peak_equity = state.peak_equity.max(portfolio.equity);
        let drawdown_pct = if state.peak_equity > Decimal::ZERO {
            (state.peak_equity - portfolio.equity) / state.peak_equity * Decimal::from(100)
        } else {
            Decimal::ZERO
        };
        checks.push(if drawdown_pct >= cfg.max_drawdown_pct {
            CheckResult::fail(
                "drawdown",
                category::DRAWDOWN,
                format!("drawdown {drawdown_pct}% at or above {}%", cfg.max_drawdown_pct),
                json!({ "drawdown_pct": drawdown_pct, "peak": state.peak_equity }),
            )
        } else {
            CheckResult::pass("drawdown", category::DRAWDOWN, json!({ "drawdown_pct": drawdown_pct }))
        });

        // 10a. consecutive losses
        checks.push(if state.consecutive_losses >= cfg.max_consecutive_losses {
            CheckResult::fail(
                "consecutiveLosses",
                category::CONSECUTIVE_LOSSES,
                format!("{} consecutive losses, limit {}", state.consecutive_losses, cfg.max_consecutive_losses),
                json!({ "losses": state.consecutive_losses }),
            )
        } else {
            CheckResult::pass("consecutiveLosses", category::CONSECUTIVE_LOSSES, json!({ "losses": state.consecutive_losses }))
        });

        // 10b. slippage between expected and intended execution price
        if let Some(expected) = intent.expected_price {
            let slippage_pct = ratio((intent.price - expected).abs(), expected) * Decimal::from(100);
            checks.push(if slippage_pct > cfg.max_slippage_pct {
                CheckResult::fail(
                    "slippage",
                    category::SLIPPAGE,
                    format!("slippage {slippage_pct}% above {}%", cfg.max_slippage_pct),
                    json!({ "slippage_pct": slippage_pct }),
                )
            } else {
                CheckResult::pass("slippage", category::SLIPPAGE, json!({ "slippage_pct": slippage_pct }))
            });
        }

        // 10c. deviation from market price
        if let Some(market) = intent.market_price {
            let deviation_pct = ratio((intent.price - market).abs(), market) * Decimal::from(100);
            checks.push(if deviation_pct > cfg.max_price_deviation_pct {
                CheckResult::fail(
                    "priceDeviation",
                    category::PRICE_DEVIATION,
                    format!("price deviates {deviation_pct}% from market, limit {}%", cfg.max_price_deviation_pct),
                    json!({ "deviation_pct": deviation_pct }),
                )
            } else {
                CheckResult::pass("priceDeviation", category::PRICE_DEVIATION, json!({ "deviation_pct": deviation_pct }))
            });
        }

        let mut failed_checks: Vec<String> = checks
            .iter()
            .filter(|c| !c.allowed)
            .map(|c| c.category.clone())
            .collect();
        failed_checks.dedup();

        RiskCheckOutcome { allowed: failed_checks.is_empty(), checks, failed_checks }
    }

    fn state(&self, user_id: &UserId) -> Arc<Mutex<UserRiskState>> {
        self.states
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(UserRiskState::default())))
            .clone()
    }
}

impl UserRiskState {
    /// Reset daily stats at the local-day boundary, on first access
    fn roll_daily(&mut self, now: i64) {
        let today = local_date(now);
        if self.daily.date != today {
            self.daily = DailyStats { date: today, ..Default::default() };
        }
    }
}

fn local_date(ts_ms: i64) -> (i32, u32, u32) {
    let dt: DateTime<Local> = DateTime::from_timestamp_millis(ts_ms)
        .map(|utc| utc.with_timezone(&Local))
        .unwrap_or_default();
    (dt.year(), dt.month(), dt.day())
}

fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator > Decimal::ZERO {
        numerator / denominator
    } else {
        Decimal::ZERO
    }
}
