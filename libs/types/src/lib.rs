//! Core domain types shared across Vela services.
//!
//! Everything in this crate is pure data plus the small amount of logic that
//! belongs to the type itself (parsing, normalization, accounting identities).
//! I/O, scheduling and event wiring live in the service crates.

pub mod error;
pub mod fixed;
pub mod market;
pub mod metadata;
pub mod order;
pub mod pair;
pub mod position;
pub mod signal;
pub mod strategy;
pub mod timeframe;
pub mod venue;

pub use error::{Result, TypesError};
pub use market::{AggregatedPrice, BookLevel, Candle, MarketDataKind, OrderBook, Ticker, TradeTick};
pub use metadata::{BacktestKind, BacktestRecord, DataGap, DataSource, IngestionJob, JobStatus};
pub use order::{Order, OrderSide, OrderStatus, OrderType, TimeInForce, TradeFill};
pub use pair::Pair;
pub use position::{Position, PositionTrade};
pub use signal::{Signal, SignalAction};
pub use strategy::{StrategyKind, StrategyPerformance, StrategyRecord, StrategyStatus};
pub use timeframe::Timeframe;
pub use venue::Venue;

/// User identifier. Issued by the account layer, opaque to the trading core.
pub type UserId = String;
