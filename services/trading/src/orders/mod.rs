//! Order validation, lifecycle management and fill accounting.

mod manager;
mod validator;

pub use manager::{OrderManager, OrderStats, SimulatedExecutor, UserOrderFilter, VenueExecutor};
pub use validator::{OrderValidator, ValidationReport};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use vela_types::{OrderSide, OrderType, Pair, TimeInForce, UserId, Venue};

/// Parameters for creating an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub user_id: UserId,
    pub exchange: Venue,
    pub pair: Pair,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    #[serde(default = "default_tif")]
    pub time_in_force: TimeInForce,
    pub strategy_id: Option<String>,
}

fn default_tif() -> TimeInForce {
    TimeInForce::GoodTilCancelled
}

/// Parameters for amending an open order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub amount: Option<Decimal>,
    pub price: Option<Decimal>,
}
