//! Order validation rules.
//!
//! Hard violations collect into one `Validation` error listing every broken
//! rule; advisory findings (large order, market slippage caveat) come back as
//! warnings on success.

use regex::Regex;
use rust_decimal::Decimal;

use vela_types::{Order, OrderType, TimeInForce};

use super::{OrderRequest, OrderUpdate};
use crate::config::OrderLimits;
use crate::{Result, TradingError};

/// Warnings attached to an order that passed validation
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

pub struct OrderValidator {
    limits: OrderLimits,
    pair_pattern: Regex,
}

impl OrderValidator {
    pub fn new(limits: OrderLimits) -> Self {
        Self {
            limits,
            pair_pattern: Regex::new(r"^[A-Z]{2,10}[/-][A-Z]{2,10}$").expect("valid pattern"),
        }
    }

    /// Validate a creation request
    pub fn validate(&self, request: &OrderRequest) -> Result<ValidationReport> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let limits = &self.limits;

        if request.user_id.trim().is_empty() {
            errors.push("user_id is required".to_string());
        }
        if !self.pair_pattern.is_match(&request.pair.canonical()) {
            errors.push(format!("pair {} is not a valid symbol", request.pair));
        }

        // amount bounds and precision
        if request.amount <= Decimal::ZERO {
            errors.push("amount must be positive".to_string());
        } else {
            if request.amount < limits.min_order_amount {
                errors.push(format!(
                    "amount {} below minimum {}",
                    request.amount, limits.min_order_amount
                ));
            }
            if request.amount > limits.max_order_amount {
                errors.push(format!(
                    "amount {} above maximum {}",
                    request.amount, limits.max_order_amount
                ));
            }
            if request.amount.normalize().scale() > limits.amount_precision {
                errors.push(format!(
                    "amount precision exceeds {} decimal places",
                    limits.amount_precision
                ));
            }
        }

        // price/stop requirements per order type
        if request.order_type.requires_price() {
            match request.price {
                None => errors.push(format!(
                    "price is required for {:?} orders",
                    request.order_type
                )),
                Some(p) if p <= Decimal::ZERO => errors.push("price must be positive".to_string()),
                _ => {}
            }
        }
        if request.order_type.requires_stop_price() {
            match request.stop_price {
                None => errors.push(format!(
                    "stop_price is required for {:?} orders",
                    request.order_type
                )),
                Some(p) if p <= Decimal::ZERO => {
                    errors.push("stop_price must be positive".to_string())
                }
                _ => {}
            }
        }

        // stop-limit trigger geometry
        if request.order_type == OrderType::StopLimit {
            if let (Some(price), Some(stop)) = (request.price, request.stop_price) {
                match request.side {
                    vela_types::OrderSide::Buy if stop < price => {
                        errors.push("buy stop-limit requires stop_price >= price".to_string());
                    }
                    vela_types::OrderSide::Sell if stop > price => {
                        errors.push("sell stop-limit requires stop_price <= price".to_string());
                    }
                    _ => {}
                }
            }
        }

        // order value bounds, where a price is known
        if let Some(price) = request.price {
            let value = request.amount * price;
            if value < limits.min_order_value {
                errors.push(format!(
                    "order value {value} below minimum {}",
                    limits.min_order_value
                ));
            }
            if value > limits.max_order_value {
                errors.push(format!(
                    "order value {value} above maximum {}",
                    limits.max_order_value
                ));
            }
            if value > limits.large_order_value {
                warnings.push(format!(
                    "large order: value {value} may move the market"
                ));
            }
        }

        if request.order_type == OrderType::Market {
            warnings.push("market orders execute at prevailing price and may slip".to_string());
        }
        if request.time_in_force == TimeInForce::FillOrKill
            && request.order_type == OrderType::Market
        {
            warnings.push("FOK on market orders is venue-dependent".to_string());
        }

        if errors.is_empty() {
            Ok(ValidationReport { warnings })
        } else {
            Err(TradingError::Validation(errors))
        }
    }

    /// Validate an amendment against the current order state
    pub fn validate_update(&self, order: &Order, update: &OrderUpdate) -> Result<()> {
        if order.status.is_terminal() {
            return Err(TradingError::Conflict(format!(
                "order {} is {} and cannot be updated",
                order.id,
                order.status.as_str()
            )));
        }

        let mut errors = Vec::new();
        if let Some(amount) = update.amount {
            if amount > order.amount {
                errors.push("amount can only be decreased".to_string());
            }
            if amount < order.filled_amount {
                errors.push(format!(
                    "amount cannot drop below filled amount {}",
                    order.filled_amount
                ));
            }
            if amount <= Decimal::ZERO {
                errors.push("amount must remain positive".to_string());
            }
        }
        if let Some(price) = update.price {
            if price <= Decimal::ZERO {
                errors.push("price must be positive".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TradingError::Validation(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use vela_types::{OrderSide, Pair, Venue};

    fn validator() -> OrderValidator {
        OrderValidator::new(OrderLimits::default())
    }

    fn request(order_type: OrderType, side: OrderSide) -> OrderRequest {
        OrderRequest {
            user_id: "u1".into(),
            exchange: Venue::Binance,
            pair: Pair::parse("BTC/USDT").unwrap(),
            order_type,
            side,
            amount: dec!(0.5),
            price: Some(dec!(50000)),
            stop_price: None,
            time_in_force: TimeInForce::GoodTilCancelled,
            strategy_id: None,
        }
    }

    #[test]
    fn valid_limit_order_passes() {
        let report = validator().validate(&request(OrderType::Limit, OrderSide::Buy)).unwrap();
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn missing_price_on_limit_fails() {
        let mut r = request(OrderType::Limit, OrderSide::Buy);
        r.price = None;
        let err = validator().validate(&r).unwrap_err();
        assert!(err.to_string().contains("price is required"));
    }

    #[test]
    fn stop_requires_stop_price() {
        let mut r = request(OrderType::Stop, OrderSide::Sell);
        r.stop_price = None;
        r.price = None;
        assert!(validator().validate(&r).is_err());
    }

    #[test]
    fn buy_stop_limit_geometry() {
        let mut r = request(OrderType::StopLimit, OrderSide::Buy);
        r.price = Some(dec!(50000));
        r.stop_price = Some(dec!(49000)); // below price: invalid for buys
        assert!(validator().validate(&r).is_err());

        r.stop_price = Some(dec!(51000));
        assert!(validator().validate(&r).is_ok());
    }

    #[test]
    fn sell_stop_limit_geometry() {
        let mut r = request(OrderType::StopLimit, OrderSide::Sell);
        r.price = Some(dec!(50000));
        r.stop_price = Some(dec!(51000)); // above price: invalid for sells
        assert!(validator().validate(&r).is_err());

        r.stop_price = Some(dec!(49000));
        assert!(validator().validate(&r).is_ok());
    }

    #[test]
    fn several_violations_all_reported() {
        let mut r = request(OrderType::Limit, OrderSide::Buy);
        r.amount = dec!(-1);
        r.price = None;
        r.user_id = "".into();
        let err = validator().validate(&r).unwrap_err();
        let TradingError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.len() >= 3);
    }

    #[test]
    fn precision_overflow_rejected() {
        let mut r = request(OrderType::Limit, OrderSide::Buy);
        r.amount = dec!(0.123456789); // nine decimal places
        assert!(validator().validate(&r).is_err());
    }

    #[test]
    fn tiny_value_rejected_large_value_warned() {
        let mut r = request(OrderType::Limit, OrderSide::Buy);
        r.amount = dec!(0.00000001);
        assert!(validator().validate(&r).is_err());

        let mut r = request(OrderType::Limit, OrderSide::Buy);
        r.amount = dec!(10);
        let report = validator().validate(&r).unwrap();
        assert!(report.warnings.iter().any(|w| w.contains("large order")));
    }

    #[test]
    fn market_order_carries_slippage_warning() {
        let mut r = request(OrderType::Market, OrderSide::Buy);
        r.price = None;
        let report = validator().validate(&r).unwrap();
        assert!(report.warnings.iter().any(|w| w.contains("slip")));
    }

    #[test]
    fn updates_cannot_grow_or_undercut_fills() {
        use vela_types::OrderStatus;
        let validator = validator();
        let mut order = sample_order();
        order.status = OrderStatus::Partial;
        order.filled_amount = dec!(0.3);

        assert!(validator
            .validate_update(&order, &OrderUpdate { amount: Some(dec!(2)), price: None })
            .is_err());
        assert!(validator
            .validate_update(&order, &OrderUpdate { amount: Some(dec!(0.2)), price: None })
            .is_err());
        assert!(validator
            .validate_update(&order, &OrderUpdate { amount: Some(dec!(0.4)), price: None })
            .is_ok());

        order.status = OrderStatus::Filled;
        let err = validator
            .validate_update(&order, &OrderUpdate { amount: Some(dec!(0.4)), price: None })
            .unwrap_err();
        assert!(matches!(err, TradingError::Conflict(_)));
    }

    fn sample_order() -> Order {
        Order {
            id: uuid::Uuid::new_v4(),
            user_id: "u1".into(),
            exchange: Venue::Binance,
            pair: Pair::parse("BTC/USDT").unwrap(),
            order_type: OrderType::Limit,
            side: OrderSide::Buy,
            amount: dec!(1),
            price: Some(dec!(50000)),
            stop_price: None,
            time_in_force: TimeInForce::GoodTilCancelled,
            status: vela_types::OrderStatus::Open,
            filled_amount: Decimal::ZERO,
            remaining_amount: dec!(1),
            average_price: None,
            fee: Decimal::ZERO,
            fee_currency: "USDT".into(),
            strategy_id: None,
            trades: Vec::new(),
            created_at: 0,
            updated_at: 0,
            filled_at: None,
            cancelled_at: None,
            external_id: None,
        }
    }
}
