//! Market configuration and state.
//!
//! A market trades one issued token against sats. It owns its order book and
//! every order ever placed in it: live orders sit on the book, finished ones
//! are kept in `closed_orders` and never deleted.

use crate::order::{Order, OrderBook};
use crate::types::{MarketId, OrderId, Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Market status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    /// Market is open for trading
    Active,
    /// Accounting no longer matches reality. Stays halted until an operator resumes it.
    Halted,
}

impl Default for MarketStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// Static market configuration (immutable after creation)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub id: MarketId,
    /// Identifier of the issued token (e.g. a BSV-20 tick or inscription id)
    pub token_id: String,
    /// Display symbol (e.g. "$BOB")
    pub symbol: String,
    /// Minimum order amount in token units
    pub min_order_amount: u64,
}

impl MarketConfig {
    pub fn new(id: MarketId, token_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            id,
            token_id: token_id.into(),
            symbol: symbol.into(),
            min_order_amount: 1,
        }
    }

    /// Validate amount and price, returning the typed price and the sats value of the order.
    pub fn validate_order(&self, amount: u64, price_sats: u64) -> Result<(Price, u64), OrderValidationError> {
        if amount == 0 {
            return Err(OrderValidationError::ZeroAmount);
        }
        let price = Price::new(price_sats).ok_or(OrderValidationError::ZeroPrice)?;
        if amount < self.min_order_amount {
            return Err(OrderValidationError::BelowMinimum {
                amount,
                minimum: self.min_order_amount,
            });
        }
        let total = price
            .total_for(amount)
            .ok_or(OrderValidationError::ValueOverflow { amount, price_sats })?;
        Ok((price, total))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderValidationError {
    #[error("amount must be positive")]
    ZeroAmount,

    #[error("price must be positive")]
    ZeroPrice,

    #[error("amount {amount} below market minimum {minimum}")]
    BelowMinimum { amount: u64, minimum: u64 },

    #[error("order value {amount} x {price_sats} sats overflows")]
    ValueOverflow { amount: u64, price_sats: u64 },

    #[error("expiry {expires_at} is not after {now}")]
    AlreadyExpired { expires_at: Timestamp, now: Timestamp },
}

/// Dynamic market state (changes during trading)
#[derive(Debug, Clone)]
pub struct MarketState {
    pub config: MarketConfig,
    pub status: MarketStatus,
    pub halt_reason: Option<String>,
    pub order_book: OrderBook,
    /// Filled, cancelled and expired orders
    closed_orders: HashMap<OrderId, Order>,
    /// Last trade price
    pub last_trade_price: Option<Price>,
    /// Cumulative traded token units
    pub volume_units: u128,
    /// Cumulative traded sats
    pub volume_sats: u128,
    pub trade_count: u64,
    pub created_at: Timestamp,
    /// Last update timestamp
    pub last_updated: Timestamp,
}

impl MarketState {
    pub fn new(config: MarketConfig, timestamp: Timestamp) -> Self {
        let order_book = OrderBook::new(config.id);
        Self {
            config,
            status: MarketStatus::Active,
            halt_reason: None,
            order_book,
            closed_orders: HashMap::new(),
            last_trade_price: None,
            volume_units: 0,
            volume_sats: 0,
            trade_count: 0,
            created_at: timestamp,
            last_updated: timestamp,
        }
    }

    pub fn id(&self) -> MarketId {
        self.config.id
    }

    pub fn is_active(&self) -> bool {
        self.status == MarketStatus::Active
    }

    pub fn halt(&mut self, reason: String, at: Timestamp) {
        self.status = MarketStatus::Halted;
        self.halt_reason = Some(reason);
        self.last_updated = at;
    }

    pub fn resume(&mut self, at: Timestamp) {
        self.status = MarketStatus::Active;
        self.halt_reason = None;
        self.last_updated = at;
    }

    /// Record a trade
    pub fn record_trade(&mut self, price: Price, amount: u64, total_sats: u64, at: Timestamp) {
        self.last_trade_price = Some(price);
        self.volume_units += amount as u128;
        self.volume_sats += total_sats as u128;
        self.trade_count += 1;
        self.last_updated = at;
    }

    /// Volume-weighted average execution price over the market's lifetime.
    pub fn vwap(&self) -> Option<Decimal> {
        if self.volume_units == 0 {
            return None;
        }
        let sats = Decimal::from_i128_with_scale(i128::try_from(self.volume_sats).ok()?, 0);
        let units = Decimal::from_i128_with_scale(i128::try_from(self.volume_units).ok()?, 0);
        sats.checked_div(units)
    }

    /// Keep a terminal order for history.
    pub fn archive(&mut self, order: Order) {
        debug_assert!(order.status.is_terminal());
        self.closed_orders.insert(order.id, order);
    }

    /// Any order of this market, live or finished.
    pub fn order(&self, order_id: OrderId) -> Option<&Order> {
        self.order_book
            .get(order_id)
            .or_else(|| self.closed_orders.get(&order_id))
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.order_book.orders().chain(self.closed_orders.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderStatus;
    use crate::types::{Side, UserId};
    use rust_decimal_macros::dec;

    fn config() -> MarketConfig {
        MarketConfig::new(MarketId(1), "bob-token", "$BOB")
    }

    #[test]
    fn validate_order_ok() {
        let (price, total) = config().validate_order(10, 50).unwrap();
        assert_eq!(price.sats(), 50);
        assert_eq!(total, 500);
    }

    #[test]
    fn validate_order_rejections() {
        let mut config = config();
        assert_eq!(config.validate_order(0, 50), Err(OrderValidationError::ZeroAmount));
        assert_eq!(config.validate_order(5, 0), Err(OrderValidationError::ZeroPrice));
        assert!(matches!(
            config.validate_order(u64::MAX, 2),
            Err(OrderValidationError::ValueOverflow { .. })
        ));

        config.min_order_amount = 100;
        assert_eq!(
            config.validate_order(99, 1),
            Err(OrderValidationError::BelowMinimum { amount: 99, minimum: 100 })
        );
    }

    #[test]
    fn halt_and_resume() {
        let mut market = MarketState::new(config(), Timestamp::from_millis(0));
        assert!(market.is_active());

        market.halt("release exceeds locked".to_string(), Timestamp::from_millis(5));
        assert_eq!(market.status, MarketStatus::Halted);
        assert!(market.halt_reason.is_some());

        market.resume(Timestamp::from_millis(6));
        assert!(market.is_active());
        assert!(market.halt_reason.is_none());
    }

    #[test]
    fn trade_recording() {
        let mut market = MarketState::new(config(), Timestamp::from_millis(0));
        assert!(market.vwap().is_none());

        market.record_trade(Price::new_unchecked(100), 2, 200, Timestamp::from_millis(1));
        market.record_trade(Price::new_unchecked(50), 2, 100, Timestamp::from_millis(2));

        assert_eq!(market.last_trade_price.unwrap().sats(), 50);
        assert_eq!(market.trade_count, 2);
        assert_eq!(market.vwap(), Some(dec!(75)));
    }

    #[test]
    fn order_lookup_covers_book_and_history() {
        let mut market = MarketState::new(config(), Timestamp::from_millis(0));
        let live = Order::new(
            OrderId(1),
            UserId(1),
            None,
            MarketId(1),
            Side::Buy,
            5,
            Price::new_unchecked(10),
            Timestamp::from_millis(0),
            None,
        );
        let mut done = Order { id: OrderId(2), ..live.clone() };
        done.close(OrderStatus::Cancelled, Timestamp::from_millis(1));

        market.order_book.insert(live);
        market.archive(done);

        assert_eq!(market.order(OrderId(1)).unwrap().status, OrderStatus::Open);
        assert_eq!(market.order(OrderId(2)).unwrap().status, OrderStatus::Cancelled);
        assert_eq!(market.orders().count(), 2);
    }
}
