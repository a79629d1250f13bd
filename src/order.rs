//! Orders and the per-market order book.
//!
//! The book only ever holds live orders (`Open` or `Partial`). Bids iterate
//! highest price first, asks lowest price first, and within a price level the
//! earlier order comes first, with the creation sequence breaking exact ties.

use crate::types::{Asset, MarketId, OrderId, Price, Side, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Partial,
    Filled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// Only live orders rest on the book and take part in matching.
    pub fn is_live(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::Partial)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_live()
    }
}

/// Funds set aside against an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub asset: Asset,
    pub amount: u64,
}

/// A trading order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub user_handle: Option<String>,
    pub market_id: MarketId,
    pub side: Side,
    pub amount: u64,
    pub filled_amount: u64,
    pub price: Price,
    pub status: OrderStatus,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: OrderId,
        user_id: UserId,
        user_handle: Option<String>,
        market_id: MarketId,
        side: Side,
        amount: u64,
        price: Price,
        created_at: Timestamp,
        expires_at: Option<Timestamp>,
    ) -> Self {
        Self {
            id,
            user_id,
            user_handle,
            market_id,
            side,
            amount,
            filled_amount: 0,
            price,
            status: OrderStatus::Open,
            created_at,
            expires_at,
            updated_at: created_at,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.amount - self.filled_amount
    }

    pub fn is_filled(&self) -> bool {
        self.filled_amount == self.amount
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// What is still locked for the unfilled remainder: sats for a buy, tokens for a sell.
    pub fn reservation(&self) -> Reservation {
        match self.side {
            // bounded by the total reserved at placement, which was overflow-checked
            Side::Buy => Reservation {
                asset: Asset::Sats,
                amount: self.remaining().saturating_mul(self.price.sats()),
            },
            Side::Sell => Reservation {
                asset: Asset::Token(self.market_id),
                amount: self.remaining(),
            },
        }
    }

    /// Record `amount` units as filled and move the status along with it.
    pub fn fill(&mut self, amount: u64, at: Timestamp) {
        debug_assert!(amount <= self.remaining(), "cannot fill more than remaining");
        self.filled_amount += amount.min(self.remaining());
        self.status = if self.is_filled() {
            OrderStatus::Filled
        } else if self.filled_amount > 0 {
            OrderStatus::Partial
        } else {
            OrderStatus::Open
        };
        self.updated_at = at;
    }

    /// Move a live order into `Cancelled` or `Expired`.
    pub fn close(&mut self, status: OrderStatus, at: Timestamp) {
        debug_assert!(matches!(status, OrderStatus::Cancelled | OrderStatus::Expired));
        self.status = status;
        self.updated_at = at;
    }
}

/// Order priority key for price-time ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OrderKey {
    side: Side,
    price: Price,
    timestamp: Timestamp,
    order_id: OrderId,
}

impl OrderKey {
    fn for_order(order: &Order) -> Self {
        Self {
            side: order.side,
            price: order.price,
            timestamp: order.created_at,
            order_id: order.id,
        }
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    // keys are only compared within one side of the book
    fn cmp(&self, other: &Self) -> Ordering {
        let by_price = match self.side {
            Side::Buy => other.price.cmp(&self.price),
            Side::Sell => self.price.cmp(&other.price),
        };
        by_price
            .then(self.timestamp.cmp(&other.timestamp))
            .then(self.order_id.cmp(&other.order_id))
    }
}

/// A single price level in the order book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub total_amount: u64,
    pub order_count: usize,
}

/// Central limit order book for one token market.
#[derive(Debug, Clone)]
pub struct OrderBook {
    pub market_id: MarketId,
    /// Best (highest) bid first
    bids: BTreeMap<OrderKey, Order>,
    /// Best (lowest) ask first
    asks: BTreeMap<OrderKey, Order>,
    /// Quick lookup by order ID
    order_index: HashMap<OrderId, OrderKey>,
}

impl OrderBook {
    pub fn new(market_id: MarketId) -> Self {
        Self {
            market_id,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            order_index: HashMap::new(),
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<OrderKey, Order> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn side(&self, side: Side) -> &BTreeMap<OrderKey, Order> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Insert a live order. Re-inserting an id replaces the resting copy.
    pub fn insert(&mut self, order: Order) {
        debug_assert!(order.status.is_live(), "only live orders rest on the book");
        debug_assert_eq!(order.market_id, self.market_id);
        self.remove(order.id);

        let key = OrderKey::for_order(&order);
        self.order_index.insert(order.id, key);
        self.side_mut(key.side).insert(key, order);
    }

    /// Remove an order from the book by ID
    pub fn remove(&mut self, order_id: OrderId) -> Option<Order> {
        let key = self.order_index.remove(&order_id)?;
        self.side_mut(key.side).remove(&key)
    }

    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        let key = self.order_index.get(&order_id)?;
        self.side(key.side).get(key)
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.order_index.contains_key(&order_id)
    }

    /// Apply a fill to a resting order. A fully filled order leaves the book.
    /// Returns the order as it stands after the fill. Priority is unchanged.
    pub fn fill(&mut self, order_id: OrderId, amount: u64, at: Timestamp) -> Option<Order> {
        let key = *self.order_index.get(&order_id)?;
        let order = self.side_mut(key.side).get_mut(&key)?;
        order.fill(amount, at);

        if order.is_filled() {
            self.remove(order_id)
        } else {
            Some(order.clone())
        }
    }

    pub fn peek_best(&self, side: Side) -> Option<&Order> {
        self.side(side).values().next()
    }

    /// Get the best bid price (highest buy order)
    pub fn best_bid(&self) -> Option<Price> {
        self.peek_best(Side::Buy).map(|order| order.price)
    }

    /// Get the best ask price (lowest sell order)
    pub fn best_ask(&self) -> Option<Price> {
        self.peek_best(Side::Sell).map(|order| order.price)
    }

    /// True when the best bid is priced at or above the best ask.
    pub fn best_crosses(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// Best ask minus best bid. Negative while the book is crossed.
    pub fn spread(&self) -> Option<i128> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(i128::from(ask.sats()) - i128::from(bid.sats())),
            _ => None,
        }
    }

    /// Bids in priority order
    pub fn bids(&self) -> impl Iterator<Item = &Order> + '_ {
        self.bids.values()
    }

    /// Asks in priority order
    pub fn asks(&self) -> impl Iterator<Item = &Order> + '_ {
        self.asks.values()
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.bids.values().chain(self.asks.values())
    }

    /// Ids of resting orders whose expiry is at or before `now`.
    pub fn expired(&self, now: Timestamp) -> Vec<OrderId> {
        self.orders()
            .filter(|order| order.is_expired_at(now))
            .map(|order| order.id)
            .collect()
    }

    pub fn bid_levels(&self, max_levels: usize) -> Vec<PriceLevel> {
        aggregate_levels(self.bids.values(), max_levels)
    }

    pub fn ask_levels(&self, max_levels: usize) -> Vec<PriceLevel> {
        aggregate_levels(self.asks.values(), max_levels)
    }

    /// Total number of orders in the book
    pub fn len(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

fn aggregate_levels<'a>(orders: impl Iterator<Item = &'a Order>, max_levels: usize) -> Vec<PriceLevel> {
    let mut levels: Vec<PriceLevel> = Vec::new();

    for order in orders {
        match levels.last_mut() {
            Some(level) if level.price == order.price => {
                level.total_amount += order.remaining();
                level.order_count += 1;
            }
            _ => {
                if levels.len() >= max_levels {
                    break;
                }
                levels.push(PriceLevel {
                    price: order.price,
                    total_amount: order.remaining(),
                    order_count: 1,
                });
            }
        }
    }

    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_order(id: u64, side: Side, price: u64, amount: u64, ts: i64) -> Order {
        Order::new(
            OrderId(id),
            UserId(id),
            None,
            MarketId(1),
            side,
            amount,
            Price::new_unchecked(price),
            Timestamp::from_millis(ts),
            None,
        )
    }

    fn create_bid(id: u64, price: u64, amount: u64, ts: i64) -> Order {
        create_order(id, Side::Buy, price, amount, ts)
    }

    fn create_ask(id: u64, price: u64, amount: u64, ts: i64) -> Order {
        create_order(id, Side::Sell, price, amount, ts)
    }

    #[test]
    fn empty_book() {
        let book = OrderBook::new(MarketId(1));
        assert!(book.is_empty());
        assert!(book.best_bid().is_none());
        assert!(book.best_ask().is_none());
        assert!(!book.best_crosses());
    }

    #[test]
    fn insert_and_retrieve() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(create_bid(1, 500, 1, 0));
        book.insert(create_ask(2, 510, 1, 0));

        assert_eq!(book.best_bid().unwrap().sats(), 500);
        assert_eq!(book.best_ask().unwrap().sats(), 510);
        assert_eq!(book.spread(), Some(10));
        assert!(!book.best_crosses());
    }

    #[test]
    fn spread_covers_the_full_price_range() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(create_bid(1, 1, 1, 0));
        book.insert(create_ask(2, 1u64 << 63, 1, 0));
        assert_eq!(book.spread(), Some((1i128 << 63) - 1));

        book.insert(create_bid(3, u64::MAX, 1, 0));
        assert_eq!(book.spread(), Some((1i128 << 63) - i128::from(u64::MAX)));
        assert!(book.best_crosses());
    }

    #[test]
    fn bid_price_time_priority() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(create_bid(1, 500, 1, 100));
        book.insert(create_bid(2, 500, 1, 50));
        book.insert(create_bid(3, 510, 1, 200));

        let ids: Vec<u64> = book.bids().map(|o| o.id.0).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(book.peek_best(Side::Buy).unwrap().id, OrderId(3));
    }

    #[test]
    fn ask_price_time_priority() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(create_ask(1, 510, 1, 100));
        book.insert(create_ask(2, 500, 1, 300));
        book.insert(create_ask(3, 510, 1, 50));

        let ids: Vec<u64> = book.asks().map(|o| o.id.0).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn identical_timestamps_fall_back_to_id() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(create_ask(9, 500, 1, 10));
        book.insert(create_ask(4, 500, 1, 10));

        assert_eq!(book.peek_best(Side::Sell).unwrap().id, OrderId(4));
    }

    #[test]
    fn crossing_detection() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(create_bid(1, 500, 1, 0));
        book.insert(create_ask(2, 500, 1, 1));
        assert!(book.best_crosses());
    }

    #[test]
    fn partial_fill_keeps_priority() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(create_bid(1, 500, 10, 0));
        book.insert(create_bid(2, 500, 10, 5));

        let after = book.fill(OrderId(1), 4, Timestamp::from_millis(9)).unwrap();
        assert_eq!(after.status, OrderStatus::Partial);
        assert_eq!(after.remaining(), 6);
        assert_eq!(book.peek_best(Side::Buy).unwrap().id, OrderId(1));
    }

    #[test]
    fn complete_fill_leaves_book() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(create_ask(1, 500, 3, 0));

        let after = book.fill(OrderId(1), 3, Timestamp::from_millis(1)).unwrap();
        assert_eq!(after.status, OrderStatus::Filled);
        assert!(!book.contains(OrderId(1)));
        assert!(book.is_empty());
    }

    #[test]
    fn remove_order() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(create_bid(1, 500, 1, 0));
        assert_eq!(book.len(), 1);

        assert!(book.remove(OrderId(1)).is_some());
        assert!(book.remove(OrderId(1)).is_none());
        assert!(book.is_empty());
    }

    #[test]
    fn bid_ask_levels() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(create_bid(1, 500, 1, 0));
        book.insert(create_bid(2, 500, 2, 10));
        book.insert(create_bid(3, 490, 1, 20));
        book.insert(create_ask(4, 520, 5, 0));

        let levels = book.bid_levels(10);
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].price.sats(), 500);
        assert_eq!(levels[0].total_amount, 3);
        assert_eq!(levels[0].order_count, 2);
        assert_eq!(levels[1].price.sats(), 490);

        assert_eq!(book.bid_levels(1).len(), 1);
        assert_eq!(book.ask_levels(10)[0].total_amount, 5);
    }

    #[test]
    fn reservation_by_side() {
        let mut bid = create_bid(1, 50, 10, 0);
        assert_eq!(bid.reservation(), Reservation { asset: Asset::Sats, amount: 500 });
        bid.fill(4, Timestamp::from_millis(1));
        assert_eq!(bid.reservation().amount, 300);

        let ask = create_ask(2, 50, 10, 0);
        assert_eq!(ask.reservation(), Reservation { asset: Asset::Token(MarketId(1)), amount: 10 });
    }

    #[test]
    fn expiry_check() {
        let mut book = OrderBook::new(MarketId(1));
        let mut order = create_bid(1, 500, 1, 0);
        order.expires_at = Some(Timestamp::from_millis(100));
        book.insert(order);
        book.insert(create_bid(2, 500, 1, 0));

        assert!(book.expired(Timestamp::from_millis(99)).is_empty());
        assert_eq!(book.expired(Timestamp::from_millis(100)), vec![OrderId(1)]);
    }
}
