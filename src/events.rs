// 11.0: every state change on the exchange produces an event. used for audit trails
// and notifying external systems. the EventPayload enum lists all event types.

use crate::order::OrderStatus;
use crate::trade::SettlementType;
use crate::types::{MarketId, OrderId, Price, Side, Timestamp, TradeId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // Market events
    MarketCreated(MarketCreatedEvent),
    MarketHalted(MarketHaltedEvent),
    MarketResumed(MarketResumedEvent),

    // Order events
    OrderPlaced(OrderPlacedEvent),
    OrderRejected(OrderRejectedEvent),
    OrderCancelled(OrderClosedEvent),
    OrderExpired(OrderClosedEvent),

    // Trade events
    TradeExecuted(TradeExecutedEvent),
    TradeAnchored(TradeAnchoredEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketCreatedEvent {
    pub market_id: MarketId,
    pub token_id: String,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketHaltedEvent {
    pub market_id: MarketId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketResumedEvent {
    pub market_id: MarketId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlacedEvent {
    pub market_id: MarketId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub side: Side,
    pub amount: u64,
    pub price: Price,
    pub reserved: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRejectedEvent {
    pub market_id: MarketId,
    pub user_id: UserId,
    pub side: Side,
    pub amount: u64,
    pub price_sats: u64,
    pub reason: String,
}

// Shared by cancel and expiry: both close the order and release what remained
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderClosedEvent {
    pub market_id: MarketId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub released: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeExecutedEvent {
    pub market_id: MarketId,
    pub trade_id: TradeId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub maker_side: Side,
    pub amount: u64,
    pub price: Price,
    pub total_sats: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeAnchoredEvent {
    pub trade_id: TradeId,
    pub settlement_type: SettlementType,
    pub chain_tx_id: Option<String>,
}

pub trait EventEmitter {
    fn emit(&mut self, event: Event);
}

/// Bounded event log. Once `capacity` is reached the oldest event is dropped;
/// ids keep increasing regardless.
#[derive(Debug)]
pub struct EventCollector {
    events: VecDeque<Event>,
    next_id: u64,
    capacity: usize,
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl EventCollector {
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            next_id: 1,
            capacity,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    pub fn since(&self, id: EventId) -> Vec<Event> {
        self.events.iter().filter(|e| e.id > id).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn record(&mut self, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let id = self.next_id();
        self.emit(Event::new(id, timestamp, payload));
        id
    }
}

impl EventEmitter for EventCollector {
    fn emit(&mut self, event: Event) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}
