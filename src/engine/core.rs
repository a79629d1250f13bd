// 8.0 engine/core.rs: main exchange struct. holds all markets, the ledger, trades and events.

use super::results::ExchangeError;
use crate::config::ExchangeConfig;
use crate::events::{
    Event, EventCollector, EventId, EventPayload, MarketCreatedEvent, MarketHaltedEvent, MarketResumedEvent,
};
use crate::ledger::Ledger;
use crate::market::{MarketConfig, MarketState, MarketStatus};
use crate::settlement::SettlementQueue;
use crate::trade::TradeStore;
use crate::types::{Asset, MarketId, OrderId, Timestamp, UserId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/** 8.1: main exchange struct. all state lives here. share it across threads behind an Arc */
#[derive(Debug)]
pub struct Exchange {
    pub(super) config: ExchangeConfig,
    pub(super) ledger: Ledger,
    pub(super) markets: RwLock<HashMap<MarketId, Arc<Mutex<MarketState>>>>,
    pub(super) order_index: RwLock<HashMap<OrderId, MarketId>>,
    pub(super) trades: TradeStore,
    pub(super) settlement_queue: SettlementQueue,
    pub(super) events: Mutex<EventCollector>,
    next_order_id: AtomicU64,
    current_time: AtomicI64,
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new(ExchangeConfig::default())
    }
}

impl Exchange {
    pub fn new(config: ExchangeConfig) -> Self {
        let events = EventCollector::with_capacity(config.max_events);
        Self {
            config,
            ledger: Ledger::new(),
            markets: RwLock::new(HashMap::new()),
            order_index: RwLock::new(HashMap::new()),
            trades: TradeStore::new(),
            settlement_queue: SettlementQueue::new(),
            events: Mutex::new(events),
            next_order_id: AtomicU64::new(1),
            current_time: AtomicI64::new(0),
        }
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn set_time(&self, timestamp: Timestamp) {
        self.current_time.store(timestamp.as_millis(), Ordering::SeqCst);
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.current_time.load(Ordering::SeqCst))
    }

    pub fn advance_time(&self, millis: i64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn create_market(&self, config: MarketConfig) -> Result<MarketId, ExchangeError> {
        let market_id = config.id;
        let mut markets = self.markets.write();
        if markets.contains_key(&market_id) {
            return Err(ExchangeError::MarketExists(market_id));
        }

        let payload = EventPayload::MarketCreated(MarketCreatedEvent {
            market_id,
            token_id: config.token_id.clone(),
            symbol: config.symbol.clone(),
        });
        info!(market = %market_id, symbol = %config.symbol, "market created");
        markets.insert(market_id, Arc::new(Mutex::new(MarketState::new(config, self.now()))));
        drop(markets);

        self.emit_event(payload);
        Ok(market_id)
    }

    pub fn market_ids(&self) -> Vec<MarketId> {
        let mut ids: Vec<MarketId> = self.markets.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn market_status(&self, market_id: MarketId) -> Result<MarketStatus, ExchangeError> {
        Ok(self.market(market_id)?.lock().status)
    }

    /// Credit funds from outside the exchange.
    pub fn deposit(&self, user: UserId, asset: Asset, amount: u64) -> Result<(), ExchangeError> {
        self.ensure_asset(asset)?;
        self.ledger.deposit(user, asset, amount)?;
        info!(user = %user, asset = %asset, amount, "deposit");
        Ok(())
    }

    /// Pay out available funds. Locked funds stay with their orders.
    pub fn withdraw(&self, user: UserId, asset: Asset, amount: u64) -> Result<(), ExchangeError> {
        self.ensure_asset(asset)?;
        self.ledger.withdraw(user, asset, amount)?;
        info!(user = %user, asset = %asset, amount, "withdrawal");
        Ok(())
    }

    /// Operator halt.
    pub fn halt_market(&self, market_id: MarketId, reason: impl Into<String>) -> Result<(), ExchangeError> {
        let handle = self.market(market_id)?;
        let mut market = handle.lock();
        self.halt_locked(&mut market, reason.into());
        Ok(())
    }

    /// Operator intervention after a halt.
    pub fn resume_market(&self, market_id: MarketId) -> Result<(), ExchangeError> {
        let handle = self.market(market_id)?;
        let mut market = handle.lock();
        if market.is_active() {
            return Ok(());
        }
        market.resume(self.now());
        warn!(market = %market_id, "market resumed by operator");
        self.emit_event(EventPayload::MarketResumed(MarketResumedEvent { market_id }));
        Ok(())
    }

    pub(super) fn market(&self, market_id: MarketId) -> Result<Arc<Mutex<MarketState>>, ExchangeError> {
        self.markets
            .read()
            .get(&market_id)
            .cloned()
            .ok_or(ExchangeError::MarketNotFound(market_id))
    }

    pub(super) fn market_of(&self, order_id: OrderId) -> Result<MarketId, ExchangeError> {
        self.order_index
            .read()
            .get(&order_id)
            .copied()
            .ok_or(ExchangeError::OrderNotFound(order_id))
    }

    // callers hold the market lock, so ids within one market follow arrival order
    pub(super) fn next_order_id(&self) -> OrderId {
        OrderId(self.next_order_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(super) fn halt_locked(&self, market: &mut MarketState, reason: String) {
        let market_id = market.id();
        error!(market = %market_id, %reason, "halting market");
        market.halt(reason.clone(), self.now());
        self.emit_event(EventPayload::MarketHalted(MarketHaltedEvent { market_id, reason }));
    }

    pub(super) fn emit_event(&self, payload: EventPayload) -> EventId {
        self.events.lock().record(self.now(), payload)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().events()
    }

    pub fn events_since(&self, event_id: EventId) -> Vec<Event> {
        self.events.lock().since(event_id)
    }

    fn ensure_asset(&self, asset: Asset) -> Result<(), ExchangeError> {
        match asset {
            Asset::Sats => Ok(()),
            Asset::Token(market_id) => self.market(market_id).map(|_| ()),
        }
    }
}
