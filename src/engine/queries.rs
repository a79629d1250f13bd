//! Read-only views over orders, trades, books and balances.

use super::core::Exchange;
use super::results::{BookSnapshot, Caller, ExchangeError, MarketStats, OrderFilter};
use crate::ledger::{Balance, LedgerEntry};
use crate::order::Order;
use crate::trade::{Trade, TradeView};
use crate::types::{Asset, MarketId, OrderId, TradeId, UserId};

impl Exchange {
    pub fn order(&self, order_id: OrderId) -> Result<Order, ExchangeError> {
        let market_id = self.market_of(order_id)?;
        let handle = self.market(market_id)?;
        let market = handle.lock();
        market
            .order(order_id)
            .cloned()
            .ok_or(ExchangeError::OrderNotFound(order_id))
    }

    /// Orders matching `filter`, newest first.
    pub fn list_orders(&self, filter: &OrderFilter, caller: Option<&Caller>) -> Result<Vec<Order>, ExchangeError> {
        let caller_id = caller.map(|c| c.user_id);
        if filter.mine_only && caller_id.is_none() {
            return Err(ExchangeError::IdentityRequired);
        }

        let market_ids = match filter.market_id {
            Some(market_id) => {
                self.market(market_id)?;
                vec![market_id]
            }
            None => self.market_ids(),
        };

        let mut orders = Vec::new();
        for market_id in market_ids {
            let handle = self.market(market_id)?;
            let market = handle.lock();
            orders.extend(market.orders().filter(|o| filter.matches(o, caller_id)).cloned());
        }

        orders.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        if let Some(limit) = filter.limit {
            orders.truncate(limit);
        }
        Ok(orders)
    }

    pub fn trade(&self, trade_id: TradeId) -> Result<Trade, ExchangeError> {
        self.trades.get(trade_id).ok_or(ExchangeError::TradeNotFound(trade_id))
    }

    /// Newest first.
    pub fn recent_trades(&self, market_id: MarketId, limit: usize) -> Result<Vec<Trade>, ExchangeError> {
        self.market(market_id)?;
        Ok(self.trades.recent(market_id, limit))
    }

    pub fn trade_views(&self, market_id: MarketId, limit: usize) -> Result<Vec<TradeView>, ExchangeError> {
        Ok(self.recent_trades(market_id, limit)?.iter().map(TradeView::from).collect())
    }

    pub fn order_book(&self, market_id: MarketId, depth: usize) -> Result<BookSnapshot, ExchangeError> {
        let handle = self.market(market_id)?;
        let market = handle.lock();
        let book = &market.order_book;

        Ok(BookSnapshot {
            market_id,
            symbol: market.config.symbol.clone(),
            status: market.status,
            bids: book.bid_levels(depth),
            asks: book.ask_levels(depth),
            best_bid: book.best_bid(),
            best_ask: book.best_ask(),
            spread: book.spread(),
            last_trade_price: market.last_trade_price,
            timestamp: self.now(),
        })
    }

    pub fn market_stats(&self, market_id: MarketId) -> Result<MarketStats, ExchangeError> {
        let handle = self.market(market_id)?;
        let market = handle.lock();

        Ok(MarketStats {
            market_id,
            status: market.status,
            open_orders: market.order_book.len(),
            trade_count: market.trade_count,
            volume_units: market.volume_units,
            volume_sats: market.volume_sats,
            last_trade_price: market.last_trade_price,
            vwap: market.vwap(),
        })
    }

    pub fn balance_of(&self, user: UserId, asset: Asset) -> Balance {
        self.ledger.balance_of(user, asset)
    }

    /// Sum of `available + locked` across all users.
    pub fn total_held(&self, asset: Asset) -> u128 {
        self.ledger.total_held(asset)
    }

    pub fn ledger_journal(&self) -> Vec<LedgerEntry> {
        self.ledger.journal()
    }

    /// Journal entries committed after `seq`, for incremental audit readers.
    pub fn ledger_journal_since(&self, seq: u64) -> Vec<LedgerEntry> {
        self.ledger.journal_since(seq)
    }

    /// Sequence number of the last committed journal entry, 0 before any.
    pub fn ledger_seq(&self) -> u64 {
        self.ledger.last_seq()
    }
}
