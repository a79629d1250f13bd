// 5.0 trade.rs: immutable record of one match, plus the store trades are written to.
// only the settlement type and chain tx id ever change after creation, and only forward.

use crate::settlement::SettlementError;
use crate::types::{MarketId, OrderId, Price, Timestamp, TradeId, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// How far a trade's balance movement has travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementType {
    /// Applied to the internal ledger only.
    Offchain,
    /// Submitted to the chain, confirmation outstanding.
    Pending,
    /// Confirmed on chain. Final.
    Onchain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub market_id: MarketId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub amount: u64,
    pub price_sats: Price,
    pub total_sats: u64,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub buyer_handle: Option<String>,
    pub seller_handle: Option<String>,
    pub executed_at: Timestamp,
    pub settlement_type: SettlementType,
    pub chain_tx_id: Option<String>,
}

impl Trade {
    fn mark_pending(&mut self) -> Result<(), SettlementError> {
        match self.settlement_type {
            SettlementType::Offchain | SettlementType::Pending => {
                self.settlement_type = SettlementType::Pending;
                Ok(())
            }
            SettlementType::Onchain => Err(SettlementError::AlreadyAnchored(self.id)),
        }
    }

    fn confirm(&mut self, chain_tx_id: String) -> Result<(), SettlementError> {
        match self.settlement_type {
            SettlementType::Offchain | SettlementType::Pending => {
                self.settlement_type = SettlementType::Onchain;
                self.chain_tx_id = Some(chain_tx_id);
                Ok(())
            }
            SettlementType::Onchain => Err(SettlementError::AlreadyAnchored(self.id)),
        }
    }
}

/// What downstream display consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeView {
    pub price_sats: u64,
    pub amount: u64,
    pub total_sats: u64,
    pub buyer_handle: String,
    pub seller_handle: String,
    pub executed_at: Timestamp,
    pub settlement_type: SettlementType,
}

impl From<&Trade> for TradeView {
    fn from(trade: &Trade) -> Self {
        Self {
            price_sats: trade.price_sats.sats(),
            amount: trade.amount,
            total_sats: trade.total_sats,
            buyer_handle: display_handle(trade.buyer_handle.as_deref(), trade.buyer_id),
            seller_handle: display_handle(trade.seller_handle.as_deref(), trade.seller_id),
            executed_at: trade.executed_at,
            settlement_type: trade.settlement_type,
        }
    }
}

fn display_handle(handle: Option<&str>, user: UserId) -> String {
    match handle {
        Some(handle) => handle.to_string(),
        None => user.to_string(),
    }
}

/// Append-only trade table. Ids are dense and start at 1.
#[derive(Debug, Default)]
pub struct TradeStore {
    trades: Mutex<Vec<Trade>>,
}

impl TradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a trade built around the next id.
    pub fn record<F>(&self, build: F) -> Trade
    where
        F: FnOnce(TradeId) -> Trade,
    {
        let mut trades = self.trades.lock();
        let trade = build(TradeId(trades.len() as u64 + 1));
        trades.push(trade.clone());
        trade
    }

    pub fn get(&self, trade_id: TradeId) -> Option<Trade> {
        let index = usize::try_from(trade_id.0).ok()?.checked_sub(1)?;
        self.trades.lock().get(index).cloned()
    }

    /// Newest first.
    pub fn recent(&self, market_id: MarketId, limit: usize) -> Vec<Trade> {
        self.trades
            .lock()
            .iter()
            .rev()
            .filter(|trade| trade.market_id == market_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.trades.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.lock().is_empty()
    }

    pub fn mark_pending(&self, trade_id: TradeId) -> Result<Trade, SettlementError> {
        self.update(trade_id, |trade| trade.mark_pending())
    }

    pub fn confirm(&self, trade_id: TradeId, chain_tx_id: String) -> Result<Trade, SettlementError> {
        self.update(trade_id, |trade| trade.confirm(chain_tx_id))
    }

    fn update<F>(&self, trade_id: TradeId, apply: F) -> Result<Trade, SettlementError>
    where
        F: FnOnce(&mut Trade) -> Result<(), SettlementError>,
    {
        let mut trades = self.trades.lock();
        let trade = usize::try_from(trade_id.0)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|index| trades.get_mut(index))
            .ok_or(SettlementError::TradeNotFound(trade_id))?;
        apply(trade)?;
        Ok(trade.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: TradeId) -> Trade {
        Trade {
            id,
            market_id: MarketId(1),
            buy_order_id: OrderId(1),
            sell_order_id: OrderId(2),
            amount: 4,
            price_sats: Price::new_unchecked(50),
            total_sats: 200,
            buyer_id: UserId(10),
            seller_id: UserId(20),
            buyer_handle: Some("$alice".to_string()),
            seller_handle: None,
            executed_at: Timestamp::from_millis(5),
            settlement_type: SettlementType::Offchain,
            chain_tx_id: None,
        }
    }

    #[test]
    fn ids_are_dense() {
        let store = TradeStore::new();
        let first = store.record(sample);
        let second = store.record(sample);
        assert_eq!(first.id, TradeId(1));
        assert_eq!(second.id, TradeId(2));
        assert_eq!(store.get(TradeId(2)).unwrap().id, TradeId(2));
        assert!(store.get(TradeId(0)).is_none());
        assert!(store.get(TradeId(3)).is_none());
    }

    #[test]
    fn settlement_moves_forward_only() {
        let store = TradeStore::new();
        let trade = store.record(sample);

        let pending = store.mark_pending(trade.id).unwrap();
        assert_eq!(pending.settlement_type, SettlementType::Pending);

        let anchored = store.confirm(trade.id, "ab12".to_string()).unwrap();
        assert_eq!(anchored.settlement_type, SettlementType::Onchain);
        assert_eq!(anchored.chain_tx_id.as_deref(), Some("ab12"));

        assert!(matches!(store.mark_pending(trade.id), Err(SettlementError::AlreadyAnchored(_))));
        assert!(matches!(
            store.confirm(trade.id, "cd34".to_string()),
            Err(SettlementError::AlreadyAnchored(_))
        ));
        assert_eq!(store.get(trade.id).unwrap().chain_tx_id.as_deref(), Some("ab12"));
    }

    #[test]
    fn recent_is_newest_first_per_market() {
        let store = TradeStore::new();
        store.record(sample);
        store.record(|id| Trade { market_id: MarketId(2), ..sample(id) });
        store.record(sample);

        let recent = store.recent(MarketId(1), 10);
        let ids: Vec<u64> = recent.iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![3, 1]);
        assert_eq!(store.recent(MarketId(1), 1).len(), 1);
    }

    #[test]
    fn view_uses_lowercase_settlement_and_falls_back_to_user_id() {
        let view = TradeView::from(&sample(TradeId(1)));
        assert_eq!(view.buyer_handle, "$alice");
        assert_eq!(view.seller_handle, "user-20");

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["settlement_type"], "offchain");
        assert_eq!(json["total_sats"], 200);
    }
}
