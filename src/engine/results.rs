// 8.0.2: request, result and error types for exchange operations.

use crate::ledger::LedgerError;
use crate::market::{MarketStatus, OrderValidationError};
use crate::matching::FillInstruction;
use crate::order::{Order, OrderStatus, PriceLevel};
use crate::settlement::SettlementError;
use crate::trade::Trade;
use crate::types::{Asset, MarketId, OrderId, Price, Side, Timestamp, TradeId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identity as resolved by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: UserId,
    pub handle: Option<String>,
}

impl Caller {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id, handle: None }
    }

    pub fn with_handle(user_id: UserId, handle: impl Into<String>) -> Self {
        Self {
            user_id,
            handle: Some(handle.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub market_id: MarketId,
    pub side: Side,
    pub amount: u64,
    pub price_sats: u64,
    pub expires_at: Option<Timestamp>,
}

impl OrderRequest {
    pub fn buy(market_id: MarketId, amount: u64, price_sats: u64) -> Self {
        Self {
            market_id,
            side: Side::Buy,
            amount,
            price_sats,
            expires_at: None,
        }
    }

    pub fn sell(market_id: MarketId, amount: u64, price_sats: u64) -> Self {
        Self {
            side: Side::Sell,
            ..Self::buy(market_id, amount, price_sats)
        }
    }

    pub fn expiring_at(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Outcome of a placement: the order as it stands after matching, plus every
/// fill that matching run produced.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order: Order,
    pub fills: Vec<FillInstruction>,
    pub trades: Vec<Trade>,
}

impl OrderResult {
    pub fn order_id(&self) -> OrderId {
        self.order.id
    }

    pub fn filled_amount(&self) -> u64 {
        self.order.filled_amount
    }

    pub fn is_posted(&self) -> bool {
        self.order.status.is_live()
    }

    /// Average execution price of the fills that touched this order.
    pub fn average_price(&self) -> Option<Decimal> {
        let (units, sats) = self
            .trades
            .iter()
            .filter(|t| t.buy_order_id == self.order.id || t.sell_order_id == self.order.id)
            .fold((0u128, 0u128), |(units, sats), t| {
                (units + t.amount as u128, sats + t.total_sats as u128)
            });
        if units == 0 {
            return None;
        }
        let sats = Decimal::from_i128_with_scale(i128::try_from(sats).ok()?, 0);
        let units = Decimal::from_i128_with_scale(i128::try_from(units).ok()?, 0);
        sats.checked_div(units)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub market_id: Option<MarketId>,
    pub side: Option<Side>,
    pub status: Option<OrderStatus>,
    /// Only the caller's own orders. Requires a caller.
    pub mine_only: bool,
    pub limit: Option<usize>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order, caller: Option<UserId>) -> bool {
        self.market_id.map_or(true, |m| order.market_id == m)
            && self.side.map_or(true, |s| order.side == s)
            && self.status.map_or(true, |s| order.status == s)
            && (!self.mine_only || caller == Some(order.user_id))
    }
}

/// Depth snapshot of one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub market_id: MarketId,
    pub symbol: String,
    pub status: MarketStatus,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub spread: Option<i128>,
    pub last_trade_price: Option<Price>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStats {
    pub market_id: MarketId,
    pub status: MarketStatus,
    pub open_orders: usize,
    pub trade_count: u64,
    pub volume_units: u128,
    pub volume_sats: u128,
    pub last_trade_price: Option<Price>,
    pub vwap: Option<Decimal>,
}

/// One sweep pass over every market.
#[derive(Debug, Clone, Default)]
pub struct SweepResult {
    pub expired: Vec<OrderId>,
    pub trades: Vec<Trade>,
    /// Markets skipped because they are halted, or halted during this pass.
    pub halted: Vec<MarketId>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("Insufficient funds for {user}: requested {requested} sats, available {available}")]
    InsufficientFunds {
        user: UserId,
        requested: u64,
        available: u64,
    },

    #[error("Insufficient {asset} for {user}: requested {requested}, available {available}")]
    InsufficientAsset {
        user: UserId,
        asset: Asset,
        requested: u64,
        available: u64,
    },

    #[error("Invalid order: {0}")]
    InvalidOrder(#[from] OrderValidationError),

    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Ledger invariant violated: {0}")]
    LedgerInvariantViolation(String),

    #[error("Market {0} not found")]
    MarketNotFound(MarketId),

    #[error("Market {0} already exists")]
    MarketExists(MarketId),

    #[error("Market {0} is halted")]
    MarketHalted(MarketId),

    #[error("Trade {0} not found")]
    TradeNotFound(TradeId),

    #[error("Caller identity required")]
    IdentityRequired,

    #[error("Settlement error: {0}")]
    Settlement(SettlementError),
}

impl From<LedgerError> for ExchangeError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                user,
                requested,
                available,
            } => ExchangeError::InsufficientFunds {
                user,
                requested,
                available,
            },
            LedgerError::InsufficientAsset {
                user,
                asset,
                requested,
                available,
            } => ExchangeError::InsufficientAsset {
                user,
                asset,
                requested,
                available,
            },
            violation @ LedgerError::InvariantViolation { .. } => {
                ExchangeError::LedgerInvariantViolation(violation.to_string())
            }
        }
    }
}

impl From<SettlementError> for ExchangeError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::TradeNotFound(trade_id) => ExchangeError::TradeNotFound(trade_id),
            SettlementError::AlreadyAnchored(trade_id) => {
                ExchangeError::InvalidStateTransition(format!("{} is already onchain", trade_id))
            }
            other => ExchangeError::Settlement(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::SettlementType;

    #[test]
    fn ledger_errors_map_to_exchange_kinds() {
        let err: ExchangeError = LedgerError::InsufficientFunds {
            user: UserId(1),
            requested: 10,
            available: 5,
        }
        .into();
        assert!(matches!(err, ExchangeError::InsufficientFunds { requested: 10, .. }));

        let err: ExchangeError = LedgerError::InvariantViolation {
            user: UserId(1),
            asset: Asset::Sats,
            reason: "release exceeds locked".to_string(),
        }
        .into();
        assert!(matches!(err, ExchangeError::LedgerInvariantViolation(ref r) if r.contains("release exceeds locked")));
    }

    #[test]
    fn settlement_errors_map_to_exchange_kinds() {
        let err: ExchangeError = SettlementError::AlreadyAnchored(TradeId(3)).into();
        assert!(matches!(err, ExchangeError::InvalidStateTransition(_)));

        let err: ExchangeError = SettlementError::TradeNotFound(TradeId(3)).into();
        assert_eq!(err, ExchangeError::TradeNotFound(TradeId(3)));
    }

    #[test]
    fn filter_requires_every_criterion() {
        let order = Order::new(
            OrderId(1),
            UserId(7),
            None,
            MarketId(2),
            Side::Sell,
            5,
            Price::new_unchecked(10),
            Timestamp::from_millis(0),
            None,
        );

        assert!(OrderFilter::default().matches(&order, None));
        let mine = OrderFilter {
            mine_only: true,
            ..OrderFilter::default()
        };
        assert!(mine.matches(&order, Some(UserId(7))));
        assert!(!mine.matches(&order, Some(UserId(8))));

        let other_market = OrderFilter {
            market_id: Some(MarketId(1)),
            ..OrderFilter::default()
        };
        assert!(!other_market.matches(&order, None));

        let sells_open = OrderFilter {
            side: Some(Side::Sell),
            status: Some(OrderStatus::Open),
            ..OrderFilter::default()
        };
        assert!(sells_open.matches(&order, None));
    }

    #[test]
    fn average_price_only_counts_own_trades() {
        let order = Order::new(
            OrderId(1),
            UserId(7),
            None,
            MarketId(1),
            Side::Buy,
            10,
            Price::new_unchecked(100),
            Timestamp::from_millis(0),
            None,
        );
        let trade = |id: u64, buy: u64, amount: u64, price: u64| Trade {
            id: TradeId(id),
            market_id: MarketId(1),
            buy_order_id: OrderId(buy),
            sell_order_id: OrderId(50 + id),
            amount,
            price_sats: Price::new_unchecked(price),
            total_sats: amount * price,
            buyer_id: UserId(7),
            seller_id: UserId(8),
            buyer_handle: None,
            seller_handle: None,
            executed_at: Timestamp::from_millis(0),
            settlement_type: SettlementType::Offchain,
            chain_tx_id: None,
        };

        let result = OrderResult {
            order,
            fills: Vec::new(),
            trades: vec![trade(1, 1, 2, 90), trade(2, 1, 2, 100), trade(3, 9, 5, 1)],
        };
        assert_eq!(result.average_price(), Some(Decimal::from(95)));
    }
}
