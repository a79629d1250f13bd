// 8.3 engine/sweep.rs: drives the matcher. the same match_locked runs after a placement,
// on a manual retry and on the periodic sweep; run_matching is pure, so all three are safe.

use super::core::Exchange;
use super::results::{ExchangeError, SweepResult};
use crate::events::{EventPayload, TradeExecutedEvent};
use crate::market::MarketState;
use crate::matching::{self, FillInstruction};
use crate::order::OrderStatus;
use crate::settlement;
use crate::trade::{SettlementType, Trade};
use crate::types::{MarketId, OrderId};
use tracing::{info, warn};

impl Exchange {
    /// Expire stale orders, then match crossing orders in one market, at most
    /// `max_matches` fills.
    pub fn run_matching(&self, market_id: MarketId, max_matches: usize) -> Result<Vec<Trade>, ExchangeError> {
        let handle = self.market(market_id)?;
        let mut market = handle.lock();
        if !market.is_active() {
            return Err(ExchangeError::MarketHalted(market_id));
        }
        self.expire_locked(&mut market)?;
        let (_, trades) = self.match_locked(&mut market, max_matches)?;
        Ok(trades)
    }

    /// Expire every resting order in the market whose `expires_at` has passed.
    pub fn expire_orders(&self, market_id: MarketId) -> Result<Vec<OrderId>, ExchangeError> {
        let handle = self.market(market_id)?;
        let mut market = handle.lock();
        if !market.is_active() {
            return Err(ExchangeError::MarketHalted(market_id));
        }
        self.expire_locked(&mut market)
    }

    /// Expiry then a matching pass, market by market. A failing market is
    /// reported and skipped; the others still run.
    pub fn sweep(&self, max_matches: usize) -> SweepResult {
        let mut result = SweepResult::default();

        for market_id in self.market_ids() {
            let Ok(handle) = self.market(market_id) else {
                continue;
            };
            let mut market = handle.lock();
            if !market.is_active() {
                result.halted.push(market_id);
                continue;
            }

            let pass = match self.expire_locked(&mut market) {
                Ok(expired) => self
                    .match_locked(&mut market, max_matches)
                    .map(|(_, trades)| (expired, trades)),
                Err(err) => Err(err),
            };
            match pass {
                Ok((expired, trades)) => {
                    result.expired.extend(expired);
                    result.trades.extend(trades);
                }
                Err(err) => {
                    warn!(market = %market_id, error = %err, "sweep failed for market");
                    if !market.is_active() {
                        result.halted.push(market_id);
                    }
                }
            }
        }

        result
    }

    pub(super) fn expire_locked(&self, market: &mut MarketState) -> Result<Vec<OrderId>, ExchangeError> {
        let expired = market.order_book.expired(self.now());
        for order_id in &expired {
            self.close_locked(market, *order_id, OrderStatus::Expired)?;
        }
        Ok(expired)
    }

    /// Compute fills against the current book and apply them one by one:
    /// ledger first, then the trade record, then the book. A fill whose ledger
    /// transaction fails leaves no trace; an invariant violation also halts the market.
    pub(super) fn match_locked(
        &self,
        market: &mut MarketState,
        max_matches: usize,
    ) -> Result<(Vec<FillInstruction>, Vec<Trade>), ExchangeError> {
        let fills = matching::run_matching(&market.order_book, max_matches);
        let mut trades = Vec::with_capacity(fills.len());

        for (applied, fill) in fills.iter().enumerate() {
            match self.apply_fill_locked(market, fill) {
                Ok(trade) => trades.push(trade),
                Err(err) => {
                    warn!(market = %market.id(), applied, error = %err, "matching stopped");
                    return Err(err);
                }
            }
        }

        Ok((fills, trades))
    }

    fn apply_fill_locked(&self, market: &mut MarketState, fill: &FillInstruction) -> Result<Trade, ExchangeError> {
        let settled = match self.ledger.transaction(|tx| settlement::settle_fill(tx, fill)) {
            Ok(settled) => settled,
            Err(err) => {
                if err.is_invariant_violation() {
                    self.halt_locked(market, err.to_string());
                }
                return Err(err.into());
            }
        };

        let now = self.now();
        let handle_of = |id| market.order(id).and_then(|order| order.user_handle.clone());
        let buyer_handle = handle_of(fill.buy_order_id);
        let seller_handle = handle_of(fill.sell_order_id);

        let trade = self.trades.record(|id| Trade {
            id,
            market_id: fill.market_id,
            buy_order_id: fill.buy_order_id,
            sell_order_id: fill.sell_order_id,
            amount: fill.amount,
            price_sats: fill.price,
            total_sats: settled.total_sats,
            buyer_id: fill.buyer_id,
            seller_id: fill.seller_id,
            buyer_handle,
            seller_handle,
            executed_at: now,
            settlement_type: SettlementType::Offchain,
            chain_tx_id: None,
        });
        if self.config.anchor_onchain {
            self.settlement_queue.enqueue(trade.id);
        }

        for order_id in [fill.buy_order_id, fill.sell_order_id] {
            if let Some(order) = market.order_book.fill(order_id, fill.amount, now) {
                if order.is_filled() {
                    market.archive(order);
                }
            }
        }
        market.record_trade(fill.price, fill.amount, settled.total_sats, now);

        info!(
            market = %fill.market_id,
            trade = %trade.id,
            buyer = %fill.buyer_id,
            seller = %fill.seller_id,
            amount = fill.amount,
            price = %fill.price,
            maker = %fill.maker_side,
            refund = settled.refund_sats,
            "trade executed"
        );
        self.emit_event(EventPayload::TradeExecuted(TradeExecutedEvent {
            market_id: fill.market_id,
            trade_id: trade.id,
            buy_order_id: fill.buy_order_id,
            sell_order_id: fill.sell_order_id,
            maker_side: fill.maker_side,
            amount: fill.amount,
            price: fill.price,
            total_sats: settled.total_sats,
        }));

        Ok(trade)
    }
}
