//! Order placement and cancellation.

use super::core::Exchange;
use super::results::{Caller, ExchangeError, OrderRequest, OrderResult};
use crate::events::{EventPayload, OrderClosedEvent, OrderPlacedEvent, OrderRejectedEvent};
use crate::market::{MarketState, OrderValidationError};
use crate::order::{Order, OrderStatus};
use crate::types::{Asset, OrderId, Side};
use tracing::{debug, info};

impl Exchange {
    /// Validate, reserve, rest on the book and match. Resting orders past
    /// their expiry are expired first and never trade.
    ///
    /// Nothing is reserved or inserted unless every check passes. Once the order
    /// is on the book it stays there even if matching then fails: its funds are
    /// reserved and a cancel releases them.
    pub fn place_order(&self, caller: &Caller, request: OrderRequest) -> Result<OrderResult, ExchangeError> {
        let market_id = request.market_id;
        let handle = self.market(market_id)?;
        let mut market = handle.lock();

        let order = match self.admit_locked(&mut market, caller, &request) {
            Ok(order) => order,
            Err(err) => {
                debug!(
                    market = %market_id,
                    user = %caller.user_id,
                    side = %request.side,
                    amount = request.amount,
                    price = request.price_sats,
                    error = %err,
                    "order rejected"
                );
                self.emit_event(EventPayload::OrderRejected(OrderRejectedEvent {
                    market_id,
                    user_id: caller.user_id,
                    side: request.side,
                    amount: request.amount,
                    price_sats: request.price_sats,
                    reason: err.to_string(),
                }));
                return Err(err);
            }
        };
        let order_id = order.id;

        // stale resting orders leave before they can be matched
        self.expire_locked(&mut market)?;
        let (fills, trades) = self.match_locked(&mut market, self.config.default_max_matches)?;
        let order = market
            .order(order_id)
            .cloned()
            .ok_or(ExchangeError::OrderNotFound(order_id))?;

        Ok(OrderResult { order, fills, trades })
    }

    // Pending -> Open: reserve first, then insert
    fn admit_locked(
        &self,
        market: &mut MarketState,
        caller: &Caller,
        request: &OrderRequest,
    ) -> Result<Order, ExchangeError> {
        let market_id = market.id();
        if !market.is_active() {
            return Err(ExchangeError::MarketHalted(market_id));
        }

        let now = self.now();
        let (price, total_sats) = market.config.validate_order(request.amount, request.price_sats)?;
        if let Some(expires_at) = request.expires_at {
            if expires_at <= now {
                return Err(OrderValidationError::AlreadyExpired { expires_at, now }.into());
            }
        }

        let (asset, reserved) = match request.side {
            Side::Buy => (Asset::Sats, total_sats),
            Side::Sell => (Asset::Token(market_id), request.amount),
        };
        if let Err(err) = self.ledger.reserve(caller.user_id, asset, reserved) {
            if err.is_invariant_violation() {
                self.halt_locked(market, err.to_string());
            }
            return Err(err.into());
        }

        let order = Order::new(
            self.next_order_id(),
            caller.user_id,
            caller.handle.clone(),
            market_id,
            request.side,
            request.amount,
            price,
            now,
            request.expires_at,
        );
        market.order_book.insert(order.clone());
        self.order_index.write().insert(order.id, market_id);

        info!(
            market = %market_id,
            order = %order.id,
            user = %caller.user_id,
            side = %order.side,
            amount = order.amount,
            price = %order.price,
            "order placed"
        );
        self.emit_event(EventPayload::OrderPlaced(OrderPlacedEvent {
            market_id,
            order_id: order.id,
            user_id: caller.user_id,
            side: order.side,
            amount: order.amount,
            price,
            reserved,
        }));

        Ok(order)
    }

    /// Cancel a live order and release what remains reserved for it.
    ///
    /// Orders belonging to someone else are reported as not found.
    pub fn cancel_order(&self, caller: &Caller, order_id: OrderId) -> Result<Order, ExchangeError> {
        let market_id = self.market_of(order_id)?;
        let handle = self.market(market_id)?;
        let mut market = handle.lock();

        let order = market
            .order(order_id)
            .filter(|order| order.user_id == caller.user_id)
            .ok_or(ExchangeError::OrderNotFound(order_id))?;
        if order.status.is_terminal() {
            return Err(ExchangeError::InvalidStateTransition(format!(
                "cannot cancel {} in status {:?}",
                order_id, order.status
            )));
        }
        if !market.is_active() {
            return Err(ExchangeError::MarketHalted(market_id));
        }

        self.close_locked(&mut market, order_id, OrderStatus::Cancelled)
    }

    /// Shared release path for cancel and expiry. The ledger release happens
    /// before the book is touched, so a failed release leaves the order resting.
    pub(super) fn close_locked(
        &self,
        market: &mut MarketState,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, ExchangeError> {
        let (user_id, reservation) = market
            .order_book
            .get(order_id)
            .map(|order| (order.user_id, order.reservation()))
            .ok_or(ExchangeError::OrderNotFound(order_id))?;

        if let Err(err) = self.ledger.release(user_id, reservation.asset, reservation.amount) {
            if err.is_invariant_violation() {
                self.halt_locked(market, err.to_string());
            }
            return Err(err.into());
        }

        let mut order = market
            .order_book
            .remove(order_id)
            .ok_or(ExchangeError::OrderNotFound(order_id))?;
        order.close(status, self.now());
        market.archive(order.clone());

        let closed = OrderClosedEvent {
            market_id: market.id(),
            order_id,
            user_id,
            status,
            released: reservation.amount,
        };
        let payload = match status {
            OrderStatus::Expired => EventPayload::OrderExpired(closed),
            _ => EventPayload::OrderCancelled(closed),
        };
        info!(
            market = %market.id(),
            order = %order_id,
            user = %user_id,
            released = reservation.amount,
            status = ?status,
            "order closed"
        );
        self.emit_event(payload);

        Ok(order)
    }
}
