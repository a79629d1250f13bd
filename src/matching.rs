//! Price-time matching.
//!
//! `run_matching` is a pure function of the book: it borrows it immutably, walks
//! bids and asks in priority order and pairs them while they cross, tracking the
//! consumed quantity locally. Nothing is mutated, so calling it from the order
//! path or from a sweep is the same operation. The caller applies the returned
//! fills in order through settlement and then the book.

use crate::order::{Order, OrderBook};
use crate::types::{MarketId, OrderId, Price, Side, UserId};
use serde::{Deserialize, Serialize};

/// One match between a bid and an ask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillInstruction {
    pub market_id: MarketId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub amount: u64,
    /// Execution price: always the maker's limit.
    pub price: Price,
    /// Side of the resting order.
    pub maker_side: Side,
    /// The bid's limit. Sats reserved above `price` go back to the buyer on settlement.
    pub buyer_limit: Price,
}

impl FillInstruction {
    /// Sats the buyer pays. `None` only if `amount * price` overflows.
    pub fn total_sats(&self) -> Option<u64> {
        self.price.total_for(self.amount)
    }

    pub fn maker_order_id(&self) -> OrderId {
        match self.maker_side {
            Side::Buy => self.buy_order_id,
            Side::Sell => self.sell_order_id,
        }
    }

    pub fn taker_order_id(&self) -> OrderId {
        match self.maker_side {
            Side::Buy => self.sell_order_id,
            Side::Sell => self.buy_order_id,
        }
    }
}

/// The maker is whichever order reached the book first.
pub fn maker_side(bid: &Order, ask: &Order) -> Side {
    if (bid.created_at, bid.id) <= (ask.created_at, ask.id) {
        Side::Buy
    } else {
        Side::Sell
    }
}

/// Pair the best bid and ask until they stop crossing or `max_matches` fills
/// have been produced.
pub fn run_matching(book: &OrderBook, max_matches: usize) -> Vec<FillInstruction> {
    let mut fills = Vec::new();
    if max_matches == 0 {
        return fills;
    }

    let mut bids = book.bids().filter(|order| order.remaining() > 0);
    let mut asks = book.asks().filter(|order| order.remaining() > 0);

    // (order, quantity still unmatched in this run)
    let mut bid = bids.next().map(|order| (order, order.remaining()));
    let mut ask = asks.next().map(|order| (order, order.remaining()));

    while fills.len() < max_matches {
        let (Some((best_bid, bid_left)), Some((best_ask, ask_left))) = (bid.as_mut(), ask.as_mut()) else {
            break;
        };

        if best_bid.price < best_ask.price {
            break;
        }

        let amount = (*bid_left).min(*ask_left);
        let maker = maker_side(best_bid, best_ask);
        let price = match maker {
            Side::Buy => best_bid.price,
            Side::Sell => best_ask.price,
        };

        fills.push(FillInstruction {
            market_id: book.market_id,
            buy_order_id: best_bid.id,
            sell_order_id: best_ask.id,
            buyer_id: best_bid.user_id,
            seller_id: best_ask.user_id,
            amount,
            price,
            maker_side: maker,
            buyer_limit: best_bid.price,
        });

        *bid_left -= amount;
        *ask_left -= amount;
        let bid_done = *bid_left == 0;
        let ask_done = *ask_left == 0;

        // a partially consumed order stays at the head of its side
        if bid_done {
            bid = bids.next().map(|order| (order, order.remaining()));
        }
        if ask_done {
            ask = asks.next().map(|order| (order, order.remaining()));
        }
    }

    fills
}
