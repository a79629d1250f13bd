//! End-to-end order lifecycle scenarios.

use sats_exchange::*;

const BOB: MarketId = MarketId(1);

fn exchange_with(users: &[(u64, u64, u64)]) -> Exchange {
    let exchange = Exchange::default();
    exchange.create_market(MarketConfig::new(BOB, "bob-token", "$BOB")).unwrap();
    for &(user, sats, tokens) in users {
        exchange.deposit(UserId(user), Asset::Sats, sats).unwrap();
        exchange.deposit(UserId(user), Asset::Token(BOB), tokens).unwrap();
    }
    exchange
}

#[test]
fn resting_bid_sets_the_price() {
    let exchange = exchange_with(&[(1, 10_000, 0), (2, 0, 10)]);
    let buyer = Caller::new(UserId(1));
    let seller = Caller::new(UserId(2));

    exchange.set_time(Timestamp::from_millis(1));
    exchange.place_order(&buyer, OrderRequest::buy(BOB, 10, 100)).unwrap();
    exchange.set_time(Timestamp::from_millis(2));
    let result = exchange.place_order(&seller, OrderRequest::sell(BOB, 10, 90)).unwrap();

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.price_sats.sats(), 100);
    assert_eq!(trade.total_sats, 1_000);
    assert_eq!(result.fills[0].maker_side, Side::Buy);
    assert_eq!(exchange.balance_of(UserId(2), Asset::Sats).available, 1_000);
    assert_eq!(exchange.balance_of(UserId(1), Asset::Token(BOB)).available, 10);
}

#[test]
fn resting_ask_sets_the_price() {
    let exchange = exchange_with(&[(1, 10_000, 0), (2, 0, 10)]);

    exchange.set_time(Timestamp::from_millis(1));
    exchange.place_order(&Caller::new(UserId(2)), OrderRequest::sell(BOB, 10, 90)).unwrap();
    exchange.set_time(Timestamp::from_millis(2));
    let result = exchange.place_order(&Caller::new(UserId(1)), OrderRequest::buy(BOB, 10, 100)).unwrap();

    assert_eq!(result.trades[0].price_sats.sats(), 90);
    // 10 x (100 - 90) reserved above the execution price comes back
    let sats = exchange.balance_of(UserId(1), Asset::Sats);
    assert_eq!(sats.available, 9_100);
    assert_eq!(sats.locked, 0);
}

#[test]
fn partial_fill_sequencing() {
    let exchange = exchange_with(&[(1, 1_000, 0), (2, 0, 4), (3, 0, 6)]);
    let buyer = Caller::new(UserId(1));

    exchange.set_time(Timestamp::from_millis(1));
    let bid = exchange.place_order(&buyer, OrderRequest::buy(BOB, 10, 50)).unwrap();
    assert_eq!(bid.order.status, OrderStatus::Open);

    exchange.set_time(Timestamp::from_millis(2));
    let first = exchange.place_order(&Caller::new(UserId(2)), OrderRequest::sell(BOB, 4, 50)).unwrap();
    assert_eq!(first.trades[0].amount, 4);
    let after_first = exchange.order(bid.order_id()).unwrap();
    assert_eq!(after_first.status, OrderStatus::Partial);
    assert_eq!(after_first.filled_amount, 4);
    // priority survives the partial fill
    assert_eq!(after_first.created_at, Timestamp::from_millis(1));

    exchange.set_time(Timestamp::from_millis(3));
    let second = exchange.place_order(&Caller::new(UserId(3)), OrderRequest::sell(BOB, 6, 50)).unwrap();
    assert_eq!(second.trades[0].amount, 6);
    let done = exchange.order(bid.order_id()).unwrap();
    assert_eq!(done.status, OrderStatus::Filled);
    assert_eq!(done.filled_amount, 10);

    let trades = exchange.recent_trades(BOB, 10).unwrap();
    let amounts: Vec<u64> = trades.iter().rev().map(|t| t.amount).collect();
    assert_eq!(amounts, vec![4, 6]);
    assert!(exchange.order_book(BOB, 10).unwrap().bids.is_empty());
}

#[test]
fn insufficient_funds_changes_nothing() {
    let exchange = exchange_with(&[(1, 999, 0)]);
    let buyer = Caller::new(UserId(1));

    let err = exchange.place_order(&buyer, OrderRequest::buy(BOB, 10, 100)).unwrap_err();
    assert_eq!(
        err,
        ExchangeError::InsufficientFunds {
            user: UserId(1),
            requested: 1_000,
            available: 999
        }
    );
    let sats = exchange.balance_of(UserId(1), Asset::Sats);
    assert_eq!((sats.available, sats.locked), (999, 0));
    assert!(exchange.list_orders(&OrderFilter::default(), None).unwrap().is_empty());
}

#[test]
fn rerun_after_quiescence_is_a_no_op() {
    let exchange = exchange_with(&[(1, 10_000, 0), (2, 0, 100)]);
    exchange.place_order(&Caller::new(UserId(2)), OrderRequest::sell(BOB, 7, 30)).unwrap();
    exchange.place_order(&Caller::new(UserId(1)), OrderRequest::buy(BOB, 5, 35)).unwrap();

    let journal = exchange.ledger_journal().len();
    assert!(exchange.run_matching(BOB, 10).unwrap().is_empty());
    assert!(exchange.run_matching(BOB, 10).unwrap().is_empty());
    assert_eq!(exchange.ledger_journal().len(), journal);
}

#[test]
fn equal_prices_fill_in_time_order() {
    let exchange = exchange_with(&[(1, 10_000, 0), (2, 0, 5), (3, 0, 5)]);

    exchange.set_time(Timestamp::from_millis(1));
    let early = exchange.place_order(&Caller::new(UserId(2)), OrderRequest::sell(BOB, 5, 20)).unwrap();
    exchange.set_time(Timestamp::from_millis(2));
    let late = exchange.place_order(&Caller::new(UserId(3)), OrderRequest::sell(BOB, 5, 20)).unwrap();

    let result = exchange.place_order(&Caller::new(UserId(1)), OrderRequest::buy(BOB, 5, 20)).unwrap();
    assert_eq!(result.trades[0].sell_order_id, early.order_id());
    assert_eq!(exchange.order(late.order_id()).unwrap().status, OrderStatus::Open);
}

#[test]
fn expired_orders_release_and_never_match() {
    let exchange = exchange_with(&[(1, 10_000, 0), (2, 0, 10)]);
    let buyer = Caller::new(UserId(1));

    exchange.set_time(Timestamp::from_millis(0));
    let bid = exchange
        .place_order(&buyer, OrderRequest::buy(BOB, 10, 100).expiring_at(Timestamp::from_millis(50)))
        .unwrap();
    exchange.set_time(Timestamp::from_millis(60));

    let swept = exchange.sweep(10);
    assert_eq!(swept.expired, vec![bid.order_id()]);
    assert_eq!(exchange.balance_of(UserId(1), Asset::Sats).locked, 0);

    let result = exchange.place_order(&Caller::new(UserId(2)), OrderRequest::sell(BOB, 10, 100)).unwrap();
    assert!(result.trades.is_empty());
    assert!(exchange.events().iter().any(|e| matches!(e.payload, EventPayload::OrderExpired(_))));
}

#[test]
fn expired_order_never_fills_on_arrival_of_a_crossing_order() {
    let exchange = exchange_with(&[(1, 10_000, 0), (2, 0, 10)]);

    exchange.set_time(Timestamp::from_millis(0));
    let bid = exchange
        .place_order(&Caller::new(UserId(1)), OrderRequest::buy(BOB, 10, 100).expiring_at(Timestamp::from_millis(50)))
        .unwrap();
    exchange.set_time(Timestamp::from_millis(60));

    let ask = exchange.place_order(&Caller::new(UserId(2)), OrderRequest::sell(BOB, 10, 100)).unwrap();
    assert!(ask.trades.is_empty());
    assert_eq!(ask.order.status, OrderStatus::Open);
    assert_eq!(exchange.order(bid.order_id()).unwrap().status, OrderStatus::Expired);

    let sats = exchange.balance_of(UserId(1), Asset::Sats);
    assert_eq!((sats.available, sats.locked), (10_000, 0));
    assert_eq!(exchange.balance_of(UserId(2), Asset::Token(BOB)).locked, 10);
}

#[test]
fn wide_spread_snapshot() {
    let exchange = exchange_with(&[(1, 10, 0), (2, 0, 1)]);
    exchange.place_order(&Caller::new(UserId(1)), OrderRequest::buy(BOB, 1, 1)).unwrap();
    exchange.place_order(&Caller::new(UserId(2)), OrderRequest::sell(BOB, 1, 1u64 << 63)).unwrap();

    let book = exchange.order_book(BOB, 5).unwrap();
    assert_eq!(book.spread, Some((1i128 << 63) - 1));
}

#[test]
fn trade_records_carry_handles_and_settle_onchain() {
    let exchange = exchange_with(&[(1, 10_000, 0), (2, 0, 10)]);
    let alice = Caller::with_handle(UserId(1), "$alice");
    let carol = Caller::with_handle(UserId(2), "$carol");

    exchange.place_order(&carol, OrderRequest::sell(BOB, 3, 70)).unwrap();
    let trade_id = exchange.place_order(&alice, OrderRequest::buy(BOB, 3, 70)).unwrap().trades[0].id;

    let view = &exchange.trade_views(BOB, 1).unwrap()[0];
    assert_eq!(view.buyer_handle, "$alice");
    assert_eq!(view.seller_handle, "$carol");
    assert_eq!(view.settlement_type, SettlementType::Offchain);

    let mut broadcaster = InMemoryBroadcaster::deferred();
    exchange.process_settlement_queue(&mut broadcaster, 10);
    assert_eq!(exchange.trade(trade_id).unwrap().settlement_type, SettlementType::Pending);

    exchange.confirm_onchain(trade_id, "abc123").unwrap();
    let view = &exchange.trade_views(BOB, 1).unwrap()[0];
    assert_eq!(view.settlement_type, SettlementType::Onchain);

    let json = serde_json::to_value(view).unwrap();
    assert_eq!(json["settlement_type"], "onchain");
    assert_eq!(json["price_sats"], 70);
}

#[test]
fn minimum_order_amount_is_enforced() {
    let exchange = Exchange::default();
    let mut config = MarketConfig::new(BOB, "bob-token", "$BOB");
    config.min_order_amount = 10;
    exchange.create_market(config).unwrap();
    exchange.deposit(UserId(1), Asset::Sats, 10_000).unwrap();

    let err = exchange.place_order(&Caller::new(UserId(1)), OrderRequest::buy(BOB, 9, 10)).unwrap_err();
    assert_eq!(
        err,
        ExchangeError::InvalidOrder(OrderValidationError::BelowMinimum { amount: 9, minimum: 10 })
    );
}
