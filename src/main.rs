//! Token exchange simulation.
//!
//! Walks the exchange through its lifecycle: reservation, maker-price matching,
//! partial fills, cancel and expiry, on-chain anchoring and parallel markets.
//! Set `RUST_LOG=sats_exchange=debug` to watch the engine's own logs, and
//! `EXCHANGE_ENV` / `EXCHANGE_*` to pick a config preset and overrides.

use sats_exchange::*;
use std::error::Error;
use std::sync::Arc;
use std::thread;
use tracing_subscriber::EnvFilter;

type SimResult = Result<(), Box<dyn Error>>;

const BOB: MarketId = MarketId(1);

fn main() -> SimResult {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let environment: Environment = std::env::var("EXCHANGE_ENV")
        .unwrap_or_else(|_| "testnet".to_string())
        .parse()?;
    let config = ExchangeConfig::from_env(environment.config())?;

    println!("Sats Token Exchange Simulation");
    println!("Environment: {:?}, max matches per run: {}\n", environment, config.default_max_matches);

    scenario_1_maker_price(&config)?;
    scenario_2_partial_fills(&config)?;
    scenario_3_cancel_and_expiry(&config)?;
    scenario_4_anchoring(&config)?;
    scenario_5_parallel_markets(&config)?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn new_exchange(config: &ExchangeConfig) -> Result<Exchange, ExchangeError> {
    let exchange = Exchange::new(config.clone());
    exchange.set_time(Timestamp::now());
    exchange.create_market(MarketConfig::new(BOB, "bob-token", "$BOB"))?;
    Ok(exchange)
}

/// A resting bid sets the price for an incoming lower ask.
fn scenario_1_maker_price(config: &ExchangeConfig) -> SimResult {
    println!("Scenario 1: Maker Price\n");

    let exchange = new_exchange(config)?;
    let alice = Caller::with_handle(UserId(1), "$alice");
    let carol = Caller::with_handle(UserId(2), "$carol");
    exchange.deposit(alice.user_id, Asset::Sats, 10_000)?;
    exchange.deposit(carol.user_id, Asset::Token(BOB), 50)?;

    exchange.place_order(&alice, OrderRequest::buy(BOB, 10, 100))?;
    println!("  Alice bids 10 $BOB @ 100 sats");
    exchange.advance_time(1_000);

    let result = exchange.place_order(&carol, OrderRequest::sell(BOB, 10, 90))?;
    println!("  Carol asks 10 $BOB @ 90 sats");
    for trade in &result.trades {
        println!("  Trade: {} @ {} = {} sats (maker price)", trade.amount, trade.price_sats, trade.total_sats);
    }

    let alice_sats = exchange.balance_of(alice.user_id, Asset::Sats);
    let carol_sats = exchange.balance_of(carol.user_id, Asset::Sats);
    println!("  Alice sats: {} available, {} locked", alice_sats.available, alice_sats.locked);
    println!("  Carol sats: {} available\n", carol_sats.available);
    Ok(())
}

/// One bid filled across two asks.
fn scenario_2_partial_fills(config: &ExchangeConfig) -> SimResult {
    println!("Scenario 2: Partial Fills\n");

    let exchange = new_exchange(config)?;
    let buyer = Caller::with_handle(UserId(1), "$buyer");
    let seller = Caller::with_handle(UserId(2), "$seller");
    exchange.deposit(buyer.user_id, Asset::Sats, 1_000)?;
    exchange.deposit(seller.user_id, Asset::Token(BOB), 10)?;

    let bid = exchange.place_order(&buyer, OrderRequest::buy(BOB, 10, 50))?;
    println!("  Bid 10 @ 50: {:?}", bid.order.status);

    for amount in [4, 6] {
        exchange.advance_time(1);
        exchange.place_order(&seller, OrderRequest::sell(BOB, amount, 50))?;
        let order = exchange.order(bid.order_id())?;
        println!(
            "  Ask {} @ 50 -> bid {:?}, filled {}/{}",
            amount, order.status, order.filled_amount, order.amount
        );
    }

    for view in exchange.trade_views(BOB, 10)? {
        println!(
            "  {} bought {} from {} for {} sats [{:?}]",
            view.buyer_handle, view.amount, view.seller_handle, view.total_sats, view.settlement_type
        );
    }
    println!();
    Ok(())
}

/// Reservations come back exactly on cancel and on expiry.
fn scenario_3_cancel_and_expiry(config: &ExchangeConfig) -> SimResult {
    println!("Scenario 3: Cancel and Expiry\n");

    let exchange = new_exchange(config)?;
    let trader = Caller::new(UserId(7));
    exchange.deposit(trader.user_id, Asset::Sats, 5_000)?;

    let placed = exchange.place_order(&trader, OrderRequest::buy(BOB, 20, 100))?;
    println!("  Locked after bid: {}", exchange.balance_of(trader.user_id, Asset::Sats).locked);
    exchange.cancel_order(&trader, placed.order_id())?;
    println!("  Locked after cancel: {}", exchange.balance_of(trader.user_id, Asset::Sats).locked);

    let expires_at = exchange.now().plus_millis(60_000);
    exchange.place_order(&trader, OrderRequest::buy(BOB, 10, 100).expiring_at(expires_at))?;
    exchange.advance_time(60_000);
    let swept = exchange.sweep(config.default_max_matches);
    println!("  Sweep expired {} order(s)", swept.expired.len());

    match exchange.place_order(&trader, OrderRequest::buy(BOB, 100, 100)) {
        Err(err) => println!("  Oversized bid rejected: {}", err),
        Ok(_) => println!("  Oversized bid unexpectedly accepted"),
    }
    println!("  Balance: {:?}\n", exchange.balance_of(trader.user_id, Asset::Sats));
    Ok(())
}

/// Trades leave the queue once the broadcaster confirms them.
fn scenario_4_anchoring(config: &ExchangeConfig) -> SimResult {
    println!("Scenario 4: On-chain Anchoring\n");

    let exchange = new_exchange(&ExchangeConfig {
        anchor_onchain: true,
        ..config.clone()
    })?;
    let buyer = Caller::new(UserId(1));
    let seller = Caller::new(UserId(2));
    exchange.deposit(buyer.user_id, Asset::Sats, 10_000)?;
    exchange.deposit(seller.user_id, Asset::Token(BOB), 30)?;

    for price in [100, 101, 102] {
        exchange.place_order(&seller, OrderRequest::sell(BOB, 10, price))?;
    }
    exchange.place_order(&buyer, OrderRequest::buy(BOB, 30, 102))?;
    println!("  Queued for anchoring: {}", exchange.pending_settlements());

    let mut broadcaster = InMemoryBroadcaster::new();
    broadcaster.fail_next(1);
    let report = exchange.process_settlement_batch(&mut broadcaster);
    println!(
        "  First drain: {} confirmed, {} failed",
        report.confirmed.len(),
        report.failed.len()
    );
    let report = exchange.process_settlement_batch(&mut broadcaster);
    println!("  Second drain: {} confirmed", report.confirmed.len());

    for trade in exchange.recent_trades(BOB, 10)? {
        println!("  {} {:?} tx={}", trade.id, trade.settlement_type, trade.chain_tx_id.unwrap_or_default());
    }
    println!();
    Ok(())
}

/// Independent markets trade on separate threads.
fn scenario_5_parallel_markets(config: &ExchangeConfig) -> SimResult {
    println!("Scenario 5: Parallel Markets\n");

    let exchange = Arc::new(Exchange::new(config.clone()));
    let markets: Vec<MarketId> = (1..=4).map(MarketId).collect();
    for market_id in &markets {
        exchange.create_market(MarketConfig::new(
            *market_id,
            format!("token-{}", market_id.0),
            format!("$T{}", market_id.0),
        ))?;
    }

    let workers: Vec<_> = markets
        .iter()
        .map(|&market_id| {
            let exchange = Arc::clone(&exchange);
            thread::spawn(move || -> Result<usize, ExchangeError> {
                let maker = Caller::new(UserId(market_id.0 as u64 * 10));
                let taker = Caller::new(UserId(market_id.0 as u64 * 10 + 1));
                exchange.deposit(maker.user_id, Asset::Token(market_id), 1_000)?;
                exchange.deposit(taker.user_id, Asset::Sats, 1_000_000)?;

                let mut trades = 0;
                for round in 0..100u64 {
                    exchange.place_order(&maker, OrderRequest::sell(market_id, 10, 100 + round % 5))?;
                    trades += exchange
                        .place_order(&taker, OrderRequest::buy(market_id, 10, 105))?
                        .trades
                        .len();
                }
                Ok(trades)
            })
        })
        .collect();

    for (market_id, worker) in markets.iter().zip(workers) {
        let trades = worker.join().map_err(|_| "market worker panicked")??;
        let stats = exchange.market_stats(*market_id)?;
        println!(
            "  {}: {} trades, volume {} sats, vwap {}",
            market_id,
            trades,
            stats.volume_sats,
            stats.vwap.map(|v| v.round_dp(2).to_string()).unwrap_or_default()
        );
    }
    println!("  Total sats held: {}", exchange.total_held(Asset::Sats));
    Ok(())
}
