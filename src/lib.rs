// sats-exchange: token exchange core.
// orders are priced in satoshis against issued tokens. funds are reserved before an order
// can rest, crossing orders match under price-time priority, and every fill moves both legs
// through the ledger as one unit before the trade is queued for on-chain anchoring.
// all computation is deterministic; the only outside collaborator is the chain broadcaster.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: UserId, MarketId, Side, Asset, Price, Timestamp
//   2.x  order.rs: orders and the per-market price-time book
//   3.x  ledger.rs: available/locked balances, staged transactions, journal
//   4.x  matching.rs: pure matcher producing fill instructions
//   5.x  trade.rs: trade records, settlement type, trade store
//   7.x  config.rs: exchange settings, env presets, env overrides
//   8.x  engine/: exchange: placement, cancel, sweep, queries, anchoring
//   9.1  settlement.rs: fill settlement, settlement queue, broadcaster (mocked)
//   11.x events.rs: state transition events for audit
//   12.x market.rs: market config + runtime state

// core trading modules
pub mod engine;
pub mod events;
pub mod ledger;
pub mod market;
pub mod matching;
pub mod order;
pub mod trade;
pub mod types;

// integration modules
pub mod config;
pub mod settlement;

// re exports for convenience
pub use engine::*;
pub use events::*;
pub use ledger::{Balance, BalanceKey, Ledger, LedgerEntry, LedgerError, LedgerOp};
pub use market::*;
pub use matching::{run_matching, FillInstruction};
pub use order::*;
pub use trade::*;
pub use types::*;
pub use config::{ConfigError, Environment, ExchangeConfig};
pub use settlement::{
    BroadcastOutcome, ChainBroadcaster, InMemoryBroadcaster, SettlementError, SettlementQueue, SettlementReport,
};
