// 8.0: exchange engine. owns the ledger, every market, the trade store and the settlement queue.
// each market is a single-writer scope: placement, matching, settlement, cancel and expiry for
// it all run under its mutex. lock order: market -> ledger -> trade store -> settlement queue ->
// event log. the order index is only ever taken on its own or innermost.

mod anchoring;
mod core;
mod orders;
mod queries;
mod results;
mod sweep;

pub use core::Exchange;
pub use results::{
    BookSnapshot, Caller, ExchangeError, MarketStats, OrderFilter, OrderRequest, OrderResult, SweepResult,
};
