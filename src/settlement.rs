// 9.1 settlement.rs: applies fills to the ledger and queues trades for on-chain anchoring.
// the broadcaster is external; InMemoryBroadcaster stands in for it in tests and the sim.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::ledger::{BalanceKey, LedgerError, LedgerTx};
use crate::matching::FillInstruction;
use crate::trade::Trade;
use crate::types::{Asset, TradeId};

// Errors from settlement operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    #[error("Trade not found: {0}")]
    TradeNotFound(TradeId),

    #[error("Trade {0} is already anchored on chain")]
    AlreadyAnchored(TradeId),

    #[error("Broadcast of trade {trade_id} failed: {reason}")]
    BroadcastFailed { trade_id: TradeId, reason: String },
}

// Ledger effect of one settled fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledFill {
    pub total_sats: u64,
    // sats the buyer reserved above the execution price, returned to available
    pub refund_sats: u64,
}

/// Apply both legs of a fill inside `tx`. The caller commits or drops the
/// transaction as a whole, so either both legs land or neither does.
pub fn settle_fill(tx: &mut LedgerTx<'_>, fill: &FillInstruction) -> Result<SettledFill, LedgerError> {
    let buyer_sats = BalanceKey::new(fill.buyer_id, Asset::Sats);
    let total_sats = fill.total_sats().ok_or_else(|| {
        LedgerError::violation(
            buyer_sats,
            format!("fill value {} x {} overflows", fill.amount, fill.price),
        )
    })?;
    let reserved = fill.buyer_limit.total_for(fill.amount).ok_or_else(|| {
        LedgerError::violation(
            buyer_sats,
            format!("reserved value {} x {} overflows", fill.amount, fill.buyer_limit),
        )
    })?;
    let refund_sats = reserved.checked_sub(total_sats).ok_or_else(|| {
        LedgerError::violation(
            buyer_sats,
            format!("execution price {} above buyer limit {}", fill.price, fill.buyer_limit),
        )
    })?;

    // sats leg: buyer pays seller
    tx.settle_fill(fill.buyer_id, fill.seller_id, Asset::Sats, total_sats)?;
    // token leg: seller delivers to buyer
    tx.settle_fill(fill.seller_id, fill.buyer_id, Asset::Token(fill.market_id), fill.amount)?;
    if refund_sats > 0 {
        tx.release(fill.buyer_id, Asset::Sats, refund_sats)?;
    }

    Ok(SettledFill { total_sats, refund_sats })
}

// FIFO of trades waiting for the broadcaster
#[derive(Debug, Default)]
pub struct SettlementQueue {
    pending: Mutex<VecDeque<TradeId>>,
}

impl SettlementQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, trade_id: TradeId) {
        self.pending.lock().push_back(trade_id);
    }

    // Put a failed trade back at the end of the line
    pub fn requeue(&self, trade_id: TradeId) {
        self.enqueue(trade_id);
    }

    // Remove up to `max` trades from the front
    pub fn take(&self, max: usize) -> Vec<TradeId> {
        let mut pending = self.pending.lock();
        let count = max.min(pending.len());
        pending.drain(..count).collect()
    }

    pub fn contains(&self, trade_id: TradeId) -> bool {
        self.pending.lock().contains(&trade_id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

// What the chain said about one trade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "tx_id", rename_all = "snake_case")]
pub enum BroadcastOutcome {
    // Accepted and confirmed under this tx id
    Confirmed(String),
    // Accepted; confirmation arrives later through `confirm_onchain`
    Submitted,
}

// Trait for on-chain anchoring backends
pub trait ChainBroadcaster {
    fn broadcast(&mut self, trade: &Trade) -> Result<BroadcastOutcome, SettlementError>;

    // Get the backend type identifier
    fn backend_type(&self) -> &str;
}

// Summary of one queue drain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub confirmed: Vec<TradeId>,
    pub submitted: Vec<TradeId>,
    pub failed: Vec<TradeId>,
}

impl SettlementReport {
    pub fn processed(&self) -> usize {
        self.confirmed.len() + self.submitted.len() + self.failed.len()
    }
}

// In memory broadcaster for testing and simulation
#[derive(Debug, Default)]
pub struct InMemoryBroadcaster {
    confirm_immediately: bool,
    failures_remaining: usize,
    broadcasts: Vec<TradeId>,
    next_tx: u64,
}

impl InMemoryBroadcaster {
    // Confirms every trade on the spot
    pub fn new() -> Self {
        Self {
            confirm_immediately: true,
            ..Self::default()
        }
    }

    // Reports `Submitted` and leaves confirmation to the caller
    pub fn deferred() -> Self {
        Self::default()
    }

    // Fail the next `count` broadcasts
    pub fn fail_next(&mut self, count: usize) {
        self.failures_remaining = count;
    }

    pub fn broadcasts(&self) -> &[TradeId] {
        &self.broadcasts
    }
}

impl ChainBroadcaster for InMemoryBroadcaster {
    fn broadcast(&mut self, trade: &Trade) -> Result<BroadcastOutcome, SettlementError> {
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(SettlementError::BroadcastFailed {
                trade_id: trade.id,
                reason: "node unreachable".to_string(),
            });
        }

        self.broadcasts.push(trade.id);
        if !self.confirm_immediately {
            return Ok(BroadcastOutcome::Submitted);
        }
        self.next_tx += 1;
        Ok(BroadcastOutcome::Confirmed(format!("{:064x}", self.next_tx)))
    }

    fn backend_type(&self) -> &str {
        "in_memory"
    }
}
