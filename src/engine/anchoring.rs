// 8.4 engine/anchoring.rs: hands settled trades to the chain broadcaster.
// balances never move here. a failed broadcast only puts the trade back in the queue.

use super::core::Exchange;
use super::results::ExchangeError;
use crate::events::{EventPayload, TradeAnchoredEvent};
use crate::settlement::{BroadcastOutcome, ChainBroadcaster, SettlementReport};
use crate::trade::{SettlementType, Trade};
use crate::types::TradeId;
use tracing::{debug, info, warn};

impl Exchange {
    /// Drain up to `max` queued trades through `broadcaster`.
    pub fn process_settlement_queue<B>(&self, broadcaster: &mut B, max: usize) -> SettlementReport
    where
        B: ChainBroadcaster + ?Sized,
    {
        let mut report = SettlementReport::default();

        for trade_id in self.settlement_queue.take(max) {
            let Some(trade) = self.trades.get(trade_id) else {
                warn!(trade = %trade_id, "queued trade missing from store");
                continue;
            };
            if trade.settlement_type == SettlementType::Onchain {
                // confirmed out of band since it was queued
                continue;
            }

            match broadcaster.broadcast(&trade) {
                Ok(BroadcastOutcome::Confirmed(chain_tx_id)) => match self.anchor(trade_id, chain_tx_id) {
                    Ok(_) => report.confirmed.push(trade_id),
                    Err(err) => warn!(trade = %trade_id, error = %err, "confirmation not applied"),
                },
                Ok(BroadcastOutcome::Submitted) => match self.trades.mark_pending(trade_id) {
                    Ok(_) => {
                        debug!(trade = %trade_id, backend = broadcaster.backend_type(), "trade submitted");
                        self.emit_event(EventPayload::TradeAnchored(TradeAnchoredEvent {
                            trade_id,
                            settlement_type: SettlementType::Pending,
                            chain_tx_id: None,
                        }));
                        report.submitted.push(trade_id);
                    }
                    Err(err) => warn!(trade = %trade_id, error = %err, "submission not applied"),
                },
                Err(err) => {
                    warn!(trade = %trade_id, error = %err, "broadcast failed, requeueing");
                    self.settlement_queue.requeue(trade_id);
                    report.failed.push(trade_id);
                }
            }
        }

        report
    }

    /// Drain one configured batch.
    pub fn process_settlement_batch<B>(&self, broadcaster: &mut B) -> SettlementReport
    where
        B: ChainBroadcaster + ?Sized,
    {
        self.process_settlement_queue(broadcaster, self.config.settlement_batch_size)
    }

    /// Broadcaster callback for a trade reported `Submitted` earlier.
    pub fn confirm_onchain(&self, trade_id: TradeId, chain_tx_id: impl Into<String>) -> Result<Trade, ExchangeError> {
        self.anchor(trade_id, chain_tx_id.into())
    }

    pub fn pending_settlements(&self) -> usize {
        self.settlement_queue.len()
    }

    /// True while the trade sits in the queue waiting for a broadcast.
    pub fn awaiting_anchor(&self, trade_id: TradeId) -> bool {
        self.settlement_queue.contains(trade_id)
    }

    fn anchor(&self, trade_id: TradeId, chain_tx_id: String) -> Result<Trade, ExchangeError> {
        let trade = self.trades.confirm(trade_id, chain_tx_id)?;
        info!(trade = %trade_id, tx = ?trade.chain_tx_id, "trade anchored onchain");
        self.emit_event(EventPayload::TradeAnchored(TradeAnchoredEvent {
            trade_id,
            settlement_type: SettlementType::Onchain,
            chain_tx_id: trade.chain_tx_id.clone(),
        }));
        Ok(trade)
    }
}
