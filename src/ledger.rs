//! Balance ledger.
//!
//! One row per (user, asset) split into `available` and `locked`. Funds move to
//! `locked` when an order is placed, back to `available` on cancel or expiry, and
//! from the payer's `locked` to the payee's `available` on a fill. Only deposit and
//! withdraw change what a user holds in total.
//!
//! Every mutation runs inside a [`LedgerTx`] under the ledger lock. A transaction
//! stages its writes and commits all of them or none, and each committed write is
//! appended to a journal with a strictly increasing sequence number.

use crate::types::{Asset, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    pub user: UserId,
    pub asset: Asset,
}

impl BalanceKey {
    pub fn new(user: UserId, asset: Asset) -> Self {
        Self { user, asset }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub available: u64,
    pub locked: u64,
    pub total_deposited: u64,
    pub total_withdrawn: u64,
}

impl Balance {
    /// Everything the user holds in this asset, free or reserved.
    pub fn total(&self) -> u128 {
        self.available as u128 + self.locked as u128
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOp {
    Deposit,
    Withdraw,
    Reserve,
    Release,
    /// Payer side of a fill: leaves `locked`.
    SettleDebit,
    /// Payee side of a fill: lands in `available`.
    SettleCredit,
}

/// One committed mutation. Replaying the journal in `seq` order rebuilds the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq: u64,
    pub user: UserId,
    pub asset: Asset,
    pub op: LedgerOp,
    pub amount: u64,
    pub available_after: u64,
    pub locked_after: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
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

    #[error("Ledger invariant violated for {user} {asset}: {reason}")]
    InvariantViolation {
        user: UserId,
        asset: Asset,
        reason: String,
    },
}

impl LedgerError {
    fn shortfall(user: UserId, asset: Asset, requested: u64, available: u64) -> Self {
        match asset {
            Asset::Sats => LedgerError::InsufficientFunds {
                user,
                requested,
                available,
            },
            Asset::Token(_) => LedgerError::InsufficientAsset {
                user,
                asset,
                requested,
                available,
            },
        }
    }

    pub(crate) fn violation(key: BalanceKey, reason: String) -> Self {
        error!(user = %key.user, asset = %key.asset, %reason, "ledger invariant violation");
        LedgerError::InvariantViolation {
            user: key.user,
            asset: key.asset,
            reason,
        }
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, LedgerError::InvariantViolation { .. })
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<BalanceKey, Balance>,
    journal: Vec<LedgerEntry>,
    next_seq: u64,
}

impl LedgerState {
    fn commit(&mut self, staged: HashMap<BalanceKey, Balance>, writes: Vec<StagedWrite>) {
        for write in writes {
            self.next_seq += 1;
            self.journal.push(LedgerEntry {
                seq: self.next_seq,
                user: write.key.user,
                asset: write.key.asset,
                op: write.op,
                amount: write.amount,
                available_after: write.after.available,
                locked_after: write.after.locked,
            });
        }
        self.balances.extend(staged);
    }
}

#[derive(Debug)]
struct StagedWrite {
    key: BalanceKey,
    op: LedgerOp,
    amount: u64,
    after: Balance,
}

/// Staged view of the ledger. Reads see earlier writes of the same transaction.
#[derive(Debug)]
pub struct LedgerTx<'a> {
    committed: &'a HashMap<BalanceKey, Balance>,
    staged: HashMap<BalanceKey, Balance>,
    writes: Vec<StagedWrite>,
}

impl<'a> LedgerTx<'a> {
    fn new(committed: &'a HashMap<BalanceKey, Balance>) -> Self {
        Self {
            committed,
            staged: HashMap::new(),
            writes: Vec::new(),
        }
    }

    pub fn balance_of(&self, user: UserId, asset: Asset) -> Balance {
        self.current(BalanceKey::new(user, asset))
    }

    fn current(&self, key: BalanceKey) -> Balance {
        self.staged
            .get(&key)
            .or_else(|| self.committed.get(&key))
            .copied()
            .unwrap_or_default()
    }

    fn stage(&mut self, key: BalanceKey, op: LedgerOp, amount: u64, after: Balance) {
        self.staged.insert(key, after);
        self.writes.push(StagedWrite {
            key,
            op,
            amount,
            after,
        });
    }

    pub fn deposit(&mut self, user: UserId, asset: Asset, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        let key = BalanceKey::new(user, asset);
        let mut balance = self.current(key);
        balance.available = credit(key, balance.available, amount)?;
        balance.total_deposited = balance.total_deposited.saturating_add(amount);
        self.stage(key, LedgerOp::Deposit, amount, balance);
        Ok(())
    }

    pub fn withdraw(&mut self, user: UserId, asset: Asset, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        let key = BalanceKey::new(user, asset);
        let mut balance = self.current(key);
        if balance.available < amount {
            return Err(LedgerError::shortfall(user, asset, amount, balance.available));
        }
        balance.available -= amount;
        balance.total_withdrawn = balance.total_withdrawn.saturating_add(amount);
        self.stage(key, LedgerOp::Withdraw, amount, balance);
        Ok(())
    }

    /// available -> locked, if there is enough available.
    pub fn reserve(&mut self, user: UserId, asset: Asset, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        let key = BalanceKey::new(user, asset);
        let mut balance = self.current(key);
        if balance.available < amount {
            return Err(LedgerError::shortfall(user, asset, amount, balance.available));
        }
        balance.available -= amount;
        balance.locked = credit(key, balance.locked, amount)?;
        self.stage(key, LedgerOp::Reserve, amount, balance);
        Ok(())
    }

    /// locked -> available. Releasing more than is locked means the caller's
    /// bookkeeping is wrong; it is reported, never clamped.
    pub fn release(&mut self, user: UserId, asset: Asset, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        let key = BalanceKey::new(user, asset);
        let mut balance = self.current(key);
        if balance.locked < amount {
            return Err(LedgerError::violation(
                key,
                format!("release of {} exceeds locked {}", amount, balance.locked),
            ));
        }
        balance.locked -= amount;
        balance.available = credit(key, balance.available, amount)?;
        self.stage(key, LedgerOp::Release, amount, balance);
        Ok(())
    }

    /// payer.locked -> payee.available.
    pub fn settle_fill(
        &mut self,
        payer: UserId,
        payee: UserId,
        asset: Asset,
        amount: u64,
    ) -> Result<(), LedgerError> {
        if amount == 0 {
            return Ok(());
        }
        let payer_key = BalanceKey::new(payer, asset);
        let mut debited = self.current(payer_key);
        if debited.locked < amount {
            return Err(LedgerError::violation(
                payer_key,
                format!("settlement of {} exceeds locked {}", amount, debited.locked),
            ));
        }
        debited.locked -= amount;
        self.stage(payer_key, LedgerOp::SettleDebit, amount, debited);

        // read after staging the debit: payer and payee may be the same user
        let payee_key = BalanceKey::new(payee, asset);
        let mut credited = self.current(payee_key);
        credited.available = credit(payee_key, credited.available, amount)?;
        self.stage(payee_key, LedgerOp::SettleCredit, amount, credited);
        Ok(())
    }

    fn into_parts(self) -> (HashMap<BalanceKey, Balance>, Vec<StagedWrite>) {
        (self.staged, self.writes)
    }
}

fn credit(key: BalanceKey, current: u64, amount: u64) -> Result<u64, LedgerError> {
    current
        .checked_add(amount)
        .ok_or_else(|| LedgerError::violation(key, format!("credit of {} overflows {}", amount, current)))
}

/// Thread-safe ledger. One lock covers balances and journal, which makes every
/// (user, asset) row atomic under concurrent reserve/release and keeps journal
/// order identical to application order.
#[derive(Debug, Default)]
pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against a staged view and commit only if it returns `Ok`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut LedgerTx<'_>) -> Result<T, LedgerError>,
    {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut tx = LedgerTx::new(&state.balances);
        let out = f(&mut tx)?;
        let (staged, writes) = tx.into_parts();
        state.commit(staged, writes);
        Ok(out)
    }

    pub fn deposit(&self, user: UserId, asset: Asset, amount: u64) -> Result<(), LedgerError> {
        self.transaction(|tx| tx.deposit(user, asset, amount))
    }

    pub fn withdraw(&self, user: UserId, asset: Asset, amount: u64) -> Result<(), LedgerError> {
        self.transaction(|tx| tx.withdraw(user, asset, amount))
    }

    pub fn reserve(&self, user: UserId, asset: Asset, amount: u64) -> Result<(), LedgerError> {
        self.transaction(|tx| tx.reserve(user, asset, amount))
    }

    pub fn release(&self, user: UserId, asset: Asset, amount: u64) -> Result<(), LedgerError> {
        self.transaction(|tx| tx.release(user, asset, amount))
    }

    pub fn settle_fill(
        &self,
        payer: UserId,
        payee: UserId,
        asset: Asset,
        amount: u64,
    ) -> Result<(), LedgerError> {
        self.transaction(|tx| tx.settle_fill(payer, payee, asset, amount))
    }

    pub fn balance_of(&self, user: UserId, asset: Asset) -> Balance {
        self.state
            .lock()
            .balances
            .get(&BalanceKey::new(user, asset))
            .copied()
            .unwrap_or_default()
    }

    pub fn balances(&self) -> HashMap<BalanceKey, Balance> {
        self.state.lock().balances.clone()
    }

    /// Sum of available + locked over every holder of `asset`.
    pub fn total_held(&self, asset: Asset) -> u128 {
        self.state
            .lock()
            .balances
            .iter()
            .filter(|(key, _)| key.asset == asset)
            .map(|(_, balance)| balance.total())
            .sum()
    }

    pub fn journal(&self) -> Vec<LedgerEntry> {
        self.state.lock().journal.clone()
    }

    pub fn journal_since(&self, seq: u64) -> Vec<LedgerEntry> {
        let state = self.state.lock();
        let start = state.journal.partition_point(|entry| entry.seq <= seq);
        state.journal[start..].to_vec()
    }

    pub fn last_seq(&self) -> u64 {
        self.state.lock().next_seq
    }
}

/// Rebuild a balance table from journal entries, checking each recorded
/// post-state against the recomputed one.
pub fn replay(entries: &[LedgerEntry]) -> Result<HashMap<BalanceKey, Balance>, LedgerError> {
    let mut balances: HashMap<BalanceKey, Balance> = HashMap::new();
    let mut last_seq = 0;

    for entry in entries {
        let key = BalanceKey::new(entry.user, entry.asset);
        if entry.seq <= last_seq {
            return Err(LedgerError::violation(
                key,
                format!("journal sequence {} follows {}", entry.seq, last_seq),
            ));
        }
        last_seq = entry.seq;

        let balance = balances.entry(key).or_default();
        let amount = entry.amount;
        let applied = match entry.op {
            LedgerOp::Deposit => balance.available.checked_add(amount).map(|available| {
                balance.available = available;
                balance.total_deposited = balance.total_deposited.saturating_add(amount);
            }),
            LedgerOp::Withdraw => balance.available.checked_sub(amount).map(|available| {
                balance.available = available;
                balance.total_withdrawn = balance.total_withdrawn.saturating_add(amount);
            }),
            LedgerOp::Reserve => balance.available.checked_sub(amount).and_then(|available| {
                balance.locked.checked_add(amount).map(|locked| {
                    balance.available = available;
                    balance.locked = locked;
                })
            }),
            LedgerOp::Release => balance.locked.checked_sub(amount).and_then(|locked| {
                balance.available.checked_add(amount).map(|available| {
                    balance.available = available;
                    balance.locked = locked;
                })
            }),
            LedgerOp::SettleDebit => balance.locked.checked_sub(amount).map(|locked| {
                balance.locked = locked;
            }),
            LedgerOp::SettleCredit => balance.available.checked_add(amount).map(|available| {
                balance.available = available;
            }),
        };

        if applied.is_none()
            || balance.available != entry.available_after
            || balance.locked != entry.locked_after
        {
            return Err(LedgerError::violation(
                key,
                format!("journal entry {} does not replay cleanly", entry.seq),
            ));
        }
    }

    Ok(balances)
}
