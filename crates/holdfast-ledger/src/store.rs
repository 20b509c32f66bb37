//! Ledger store: append-only entries plus cached wallet balances.
//!
//! [`LedgerStore::append`] is the single atomic write of the ledger plane.
//! Within one critical section it:
//! 1. Looks up the draft's idempotency key (replay returns the prior row)
//! 2. Checks the wallet exists and, for `Out`, that the balance covers it
//! 3. Appends the row
//! 4. Updates the wallet's cached balance and version
//!
//! If any step fails nothing is written.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use holdfast_types::{
    Amount, Direction, EntryDraft, HoldfastError, IdempotencyKey, LedgerEntry, Posting, RefScope,
    Result, UserId, Wallet, WalletId,
};
use tracing::warn;

use crate::conservation::project_balance;
use crate::idempotency::IdempotencyIndex;

/// Persistence port for the ledger and wallets.
///
/// Implementations must make [`Self::append`] and [`Self::rebuild_balance`]
/// single atomic conditional writes.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Find-or-create the wallet owned by `owner`.
    async fn wallet_for_owner(&self, owner: UserId, at: DateTime<Utc>) -> Result<Wallet>;

    async fn wallet(&self, id: WalletId) -> Result<Wallet>;

    async fn wallets(&self) -> Result<Vec<Wallet>>;

    /// Append one entry atomically, or return the row that already recorded
    /// the same movement.
    async fn append(&self, draft: EntryDraft, at: DateTime<Utc>) -> Result<Posting>;

    async fn find(&self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>>;

    /// Entries of one wallet, oldest first.
    async fn entries_for_wallet(&self, wallet: WalletId) -> Result<Vec<LedgerEntry>>;

    /// Every entry whose reference falls in `scope`, oldest first.
    async fn entries_for_scope(&self, scope: &RefScope) -> Result<Vec<LedgerEntry>>;

    /// Overwrite the cached balance with the ledger projection.
    async fn rebuild_balance(&self, wallet: WalletId) -> Result<Wallet>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LedgerState {
    wallets: HashMap<WalletId, Wallet>,
    by_owner: HashMap<UserId, WalletId>,
    entries: Vec<LedgerEntry>,
    by_wallet: HashMap<WalletId, Vec<usize>>,
    index: IdempotencyIndex,
    positions: HashMap<holdfast_types::LedgerEntryId, usize>,
}

impl LedgerState {
    fn entry_for_key(&self, key: &IdempotencyKey) -> Option<&LedgerEntry> {
        self.index
            .lookup(key)
            .and_then(|id| self.positions.get(&id))
            .map(|&pos| &self.entries[pos])
    }

    fn wallet_entries(&self, wallet: WalletId) -> Vec<LedgerEntry> {
        self.by_wallet
            .get(&wallet)
            .map(|positions| positions.iter().map(|&p| self.entries[p].clone()).collect())
            .unwrap_or_default()
    }
}

/// Single-process ledger store. One mutex guards the whole state, so each
/// call is a transaction.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| HoldfastError::Datastore("ledger state lock poisoned".into()))
    }

    /// Total number of ledger rows.
    pub fn entry_count(&self) -> Result<usize> {
        Ok(self.lock()?.entries.len())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn wallet_for_owner(&self, owner: UserId, at: DateTime<Utc>) -> Result<Wallet> {
        let mut state = self.lock()?;
        if let Some(id) = state.by_owner.get(&owner).copied() {
            return state
                .wallets
                .get(&id)
                .cloned()
                .ok_or(HoldfastError::WalletNotFound(id));
        }
        let wallet = Wallet::open(owner, at);
        state.by_owner.insert(owner, wallet.id);
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn wallet(&self, id: WalletId) -> Result<Wallet> {
        self.lock()?
            .wallets
            .get(&id)
            .cloned()
            .ok_or(HoldfastError::WalletNotFound(id))
    }

    async fn wallets(&self) -> Result<Vec<Wallet>> {
        let mut wallets: Vec<Wallet> = self.lock()?.wallets.values().cloned().collect();
        wallets.sort_by_key(|w| w.id);
        Ok(wallets)
    }

    async fn append(&self, draft: EntryDraft, at: DateTime<Utc>) -> Result<Posting> {
        if draft.amount.is_zero() {
            return Err(HoldfastError::InvalidAmount {
                reason: format!("{} {} must be > 0", draft.kind, draft.direction),
            });
        }

        let mut state = self.lock()?;
        let key = draft.idempotency_key();

        // 1. Replay: hand back the original row untouched.
        if let Some(existing) = state.entry_for_key(&key) {
            if existing.wallet_id != draft.wallet_id || existing.amount != draft.amount {
                warn!(
                    entry_id = %existing.id,
                    stored_wallet = %existing.wallet_id,
                    stored_amount = %existing.amount,
                    draft_wallet = %draft.wallet_id,
                    draft_amount = %draft.amount,
                    "replayed ledger draft differs from stored entry"
                );
            }
            return Ok(Posting {
                entry: existing.clone(),
                replayed: true,
            });
        }

        // 2. Guard the balance.
        let wallet = state
            .wallets
            .get(&draft.wallet_id)
            .ok_or(HoldfastError::WalletNotFound(draft.wallet_id))?;
        let new_balance = match draft.direction {
            Direction::In => wallet
                .balance
                .checked_add(draft.amount)
                .ok_or(HoldfastError::BalanceOverflow(draft.wallet_id))?,
            Direction::Out => wallet.balance.checked_sub(draft.amount).ok_or(
                HoldfastError::InsufficientFunds {
                    wallet: draft.wallet_id,
                    needed: draft.amount,
                    available: wallet.balance,
                },
            )?,
        };

        // 3. Append.
        let entry = draft.into_entry(at);
        let pos = state.entries.len();
        state.index.record(key, entry.id)?;
        state.positions.insert(entry.id, pos);
        state.by_wallet.entry(entry.wallet_id).or_default().push(pos);
        state.entries.push(entry.clone());

        // 4. Update the cache.
        if let Some(wallet) = state.wallets.get_mut(&entry.wallet_id) {
            wallet.balance = new_balance;
            wallet.version += 1;
        }

        Ok(Posting {
            entry,
            replayed: false,
        })
    }

    async fn find(&self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>> {
        Ok(self.lock()?.entry_for_key(key).cloned())
    }

    async fn entries_for_wallet(&self, wallet: WalletId) -> Result<Vec<LedgerEntry>> {
        Ok(self.lock()?.wallet_entries(wallet))
    }

    async fn entries_for_scope(&self, scope: &RefScope) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .lock()?
            .entries
            .iter()
            .filter(|e| &e.reference.scope() == scope)
            .cloned()
            .collect())
    }

    async fn rebuild_balance(&self, wallet_id: WalletId) -> Result<Wallet> {
        let mut state = self.lock()?;
        let projected = project_balance(&state.wallet_entries(wallet_id));
        let balance = u64::try_from(projected)
            .map(Amount::new)
            .map_err(|_| HoldfastError::ConservationViolation {
                reason: format!("wallet {wallet_id} projects to {projected}"),
            })?;
        let wallet = state
            .wallets
            .get_mut(&wallet_id)
            .ok_or(HoldfastError::WalletNotFound(wallet_id))?;
        if wallet.balance != balance {
            warn!(
                wallet_id = %wallet_id,
                cached = %wallet.balance,
                projected = %balance,
                "rebuilt drifted wallet balance from ledger"
            );
            wallet.balance = balance;
            wallet.version += 1;
        }
        Ok(wallet.clone())
    }
}
