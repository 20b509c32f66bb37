//! Wallet accessor: credit, debit and balance reads on top of the ledger.
//!
//! Every method is one call into [`LedgerStore::append`], so every money
//! movement is a single atomic, idempotent write. Nothing here ever edits
//! an existing row.

use std::sync::Arc;

use holdfast_types::{
    AdjustmentId, Amount, Clock, Direction, EntryDraft, EntryKind, LedgerEntry, LedgerRef,
    Posting, Result, SystemRef, UserId, Wallet, WalletId,
};
use tracing::{debug, info};

use crate::store::LedgerStore;

/// Applies credits and debits to wallets.
#[derive(Clone)]
pub struct WalletAccessor {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for WalletAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletAccessor")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl WalletAccessor {
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The underlying store, for read-side projections.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// The wallet owned by `owner`, created on first use.
    pub async fn wallet_of(&self, owner: UserId) -> Result<Wallet> {
        self.store.wallet_for_owner(owner, self.clock.now()).await
    }

    pub async fn balance_of(&self, wallet: WalletId) -> Result<Amount> {
        Ok(self.store.wallet(wallet).await?.balance)
    }

    /// Add `amount` to a wallet.
    ///
    /// Returns the prior entry unchanged if this movement was already posted.
    pub async fn credit(
        &self,
        wallet: WalletId,
        amount: Amount,
        kind: EntryKind,
        reference: LedgerRef,
        memo: impl Into<String>,
    ) -> Result<Posting> {
        self.post(wallet, amount, kind, Direction::In, reference, memo.into())
            .await
    }

    /// Remove `amount` from a wallet.
    ///
    /// # Errors
    /// [`holdfast_types::HoldfastError::InsufficientFunds`] if the balance
    /// cannot cover it. Nothing is written in that case.
    pub async fn debit(
        &self,
        wallet: WalletId,
        amount: Amount,
        kind: EntryKind,
        reference: LedgerRef,
        memo: impl Into<String>,
    ) -> Result<Posting> {
        self.post(wallet, amount, kind, Direction::Out, reference, memo.into())
            .await
    }

    /// Credit a gateway-confirmed topup, once per `(provider, external_ref)`.
    pub async fn topup(
        &self,
        wallet: WalletId,
        amount: Amount,
        provider: &str,
        external_ref: &str,
    ) -> Result<Posting> {
        let reference = LedgerRef::System(SystemRef::Gateway {
            provider: provider.to_string(),
            external_ref: external_ref.to_string(),
        });
        self.credit(
            wallet,
            amount,
            EntryKind::Topup,
            reference,
            format!("topup via {provider} ({external_ref})"),
        )
        .await
    }

    /// Operator correction in either direction.
    pub async fn adjust(
        &self,
        wallet: WalletId,
        amount: Amount,
        direction: Direction,
        actor: UserId,
        memo: impl Into<String>,
    ) -> Result<Posting> {
        let reference = LedgerRef::System(SystemRef::Adjustment {
            actor,
            id: AdjustmentId::new(),
        });
        self.post(
            wallet,
            amount,
            EntryKind::Adjustment,
            direction,
            reference,
            memo.into(),
        )
        .await
    }

    /// Full ledger history of a wallet, oldest first.
    pub async fn history(&self, wallet: WalletId) -> Result<Vec<LedgerEntry>> {
        self.store.entries_for_wallet(wallet).await
    }

    /// Recompute a wallet's cached balance from its ledger.
    pub async fn rebuild_balance(&self, wallet: WalletId) -> Result<Wallet> {
        self.store.rebuild_balance(wallet).await
    }

    async fn post(
        &self,
        wallet: WalletId,
        amount: Amount,
        kind: EntryKind,
        direction: Direction,
        reference: LedgerRef,
        memo: String,
    ) -> Result<Posting> {
        let draft = EntryDraft {
            wallet_id: wallet,
            kind,
            direction,
            amount,
            reference,
            memo,
        };
        let posting = self.store.append(draft, self.clock.now()).await?;
        if posting.replayed {
            debug!(
                entry_id = %posting.entry.id.short(),
                wallet_id = %wallet,
                kind = %kind,
                "ledger movement already posted; returning prior entry"
            );
        } else {
            info!(
                entry_id = %posting.entry.id.short(),
                wallet_id = %wallet,
                kind = %kind,
                direction = %direction,
                amount = %amount,
                reference = %posting.entry.reference,
                "ledger entry posted"
            );
        }
        Ok(posting)
    }
}
