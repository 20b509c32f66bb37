//! Conservation invariant checker.
//!
//! Invariant checked on demand by [`ConservationAuditor::audit`]:
//! ```text
//! ∀ wallet: cached balance == Σ(entries of wallet, signed by direction)
//! Σ(all balances) == Σ(all In) - Σ(all Out)
//! ```
//!
//! If it ever breaks, the cache has drifted from the ledger. The ledger
//! wins; [`crate::WalletAccessor::rebuild_balance`] repairs the cache.

use std::sync::Arc;

use holdfast_types::{HoldfastError, LedgerEntry, Result};
use tracing::error;

use crate::store::LedgerStore;

/// Signed sum of a wallet's entries.
#[must_use]
pub fn project_balance(entries: &[LedgerEntry]) -> i128 {
    entries.iter().map(LedgerEntry::signed_amount).sum()
}

/// Totals gathered by one audit pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConservationReport {
    pub wallets_checked: usize,
    pub entries_checked: usize,
    pub total_in: i128,
    pub total_out: i128,
    pub total_balance: i128,
}

/// Audits every wallet's cached balance against its ledger.
pub struct ConservationAuditor {
    store: Arc<dyn LedgerStore>,
}

impl ConservationAuditor {
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Verify the invariant across all wallets.
    ///
    /// # Errors
    /// [`HoldfastError::ConservationViolation`] naming the first wallet whose
    /// cache disagrees with the ledger.
    pub async fn audit(&self) -> Result<ConservationReport> {
        let mut report = ConservationReport::default();
        for wallet in self.store.wallets().await? {
            let entries = self.store.entries_for_wallet(wallet.id).await?;
            let projected = project_balance(&entries);
            let cached = wallet.balance.as_i128();
            if projected != cached {
                error!(
                    wallet_id = %wallet.id,
                    cached,
                    projected,
                    "conservation violated: cached balance drifted from ledger"
                );
                return Err(HoldfastError::ConservationViolation {
                    reason: format!(
                        "wallet {}: cached {cached} != ledger {projected} over {} entries",
                        wallet.id,
                        entries.len()
                    ),
                });
            }
            for entry in &entries {
                match entry.direction {
                    holdfast_types::Direction::In => report.total_in += entry.amount.as_i128(),
                    holdfast_types::Direction::Out => report.total_out += entry.amount.as_i128(),
                }
            }
            report.wallets_checked += 1;
            report.entries_checked += entries.len();
            report.total_balance += cached;
        }

        if report.total_balance != report.total_in - report.total_out {
            return Err(HoldfastError::ConservationViolation {
                reason: format!(
                    "Σ balances {} != Σ in {} - Σ out {}",
                    report.total_balance, report.total_in, report.total_out
                ),
            });
        }
        Ok(report)
    }
}
