//! Ledger idempotency index: prevents double movement.
//!
//! Each logical movement ([`IdempotencyKey`]) can be recorded once. A second
//! attempt finds the row that already recorded it. Unlike a settlement
//! cache, this index is never evicted: the ledger is never pruned, so
//! neither is the record of what it contains.

use std::collections::HashMap;

use holdfast_types::{HoldfastError, IdempotencyKey, LedgerEntryId, Result};

/// Maps idempotency keys to the ledger rows that recorded them.
#[derive(Debug, Default)]
pub struct IdempotencyIndex {
    recorded: HashMap<IdempotencyKey, LedgerEntryId>,
}

impl IdempotencyIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The row that already recorded this movement, if any.
    #[must_use]
    pub fn lookup(&self, key: &IdempotencyKey) -> Option<LedgerEntryId> {
        self.recorded.get(key).copied()
    }

    /// Record a movement.
    ///
    /// # Errors
    /// Returns [`HoldfastError::Internal`] if the key is already recorded;
    /// callers check [`Self::lookup`] first under the same lock.
    pub fn record(&mut self, key: IdempotencyKey, entry: LedgerEntryId) -> Result<()> {
        if let Some(existing) = self.recorded.get(&key) {
            return Err(HoldfastError::Internal(format!(
                "idempotency key already recorded by {existing}"
            )));
        }
        self.recorded.insert(key, entry);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.recorded.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recorded.is_empty()
    }
}
