//! Wallet model.
//!
//! The `balance` on a wallet is a cache. The ledger is the source of truth;
//! the cache can be rebuilt from it at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Amount, UserId, WalletId};

/// A user's platform wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub owner_id: UserId,
    /// Cached signed sum of this wallet's ledger entries.
    pub balance: Amount,
    /// Bumped on every balance write; used for optimistic concurrency.
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    #[must_use]
    pub fn open(owner_id: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: WalletId::new(),
            owner_id,
            balance: Amount::ZERO,
            version: 0,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_wallet_is_empty() {
        let owner = UserId::new();
        let w = Wallet::open(owner, Utc::now());
        assert_eq!(w.owner_id, owner);
        assert!(w.balance.is_zero());
        assert_eq!(w.version, 0);
    }
}
