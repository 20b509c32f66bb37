//! Globally unique identifiers used throughout Holdfast.
//!
//! Entity IDs use UUIDv7 for time-ordered lexicographic sorting, except
//! [`LedgerEntryId`], which is derived from the entry's idempotency key so
//! that every replica computes the same ID for the same logical movement.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            #[must_use]
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

uuid_id!(
    /// A user of the marketplace (buyer, seller, or moderator).
    UserId,
    "user"
);
uuid_id!(
    /// One platform wallet. Each user owns at most one.
    WalletId,
    "wallet"
);
uuid_id!(
    /// A seller's shop. Disbursements go to the shop owner's wallet.
    ShopId,
    "shop"
);
uuid_id!(
    /// A catalog product.
    ProductId,
    "product"
);
uuid_id!(
    /// Aggregate root of a purchase.
    OrderId,
    "order"
);
uuid_id!(
    /// One purchased line; the unit that is held and released.
    OrderItemId,
    "item"
);
uuid_id!(
    /// A complaint / dispute ticket owned by the external dispute workflow.
    TicketId,
    "ticket"
);
uuid_id!(
    /// An operator balance adjustment.
    AdjustmentId,
    "adj"
);

// ---------------------------------------------------------------------------
// LedgerEntryId
// ---------------------------------------------------------------------------

/// Identifier of an immutable ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct LedgerEntryId(pub Uuid);

impl LedgerEntryId {
    /// Deterministic ID from the canonical bytes of an idempotency key.
    ///
    /// Two attempts to post the same logical movement always carry the
    /// same ID, which lets a datastore reject the duplicate on its primary
    /// key alone.
    #[must_use]
    pub fn deterministic(key_bytes: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(crate::constants::LEDGER_ENTRY_ID_DOMAIN);
        hasher.update(key_bytes);
        let hash = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash[..16]);
        Self(Uuid::from_bytes(bytes))
    }

    /// First eight hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl fmt::Display for LedgerEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
