//! Ports to the systems around the escrow engine.
//!
//! The complaint workflow decides; this crate only asks whether a complaint
//! is open and consumes verdicts. The shop directory maps a shop to the
//! user whose wallet receives released funds.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use holdfast_types::{HoldfastError, OrderItemId, Result, ShopId, TicketId, UserId};
use serde::{Deserialize, Serialize};

/// Outcome of a resolved complaint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplaintVerdict {
    /// Buyer wins: the held amount goes back to the buyer.
    ForceRefund,
    /// Seller wins: the held amount is released now, window or not.
    ForceRelease,
}

/// Answers "is there an open complaint on this item?".
#[async_trait]
pub trait ComplaintGate: Send + Sync {
    async fn has_open_complaint(&self, item: OrderItemId) -> Result<bool>;
}

/// A shop and the user who owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shop {
    pub id: ShopId,
    pub owner_id: UserId,
    pub name: String,
}

#[async_trait]
pub trait ShopDirectory: Send + Sync {
    /// # Errors
    /// [`HoldfastError::ShopNotFound`] for an unknown shop.
    async fn shop(&self, id: ShopId) -> Result<Shop>;
}

// ---------------------------------------------------------------------------
// In-memory adapters
// ---------------------------------------------------------------------------

/// Open complaints keyed by item.
#[derive(Debug, Default)]
pub struct InMemoryComplaintBoard {
    open: Mutex<HashMap<OrderItemId, TicketId>>,
}

impl InMemoryComplaintBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<OrderItemId, TicketId>>> {
        self.open
            .lock()
            .map_err(|e| HoldfastError::Datastore(format!("complaint board lock poisoned: {e}")))
    }

    /// File a complaint. Returns the ticket already open for the item, if any.
    pub fn open(&self, item: OrderItemId, ticket: TicketId) -> Result<TicketId> {
        Ok(*self.lock()?.entry(item).or_insert(ticket))
    }

    /// Close the complaint on `item`, returning its ticket.
    pub fn close(&self, item: OrderItemId) -> Result<Option<TicketId>> {
        Ok(self.lock()?.remove(&item))
    }
}

#[async_trait]
impl ComplaintGate for InMemoryComplaintBoard {
    async fn has_open_complaint(&self, item: OrderItemId) -> Result<bool> {
        Ok(self.lock()?.contains_key(&item))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryShopDirectory {
    shops: Mutex<HashMap<ShopId, Shop>>,
}

impl InMemoryShopDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ShopId, Shop>>> {
        self.shops
            .lock()
            .map_err(|e| HoldfastError::Datastore(format!("shop directory lock poisoned: {e}")))
    }

    /// Register a shop owned by `owner`.
    pub fn register(&self, owner: UserId, name: impl Into<String>) -> Result<Shop> {
        let shop = Shop {
            id: ShopId::new(),
            owner_id: owner,
            name: name.into(),
        };
        self.lock()?.insert(shop.id, shop.clone());
        Ok(shop)
    }
}

#[async_trait]
impl ShopDirectory for InMemoryShopDirectory {
    async fn shop(&self, id: ShopId) -> Result<Shop> {
        self.lock()?
            .get(&id)
            .cloned()
            .ok_or(HoldfastError::ShopNotFound(id))
    }
}
