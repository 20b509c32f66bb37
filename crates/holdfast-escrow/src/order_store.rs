//! Order/OrderItem persistence.
//!
//! The store records intent and status only. It never holds a balance.
//!
//! Every item write is a single conditional update under the store's lock.
//! [`OrderStore::claim_hold`] is the disbursement claim: a compare-and-swap
//! on `(version, Holding)` that succeeds for exactly one caller per item.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use holdfast_types::{
    HoldStatus, HoldfastError, ItemStatus, LedgerEntryId, Order, OrderId, OrderItem, OrderItemId,
    OrderStatus, PaymentProvider, Result, SettlementTrigger, ShopId,
};

/// Persistence port for orders and their items.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order with its items.
    ///
    /// # Errors
    /// [`HoldfastError::DuplicateOrderCode`] if the code is taken.
    async fn insert(&self, order: Order, items: Vec<OrderItem>) -> Result<()>;

    async fn order(&self, id: OrderId) -> Result<Order>;

    async fn item(&self, id: OrderItemId) -> Result<OrderItem>;

    async fn items_of_order(&self, id: OrderId) -> Result<Vec<OrderItem>>;

    /// Items in `Holding`, oldest hold first, optionally for one shop.
    async fn holding_items(&self, shop: Option<ShopId>) -> Result<Vec<OrderItem>>;

    /// Items in `Holding` whose hold began at or before `cutoff`.
    async fn holds_started_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<OrderItem>>;

    /// Items that reached a terminal hold status at or after `since`.
    async fn settled_since(&self, since: DateTime<Utc>) -> Result<Vec<OrderItem>>;

    /// Terminal items with no recorded ledger entry.
    async fn awaiting_ledger(&self) -> Result<Vec<OrderItem>>;

    /// `PendingPayment -> Paid`, moving every item `Unfunded -> Holding`
    /// with `hold_at = at`. One atomic write.
    async fn mark_paid(
        &self,
        id: OrderId,
        provider: PaymentProvider,
        at: DateTime<Utc>,
    ) -> Result<Order>;

    /// Conditional order status change: applies only if the order is still
    /// in `from` and `from -> to` is legal.
    async fn set_order_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order>;

    /// Claim the terminal transition of a held item.
    ///
    /// # Errors
    /// [`HoldfastError::ClaimConflict`] unless the stored item is still at
    /// `expected_version` and `Holding`.
    async fn claim_hold(
        &self,
        id: OrderItemId,
        expected_version: u64,
        to: HoldStatus,
        trigger: SettlementTrigger,
        at: DateTime<Utc>,
    ) -> Result<OrderItem>;

    /// Attach the ledger entry that moved a claimed item's money.
    /// Recording the same entry twice is a no-op.
    async fn record_settlement(
        &self,
        id: OrderItemId,
        entry: LedgerEntryId,
        at: DateTime<Utc>,
    ) -> Result<OrderItem>;

    /// Buyer confirmed delivery: `Delivered`, and the window restarts at `at`.
    async fn mark_delivered(&self, id: OrderItemId, at: DateTime<Utc>) -> Result<OrderItem>;

    /// A complaint was filed against a held item.
    async fn mark_item_disputed(&self, id: OrderItemId, at: DateTime<Utc>) -> Result<OrderItem>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct OrderState {
    orders: HashMap<OrderId, Order>,
    codes: HashMap<String, OrderId>,
    items: HashMap<OrderItemId, OrderItem>,
    by_order: HashMap<OrderId, Vec<OrderItemId>>,
}

impl OrderState {
    fn item_mut(&mut self, id: OrderItemId) -> Result<&mut OrderItem> {
        self.items
            .get_mut(&id)
            .ok_or(HoldfastError::OrderItemNotFound(id))
    }

    fn collect<F>(&self, keep: F) -> Vec<OrderItem>
    where
        F: Fn(&OrderItem) -> bool,
    {
        let mut out: Vec<OrderItem> = self.items.values().filter(|i| keep(*i)).cloned().collect();
        out.sort_by_key(|i| (i.hold_at, i.created_at, i.id));
        out
    }
}

/// Single-process order store. One lock covers orders and items so
/// `mark_paid` is atomic across an order's items.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    state: Mutex<OrderState>,
}

impl InMemoryOrderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, OrderState>> {
        self.state
            .lock()
            .map_err(|e| HoldfastError::Datastore(format!("order store lock poisoned: {e}")))
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order, items: Vec<OrderItem>) -> Result<()> {
        let mut state = self.lock()?;
        if state.codes.contains_key(&order.order_code) {
            return Err(HoldfastError::DuplicateOrderCode(order.order_code));
        }
        if items.iter().any(|i| i.order_id != order.id) {
            return Err(HoldfastError::InvalidOrder {
                reason: "item belongs to a different order".into(),
            });
        }
        let ids: Vec<OrderItemId> = items.iter().map(|i| i.id).collect();
        state.codes.insert(order.order_code.clone(), order.id);
        state.by_order.insert(order.id, ids);
        for item in items {
            state.items.insert(item.id, item);
        }
        state.orders.insert(order.id, order);
        Ok(())
    }

    async fn order(&self, id: OrderId) -> Result<Order> {
        self.lock()?
            .orders
            .get(&id)
            .cloned()
            .ok_or(HoldfastError::OrderNotFound(id))
    }

    async fn item(&self, id: OrderItemId) -> Result<OrderItem> {
        self.lock()?
            .items
            .get(&id)
            .cloned()
            .ok_or(HoldfastError::OrderItemNotFound(id))
    }

    async fn items_of_order(&self, id: OrderId) -> Result<Vec<OrderItem>> {
        let state = self.lock()?;
        let ids = state.by_order.get(&id).ok_or(HoldfastError::OrderNotFound(id))?;
        Ok(ids.iter().filter_map(|i| state.items.get(i).cloned()).collect())
    }

    async fn holding_items(&self, shop: Option<ShopId>) -> Result<Vec<OrderItem>> {
        let state = self.lock()?;
        Ok(state.collect(|i| i.is_holding() && shop.is_none_or(|s| s == i.shop_id)))
    }

    async fn holds_started_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<OrderItem>> {
        let state = self.lock()?;
        Ok(state.collect(|i| i.is_holding() && i.hold_at.is_some_and(|at| at <= cutoff)))
    }

    async fn settled_since(&self, since: DateTime<Utc>) -> Result<Vec<OrderItem>> {
        let state = self.lock()?;
        Ok(state.collect(|i| {
            i.hold_status.is_terminal() && i.settled_at.is_some_and(|at| at >= since)
        }))
    }

    async fn awaiting_ledger(&self) -> Result<Vec<OrderItem>> {
        let state = self.lock()?;
        Ok(state.collect(OrderItem::awaiting_ledger))
    }

    async fn mark_paid(
        &self,
        id: OrderId,
        provider: PaymentProvider,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        let mut state = self.lock()?;
        let order = state.orders.get(&id).ok_or(HoldfastError::OrderNotFound(id))?;
        if order.status != OrderStatus::PendingPayment {
            return Err(HoldfastError::InvalidOrderTransition {
                order: id,
                from: order.status,
                to: OrderStatus::Paid,
            });
        }
        let ids = state.by_order.get(&id).cloned().unwrap_or_default();
        for item_id in ids {
            let item = state.item_mut(item_id)?;
            if item.hold_status == HoldStatus::Unfunded {
                item.hold_status = HoldStatus::Holding;
                item.hold_at = Some(at);
                item.version += 1;
                item.updated_at = at;
            }
        }
        let order = state
            .orders
            .get_mut(&id)
            .ok_or(HoldfastError::OrderNotFound(id))?;
        order.status = OrderStatus::Paid;
        order.payment_provider = Some(provider);
        order.paid_at = Some(at);
        order.updated_at = at;
        Ok(order.clone())
    }

    async fn set_order_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        let mut state = self.lock()?;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or(HoldfastError::OrderNotFound(id))?;
        if order.status != from || !from.can_transition_to(to) {
            return Err(HoldfastError::InvalidOrderTransition {
                order: id,
                from: order.status,
                to,
            });
        }
        order.status = to;
        order.updated_at = at;
        Ok(order.clone())
    }

    async fn claim_hold(
        &self,
        id: OrderItemId,
        expected_version: u64,
        to: HoldStatus,
        trigger: SettlementTrigger,
        at: DateTime<Utc>,
    ) -> Result<OrderItem> {
        let mut state = self.lock()?;
        let item = state.item_mut(id)?;
        if item.version != expected_version || !item.hold_status.can_transition_to(to) {
            return Err(HoldfastError::ClaimConflict(id));
        }
        if !to.is_terminal() {
            return Err(HoldfastError::Internal(format!(
                "claim target {to} is not terminal"
            )));
        }
        item.hold_status = to;
        item.item_status = if to == HoldStatus::Released {
            ItemStatus::Completed
        } else {
            ItemStatus::Refunded
        };
        item.settled_at = Some(at);
        item.settled_by = Some(trigger);
        item.version += 1;
        item.updated_at = at;
        Ok(item.clone())
    }

    async fn record_settlement(
        &self,
        id: OrderItemId,
        entry: LedgerEntryId,
        at: DateTime<Utc>,
    ) -> Result<OrderItem> {
        let mut state = self.lock()?;
        let item = state.item_mut(id)?;
        if !item.hold_status.is_terminal() {
            return Err(HoldfastError::Internal(format!(
                "cannot record settlement on {id} in {}",
                item.hold_status
            )));
        }
        match item.settlement_entry {
            Some(existing) if existing == entry => return Ok(item.clone()),
            Some(existing) => {
                return Err(HoldfastError::Internal(format!(
                    "{id} already settled by {existing}, refusing {entry}"
                )));
            }
            None => {}
        }
        item.settlement_entry = Some(entry);
        item.version += 1;
        item.updated_at = at;
        Ok(item.clone())
    }

    async fn mark_delivered(&self, id: OrderItemId, at: DateTime<Utc>) -> Result<OrderItem> {
        let mut state = self.lock()?;
        let item = state.item_mut(id)?;
        if item.hold_status.is_terminal() {
            return Err(HoldfastError::AlreadyTerminal {
                item: id,
                status: item.hold_status,
            });
        }
        if !item.is_holding() {
            return Err(HoldfastError::ItemNotHolding(id));
        }
        if item.item_status != ItemStatus::WaitingDelivery {
            return Err(HoldfastError::InvalidOrder {
                reason: format!("{id} is {}, not awaiting delivery", item.item_status),
            });
        }
        item.item_status = ItemStatus::Delivered;
        item.hold_at = Some(at);
        item.version += 1;
        item.updated_at = at;
        Ok(item.clone())
    }

    async fn mark_item_disputed(&self, id: OrderItemId, at: DateTime<Utc>) -> Result<OrderItem> {
        let mut state = self.lock()?;
        let item = state.item_mut(id)?;
        if item.hold_status.is_terminal() {
            return Err(HoldfastError::AlreadyTerminal {
                item: id,
                status: item.hold_status,
            });
        }
        if !item.is_holding() {
            return Err(HoldfastError::ItemNotHolding(id));
        }
        if item.item_status != ItemStatus::Disputed {
            item.item_status = ItemStatus::Disputed;
            item.version += 1;
            item.updated_at = at;
        }
        Ok(item.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use holdfast_types::{Amount, UserId};

    fn paid_order(store_at: DateTime<Utc>, holds: &[(u64, i64)]) -> (Order, Vec<OrderItem>) {
        let order = Order::dummy_paid(UserId::new(), Amount::new(1), store_at);
        let items = holds
            .iter()
            .map(|&(amount, hours_ago)| {
                OrderItem::dummy_holding(
                    order.id,
                    ShopId::new(),
                    Amount::new(amount),
                    store_at - Duration::hours(hours_ago),
                )
            })
            .collect();
        (order, items)
    }

    #[tokio::test]
    async fn duplicate_order_code_rejected() {
        let store = InMemoryOrderStore::new();
        let now = Utc::now();
        let (order, items) = paid_order(now, &[(10, 1)]);
        let mut clash = order.clone();
        clash.id = OrderId::new();
        store.insert(order, items).await.unwrap();
        let err = store.insert(clash, vec![]).await.unwrap_err();
        assert!(matches!(err, HoldfastError::DuplicateOrderCode(_)));
    }

    #[tokio::test]
    async fn claim_succeeds_once_per_version() {
        let store = InMemoryOrderStore::new();
        let now = Utc::now();
        let (order, items) = paid_order(now, &[(100, 80)]);
        let item = items[0].clone();
        store.insert(order, items).await.unwrap();

        let claimed = store
            .claim_hold(item.id, item.version, HoldStatus::Released, SettlementTrigger::Scheduler, now)
            .await
            .unwrap();
        assert_eq!(claimed.hold_status, HoldStatus::Released);
        assert_eq!(claimed.item_status, ItemStatus::Completed);
        assert_eq!(claimed.version, item.version + 1);
        assert!(claimed.awaiting_ledger());

        let err = store
            .claim_hold(item.id, item.version, HoldStatus::Refunded, SettlementTrigger::Scheduler, now)
            .await
            .unwrap_err();
        assert_eq!(err, HoldfastError::ClaimConflict(item.id));

        // Fresh version still cannot leave a terminal state.
        let err = store
            .claim_hold(item.id, claimed.version, HoldStatus::Refunded, SettlementTrigger::Scheduler, now)
            .await
            .unwrap_err();
        assert_eq!(err, HoldfastError::ClaimConflict(item.id));
    }

    #[tokio::test]
    async fn window_query_uses_inclusive_cutoff() {
        let store = InMemoryOrderStore::new();
        let now = Utc::now();
        let (order, items) = paid_order(now, &[(1, 72), (2, 71), (3, 100)]);
        store.insert(order, items).await.unwrap();
        let due = store.holds_started_before(now - Duration::hours(72)).await.unwrap();
        let amounts: Vec<u64> = due.iter().map(|i| i.hold_amount.minor_units()).collect();
        assert_eq!(amounts, vec![3, 1]);
    }

    #[tokio::test]
    async fn record_settlement_is_idempotent() {
        let store = InMemoryOrderStore::new();
        let now = Utc::now();
        let (order, items) = paid_order(now, &[(5, 80)]);
        let item = items[0].clone();
        store.insert(order, items).await.unwrap();
        store
            .claim_hold(item.id, item.version, HoldStatus::Released, SettlementTrigger::Scheduler, now)
            .await
            .unwrap();
        assert_eq!(store.awaiting_ledger().await.unwrap().len(), 1);

        let entry = LedgerEntryId::deterministic(b"entry");
        store.record_settlement(item.id, entry, now).await.unwrap();
        store.record_settlement(item.id, entry, now).await.unwrap();
        assert!(store.awaiting_ledger().await.unwrap().is_empty());

        let other = LedgerEntryId::deterministic(b"other");
        assert!(store.record_settlement(item.id, other, now).await.is_err());
    }

    #[tokio::test]
    async fn mark_paid_starts_every_hold() {
        let store = InMemoryOrderStore::new();
        let now = Utc::now();
        let (mut order, mut items) = paid_order(now, &[(5, 0), (6, 0)]);
        order.status = OrderStatus::PendingPayment;
        order.paid_at = None;
        for item in &mut items {
            item.hold_status = HoldStatus::Unfunded;
            item.hold_at = None;
        }
        store.insert(order.clone(), items).await.unwrap();

        let paid = store
            .mark_paid(order.id, PaymentProvider::Gateway("vnpay".into()), now)
            .await
            .unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        let items = store.items_of_order(order.id).await.unwrap();
        assert!(items.iter().all(|i| i.is_holding() && i.hold_at == Some(now)));

        let err = store
            .mark_paid(order.id, PaymentProvider::Wallet, now)
            .await
            .unwrap_err();
        assert!(matches!(err, HoldfastError::InvalidOrderTransition { .. }));
    }

    #[tokio::test]
    async fn delivery_restarts_window() {
        let store = InMemoryOrderStore::new();
        let now = Utc::now();
        let (order, items) = paid_order(now, &[(5, 50)]);
        let id = items[0].id;
        store.insert(order, items).await.unwrap();
        let delivered = store.mark_delivered(id, now).await.unwrap();
        assert_eq!(delivered.item_status, ItemStatus::Delivered);
        assert_eq!(delivered.hold_at, Some(now));
        assert!(store.mark_delivered(id, now).await.is_err());
    }

    #[tokio::test]
    async fn order_status_change_is_conditional() {
        let store = InMemoryOrderStore::new();
        let now = Utc::now();
        let (order, items) = paid_order(now, &[(5, 1)]);
        let id = order.id;
        store.insert(order, items).await.unwrap();
        store
            .set_order_status(id, OrderStatus::Paid, OrderStatus::Disputed, now)
            .await
            .unwrap();
        let err = store
            .set_order_status(id, OrderStatus::Paid, OrderStatus::Completed, now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HoldfastError::InvalidOrderTransition { from: OrderStatus::Disputed, .. }
        ));
    }
}
