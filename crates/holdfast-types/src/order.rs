//! Order aggregate and per-item hold state.
//!
//! ## Hold State Machine
//!
//! ```text
//!   ┌──────────┐ payment ┌─────────┐  window elapsed / moderator  ┌──────────┐
//!   │ UNFUNDED ├────────▶│ HOLDING ├─────────────────────────────▶│ RELEASED │
//!   └──────────┘         └────┬────┘                              └──────────┘
//!                             │ complaint verdict for buyer
//!                             ▼
//!                        ┌──────────┐
//!                        │ REFUNDED │
//!                        └──────────┘
//! ```
//!
//! Transitions are monotonic. `RELEASED` and `REFUNDED` are terminal.
//! The store persists status only; balances live in the ledger.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Amount, LedgerEntryId, LedgerRef, OrderId, OrderItemId, ProductId, ShopId, SystemRef, TicketId,
    UserId,
};

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

/// Lifecycle of an order aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Completed,
    Cancelled,
    Disputed,
    Refunded,
}

impl OrderStatus {
    /// Forward-only, except for the dispute branch.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        use OrderStatus::{Cancelled, Completed, Disputed, Paid, PendingPayment, Refunded};
        matches!(
            (self, target),
            (PendingPayment, Paid | Cancelled)
                | (Paid, Completed | Disputed | Refunded)
                | (Disputed, Paid | Completed | Refunded)
        )
    }

    /// Completed, Cancelled and Refunded orders are immutable.
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Refunded)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendingPayment => write!(f, "PENDING_PAYMENT"),
            Self::Paid => write!(f, "PAID"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Disputed => write!(f, "DISPUTED"),
            Self::Refunded => write!(f, "REFUNDED"),
        }
    }
}

// ---------------------------------------------------------------------------
// ItemStatus / HoldStatus
// ---------------------------------------------------------------------------

/// Fulfilment status of one order item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    WaitingDelivery,
    Delivered,
    Completed,
    Disputed,
    Refunded,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitingDelivery => write!(f, "WAITING_DELIVERY"),
            Self::Delivered => write!(f, "DELIVERED"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Disputed => write!(f, "DISPUTED"),
            Self::Refunded => write!(f, "REFUNDED"),
        }
    }
}

/// Escrow status of one order item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HoldStatus {
    /// Order not paid yet; nothing is held.
    Unfunded,
    /// Funds held against this item.
    Holding,
    /// Seller credited. **Terminal.**
    Released,
    /// Buyer credited. **Terminal.**
    Refunded,
}

impl HoldStatus {
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Unfunded, Self::Holding) | (Self::Holding, Self::Released | Self::Refunded)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unfunded => write!(f, "UNFUNDED"),
            Self::Holding => write!(f, "HOLDING"),
            Self::Released => write!(f, "RELEASED"),
            Self::Refunded => write!(f, "REFUNDED"),
        }
    }
}

// ---------------------------------------------------------------------------
// SettlementTrigger
// ---------------------------------------------------------------------------

/// Who moved an item out of `Holding`. Recorded at claim time so a
/// reconciliation pass can post the ledger entry with the same reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementTrigger {
    /// The disbursement scheduler, after the escrow window.
    Scheduler,
    /// A moderator's manual release.
    Moderator { actor: UserId },
    /// A complaint verdict.
    Ticket { ticket: TicketId },
}

impl SettlementTrigger {
    /// Ledger reference for the entry that settles `item`.
    #[must_use]
    pub fn ledger_ref(self, item: OrderItemId) -> LedgerRef {
        match self {
            Self::Scheduler => LedgerRef::OrderItem(item),
            Self::Moderator { actor } => LedgerRef::System(SystemRef::Moderator { actor, item }),
            Self::Ticket { ticket } => LedgerRef::Ticket { ticket, item },
        }
    }
}

impl fmt::Display for SettlementTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduler => write!(f, "scheduler"),
            Self::Moderator { actor } => write!(f, "moderator {actor}"),
            Self::Ticket { ticket } => write!(f, "{ticket}"),
        }
    }
}

// ---------------------------------------------------------------------------
// PaymentProvider
// ---------------------------------------------------------------------------

/// How an order was paid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentProvider {
    /// Debited from the buyer's platform wallet.
    Wallet,
    /// Confirmed by an external gateway (e.g. "vnpay", "momo").
    Gateway(String),
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wallet => write!(f, "wallet"),
            Self::Gateway(name) => write!(f, "{name}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// Aggregate root of a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Unique, human-traceable code.
    pub order_code: String,
    pub customer_user_id: UserId,
    /// Sum of item subtotals.
    pub total_amount: Amount,
    /// Sum of platform fees withheld from sellers.
    pub fee_amount: Amount,
    /// What the buyer pays.
    pub payable_amount: Amount,
    pub status: OrderStatus,
    pub payment_provider: Option<PaymentProvider>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// OrderItem
// ---------------------------------------------------------------------------

/// One purchased line and its escrow hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub shop_id: ShopId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Amount,
    pub subtotal: Amount,
    /// Platform fee withheld from this line.
    pub fee_amount: Amount,
    /// Seller's share of `subtotal`. Fixed at creation.
    pub hold_amount: Amount,
    pub item_status: ItemStatus,
    pub hold_status: HoldStatus,
    /// When the hold began (payment or delivery confirmation).
    pub hold_at: Option<DateTime<Utc>>,
    /// When the item reached a terminal hold status.
    pub settled_at: Option<DateTime<Utc>>,
    /// Who claimed the terminal transition.
    pub settled_by: Option<SettlementTrigger>,
    /// The ledger row that moved the money, once recorded.
    pub settlement_entry: Option<LedgerEntryId>,
    /// Optimistic-concurrency version, bumped on every write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderItem {
    /// When the escrow window ends, if the hold has started and the end
    /// is representable.
    #[must_use]
    pub fn eligible_at(&self, period: Duration) -> Option<DateTime<Utc>> {
        self.hold_at.and_then(|at| at.checked_add_signed(period))
    }

    /// `now - hold_at >= period`. False while unfunded.
    #[must_use]
    pub fn window_elapsed(&self, now: DateTime<Utc>, period: Duration) -> bool {
        self.hold_at.is_some_and(|at| now - at >= period)
    }

    /// Time left in the window, clamped at zero.
    #[must_use]
    pub fn time_remaining(&self, now: DateTime<Utc>, period: Duration) -> Option<Duration> {
        self.eligible_at(period)
            .map(|end| (end - now).max(Duration::zero()))
    }

    #[must_use]
    pub fn is_holding(&self) -> bool {
        self.hold_status == HoldStatus::Holding
    }

    /// Claimed into a terminal status but the ledger post is not recorded.
    #[must_use]
    pub fn awaiting_ledger(&self) -> bool {
        self.hold_status.is_terminal() && self.settlement_entry.is_none()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl OrderItem {
    /// Create a paid, holding item for tests.
    #[must_use]
    pub fn dummy_holding(
        order_id: OrderId,
        shop_id: ShopId,
        hold_amount: Amount,
        hold_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OrderItemId::new(),
            order_id,
            shop_id,
            product_id: ProductId::new(),
            quantity: 1,
            unit_price: hold_amount,
            subtotal: hold_amount,
            fee_amount: Amount::ZERO,
            hold_amount,
            item_status: ItemStatus::WaitingDelivery,
            hold_status: HoldStatus::Holding,
            hold_at: Some(hold_at),
            settled_at: None,
            settled_by: None,
            settlement_entry: None,
            version: 0,
            created_at: hold_at,
            updated_at: hold_at,
        }
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Order {
    /// Create a paid order shell for tests.
    #[must_use]
    pub fn dummy_paid(customer: UserId, total: Amount, paid_at: DateTime<Utc>) -> Self {
        let id = OrderId::new();
        Self {
            id,
            order_code: format!("HF-TEST-{}", &id.0.simple().to_string()[..8]),
            customer_user_id: customer,
            total_amount: total,
            fee_amount: Amount::ZERO,
            payable_amount: total,
            status: OrderStatus::Paid,
            payment_provider: Some(PaymentProvider::Wallet),
            paid_at: Some(paid_at),
            created_at: paid_at,
            updated_at: paid_at,
        }
    }
}
