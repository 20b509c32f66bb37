//! Ledger model: immutable money movements and their idempotency keys.
//!
//! ## Reference model
//!
//! Every entry points at the business object that caused it through a
//! [`LedgerRef`]. The reference is a tagged enum, so building the
//! [`IdempotencyKey`] is an exhaustive match rather than string plumbing:
//!
//! ```text
//!   LedgerRef::Order(o)                      -> scope Order(o)
//!   LedgerRef::OrderItem(i)                  -> scope OrderItem(i)
//!   LedgerRef::Ticket { item: i, .. }        -> scope OrderItem(i)
//!   LedgerRef::System(Moderator { item: i }) -> scope OrderItem(i)
//!   LedgerRef::System(Gateway { .. })        -> scope External(provider, ref)
//!   LedgerRef::System(Adjustment { id, .. }) -> scope Adjustment(id)
//! ```
//!
//! A scheduled release, a moderator release and a complaint-forced release
//! of the same item therefore share one key: the ledger itself refuses a
//! second Release credit for that item no matter which path posts it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AdjustmentId, Amount, LedgerEntryId, OrderId, OrderItemId, TicketId, UserId, WalletId};

/// What kind of money movement an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryKind {
    /// Funds arriving from a payment gateway.
    Topup,
    /// Buyer paying for an order out of their wallet.
    Purchase,
    /// Funds notionally reserved for a seller.
    Hold,
    /// Escrow released to the seller.
    Release,
    /// Escrow returned to the buyer.
    Refund,
    /// Operator correction.
    Adjustment,
}

impl EntryKind {
    fn tag(self) -> &'static str {
        match self {
            Self::Topup => "topup",
            Self::Purchase => "purchase",
            Self::Hold => "hold",
            Self::Release => "release",
            Self::Refund => "refund",
            Self::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag().to_ascii_uppercase())
    }
}

/// Whether an entry adds to or removes from its wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    #[must_use]
    pub fn sign(self) -> i128 {
        match self {
            Self::In => 1,
            Self::Out => -1,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag().to_ascii_uppercase())
    }
}

/// Coarse reference category, as stored in a `ref_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefType {
    Order,
    OrderItem,
    Ticket,
    System,
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Order => write!(f, "ORDER"),
            Self::OrderItem => write!(f, "ORDER_ITEM"),
            Self::Ticket => write!(f, "TICKET"),
            Self::System => write!(f, "SYSTEM"),
        }
    }
}

/// System-originated references, each with its own payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemRef {
    /// A payment-gateway confirmation.
    Gateway {
        provider: String,
        external_ref: String,
    },
    /// A moderator acting on one order item.
    Moderator { actor: UserId, item: OrderItemId },
    /// An operator balance correction.
    Adjustment { actor: UserId, id: AdjustmentId },
}

/// The business object that caused a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerRef {
    Order(OrderId),
    OrderItem(OrderItemId),
    /// A complaint ticket resolving one order item.
    Ticket { ticket: TicketId, item: OrderItemId },
    System(SystemRef),
}

impl LedgerRef {
    #[must_use]
    pub fn ref_type(&self) -> RefType {
        match self {
            Self::Order(_) => RefType::Order,
            Self::OrderItem(_) => RefType::OrderItem,
            Self::Ticket { .. } => RefType::Ticket,
            Self::System(_) => RefType::System,
        }
    }

    /// The idempotency scope of this reference.
    #[must_use]
    pub fn scope(&self) -> RefScope {
        match self {
            Self::Order(id) => RefScope::Order(*id),
            Self::OrderItem(item)
            | Self::Ticket { item, .. }
            | Self::System(SystemRef::Moderator { item, .. }) => RefScope::OrderItem(*item),
            Self::System(SystemRef::Gateway {
                provider,
                external_ref,
            }) => RefScope::External {
                provider: provider.clone(),
                external_ref: external_ref.clone(),
            },
            Self::System(SystemRef::Adjustment { id, .. }) => RefScope::Adjustment(*id),
        }
    }

    /// The order item this reference settles, if any.
    #[must_use]
    pub fn order_item(&self) -> Option<OrderItemId> {
        match self.scope() {
            RefScope::OrderItem(item) => Some(item),
            _ => None,
        }
    }

    /// The acting user, for actor-tagged references.
    #[must_use]
    pub fn actor(&self) -> Option<UserId> {
        match self {
            Self::System(SystemRef::Moderator { actor, .. } | SystemRef::Adjustment { actor, .. }) => {
                Some(*actor)
            }
            _ => None,
        }
    }
}

impl fmt::Display for LedgerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Order(id) => write!(f, "{id}"),
            Self::OrderItem(id) => write!(f, "{id}"),
            Self::Ticket { ticket, item } => write!(f, "{ticket}/{item}"),
            Self::System(SystemRef::Gateway {
                provider,
                external_ref,
            }) => write!(f, "gateway:{provider}:{external_ref}"),
            Self::System(SystemRef::Moderator { actor, item }) => write!(f, "{actor}/{item}"),
            Self::System(SystemRef::Adjustment { actor, id }) => write!(f, "{actor}/{id}"),
        }
    }
}

/// What a duplicate is detected against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefScope {
    Order(OrderId),
    OrderItem(OrderItemId),
    External {
        provider: String,
        external_ref: String,
    },
    Adjustment(AdjustmentId),
}

/// Identity of one logical money movement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub scope: RefScope,
    pub kind: EntryKind,
    pub direction: Direction,
}

impl IdempotencyKey {
    #[must_use]
    pub fn new(reference: &LedgerRef, kind: EntryKind, direction: Direction) -> Self {
        Self {
            scope: reference.scope(),
            kind,
            direction,
        }
    }

    /// Stable byte encoding, used to derive [`LedgerEntryId`]s.
    ///
    /// Format: `scope_tag || ':' || scope_payload || ':' || kind || ':' || direction`
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        match &self.scope {
            RefScope::Order(id) => {
                out.extend_from_slice(b"order:");
                out.extend_from_slice(id.as_bytes());
            }
            RefScope::OrderItem(id) => {
                out.extend_from_slice(b"item:");
                out.extend_from_slice(id.as_bytes());
            }
            RefScope::External {
                provider,
                external_ref,
            } => {
                out.extend_from_slice(b"external:");
                out.extend_from_slice(provider.as_bytes());
                out.push(0);
                out.extend_from_slice(external_ref.as_bytes());
            }
            RefScope::Adjustment(id) => {
                out.extend_from_slice(b"adjustment:");
                out.extend_from_slice(id.as_bytes());
            }
        }
        out.push(b':');
        out.extend_from_slice(self.kind.tag().as_bytes());
        out.push(b':');
        out.extend_from_slice(self.direction.tag().as_bytes());
        out
    }

    /// The ledger entry ID every replica derives for this key.
    #[must_use]
    pub fn entry_id(&self) -> LedgerEntryId {
        LedgerEntryId::deterministic(&self.canonical_bytes())
    }
}

/// A ledger entry before it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDraft {
    pub wallet_id: WalletId,
    pub kind: EntryKind,
    pub direction: Direction,
    pub amount: Amount,
    pub reference: LedgerRef,
    pub memo: String,
}

impl EntryDraft {
    #[must_use]
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.reference, self.kind, self.direction)
    }

    /// Materialize the immutable row.
    #[must_use]
    pub fn into_entry(self, created_at: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id: self.idempotency_key().entry_id(),
            wallet_id: self.wallet_id,
            kind: self.kind,
            direction: self.direction,
            amount: self.amount,
            reference: self.reference,
            created_at,
            memo: self.memo,
        }
    }
}

/// One immutable money movement. Never updated, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub wallet_id: WalletId,
    pub kind: EntryKind,
    pub direction: Direction,
    pub amount: Amount,
    pub reference: LedgerRef,
    pub created_at: DateTime<Utc>,
    pub memo: String,
}

impl LedgerEntry {
    /// Amount with the direction's sign applied.
    #[must_use]
    pub fn signed_amount(&self) -> i128 {
        self.direction.sign() * self.amount.as_i128()
    }

    #[must_use]
    pub fn ref_type(&self) -> RefType {
        self.reference.ref_type()
    }

    #[must_use]
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.reference, self.kind, self.direction)
    }
}

/// Result of appending a draft: the stored row, and whether it already
/// existed (the call was a replay and moved no money).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub entry: LedgerEntry,
    pub replayed: bool,
}
