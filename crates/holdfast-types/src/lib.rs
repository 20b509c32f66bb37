//! # holdfast-types
//!
//! Shared types, errors, and configuration for the **Holdfast** escrow
//! settlement engine.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`WalletId`], [`UserId`], [`ShopId`], [`ProductId`], [`OrderId`],
//!   [`OrderItemId`], [`TicketId`], [`AdjustmentId`], [`LedgerEntryId`]
//! - **Money**: [`Amount`] in the smallest currency unit
//! - **Ledger model**: [`LedgerEntry`], [`EntryKind`], [`Direction`], [`LedgerRef`],
//!   [`IdempotencyKey`], [`EntryDraft`], [`Posting`]
//! - **Wallet model**: [`Wallet`]
//! - **Order model**: [`Order`], [`OrderStatus`], [`OrderItem`], [`ItemStatus`], [`HoldStatus`]
//! - **Time**: [`Clock`], [`SystemClock`] (and `ManualClock` behind `test-helpers`)
//! - **Pagination**: [`PageRequest`], [`Page`]
//! - **Configuration**: [`EscrowConfig`]
//! - **Errors**: [`HoldfastError`] with `HF_ERR_` prefix codes
//! - **Constants**: policy defaults

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod money;
pub mod order;
pub mod page;
pub mod wallet;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use ledger::*;
pub use money::*;
pub use order::*;
pub use page::*;
pub use wallet::*;

// Constants are accessed via `holdfast_types::constants::FOO`
// (not re-exported to avoid name collisions).
