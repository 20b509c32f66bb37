//! # holdfast-escrow
//!
//! **Escrow Plane**: orders, per-item holds, and the state machine that
//! moves each hold to `Released` or `Refunded` exactly once.
//!
//! ## Pipeline
//!
//! ```text
//! Checkout ──▶ OrderStore (Unfunded) ──pay──▶ Holding ──▶ EscrowMachine
//!                                                           │ claim (CAS)
//!                                                           ▼
//!                                              WalletAccessor::credit (ledger)
//! ```
//!
//! The order store persists intent and status. Money only moves through
//! the ledger crate.

pub mod checkout;
pub mod collaborators;
pub mod eligibility;
pub mod machine;
pub mod order_store;

pub use checkout::{Checkout, OrderLine, order_code};
pub use collaborators::{
    ComplaintGate, ComplaintVerdict, InMemoryComplaintBoard, InMemoryShopDirectory, Shop,
    ShopDirectory,
};
pub use eligibility::{BlockReason, Eligibility, evaluate};
pub use machine::{EscrowMachine, ReconcileReport, Settlement};
pub use order_store::{InMemoryOrderStore, OrderStore};
