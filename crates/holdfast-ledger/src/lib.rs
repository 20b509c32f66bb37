//! # holdfast-ledger
//!
//! **Ledger Plane**: the only place money moves.
//!
//! ## Architecture
//!
//! 1. **IdempotencyIndex**: maps each logical movement to the row that recorded it
//! 2. **LedgerStore**: append-only log + cached wallet balances, one atomic append per movement
//! 3. **WalletAccessor**: credit / debit / topup / adjust on top of the store
//! 4. **ConservationAuditor**: proves every cached balance equals its ledger projection
//!
//! ## Invariant
//!
//! ```text
//! ∀ wallet: balance == Σ(entries, signed by direction)
//! ```
//!
//! A second attempt to post the same logical entry returns the original row
//! and moves no money.

pub mod conservation;
pub mod idempotency;
pub mod store;
pub mod wallet;

pub use conservation::{ConservationAuditor, ConservationReport, project_balance};
pub use idempotency::IdempotencyIndex;
pub use store::{InMemoryLedgerStore, LedgerStore};
pub use wallet::WalletAccessor;
