//! Error types for the Holdfast escrow engine.
//!
//! All errors use the `HF_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Ledger / wallet errors
//! - 2xx: Order errors
//! - 3xx: Escrow transition errors
//! - 4xx: Scheduler / trigger errors
//! - 9xx: General / internal errors
//!
//! Every variant that can follow a money movement says whether money moved.
//! A caller never has to guess from an opaque string.

use chrono::Duration;
use thiserror::Error;

use crate::{Amount, HoldStatus, OrderId, OrderItemId, OrderStatus, ShopId, WalletId};

/// Central error enum for all Holdfast operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HoldfastError {
    // =================================================================
    // Ledger / Wallet Errors (1xx)
    // =================================================================
    /// A debit was attempted against a balance that cannot cover it.
    /// No ledger row was written.
    #[error("HF_ERR_100: Insufficient funds in wallet {wallet}: need {needed}, have {available}")]
    InsufficientFunds {
        wallet: WalletId,
        needed: Amount,
        available: Amount,
    },

    /// The wallet does not exist.
    #[error("HF_ERR_101: Wallet not found: {0}")]
    WalletNotFound(WalletId),

    /// Ledger amounts must be strictly positive.
    #[error("HF_ERR_102: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// Crediting would overflow the wallet balance. No ledger row was written.
    #[error("HF_ERR_103: Balance overflow in wallet {0}")]
    BalanceOverflow(WalletId),

    /// The datastore failed while appending a ledger row. The row was not
    /// written; the caller may retry with the same idempotency key.
    #[error("HF_ERR_104: Ledger write failed (no money moved): {reason}")]
    LedgerWriteFailed { reason: String },

    /// Cached wallet balance disagrees with the ledger projection.
    #[error("HF_ERR_105: Conservation violation: {reason}")]
    ConservationViolation { reason: String },

    // =================================================================
    // Order Errors (2xx)
    // =================================================================
    /// The requested order was not found.
    #[error("HF_ERR_200: Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The requested order item was not found.
    #[error("HF_ERR_201: Order item not found: {0}")]
    OrderItemNotFound(OrderItemId),

    /// An order with this code already exists.
    #[error("HF_ERR_202: Duplicate order code: {0}")]
    DuplicateOrderCode(String),

    /// The order cannot move to the requested status.
    #[error("HF_ERR_203: Invalid order transition for {order}: {from} -> {to}")]
    InvalidOrderTransition {
        order: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// The order failed validation (no lines, zero quantity, ...).
    #[error("HF_ERR_204: Invalid order: {reason}")]
    InvalidOrder { reason: String },

    /// The shop is unknown to the shop directory.
    #[error("HF_ERR_205: Shop not found: {0}")]
    ShopNotFound(ShopId),

    // =================================================================
    // Escrow Transition Errors (3xx)
    // =================================================================
    /// The item already reached a terminal hold status. Treated as a no-op.
    #[error("HF_ERR_300: Order item {item} already terminal ({status})")]
    AlreadyTerminal { item: OrderItemId, status: HoldStatus },

    /// An optimistic write lost a race. Safe to skip and retry next tick.
    #[error("HF_ERR_301: Claim conflict on order item {0}")]
    ClaimConflict(OrderItemId),

    /// The item has an open complaint; the transition is deferred.
    #[error("HF_ERR_302: Complaint open on order item {0}")]
    ComplaintOpen(OrderItemId),

    /// The escrow window has not elapsed yet.
    #[error("HF_ERR_303: Escrow window not elapsed for {item}: {remaining_secs}s remaining")]
    WindowNotElapsed { item: OrderItemId, remaining_secs: i64 },

    /// The item is not under hold yet (order unpaid).
    #[error("HF_ERR_304: Order item {0} is not on hold")]
    ItemNotHolding(OrderItemId),

    // =================================================================
    // Scheduler / Trigger Errors (4xx)
    // =================================================================
    /// A manual trigger did not finish before its deadline. The
    /// transition keeps running to completion in the background.
    #[error("HF_ERR_400: Trigger for order item {item} timed out after {timeout_ms}ms")]
    TriggerTimedOut { item: OrderItemId, timeout_ms: u64 },

    /// The scheduler is already running.
    #[error("HF_ERR_401: Scheduler already running")]
    SchedulerAlreadyRunning,

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("HF_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Datastore failure outside of a ledger append.
    #[error("HF_ERR_901: Datastore error: {0}")]
    Datastore(String),

    /// Configuration error (invalid config file, out-of-range value, ...).
    #[error("HF_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

impl HoldfastError {
    /// Window-not-elapsed as a typed error.
    #[must_use]
    pub fn window_not_elapsed(item: OrderItemId, remaining: Duration) -> Self {
        Self::WindowNotElapsed {
            item,
            remaining_secs: remaining.num_seconds().max(0),
        }
    }

    /// Outcomes that defer or skip an item rather than fail it.
    ///
    /// Batch accounting counts these as skips, never as failures.
    #[must_use]
    pub fn is_deferral(&self) -> bool {
        matches!(
            self,
            Self::AlreadyTerminal { .. }
                | Self::ClaimConflict(_)
                | Self::ComplaintOpen(_)
                | Self::WindowNotElapsed { .. }
        )
    }

    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ClaimConflict(_)
                | Self::LedgerWriteFailed { .. }
                | Self::Datastore(_)
                | Self::TriggerTimedOut { .. }
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, HoldfastError>;
