//! # holdfast-disbursement
//!
//! **Disbursement Plane**: the periodic process that releases elapsed holds,
//! the manual single-item trigger, and the read-side views admin tooling
//! uses to watch both.
//!
//! Correctness never depends on a process-local flag. Every transition goes
//! through the per-item claim in [`holdfast_escrow::EscrowMachine`], so any
//! number of schedulers and triggers may run at once.

pub mod query;
pub mod scheduler;
pub mod trigger;

pub use query::{DisbursementQuery, DisbursementStats, HoldView};
pub use scheduler::{DisbursementScheduler, SchedulerHandle, SchedulerStatus, TickReport};
pub use trigger::{ManualTrigger, TriggerMode, TriggerOutcome};
