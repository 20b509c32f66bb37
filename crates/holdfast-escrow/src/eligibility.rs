//! The one rule that decides whether an item may be disbursed now.
//!
//! ```text
//! can_disburse = Holding AND now - hold_at >= period AND no open complaint
//! ```
//!
//! The scheduler, the manual trigger and the admin views all call
//! [`evaluate`], so a view never says "ready" for an item the scheduler
//! would skip.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use holdfast_types::{HoldStatus, HoldfastError, OrderItem, Result};
use serde::{Deserialize, Serialize};

/// Why an item cannot be disbursed right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    /// Order not paid; nothing is held.
    NotFunded,
    /// Already `Released` or `Refunded`.
    Terminal(HoldStatus),
    /// Escrow window still running.
    WindowNotElapsed { remaining_secs: i64 },
    /// A complaint is open on the item.
    ComplaintOpen,
}

impl BlockReason {
    /// The matching typed error for a transition attempt.
    #[must_use]
    pub fn into_error(self, item: &OrderItem) -> HoldfastError {
        match self {
            Self::NotFunded => HoldfastError::ItemNotHolding(item.id),
            Self::Terminal(status) => HoldfastError::AlreadyTerminal {
                item: item.id,
                status,
            },
            Self::WindowNotElapsed { remaining_secs } => HoldfastError::WindowNotElapsed {
                item: item.id,
                remaining_secs,
            },
            Self::ComplaintOpen => HoldfastError::ComplaintOpen(item.id),
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFunded => write!(f, "order not paid"),
            Self::Terminal(status) => write!(f, "already {status}"),
            Self::WindowNotElapsed { remaining_secs } => {
                write!(f, "escrow window has {remaining_secs}s remaining")
            }
            Self::ComplaintOpen => write!(f, "complaint open"),
        }
    }
}

/// Result of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub can_disburse: bool,
    /// Set exactly when `can_disburse` is false.
    pub reason: Option<BlockReason>,
    pub eligible_at: Option<DateTime<Utc>>,
    pub time_remaining_secs: Option<i64>,
}

impl Eligibility {
    /// `Ok` when disbursable, else the typed error for the block reason.
    pub fn check(&self, item: &OrderItem) -> Result<()> {
        match self.reason {
            None => Ok(()),
            Some(reason) => Err(reason.into_error(item)),
        }
    }
}

/// Evaluate the release rule for `item` at `now`.
///
/// Checks run in a fixed order: terminal, funded, window, complaint. The
/// first failing check is the reported reason.
#[must_use]
pub fn evaluate(
    item: &OrderItem,
    now: DateTime<Utc>,
    period: Duration,
    has_open_complaint: bool,
) -> Eligibility {
    let eligible_at = item.eligible_at(period);
    let time_remaining_secs = item
        .time_remaining(now, period)
        .map(|d| d.num_seconds());

    let reason = if item.hold_status.is_terminal() {
        Some(BlockReason::Terminal(item.hold_status))
    } else if !item.is_holding() {
        Some(BlockReason::NotFunded)
    } else if !item.window_elapsed(now, period) {
        Some(BlockReason::WindowNotElapsed {
            remaining_secs: time_remaining_secs.unwrap_or_default(),
        })
    } else if has_open_complaint {
        Some(BlockReason::ComplaintOpen)
    } else {
        None
    };

    Eligibility {
        can_disburse: reason.is_none(),
        reason,
        eligible_at,
        time_remaining_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_types::{Amount, OrderId, ShopId};

    fn held_for(hours: i64, now: DateTime<Utc>) -> OrderItem {
        OrderItem::dummy_holding(
            OrderId::new(),
            ShopId::new(),
            Amount::new(100_000),
            now - Duration::hours(hours),
        )
    }

    #[test]
    fn elapsed_without_complaint_is_disbursable() {
        let now = Utc::now();
        let e = evaluate(&held_for(73, now), now, Duration::hours(72), false);
        assert!(e.can_disburse);
        assert_eq!(e.reason, None);
        assert_eq!(e.time_remaining_secs, Some(0));
    }

    #[test]
    fn window_reports_remaining() {
        let now = Utc::now();
        let item = held_for(70, now);
        let e = evaluate(&item, now, Duration::hours(72), false);
        assert!(!e.can_disburse);
        assert_eq!(
            e.reason,
            Some(BlockReason::WindowNotElapsed { remaining_secs: 7_200 })
        );
        assert!(matches!(
            e.check(&item),
            Err(HoldfastError::WindowNotElapsed { remaining_secs: 7_200, .. })
        ));
    }

    #[test]
    fn complaint_blocks_only_after_window() {
        let now = Utc::now();
        let early = evaluate(&held_for(1, now), now, Duration::hours(72), true);
        assert!(matches!(early.reason, Some(BlockReason::WindowNotElapsed { .. })));

        let late = evaluate(&held_for(100, now), now, Duration::hours(72), true);
        assert_eq!(late.reason, Some(BlockReason::ComplaintOpen));
    }

    #[test]
    fn terminal_wins_over_everything() {
        let now = Utc::now();
        let mut item = held_for(100, now);
        item.hold_status = HoldStatus::Refunded;
        let e = evaluate(&item, now, Duration::hours(72), true);
        assert_eq!(e.reason, Some(BlockReason::Terminal(HoldStatus::Refunded)));
        assert!(matches!(
            e.check(&item),
            Err(HoldfastError::AlreadyTerminal { status: HoldStatus::Refunded, .. })
        ));
    }

    #[test]
    fn unfunded_reports_not_funded() {
        let now = Utc::now();
        let mut item = held_for(0, now);
        item.hold_status = HoldStatus::Unfunded;
        item.hold_at = None;
        let e = evaluate(&item, now, Duration::hours(72), false);
        assert_eq!(e.reason, Some(BlockReason::NotFunded));
        assert_eq!(e.eligible_at, None);
    }
}
