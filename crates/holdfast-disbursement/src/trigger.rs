//! Manual single-item trigger: release, moderator override, or verdict.
//!
//! Goes through the same transition functions as the scheduler. The
//! transition runs on its own task and the caller waits on it with a
//! deadline. If the deadline passes, the task keeps running to completion,
//! so the item always ends fully transitioned or fully untouched. It is
//! never left half-way because a caller gave up.

use std::time::Duration as StdDuration;

use holdfast_escrow::{ComplaintVerdict, EscrowMachine, Settlement};
use holdfast_types::{EscrowConfig, HoldfastError, OrderItem, OrderItemId, Result, TicketId, UserId};
use tracing::{info, warn};

/// How the item should be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Same rule as the scheduler: window elapsed, no open complaint.
    Elapsed,
    /// Moderator override of the window. Still refused while a complaint is open.
    Moderator { actor: UserId },
    /// Apply a complaint verdict: refund the buyer or release to the seller.
    Verdict {
        ticket: TicketId,
        verdict: ComplaintVerdict,
    },
}

/// Result of a manual trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// This call moved the item to a terminal status.
    Settled(Settlement),
    /// The item was already terminal; nothing moved.
    AlreadySettled(OrderItem),
}

/// Runs single-item releases with a deadline.
#[derive(Debug, Clone)]
pub struct ManualTrigger {
    machine: EscrowMachine,
    timeout: StdDuration,
}

impl ManualTrigger {
    #[must_use]
    pub fn new(machine: EscrowMachine, timeout: StdDuration) -> Self {
        Self { machine, timeout }
    }

    /// Trigger with the configured `manual_trigger_timeout_ms` deadline.
    #[must_use]
    pub fn from_config(machine: EscrowMachine, config: &EscrowConfig) -> Self {
        Self::new(machine, config.manual_trigger_timeout())
    }

    #[must_use]
    pub fn timeout(&self) -> StdDuration {
        self.timeout
    }

    /// Settle one item. Calling it again on a settled item is a no-op.
    ///
    /// # Errors
    /// The escrow taxonomy (`ComplaintOpen`, `WindowNotElapsed`,
    /// `ClaimConflict`, `LedgerWriteFailed`, ...) or
    /// [`HoldfastError::TriggerTimedOut`] when the deadline passed first.
    pub async fn release(&self, item_id: OrderItemId, mode: TriggerMode) -> Result<TriggerOutcome> {
        let machine = self.machine.clone();
        let task = tokio::spawn(async move { run(&machine, item_id, mode).await });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join)) => Err(HoldfastError::Internal(format!(
                "trigger task for {item_id} aborted: {join}"
            ))),
            Err(_) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(item_id = %item_id, timeout_ms, "manual trigger timed out; transition continues in background");
                Err(HoldfastError::TriggerTimedOut {
                    item: item_id,
                    timeout_ms,
                })
            }
        }
    }
}

async fn run(machine: &EscrowMachine, item_id: OrderItemId, mode: TriggerMode) -> Result<TriggerOutcome> {
    let item = machine.orders().item(item_id).await?;
    if item.awaiting_ledger() {
        info!(item_id = %item_id, "manual trigger completing a claimed item");
        return machine.complete_claimed(item).await.map(TriggerOutcome::Settled);
    }
    if item.hold_status.is_terminal() {
        info!(item_id = %item_id, status = %item.hold_status, "manual trigger on settled item; no-op");
        return Ok(TriggerOutcome::AlreadySettled(item));
    }

    let result = match mode {
        TriggerMode::Elapsed => machine.release_elapsed(&item).await,
        TriggerMode::Moderator { actor } => machine.release_by_moderator(item_id, actor).await,
        TriggerMode::Verdict { ticket, verdict } => {
            machine.apply_verdict(item_id, ticket, verdict).await
        }
    };
    match result {
        Ok(settlement) => Ok(TriggerOutcome::Settled(settlement)),
        Err(HoldfastError::AlreadyTerminal { .. }) => {
            Ok(TriggerOutcome::AlreadySettled(machine.orders().item(item_id).await?))
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use holdfast_escrow::{
        InMemoryComplaintBoard, InMemoryOrderStore, InMemoryShopDirectory, OrderStore, Shop,
        ShopDirectory,
    };
    use holdfast_ledger::{InMemoryLedgerStore, WalletAccessor};
    use holdfast_types::{Amount, Clock, EntryKind, HoldStatus, LedgerRef, ManualClock, Order, ShopId};

    /// Shop directory that answers after a fixed delay.
    struct SlowShops {
        inner: InMemoryShopDirectory,
        delay: StdDuration,
    }

    #[async_trait]
    impl ShopDirectory for SlowShops {
        async fn shop(&self, id: ShopId) -> Result<Shop> {
            tokio::time::sleep(self.delay).await;
            self.inner.shop(id).await
        }
    }

    struct Fixture {
        trigger: ManualTrigger,
        orders: Arc<InMemoryOrderStore>,
        item: OrderItem,
    }

    async fn fixture(delay: StdDuration, timeout: StdDuration, hours_ago: i64) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let orders = Arc::new(InMemoryOrderStore::new());
        let inner = InMemoryShopDirectory::new();
        let shop = inner.register(UserId::new(), "Slow Boat").unwrap().id;
        let now: DateTime<Utc> = clock.now();
        let order = Order::dummy_paid(UserId::new(), Amount::new(700), now);
        let item = OrderItem::dummy_holding(order.id, shop, Amount::new(700), now - Duration::hours(hours_ago));
        orders.insert(order, vec![item.clone()]).await.unwrap();

        let machine = EscrowMachine::new(
            orders.clone(),
            WalletAccessor::new(Arc::new(InMemoryLedgerStore::new()), clock.clone()),
            Arc::new(InMemoryComplaintBoard::new()),
            Arc::new(SlowShops { inner, delay }),
            clock,
            Duration::hours(72),
        );
        Fixture {
            trigger: ManualTrigger::new(machine, timeout),
            orders,
            item,
        }
    }

    #[tokio::test]
    async fn second_trigger_is_noop() {
        let fx = fixture(StdDuration::ZERO, StdDuration::from_secs(5), 80).await;
        let first = fx.trigger.release(fx.item.id, TriggerMode::Elapsed).await.unwrap();
        assert!(matches!(first, TriggerOutcome::Settled(_)));
        let second = fx.trigger.release(fx.item.id, TriggerMode::Elapsed).await.unwrap();
        match second {
            TriggerOutcome::AlreadySettled(item) => assert_eq!(item.hold_status, HoldStatus::Released),
            other => panic!("expected no-op, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn early_elapsed_trigger_surfaces_window() {
        let fx = fixture(StdDuration::ZERO, StdDuration::from_secs(5), 1).await;
        let err = fx.trigger.release(fx.item.id, TriggerMode::Elapsed).await.unwrap_err();
        assert!(matches!(err, HoldfastError::WindowNotElapsed { .. }));

        let moderated = fx
            .trigger
            .release(fx.item.id, TriggerMode::Moderator { actor: UserId::new() })
            .await
            .unwrap();
        assert!(matches!(moderated, TriggerOutcome::Settled(_)));
    }

    #[tokio::test]
    async fn refund_verdict_goes_through_trigger() {
        let fx = fixture(StdDuration::ZERO, StdDuration::from_secs(5), 1).await;
        let mode = TriggerMode::Verdict {
            ticket: TicketId::new(),
            verdict: ComplaintVerdict::ForceRefund,
        };
        match fx.trigger.release(fx.item.id, mode).await.unwrap() {
            TriggerOutcome::Settled(done) => {
                assert_eq!(done.item.hold_status, HoldStatus::Refunded);
                assert_eq!(done.entry.kind, EntryKind::Refund);
            }
            other => panic!("expected a refund, got {other:?}"),
        }
        let again = fx.trigger.release(fx.item.id, mode).await.unwrap();
        assert!(matches!(again, TriggerOutcome::AlreadySettled(_)));
    }

    #[tokio::test]
    async fn verdict_timeout_still_completes() {
        let fx = fixture(StdDuration::from_millis(200), StdDuration::from_millis(20), 1).await;
        let ticket = TicketId::new();
        let mode = TriggerMode::Verdict {
            ticket,
            verdict: ComplaintVerdict::ForceRelease,
        };
        let err = fx.trigger.release(fx.item.id, mode).await.unwrap_err();
        assert!(matches!(err, HoldfastError::TriggerTimedOut { timeout_ms: 20, .. }));

        tokio::time::sleep(StdDuration::from_millis(400)).await;
        let item = fx.orders.item(fx.item.id).await.unwrap();
        assert_eq!(item.hold_status, HoldStatus::Released);
        assert!(item.settlement_entry.is_some());
        assert_eq!(
            item.settled_by.map(|t| t.ledger_ref(item.id)),
            Some(LedgerRef::Ticket { ticket, item: item.id })
        );
    }

    #[tokio::test]
    async fn from_config_uses_configured_deadline() {
        let fx = fixture(StdDuration::ZERO, StdDuration::from_secs(5), 80).await;
        let config = EscrowConfig {
            manual_trigger_timeout_ms: 1_500,
            ..EscrowConfig::default()
        };
        let trigger = ManualTrigger::from_config(fx.trigger.machine.clone(), &config);
        assert_eq!(trigger.timeout(), StdDuration::from_millis(1_500));
    }

    #[tokio::test]
    async fn timeout_leaves_item_fully_transitioned() {
        let fx = fixture(StdDuration::from_millis(200), StdDuration::from_millis(20), 80).await;
        let err = fx.trigger.release(fx.item.id, TriggerMode::Elapsed).await.unwrap_err();
        assert!(matches!(err, HoldfastError::TriggerTimedOut { timeout_ms: 20, .. }));

        // The background task finishes the transition it started.
        tokio::time::sleep(StdDuration::from_millis(400)).await;
        let item = fx.orders.item(fx.item.id).await.unwrap();
        assert_eq!(item.hold_status, HoldStatus::Released);
        assert!(item.settlement_entry.is_some());
    }
}
