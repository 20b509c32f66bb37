//! Escrow state machine.
//!
//! ```text
//! | From    | Event                     | Guard             | To       | Ledger effect            |
//! |---------|---------------------------|-------------------|----------|--------------------------|
//! | Holding | escrow window elapsed     | no open complaint | Released | seller +hold, Release    |
//! | Holding | moderator release         | no open complaint | Released | seller +hold, System ref |
//! | Holding | verdict ForceRelease      | -                 | Released | seller +hold, Ticket ref |
//! | Holding | verdict ForceRefund       | -                 | Refunded | buyer  +hold, Refund     |
//! | terminal| any                       | -                 | no-op    | AlreadyTerminal          |
//! ```
//!
//! Every transition has two steps:
//! 1. **Claim**: a conditional write in the order store. Exactly one caller
//!    wins per item; the claim is never rolled back.
//! 2. **Post**: the ledger credit, keyed by `(item, kind, direction)`. A
//!    failed post leaves the item claimed with no recorded entry; a later
//!    [`EscrowMachine::reconcile`] pass completes it.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use holdfast_ledger::WalletAccessor;
use holdfast_types::{
    Clock, Direction, EntryKind, HoldStatus, HoldfastError, IdempotencyKey, ItemStatus,
    LedgerEntry, LedgerRef, OrderId, OrderItem, OrderItemId, OrderStatus, Posting, Result,
    SettlementTrigger, TicketId, UserId,
};
use tracing::{debug, info, warn};

use crate::collaborators::{ComplaintGate, ComplaintVerdict, ShopDirectory};
use crate::eligibility::{Eligibility, evaluate};
use crate::order_store::OrderStore;

/// A completed terminal transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// The item after the transition.
    pub item: OrderItem,
    /// The ledger row that moved the money.
    pub entry: LedgerEntry,
    /// The row already existed; this call moved no money.
    pub replayed: bool,
    /// The entry id is recorded on the item. When false, money moved but a
    /// reconciliation pass still has to record it.
    pub recorded: bool,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub completed: Vec<OrderItemId>,
    pub failed: Vec<(OrderItemId, HoldfastError)>,
}

/// Drives order items out of `Holding`.
#[derive(Clone)]
pub struct EscrowMachine {
    orders: Arc<dyn OrderStore>,
    wallets: WalletAccessor,
    complaints: Arc<dyn ComplaintGate>,
    shops: Arc<dyn ShopDirectory>,
    clock: Arc<dyn Clock>,
    escrow_period: Duration,
}

impl fmt::Debug for EscrowMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EscrowMachine")
            .field("escrow_period", &self.escrow_period)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl EscrowMachine {
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        wallets: WalletAccessor,
        complaints: Arc<dyn ComplaintGate>,
        shops: Arc<dyn ShopDirectory>,
        clock: Arc<dyn Clock>,
        escrow_period: Duration,
    ) -> Self {
        Self {
            orders,
            wallets,
            complaints,
            shops,
            clock,
            escrow_period,
        }
    }

    #[must_use]
    pub fn orders(&self) -> &Arc<dyn OrderStore> {
        &self.orders
    }

    #[must_use]
    pub fn wallets(&self) -> &WalletAccessor {
        &self.wallets
    }

    #[must_use]
    pub fn complaints(&self) -> &Arc<dyn ComplaintGate> {
        &self.complaints
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    #[must_use]
    pub fn escrow_period(&self) -> Duration {
        self.escrow_period
    }

    /// Latest `hold_at` that is past the window at `now`.
    ///
    /// # Errors
    /// [`HoldfastError::Configuration`] if the period reaches past the
    /// earliest representable time.
    pub fn release_cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        now.checked_sub_signed(self.escrow_period).ok_or_else(|| {
            HoldfastError::Configuration(format!(
                "escrow period of {}h reaches before the earliest representable time",
                self.escrow_period.num_hours()
            ))
        })
    }

    /// Evaluate the release rule for `item` now, asking the complaint gate
    /// only when the answer can matter.
    pub async fn eligibility(&self, item: &OrderItem) -> Result<Eligibility> {
        let complaint = if item.is_holding() {
            self.complaints.has_open_complaint(item.id).await?
        } else {
            false
        };
        Ok(evaluate(item, self.clock.now(), self.escrow_period, complaint))
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Scheduler path: release an item whose window has elapsed.
    ///
    /// The claim uses the version of `snapshot`, the row as the caller read
    /// it. If anything wrote the item since, this returns
    /// [`HoldfastError::ClaimConflict`] and moves no money.
    pub async fn release_elapsed(&self, snapshot: &OrderItem) -> Result<Settlement> {
        self.eligibility(snapshot).await?.check(snapshot)?;
        let claimed = self
            .orders
            .claim_hold(
                snapshot.id,
                snapshot.version,
                HoldStatus::Released,
                SettlementTrigger::Scheduler,
                self.clock.now(),
            )
            .await?;
        info!(item_id = %snapshot.id, amount = %snapshot.hold_amount, "escrow window elapsed; item claimed for release");
        self.settle(claimed).await
    }

    /// Moderator path: release now, window or not. Refused while a
    /// complaint is open.
    pub async fn release_by_moderator(&self, item_id: OrderItemId, actor: UserId) -> Result<Settlement> {
        let item = self.load_holding(item_id).await?;
        if self.complaints.has_open_complaint(item_id).await? {
            return Err(HoldfastError::ComplaintOpen(item_id));
        }
        let claimed = self
            .claim(&item, HoldStatus::Released, SettlementTrigger::Moderator { actor })
            .await?;
        info!(item_id = %item_id, actor = %actor, amount = %item.hold_amount, "moderator release claimed");
        self.settle(claimed).await
    }

    /// Apply a complaint verdict. Verdicts bypass the window and the
    /// complaint guard; they are how a complaint ends.
    pub async fn apply_verdict(
        &self,
        item_id: OrderItemId,
        ticket: TicketId,
        verdict: ComplaintVerdict,
    ) -> Result<Settlement> {
        let item = self.load_holding(item_id).await?;
        let to = match verdict {
            ComplaintVerdict::ForceRefund => HoldStatus::Refunded,
            ComplaintVerdict::ForceRelease => HoldStatus::Released,
        };
        let claimed = self
            .claim(&item, to, SettlementTrigger::Ticket { ticket })
            .await?;
        info!(item_id = %item_id, ticket = %ticket, to = %to, amount = %item.hold_amount, "complaint verdict claimed");
        self.settle(claimed).await
    }

    /// Complete every claimed item whose ledger entry was never recorded.
    ///
    /// Posting is idempotent, so an item whose credit landed before a crash
    /// replays the existing row instead of paying twice.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for item in self.orders.awaiting_ledger().await? {
            let id = item.id;
            match self.complete_claimed(item).await {
                Ok(done) if done.recorded => {
                    info!(item_id = %id, entry_id = %done.entry.id, replayed = done.replayed, "reconciled claimed item");
                    report.completed.push(id);
                }
                Ok(done) => {
                    report.failed.push((
                        id,
                        HoldfastError::Datastore(format!(
                            "entry {} posted but still unrecorded",
                            done.entry.id
                        )),
                    ));
                }
                Err(err) => {
                    warn!(item_id = %id, error = %err, "reconciliation failed; will retry");
                    report.failed.push((id, err));
                }
            }
        }
        Ok(report)
    }

    /// Post and record the ledger entry of one claimed item.
    ///
    /// # Errors
    /// [`HoldfastError::Internal`] if `item` is not awaiting its ledger entry.
    pub async fn complete_claimed(&self, item: OrderItem) -> Result<Settlement> {
        if !item.awaiting_ledger() {
            return Err(HoldfastError::Internal(format!(
                "{} is {} with entry {:?}; nothing to complete",
                item.id, item.hold_status, item.settlement_entry
            )));
        }
        self.settle(item).await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Fresh read of an item that must still be `Holding`.
    async fn load_holding(&self, item_id: OrderItemId) -> Result<OrderItem> {
        let item = self.orders.item(item_id).await?;
        if item.hold_status.is_terminal() {
            debug!(item_id = %item_id, status = %item.hold_status, "transition on terminal item ignored");
            return Err(HoldfastError::AlreadyTerminal {
                item: item_id,
                status: item.hold_status,
            });
        }
        if !item.is_holding() {
            return Err(HoldfastError::ItemNotHolding(item_id));
        }
        Ok(item)
    }

    /// Claim from a fresh read. A lost race against a terminal write
    /// reports `AlreadyTerminal`; any other lost race is a `ClaimConflict`.
    async fn claim(&self, item: &OrderItem, to: HoldStatus, trigger: SettlementTrigger) -> Result<OrderItem> {
        match self
            .orders
            .claim_hold(item.id, item.version, to, trigger, self.clock.now())
            .await
        {
            Err(HoldfastError::ClaimConflict(id)) => {
                let current = self.orders.item(id).await?;
                if current.hold_status.is_terminal() {
                    Err(HoldfastError::AlreadyTerminal {
                        item: id,
                        status: current.hold_status,
                    })
                } else {
                    Err(HoldfastError::ClaimConflict(id))
                }
            }
            other => other,
        }
    }

    /// Post the ledger credit for a claimed item and record it.
    async fn settle(&self, claimed: OrderItem) -> Result<Settlement> {
        let trigger = claimed.settled_by.ok_or_else(|| {
            HoldfastError::Internal(format!("{} is terminal without a trigger", claimed.id))
        })?;
        let (kind, beneficiary) = match claimed.hold_status {
            HoldStatus::Released => {
                let shop = self.shops.shop(claimed.shop_id).await?;
                (EntryKind::Release, shop.owner_id)
            }
            HoldStatus::Refunded => {
                let order = self.orders.order(claimed.order_id).await?;
                (EntryKind::Refund, order.customer_user_id)
            }
            status => {
                return Err(HoldfastError::Internal(format!(
                    "cannot settle {} in {status}",
                    claimed.id
                )));
            }
        };

        let reference = trigger.ledger_ref(claimed.id);
        let opposite = match kind {
            EntryKind::Release => EntryKind::Refund,
            _ => EntryKind::Release,
        };
        let opposite_key = IdempotencyKey::new(&reference, opposite, Direction::In);
        if let Some(existing) = self.wallets.store().find(&opposite_key).await? {
            return Err(HoldfastError::ConservationViolation {
                reason: format!(
                    "{} already settled by {} entry {}",
                    claimed.id, existing.kind, existing.id
                ),
            });
        }

        let posting = self
            .post(&claimed, beneficiary, kind, reference)
            .await
            .inspect_err(|err| {
                warn!(item_id = %claimed.id, error = %err, "ledger post failed; item stays claimed for reconciliation");
            })?;

        let now = self.clock.now();
        let (item, recorded) = match self
            .orders
            .record_settlement(claimed.id, posting.entry.id, now)
            .await
        {
            Ok(item) => (item, true),
            Err(err) => {
                warn!(item_id = %claimed.id, entry_id = %posting.entry.id, error = %err, "money moved but entry not recorded; reconciliation will record it");
                (claimed, false)
            }
        };

        if recorded {
            if let Err(err) = self.roll_up_order(item.order_id, now).await {
                warn!(order_id = %item.order_id, error = %err, "order status roll-up failed");
            }
        }

        Ok(Settlement {
            item,
            entry: posting.entry,
            replayed: posting.replayed,
            recorded,
        })
    }

    async fn post(
        &self,
        claimed: &OrderItem,
        beneficiary: UserId,
        kind: EntryKind,
        reference: LedgerRef,
    ) -> Result<Posting> {
        let wallet = self.wallets.wallet_of(beneficiary).await.map_err(ledger_failure)?;
        let memo = format!("{kind} of {} for {}", claimed.hold_amount, claimed.id);
        self.wallets
            .credit(wallet.id, claimed.hold_amount, kind, reference, memo)
            .await
            .map_err(ledger_failure)
    }

    /// Move the order to its terminal status once every item is terminal,
    /// and out of `Disputed` once no held item is still disputed.
    async fn roll_up_order(&self, order_id: OrderId, at: DateTime<Utc>) -> Result<()> {
        let order = self.orders.order(order_id).await?;
        if order.status.is_final() {
            return Ok(());
        }
        let items = self.orders.items_of_order(order_id).await?;

        let target = if items.iter().all(|i| i.hold_status.is_terminal()) {
            if items.iter().any(|i| i.hold_status == HoldStatus::Released) {
                OrderStatus::Completed
            } else {
                OrderStatus::Refunded
            }
        } else if order.status == OrderStatus::Disputed
            && !items
                .iter()
                .any(|i| i.is_holding() && i.item_status == ItemStatus::Disputed)
        {
            OrderStatus::Paid
        } else {
            return Ok(());
        };

        if order.status == target || !order.status.can_transition_to(target) {
            return Ok(());
        }
        self.orders
            .set_order_status(order_id, order.status, target, at)
            .await?;
        info!(order_id = %order_id, from = %order.status, to = %target, "order status rolled up");
        Ok(())
    }
}

/// A datastore failure during a post means no row was written.
fn ledger_failure(err: HoldfastError) -> HoldfastError {
    match err {
        HoldfastError::Datastore(reason) => HoldfastError::LedgerWriteFailed { reason },
        other => other,
    }
}
