//! End-to-end disbursement tests.
//!
//! Real stores, a manual clock, and a ledger wrapper that injects write
//! failures. They cover the scheduler's guarantees: exactly-once release,
//! window and complaint gating, reconciliation after a failed post, and
//! conservation of money across a randomized run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use holdfast_disbursement::*;
use holdfast_escrow::*;
use holdfast_ledger::{ConservationAuditor, InMemoryLedgerStore, LedgerStore, WalletAccessor};
use holdfast_types::*;
use rand::Rng;

// ---------------------------------------------------------------------------
// Flaky ledger
// ---------------------------------------------------------------------------

/// How an injected append failure behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// The write never happens.
    BeforeWrite,
    /// The write lands but the caller sees an error.
    AfterWrite,
}

struct FlakyLedgerStore {
    inner: InMemoryLedgerStore,
    failures_left: AtomicUsize,
    fault: Fault,
}

impl FlakyLedgerStore {
    fn new(fault: Fault) -> Self {
        Self {
            inner: InMemoryLedgerStore::new(),
            failures_left: AtomicUsize::new(0),
            fault,
        }
    }

    fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for FlakyLedgerStore {
    async fn wallet_for_owner(&self, owner: UserId, at: DateTime<Utc>) -> Result<Wallet> {
        self.inner.wallet_for_owner(owner, at).await
    }

    async fn wallet(&self, id: WalletId) -> Result<Wallet> {
        self.inner.wallet(id).await
    }

    async fn wallets(&self) -> Result<Vec<Wallet>> {
        self.inner.wallets().await
    }

    async fn append(&self, draft: EntryDraft, at: DateTime<Utc>) -> Result<Posting> {
        if !self.take_failure() {
            return self.inner.append(draft, at).await;
        }
        if self.fault == Fault::AfterWrite {
            self.inner.append(draft, at).await?;
        }
        Err(HoldfastError::Datastore("injected append failure".into()))
    }

    async fn find(&self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>> {
        self.inner.find(key).await
    }

    async fn entries_for_wallet(&self, wallet: WalletId) -> Result<Vec<LedgerEntry>> {
        self.inner.entries_for_wallet(wallet).await
    }

    async fn entries_for_scope(&self, scope: &RefScope) -> Result<Vec<LedgerEntry>> {
        self.inner.entries_for_scope(scope).await
    }

    async fn rebuild_balance(&self, wallet: WalletId) -> Result<Wallet> {
        self.inner.rebuild_balance(wallet).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    clock: Arc<ManualClock>,
    ledger: Arc<dyn LedgerStore>,
    orders: Arc<InMemoryOrderStore>,
    complaints: Arc<InMemoryComplaintBoard>,
    shops: Arc<InMemoryShopDirectory>,
    machine: EscrowMachine,
    scheduler: Arc<DisbursementScheduler>,
}

impl Harness {
    fn new() -> Self {
        Self::with_ledger(Arc::new(InMemoryLedgerStore::new()))
    }

    fn with_ledger(ledger: Arc<dyn LedgerStore>) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let orders = Arc::new(InMemoryOrderStore::new());
        let complaints = Arc::new(InMemoryComplaintBoard::new());
        let shops = Arc::new(InMemoryShopDirectory::new());
        let machine = EscrowMachine::new(
            orders.clone(),
            WalletAccessor::new(ledger.clone(), clock.clone()),
            complaints.clone(),
            shops.clone(),
            clock.clone(),
            Duration::hours(72),
        );
        let scheduler = Arc::new(DisbursementScheduler::new(
            machine.clone(),
            StdDuration::from_secs(15 * 60),
            8,
        ));
        Self {
            clock,
            ledger,
            orders,
            complaints,
            shops,
            machine,
            scheduler,
        }
    }

    /// A second scheduler replica over the same stores.
    fn replica(&self) -> DisbursementScheduler {
        DisbursementScheduler::new(self.machine.clone(), StdDuration::from_secs(15 * 60), 8)
    }

    fn seller(&self) -> (UserId, ShopId) {
        let owner = UserId::new();
        let shop = self.shops.register(owner, "Harbor Stall").unwrap();
        (owner, shop.id)
    }

    async fn hold(&self, shop: ShopId, amount: u64, age: Duration) -> OrderItem {
        let now = self.clock.now();
        let order = Order::dummy_paid(UserId::new(), Amount::new(amount), now);
        let item = OrderItem::dummy_holding(order.id, shop, Amount::new(amount), now - age);
        self.orders.insert(order, vec![item.clone()]).await.unwrap();
        item
    }

    async fn balance(&self, user: UserId) -> Amount {
        let wallet = self.ledger.wallet_for_owner(user, self.clock.now()).await.unwrap();
        wallet.balance
    }

    async fn settlement_entries(&self, item: OrderItemId) -> Vec<LedgerEntry> {
        self.ledger
            .entries_for_scope(&RefScope::OrderItem(item))
            .await
            .unwrap()
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn elapsed_hold_released_by_one_tick() {
    let h = Harness::new();
    let (seller, shop) = h.seller();
    let item = h.hold(shop, 100_000, Duration::hours(73)).await;

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.released, vec![item.id]);
    assert!(report.failed.is_empty());

    assert_eq!(h.balance(seller).await, Amount::new(100_000));
    let stored = h.orders.item(item.id).await.unwrap();
    assert_eq!(stored.hold_status, HoldStatus::Released);
    assert_eq!(h.settlement_entries(item.id).await.len(), 1);

    let status = h.scheduler.status();
    assert_eq!(status.ticks, 1);
    assert_eq!(status.last_tick_processed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_claims_move_money_once() {
    let h = Harness::new();
    let (seller, shop) = h.seller();
    let item = h.hold(shop, 100_000, Duration::hours(73)).await;

    let attempts = (0..2).map(|_| {
        let machine = h.machine.clone();
        let snapshot = item.clone();
        tokio::spawn(async move { machine.release_elapsed(&snapshot).await })
    });
    let results: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(HoldfastError::ClaimConflict(id)) if *id == item.id))
    );
    assert_eq!(h.settlement_entries(item.id).await.len(), 1);
    assert_eq!(h.balance(seller).await, Amount::new(100_000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replicas_ticking_together_release_each_item_once() {
    let h = Harness::new();
    let (seller, shop) = h.seller();
    let mut total = 0u64;
    for n in 1..=40u64 {
        h.hold(shop, n * 100, Duration::hours(80)).await;
        total += n * 100;
    }

    let replica = h.replica();
    let (a, b) = tokio::join!(h.scheduler.tick(), replica.tick());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.released.len() + b.released.len(), 40);
    assert!(a.failed.is_empty() && b.failed.is_empty());
    assert_eq!(h.balance(seller).await, Amount::new(total));
    assert!(h.orders.holding_items(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn refund_after_scheduler_claim_is_already_terminal() {
    let h = Harness::new();
    let (seller, shop) = h.seller();
    let item = h.hold(shop, 5_000, Duration::hours(73)).await;
    h.scheduler.tick().await.unwrap();

    let err = h
        .machine
        .apply_verdict(item.id, TicketId::new(), ComplaintVerdict::ForceRefund)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HoldfastError::AlreadyTerminal { status: HoldStatus::Released, .. }
    ));

    let entries = h.settlement_entries(item.id).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EntryKind::Release);
    assert_eq!(h.balance(seller).await, Amount::new(5_000));
}

#[tokio::test]
async fn window_is_enforced_to_the_second() {
    let h = Harness::new();
    let (seller, shop) = h.seller();
    let item = h
        .hold(shop, 700, Duration::hours(72) - Duration::seconds(1))
        .await;

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.candidates, 0);
    assert_eq!(h.balance(seller).await, Amount::ZERO);

    h.clock.advance(Duration::seconds(1));
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.released, vec![item.id]);
    assert_eq!(h.balance(seller).await, Amount::new(700));
}

#[tokio::test]
async fn complaint_defers_until_cleared() {
    let h = Harness::new();
    let (seller, shop) = h.seller();
    let item = h.hold(shop, 2_500, Duration::hours(100)).await;
    h.complaints.open(item.id, TicketId::new()).unwrap();

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.deferred, 1);
    assert!(report.released.is_empty());
    assert!(report.failed.is_empty());
    assert!(h.orders.item(item.id).await.unwrap().is_holding());

    h.complaints.close(item.id).unwrap();
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.released, vec![item.id]);
    assert_eq!(h.balance(seller).await, Amount::new(2_500));
}

#[tokio::test]
async fn failed_post_is_completed_by_next_tick() {
    let flaky = Arc::new(FlakyLedgerStore::new(Fault::BeforeWrite));
    let h = Harness::with_ledger(flaky.clone());
    let (seller, shop) = h.seller();
    let item = h.hold(shop, 9_000, Duration::hours(73)).await;

    flaky.fail_next(1);
    let first = h.scheduler.tick().await.unwrap();
    assert_eq!(first.failed.len(), 1);
    assert!(matches!(first.failed[0].1, HoldfastError::LedgerWriteFailed { .. }));

    // Claimed, not rolled back, no money moved yet.
    let stored = h.orders.item(item.id).await.unwrap();
    assert_eq!(stored.hold_status, HoldStatus::Released);
    assert!(stored.awaiting_ledger());
    assert_eq!(h.balance(seller).await, Amount::ZERO);

    let second = h.scheduler.tick().await.unwrap();
    assert_eq!(second.reconciled, 1);
    assert!(second.failed.is_empty());
    assert_eq!(h.balance(seller).await, Amount::new(9_000));
    assert!(!h.orders.item(item.id).await.unwrap().awaiting_ledger());
}

#[tokio::test]
async fn refund_verdict_on_unposted_claim_never_adds_a_refund() {
    let flaky = Arc::new(FlakyLedgerStore::new(Fault::BeforeWrite));
    let h = Harness::with_ledger(flaky.clone());
    let (seller, shop) = h.seller();
    let item = h.hold(shop, 6_000, Duration::hours(73)).await;

    flaky.fail_next(1);
    h.scheduler.tick().await.unwrap();
    assert!(h.orders.item(item.id).await.unwrap().awaiting_ledger());

    let err = h
        .machine
        .apply_verdict(item.id, TicketId::new(), ComplaintVerdict::ForceRefund)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HoldfastError::AlreadyTerminal { status: HoldStatus::Released, .. }
    ));

    h.scheduler.tick().await.unwrap();
    let entries = h.settlement_entries(item.id).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EntryKind::Release);
    assert_eq!(h.balance(seller).await, Amount::new(6_000));
}

#[tokio::test]
async fn lost_ack_is_replayed_not_paid_twice() {
    let flaky = Arc::new(FlakyLedgerStore::new(Fault::AfterWrite));
    let h = Harness::with_ledger(flaky.clone());
    let (seller, shop) = h.seller();
    let item = h.hold(shop, 4_000, Duration::hours(73)).await;

    flaky.fail_next(1);
    let first = h.scheduler.tick().await.unwrap();
    assert_eq!(first.failed.len(), 1);
    // The credit landed even though the caller saw an error.
    assert_eq!(h.balance(seller).await, Amount::new(4_000));

    let done = h
        .machine
        .complete_claimed(h.orders.item(item.id).await.unwrap())
        .await
        .unwrap();
    assert!(done.replayed);
    assert!(done.recorded);
    assert_eq!(h.balance(seller).await, Amount::new(4_000));
    assert_eq!(h.settlement_entries(item.id).await.len(), 1);
}

#[tokio::test]
async fn manual_trigger_shares_the_claim() {
    let h = Harness::new();
    let (seller, shop) = h.seller();
    let item = h.hold(shop, 1_200, Duration::hours(90)).await;
    let trigger = ManualTrigger::new(h.machine.clone(), StdDuration::from_secs(5));

    let outcome = trigger.release(item.id, TriggerMode::Elapsed).await.unwrap();
    assert!(matches!(outcome, TriggerOutcome::Settled(_)));

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.candidates, 0);
    assert_eq!(h.balance(seller).await, Amount::new(1_200));
}

#[tokio::test]
async fn randomized_run_conserves_money() {
    let h = Harness::new();
    let mut rng = rand::thread_rng();
    let sellers: Vec<(UserId, ShopId)> = (0..4).map(|_| h.seller()).collect();
    let mut items = Vec::new();

    for _ in 0..60 {
        let (_, shop) = sellers[rng.gen_range(0..sellers.len())];
        let age = Duration::hours(rng.gen_range(0..120));
        let item = h.hold(shop, rng.gen_range(1..50_000), age).await;
        if rng.gen_bool(0.2) {
            h.complaints.open(item.id, TicketId::new()).unwrap();
        }
        items.push(item);
    }

    for round in 0..6 {
        h.scheduler.tick().await.unwrap();
        for item in &items {
            if rng.gen_bool(0.1) {
                let verdict = if rng.gen_bool(0.5) {
                    ComplaintVerdict::ForceRefund
                } else {
                    ComplaintVerdict::ForceRelease
                };
                // Terminal items answer AlreadyTerminal; that is expected here.
                let _ = h.machine.apply_verdict(item.id, TicketId::new(), verdict).await;
                h.complaints.close(item.id).unwrap();
            }
        }
        h.clock.advance(Duration::hours(12 + round));
    }

    ConservationAuditor::new(h.ledger.clone()).audit().await.unwrap();

    for item in &items {
        let stored = h.orders.item(item.id).await.unwrap();
        let entries = h.settlement_entries(item.id).await;
        if stored.is_holding() {
            assert!(entries.is_empty(), "{} holding with ledger entries", item.id);
        } else {
            assert_eq!(entries.len(), 1, "{} settled {} times", item.id, entries.len());
            assert_eq!(entries[0].amount, item.hold_amount);
            assert_eq!(stored.settlement_entry, Some(entries[0].id));
        }
    }
}
