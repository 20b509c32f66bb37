//! Periodic disbursement of elapsed holds.
//!
//! ## Tick
//!
//! ```text
//! reconcile ──▶ query Holding AND hold_at <= now - period
//!                     │
//!                     ▼
//!        bounded pool (max_in_flight) ── release_elapsed(item) per candidate
//!                     │
//!                     ▼
//!        aggregate: released / conflicts / deferred / failed
//! ```
//!
//! Replicas may tick at the same time. Each item is claimed by exactly one
//! of them; the losers count a conflict and move on. No process-local
//! "running" flag guards correctness.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use holdfast_escrow::{EscrowMachine, Settlement};
use holdfast_types::{Clock, HoldfastError, OrderItem, OrderItemId, Result};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub candidates: usize,
    /// Items moved to `Released` by this tick.
    pub released: Vec<OrderItemId>,
    /// Claims lost to another writer.
    pub conflicts: usize,
    /// Skipped for an open complaint, or no longer eligible.
    pub deferred: usize,
    /// Everything else. Never aborts the batch.
    pub failed: Vec<(OrderItemId, HoldfastError)>,
    /// Claimed items completed by the reconciliation pass.
    pub reconciled: usize,
}

impl TickReport {
    #[must_use]
    pub fn processed(&self) -> usize {
        self.released.len() + self.conflicts + self.deferred + self.failed.len()
    }

    fn record(&mut self, item: OrderItemId, outcome: Result<Settlement>) {
        match outcome {
            Ok(_) => self.released.push(item),
            Err(HoldfastError::ClaimConflict(_)) => {
                debug!(item_id = %item, "claim lost to another writer; skipping");
                self.conflicts += 1;
            }
            Err(err) if err.is_deferral() => {
                debug!(item_id = %item, reason = %err, "item deferred");
                self.deferred += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    warn!(item_id = %item, error = %err, "disbursement failed for item; retrying next tick");
                } else {
                    error!(item_id = %item, error = %err, "disbursement failed for item");
                }
                self.failed.push((item, err));
            }
        }
    }
}

/// Status probe for admin tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    /// The periodic loop is spawned and not shut down. An idle loop
    /// between ticks still counts as running.
    pub running: bool,
    /// Sweeps executing right now, from the loop or direct `tick` calls.
    pub active_sweeps: usize,
    /// Ticks started so far.
    pub ticks: u64,
    pub last_tick_processed: usize,
    pub last_tick_failed: usize,
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// Drives elapsed holds through the escrow machine on a fixed interval.
#[derive(Debug)]
pub struct DisbursementScheduler {
    machine: EscrowMachine,
    tick_interval: StdDuration,
    max_in_flight: usize,
    status: Mutex<SchedulerStatus>,
}

impl DisbursementScheduler {
    #[must_use]
    pub fn new(machine: EscrowMachine, tick_interval: StdDuration, max_in_flight: usize) -> Self {
        Self {
            machine,
            tick_interval,
            max_in_flight: max_in_flight.max(1),
            status: Mutex::new(SchedulerStatus::default()),
        }
    }

    #[must_use]
    pub fn machine(&self) -> &EscrowMachine {
        &self.machine
    }

    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        self.lock_status().clone()
    }

    fn lock_status(&self) -> MutexGuard<'_, SchedulerStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one sweep.
    ///
    /// Per-item failures are aggregated into the report. Only a failure of
    /// the candidate query itself fails the tick.
    pub async fn tick(&self) -> Result<TickReport> {
        let tick = {
            let mut status = self.lock_status();
            status.ticks += 1;
            status.active_sweeps += 1;
            status.ticks
        };
        let span = info_span!("disbursement_tick", tick);
        let outcome = self.sweep(tick).instrument(span).await;

        let mut status = self.lock_status();
        status.active_sweeps = status.active_sweeps.saturating_sub(1);
        if let Ok(report) = &outcome {
            status.last_tick_processed = report.processed();
            status.last_tick_failed = report.failed.len();
            status.last_tick_at = Some(self.machine.clock().now());
        }
        outcome
    }

    async fn sweep(&self, tick: u64) -> Result<TickReport> {
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        match self.machine.reconcile().await {
            Ok(done) => {
                report.reconciled = done.completed.len();
                for (item, err) in done.failed {
                    report.failed.push((item, err));
                }
            }
            Err(err) => warn!(error = %err, "reconciliation pass failed; continuing with sweep"),
        }

        let cutoff = self.machine.release_cutoff(self.machine.clock().now())?;
        let candidates = self.machine.orders().holds_started_before(cutoff).await?;
        report.candidates = candidates.len();

        let outcomes: Vec<(OrderItemId, Result<Settlement>)> = futures::stream::iter(candidates)
            .map(|item| self.spawn_release(item))
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;
        for (item, outcome) in outcomes {
            report.record(item, outcome);
        }

        info!(
            candidates = report.candidates,
            released = report.released.len(),
            conflicts = report.conflicts,
            deferred = report.deferred,
            failed = report.failed.len(),
            reconciled = report.reconciled,
            "disbursement tick finished"
        );
        Ok(report)
    }

    /// One candidate on its own task, so a panic in one item is contained.
    async fn spawn_release(&self, item: OrderItem) -> (OrderItemId, Result<Settlement>) {
        let id = item.id;
        let machine = self.machine.clone();
        let handle = tokio::spawn(
            async move { machine.release_elapsed(&item).await }.in_current_span(),
        );
        let outcome = handle
            .await
            .unwrap_or_else(|e| Err(HoldfastError::Internal(format!("release task for {id} aborted: {e}"))));
        (id, outcome)
    }

    /// Start the periodic loop. The first tick runs immediately.
    ///
    /// # Errors
    /// [`HoldfastError::SchedulerAlreadyRunning`] if this scheduler already
    /// has a live loop.
    pub fn spawn(self: Arc<Self>) -> Result<SchedulerHandle> {
        {
            let mut status = self.lock_status();
            if status.running {
                return Err(HoldfastError::SchedulerAlreadyRunning);
            }
            status.running = true;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let scheduler = self;
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = scheduler.tick_interval.as_secs(), "disbursement scheduler started");
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(err) = scheduler.tick().await {
                            error!(error = %err, "disbursement tick failed");
                        }
                    }
                }
            }
            scheduler.lock_status().running = false;
            info!("disbursement scheduler stopped");
        });

        Ok(SchedulerHandle {
            shutdown: shutdown_tx,
            join,
        })
    }
}

/// Owner of a running scheduler loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop after the current tick and wait for the loop to exit.
    pub async fn shutdown(self) -> Result<()> {
        // The loop may already be gone; the join below still reports it.
        let _ = self.shutdown.send(());
        self.join
            .await
            .map_err(|e| HoldfastError::Internal(format!("scheduler loop aborted: {e}")))
    }
}
