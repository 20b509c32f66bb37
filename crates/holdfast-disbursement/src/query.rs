//! Read-side views for admin tooling: holding, pending, stats.
//!
//! Pure projections over the order store and the complaint gate. The
//! `can_disburse` flag comes from [`holdfast_escrow::evaluate`], the same
//! function the scheduler uses.

use chrono::{DateTime, Duration, Utc};
use holdfast_escrow::{EscrowMachine, evaluate};
use holdfast_types::{
    Amount, Clock, EscrowConfig, HoldStatus, HoldfastError, OrderId, OrderItem, OrderItemId, Page,
    PageRequest, Result, ShopId,
};
use serde::Serialize;

/// One held item as admin tooling sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoldView {
    pub item_id: OrderItemId,
    pub order_id: OrderId,
    pub shop_id: ShopId,
    pub hold_amount: Amount,
    pub hold_status: HoldStatus,
    pub hold_at: Option<DateTime<Utc>>,
    pub eligible_at: Option<DateTime<Utc>>,
    pub time_remaining_secs: Option<i64>,
    pub has_open_complaint: bool,
    pub can_disburse: bool,
    /// Why `can_disburse` is false.
    pub reason: Option<String>,
}

/// Aggregate figures over holds and recent settlements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DisbursementStats {
    pub holding_count: usize,
    pub holding_amount: Amount,
    /// Items released within the stats window.
    pub released_count: usize,
    pub released_amount: Amount,
    /// Items refunded within the stats window.
    pub refunded_count: usize,
    pub refunded_amount: Amount,
    /// Holding items the scheduler would release right now.
    pub ready_now: usize,
    pub window_days: i64,
}

/// Admin query API.
#[derive(Debug, Clone)]
pub struct DisbursementQuery {
    machine: EscrowMachine,
    stats_window: Duration,
    default_page_limit: usize,
    max_page_limit: usize,
}

impl DisbursementQuery {
    #[must_use]
    pub fn new(machine: EscrowMachine, config: &EscrowConfig) -> Self {
        Self {
            machine,
            stats_window: config.stats_window(),
            default_page_limit: config.default_page_limit,
            max_page_limit: config.max_page_limit,
        }
    }

    /// Page request from optional caller input, with configured defaults.
    #[must_use]
    pub fn page_request(&self, limit: Option<usize>, skip: Option<usize>) -> PageRequest {
        PageRequest::new(
            limit.unwrap_or(self.default_page_limit),
            skip.unwrap_or_default(),
        )
        .clamped(self.max_page_limit)
    }

    /// Every `Holding` item, oldest hold first, optionally for one shop.
    pub async fn holding(&self, shop: Option<ShopId>, page: PageRequest) -> Result<Page<HoldView>> {
        let now = self.machine.clock().now();
        let items = self.machine.orders().holding_items(shop).await?;
        let views = self.views(items, now).await?;
        Ok(Page::from_vec(views, page.clamped(self.max_page_limit)))
    }

    /// `Holding` items past their window with no open complaint.
    pub async fn pending(&self, page: PageRequest) -> Result<Page<HoldView>> {
        let now = self.machine.clock().now();
        let cutoff = self.machine.release_cutoff(now)?;
        let items = self.machine.orders().holds_started_before(cutoff).await?;
        let views = self
            .views(items, now)
            .await?
            .into_iter()
            .filter(|v| v.can_disburse)
            .collect();
        Ok(Page::from_vec(views, page.clamped(self.max_page_limit)))
    }

    /// View of a single item in any hold status.
    pub async fn item(&self, id: OrderItemId) -> Result<HoldView> {
        let item = self.machine.orders().item(id).await?;
        self.view(item, self.machine.clock().now()).await
    }

    pub async fn stats(&self) -> Result<DisbursementStats> {
        let now = self.machine.clock().now();
        let orders = self.machine.orders();

        let holding = self.views(orders.holding_items(None).await?, now).await?;
        let since = now.checked_sub_signed(self.stats_window).ok_or_else(|| {
            HoldfastError::Configuration(format!(
                "stats window of {}d reaches before the earliest representable time",
                self.stats_window.num_days()
            ))
        })?;
        let settled = orders.settled_since(since).await?;
        let (released, refunded): (Vec<&OrderItem>, Vec<&OrderItem>) = settled
            .iter()
            .partition(|i| i.hold_status == HoldStatus::Released);

        Ok(DisbursementStats {
            holding_count: holding.len(),
            holding_amount: holding.iter().map(|v| v.hold_amount).sum(),
            released_count: released.len(),
            released_amount: released.iter().map(|i| i.hold_amount).sum(),
            refunded_count: refunded.len(),
            refunded_amount: refunded.iter().map(|i| i.hold_amount).sum(),
            ready_now: holding.iter().filter(|v| v.can_disburse).count(),
            window_days: self.stats_window.num_days(),
        })
    }

    async fn views(&self, items: Vec<OrderItem>, now: DateTime<Utc>) -> Result<Vec<HoldView>> {
        let mut views = Vec::with_capacity(items.len());
        for item in items {
            views.push(self.view(item, now).await?);
        }
        Ok(views)
    }

    async fn view(&self, item: OrderItem, now: DateTime<Utc>) -> Result<HoldView> {
        let has_open_complaint = self.machine.complaints().has_open_complaint(item.id).await?;
        let e = evaluate(&item, now, self.machine.escrow_period(), has_open_complaint);
        Ok(HoldView {
            item_id: item.id,
            order_id: item.order_id,
            shop_id: item.shop_id,
            hold_amount: item.hold_amount,
            hold_status: item.hold_status,
            hold_at: item.hold_at,
            eligible_at: e.eligible_at,
            time_remaining_secs: e.time_remaining_secs,
            has_open_complaint,
            can_disburse: e.can_disburse,
            reason: e.reason.map(|r| r.to_string()),
        })
    }
}
