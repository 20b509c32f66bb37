//! holdfast-node: escrow settlement node
//!
//! Wires the ledger, the order store and the escrow machine, then runs the
//! disbursement scheduler until Ctrl+C.
//!
//! ## Architecture
//! ```text
//! [Clock] ──▶ [DisbursementScheduler] ──tick──▶ [EscrowMachine]
//!                                                 │        │
//!                                                 ▼        ▼
//!                                          [OrderStore] [LedgerStore]
//! ```
//!
//! ## Configuration
//! - HOLDFAST_CONFIG: path to a JSON `EscrowConfig` (defaults when unset)
//! - HOLDFAST_LOG: tracing filter directive (default: "info")
//! - HOLDFAST_LOG_FORMAT: "json" for JSON lines, anything else for text

use std::sync::Arc;

use holdfast_disbursement::{DisbursementQuery, DisbursementScheduler, ManualTrigger};
use holdfast_escrow::{EscrowMachine, InMemoryComplaintBoard, InMemoryOrderStore, InMemoryShopDirectory};
use holdfast_ledger::{InMemoryLedgerStore, WalletAccessor};
use holdfast_types::{EscrowConfig, HoldfastError, Result, SystemClock};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_tracing(std::env::var("HOLDFAST_LOG_FORMAT").is_ok_and(|f| f == "json"));

    let config = load_config(std::env::var("HOLDFAST_CONFIG").ok().as_deref()).inspect_err(|e| {
        error!(error = %e, "failed to load configuration");
    })?;
    info!(
        escrow_period_hours = config.escrow_period_hours,
        tick_interval_minutes = config.tick_interval_minutes,
        max_in_flight = config.max_in_flight,
        fee_rate = %config.platform_fee_rate,
        "starting holdfast-node"
    );

    let clock = Arc::new(SystemClock);
    let ledger = Arc::new(InMemoryLedgerStore::new());
    let machine = EscrowMachine::new(
        Arc::new(InMemoryOrderStore::new()),
        WalletAccessor::new(ledger, clock.clone()),
        Arc::new(InMemoryComplaintBoard::new()),
        Arc::new(InMemoryShopDirectory::new()),
        clock,
        config.escrow_period(),
    );
    let query = DisbursementQuery::new(machine.clone(), &config);
    let trigger = ManualTrigger::from_config(machine.clone(), &config);
    let scheduler = Arc::new(DisbursementScheduler::new(
        machine,
        config.tick_interval(),
        config.max_in_flight,
    ));

    let handle = scheduler.clone().spawn()?;
    info!(
        trigger_timeout_ms = u64::try_from(trigger.timeout().as_millis()).unwrap_or(u64::MAX),
        "disbursement scheduler running, press Ctrl+C to exit"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    handle.shutdown().await?;

    let stats = query.stats().await?;
    let status = scheduler.status();
    info!(
        ticks = status.ticks,
        holding = stats.holding_count,
        released = stats.released_count,
        refunded = stats.refunded_count,
        "holdfast-node stopped"
    );
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_env("HOLDFAST_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Read the escrow policy from `path`, or the defaults when no path is set.
fn load_config(path: Option<&str>) -> Result<EscrowConfig> {
    let Some(path) = path else {
        let config = EscrowConfig::default();
        config.validate()?;
        return Ok(config);
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| HoldfastError::Configuration(format!("cannot read {path}: {e}")))?;
    EscrowConfig::from_json_str(&raw)
}
