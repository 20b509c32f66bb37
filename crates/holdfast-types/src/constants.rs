//! Policy defaults for the Holdfast escrow engine.

/// Hours an item stays on hold before the scheduler may release it.
pub const DEFAULT_ESCROW_PERIOD_HOURS: u32 = 72;

/// Longest escrow period a config may set (one year).
pub const MAX_ESCROW_PERIOD_HOURS: u32 = 24 * 366;

/// Minutes between two disbursement sweeps.
pub const DEFAULT_TICK_INTERVAL_MINUTES: u32 = 15;

/// Maximum number of items a single sweep processes concurrently.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Platform fee rate in basis points (500 = 5%).
pub const DEFAULT_PLATFORM_FEE_BPS: i64 = 500;

/// Timeout for an operator-triggered single-item transition.
pub const DEFAULT_MANUAL_TRIGGER_TIMEOUT_MS: u64 = 10_000;

/// Look-back window for the released/refunded figures in stats.
pub const DEFAULT_STATS_WINDOW_DAYS: u32 = 30;

/// Longest stats look-back a config may set.
pub const MAX_STATS_WINDOW_DAYS: u32 = 3_660;

/// Page size used when a query does not specify one.
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Largest page size a query may request.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Prefix of generated order codes (`HF-YYYYMMDD-XXXXXXXX`).
pub const ORDER_CODE_PREFIX: &str = "HF";

/// Domain separator for deterministic ledger entry IDs.
pub const LEDGER_ENTRY_ID_DOMAIN: &[u8] = b"holdfast:ledger_entry:v1:";
