//! Escrow policy configuration.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{HoldfastError, Result, constants};

/// Policy knobs for escrow, disbursement and the admin views.
///
/// These are global policy constants, never per-item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    /// Hours an item stays on hold before it may be released.
    pub escrow_period_hours: u32,
    /// Minutes between disbursement sweeps.
    pub tick_interval_minutes: u32,
    /// Upper bound on concurrently processed items per sweep.
    pub max_in_flight: usize,
    /// Platform fee withheld from the seller's share (0.05 = 5%).
    pub platform_fee_rate: Decimal,
    /// Deadline for an operator-triggered transition.
    pub manual_trigger_timeout_ms: u64,
    /// Look-back window for released/refunded stats.
    pub stats_window_days: u32,
    pub default_page_limit: usize,
    pub max_page_limit: usize,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            escrow_period_hours: constants::DEFAULT_ESCROW_PERIOD_HOURS,
            tick_interval_minutes: constants::DEFAULT_TICK_INTERVAL_MINUTES,
            max_in_flight: constants::DEFAULT_MAX_IN_FLIGHT,
            platform_fee_rate: Decimal::new(constants::DEFAULT_PLATFORM_FEE_BPS, 4),
            manual_trigger_timeout_ms: constants::DEFAULT_MANUAL_TRIGGER_TIMEOUT_MS,
            stats_window_days: constants::DEFAULT_STATS_WINDOW_DAYS,
            default_page_limit: constants::DEFAULT_PAGE_LIMIT,
            max_page_limit: constants::MAX_PAGE_LIMIT,
        }
    }
}

impl EscrowConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(raw)
            .map_err(|e| HoldfastError::Configuration(format!("invalid escrow config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make the engine unsafe or idle.
    pub fn validate(&self) -> Result<()> {
        if !(1..=constants::MAX_ESCROW_PERIOD_HOURS).contains(&self.escrow_period_hours) {
            return Err(HoldfastError::Configuration(format!(
                "escrow_period_hours must be in 1..={}, got {}",
                constants::MAX_ESCROW_PERIOD_HOURS,
                self.escrow_period_hours
            )));
        }
        if self.stats_window_days > constants::MAX_STATS_WINDOW_DAYS {
            return Err(HoldfastError::Configuration(format!(
                "stats_window_days must be <= {}, got {}",
                constants::MAX_STATS_WINDOW_DAYS,
                self.stats_window_days
            )));
        }
        if self.tick_interval_minutes == 0 {
            return Err(HoldfastError::Configuration(
                "tick_interval_minutes must be > 0".into(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(HoldfastError::Configuration(
                "max_in_flight must be > 0".into(),
            ));
        }
        if self.platform_fee_rate.is_sign_negative() || self.platform_fee_rate >= Decimal::ONE {
            return Err(HoldfastError::Configuration(format!(
                "platform_fee_rate must be in [0, 1), got {}",
                self.platform_fee_rate
            )));
        }
        if self.default_page_limit == 0 || self.default_page_limit > self.max_page_limit {
            return Err(HoldfastError::Configuration(
                "default_page_limit must be in 1..=max_page_limit".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn escrow_period(&self) -> Duration {
        Duration::hours(i64::from(self.escrow_period_hours))
    }

    #[must_use]
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.tick_interval_minutes) * 60)
    }

    #[must_use]
    pub fn manual_trigger_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.manual_trigger_timeout_ms)
    }

    #[must_use]
    pub fn stats_window(&self) -> Duration {
        Duration::days(i64::from(self.stats_window_days))
    }
}
