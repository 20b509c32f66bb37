//! Money in the smallest currency unit.
//!
//! Holdfast handles a single currency. Amounts are non-negative integers;
//! direction lives on the ledger entry, never in the sign of the amount.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// An amount of money in minor units (e.g. cents, đồng).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(pub u64);

impl Amount {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(minor_units: u64) -> Self {
        Self(minor_units)
    }

    #[must_use]
    pub const fn minor_units(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    #[must_use]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    #[must_use]
    pub fn checked_mul(self, factor: u64) -> Option<Self> {
        self.0.checked_mul(factor).map(Self)
    }

    #[must_use]
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Apply a fractional rate and round toward zero.
    ///
    /// Returns `None` if the rate is negative or the result does not fit.
    #[must_use]
    pub fn apply_rate_floor(self, rate: Decimal) -> Option<Self> {
        if rate.is_sign_negative() {
            return None;
        }
        let scaled = Decimal::from(self.0).checked_mul(rate)?;
        scaled.floor().to_u64().map(Self)
    }

    /// Value as a signed 128-bit integer, for ledger projections.
    #[must_use]
    pub fn as_i128(self) -> i128 {
        i128::from(self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::iter::Sum for Amount {
    /// Saturates instead of wrapping; callers that need overflow errors use
    /// [`Amount::checked_add`].
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.fold(0u64, |acc, a| acc.saturating_add(a.0)))
    }
}
