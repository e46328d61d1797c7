//! # Clock Policy
//!
//! Converts a coupon's validity window into an expiry instant.
//!
//! ```text
//! issued_at ──► + amount × unit.seconds() ──► expires_at
//! ```
//!
//! Months and years are fixed-length (30 and 365 days). Coupon windows are
//! promotional durations, not calendar dates.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::CoreError;

/// Unit of a coupon's validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl DurationUnit {
    /// Every unit, smallest first.
    pub const ALL: [DurationUnit; 7] = [
        DurationUnit::Seconds,
        DurationUnit::Minutes,
        DurationUnit::Hours,
        DurationUnit::Days,
        DurationUnit::Weeks,
        DurationUnit::Months,
        DurationUnit::Years,
    ];

    /// Seconds in one unit.
    pub const fn seconds(&self) -> i64 {
        match self {
            DurationUnit::Seconds => 1,
            DurationUnit::Minutes => 60,
            DurationUnit::Hours => 3_600,
            DurationUnit::Days => 86_400,
            DurationUnit::Weeks => 604_800,
            DurationUnit::Months => 2_592_000,
            DurationUnit::Years => 31_536_000,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            DurationUnit::Seconds => "seconds",
            DurationUnit::Minutes => "minutes",
            DurationUnit::Hours => "hours",
            DurationUnit::Days => "days",
            DurationUnit::Weeks => "weeks",
            DurationUnit::Months => "months",
            DurationUnit::Years => "years",
        }
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DurationUnit {
    type Err = CoreError;

    /// Accepts plural or singular names in any case (`"DAYS"`, `"day"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let plural = if lowered.ends_with('s') {
            lowered.clone()
        } else {
            format!("{lowered}s")
        };

        DurationUnit::ALL
            .into_iter()
            .find(|unit| unit.as_str() == plural)
            .ok_or(CoreError::InvalidUnit(s.to_string()))
    }
}

/// Returns the instant at which a window of `amount` × `unit` starting at
/// `issued_at` ends.
///
/// Windows too large to represent saturate to the maximum instant, which is
/// equivalent to "never expires".
///
/// ## Example
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use discount_core::clock::{expires_at, DurationUnit};
///
/// let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
/// let end = expires_at(t0, 2, DurationUnit::Days);
/// assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap());
/// ```
pub fn expires_at(issued_at: DateTime<Utc>, amount: i64, unit: DurationUnit) -> DateTime<Utc> {
    amount
        .checked_mul(unit.seconds())
        .and_then(TimeDelta::try_seconds)
        .and_then(|window| issued_at.checked_add_signed(window))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Parses a unit name and computes the expiry in one step.
pub fn expires_at_named(
    issued_at: DateTime<Utc>,
    amount: i64,
    unit: &str,
) -> Result<DateTime<Utc>, CoreError> {
    let unit: DurationUnit = unit.parse()?;
    Ok(expires_at(issued_at, amount, unit))
}
