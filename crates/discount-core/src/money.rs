//! # Money Module
//!
//! Provides the `Money` and `DiscountRate` types for exact monetary math.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE TAMPERING CHECK NEEDS EXACT EQUALITY                               │
//! │                                                                         │
//! │  The client submits a payable amount; the server recomputes it and     │
//! │  compares with ==. With floats:                                        │
//! │    10000 × (1 - 0.1 - 0.2) = 6999.999999999999  ❌ spurious mismatch   │
//! │                                                                         │
//! │  OUR SOLUTION: minor units + basis points                              │
//! │    10000 × 3000 bps / 10000 = 3000 → payable 7000  ✓ exact             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use discount_core::money::{DiscountRate, Money};
//!
//! let subtotal = Money::from_cents(10_000);
//! let discount = subtotal.portion(DiscountRate::from_bps(2_000));
//! assert_eq!((subtotal - discount).cents(), 8_000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::BPS_SCALE;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// ## Where Money is Used
/// ```text
/// Order.subtotal ──┬──► discount = subtotal.portion(Σ rates)
///                  │
/// OrderLine × rate ┴──► shipping
///
/// payable = shipping + subtotal − discount ──► compared to client amount
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units (cents).
    ///
    /// ## Example
    /// ```rust
    /// use discount_core::money::Money;
    ///
    /// let amount = Money::from_cents(8_500);
    /// assert_eq!(amount.cents(), 8_500);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies money by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Returns the share of this amount described by `rate`.
    ///
    /// Rounds half up on the minor unit: `(amount × bps + 5000) / 10000`.
    /// i128 intermediate so large subtotals cannot overflow.
    ///
    /// ## Example
    /// ```rust
    /// use discount_core::money::{DiscountRate, Money};
    ///
    /// let subtotal = Money::from_cents(999);
    /// // 999 × 15% = 149.85 → 150
    /// assert_eq!(subtotal.portion(DiscountRate::from_bps(1_500)).cents(), 150);
    /// ```
    pub fn portion(&self, rate: DiscountRate) -> Money {
        let half = (BPS_SCALE / 2) as i128;
        let share = (self.0 as i128 * rate.bps() as i128 + half) / BPS_SCALE as i128;
        Money::from_cents(share as i64)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Discount Rate
// =============================================================================

/// Fraction of an order subtotal, in basis points.
///
/// ## Why Basis Points?
/// Coupons are issued as decimals in `[0.1, 0.8]`. Storing `0.2` as 2000 bps
/// keeps every sum and product exact; the decimal form exists only at the
/// admin/API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DiscountRate(u32);

impl DiscountRate {
    /// Creates a rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        DiscountRate(bps)
    }

    /// Creates a rate from a decimal fraction (0.2 → 2000 bps).
    ///
    /// Negative or NaN input yields zero; range checks live in
    /// [`crate::validation::validate_fraction`].
    pub fn from_fraction(fraction: f64) -> Self {
        let bps = (fraction * BPS_SCALE as f64).round();
        if bps.is_nan() || bps <= 0.0 {
            DiscountRate(0)
        } else if bps >= u32::MAX as f64 {
            DiscountRate(u32::MAX)
        } else {
            DiscountRate(bps as u32)
        }
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a decimal fraction (for display only).
    #[inline]
    pub fn fraction(&self) -> f64 {
        self.0 as f64 / BPS_SCALE as f64
    }

    /// Zero rate.
    #[inline]
    pub const fn zero() -> Self {
        DiscountRate(0)
    }

    /// Adds two rates, capping at 100%.
    pub fn saturating_add(self, other: DiscountRate) -> DiscountRate {
        DiscountRate(self.0.saturating_add(other.0).min(BPS_SCALE))
    }
}

impl Default for DiscountRate {
    fn default() -> Self {
        DiscountRate::zero()
    }
}

impl fmt::Display for DiscountRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
