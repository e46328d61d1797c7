//! # Coupon Status
//!
//! Lazy status evaluation and the availability decision for a
//! (customer, coupon) pair.
//!
//! ## Evaluation Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  evaluate_status(coupon, now)                                           │
//! │                                                                         │
//! │  enabled == false ──► stored terminal status (CANCELLED if none)       │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  now >= expires_at ──► EXPIRED                                         │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  GENERAL && count >= limit ──► USAGE_EXHAUSTED                         │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  count == 0 ? UNUSED : ACTIVE                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here touches storage. The store applies the write-back when
//! [`needs_write_back`] says the persisted row is stale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::{Coupon, CouponScope, CouponStatus};

/// Computes the current status of a coupon.
///
/// A disabled coupon keeps whichever terminal status it was disabled with.
/// Expiry and exhaustion both clear `enabled`, so without this a coupon that
/// ran out would read back as CANCELLED.
///
/// ## Example
/// ```rust
/// use chrono::{Duration, Utc};
/// use discount_core::{evaluate_status, Coupon, CouponScope, CouponStatus, DurationUnit};
///
/// let now = Utc::now();
/// let coupon = Coupon {
///     id: "c".into(),
///     code: "ABCD1234".into(),
///     scope: CouponScope::General,
///     owner_customer_id: None,
///     rate_bps: 2_000,
///     usage_limit: 1,
///     redemption_count: 0,
///     duration_amount: 1,
///     duration_unit: DurationUnit::Seconds,
///     issued_at: now,
///     status: CouponStatus::Unused,
///     enabled: true,
///     applicable_categories: None,
///     created_at: now,
///     updated_at: now,
/// };
///
/// assert_eq!(evaluate_status(&coupon, now), CouponStatus::Unused);
/// assert_eq!(evaluate_status(&coupon, now + Duration::seconds(2)), CouponStatus::Expired);
/// ```
pub fn evaluate_status(coupon: &Coupon, now: DateTime<Utc>) -> CouponStatus {
    if !coupon.enabled {
        return if coupon.status.is_terminal() {
            coupon.status
        } else {
            CouponStatus::Cancelled
        };
    }

    if now >= coupon.expires_at() {
        return CouponStatus::Expired;
    }

    if coupon.scope == CouponScope::General && coupon.redemption_count >= coupon.usage_limit {
        return CouponStatus::UsageExhausted;
    }

    if coupon.redemption_count == 0 {
        CouponStatus::Unused
    } else {
        CouponStatus::Active
    }
}

/// True when the computed status must be persisted.
///
/// Only the transitions into EXPIRED and USAGE_EXHAUSTED are written back on
/// read. UNUSED → ACTIVE is owned by the commit path.
pub fn needs_write_back(stored: CouponStatus, computed: CouponStatus) -> bool {
    matches!(computed, CouponStatus::Expired | CouponStatus::UsageExhausted) && stored != computed
}

// =============================================================================
// Availability
// =============================================================================

/// Result of checking whether a customer may redeem a coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    Available,
    Expired,
    Cancelled,
    UsageExceeded,
    NotOwned,
}

impl Availability {
    #[inline]
    pub const fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

/// Decides availability from an already-evaluated status.
///
/// ## Ceilings
/// ```text
/// GENERAL          status USAGE_EXHAUSTED (global redemption_count)
/// CUSTOMER_BOUND   committed claims of THIS customer >= usage_limit
/// ```
///
/// `committed_by_customer` is only consulted for CUSTOMER_BOUND coupons.
pub fn availability(
    coupon: &Coupon,
    customer_id: &str,
    status: CouponStatus,
    committed_by_customer: i64,
) -> Availability {
    match status {
        CouponStatus::Expired => return Availability::Expired,
        CouponStatus::Cancelled => return Availability::Cancelled,
        _ => {}
    }

    match coupon.scope {
        CouponScope::CustomerBound => {
            if !coupon.is_owned_by(customer_id) {
                return Availability::NotOwned;
            }
            if committed_by_customer >= coupon.usage_limit
                || status == CouponStatus::UsageExhausted
            {
                return Availability::UsageExceeded;
            }
        }
        CouponScope::General => {
            if status == CouponStatus::UsageExhausted {
                return Availability::UsageExceeded;
            }
        }
    }

    Availability::Available
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::DurationUnit;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    fn general(limit: i64, count: i64) -> Coupon {
        Coupon {
            id: "cp-1".to_string(),
            code: "GENERAL1".to_string(),
            scope: CouponScope::General,
            owner_customer_id: None,
            rate_bps: 2_000,
            usage_limit: limit,
            redemption_count: count,
            duration_amount: 1,
            duration_unit: DurationUnit::Days,
            issued_at: t0(),
            status: if count == 0 { CouponStatus::Unused } else { CouponStatus::Active },
            enabled: true,
            applicable_categories: None,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    fn bound_to(owner: &str, limit: i64) -> Coupon {
        Coupon {
            scope: CouponScope::CustomerBound,
            owner_customer_id: Some(owner.to_string()),
            ..general(limit, 0)
        }
    }

    #[test]
    fn test_fresh_coupon_is_unused() {
        assert_eq!(evaluate_status(&general(1, 0), t0()), CouponStatus::Unused);
    }

    #[test]
    fn test_redeemed_coupon_is_active() {
        assert_eq!(evaluate_status(&general(3, 1), t0()), CouponStatus::Active);
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let coupon = general(1, 0);
        let end = coupon.expires_at();
        assert_eq!(evaluate_status(&coupon, end - Duration::seconds(1)), CouponStatus::Unused);
        assert_eq!(evaluate_status(&coupon, end), CouponStatus::Expired);
    }

    #[test]
    fn test_general_exhaustion() {
        assert_eq!(evaluate_status(&general(2, 2), t0()), CouponStatus::UsageExhausted);
    }

    #[test]
    fn test_bound_coupon_ignores_global_count() {
        let coupon = Coupon {
            redemption_count: 5,
            ..bound_to("alice", 1)
        };
        assert_eq!(evaluate_status(&coupon, t0()), CouponStatus::Active);
    }

    #[test]
    fn test_expiry_wins_over_exhaustion() {
        let coupon = general(1, 1);
        let later = t0() + Duration::days(2);
        assert_eq!(evaluate_status(&coupon, later), CouponStatus::Expired);
    }

    #[test]
    fn test_disabled_keeps_terminal_status() {
        let mut coupon = general(1, 1);
        coupon.enabled = false;
        coupon.status = CouponStatus::UsageExhausted;
        assert_eq!(evaluate_status(&coupon, t0()), CouponStatus::UsageExhausted);

        coupon.status = CouponStatus::Active;
        assert_eq!(evaluate_status(&coupon, t0()), CouponStatus::Cancelled);
    }

    #[test]
    fn test_write_back_rules() {
        assert!(needs_write_back(CouponStatus::Active, CouponStatus::Expired));
        assert!(needs_write_back(CouponStatus::Unused, CouponStatus::UsageExhausted));
        assert!(!needs_write_back(CouponStatus::Expired, CouponStatus::Expired));
        assert!(!needs_write_back(CouponStatus::Unused, CouponStatus::Active));
        assert!(!needs_write_back(CouponStatus::Active, CouponStatus::Cancelled));
    }

    #[test]
    fn test_not_owned_regardless_of_usage() {
        let coupon = bound_to("alice", 1);
        let status = evaluate_status(&coupon, t0());
        for committed in [0, 1, 10] {
            assert_eq!(availability(&coupon, "bob", status, committed), Availability::NotOwned);
        }
    }

    #[test]
    fn test_bound_per_customer_ceiling() {
        let coupon = bound_to("alice", 2);
        let status = evaluate_status(&coupon, t0());
        assert_eq!(availability(&coupon, "alice", status, 1), Availability::Available);
        assert_eq!(availability(&coupon, "alice", status, 2), Availability::UsageExceeded);
    }

    #[test]
    fn test_general_global_ceiling() {
        let coupon = general(1, 1);
        let status = evaluate_status(&coupon, t0());
        assert_eq!(availability(&coupon, "anyone", status, 0), Availability::UsageExceeded);
    }

    #[test]
    fn test_expired_and_cancelled_come_first() {
        let coupon = bound_to("alice", 1);
        assert_eq!(
            availability(&coupon, "bob", CouponStatus::Expired, 0),
            Availability::Expired
        );
        assert_eq!(
            availability(&coupon, "bob", CouponStatus::Cancelled, 0),
            Availability::Cancelled
        );
    }
}
