//! # Domain Types
//!
//! Core domain types of the discount engine.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────┐   ┌─────────────────┐      │
//! │  │     Coupon      │◄──│ RedemptionClaim  │──►│  Order (ext.)   │      │
//! │  │  ─────────────  │   │  ──────────────  │   │  ─────────────  │      │
//! │  │  code, scope    │   │  customer_id     │   │  subtotal       │      │
//! │  │  rate_bps       │   │  order_id        │   │  lines          │      │
//! │  │  usage_limit    │   │  coupon_id       │   │  status         │      │
//! │  │  redemption_cnt │   │  status          │   └─────────────────┘      │
//! │  │  status/enabled │   └──────────────────┘            ▲               │
//! │  └─────────────────┘                                   │               │
//! │                          ┌──────────────────┐          │               │
//! │                          │  PaymentAttempt  │──────────┘               │
//! │                          │  claimed amounts │                          │
//! │                          │  committed ids   │                          │
//! │                          └──────────────────┘                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::clock::{self, DurationUnit};
use crate::money::{DiscountRate, Money};

// =============================================================================
// Coupon Scope
// =============================================================================

/// Who may redeem a coupon and how its ceiling is counted.
///
/// ```text
/// GENERAL         one shared code, usage_limit counts ALL redemptions
/// CUSTOMER_BOUND  owned by one customer, usage_limit counts THAT owner's
///                 committed claims
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CouponScope {
    General,
    CustomerBound,
}

// =============================================================================
// Coupon Status
// =============================================================================

/// Stored coupon status.
///
/// The stored value may lag behind reality until the next read; see
/// [`crate::status::evaluate_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CouponStatus {
    /// Issued, never redeemed.
    Unused,
    /// Redeemed at least once and still redeemable.
    Active,
    /// GENERAL: global ceiling reached. CUSTOMER_BOUND: owner's ceiling reached.
    UsageExhausted,
    /// Validity window elapsed.
    Expired,
    /// Withdrawn by an administrator.
    Cancelled,
}

impl CouponStatus {
    /// UNUSED and ACTIVE are both "available" states.
    #[inline]
    pub const fn is_available(&self) -> bool {
        matches!(self, CouponStatus::Unused | CouponStatus::Active)
    }

    /// States a disabled coupon keeps instead of collapsing to CANCELLED.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            CouponStatus::UsageExhausted | CouponStatus::Expired | CouponStatus::Cancelled
        )
    }
}

impl Default for CouponStatus {
    fn default() -> Self {
        CouponStatus::Unused
    }
}

// =============================================================================
// Coupon
// =============================================================================

/// An issued discount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Coupon {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Human-entered redemption code (uppercase alphanumeric).
    pub code: String,

    pub scope: CouponScope,

    /// Owning customer. Set iff scope is CUSTOMER_BOUND.
    pub owner_customer_id: Option<String>,

    /// Discount in basis points of the order subtotal (1000-8000).
    pub rate_bps: u32,

    /// Redemption ceiling (>= 1).
    pub usage_limit: i64,

    /// Committed redemptions across all customers. Never decreases.
    pub redemption_count: i64,

    pub duration_amount: i64,
    pub duration_unit: DurationUnit,

    #[ts(as = "String")]
    pub issued_at: DateTime<Utc>,

    /// Last persisted status. Re-evaluated lazily on read.
    pub status: CouponStatus,

    /// False once cancelled, expired or exhausted.
    pub enabled: bool,

    /// Order line categories this coupon may be applied to (None = any).
    pub applicable_categories: Option<Vec<String>>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    /// Returns the discount rate.
    #[inline]
    pub fn rate(&self) -> DiscountRate {
        DiscountRate::from_bps(self.rate_bps)
    }

    /// End of the validity window.
    pub fn expires_at(&self) -> DateTime<Utc> {
        clock::expires_at(self.issued_at, self.duration_amount, self.duration_unit)
    }

    #[inline]
    pub fn is_general(&self) -> bool {
        self.scope == CouponScope::General
    }

    /// True when `customer_id` may redeem this coupon at all.
    pub fn is_owned_by(&self, customer_id: &str) -> bool {
        match self.scope {
            CouponScope::General => true,
            CouponScope::CustomerBound => self.owner_customer_id.as_deref() == Some(customer_id),
        }
    }
}

/// Administrator request to issue a coupon.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewCoupon {
    pub scope: CouponScope,
    pub owner_customer_id: Option<String>,
    /// Decimal fraction of the subtotal, `0.1..=0.8`.
    pub fraction: f64,
    pub usage_limit: i64,
    pub duration_amount: i64,
    pub duration_unit: DurationUnit,
    #[serde(default)]
    pub applicable_categories: Option<Vec<String>>,
}

impl NewCoupon {
    /// A GENERAL coupon with no category restriction.
    pub fn general(fraction: f64, usage_limit: i64, duration_amount: i64, unit: DurationUnit) -> Self {
        NewCoupon {
            scope: CouponScope::General,
            owner_customer_id: None,
            fraction,
            usage_limit,
            duration_amount,
            duration_unit: unit,
            applicable_categories: None,
        }
    }

    /// A CUSTOMER_BOUND coupon owned by `owner`.
    pub fn customer_bound(
        owner: impl Into<String>,
        fraction: f64,
        usage_limit: i64,
        duration_amount: i64,
        unit: DurationUnit,
    ) -> Self {
        NewCoupon {
            scope: CouponScope::CustomerBound,
            owner_customer_id: Some(owner.into()),
            fraction,
            usage_limit,
            duration_amount,
            duration_unit: unit,
            applicable_categories: None,
        }
    }

    /// Restricts the coupon to orders whose lines all fall in `categories`.
    pub fn restricted_to<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applicable_categories = Some(categories.into_iter().map(Into::into).collect());
        self
    }

    #[inline]
    pub fn rate(&self) -> DiscountRate {
        DiscountRate::from_fraction(self.fraction)
    }
}

// =============================================================================
// Redemption Claim
// =============================================================================

/// Status of a customer's claim of a coupon against one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    /// Applied to the order, waiting for payment.
    Pending,
    /// Counted against the coupon alongside a successful payment.
    Committed,
    /// Coupon expired before payment.
    Expired,
    /// Coupon was cancelled.
    Voided,
}

/// A customer's pending or committed application of a coupon to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RedemptionClaim {
    pub id: String,
    pub customer_id: String,
    pub order_id: String,
    pub coupon_id: String,
    pub status: ClaimStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl RedemptionClaim {
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.status == ClaimStatus::Pending
    }
}

/// Why a claim no longer contributes to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvalidReason {
    Expired,
    Cancelled,
}

/// A claim that was found invalid while listing an order's claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvalidClaim {
    pub claim_id: String,
    pub coupon_id: String,
    pub reason: InvalidReason,
}

/// Checkout view of the claims on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ActiveClaims {
    /// False when no valid claim remains.
    pub available: bool,
    /// Still-valid PENDING claims.
    pub claims: Vec<RedemptionClaim>,
    pub reasons: Vec<InvalidClaim>,
}

// =============================================================================
// Order (external)
// =============================================================================

/// Order status as reported by the order service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    AwaitingPayment,
    Paid,
    Shipping,
    Delivered,
    Archived,
    Expired,
    Failed,
}

impl OrderStatus {
    /// Only orders awaiting payment accept claims or payment attempts.
    #[inline]
    pub const fn is_payable(&self) -> bool {
        matches!(self, OrderStatus::AwaitingPayment)
    }
}

/// One line of an order, as needed for shipping and applicability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderLine {
    pub product_id: String,
    pub category: String,
    pub quantity: i64,
    /// Weight of one unit, in the delivery zone's weight unit.
    pub unit_weight: i64,
}

/// An order owned by the order service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub subtotal_cents: i64,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    /// Delivery zone rate per unit weight, in minor units.
    pub delivery_rate_cents: i64,
}

impl Order {
    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.subtotal_cents)
    }

    #[inline]
    pub fn delivery_rate(&self) -> Money {
        Money::from_cents(self.delivery_rate_cents)
    }

    /// Distinct line categories, in first-seen order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for line in &self.lines {
            if !seen.contains(&line.category.as_str()) {
                seen.push(line.category.as_str());
            }
        }
        seen
    }
}

// =============================================================================
// Payment Attempt
// =============================================================================

/// Outcome of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentAttemptStatus {
    /// Amounts verified, gateway call in flight.
    Pending,
    /// Gateway accepted and claims were committed.
    Succeeded,
    /// Gateway declined. No local state changed.
    Failed,
    /// Gateway accepted but a coupon ceiling was reached concurrently;
    /// the charge must be reversed by the host.
    Conflicted,
}

/// A verified attempt to pay for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentAttempt {
    pub id: String,
    pub order_id: String,
    pub customer_id: String,
    pub msisdn: String,
    pub currency: String,
    pub claimed_shipping_cents: i64,
    pub claimed_payable_cents: i64,
    pub committed_claim_ids: Vec<String>,
    pub status: PaymentAttemptStatus,
    pub transaction_ref: Option<String>,
    pub failure_reason: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl PaymentAttempt {
    #[inline]
    pub fn payable(&self) -> Money {
        Money::from_cents(self.claimed_payable_cents)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn order_with(categories: &[&str]) -> Order {
        Order {
            id: "o-1".to_string(),
            customer_id: "c-1".to_string(),
            subtotal_cents: 10_000,
            status: OrderStatus::AwaitingPayment,
            lines: categories
                .iter()
                .enumerate()
                .map(|(i, c)| OrderLine {
                    product_id: format!("p-{i}"),
                    category: c.to_string(),
                    quantity: 1,
                    unit_weight: 1,
                })
                .collect(),
            delivery_rate_cents: 0,
        }
    }

    #[test]
    fn test_coupon_status_classes() {
        assert!(CouponStatus::Unused.is_available());
        assert!(CouponStatus::Active.is_available());
        assert!(!CouponStatus::Expired.is_available());
        assert!(CouponStatus::UsageExhausted.is_terminal());
        assert!(!CouponStatus::Active.is_terminal());
        assert_eq!(CouponStatus::default(), CouponStatus::Unused);
    }

    #[test]
    fn test_order_status_payable() {
        assert!(OrderStatus::AwaitingPayment.is_payable());
        assert!(!OrderStatus::Created.is_payable());
        assert!(!OrderStatus::Paid.is_payable());
    }

    #[test]
    fn test_order_categories_are_distinct() {
        let order = order_with(&["parts", "tyres", "parts"]);
        assert_eq!(order.categories(), vec!["parts", "tyres"]);
    }

    #[test]
    fn test_new_coupon_builders() {
        let draft = NewCoupon::customer_bound("c-9", 0.25, 2, 7, DurationUnit::Days)
            .restricted_to(["parts"]);
        assert_eq!(draft.scope, CouponScope::CustomerBound);
        assert_eq!(draft.owner_customer_id.as_deref(), Some("c-9"));
        assert_eq!(draft.rate().bps(), 2_500);
        assert_eq!(draft.applicable_categories, Some(vec!["parts".to_string()]));
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&CouponScope::CustomerBound).unwrap();
        assert_eq!(json, "\"customer_bound\"");
        let json = serde_json::to_string(&InvalidReason::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
        let status: OrderStatus = serde_json::from_str("\"awaiting_payment\"").unwrap();
        assert_eq!(status, OrderStatus::AwaitingPayment);
    }
}
