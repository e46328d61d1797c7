//! # Redemption Manager
//!
//! A customer's application of a coupon to one order, up to payment.
//!
//! ## Claim Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  claim(customer, order, coupon)                                         │
//! │                                                                         │
//! │  1. order AWAITING_PAYMENT?          no → OrderNotPayable              │
//! │  2. coupon exists and enabled?       no → CouponNotFound               │
//! │  3. applicability rule accepts?      no → ScopeNotSupported            │
//! │  4. availability (lazy expiry)       ✗  → Expired / UsageExceeded /    │
//! │     stale rows are written back here      NotOwned                     │
//! │  5. pending claim for (order,coupon)? yes → DuplicateClaim             │
//! │  6. insert PENDING claim, notify order administrators                  │
//! │                                                                         │
//! │  Step 5 is backed by a partial unique index, so two racing requests    │
//! │  still produce exactly one PENDING claim.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Claims never touch coupon counters. Counting happens only when
//! [`crate::reconciler::PaymentReconciler`] commits a successful payment.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use discount_core::{
    ActiveClaims, ClaimStatus, Coupon, CouponStatus, InvalidClaim, InvalidReason, Order,
    RedemptionClaim,
};
use discount_db::Database;

use crate::applicability::ApplicabilityRule;
use crate::collaborators::{Identity, NotificationKind, Notifier, OrderGateway, Recipient};
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::CouponLifecycle;

/// Creates and lists redemption claims.
#[derive(Clone)]
pub struct RedemptionManager {
    db: Database,
    lifecycle: CouponLifecycle,
    orders: Arc<dyn OrderGateway>,
    notifier: Arc<dyn Notifier>,
    rule: Arc<dyn ApplicabilityRule>,
}

impl std::fmt::Debug for RedemptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedemptionManager").finish_non_exhaustive()
    }
}

impl RedemptionManager {
    pub fn new(
        db: Database,
        lifecycle: CouponLifecycle,
        orders: Arc<dyn OrderGateway>,
        notifier: Arc<dyn Notifier>,
        rule: Arc<dyn ApplicabilityRule>,
    ) -> Self {
        RedemptionManager {
            db,
            lifecycle,
            orders,
            notifier,
            rule,
        }
    }

    // =========================================================================
    // Claiming
    // =========================================================================

    /// Applies `coupon_id` to `order_id` on behalf of `customer_id`.
    ///
    /// Re-submitting while a PENDING claim exists returns `DuplicateClaim`
    /// and leaves the existing claim untouched.
    pub async fn claim(
        &self,
        customer_id: &str,
        order_id: &str,
        coupon_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<RedemptionClaim> {
        let order = self.payable_order(order_id).await?;

        let coupon = self
            .db
            .coupons()
            .get_by_id(coupon_id)
            .await?
            .filter(|c| c.enabled)
            .ok_or_else(|| EngineError::CouponNotFound(coupon_id.to_string()))?;

        if !self.rule.applies(&coupon, &order) {
            return Err(EngineError::ScopeNotSupported {
                coupon_id: coupon.id,
                order_id: order.id,
            });
        }

        let (coupon, availability) = self
            .lifecycle
            .refreshed_availability(coupon, customer_id, now)
            .await?;
        if let Some(err) = EngineError::from_availability(availability, &coupon.id, customer_id) {
            debug!(coupon_id = %coupon.id, ?availability, "Claim rejected");
            return Err(err);
        }

        if self
            .db
            .claims()
            .find_pending(order_id, &coupon.id)
            .await?
            .is_some()
        {
            return Err(EngineError::DuplicateClaim {
                order_id: order_id.to_string(),
                coupon_id: coupon.id,
            });
        }

        let claim = RedemptionClaim {
            id: Uuid::new_v4().to_string(),
            customer_id: customer_id.to_string(),
            order_id: order_id.to_string(),
            coupon_id: coupon.id.clone(),
            status: ClaimStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        match self.db.claims().insert(&claim).await {
            Ok(()) => {}
            Err(e) if e.is_unique_on("redemption_claims.order_id") => {
                return Err(EngineError::DuplicateClaim {
                    order_id: order_id.to_string(),
                    coupon_id: coupon.id,
                });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            claim_id = %claim.id,
            order_id = %order_id,
            coupon_id = %coupon.id,
            customer_id = %customer_id,
            "Coupon claimed"
        );

        self.announce_claim(&claim, &coupon).await;
        Ok(claim)
    }

    /// Resolves a human-entered code, then claims it.
    pub async fn claim_by_code(
        &self,
        customer_id: &str,
        order_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<RedemptionClaim> {
        let coupon = self.lifecycle.find_by_code(code, now).await?;
        self.claim(customer_id, order_id, &coupon.id, now).await
    }

    /// Claims on behalf of whoever `request` authenticates as.
    pub async fn claim_as<I>(
        &self,
        identity: &I,
        request: &I::Request,
        order_id: &str,
        coupon_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<RedemptionClaim>
    where
        I: Identity + ?Sized,
    {
        let customer_id = identity.current_customer(request).await?;
        self.claim(&customer_id, order_id, coupon_id, now).await
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// Checkout view of an order's claims.
    ///
    /// Pending claims whose coupon has since expired are moved to EXPIRED
    /// on the way. Committed claims are not listed.
    pub async fn list_active_for_order(
        &self,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<ActiveClaims> {
        let mut claims = Vec::new();
        let mut reasons = Vec::new();
        let mut coupons: HashMap<String, Coupon> = HashMap::new();

        for claim in self.db.claims().list_for_order(order_id).await? {
            let reason = match claim.status {
                ClaimStatus::Committed => continue,
                ClaimStatus::Expired => InvalidReason::Expired,
                ClaimStatus::Voided => InvalidReason::Cancelled,
                ClaimStatus::Pending => {
                    let status = match coupons.get(&claim.coupon_id) {
                        Some(coupon) => coupon.status,
                        None => {
                            let coupon = self.lifecycle.get(&claim.coupon_id, now).await?;
                            let status = coupon.status;
                            coupons.insert(coupon.id.clone(), coupon);
                            status
                        }
                    };

                    match status {
                        CouponStatus::Expired => {
                            self.expire_claims(&claim.coupon_id, now).await;
                            InvalidReason::Expired
                        }
                        CouponStatus::Cancelled => InvalidReason::Cancelled,
                        _ => {
                            claims.push(claim);
                            continue;
                        }
                    }
                }
            };

            reasons.push(InvalidClaim {
                claim_id: claim.id,
                coupon_id: claim.coupon_id,
                reason,
            });
        }

        Ok(ActiveClaims {
            available: !claims.is_empty(),
            claims,
            reasons,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn payable_order(&self, order_id: &str) -> EngineResult<Order> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;

        if !order.status.is_payable() {
            return Err(EngineError::OrderNotPayable {
                order_id: order.id,
                status: order.status,
            });
        }
        Ok(order)
    }

    async fn expire_claims(&self, coupon_id: &str, now: DateTime<Utc>) {
        if let Err(e) = self
            .db
            .claims()
            .expire_pending_for_coupon(coupon_id, now)
            .await
        {
            warn!(coupon_id = %coupon_id, error = %e, "Expiring pending claims failed");
        }
    }

    async fn announce_claim(&self, claim: &RedemptionClaim, coupon: &Coupon) {
        let message = format!(
            "Coupon {} ({}) applied to order {} by customer {}",
            coupon.code,
            coupon.rate(),
            claim.order_id,
            claim.customer_id
        );
        if let Err(e) = self
            .notifier
            .notify(
                &[Recipient::OrderAdministrators],
                &claim.order_id,
                NotificationKind::DiscountApplied,
                &message,
            )
            .await
        {
            warn!(order_id = %claim.order_id, error = %e, "Claim notification failed");
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applicability::CategoryRule;
    use crate::codegen::RandomCodeGenerator;
    use crate::collaborators::{InMemoryOrders, RecordingNotifier, TokenIdentity};
    use chrono::Duration;
    use discount_core::{DurationUnit, NewCoupon, OrderLine, OrderStatus};
    use discount_db::DbConfig;

    struct Fixture {
        lifecycle: CouponLifecycle,
        manager: RedemptionManager,
        orders: Arc<InMemoryOrders>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn fixture_with(notifier: RecordingNotifier) -> Fixture {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let lifecycle = CouponLifecycle::new(db.clone(), Arc::new(RandomCodeGenerator::default()), 8);
        let orders = InMemoryOrders::shared();
        let notifier = Arc::new(notifier);
        let manager = RedemptionManager::new(
            db,
            lifecycle.clone(),
            orders.clone(),
            notifier.clone(),
            Arc::new(CategoryRule),
        );
        Fixture {
            lifecycle,
            manager,
            orders,
            notifier,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(RecordingNotifier::new()).await
    }

    fn order(id: &str, customer: &str, status: OrderStatus, category: &str) -> Order {
        Order {
            id: id.to_string(),
            customer_id: customer.to_string(),
            subtotal_cents: 10_000,
            status,
            lines: vec![OrderLine {
                product_id: "p-1".to_string(),
                category: category.to_string(),
                quantity: 1,
                unit_weight: 1,
            }],
            delivery_rate_cents: 500,
        }
    }

    #[tokio::test]
    async fn test_idempotent_claim() {
        let f = fixture().await;
        let now = Utc::now();
        f.orders
            .put(order("order-1", "alice", OrderStatus::AwaitingPayment, "shoes"))
            .await;
        let coupon = f
            .lifecycle
            .create(NewCoupon::general(0.2, 10, 7, DurationUnit::Days), now)
            .await
            .unwrap();

        let first = f.manager.claim("alice", "order-1", &coupon.id, now).await.unwrap();
        assert_eq!(first.status, ClaimStatus::Pending);

        let err = f
            .manager
            .claim("alice", "order-1", &coupon.id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateClaim { .. }));

        let active = f.manager.list_active_for_order("order-1", now).await.unwrap();
        assert!(active.available);
        assert_eq!(active.claims, vec![first]);

        let sent = f.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec![Recipient::OrderAdministrators]);
        assert_eq!(sent[0].kind, NotificationKind::DiscountApplied);
    }

    #[tokio::test]
    async fn test_order_must_await_payment() {
        let f = fixture().await;
        let now = Utc::now();
        f.orders
            .put(order("order-1", "alice", OrderStatus::Paid, "shoes"))
            .await;
        let coupon = f
            .lifecycle
            .create(NewCoupon::general(0.2, 10, 7, DurationUnit::Days), now)
            .await
            .unwrap();

        let err = f
            .manager
            .claim("alice", "order-1", &coupon.id, now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::OrderNotPayable { status: OrderStatus::Paid, .. }
        ));

        let err = f
            .manager
            .claim("alice", "missing", &coupon.id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_and_cancelled_coupons() {
        let f = fixture().await;
        let now = Utc::now();
        f.orders
            .put(order("order-1", "alice", OrderStatus::AwaitingPayment, "shoes"))
            .await;

        let err = f.manager.claim("alice", "order-1", "nope", now).await.unwrap_err();
        assert!(matches!(err, EngineError::CouponNotFound(_)));

        let coupon = f
            .lifecycle
            .create(NewCoupon::customer_bound("alice", 0.2, 1, 7, DurationUnit::Days), now)
            .await
            .unwrap();
        f.lifecycle.cancel(&coupon.id, now).await.unwrap();
        let err = f
            .manager
            .claim("alice", "order-1", &coupon.id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CouponNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancelled_general_coupon_is_not_found() {
        let f = fixture().await;
        let now = Utc::now();
        f.orders
            .put(order("order-1", "alice", OrderStatus::AwaitingPayment, "shoes"))
            .await;
        let coupon = f
            .lifecycle
            .create(NewCoupon::general(0.2, 10, 7, DurationUnit::Days), now)
            .await
            .unwrap();
        f.lifecycle.cancel(&coupon.id, now).await.unwrap();

        let err = f
            .manager
            .claim("alice", "order-1", &coupon.id, now)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CouponNotFound);
    }

    #[tokio::test]
    async fn test_stale_coupon_reports_expiry() {
        let f = fixture().await;
        let t0 = Utc::now();
        f.orders
            .put(order("order-1", "alice", OrderStatus::AwaitingPayment, "shoes"))
            .await;
        let coupon = f
            .lifecycle
            .create(NewCoupon::general(0.2, 10, 1, DurationUnit::Seconds), t0)
            .await
            .unwrap();

        // Still stored enabled; the claim itself discovers the expiry.
        let later = t0 + Duration::seconds(2);
        let err = f
            .manager
            .claim("alice", "order-1", &coupon.id, later)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Expired(_)));

        let stored = f.lifecycle.get(&coupon.id, later).await.unwrap();
        assert_eq!(stored.status, CouponStatus::Expired);
        assert!(!stored.enabled);

        let err = f
            .manager
            .claim("alice", "order-1", &coupon.id, later)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CouponNotFound(_)));
    }

    #[tokio::test]
    async fn test_scope_not_supported() {
        let f = fixture().await;
        let now = Utc::now();
        f.orders
            .put(order("order-1", "alice", OrderStatus::AwaitingPayment, "phones"))
            .await;
        let coupon = f
            .lifecycle
            .create(
                NewCoupon::general(0.2, 10, 7, DurationUnit::Days).restricted_to(["shoes"]),
                now,
            )
            .await
            .unwrap();

        let err = f
            .manager
            .claim("alice", "order-1", &coupon.id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ScopeNotSupported { .. }));
    }

    #[tokio::test]
    async fn test_not_owned() {
        let f = fixture().await;
        let now = Utc::now();
        f.orders
            .put(order("order-1", "bob", OrderStatus::AwaitingPayment, "shoes"))
            .await;
        let coupon = f
            .lifecycle
            .create(NewCoupon::customer_bound("alice", 0.2, 1, 7, DurationUnit::Days), now)
            .await
            .unwrap();

        let err = f
            .manager
            .claim("bob", "order-1", &coupon.id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotOwned { .. }));
    }

    #[tokio::test]
    async fn test_expired_claims_are_reported() {
        let f = fixture().await;
        let t0 = Utc::now();
        f.orders
            .put(order("order-1", "alice", OrderStatus::AwaitingPayment, "shoes"))
            .await;
        let coupon = f
            .lifecycle
            .create(NewCoupon::customer_bound("alice", 0.2, 1, 1, DurationUnit::Seconds), t0)
            .await
            .unwrap();
        let claim = f.manager.claim("alice", "order-1", &coupon.id, t0).await.unwrap();

        let later = t0 + Duration::seconds(2);
        let active = f.manager.list_active_for_order("order-1", later).await.unwrap();
        assert!(!active.available);
        assert!(active.claims.is_empty());
        assert_eq!(
            active.reasons,
            vec![InvalidClaim {
                claim_id: claim.id.clone(),
                coupon_id: coupon.id.clone(),
                reason: InvalidReason::Expired,
            }]
        );

        // The claim itself is now EXPIRED in the store.
        let again = f.manager.list_active_for_order("order-1", later).await.unwrap();
        assert_eq!(again.reasons.len(), 1);
        assert_eq!(again.reasons[0].reason, InvalidReason::Expired);

        let err = f
            .manager
            .claim("alice", "order-1", &coupon.id, later)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CouponNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancelled_claims_are_reported() {
        let f = fixture().await;
        let now = Utc::now();
        f.orders
            .put(order("order-1", "alice", OrderStatus::AwaitingPayment, "shoes"))
            .await;
        let coupon = f
            .lifecycle
            .create(NewCoupon::customer_bound("alice", 0.2, 1, 7, DurationUnit::Days), now)
            .await
            .unwrap();
        f.manager.claim("alice", "order-1", &coupon.id, now).await.unwrap();
        f.lifecycle.cancel(&coupon.id, now).await.unwrap();

        let active = f.manager.list_active_for_order("order-1", now).await.unwrap();
        assert!(!active.available);
        assert_eq!(active.reasons[0].reason, InvalidReason::Cancelled);
    }

    #[tokio::test]
    async fn test_claim_by_code_and_identity() {
        let f = fixture().await;
        let now = Utc::now();
        f.orders
            .put(order("order-1", "alice", OrderStatus::AwaitingPayment, "shoes"))
            .await;
        f.orders
            .put(order("order-2", "alice", OrderStatus::AwaitingPayment, "shoes"))
            .await;
        let coupon = f
            .lifecycle
            .create(NewCoupon::customer_bound("alice", 0.2, 2, 7, DurationUnit::Days), now)
            .await
            .unwrap();

        let by_code = f
            .manager
            .claim_by_code("alice", "order-1", &coupon.code.to_lowercase(), now)
            .await
            .unwrap();
        assert_eq!(by_code.coupon_id, coupon.id);

        let identity = TokenIdentity::new().with_token("token-a", "alice");
        let claim = f
            .manager
            .claim_as(&identity, &"token-a".to_string(), "order-2", &coupon.id, now)
            .await
            .unwrap();
        assert_eq!(claim.customer_id, "alice");

        let err = f
            .manager
            .claim_as(&identity, &"bad".to_string(), "order-2", &coupon.id, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Collaborator(_)));
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_abort_claim() {
        let f = fixture_with(RecordingNotifier::failing()).await;
        let now = Utc::now();
        f.orders
            .put(order("order-1", "alice", OrderStatus::AwaitingPayment, "shoes"))
            .await;
        let coupon = f
            .lifecycle
            .create(NewCoupon::general(0.2, 10, 7, DurationUnit::Days), now)
            .await
            .unwrap();

        f.manager.claim("alice", "order-1", &coupon.id, now).await.unwrap();
        assert_eq!(f.notifier.sent().await.len(), 1);
    }
}
