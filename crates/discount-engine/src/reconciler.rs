//! # Payment Reconciler
//!
//! Verifies client-submitted totals, charges the customer and commits the
//! order's claims.
//!
//! ## Authorization Saga
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  authorize(submission)                                                  │
//! │                                                                         │
//! │   1. MSISDN policy                  ✗ → InvalidMsisdn                  │
//! │   2. succeeded attempt exists?      ✓ → re-drive mark_paid, return it  │
//! │   3. order AWAITING_PAYMENT?        ✗ → OrderNotPayable                │
//! │   4. recompute payable              ≠ → AmountMismatch                 │
//! │   5. every claim still available?   ✗ → Expired / UsageExceeded / ...  │
//! │   6. record PENDING attempt         taken → resume if it succeeded,   │
//! │      (one in flight per order)              else ConcurrentUpdateConflict│
//! │   7. PaymentGateway.authorize (once) ✗ → attempt FAILED, GatewayFailure│
//! │   8. ONE TRANSACTION: claims COMMITTED, counters +1, attempt SUCCEEDED │
//! │        zero rows anywhere → attempt CONFLICTED,                        │
//! │                             ConcurrentUpdateConflict                   │
//! │   9. OrderGateway.mark_paid         ✗ → Collaborator (retry resumes    │
//! │                                          at step 2)                    │
//! │  10. notify sales staff + customer (failures logged only)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing local changes before the gateway approves except the attempt
//! record itself.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use discount_core::validation::{validate_client_amount, MsisdnPolicy};
use discount_core::{
    Coupon, CouponStatus, Money, Order, OrderStatus, PayableBreakdown, PaymentAttempt,
    PaymentAttemptStatus, RedemptionClaim,
};
use discount_db::{CommitItem, Database, DbError};

use crate::collaborators::{
    NotificationKind, Notifier, OrderGateway, PaymentGateway, PaymentOutcome, Recipient,
};
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::CouponLifecycle;

// =============================================================================
// Request / Response Types
// =============================================================================

/// What the storefront submits at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentSubmission {
    pub order_id: String,
    /// Shipping amount as displayed to the customer.
    pub shipping_amount: Money,
    /// Total as displayed to the customer.
    pub payable: Money,
    pub msisdn: String,
}

/// Result of a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentReceipt {
    pub attempt: PaymentAttempt,
    /// True when an earlier attempt had already succeeded and nothing was
    /// charged this time.
    pub resumed: bool,
}

/// A pending claim that still contributes to the order total.
#[derive(Debug, Clone)]
struct Contribution {
    claim: RedemptionClaim,
    coupon: Coupon,
}

/// Gateway reference for the `ordinal`-th attempt on an order.
///
/// Duplicate submissions racing for the same attempt derive the same
/// reference, so an idempotent gateway also refuses the second charge.
pub fn payment_reference(order_id: &str, ordinal: usize) -> String {
    format!("{order_id}#{ordinal}")
}

// =============================================================================
// Payment Reconciler
// =============================================================================

/// Server-side pricing and the payment/commit saga.
#[derive(Clone)]
pub struct PaymentReconciler {
    db: Database,
    lifecycle: CouponLifecycle,
    orders: Arc<dyn OrderGateway>,
    payments: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    msisdn: MsisdnPolicy,
    currency: String,
}

impl std::fmt::Debug for PaymentReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentReconciler")
            .field("msisdn", &self.msisdn)
            .field("currency", &self.currency)
            .finish_non_exhaustive()
    }
}

impl PaymentReconciler {
    pub fn new(
        db: Database,
        lifecycle: CouponLifecycle,
        orders: Arc<dyn OrderGateway>,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        msisdn: MsisdnPolicy,
        currency: impl Into<String>,
    ) -> Self {
        PaymentReconciler {
            db,
            lifecycle,
            orders,
            payments,
            notifier,
            msisdn,
            currency: currency.into(),
        }
    }

    // =========================================================================
    // Pricing
    // =========================================================================

    /// Recomputes what `order` should cost given `claims`.
    ///
    /// Only PENDING claims whose coupon is neither expired nor cancelled
    /// contribute. Coupons found expired are written back (and their pending
    /// claims expired) before the total is returned.
    pub async fn compute_payable(
        &self,
        order: &Order,
        claims: &[RedemptionClaim],
        now: DateTime<Utc>,
    ) -> EngineResult<PayableBreakdown> {
        let contributions = self.contributions(claims, now).await?;
        Ok(PayableBreakdown::compute(
            order,
            contributions.iter().map(|c| c.coupon.rate()),
        ))
    }

    async fn contributions(
        &self,
        claims: &[RedemptionClaim],
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Contribution>> {
        let mut contributions = Vec::new();
        for claim in claims.iter().filter(|c| c.is_pending()) {
            let coupon = self.lifecycle.get(&claim.coupon_id, now).await?;
            match coupon.status {
                CouponStatus::Expired => {
                    debug!(claim_id = %claim.id, coupon_id = %coupon.id, "Claim expired");
                    if let Err(e) = self
                        .db
                        .claims()
                        .expire_pending_for_coupon(&coupon.id, now)
                        .await
                    {
                        warn!(coupon_id = %coupon.id, error = %e, "Expiring pending claims failed");
                    }
                }
                CouponStatus::Cancelled => {
                    debug!(
                        claim_id = %claim.id,
                        coupon_id = %coupon.id,
                        status = ?coupon.status,
                        "Claim no longer contributes"
                    );
                }
                _ => contributions.push(Contribution {
                    claim: claim.clone(),
                    coupon,
                }),
            }
        }
        Ok(contributions)
    }

    // =========================================================================
    // Authorization
    // =========================================================================

    /// Verifies the submission, charges once and commits the order's claims.
    pub async fn authorize(
        &self,
        submission: &PaymentSubmission,
        now: DateTime<Utc>,
    ) -> EngineResult<PaymentReceipt> {
        let msisdn = self
            .msisdn
            .validate(&submission.msisdn)
            .map_err(|e| EngineError::InvalidMsisdn(e.to_string()))?;
        validate_client_amount("shipping_amount", submission.shipping_amount)?;
        validate_client_amount("payable", submission.payable)?;

        let order = self
            .orders
            .get(&submission.order_id)
            .await?
            .ok_or_else(|| EngineError::OrderNotFound(submission.order_id.clone()))?;

        if let Some(attempt) = self.db.attempts().find_succeeded(&order.id).await? {
            return self.resume(&order, attempt).await;
        }

        if !order.status.is_payable() {
            return Err(EngineError::OrderNotPayable {
                order_id: order.id,
                status: order.status,
            });
        }

        let pending = self.db.claims().list_pending_for_order(&order.id).await?;
        let contributions = self.contributions(&pending, now).await?;
        let breakdown =
            PayableBreakdown::compute(&order, contributions.iter().map(|c| c.coupon.rate()));

        if let Err(err) = self
            .verify(&order, &contributions, &breakdown, submission, now)
            .await
        {
            // A duplicate submission may only now see its twin's commit.
            if let Some(attempt) = self.db.attempts().find_succeeded(&order.id).await? {
                return self.resume(&order, attempt).await;
            }
            return Err(err);
        }

        let ordinal = self.db.attempts().list_for_order(&order.id).await?.len() + 1;
        let reference = payment_reference(&order.id, ordinal);

        let attempt = PaymentAttempt {
            id: Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            customer_id: order.customer_id.clone(),
            msisdn: msisdn.clone(),
            currency: self.currency.clone(),
            claimed_shipping_cents: submission.shipping_amount.cents(),
            claimed_payable_cents: submission.payable.cents(),
            committed_claim_ids: Vec::new(),
            status: PaymentAttemptStatus::Pending,
            transaction_ref: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        match self.db.attempts().insert(&attempt).await {
            Ok(()) => {}
            Err(e) if e.is_unique_on("payment_attempts.order_id") => {
                return self.already_in_flight(&order).await;
            }
            Err(e) => return Err(e.into()),
        }

        let transaction_ref = self
            .charge(&attempt, &reference, breakdown.payable, &msisdn, now)
            .await?;

        let items: Vec<CommitItem> = contributions
            .iter()
            .map(|c| CommitItem {
                claim_id: c.claim.id.clone(),
                coupon_id: c.coupon.id.clone(),
                customer_id: c.claim.customer_id.clone(),
                scope: c.coupon.scope,
            })
            .collect();

        let outcome = match self
            .db
            .attempts()
            .commit_success(&attempt.id, &transaction_ref, &items, now)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = format!("commit failed after charge: {e}");
                if let Err(mark) = self
                    .db
                    .attempts()
                    .mark_conflicted(&attempt.id, &transaction_ref, &reason, now)
                    .await
                {
                    warn!(attempt_id = %attempt.id, error = %mark, "Could not flag conflicted attempt");
                }
                return Err(e.into());
            }
        };

        self.orders.mark_paid(&order.id).await?;

        info!(
            order_id = %order.id,
            attempt_id = %attempt.id,
            payable = %breakdown.payable,
            discount = %breakdown.discount_amount,
            claims = outcome.committed_claim_ids.len(),
            "Order paid"
        );

        self.announce_payment(&order, breakdown.payable).await;

        let attempt = self.reload(&attempt.id).await?;
        Ok(PaymentReceipt {
            attempt,
            resumed: false,
        })
    }

    /// Every attempt recorded for an order, oldest first.
    pub async fn attempts_for_order(&self, order_id: &str) -> EngineResult<Vec<PaymentAttempt>> {
        Ok(self.db.attempts().list_for_order(order_id).await?)
    }

    // =========================================================================
    // Saga Steps
    // =========================================================================

    /// Checks the submitted amounts and that every contributing coupon can
    /// still be honoured.
    async fn verify(
        &self,
        order: &Order,
        contributions: &[Contribution],
        breakdown: &PayableBreakdown,
        submission: &PaymentSubmission,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        if !breakdown.matches(submission.shipping_amount, submission.payable) {
            warn!(
                order_id = %order.id,
                expected = %breakdown.payable,
                submitted = %submission.payable,
                "Submitted amounts do not match"
            );
            return Err(EngineError::AmountMismatch {
                expected_shipping: breakdown.shipping_amount,
                expected_payable: breakdown.payable,
                client_shipping: submission.shipping_amount,
                client_payable: submission.payable,
            });
        }

        for contribution in contributions {
            let (_, availability) = self
                .lifecycle
                .refreshed_availability(
                    contribution.coupon.clone(),
                    &contribution.claim.customer_id,
                    now,
                )
                .await?;
            if let Some(err) = EngineError::from_availability(
                availability,
                &contribution.coupon.id,
                &contribution.claim.customer_id,
            ) {
                return Err(err);
            }
        }

        Ok(())
    }

    /// Calls the gateway exactly once. A decline or transport error marks
    /// the attempt FAILED and leaves every claim PENDING.
    async fn charge(
        &self,
        attempt: &PaymentAttempt,
        reference: &str,
        amount: Money,
        msisdn: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<String> {
        let reason = match self
            .payments
            .authorize(amount, &self.currency, msisdn, reference)
            .await
        {
            Ok(PaymentOutcome::Success { transaction_ref }) => return Ok(transaction_ref),
            Ok(PaymentOutcome::Failure { reason }) => reason,
            Err(e) => e.to_string(),
        };

        info!(attempt_id = %attempt.id, reason = %reason, "Payment declined");
        if let Err(e) = self
            .db
            .attempts()
            .mark_failed(&attempt.id, &reason, now)
            .await
        {
            warn!(attempt_id = %attempt.id, error = %e, "Could not record failed attempt");
        }
        Err(EngineError::GatewayFailure(reason))
    }

    /// Another request holds the order's attempt slot.
    async fn already_in_flight(&self, order: &Order) -> EngineResult<PaymentReceipt> {
        if let Some(attempt) = self.db.attempts().find_succeeded(&order.id).await? {
            return self.resume(order, attempt).await;
        }

        info!(order_id = %order.id, "Payment already in flight");
        Err(EngineError::ConcurrentUpdateConflict {
            entity: "payment attempt".to_string(),
            id: order.id.clone(),
        })
    }

    /// Finishes a saga whose commit already happened.
    async fn resume(&self, order: &Order, attempt: PaymentAttempt) -> EngineResult<PaymentReceipt> {
        if order.status == OrderStatus::AwaitingPayment {
            info!(order_id = %order.id, attempt_id = %attempt.id, "Resuming paid order");
            self.orders.mark_paid(&order.id).await?;
        } else {
            debug!(order_id = %order.id, "Order already settled");
        }

        Ok(PaymentReceipt {
            attempt,
            resumed: true,
        })
    }

    async fn reload(&self, attempt_id: &str) -> EngineResult<PaymentAttempt> {
        self.db
            .attempts()
            .get_by_id(attempt_id)
            .await?
            .ok_or_else(|| EngineError::Store(DbError::not_found("PaymentAttempt", attempt_id)))
    }

    async fn announce_payment(&self, order: &Order, payable: Money) {
        let message = format!("Payment of {} received for order {}", payable, order.id);
        if let Err(e) = self
            .notifier
            .notify(
                &[
                    Recipient::SalesStaff,
                    Recipient::Customer(order.customer_id.clone()),
                ],
                &order.id,
                NotificationKind::PaymentReceived,
                &message,
            )
            .await
        {
            warn!(order_id = %order.id, error = %e, "Payment notification failed");
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
