//! # Coupon Lifecycle
//!
//! Issuance, cancellation and lazy status maintenance of coupons.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   create() ──► UNUSED ──commit──► ACTIVE ──commit at ceiling──┐        │
//! │                  │                  │                          ▼        │
//! │                  │                  │               USAGE_EXHAUSTED    │
//! │                  ├──────────────────┤                                   │
//! │                  │  now >= expires_at (seen on read)                   │
//! │                  ▼                  ▼                                   │
//! │               EXPIRED            EXPIRED                               │
//! │                                                                         │
//! │   cancel() from any state ──► CANCELLED (pending claims VOIDED)        │
//! │                                                                         │
//! │   Every terminal state clears `enabled`. Nothing runs on a timer:      │
//! │   each read re-evaluates and writes back a stale row.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use discount_core::validation::normalize_code;
use discount_core::{
    availability, evaluate_status, needs_write_back, Availability, Coupon, CouponScope,
    CouponStatus, NewCoupon, ValidationError,
};
use discount_db::{CancelOutcome, Database, DbError};

use crate::codegen::CodeGenerator;
use crate::error::{EngineError, EngineResult};

/// Owns every coupon state transition except the commit increment.
#[derive(Clone)]
pub struct CouponLifecycle {
    db: Database,
    codes: Arc<dyn CodeGenerator>,
    max_attempts: u32,
}

impl std::fmt::Debug for CouponLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CouponLifecycle")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl CouponLifecycle {
    pub fn new(db: Database, codes: Arc<dyn CodeGenerator>, max_attempts: u32) -> Self {
        CouponLifecycle {
            db,
            codes,
            max_attempts,
        }
    }

    // =========================================================================
    // Issuance
    // =========================================================================

    /// Issues a coupon.
    ///
    /// ## Errors
    /// - `OwnerRequired` for a CUSTOMER_BOUND request without an owner
    /// - `DuplicateGeneralCoupon` while another GENERAL coupon is available
    /// - `CodeSpaceExhausted` when no free code turned up in `max_attempts`
    /// - `Validation` for out-of-range fraction, limit or duration
    pub async fn create(&self, draft: NewCoupon, now: DateTime<Utc>) -> EngineResult<Coupon> {
        let rate = match draft.validate() {
            Ok(rate) => rate,
            Err(ValidationError::Required { field }) if field == "owner_customer_id" => {
                return Err(EngineError::OwnerRequired);
            }
            Err(e) => return Err(e.into()),
        };

        if draft.scope == CouponScope::General {
            if let Some(existing) = self.db.coupons().find_live_general().await? {
                let existing = self.refresh(existing, now).await?;
                if existing.status.is_available() {
                    return Err(EngineError::DuplicateGeneralCoupon);
                }
            }
        }

        let owner = draft
            .owner_customer_id
            .as_deref()
            .map(str::trim)
            .map(str::to_string);

        for attempt in 1..=self.max_attempts {
            let code = self.codes.generate();
            if self.db.coupons().code_in_use(&code).await? {
                debug!(attempt, "Generated code already in use");
                continue;
            }

            let coupon = Coupon {
                id: Uuid::new_v4().to_string(),
                code,
                scope: draft.scope,
                owner_customer_id: owner.clone(),
                rate_bps: rate.bps(),
                usage_limit: draft.usage_limit,
                redemption_count: 0,
                duration_amount: draft.duration_amount,
                duration_unit: draft.duration_unit,
                issued_at: now,
                status: CouponStatus::Unused,
                enabled: true,
                applicable_categories: draft.applicable_categories.clone(),
                created_at: now,
                updated_at: now,
            };

            match self.db.coupons().insert(&coupon).await {
                Ok(()) => {
                    info!(
                        coupon_id = %coupon.id,
                        code = %coupon.code,
                        scope = ?coupon.scope,
                        rate = %coupon.rate(),
                        "Coupon issued"
                    );
                    return Ok(coupon);
                }
                // Lost a race for the code between the check and the insert.
                Err(e) if e.is_unique_on("coupons.code") => continue,
                Err(e) if e.is_unique_on("coupons.scope") => {
                    return Err(EngineError::DuplicateGeneralCoupon);
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(attempts = self.max_attempts, "Coupon code space exhausted");
        Err(EngineError::CodeSpaceExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Cancels a coupon and voids its pending claims.
    ///
    /// Cancelling twice is not an error; the outcome reports `cancelled: false`.
    pub async fn cancel(&self, coupon_id: &str, now: DateTime<Utc>) -> EngineResult<CancelOutcome> {
        match self.db.coupons().cancel(coupon_id, now).await {
            Ok(outcome) => Ok(outcome),
            Err(DbError::NotFound { .. }) => Err(EngineError::CouponNotFound(coupon_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Reads (with write-back)
    // =========================================================================

    /// Re-evaluates a coupon and persists a stale EXPIRED or USAGE_EXHAUSTED.
    ///
    /// The returned coupon carries the evaluated status. Write-back failures
    /// are logged and never surface as errors.
    pub async fn refresh(&self, mut coupon: Coupon, now: DateTime<Utc>) -> EngineResult<Coupon> {
        let computed = evaluate_status(&coupon, now);

        if !needs_write_back(coupon.status, computed) {
            coupon.status = computed;
            return Ok(coupon);
        }

        match self
            .db
            .coupons()
            .write_back_status(&coupon.id, computed, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // Someone else moved the row first; trust the store.
                if let Some(mut current) = self.db.coupons().get_by_id(&coupon.id).await? {
                    current.status = evaluate_status(&current, now);
                    return Ok(current);
                }
            }
            Err(e) => {
                warn!(coupon_id = %coupon.id, error = %e, "Coupon status write-back failed");
            }
        }

        if computed == CouponStatus::Expired {
            if let Err(e) = self
                .db
                .claims()
                .expire_pending_for_coupon(&coupon.id, now)
                .await
            {
                warn!(coupon_id = %coupon.id, error = %e, "Expiring pending claims failed");
            }
        }

        coupon.status = computed;
        coupon.enabled = false;
        coupon.updated_at = now;
        Ok(coupon)
    }

    /// Current status of `coupon`, writing it back when stale.
    pub async fn evaluate_status(
        &self,
        coupon: &Coupon,
        now: DateTime<Utc>,
    ) -> EngineResult<CouponStatus> {
        Ok(self.refresh(coupon.clone(), now).await?.status)
    }

    /// Whether `customer_id` may redeem `coupon` right now.
    pub async fn check_availability(
        &self,
        coupon: &Coupon,
        customer_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Availability> {
        let (_, availability) = self
            .refreshed_availability(coupon.clone(), customer_id, now)
            .await?;
        Ok(availability)
    }

    /// Refreshes `coupon` and decides availability against the result.
    pub(crate) async fn refreshed_availability(
        &self,
        coupon: Coupon,
        customer_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<(Coupon, Availability)> {
        let coupon = self.refresh(coupon, now).await?;

        let committed = if coupon.scope == CouponScope::CustomerBound
            && coupon.is_owned_by(customer_id)
        {
            self.db
                .claims()
                .count_committed(&coupon.id, customer_id)
                .await?
        } else {
            0
        };

        let result = availability(&coupon, customer_id, coupon.status, committed);
        debug!(coupon_id = %coupon.id, customer_id = %customer_id, ?result, "Availability checked");
        Ok((coupon, result))
    }

    /// Loads a coupon by ID, refreshed.
    pub async fn get(&self, coupon_id: &str, now: DateTime<Utc>) -> EngineResult<Coupon> {
        let coupon = self
            .db
            .coupons()
            .get_by_id(coupon_id)
            .await?
            .ok_or_else(|| EngineError::CouponNotFound(coupon_id.to_string()))?;
        self.refresh(coupon, now).await
    }

    /// Resolves a human-entered code (any case, surrounding spaces) to its
    /// live coupon, refreshed.
    pub async fn find_by_code(&self, code: &str, now: DateTime<Utc>) -> EngineResult<Coupon> {
        let code = normalize_code(code)?;
        let coupon = self
            .db
            .coupons()
            .get_by_code(&code)
            .await?
            .ok_or_else(|| EngineError::CouponNotFound(code.clone()))?;
        self.refresh(coupon, now).await
    }

    /// A customer's bound coupons plus the general coupon if it is still
    /// available. Every coupon is refreshed.
    pub async fn list_for_customer(
        &self,
        customer_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Coupon>> {
        let mut coupons = Vec::new();

        if let Some(general) = self.db.coupons().find_live_general().await? {
            let general = self.refresh(general, now).await?;
            if general.status.is_available() {
                coupons.push(general);
            }
        }

        for coupon in self.db.coupons().list_for_owner(customer_id).await? {
            coupons.push(self.refresh(coupon, now).await?);
        }

        Ok(coupons)
    }

    /// Committed redemptions of `coupon_id` by `customer_id`.
    pub async fn usage_count(&self, coupon_id: &str, customer_id: &str) -> EngineResult<i64> {
        Ok(self
            .db
            .claims()
            .count_committed(coupon_id, customer_id)
            .await?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::RandomCodeGenerator;
    use chrono::Duration;
    use discount_core::{ClaimStatus, DurationUnit, RedemptionClaim};
    use discount_db::DbConfig;
    use std::sync::Mutex;

    /// Replays a fixed list of codes, then repeats the last one.
    struct FixedCodes(Mutex<Vec<&'static str>>);

    impl FixedCodes {
        fn new(codes: &[&'static str]) -> Arc<Self> {
            let mut codes = codes.to_vec();
            codes.reverse();
            Arc::new(FixedCodes(Mutex::new(codes)))
        }
    }

    impl CodeGenerator for FixedCodes {
        fn generate(&self) -> String {
            let mut codes = self.0.lock().unwrap();
            if codes.len() > 1 {
                codes.pop().unwrap().to_string()
            } else {
                codes[0].to_string()
            }
        }
    }

    async fn lifecycle() -> CouponLifecycle {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        CouponLifecycle::new(db, Arc::new(RandomCodeGenerator::default()), 16)
    }

    async fn lifecycle_with(codes: Arc<dyn CodeGenerator>, attempts: u32) -> CouponLifecycle {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        CouponLifecycle::new(db, codes, attempts)
    }

    #[tokio::test]
    async fn test_create_round_trip() {
        let lifecycle = lifecycle().await;
        let now = Utc::now();
        let coupon = lifecycle
            .create(NewCoupon::general(0.2, 5, 7, DurationUnit::Days), now)
            .await
            .unwrap();

        assert_eq!(coupon.status, CouponStatus::Unused);
        assert_eq!(coupon.redemption_count, 0);
        assert!(coupon.enabled);
        assert_eq!(coupon.rate_bps, 2_000);
        assert_eq!(coupon.code.len(), 8);

        let status = lifecycle.evaluate_status(&coupon, now).await.unwrap();
        assert!(matches!(status, CouponStatus::Unused | CouponStatus::Active));
    }

    #[tokio::test]
    async fn test_single_general_coupon() {
        let lifecycle = lifecycle().await;
        let now = Utc::now();
        lifecycle
            .create(NewCoupon::general(0.2, 5, 7, DurationUnit::Days), now)
            .await
            .unwrap();

        let err = lifecycle
            .create(NewCoupon::general(0.3, 5, 7, DurationUnit::Days), now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateGeneralCoupon));

        // Bound coupons are unaffected.
        lifecycle
            .create(NewCoupon::customer_bound("alice", 0.3, 1, 7, DurationUnit::Days), now)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expired_general_coupon_can_be_replaced() {
        let lifecycle = lifecycle().await;
        let t0 = Utc::now();
        let old = lifecycle
            .create(NewCoupon::general(0.2, 5, 1, DurationUnit::Seconds), t0)
            .await
            .unwrap();

        let later = t0 + Duration::seconds(5);
        lifecycle
            .create(NewCoupon::general(0.2, 5, 7, DurationUnit::Days), later)
            .await
            .unwrap();

        let old = lifecycle.get(&old.id, later).await.unwrap();
        assert_eq!(old.status, CouponStatus::Expired);
        assert!(!old.enabled);
    }

    #[tokio::test]
    async fn test_owner_required() {
        let lifecycle = lifecycle().await;
        let mut draft = NewCoupon::customer_bound("alice", 0.2, 1, 7, DurationUnit::Days);
        draft.owner_customer_id = None;
        let err = lifecycle.create(draft, Utc::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::OwnerRequired));

        let mut draft = NewCoupon::customer_bound("alice", 0.2, 1, 7, DurationUnit::Days);
        draft.owner_customer_id = Some("   ".to_string());
        let err = lifecycle.create(draft, Utc::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::OwnerRequired));
    }

    #[tokio::test]
    async fn test_fraction_out_of_range() {
        let lifecycle = lifecycle().await;
        let err = lifecycle
            .create(NewCoupon::general(0.9, 1, 1, DurationUnit::Days), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_code_retry_then_exhaustion() {
        let codes = FixedCodes::new(&["SAMECODE", "SAMECODE", "OTHERONE"]);
        let lifecycle = lifecycle_with(codes, 3).await;
        let now = Utc::now();

        let first = lifecycle
            .create(NewCoupon::customer_bound("alice", 0.2, 1, 7, DurationUnit::Days), now)
            .await
            .unwrap();
        assert_eq!(first.code, "SAMECODE");

        // Draws SAMECODE (taken), then OTHERONE.
        let second = lifecycle
            .create(NewCoupon::customer_bound("bob", 0.2, 1, 7, DurationUnit::Days), now)
            .await
            .unwrap();
        assert_eq!(second.code, "OTHERONE");

        // Only OTHERONE is left to draw.
        let err = lifecycle
            .create(NewCoupon::customer_bound("carol", 0.2, 1, 7, DurationUnit::Days), now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CodeSpaceExhausted { attempts: 3 }));
    }

    #[tokio::test]
    async fn test_lazy_expiry_writes_back() {
        let lifecycle = lifecycle().await;
        let t0 = Utc::now();
        let coupon = lifecycle
            .create(NewCoupon::customer_bound("alice", 0.2, 1, 1, DurationUnit::Seconds), t0)
            .await
            .unwrap();

        let availability = lifecycle
            .check_availability(&coupon, "alice", t0 + Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(availability, Availability::Expired);

        let stored = lifecycle.db.coupons().get_by_id(&coupon.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CouponStatus::Expired);
        assert!(!stored.enabled);
    }

    #[tokio::test]
    async fn test_scope_isolation() {
        let lifecycle = lifecycle().await;
        let now = Utc::now();
        let coupon = lifecycle
            .create(NewCoupon::customer_bound("alice", 0.2, 1, 7, DurationUnit::Days), now)
            .await
            .unwrap();

        assert_eq!(
            lifecycle.check_availability(&coupon, "bob", now).await.unwrap(),
            Availability::NotOwned
        );
        assert_eq!(
            lifecycle.check_availability(&coupon, "alice", now).await.unwrap(),
            Availability::Available
        );
    }

    #[tokio::test]
    async fn test_find_by_code_normalizes() {
        let lifecycle = lifecycle().await;
        let now = Utc::now();
        let coupon = lifecycle
            .create(NewCoupon::general(0.2, 5, 7, DurationUnit::Days), now)
            .await
            .unwrap();

        let lowered = format!("  {}  ", coupon.code.to_lowercase());
        let found = lifecycle.find_by_code(&lowered, now).await.unwrap();
        assert_eq!(found.id, coupon.id);

        let err = lifecycle.find_by_code("NOPE0000", now).await.unwrap_err();
        assert!(matches!(err, EngineError::CouponNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_voids_pending_claims() {
        let lifecycle = lifecycle().await;
        let now = Utc::now();
        let coupon = lifecycle
            .create(NewCoupon::customer_bound("alice", 0.2, 1, 7, DurationUnit::Days), now)
            .await
            .unwrap();
        let claim = RedemptionClaim {
            id: Uuid::new_v4().to_string(),
            customer_id: "alice".to_string(),
            order_id: "order-1".to_string(),
            coupon_id: coupon.id.clone(),
            status: ClaimStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        lifecycle.db.claims().insert(&claim).await.unwrap();

        let outcome = lifecycle.cancel(&coupon.id, now).await.unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.voided_claims, 1);

        let again = lifecycle.cancel(&coupon.id, now).await.unwrap();
        assert!(!again.cancelled);

        let coupon = lifecycle.get(&coupon.id, now).await.unwrap();
        assert_eq!(coupon.status, CouponStatus::Cancelled);
        assert_eq!(
            lifecycle.check_availability(&coupon, "alice", now).await.unwrap(),
            Availability::Cancelled
        );

        let err = lifecycle.cancel("missing", now).await.unwrap_err();
        assert!(matches!(err, EngineError::CouponNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_for_customer() {
        let lifecycle = lifecycle().await;
        let now = Utc::now();
        let general = lifecycle
            .create(NewCoupon::general(0.1, 100, 7, DurationUnit::Days), now)
            .await
            .unwrap();
        let mine = lifecycle
            .create(NewCoupon::customer_bound("alice", 0.2, 1, 7, DurationUnit::Days), now)
            .await
            .unwrap();
        lifecycle
            .create(NewCoupon::customer_bound("bob", 0.2, 1, 7, DurationUnit::Days), now)
            .await
            .unwrap();

        let ids: Vec<String> = lifecycle
            .list_for_customer("alice", now)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![general.id, mine.id]);
        assert_eq!(lifecycle.usage_count(&ids[1], "alice").await.unwrap(), 0);
    }
}
