//! # Payment Attempt Repository
//!
//! Payment attempt records and the redemption commit transaction.
//!
//! ## Commit Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  commit_success(attempt, transaction_ref, items)                        │
//! │                                                                         │
//! │  BEGIN                                                                 │
//! │   for each claim:                                                      │
//! │     1. claim  PENDING → COMMITTED        WHERE status = 'pending'      │
//! │     2. coupon count + 1                                                │
//! │          GENERAL:  WHERE redemption_count < usage_limit                │
//! │          BOUND:    owner's committed claims (incl. this) <= limit      │
//! │        status → ACTIVE, or USAGE_EXHAUSTED + enabled=0 at the ceiling  │
//! │   3. attempt PENDING → SUCCEEDED                                       │
//! │  COMMIT                                                                │
//! │                                                                         │
//! │  Any step matching zero rows → DbError::Conflict, transaction dropped  │
//! │  (rolled back). Counters never move without the claim and attempt.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use discount_core::{CouponScope, CouponStatus, PaymentAttempt, PaymentAttemptStatus};

const ATTEMPT_COLUMNS: &str = r#"
    id, order_id, customer_id, msisdn, currency, claimed_shipping_cents,
    claimed_payable_cents, committed_claim_ids, status, transaction_ref,
    failure_reason, created_at, updated_at
"#;

/// One claim to commit alongside a successful payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitItem {
    pub claim_id: String,
    pub coupon_id: String,
    pub customer_id: String,
    pub scope: CouponScope,
}

/// What a successful commit changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub committed_claim_ids: Vec<String>,
    /// Coupons that reached their ceiling in this commit.
    pub exhausted_coupon_ids: Vec<String>,
}

/// Repository for payment attempts.
#[derive(Debug, Clone)]
pub struct PaymentAttemptRepository {
    pool: SqlitePool,
}

impl PaymentAttemptRepository {
    /// Creates a new PaymentAttemptRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentAttemptRepository { pool }
    }

    /// Records a verified attempt before the gateway is called.
    ///
    /// ## Errors
    /// - `UniqueViolation` on `payment_attempts.order_id` while another
    ///   attempt for the order is PENDING or SUCCEEDED
    pub async fn insert(&self, attempt: &PaymentAttempt) -> DbResult<()> {
        debug!(id = %attempt.id, order_id = %attempt.order_id, "Recording payment attempt");

        let committed = encode_ids(&attempt.id, &attempt.committed_claim_ids)?;

        sqlx::query(
            r#"
            INSERT INTO payment_attempts (
                id, order_id, customer_id, msisdn, currency, claimed_shipping_cents,
                claimed_payable_cents, committed_claim_ids, status, transaction_ref,
                failure_reason, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&attempt.id)
        .bind(&attempt.order_id)
        .bind(&attempt.customer_id)
        .bind(&attempt.msisdn)
        .bind(&attempt.currency)
        .bind(attempt.claimed_shipping_cents)
        .bind(attempt.claimed_payable_cents)
        .bind(committed)
        .bind(attempt.status)
        .bind(&attempt.transaction_ref)
        .bind(&attempt.failure_reason)
        .bind(attempt.created_at)
        .bind(attempt.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets an attempt by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<PaymentAttempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PaymentAttempt::try_from).transpose()
    }

    /// Lists every attempt for an order, oldest first.
    pub async fn list_for_order(&self, order_id: &str) -> DbResult<Vec<PaymentAttempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            r#"
            SELECT {ATTEMPT_COLUMNS} FROM payment_attempts
            WHERE order_id = ?1
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PaymentAttempt::try_from).collect()
    }

    /// The succeeded attempt for an order, if payment already went through.
    pub async fn find_succeeded(&self, order_id: &str) -> DbResult<Option<PaymentAttempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            r#"
            SELECT {ATTEMPT_COLUMNS} FROM payment_attempts
            WHERE order_id = ?1 AND status = 'succeeded'
            ORDER BY updated_at DESC
            LIMIT 1
            "#
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PaymentAttempt::try_from).transpose()
    }

    /// Marks a pending attempt as declined by the gateway.
    pub async fn mark_failed(&self, id: &str, reason: &str, now: DateTime<Utc>) -> DbResult<()> {
        self.settle(id, PaymentAttemptStatus::Failed, None, Some(reason), now)
            .await
    }

    /// Marks a pending attempt whose charge succeeded but could not be
    /// committed. The transaction reference is kept for reversal.
    pub async fn mark_conflicted(
        &self,
        id: &str,
        transaction_ref: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        warn!(attempt_id = %id, transaction_ref = %transaction_ref, "Charged attempt conflicted");
        self.settle(
            id,
            PaymentAttemptStatus::Conflicted,
            Some(transaction_ref),
            Some(reason),
            now,
        )
        .await
    }

    async fn settle(
        &self,
        id: &str,
        status: PaymentAttemptStatus,
        transaction_ref: Option<&str>,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let affected = sqlx::query(
            r#"
            UPDATE payment_attempts
            SET status = ?1, transaction_ref = ?2, failure_reason = ?3, updated_at = ?4
            WHERE id = ?5 AND status = 'pending'
            "#,
        )
        .bind(status)
        .bind(transaction_ref)
        .bind(reason)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(DbError::conflict("payment attempt", id));
        }
        Ok(())
    }

    /// Commits every claim, advances coupon counters and marks the attempt
    /// succeeded, all in one transaction.
    ///
    /// ## Errors
    /// - `Conflict` when a claim is no longer pending, a coupon hit its
    ///   ceiling or left an available state, or the attempt was settled
    pub async fn commit_success(
        &self,
        attempt_id: &str,
        transaction_ref: &str,
        items: &[CommitItem],
        now: DateTime<Utc>,
    ) -> DbResult<CommitOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let mut outcome = CommitOutcome::default();

        for item in items {
            commit_claim(&mut tx, item, now).await?;
            if advance_coupon(&mut tx, item, now).await? == CouponStatus::UsageExhausted {
                outcome.exhausted_coupon_ids.push(item.coupon_id.clone());
            }
            outcome.committed_claim_ids.push(item.claim_id.clone());
        }

        let committed = encode_ids(attempt_id, &outcome.committed_claim_ids)?;
        let affected = sqlx::query(
            r#"
            UPDATE payment_attempts
            SET status = 'succeeded', transaction_ref = ?1, committed_claim_ids = ?2,
                updated_at = ?3
            WHERE id = ?4 AND status = 'pending'
            "#,
        )
        .bind(transaction_ref)
        .bind(committed)
        .bind(now)
        .bind(attempt_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(DbError::conflict("payment attempt", attempt_id));
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        info!(
            attempt_id = %attempt_id,
            claims = outcome.committed_claim_ids.len(),
            exhausted = outcome.exhausted_coupon_ids.len(),
            "Redemption committed"
        );

        Ok(outcome)
    }
}

// =============================================================================
// Commit Steps
// =============================================================================

async fn commit_claim(
    tx: &mut Transaction<'_, Sqlite>,
    item: &CommitItem,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let affected = sqlx::query(
        r#"
        UPDATE redemption_claims
        SET status = 'committed', updated_at = ?1
        WHERE id = ?2 AND status = 'pending'
        "#,
    )
    .bind(now)
    .bind(&item.claim_id)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(DbError::conflict("claim", &item.claim_id));
    }
    Ok(())
}

/// Increments the coupon's redemption count under its ceiling and returns
/// the resulting status.
///
/// SQLite evaluates every SET expression against the pre-update row, so
/// `redemption_count + 1` below is the new count.
async fn advance_coupon(
    tx: &mut Transaction<'_, Sqlite>,
    item: &CommitItem,
    now: DateTime<Utc>,
) -> DbResult<CouponStatus> {
    let result = match item.scope {
        CouponScope::General => {
            sqlx::query(
                r#"
                UPDATE coupons
                SET redemption_count = redemption_count + 1,
                    status = CASE WHEN redemption_count + 1 >= usage_limit
                                  THEN 'usage_exhausted' ELSE 'active' END,
                    enabled = CASE WHEN redemption_count + 1 >= usage_limit
                                   THEN 0 ELSE 1 END,
                    updated_at = ?1
                WHERE id = ?2
                  AND scope = 'general'
                  AND enabled = 1
                  AND status IN ('unused', 'active')
                  AND redemption_count < usage_limit
                "#,
            )
            .bind(now)
            .bind(&item.coupon_id)
            .execute(&mut **tx)
            .await?
        }
        CouponScope::CustomerBound => {
            // The claim is already COMMITTED in this transaction, which also
            // holds the write lock, so this count includes it and is stable.
            let owner_committed: i64 = sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM redemption_claims
                WHERE coupon_id = ?1 AND customer_id = ?2 AND status = 'committed'
                "#,
            )
            .bind(&item.coupon_id)
            .bind(&item.customer_id)
            .fetch_one(&mut **tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE coupons
                SET redemption_count = redemption_count + 1,
                    status = CASE WHEN ?1 >= usage_limit
                                  THEN 'usage_exhausted' ELSE 'active' END,
                    enabled = CASE WHEN ?1 >= usage_limit THEN 0 ELSE 1 END,
                    updated_at = ?2
                WHERE id = ?3
                  AND scope = 'customer_bound'
                  AND owner_customer_id = ?4
                  AND enabled = 1
                  AND status IN ('unused', 'active')
                  AND ?1 <= usage_limit
                "#,
            )
            .bind(owner_committed)
            .bind(now)
            .bind(&item.coupon_id)
            .bind(&item.customer_id)
            .execute(&mut **tx)
            .await?
        }
    };

    if result.rows_affected() == 0 {
        return Err(DbError::conflict("coupon", &item.coupon_id));
    }

    let status: CouponStatus = sqlx::query_scalar("SELECT status FROM coupons WHERE id = ?1")
        .bind(&item.coupon_id)
        .fetch_one(&mut **tx)
        .await?;

    Ok(status)
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
struct AttemptRow {
    id: String,
    order_id: String,
    customer_id: String,
    msisdn: String,
    currency: String,
    claimed_shipping_cents: i64,
    claimed_payable_cents: i64,
    committed_claim_ids: String,
    status: PaymentAttemptStatus,
    transaction_ref: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AttemptRow> for PaymentAttempt {
    type Error = DbError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        let committed_claim_ids: Vec<String> = serde_json::from_str(&row.committed_claim_ids)
            .map_err(|e| DbError::corrupt("payment attempt", &row.id, e))?;

        Ok(PaymentAttempt {
            id: row.id,
            order_id: row.order_id,
            customer_id: row.customer_id,
            msisdn: row.msisdn,
            currency: row.currency,
            claimed_shipping_cents: row.claimed_shipping_cents,
            claimed_payable_cents: row.claimed_payable_cents,
            committed_claim_ids,
            status: row.status,
            transaction_ref: row.transaction_ref,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn encode_ids(attempt_id: &str, ids: &[String]) -> DbResult<String> {
    serde_json::to_string(ids).map_err(|e| DbError::corrupt("payment attempt", attempt_id, e))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::test_support::{bound_coupon, general_coupon, pending_attempt, pending_claim};
    use discount_core::{ClaimStatus, Coupon};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn item(claim_id: &str, coupon: &Coupon, customer: &str) -> CommitItem {
        CommitItem {
            claim_id: claim_id.to_string(),
            coupon_id: coupon.id.clone(),
            customer_id: customer.to_string(),
            scope: coupon.scope,
        }
    }

    #[tokio::test]
    async fn test_commit_general_claim() {
        let db = db().await;
        let mut coupon = general_coupon("GEN00001");
        coupon.usage_limit = 2;
        db.coupons().insert(&coupon).await.unwrap();
        let claim = pending_claim("alice", "order-1", &coupon.id);
        db.claims().insert(&claim).await.unwrap();
        let attempt = pending_attempt("order-1", "alice");
        db.attempts().insert(&attempt).await.unwrap();

        let outcome = db
            .attempts()
            .commit_success(&attempt.id, "TX-1", &[item(&claim.id, &coupon, "alice")], Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.committed_claim_ids, vec![claim.id.clone()]);
        assert!(outcome.exhausted_coupon_ids.is_empty());

        let stored = db.coupons().get_by_id(&coupon.id).await.unwrap().unwrap();
        assert_eq!(stored.redemption_count, 1);
        assert_eq!(stored.status, CouponStatus::Active);
        assert!(stored.enabled);

        let stored_attempt = db.attempts().get_by_id(&attempt.id).await.unwrap().unwrap();
        assert_eq!(stored_attempt.status, PaymentAttemptStatus::Succeeded);
        assert_eq!(stored_attempt.transaction_ref.as_deref(), Some("TX-1"));
        assert_eq!(stored_attempt.committed_claim_ids, vec![claim.id.clone()]);

        let found = db.attempts().find_succeeded("order-1").await.unwrap().unwrap();
        assert_eq!(found.id, attempt.id);
    }

    #[tokio::test]
    async fn test_general_ceiling_rejects_and_rolls_back() {
        let db = db().await;
        let coupon = general_coupon("GEN00001");
        db.coupons().insert(&coupon).await.unwrap();

        let first = pending_claim("alice", "order-1", &coupon.id);
        let second = pending_claim("bob", "order-2", &coupon.id);
        db.claims().insert(&first).await.unwrap();
        db.claims().insert(&second).await.unwrap();
        let a1 = pending_attempt("order-1", "alice");
        let a2 = pending_attempt("order-2", "bob");
        db.attempts().insert(&a1).await.unwrap();
        db.attempts().insert(&a2).await.unwrap();

        let outcome = db
            .attempts()
            .commit_success(&a1.id, "TX-1", &[item(&first.id, &coupon, "alice")], Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.exhausted_coupon_ids, vec![coupon.id.clone()]);

        let err = db
            .attempts()
            .commit_success(&a2.id, "TX-2", &[item(&second.id, &coupon, "bob")], Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "got {err:?}");

        // Rolled back: the losing claim is still pending and the count held.
        let claim = db.claims().get_by_id(&second.id).await.unwrap().unwrap();
        assert_eq!(claim.status, ClaimStatus::Pending);
        let stored = db.coupons().get_by_id(&coupon.id).await.unwrap().unwrap();
        assert_eq!(stored.redemption_count, 1);
        assert_eq!(stored.status, CouponStatus::UsageExhausted);
        assert!(!stored.enabled);
    }

    #[tokio::test]
    async fn test_bound_coupon_exhausts_at_owner_ceiling() {
        let db = db().await;
        let mut coupon = bound_coupon("CODE0001", "alice");
        coupon.usage_limit = 2;
        db.coupons().insert(&coupon).await.unwrap();

        for (n, order) in ["order-1", "order-2"].into_iter().enumerate() {
            let claim = pending_claim("alice", order, &coupon.id);
            db.claims().insert(&claim).await.unwrap();
            let attempt = pending_attempt(order, "alice");
            db.attempts().insert(&attempt).await.unwrap();

            let outcome = db
                .attempts()
                .commit_success(&attempt.id, "TX", &[item(&claim.id, &coupon, "alice")], Utc::now())
                .await
                .unwrap();
            assert_eq!(outcome.exhausted_coupon_ids.is_empty(), n == 0);
        }

        assert_eq!(db.claims().count_committed(&coupon.id, "alice").await.unwrap(), 2);
        let stored = db.coupons().get_by_id(&coupon.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CouponStatus::UsageExhausted);
        assert_eq!(stored.redemption_count, 2);
        assert!(!stored.enabled);
    }

    #[tokio::test]
    async fn test_settled_attempt_cannot_commit() {
        let db = db().await;
        let coupon = general_coupon("GEN00001");
        db.coupons().insert(&coupon).await.unwrap();
        let claim = pending_claim("alice", "order-1", &coupon.id);
        db.claims().insert(&claim).await.unwrap();
        let attempt = pending_attempt("order-1", "alice");
        db.attempts().insert(&attempt).await.unwrap();

        db.attempts()
            .mark_failed(&attempt.id, "insufficient funds", Utc::now())
            .await
            .unwrap();

        let err = db
            .attempts()
            .commit_success(&attempt.id, "TX-1", &[item(&claim.id, &coupon, "alice")], Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let stored = db.coupons().get_by_id(&coupon.id).await.unwrap().unwrap();
        assert_eq!(stored.redemption_count, 0);

        let history = db.attempts().list_for_order("order-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, PaymentAttemptStatus::Failed);
        assert_eq!(history[0].failure_reason.as_deref(), Some("insufficient funds"));
    }

    #[tokio::test]
    async fn test_one_in_flight_attempt_per_order() {
        let db = db().await;
        let first = pending_attempt("order-1", "alice");
        db.attempts().insert(&first).await.unwrap();

        let err = db
            .attempts()
            .insert(&pending_attempt("order-1", "alice"))
            .await
            .unwrap_err();
        assert!(err.is_unique_on("payment_attempts.order_id"), "got {err:?}");

        // Other orders are unaffected.
        db.attempts()
            .insert(&pending_attempt("order-2", "alice"))
            .await
            .unwrap();

        // A declined attempt releases the order.
        db.attempts()
            .mark_failed(&first.id, "insufficient funds", Utc::now())
            .await
            .unwrap();
        let retry = pending_attempt("order-1", "alice");
        db.attempts().insert(&retry).await.unwrap();

        // A succeeded attempt keeps it.
        db.attempts()
            .commit_success(&retry.id, "TX-1", &[], Utc::now())
            .await
            .unwrap();
        let err = db
            .attempts()
            .insert(&pending_attempt("order-1", "alice"))
            .await
            .unwrap_err();
        assert!(err.is_unique_on("payment_attempts.order_id"), "got {err:?}");
        assert_eq!(db.attempts().list_for_order("order-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mark_conflicted_keeps_reference() {
        let db = db().await;
        let attempt = pending_attempt("order-1", "alice");
        db.attempts().insert(&attempt).await.unwrap();

        db.attempts()
            .mark_conflicted(&attempt.id, "TX-9", "usage ceiling reached", Utc::now())
            .await
            .unwrap();

        let stored = db.attempts().get_by_id(&attempt.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentAttemptStatus::Conflicted);
        assert_eq!(stored.transaction_ref.as_deref(), Some("TX-9"));
    }
}
