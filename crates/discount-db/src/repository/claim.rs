//! # Claim Repository
//!
//! Database operations for redemption claims.
//!
//! ## Claim Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   insert() ──► PENDING ──┬── commit_success() ──► COMMITTED            │
//! │                          ├── expire_pending_for_coupon() ──► EXPIRED   │
//! │                          └── CouponRepository::cancel() ──► VOIDED     │
//! │                                                                         │
//! │   One PENDING claim per (order_id, coupon_id), enforced by a partial   │
//! │   unique index.                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;
use discount_core::{ClaimStatus, RedemptionClaim};

/// Repository for redemption claim operations.
#[derive(Debug, Clone)]
pub struct ClaimRepository {
    pool: SqlitePool,
}

impl ClaimRepository {
    /// Creates a new ClaimRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ClaimRepository { pool }
    }

    /// Inserts a claim.
    ///
    /// ## Errors
    /// - `UniqueViolation` on `redemption_claims.order_id` when a pending claim
    ///   for the same (order, coupon) exists
    /// - `ForeignKeyViolation` when the coupon does not exist
    pub async fn insert(&self, claim: &RedemptionClaim) -> DbResult<()> {
        debug!(
            id = %claim.id,
            order_id = %claim.order_id,
            coupon_id = %claim.coupon_id,
            "Inserting claim"
        );

        sqlx::query(
            r#"
            INSERT INTO redemption_claims (
                id, customer_id, order_id, coupon_id, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&claim.id)
        .bind(&claim.customer_id)
        .bind(&claim.order_id)
        .bind(&claim.coupon_id)
        .bind(claim.status)
        .bind(claim.created_at)
        .bind(claim.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a claim by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<RedemptionClaim>> {
        let claim = sqlx::query_as::<_, ClaimRow>(
            r#"
            SELECT id, customer_id, order_id, coupon_id, status, created_at, updated_at
            FROM redemption_claims
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claim.map(Into::into))
    }

    /// The pending claim for `(order_id, coupon_id)`, if any.
    pub async fn find_pending(
        &self,
        order_id: &str,
        coupon_id: &str,
    ) -> DbResult<Option<RedemptionClaim>> {
        let claim = sqlx::query_as::<_, ClaimRow>(
            r#"
            SELECT id, customer_id, order_id, coupon_id, status, created_at, updated_at
            FROM redemption_claims
            WHERE order_id = ?1 AND coupon_id = ?2 AND status = 'pending'
            "#,
        )
        .bind(order_id)
        .bind(coupon_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claim.map(Into::into))
    }

    /// Lists every claim on an order in creation order.
    pub async fn list_for_order(&self, order_id: &str) -> DbResult<Vec<RedemptionClaim>> {
        let rows = sqlx::query_as::<_, ClaimRow>(
            r#"
            SELECT id, customer_id, order_id, coupon_id, status, created_at, updated_at
            FROM redemption_claims
            WHERE order_id = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Lists the pending claims on an order.
    pub async fn list_pending_for_order(&self, order_id: &str) -> DbResult<Vec<RedemptionClaim>> {
        let claims = self.list_for_order(order_id).await?;
        Ok(claims.into_iter().filter(RedemptionClaim::is_pending).collect())
    }

    /// Counts `customer_id`'s committed claims against `coupon_id`.
    pub async fn count_committed(&self, coupon_id: &str, customer_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM redemption_claims
            WHERE coupon_id = ?1 AND customer_id = ?2 AND status = 'committed'
            "#,
        )
        .bind(coupon_id)
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Moves every pending claim of an expired coupon to EXPIRED.
    pub async fn expire_pending_for_coupon(
        &self,
        coupon_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        let expired = sqlx::query(
            r#"
            UPDATE redemption_claims
            SET status = 'expired', updated_at = ?1
            WHERE coupon_id = ?2 AND status = 'pending'
            "#,
        )
        .bind(now)
        .bind(coupon_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if expired > 0 {
            info!(coupon_id = %coupon_id, expired, "Pending claims expired");
        }
        Ok(expired)
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
struct ClaimRow {
    id: String,
    customer_id: String,
    order_id: String,
    coupon_id: String,
    status: ClaimStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ClaimRow> for RedemptionClaim {
    fn from(row: ClaimRow) -> Self {
        RedemptionClaim {
            id: row.id,
            customer_id: row.customer_id,
            order_id: row.order_id,
            coupon_id: row.coupon_id,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::pool::{Database, DbConfig};
    use crate::repository::test_support::{bound_coupon, general_coupon, pending_claim};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_one_pending_claim_per_order_and_coupon() {
        let db = db().await;
        let coupon = general_coupon("GEN00001");
        db.coupons().insert(&coupon).await.unwrap();

        let first = pending_claim("alice", "order-1", &coupon.id);
        db.claims().insert(&first).await.unwrap();

        let second = pending_claim("alice", "order-1", &coupon.id);
        let err = db.claims().insert(&second).await.unwrap_err();
        assert!(err.is_unique_on("redemption_claims.order_id"), "got {err:?}");

        // A different order is fine.
        db.claims()
            .insert(&pending_claim("alice", "order-2", &coupon.id))
            .await
            .unwrap();

        let found = db.claims().find_pending("order-1", &coupon.id).await.unwrap();
        assert_eq!(found.map(|c| c.id), Some(first.id));
    }

    #[tokio::test]
    async fn test_claim_requires_existing_coupon() {
        let db = db().await;
        let err = db
            .claims()
            .insert(&pending_claim("alice", "order-1", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_expire_pending_for_coupon() {
        let db = db().await;
        let coupon = bound_coupon("CODE0001", "alice");
        db.coupons().insert(&coupon).await.unwrap();
        db.claims()
            .insert(&pending_claim("alice", "order-1", &coupon.id))
            .await
            .unwrap();
        db.claims()
            .insert(&pending_claim("alice", "order-2", &coupon.id))
            .await
            .unwrap();

        let expired = db
            .claims()
            .expire_pending_for_coupon(&coupon.id, Utc::now())
            .await
            .unwrap();
        assert_eq!(expired, 2);
        assert!(db.claims().list_pending_for_order("order-1").await.unwrap().is_empty());

        let all = db.claims().list_for_order("order-1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, ClaimStatus::Expired);
    }

    #[tokio::test]
    async fn test_count_committed_starts_at_zero() {
        let db = db().await;
        let coupon = bound_coupon("CODE0001", "alice");
        db.coupons().insert(&coupon).await.unwrap();
        db.claims()
            .insert(&pending_claim("alice", "order-1", &coupon.id))
            .await
            .unwrap();

        assert_eq!(db.claims().count_committed(&coupon.id, "alice").await.unwrap(), 0);
    }
}
