//! # Coupon Repository
//!
//! Database operations for coupons.
//!
//! ## Write Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every write to status / enabled / redemption_count is CONDITIONAL     │
//! │                                                                         │
//! │  insert()            status=unused, count=0, enabled=1                 │
//! │  write_back_status() WHERE status IN ('unused','active')               │
//! │  cancel()            WHERE status <> 'cancelled'  (+ void claims)      │
//! │  increment           see PaymentAttemptRepository::commit_success      │
//! │                                                                         │
//! │  A zero-row result means another request got there first; callers     │
//! │  re-read instead of overwriting.                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use discount_core::{Coupon, CouponScope, CouponStatus, DurationUnit};

const COUPON_COLUMNS: &str = r#"
    id, code, scope, owner_customer_id, rate_bps, usage_limit,
    redemption_count, duration_amount, duration_unit, issued_at,
    status, enabled, applicable_categories, created_at, updated_at
"#;

/// Repository for coupon database operations.
#[derive(Debug, Clone)]
pub struct CouponRepository {
    pool: SqlitePool,
}

/// What a cancellation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOutcome {
    /// False when the coupon was already cancelled.
    pub cancelled: bool,
    /// Pending claims moved to VOIDED.
    pub voided_claims: u64,
}

impl CouponRepository {
    /// Creates a new CouponRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CouponRepository { pool }
    }

    /// Inserts a freshly issued coupon.
    ///
    /// ## Errors
    /// - `UniqueViolation` on `coupons.code` when the code is taken by a live coupon
    /// - `UniqueViolation` on `coupons.scope` when an available general coupon exists
    pub async fn insert(&self, coupon: &Coupon) -> DbResult<()> {
        debug!(id = %coupon.id, code = %coupon.code, scope = ?coupon.scope, "Inserting coupon");

        let categories = encode_categories(coupon)?;

        sqlx::query(
            r#"
            INSERT INTO coupons (
                id, code, scope, owner_customer_id, rate_bps, usage_limit,
                redemption_count, duration_amount, duration_unit, issued_at,
                status, enabled, applicable_categories, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&coupon.id)
        .bind(&coupon.code)
        .bind(coupon.scope)
        .bind(&coupon.owner_customer_id)
        .bind(coupon.rate_bps as i64)
        .bind(coupon.usage_limit)
        .bind(coupon.redemption_count)
        .bind(coupon.duration_amount)
        .bind(coupon.duration_unit)
        .bind(coupon.issued_at)
        .bind(coupon.status)
        .bind(coupon.enabled)
        .bind(categories)
        .bind(coupon.created_at)
        .bind(coupon.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a coupon by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Coupon::try_from).transpose()
    }

    /// Gets the live (non-cancelled) coupon carrying `code`.
    ///
    /// `code` must already be normalized.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE code = ?1 AND status <> 'cancelled'"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Coupon::try_from).transpose()
    }

    /// True when a non-cancelled coupon already uses `code`.
    pub async fn code_in_use(&self, code: &str) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM coupons WHERE code = ?1 AND status <> 'cancelled'",
        )
        .bind(code)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// The general coupon whose stored state is still enabled and available.
    ///
    /// The stored state may be stale (expired but not yet written back).
    pub async fn find_live_general(&self) -> DbResult<Option<Coupon>> {
        let row = sqlx::query_as::<_, CouponRow>(&format!(
            r#"
            SELECT {COUPON_COLUMNS} FROM coupons
            WHERE scope = 'general' AND enabled = 1 AND status IN ('unused', 'active')
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Coupon::try_from).transpose()
    }

    /// Lists coupons bound to `owner`, newest first.
    pub async fn list_for_owner(&self, owner: &str) -> DbResult<Vec<Coupon>> {
        let rows = sqlx::query_as::<_, CouponRow>(&format!(
            r#"
            SELECT {COUPON_COLUMNS} FROM coupons
            WHERE scope = 'customer_bound' AND owner_customer_id = ?1
            ORDER BY issued_at DESC
            "#
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Coupon::try_from).collect()
    }

    /// Persists a lazily computed EXPIRED or USAGE_EXHAUSTED status.
    ///
    /// Only moves coupons out of an available state and always clears
    /// `enabled`. Returns false when the row had already left that state.
    pub async fn write_back_status(
        &self,
        id: &str,
        status: CouponStatus,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE coupons
            SET status = ?1, enabled = 0, updated_at = ?2
            WHERE id = ?3 AND status IN ('unused', 'active')
            "#,
        )
        .bind(status)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        let written = result.rows_affected() == 1;
        if written {
            info!(coupon_id = %id, status = ?status, "Coupon status written back");
        }
        Ok(written)
    }

    /// Cancels a coupon and voids its pending claims in one transaction.
    pub async fn cancel(&self, id: &str, now: DateTime<Utc>) -> DbResult<CancelOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM coupons WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(DbError::not_found("Coupon", id));
        }

        let cancelled = sqlx::query(
            r#"
            UPDATE coupons
            SET status = 'cancelled', enabled = 0, updated_at = ?1
            WHERE id = ?2 AND status <> 'cancelled'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let voided_claims = sqlx::query(
            r#"
            UPDATE redemption_claims
            SET status = 'voided', updated_at = ?1
            WHERE coupon_id = ?2 AND status = 'pending'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        info!(coupon_id = %id, cancelled, voided_claims, "Coupon cancelled");

        Ok(CancelOutcome {
            cancelled,
            voided_claims,
        })
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, Clone, sqlx::FromRow)]
struct CouponRow {
    id: String,
    code: String,
    scope: CouponScope,
    owner_customer_id: Option<String>,
    rate_bps: i64,
    usage_limit: i64,
    redemption_count: i64,
    duration_amount: i64,
    duration_unit: DurationUnit,
    issued_at: DateTime<Utc>,
    status: CouponStatus,
    enabled: bool,
    applicable_categories: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = DbError;

    fn try_from(row: CouponRow) -> Result<Self, Self::Error> {
        let rate_bps =
            u32::try_from(row.rate_bps).map_err(|e| DbError::corrupt("coupon", &row.id, e))?;

        let applicable_categories = row
            .applicable_categories
            .as_deref()
            .map(serde_json::from_str::<Vec<String>>)
            .transpose()
            .map_err(|e| DbError::corrupt("coupon", &row.id, e))?;

        Ok(Coupon {
            id: row.id,
            code: row.code,
            scope: row.scope,
            owner_customer_id: row.owner_customer_id,
            rate_bps,
            usage_limit: row.usage_limit,
            redemption_count: row.redemption_count,
            duration_amount: row.duration_amount,
            duration_unit: row.duration_unit,
            issued_at: row.issued_at,
            status: row.status,
            enabled: row.enabled,
            applicable_categories,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn encode_categories(coupon: &Coupon) -> DbResult<Option<String>> {
    coupon
        .applicable_categories
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DbError::corrupt("coupon", &coupon.id, e))
}

// =============================================================================
// Unit Tests
// =============================================================================
