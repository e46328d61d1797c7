//! # discount-db: Coupon Store
//!
//! SQLite persistence for coupons, redemption claims and payment attempts.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Discount Engine Data Flow                           │
//! │                                                                         │
//! │  RedemptionManager / PaymentReconciler (discount-engine)               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  discount-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ CouponRepo    │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ ClaimRepo     │    │ 001_discount │  │   │
//! │  │   │               │    │ AttemptRepo   │    │   _schema    │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL) ─ partial unique indexes + conditional updates           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use discount_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("discount.db")).await?;
//! let coupon = db.coupons().get_by_code("AB12CD34").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::attempt::{CommitItem, CommitOutcome, PaymentAttemptRepository};
pub use repository::claim::ClaimRepository;
pub use repository::coupon::{CancelOutcome, CouponRepository};
