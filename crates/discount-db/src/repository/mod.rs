//! # Repository Module
//!
//! Coupon store repositories.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Engine service                                                        │
//! │       │                                                                 │
//! │       │  db.coupons().get_by_code("AB12CD34")                           │
//! │       ▼                                                                 │
//! │  CouponRepository            ClaimRepository                           │
//! │  ├── insert / get_by_*       ├── insert / find_pending                 │
//! │  ├── write_back_status       ├── list_for_order                        │
//! │  └── cancel (+ void claims)  └── count_committed / expire_pending      │
//! │                                                                         │
//! │  PaymentAttemptRepository                                              │
//! │  ├── insert / mark_failed / mark_conflicted                            │
//! │  └── commit_success (claims + coupons + attempt, one transaction)      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod attempt;
pub mod claim;
pub mod coupon;
