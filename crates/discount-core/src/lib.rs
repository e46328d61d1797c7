//! # discount-core: Pure Coupon Rules
//!
//! This crate holds every rule of the discount engine that can be expressed
//! without I/O: money arithmetic, expiry computation, the lazy status
//! function, availability decisions, and payable reconciliation math.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Discount Engine Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                discount-engine (services)                       │   │
//! │  │  CouponLifecycle ──► RedemptionManager ──► PaymentReconciler    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ discount-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────┐ │   │
//! │  │   │  money   │ │  clock   │ │  status  │ │ pricing  │ │types │ │   │
//! │  │   │  Money   │ │expires_at│ │ evaluate │ │ payable  │ │Coupon│ │   │
//! │  │   │  Rate    │ │  units   │ │ avail.   │ │ shipping │ │Claim │ │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────┘ └──────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 discount-db (coupon store)                      │   │
//! │  │        SQLite queries, migrations, conditional updates          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Coupon, RedemptionClaim, Order, PaymentAttempt)
//! - [`money`] - Money and DiscountRate with integer arithmetic
//! - [`clock`] - Duration units and expiry instants
//! - [`status`] - Lazy coupon status and availability decisions
//! - [`pricing`] - Shipping, discount and payable computation
//! - [`validation`] - Input validation (coupon specs, amounts, MSISDN)
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use discount_core::money::{DiscountRate, Money};
//!
//! let subtotal = Money::from_cents(10_000);
//! let rate = DiscountRate::from_fraction(0.2);
//!
//! assert_eq!(subtotal.portion(rate).cents(), 2_000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod error;
pub mod money;
pub mod pricing;
pub mod status;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use clock::{expires_at, DurationUnit};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::{DiscountRate, Money};
pub use pricing::PayableBreakdown;
pub use status::{availability, evaluate_status, needs_write_back, Availability};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Smallest discount a coupon may carry, in basis points (10%).
pub const MIN_DISCOUNT_BPS: u32 = 1_000;

/// Largest discount a coupon may carry, in basis points (80%).
pub const MAX_DISCOUNT_BPS: u32 = 8_000;

/// Basis points in one whole (100%).
pub const BPS_SCALE: u32 = 10_000;
