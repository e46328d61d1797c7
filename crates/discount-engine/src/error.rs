//! # Engine Errors
//!
//! Every failure a caller of the discount engine can observe.
//!
//! ## Error Kinds
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Claim path            Issuance path          Payment path              │
//! │  ──────────            ─────────────          ────────────              │
//! │  OrderNotPayable       DuplicateGeneral...    InvalidMsisdn            │
//! │  CouponNotFound        OwnerRequired          AmountMismatch           │
//! │  ScopeNotSupported     CodeSpaceExhausted     GatewayFailure           │
//! │  Expired / Cancelled                          ConcurrentUpdateConflict │
//! │  UsageExceeded / NotOwned                                              │
//! │  DuplicateClaim                                                         │
//! │                                                                         │
//! │  Only ConcurrentUpdateConflict is retryable (once, from the top).      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use discount_core::{Availability, CoreError, Money, OrderStatus, ValidationError};
use discount_db::DbError;
use serde::Serialize;
use thiserror::Error;

use crate::collaborators::CollaboratorError;

/// Errors returned by the engine services.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {order_id} is not awaiting payment (status: {status:?})")]
    OrderNotPayable { order_id: String, status: OrderStatus },

    #[error("Coupon not found: {0}")]
    CouponNotFound(String),

    /// The coupon's applicability rule excludes this order.
    #[error("Coupon {coupon_id} does not apply to order {order_id}")]
    ScopeNotSupported { coupon_id: String, order_id: String },

    #[error("Coupon {0} has expired")]
    Expired(String),

    #[error("Coupon {0} has been cancelled")]
    Cancelled(String),

    #[error("Coupon {0} has reached its usage limit")]
    UsageExceeded(String),

    #[error("Coupon {coupon_id} is not owned by customer {customer_id}")]
    NotOwned {
        coupon_id: String,
        customer_id: String,
    },

    /// A pending claim for this (order, coupon) already exists.
    #[error("Coupon {coupon_id} is already applied to order {order_id}")]
    DuplicateClaim { order_id: String, coupon_id: String },

    #[error("An active general coupon already exists")]
    DuplicateGeneralCoupon,

    #[error("Customer-bound coupons require an owner")]
    OwnerRequired,

    #[error("No free coupon code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: u32 },

    #[error("Invalid MSISDN: {0}")]
    InvalidMsisdn(String),

    /// Client-submitted figures differ from the recomputed ones.
    #[error(
        "Amount mismatch: expected shipping {expected_shipping} and payable {expected_payable}, \
         got {client_shipping} and {client_payable}"
    )]
    AmountMismatch {
        expected_shipping: Money,
        expected_payable: Money,
        client_shipping: Money,
        client_payable: Money,
    },

    #[error("Payment gateway failure: {0}")]
    GatewayFailure(String),

    /// A conditional update matched zero rows.
    #[error("Concurrent update on {entity} {id}")]
    ConcurrentUpdateConflict { entity: String, id: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(DbError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Closed set of error kinds for hosts mapping errors to a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    OrderNotFound,
    OrderNotPayable,
    CouponNotFound,
    ScopeNotSupported,
    Expired,
    Cancelled,
    UsageExceeded,
    NotOwned,
    DuplicateClaim,
    DuplicateGeneralCoupon,
    OwnerRequired,
    CodeSpaceExhausted,
    InvalidMsisdn,
    AmountMismatch,
    GatewayFailure,
    ConcurrentUpdateConflict,
    Validation,
    Store,
    Collaborator,
    Config,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::OrderNotFound(_) => ErrorKind::OrderNotFound,
            EngineError::OrderNotPayable { .. } => ErrorKind::OrderNotPayable,
            EngineError::CouponNotFound(_) => ErrorKind::CouponNotFound,
            EngineError::ScopeNotSupported { .. } => ErrorKind::ScopeNotSupported,
            EngineError::Expired(_) => ErrorKind::Expired,
            EngineError::Cancelled(_) => ErrorKind::Cancelled,
            EngineError::UsageExceeded(_) => ErrorKind::UsageExceeded,
            EngineError::NotOwned { .. } => ErrorKind::NotOwned,
            EngineError::DuplicateClaim { .. } => ErrorKind::DuplicateClaim,
            EngineError::DuplicateGeneralCoupon => ErrorKind::DuplicateGeneralCoupon,
            EngineError::OwnerRequired => ErrorKind::OwnerRequired,
            EngineError::CodeSpaceExhausted { .. } => ErrorKind::CodeSpaceExhausted,
            EngineError::InvalidMsisdn(_) => ErrorKind::InvalidMsisdn,
            EngineError::AmountMismatch { .. } => ErrorKind::AmountMismatch,
            EngineError::GatewayFailure(_) => ErrorKind::GatewayFailure,
            EngineError::ConcurrentUpdateConflict { .. } => ErrorKind::ConcurrentUpdateConflict,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Store(_) => ErrorKind::Store,
            EngineError::Collaborator(_) => ErrorKind::Collaborator,
            EngineError::Config(_) => ErrorKind::Config,
        }
    }

    /// True when the whole operation may be retried once from the top.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ConcurrentUpdateConflict
    }

    /// Maps a non-available availability result to its error.
    ///
    /// Returns `None` for [`Availability::Available`].
    pub fn from_availability(
        availability: Availability,
        coupon_id: &str,
        customer_id: &str,
    ) -> Option<Self> {
        let coupon_id = coupon_id.to_string();
        match availability {
            Availability::Available => None,
            Availability::Expired => Some(EngineError::Expired(coupon_id)),
            Availability::Cancelled => Some(EngineError::Cancelled(coupon_id)),
            Availability::UsageExceeded => Some(EngineError::UsageExceeded(coupon_id)),
            Availability::NotOwned => Some(EngineError::NotOwned {
                coupon_id,
                customer_id: customer_id.to_string(),
            }),
        }
    }
}

/// Conditional-update misses surface as `ConcurrentUpdateConflict`;
/// everything else is a store failure.
impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict { entity, id } => EngineError::ConcurrentUpdateConflict { entity, id },
            other => EngineError::Store(other),
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => EngineError::Validation(v),
            other => EngineError::Config(other.to_string()),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
