//! # Error Types
//!
//! Domain-specific error types for discount-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  discount-core errors (this file)                                      │
//! │  ├── CoreError        - Parsing and domain rule errors                 │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  discount-db errors (separate crate)                                   │
//! │  └── DbError          - Coupon store failures                          │
//! │                                                                         │
//! │  discount-engine errors                                                │
//! │  └── EngineError      - What callers see (typed error kinds)           │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A duration unit name is not one of the recognized units.
    ///
    /// ## When This Occurs
    /// - Config or admin input says `"fortnights"`
    /// - A stored row was written by a newer schema
    #[error("Invalid duration unit: {0}")]
    InvalidUnit(String),

    /// A stored or submitted status string is not a known variant.
    #[error("Invalid {entity} status: {value}")]
    InvalidStatus { entity: String, value: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when administrator or client input doesn't meet
/// requirements. Used for early validation before any store access.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., non-digit phone number).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Field is present where the rules forbid it.
    #[error("{field} is not allowed: {reason}")]
    NotAllowed { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
