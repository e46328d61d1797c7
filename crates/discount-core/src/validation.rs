//! # Validation Module
//!
//! Input validation for coupon issuance and payment submission.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE                                                  │
//! │  ├── Fraction, usage limit and duration ranges                         │
//! │  ├── Scope/owner consistency                                           │
//! │  └── MSISDN carrier prefixes, client amounts                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Engine services                                              │
//! │  └── Order state, availability, amount reconciliation                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK constraints on coupons                                      │
//! │  └── Partial UNIQUE indexes (one general coupon, one pending claim)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use discount_core::validation::{validate_fraction, MsisdnPolicy};
//!
//! assert_eq!(validate_fraction(0.2).unwrap().bps(), 2_000);
//! assert_eq!(MsisdnPolicy::default().validate("+254712345678").unwrap(), "254712345678");
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::money::{DiscountRate, Money};
use crate::types::{CouponScope, NewCoupon};
use crate::{MAX_DISCOUNT_BPS, MIN_DISCOUNT_BPS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Coupon Validators
// =============================================================================

/// Validates a discount fraction and converts it to basis points.
///
/// ## Rules
/// - Must be a finite number
/// - Must lie in `[0.1, 0.8]`
///
/// ## Example
/// ```rust
/// use discount_core::validation::validate_fraction;
///
/// assert!(validate_fraction(0.1).is_ok());
/// assert!(validate_fraction(0.8).is_ok());
/// assert!(validate_fraction(0.05).is_err());
/// assert!(validate_fraction(0.81).is_err());
/// ```
pub fn validate_fraction(fraction: f64) -> ValidationResult<DiscountRate> {
    let out_of_range = || ValidationError::OutOfRange {
        field: "fraction".to_string(),
        min: MIN_DISCOUNT_BPS as i64,
        max: MAX_DISCOUNT_BPS as i64,
    };

    if !fraction.is_finite() {
        return Err(out_of_range());
    }

    let rate = DiscountRate::from_fraction(fraction);
    if !(MIN_DISCOUNT_BPS..=MAX_DISCOUNT_BPS).contains(&rate.bps()) {
        return Err(out_of_range());
    }

    Ok(rate)
}

/// Validates a usage limit (must be at least 1).
pub fn validate_usage_limit(limit: i64) -> ValidationResult<()> {
    if limit < 1 {
        return Err(ValidationError::MustBePositive {
            field: "usage_limit".to_string(),
        });
    }
    Ok(())
}

/// Validates a duration amount (must be at least 1).
pub fn validate_duration(amount: i64) -> ValidationResult<()> {
    if amount < 1 {
        return Err(ValidationError::MustBePositive {
            field: "duration_amount".to_string(),
        });
    }
    Ok(())
}

/// Validates the scope/owner pairing.
///
/// CUSTOMER_BOUND requires a non-empty owner; GENERAL forbids one.
pub fn validate_owner(scope: CouponScope, owner: Option<&str>) -> ValidationResult<()> {
    let owner = owner.map(str::trim).filter(|o| !o.is_empty());

    match (scope, owner) {
        (CouponScope::CustomerBound, None) => Err(ValidationError::Required {
            field: "owner_customer_id".to_string(),
        }),
        (CouponScope::General, Some(_)) => Err(ValidationError::NotAllowed {
            field: "owner_customer_id".to_string(),
            reason: "general coupons have no owner".to_string(),
        }),
        _ => Ok(()),
    }
}

/// Validates applicable categories when a restriction is present.
pub fn validate_categories(categories: Option<&[String]>) -> ValidationResult<()> {
    let Some(categories) = categories else {
        return Ok(());
    };

    if categories.is_empty() {
        return Err(ValidationError::Required {
            field: "applicable_categories".to_string(),
        });
    }

    if categories.iter().any(|c| c.trim().is_empty()) {
        return Err(ValidationError::InvalidFormat {
            field: "applicable_categories".to_string(),
            reason: "category names must not be blank".to_string(),
        });
    }

    Ok(())
}

impl NewCoupon {
    /// Runs every field check and returns the validated rate.
    pub fn validate(&self) -> ValidationResult<DiscountRate> {
        let rate = validate_fraction(self.fraction)?;
        validate_usage_limit(self.usage_limit)?;
        validate_duration(self.duration_amount)?;
        validate_categories(self.applicable_categories.as_deref())?;
        validate_owner(self.scope, self.owner_customer_id.as_deref())?;
        Ok(rate)
    }
}

// =============================================================================
// Payment Validators
// =============================================================================

/// Validates a client-submitted amount (must not be negative).
pub fn validate_client_amount(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    Ok(())
}

/// Accepted mobile-money numbers.
///
/// Defaults to Kenyan Safaricom/Airtel style numbers: 12 digits in
/// international form starting with `2547` or `2541`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsisdnPolicy {
    pub prefixes: Vec<String>,
    pub length: usize,
}

impl Default for MsisdnPolicy {
    fn default() -> Self {
        MsisdnPolicy {
            prefixes: vec!["2547".to_string(), "2541".to_string()],
            length: 12,
        }
    }
}

impl MsisdnPolicy {
    /// Validates a phone number and returns it normalized (no `+`, no spaces).
    ///
    /// ## Rules
    /// - Optional leading `+`, surrounding whitespace ignored
    /// - Digits only
    /// - Exactly `length` digits
    /// - Starts with one of `prefixes`
    pub fn validate(&self, msisdn: &str) -> ValidationResult<String> {
        let trimmed = msisdn.trim();
        let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);

        if digits.is_empty() {
            return Err(ValidationError::Required {
                field: "msisdn".to_string(),
            });
        }

        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::InvalidFormat {
                field: "msisdn".to_string(),
                reason: "must contain only digits".to_string(),
            });
        }

        if digits.len() != self.length {
            return Err(ValidationError::InvalidFormat {
                field: "msisdn".to_string(),
                reason: format!("must be exactly {} digits", self.length),
            });
        }

        if !self.prefixes.iter().any(|p| digits.starts_with(p.as_str())) {
            return Err(ValidationError::InvalidFormat {
                field: "msisdn".to_string(),
                reason: format!("must start with one of {}", self.prefixes.join(", ")),
            });
        }

        Ok(digits.to_string())
    }
}

/// Normalizes a human-entered coupon code (trim + uppercase).
pub fn normalize_code(code: &str) -> ValidationResult<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "code".to_string(),
        });
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidFormat {
            field: "code".to_string(),
            reason: "must contain only letters and numbers".to_string(),
        });
    }
    Ok(code.to_ascii_uppercase())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::DurationUnit;

    #[test]
    fn test_fraction_bounds() {
        assert_eq!(validate_fraction(0.1).unwrap().bps(), 1_000);
        assert_eq!(validate_fraction(0.8).unwrap().bps(), 8_000);
        assert!(validate_fraction(0.09).is_err());
        assert!(validate_fraction(0.9).is_err());
        assert!(validate_fraction(f64::NAN).is_err());
        assert!(validate_fraction(f64::INFINITY).is_err());
    }

    #[test]
    fn test_positive_counts() {
        assert!(validate_usage_limit(1).is_ok());
        assert!(validate_usage_limit(0).is_err());
        assert!(validate_duration(1).is_ok());
        assert!(validate_duration(-3).is_err());
    }

    #[test]
    fn test_owner_rules() {
        assert!(matches!(
            validate_owner(CouponScope::CustomerBound, None),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_owner(CouponScope::CustomerBound, Some("  ")),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_owner(CouponScope::General, Some("alice")),
            Err(ValidationError::NotAllowed { .. })
        ));
        assert!(validate_owner(CouponScope::General, None).is_ok());
        assert!(validate_owner(CouponScope::CustomerBound, Some("alice")).is_ok());
    }

    #[test]
    fn test_new_coupon_validate() {
        let draft = NewCoupon::general(0.25, 10, 7, DurationUnit::Days);
        assert_eq!(draft.validate().unwrap().bps(), 2_500);

        let bad = NewCoupon::general(0.25, 0, 7, DurationUnit::Days);
        assert!(bad.validate().is_err());

        let empty = NewCoupon::general(0.25, 1, 1, DurationUnit::Days)
            .restricted_to(Vec::<String>::new());
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_client_amounts() {
        assert!(validate_client_amount("payable", Money::from_cents(0)).is_ok());
        assert!(validate_client_amount("payable", Money::from_cents(-1)).is_err());
    }

    #[test]
    fn test_msisdn_policy() {
        let policy = MsisdnPolicy::default();
        assert_eq!(policy.validate("254712345678").unwrap(), "254712345678");
        assert_eq!(policy.validate(" +254112345678 ").unwrap(), "254112345678");
        assert!(policy.validate("").is_err());
        assert!(policy.validate("25471234567").is_err());
        assert!(policy.validate("2547123456789").is_err());
        assert!(policy.validate("254812345678").is_err());
        assert!(policy.validate("2547-2345678").is_err());
    }

    #[test]
    fn test_code_normalization() {
        assert_eq!(normalize_code("  ab12cd34 ").unwrap(), "AB12CD34");
        assert!(normalize_code("").is_err());
        assert!(normalize_code("AB-12").is_err());
    }
}
