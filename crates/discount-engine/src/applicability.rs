//! # Applicability Rules
//!
//! Decides whether a coupon may be applied to an order at all, before any
//! availability check.
//!
//! ```text
//! applicable_categories = None          → every order
//! applicable_categories = Some([a, b])  → every order line is in {a, b}
//! ```

use discount_core::{Coupon, Order};

/// Predicate over (coupon, order).
pub trait ApplicabilityRule: Send + Sync {
    fn applies(&self, coupon: &Coupon, order: &Order) -> bool;
}

/// Matches order line categories against the coupon's category list.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryRule;

impl ApplicabilityRule for CategoryRule {
    fn applies(&self, coupon: &Coupon, order: &Order) -> bool {
        match &coupon.applicable_categories {
            None => true,
            Some(allowed) => order
                .categories()
                .into_iter()
                .all(|category| allowed.iter().any(|a| a.eq_ignore_ascii_case(category))),
        }
    }
}
