//! # Payable Computation
//!
//! Server-side recomputation of what an order should cost. The result is
//! compared against the client's figures before any charge is attempted.
//!
//! ```text
//! shipping  = Σ line.quantity × line.unit_weight × zone rate
//! discount  = subtotal × min(Σ claim rates, 100%)
//! payable   = shipping + subtotal − discount
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::{DiscountRate, Money};
use crate::types::Order;

/// Breakdown of a recomputed payable amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PayableBreakdown {
    pub subtotal: Money,
    pub shipping_amount: Money,
    /// Sum of contributing claim rates, capped at 100%.
    pub discount_rate: DiscountRate,
    pub discount_amount: Money,
    pub payable: Money,
}

impl PayableBreakdown {
    /// Computes the breakdown for `order` given the rates of every
    /// contributing claim.
    ///
    /// ## Example
    /// ```rust
    /// use discount_core::money::{DiscountRate, Money};
    /// use discount_core::pricing::PayableBreakdown;
    ///
    /// let breakdown = PayableBreakdown::from_parts(
    ///     Money::from_cents(10_000),
    ///     Money::from_cents(500),
    ///     [DiscountRate::from_fraction(0.2)],
    /// );
    /// assert_eq!(breakdown.payable.cents(), 8_500);
    /// ```
    pub fn compute<I>(order: &Order, rates: I) -> Self
    where
        I: IntoIterator<Item = DiscountRate>,
    {
        Self::from_parts(order.subtotal(), shipping_amount(order), rates)
    }

    /// Same as [`PayableBreakdown::compute`] with shipping already known.
    pub fn from_parts<I>(subtotal: Money, shipping: Money, rates: I) -> Self
    where
        I: IntoIterator<Item = DiscountRate>,
    {
        let discount_rate = rates
            .into_iter()
            .fold(DiscountRate::zero(), DiscountRate::saturating_add);
        let discount_amount = subtotal.portion(discount_rate).min(subtotal);

        PayableBreakdown {
            subtotal,
            shipping_amount: shipping,
            discount_rate,
            discount_amount,
            payable: shipping + subtotal - discount_amount,
        }
    }

    /// Exact comparison with the client's submitted figures.
    pub fn matches(&self, client_shipping: Money, client_payable: Money) -> bool {
        self.shipping_amount == client_shipping && self.payable == client_payable
    }
}

/// Shipping cost of an order: every line's total weight at the zone rate.
pub fn shipping_amount(order: &Order) -> Money {
    let rate = order.delivery_rate();
    order
        .lines
        .iter()
        .map(|line| rate * (line.quantity * line.unit_weight))
        .sum()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderLine, OrderStatus};

    fn order(subtotal: i64, rate: i64, lines: &[(i64, i64)]) -> Order {
        Order {
            id: "o-1".to_string(),
            customer_id: "c-1".to_string(),
            subtotal_cents: subtotal,
            status: OrderStatus::AwaitingPayment,
            lines: lines
                .iter()
                .enumerate()
                .map(|(i, (qty, weight))| OrderLine {
                    product_id: format!("p-{i}"),
                    category: "parts".to_string(),
                    quantity: *qty,
                    unit_weight: *weight,
                })
                .collect(),
            delivery_rate_cents: rate,
        }
    }

    #[test]
    fn test_shipping_sums_weighted_lines() {
        // (2×3 + 1×4) × 50 = 500
        let order = order(10_000, 50, &[(2, 3), (1, 4)]);
        assert_eq!(shipping_amount(&order).cents(), 500);
    }

    #[test]
    fn test_reference_breakdown() {
        let order = order(10_000, 50, &[(2, 3), (1, 4)]);
        let breakdown = PayableBreakdown::compute(&order, [DiscountRate::from_fraction(0.2)]);

        assert_eq!(breakdown.shipping_amount.cents(), 500);
        assert_eq!(breakdown.discount_amount.cents(), 2_000);
        assert_eq!(breakdown.payable.cents(), 8_500);
        assert!(breakdown.matches(Money::from_cents(500), Money::from_cents(8_500)));
        assert!(!breakdown.matches(Money::from_cents(500), Money::from_cents(8_000)));
        assert!(!breakdown.matches(Money::from_cents(0), Money::from_cents(8_500)));
    }

    #[test]
    fn test_no_claims_no_discount() {
        let order = order(10_000, 0, &[]);
        let breakdown = PayableBreakdown::compute(&order, []);
        assert_eq!(breakdown.discount_amount, Money::zero());
        assert_eq!(breakdown.payable.cents(), 10_000);
    }

    #[test]
    fn test_stacked_rates_add() {
        let order = order(10_000, 0, &[]);
        let breakdown = PayableBreakdown::compute(
            &order,
            [DiscountRate::from_fraction(0.1), DiscountRate::from_fraction(0.2)],
        );
        assert_eq!(breakdown.discount_rate.bps(), 3_000);
        assert_eq!(breakdown.payable.cents(), 7_000);
    }

    #[test]
    fn test_discount_never_exceeds_subtotal() {
        let order = order(10_000, 10, &[(1, 1)]);
        let breakdown = PayableBreakdown::compute(
            &order,
            [DiscountRate::from_fraction(0.8), DiscountRate::from_fraction(0.8)],
        );
        assert_eq!(breakdown.discount_amount.cents(), 10_000);
        assert_eq!(breakdown.payable.cents(), 10);
    }
}
