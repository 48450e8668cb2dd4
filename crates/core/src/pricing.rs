//! Cart total computation.
//!
//! [`compute_totals`] is the single formula every recompute path uses. It is
//! a pure function of the cart header and its lines, so running it twice on
//! the same input gives the same totals.
//!
//! ```text
//! subtotal       = Σ quantity × unit_price
//! discount_total = discount_amount            if discount_amount > 0
//!                  round(subtotal × pct/100)  otherwise
//! base           = max(subtotal − discount_total, 0)
//! tax_total      = simple: round(base × tax_pct/100)
//!                  multi:  Σ round(per-rule amount)
//! total          = base + tax_total
//! ```

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{
    Amount, CurrencyCode, Percent, ProductId, Quantity, TaxBase, TaxMode, TaxRuleId, TaxRuleKind,
    round_money,
};

/// A tax rule from the catalog's tax table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRule {
    /// Rule id.
    pub id: TaxRuleId,
    /// Short code, e.g. `VAT`.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Percentage or fixed per-unit amount.
    pub kind: TaxRuleKind,
    /// Percentage (for `Percentage`) or amount per unit (for `Fixed`).
    pub rate: Decimal,
    /// Amount a percentage rule is applied to.
    pub applies_to: TaxBase,
}

/// One cart line as seen by the pricing formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    /// Product on the line.
    pub product_id: ProductId,
    /// Quantity.
    pub quantity: Quantity,
    /// Snapshot unit price.
    pub unit_price: Decimal,
    /// Tax rules attached to the product (only consulted in `multi` mode).
    pub tax_rules: Vec<TaxRule>,
}

impl PricedLine {
    /// `quantity × unit_price`.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        Decimal::from(self.quantity.get()) * self.unit_price
    }
}

/// Header fields that drive pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingHeader {
    /// Currency used for rounding.
    pub currency: CurrencyCode,
    /// Tax computation mode.
    pub tax_mode: TaxMode,
    /// Header tax percentage for `simple` mode.
    pub tax_pct: Percent,
    /// Percentage discount, used when no fixed discount is set.
    pub discount_pct: Percent,
    /// Fixed discount; takes precedence when positive.
    pub discount_amount: Amount,
}

/// Tax computed for one rule in `multi` mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxShare {
    /// Rule the amount belongs to.
    pub tax_rule_id: TaxRuleId,
    /// Rule code, for display.
    pub code: String,
    /// Rounded amount.
    pub amount: Decimal,
}

/// Computed cart totals.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CartTotals {
    /// Sum of line subtotals.
    pub subtotal: Decimal,
    /// Discount applied to the subtotal.
    pub discount_total: Decimal,
    /// Total tax.
    pub tax_total: Decimal,
    /// Amount due.
    pub total: Decimal,
    /// Per-rule tax amounts; empty unless the cart is in `multi` mode.
    pub breakdown: Vec<TaxShare>,
}

impl CartTotals {
    /// `max(subtotal − discount_total, 0)`.
    #[must_use]
    pub fn base(&self) -> Decimal {
        (self.subtotal - self.discount_total).max(Decimal::ZERO)
    }

    /// Whether the stored numbers agree with each other.
    ///
    /// Holds for every value produced by [`compute_totals`].
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let breakdown_ok = self.breakdown.is_empty()
            || self.breakdown.iter().map(|s| s.amount).sum::<Decimal>() == self.tax_total;
        self.total == self.base() + self.tax_total && breakdown_ok
    }
}

/// Compute the totals of a cart.
#[must_use]
pub fn compute_totals(header: &PricingHeader, lines: &[PricedLine]) -> CartTotals {
    let currency = header.currency;
    let subtotal = round_money(
        lines.iter().map(PricedLine::subtotal).sum::<Decimal>(),
        currency,
    );

    let discount_total = if header.discount_amount.is_positive() {
        round_money(header.discount_amount.value(), currency)
    } else {
        round_money(header.discount_pct.of(subtotal), currency)
    };

    let base = (subtotal - discount_total).max(Decimal::ZERO);

    let (tax_total, breakdown) = match header.tax_mode {
        TaxMode::Simple => (round_money(header.tax_pct.of(base), currency), Vec::new()),
        TaxMode::Multi => {
            let breakdown = multi_tax_shares(currency, subtotal, base, lines);
            let tax_total = breakdown.iter().map(|s| s.amount).sum::<Decimal>();
            (tax_total, breakdown)
        }
    };

    CartTotals {
        subtotal,
        discount_total,
        tax_total,
        total: base + tax_total,
        breakdown,
    }
}

/// Per-rule tax amounts.
///
/// The cart discount is spread over lines in proportion to their subtotal.
/// Amounts are accumulated unrounded per rule and rounded once, so the
/// breakdown sums exactly to the reported tax total.
fn multi_tax_shares(
    currency: CurrencyCode,
    subtotal: Decimal,
    base: Decimal,
    lines: &[PricedLine],
) -> Vec<TaxShare> {
    let base_ratio = if subtotal.is_zero() {
        Decimal::ZERO
    } else {
        base / subtotal
    };

    let mut per_rule: BTreeMap<TaxRuleId, (String, Decimal)> = BTreeMap::new();
    for line in lines {
        let gross = line.subtotal();
        for rule in &line.tax_rules {
            let amount = match rule.kind {
                TaxRuleKind::Percentage => {
                    let taxable = match rule.applies_to {
                        TaxBase::DiscountedBase => gross * base_ratio,
                        TaxBase::Gross => gross,
                    };
                    taxable * rule.rate / Decimal::ONE_HUNDRED
                }
                TaxRuleKind::Fixed => rule.rate * Decimal::from(line.quantity.get()),
            };
            per_rule
                .entry(rule.id)
                .or_insert_with(|| (rule.code.clone(), Decimal::ZERO))
                .1 += amount;
        }
    }

    per_rule
        .into_iter()
        .map(|(tax_rule_id, (code, amount))| TaxShare {
            tax_rule_id,
            code,
            amount: round_money(amount, currency),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn pct(value: Decimal) -> Percent {
        Percent::new(value).unwrap()
    }

    fn header(tax_mode: TaxMode) -> PricingHeader {
        PricingHeader {
            currency: CurrencyCode::USD,
            tax_mode,
            tax_pct: Percent::ZERO,
            discount_pct: Percent::ZERO,
            discount_amount: Amount::ZERO,
        }
    }

    fn line(product: i32, quantity: i64, unit_price: Decimal) -> PricedLine {
        PricedLine {
            product_id: ProductId::new(product),
            quantity: Quantity::parse(quantity).unwrap(),
            unit_price,
            tax_rules: Vec::new(),
        }
    }

    fn rule(id: i32, kind: TaxRuleKind, rate: Decimal, applies_to: TaxBase) -> TaxRule {
        TaxRule {
            id: TaxRuleId::new(id),
            code: format!("T{id}"),
            name: format!("Tax {id}"),
            kind,
            rate,
            applies_to,
        }
    }

    #[test]
    fn test_simple_mode_discount_then_tax() {
        let mut h = header(TaxMode::Simple);
        h.discount_pct = pct(dec!(10));
        h.tax_pct = pct(dec!(8));

        let totals = compute_totals(&h, &[line(1, 2, dec!(10.00))]);

        assert_eq!(totals.subtotal, dec!(20.00));
        assert_eq!(totals.discount_total, dec!(2.00));
        assert_eq!(totals.base(), dec!(18.00));
        assert_eq!(totals.tax_total, dec!(1.44));
        assert_eq!(totals.total, dec!(19.44));
        assert!(totals.breakdown.is_empty());
        assert!(totals.is_consistent());
    }

    #[test]
    fn test_simple_mode_after_quantity_set_to_three() {
        let mut h = header(TaxMode::Simple);
        h.discount_pct = pct(dec!(10));
        h.tax_pct = pct(dec!(8));

        let totals = compute_totals(&h, &[line(1, 3, dec!(10.00))]);

        assert_eq!(totals.subtotal, dec!(30.00));
        assert_eq!(totals.discount_total, dec!(3.00));
        assert_eq!(totals.tax_total, dec!(2.16));
        assert_eq!(totals.total, dec!(29.16));
    }

    #[test]
    fn test_fixed_discount_wins_over_percentage() {
        let mut h = header(TaxMode::Simple);
        h.discount_pct = pct(dec!(50));
        h.discount_amount = Amount::new(dec!(5)).unwrap();

        let totals = compute_totals(&h, &[line(1, 1, dec!(12.50))]);

        assert_eq!(totals.discount_total, dec!(5.00));
        assert_eq!(totals.total, dec!(7.50));
    }

    #[test]
    fn test_discount_larger_than_subtotal_floors_base_at_zero() {
        let mut h = header(TaxMode::Simple);
        h.discount_amount = Amount::new(dec!(100)).unwrap();
        h.tax_pct = pct(dec!(20));

        let totals = compute_totals(&h, &[line(1, 1, dec!(30))]);

        assert_eq!(totals.discount_total, dec!(100.00));
        assert_eq!(totals.base(), Decimal::ZERO);
        assert_eq!(totals.tax_total, Decimal::ZERO);
        assert_eq!(totals.total, Decimal::ZERO);
        assert!(totals.is_consistent());
    }

    #[test]
    fn test_empty_cart_is_all_zero() {
        let mut h = header(TaxMode::Simple);
        h.tax_pct = pct(dec!(8));
        let totals = compute_totals(&h, &[]);
        assert_eq!(totals, CartTotals::default());
    }

    #[test]
    fn test_half_up_rounding_on_tax() {
        let mut h = header(TaxMode::Simple);
        h.tax_pct = pct(dec!(5));
        // 0.25 * 5% = 0.0125 -> 0.01; 0.30 * 5% = 0.015 -> 0.02
        assert_eq!(compute_totals(&h, &[line(1, 1, dec!(0.25))]).tax_total, dec!(0.01));
        assert_eq!(compute_totals(&h, &[line(1, 1, dec!(0.30))]).tax_total, dec!(0.02));
    }

    #[test]
    fn test_multi_mode_breakdown_sums_to_tax_total() {
        let vat = rule(1, TaxRuleKind::Percentage, dec!(16), TaxBase::DiscountedBase);
        let eco = rule(2, TaxRuleKind::Fixed, dec!(0.10), TaxBase::DiscountedBase);

        let mut a = line(1, 3, dec!(9.99));
        a.tax_rules = vec![vat.clone(), eco];
        let mut b = line(2, 1, dec!(4.35));
        b.tax_rules = vec![vat];

        let mut h = header(TaxMode::Multi);
        h.discount_pct = pct(dec!(7.5));
        // Header percentage is ignored in multi mode.
        h.tax_pct = pct(dec!(99));

        let totals = compute_totals(&h, &[a, b]);

        assert_eq!(totals.subtotal, dec!(34.32));
        assert_eq!(totals.discount_total, dec!(2.57));
        assert_eq!(totals.breakdown.len(), 2);
        // 16% of 31.75 = 5.08; eco 3 × 0.10 = 0.30
        assert_eq!(totals.breakdown[0].amount, dec!(5.08));
        assert_eq!(totals.breakdown[1].amount, dec!(0.30));
        assert_eq!(totals.tax_total, dec!(5.38));
        assert_eq!(totals.total, dec!(37.13));
        assert!(totals.is_consistent());
    }

    #[test]
    fn test_multi_mode_gross_rule_ignores_discount() {
        let mut a = line(1, 2, dec!(50));
        a.tax_rules = vec![rule(3, TaxRuleKind::Percentage, dec!(10), TaxBase::Gross)];

        let mut h = header(TaxMode::Multi);
        h.discount_amount = Amount::new(dec!(40)).unwrap();

        let totals = compute_totals(&h, &[a]);

        assert_eq!(totals.base(), dec!(60.00));
        assert_eq!(totals.tax_total, dec!(10.00));
        assert_eq!(totals.total, dec!(70.00));
    }

    #[test]
    fn test_multi_mode_without_rules_has_no_tax() {
        let totals = compute_totals(&header(TaxMode::Multi), &[line(1, 1, dec!(3))]);
        assert!(totals.breakdown.is_empty());
        assert_eq!(totals.tax_total, Decimal::ZERO);
        assert_eq!(totals.total, dec!(3));
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let mut a = line(1, 7, dec!(1.11));
        a.tax_rules = vec![rule(1, TaxRuleKind::Percentage, dec!(8.25), TaxBase::DiscountedBase)];
        let mut h = header(TaxMode::Multi);
        h.discount_pct = pct(dec!(12.5));

        let lines = [a];
        let first = compute_totals(&h, &lines);
        let second = compute_totals(&h, &lines);
        assert_eq!(first, second);
    }

    #[test]
    fn test_invariant_holds_across_inputs() {
        let prices = [dec!(0.01), dec!(0.99), dec!(9.95), dec!(19.99), dec!(249.50)];
        let discounts = [dec!(0), dec!(3.33), dec!(50), dec!(100)];
        let taxes = [dec!(0), dec!(7.25), dec!(21)];

        for price in prices {
            for discount in discounts {
                for tax in taxes {
                    let mut h = header(TaxMode::Simple);
                    h.discount_pct = pct(discount);
                    h.tax_pct = pct(tax);
                    let totals = compute_totals(&h, &[line(1, 13, price), line(2, 1, price)]);
                    assert!(totals.is_consistent(), "{price} {discount} {tax}");
                    assert_eq!(totals.total.scale().min(2), totals.total.scale());
                }
            }
        }
    }
}
