//! Cart domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use cartkeeper_core::pricing::PricingHeader;
use cartkeeper_core::{
    Amount, CartId, CartOwner, CartStatus, CurrencyCode, Percent, ProductId, Quantity, TaxMode,
};

/// A cart header (domain type).
#[derive(Debug, Clone, Serialize)]
pub struct Cart {
    /// Unique cart ID.
    pub id: CartId,
    /// Who the cart belongs to.
    pub owner: CartOwner,
    /// Currency all amounts are expressed in.
    pub currency: CurrencyCode,
    /// Tax computation mode.
    pub tax_mode: TaxMode,
    /// Header tax percentage, used in `simple` mode.
    pub tax_pct: Percent,
    /// Percentage discount.
    pub discount_pct: Percent,
    /// Fixed discount, wins over `discount_pct` when positive.
    pub discount_amount: Amount,
    /// Sum of line subtotals.
    pub subtotal: Decimal,
    /// Discount applied.
    pub discount_total: Decimal,
    /// Tax applied.
    pub tax_total: Decimal,
    /// Amount due.
    pub total: Decimal,
    /// Lifecycle status.
    pub status: CartStatus,
    /// When the cart was created.
    pub created_at: DateTime<Utc>,
    /// When the cart last changed.
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Pricing inputs carried by the header.
    #[must_use]
    pub const fn pricing_header(&self) -> PricingHeader {
        PricingHeader {
            currency: self.currency,
            tax_mode: self.tax_mode,
            tax_pct: self.tax_pct,
            discount_pct: self.discount_pct,
            discount_amount: self.discount_amount,
        }
    }

    /// Whether an open cart has gone untouched since `cutoff`.
    #[must_use]
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.status.is_open() && self.updated_at < cutoff
    }
}

/// Parameters for creating a cart.
#[derive(Debug, Clone)]
pub struct NewCart {
    /// Initial owner.
    pub owner: CartOwner,
    /// Currency.
    pub currency: CurrencyCode,
    /// Tax mode.
    pub tax_mode: TaxMode,
    /// Header tax percentage.
    pub tax_pct: Percent,
    /// Percentage discount.
    pub discount_pct: Percent,
    /// Fixed discount.
    pub discount_amount: Amount,
}

impl NewCart {
    /// A cart with default pricing settings.
    #[must_use]
    pub fn for_owner(owner: CartOwner) -> Self {
        Self {
            owner,
            currency: CurrencyCode::default(),
            tax_mode: TaxMode::default(),
            tax_pct: Percent::ZERO,
            discount_pct: Percent::ZERO,
            discount_amount: Amount::ZERO,
        }
    }

    /// Override the defaults with the fields `settings` sets.
    ///
    /// `settings.status` is ignored; new carts always start open.
    #[must_use]
    pub fn with_settings(self, settings: &CartHeaderUpdate) -> Self {
        Self {
            currency: settings.currency.unwrap_or(self.currency),
            tax_mode: settings.tax_mode.unwrap_or(self.tax_mode),
            tax_pct: settings.tax_pct.unwrap_or(self.tax_pct),
            discount_pct: settings.discount_pct.unwrap_or(self.discount_pct),
            discount_amount: settings.discount_amount.unwrap_or(self.discount_amount),
            ..self
        }
    }
}

/// Header fields a caller may change. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct CartHeaderUpdate {
    pub currency: Option<CurrencyCode>,
    pub tax_mode: Option<TaxMode>,
    pub tax_pct: Option<Percent>,
    pub discount_pct: Option<Percent>,
    pub discount_amount: Option<Amount>,
    pub status: Option<CartStatus>,
}

impl CartHeaderUpdate {
    /// Whether the update changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.currency.is_none()
            && self.tax_mode.is_none()
            && self.tax_pct.is_none()
            && self.discount_pct.is_none()
            && self.discount_amount.is_none()
            && self.status.is_none()
    }
}

/// A cart line (domain type).
#[derive(Debug, Clone, Serialize)]
pub struct LineItem {
    /// Cart the line belongs to.
    pub cart_id: CartId,
    /// Product on the line.
    pub product_id: ProductId,
    /// Quantity, `1..=999`.
    pub quantity: Quantity,
    /// Snapshot unit price.
    pub unit_price: Decimal,
    /// `quantity × unit_price`.
    pub line_subtotal: Decimal,
    /// When the line was added.
    pub created_at: DateTime<Utc>,
    /// When the line last changed.
    pub updated_at: DateTime<Utc>,
}

/// Line statistics for the lightweight count endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineCount {
    /// Distinct product lines.
    pub lines: i64,
    /// Sum of quantities.
    pub quantity: i64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;
    use cartkeeper_core::UserId;

    use super::*;

    fn cart(status: CartStatus, updated_at: DateTime<Utc>) -> Cart {
        Cart {
            id: CartId::new(1),
            owner: CartOwner::User {
                user_id: UserId::new(1),
            },
            currency: CurrencyCode::USD,
            tax_mode: TaxMode::Simple,
            tax_pct: Percent::ZERO,
            discount_pct: Percent::ZERO,
            discount_amount: Amount::ZERO,
            subtotal: Decimal::ZERO,
            discount_total: Decimal::ZERO,
            tax_total: Decimal::ZERO,
            total: Decimal::ZERO,
            status,
            created_at: updated_at,
            updated_at,
        }
    }

    #[test]
    fn test_is_stale_only_for_open_carts() {
        let now = Utc::now();
        let cutoff = now - Duration::days(30);
        let old = now - Duration::days(31);

        assert!(cart(CartStatus::Open, old).is_stale(cutoff));
        assert!(!cart(CartStatus::Open, now).is_stale(cutoff));
        assert!(!cart(CartStatus::Cancelled, old).is_stale(cutoff));
    }

    #[test]
    fn test_header_update_is_empty() {
        assert!(CartHeaderUpdate::default().is_empty());
        let update = CartHeaderUpdate {
            tax_mode: Some(TaxMode::Multi),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
