//! Totals recompute.
//!
//! [`PricingEngine::recompute`] is the only code that writes the stored
//! totals of a cart. Every mutating operation calls it on the same
//! connection before committing, so stored totals never drift from lines.

use rust_decimal::Decimal;
use sqlx::PgConnection;
use tracing::debug;

use cartkeeper_core::pricing::{CartTotals, PricedLine, TaxShare, compute_totals};
use cartkeeper_core::{CartId, ProductId, Quantity, TaxMode, TaxRuleId};

use super::{CartStore, CatalogRepository, RepositoryError};

#[derive(Debug, sqlx::FromRow)]
struct TaxShareRow {
    tax_rule_id: TaxRuleId,
    code: String,
    amount: Decimal,
}

#[derive(Debug, sqlx::FromRow)]
struct PricingLineRow {
    product_id: ProductId,
    quantity: i32,
    unit_price: Decimal,
}

/// Recomputes and persists cart totals.
pub struct PricingEngine<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PricingEngine<'c> {
    /// Create a new pricing engine.
    #[must_use]
    pub const fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    /// Recompute a cart's totals from its header and lines and store them.
    ///
    /// In `multi` mode the per-rule breakdown is replaced; in `simple` mode
    /// any leftover breakdown rows are removed. Running it twice in a row
    /// stores the same numbers.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the cart does not exist.
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn recompute(&mut self, cart_id: CartId) -> Result<CartTotals, RepositoryError> {
        let cart = CartStore::new(&mut *self.conn)
            .get(cart_id)
            .await?
            .ok_or(RepositoryError::NotFound("cart"))?;

        let rows = sqlx::query_as::<_, PricingLineRow>(
            "SELECT product_id, quantity, unit_price FROM cart.line \
             WHERE cart_id = $1 ORDER BY product_id",
        )
        .bind(cart_id)
        .fetch_all(&mut *self.conn)
        .await?;

        let mut tax_rules = if cart.tax_mode == TaxMode::Multi {
            let products: Vec<ProductId> = rows.iter().map(|r| r.product_id).collect();
            CatalogRepository::new(&mut *self.conn)
                .tax_rules_for(&products)
                .await?
        } else {
            std::collections::HashMap::new()
        };

        let lines = rows
            .into_iter()
            .map(|row| {
                let quantity = Quantity::parse(i64::from(row.quantity)).map_err(|e| {
                    RepositoryError::DataCorruption(format!(
                        "invalid quantity for product {} in cart {cart_id}: {e}",
                        row.product_id
                    ))
                })?;
                Ok(PricedLine {
                    product_id: row.product_id,
                    quantity,
                    unit_price: row.unit_price,
                    tax_rules: tax_rules.remove(&row.product_id).unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        let totals = compute_totals(&cart.pricing_header(), &lines);
        debug_assert!(totals.is_consistent(), "inconsistent totals for cart {cart_id}");

        sqlx::query(
            "UPDATE cart.cart SET subtotal = $2, discount_total = $3, tax_total = $4, \
             total = $5, updated_at = NOW() WHERE id = $1",
        )
        .bind(cart_id)
        .bind(totals.subtotal)
        .bind(totals.discount_total)
        .bind(totals.tax_total)
        .bind(totals.total)
        .execute(&mut *self.conn)
        .await?;

        self.replace_breakdown(cart_id, &totals).await?;

        debug!(
            cart_id = %cart_id,
            lines = lines.len(),
            total = %totals.total,
            "Recomputed cart totals"
        );

        Ok(totals)
    }

    /// Stored per-rule tax amounts of a cart, ordered by rule.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn breakdown(&mut self, cart_id: CartId) -> Result<Vec<TaxShare>, RepositoryError> {
        let rows = sqlx::query_as::<_, TaxShareRow>(
            "SELECT tax_rule_id, code, amount FROM cart.tax_breakdown \
             WHERE cart_id = $1 ORDER BY tax_rule_id",
        )
        .bind(cart_id)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| TaxShare {
                tax_rule_id: r.tax_rule_id,
                code: r.code,
                amount: r.amount,
            })
            .collect())
    }

    async fn replace_breakdown(
        &mut self,
        cart_id: CartId,
        totals: &CartTotals,
    ) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM cart.tax_breakdown WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&mut *self.conn)
            .await?;

        if totals.breakdown.is_empty() {
            return Ok(());
        }

        let rule_ids: Vec<i32> = totals
            .breakdown
            .iter()
            .map(|s| s.tax_rule_id.get())
            .collect();
        let codes: Vec<String> = totals.breakdown.iter().map(|s| s.code.clone()).collect();
        let amounts: Vec<Decimal> = totals.breakdown.iter().map(|s| s.amount).collect();

        sqlx::query(
            "INSERT INTO cart.tax_breakdown (cart_id, tax_rule_id, code, amount) \
             SELECT $1, * FROM UNNEST($2::int4[], $3::text[], $4::numeric[])",
        )
        .bind(cart_id)
        .bind(rule_ids)
        .bind(codes)
        .bind(amounts)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }
}
