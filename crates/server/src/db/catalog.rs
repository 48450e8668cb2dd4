//! Read-only lookups against the catalog service's tables.

use std::collections::HashMap;

use rust_decimal::Decimal;
use sqlx::PgConnection;

use cartkeeper_core::pricing::TaxRule;
use cartkeeper_core::{ProductId, TaxRuleId};

use super::{RepositoryError, parse_column};

#[derive(Debug, sqlx::FromRow)]
struct ProductTaxRuleRow {
    product_id: ProductId,
    id: TaxRuleId,
    code: String,
    name: String,
    kind: String,
    rate: Decimal,
    applies_to: String,
}

/// Product price and tax rule lookups.
pub struct CatalogRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> CatalogRepository<'c> {
    /// Create a new catalog repository.
    #[must_use]
    pub const fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    /// Current price of an active product.
    ///
    /// Returns `None` if the product does not exist or is inactive.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn product_price(
        &mut self,
        product_id: ProductId,
    ) -> Result<Option<Decimal>, RepositoryError> {
        let price = sqlx::query_scalar::<_, Decimal>(
            "SELECT price FROM catalog.product WHERE id = $1 AND active",
        )
        .bind(product_id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(price)
    }

    /// Active tax rules attached to each of `products`.
    ///
    /// Products without rules are absent from the map.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if a rule has an unknown kind or base.
    pub async fn tax_rules_for(
        &mut self,
        products: &[ProductId],
    ) -> Result<HashMap<ProductId, Vec<TaxRule>>, RepositoryError> {
        if products.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<i32> = products.iter().map(ProductId::get).collect();
        let rows = sqlx::query_as::<_, ProductTaxRuleRow>(
            "SELECT ptr.product_id, tr.id, tr.code, tr.name, tr.kind, tr.rate, tr.applies_to \
             FROM catalog.product_tax_rule ptr \
             JOIN catalog.tax_rule tr ON tr.id = ptr.tax_rule_id \
             WHERE ptr.product_id = ANY($1) AND tr.active \
             ORDER BY ptr.product_id, tr.id",
        )
        .bind(ids)
        .fetch_all(&mut *self.conn)
        .await?;

        let mut rules: HashMap<ProductId, Vec<TaxRule>> = HashMap::new();
        for row in rows {
            let rule = TaxRule {
                id: row.id,
                code: row.code,
                name: row.name,
                kind: parse_column("tax rule kind", &row.kind)?,
                rate: row.rate,
                applies_to: parse_column("tax rule base", &row.applies_to)?,
            };
            rules.entry(row.product_id).or_default().push(rule);
        }
        Ok(rules)
    }
}
