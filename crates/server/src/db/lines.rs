//! Cart line repository.
//!
//! Every public mutation ends with a [`PricingEngine::recompute`] on the same
//! connection. The merge helpers at the bottom skip it; the merge recomputes
//! once after all lines are moved.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;

use cartkeeper_core::{Amount, CartId, ProductId, Quantity};

use super::{CatalogRepository, PricingEngine, RepositoryError};
use crate::models::{LineCount, LineItem};

macro_rules! line_columns {
    () => {
        "cart_id, product_id, quantity, unit_price, line_subtotal, created_at, updated_at"
    };
}

#[derive(Debug, sqlx::FromRow)]
struct LineRow {
    cart_id: CartId,
    product_id: ProductId,
    quantity: i32,
    unit_price: Decimal,
    line_subtotal: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct UpsertRow {
    #[sqlx(flatten)]
    line: LineRow,
    inserted: bool,
}

impl TryFrom<LineRow> for LineItem {
    type Error = RepositoryError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        let quantity = Quantity::parse(i64::from(row.quantity)).map_err(|e| {
            RepositoryError::DataCorruption(format!(
                "invalid quantity for product {} in cart {}: {e}",
                row.product_id, row.cart_id
            ))
        })?;

        Ok(Self {
            cart_id: row.cart_id,
            product_id: row.product_id,
            quantity,
            unit_price: row.unit_price,
            line_subtotal: row.line_subtotal,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Whether an add created a line or grew an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Inserted,
    Incremented,
}

/// Line CRUD with cap enforcement.
pub struct LineItemManager<'c> {
    conn: &'c mut PgConnection,
    max_lines: usize,
}

impl<'c> LineItemManager<'c> {
    /// Create a new line manager enforcing `max_lines` distinct lines per cart.
    #[must_use]
    pub const fn new(conn: &'c mut PgConnection, max_lines: usize) -> Self {
        Self { conn, max_lines }
    }

    /// Add a product to a cart, or grow its line if it is already there.
    ///
    /// The cap is only checked when the product is new to the cart. The
    /// write itself is an upsert, so a concurrent add of the same product
    /// increments instead of failing. Quantities saturate at 999. When
    /// `unit_price` is `None` a new line takes the catalog price and an
    /// existing line keeps its stored price.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::LineCapReached` if a new line would exceed the cap.
    /// Returns `RepositoryError::NotFound` if the product is unknown or inactive.
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn add(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: Quantity,
        unit_price: Option<Amount>,
    ) -> Result<(LineItem, LineOutcome), RepositoryError> {
        let existing = self.get(cart_id, product_id).await?;

        if existing.is_none() {
            let count = self.count(cart_id).await?;
            if usize::try_from(count.lines).unwrap_or(usize::MAX) >= self.max_lines {
                return Err(RepositoryError::LineCapReached(self.max_lines));
            }
        }

        let insert_price = match (unit_price, &existing) {
            (Some(price), _) => price.value(),
            (None, Some(line)) => line.unit_price,
            (None, None) => CatalogRepository::new(&mut *self.conn)
                .product_price(product_id)
                .await?
                .ok_or(RepositoryError::NotFound("product"))?,
        };

        let row = sqlx::query_as::<_, UpsertRow>(concat!(
            "INSERT INTO cart.line AS l (cart_id, product_id, quantity, unit_price) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (cart_id, product_id) DO UPDATE SET \
                quantity = LEAST(l.quantity + EXCLUDED.quantity, 999), \
                unit_price = COALESCE($5, l.unit_price), \
                updated_at = NOW() \
             RETURNING ",
            line_columns!(),
            ", (xmax = 0) AS inserted"
        ))
        .bind(cart_id)
        .bind(product_id)
        .bind(quantity.get())
        .bind(insert_price)
        .bind(unit_price.map(|p| p.value()))
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_foreign_key_violation()
            {
                return RepositoryError::NotFound("product");
            }
            RepositoryError::Database(e)
        })?;

        let outcome = if row.inserted {
            LineOutcome::Inserted
        } else {
            LineOutcome::Incremented
        };
        let line = LineItem::try_from(row.line)?;

        PricingEngine::new(&mut *self.conn).recompute(cart_id).await?;

        Ok((line, outcome))
    }

    /// Set a line's quantity (not increment) and optionally its price.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the cart has no line for the product.
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn update(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: Quantity,
        unit_price: Option<Amount>,
    ) -> Result<LineItem, RepositoryError> {
        let row = sqlx::query_as::<_, LineRow>(concat!(
            "UPDATE cart.line SET quantity = $3, unit_price = COALESCE($4, unit_price), \
             updated_at = NOW() WHERE cart_id = $1 AND product_id = $2 RETURNING ",
            line_columns!()
        ))
        .bind(cart_id)
        .bind(product_id)
        .bind(quantity.get())
        .bind(unit_price.map(|p| p.value()))
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or(RepositoryError::NotFound("line"))?;

        let line = LineItem::try_from(row)?;
        PricingEngine::new(&mut *self.conn).recompute(cart_id).await?;
        Ok(line)
    }

    /// Remove a product's line.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the cart has no line for the product.
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn remove(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM cart.line WHERE cart_id = $1 AND product_id = $2")
            .bind(cart_id)
            .bind(product_id)
            .execute(&mut *self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound("line"));
        }

        PricingEngine::new(&mut *self.conn).recompute(cart_id).await?;
        Ok(())
    }

    /// Delete every line of a cart; totals drop to zero in the same transaction.
    ///
    /// Returns the number of lines removed.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn empty(&mut self, cart_id: CartId) -> Result<u64, RepositoryError> {
        let removed = self.delete_all(cart_id).await?;
        PricingEngine::new(&mut *self.conn).recompute(cart_id).await?;
        Ok(removed)
    }

    /// One line of a cart.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<Option<LineItem>, RepositoryError> {
        sqlx::query_as::<_, LineRow>(concat!(
            "SELECT ",
            line_columns!(),
            " FROM cart.line WHERE cart_id = $1 AND product_id = $2"
        ))
        .bind(cart_id)
        .bind(product_id)
        .fetch_optional(&mut *self.conn)
        .await?
        .map(LineItem::try_from)
        .transpose()
    }

    /// All lines of a cart in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list(&mut self, cart_id: CartId) -> Result<Vec<LineItem>, RepositoryError> {
        sqlx::query_as::<_, LineRow>(concat!(
            "SELECT ",
            line_columns!(),
            " FROM cart.line WHERE cart_id = $1 ORDER BY created_at, product_id"
        ))
        .bind(cart_id)
        .fetch_all(&mut *self.conn)
        .await?
        .into_iter()
        .map(LineItem::try_from)
        .collect()
    }

    /// Distinct lines and total quantity.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn count(&mut self, cart_id: CartId) -> Result<LineCount, RepositoryError> {
        let (lines, quantity) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COALESCE(SUM(quantity), 0)::int8 FROM cart.line WHERE cart_id = $1",
        )
        .bind(cart_id)
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(LineCount { lines, quantity })
    }

    // -------------------------------------------------------------------------
    // Merge helpers (no recompute)
    // -------------------------------------------------------------------------

    /// Add `quantity` to an existing line, saturating at 999.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the line does not exist.
    /// Returns `RepositoryError::Database` if the update fails.
    pub async fn fuse(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE cart.line SET quantity = LEAST(quantity + $3, 999), updated_at = NOW() \
             WHERE cart_id = $1 AND product_id = $2",
        )
        .bind(cart_id)
        .bind(product_id)
        .bind(quantity.get())
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound("line"));
        }
        Ok(())
    }

    /// Insert a line copied from another cart.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails (e.g. the
    /// product no longer exists in the catalog).
    pub async fn insert_copy(
        &mut self,
        line: &LineItem,
        into: CartId,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO cart.line (cart_id, product_id, quantity, unit_price) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(into)
        .bind(line.product_id)
        .bind(line.quantity.get())
        .bind(line.unit_price)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Delete every line of a cart without touching its totals.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the delete fails.
    pub async fn delete_all(&mut self, cart_id: CartId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM cart.line WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected())
    }
}
