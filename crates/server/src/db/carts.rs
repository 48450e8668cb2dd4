//! Cart header repository.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;

use cartkeeper_core::{
    Amount, CallerIdentity, CartId, CartOwner, CartStatus, CurrencyCode, Percent, SessionToken,
    UserId,
};

use super::{PricingEngine, RepositoryError, parse_column};
use crate::models::{Cart, CartHeaderUpdate, NewCart};

/// `SELECT` over `cart.cart` with every column [`CartRow`] needs.
macro_rules! select_cart {
    ($tail:literal) => {
        concat!(
            "SELECT id, user_id, session_token, currency, tax_mode, tax_pct, discount_pct, ",
            "discount_amount, subtotal, discount_total, tax_total, total, status, ",
            "created_at, updated_at FROM cart.cart ",
            $tail
        )
    };
}

/// `RETURNING` clause matching [`CartRow`].
macro_rules! returning_cart {
    ($head:literal) => {
        concat!(
            $head,
            " RETURNING id, user_id, session_token, currency, tax_mode, tax_pct, discount_pct, ",
            "discount_amount, subtotal, discount_total, tax_total, total, status, ",
            "created_at, updated_at"
        )
    };
}

#[derive(Debug, sqlx::FromRow)]
struct CartRow {
    id: CartId,
    user_id: Option<UserId>,
    session_token: Option<String>,
    currency: String,
    tax_mode: String,
    tax_pct: Decimal,
    discount_pct: Decimal,
    discount_amount: Decimal,
    subtotal: Decimal,
    discount_total: Decimal,
    tax_total: Decimal,
    total: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CartRow> for Cart {
    type Error = RepositoryError;

    fn try_from(row: CartRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            RepositoryError::DataCorruption(format!("invalid {what} in cart {}: {e}", row.id))
        };

        let session_token = row
            .session_token
            .as_deref()
            .map(SessionToken::parse)
            .transpose()
            .map_err(|e| corrupt("session token", &e))?;
        let owner = CartOwner::from_columns(row.user_id, session_token)
            .ok_or_else(|| corrupt("owner", &"no user id or session token"))?;

        Ok(Self {
            id: row.id,
            owner,
            currency: CurrencyCode::parse(&row.currency).map_err(|e| corrupt("currency", &e))?,
            tax_mode: parse_column("tax_mode", &row.tax_mode)?,
            tax_pct: Percent::new(row.tax_pct).map_err(|e| corrupt("tax_pct", &e))?,
            discount_pct: Percent::new(row.discount_pct).map_err(|e| corrupt("discount_pct", &e))?,
            discount_amount: Amount::new(row.discount_amount)
                .map_err(|e| corrupt("discount_amount", &e))?,
            subtotal: row.subtotal,
            discount_total: row.discount_total,
            tax_total: row.tax_total,
            total: row.total,
            status: parse_column("status", &row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_cart(row: Option<CartRow>) -> Result<Option<Cart>, RepositoryError> {
    row.map(Cart::try_from).transpose()
}

/// Repository for cart headers.
///
/// Borrows one connection; pass `&mut *tx` to keep every call of an
/// operation inside the same transaction.
pub struct CartStore<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> CartStore<'c> {
    /// Create a new cart store.
    #[must_use]
    pub const fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    /// Create a cart.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn create(&mut self, new: &NewCart) -> Result<Cart, RepositoryError> {
        let row = sqlx::query_as::<_, CartRow>(returning_cart!(
            "INSERT INTO cart.cart (user_id, session_token, currency, tax_mode, tax_pct, \
             discount_pct, discount_amount) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(new.owner.user_id())
        .bind(new.owner.session_token())
        .bind(new.currency.as_str())
        .bind(new.tax_mode.as_str())
        .bind(new.tax_pct.value())
        .bind(new.discount_pct.value())
        .bind(new.discount_amount.value())
        .fetch_one(&mut *self.conn)
        .await?;

        Cart::try_from(row)
    }

    /// Get a cart by ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if the row cannot be decoded.
    pub async fn get(&mut self, id: CartId) -> Result<Option<Cart>, RepositoryError> {
        let row = sqlx::query_as::<_, CartRow>(select_cart!("WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;
        into_cart(row)
    }

    /// Get a cart by ID and hold its row lock until the transaction ends.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn lock(&mut self, id: CartId) -> Result<Option<Cart>, RepositoryError> {
        let row = sqlx::query_as::<_, CartRow>(select_cart!("WHERE id = $1 FOR UPDATE"))
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?;
        into_cart(row)
    }

    /// Most recently updated open cart owned by a user.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn open_for_user(
        &mut self,
        user_id: UserId,
        for_update: bool,
    ) -> Result<Option<Cart>, RepositoryError> {
        let sql = if for_update {
            select_cart!(
                "WHERE user_id = $1 AND status = 'open' \
                 ORDER BY updated_at DESC, id DESC LIMIT 1 FOR UPDATE"
            )
        } else {
            select_cart!(
                "WHERE user_id = $1 AND status = 'open' \
                 ORDER BY updated_at DESC, id DESC LIMIT 1"
            )
        };
        let row = sqlx::query_as::<_, CartRow>(sql)
            .bind(user_id)
            .fetch_optional(&mut *self.conn)
            .await?;
        into_cart(row)
    }

    /// Most recently updated open cart owned by an anonymous session.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn open_for_token(
        &mut self,
        token: &SessionToken,
        for_update: bool,
    ) -> Result<Option<Cart>, RepositoryError> {
        let sql = if for_update {
            select_cart!(
                "WHERE session_token = $1 AND user_id IS NULL AND status = 'open' \
                 ORDER BY updated_at DESC, id DESC LIMIT 1 FOR UPDATE"
            )
        } else {
            select_cart!(
                "WHERE session_token = $1 AND user_id IS NULL AND status = 'open' \
                 ORDER BY updated_at DESC, id DESC LIMIT 1"
            )
        };
        let row = sqlx::query_as::<_, CartRow>(sql)
            .bind(token)
            .fetch_optional(&mut *self.conn)
            .await?;
        into_cart(row)
    }

    /// Find the caller's open cart, consulting the user id before the token.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn get_by_identity(
        &mut self,
        caller: &CallerIdentity,
    ) -> Result<Option<Cart>, RepositoryError> {
        if let Some(user_id) = caller.user_id
            && let Some(cart) = self.open_for_user(user_id, false).await?
        {
            return Ok(Some(cart));
        }
        if let Some(token) = &caller.session_token {
            return self.open_for_token(token, false).await;
        }
        Ok(None)
    }

    /// Apply header changes and recompute totals.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the cart does not exist.
    /// Returns `RepositoryError::Database` if the update or recompute fails.
    pub async fn update_header(
        &mut self,
        id: CartId,
        update: &CartHeaderUpdate,
    ) -> Result<Cart, RepositoryError> {
        let result = sqlx::query(
            "UPDATE cart.cart SET \
                currency = COALESCE($2, currency), \
                tax_mode = COALESCE($3, tax_mode), \
                tax_pct = COALESCE($4, tax_pct), \
                discount_pct = COALESCE($5, discount_pct), \
                discount_amount = COALESCE($6, discount_amount), \
                status = COALESCE($7, status), \
                updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.currency.as_ref().map(CurrencyCode::as_str))
        .bind(update.tax_mode.map(|m| m.as_str()))
        .bind(update.tax_pct.map(|p| p.value()))
        .bind(update.discount_pct.map(|p| p.value()))
        .bind(update.discount_amount.map(|a| a.value()))
        .bind(update.status.map(|s| s.as_str()))
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound("cart"));
        }

        PricingEngine::new(&mut *self.conn).recompute(id).await?;

        self.get(id).await?.ok_or(RepositoryError::NotFound("cart"))
    }

    /// Rebind a cart to a new owner.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the update fails.
    pub async fn reassign_owner(
        &mut self,
        id: CartId,
        owner: &CartOwner,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE cart.cart SET user_id = $2, session_token = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(owner.user_id())
        .bind(owner.session_token())
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Set a cart's status.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the update fails.
    pub async fn set_status(
        &mut self,
        id: CartId,
        status: CartStatus,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE cart.cart SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    /// Hard-delete a cart; lines and breakdown rows cascade.
    ///
    /// Returns `true` if a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the delete fails.
    pub async fn delete(&mut self, id: CartId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM cart.cart WHERE id = $1")
            .bind(id)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Expire one cart if it is still open and untouched since `cutoff`.
    ///
    /// The predicate is evaluated by the `UPDATE` itself, so concurrent
    /// callers (a read racing the sweeper) flip the row at most once.
    /// Returns `true` only for the caller that performed the transition.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the update fails.
    pub async fn expire_if_stale(
        &mut self,
        id: CartId,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE cart.cart SET status = 'expired', updated_at = NOW() \
             WHERE id = $1 AND status = 'open' AND updated_at < $2",
        )
        .bind(id)
        .bind(cutoff)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Expire every open cart untouched since `cutoff`.
    ///
    /// Returns the IDs that transitioned in this call.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the update fails.
    pub async fn expire_stale(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<CartId>, RepositoryError> {
        let ids = sqlx::query_scalar::<_, CartId>(
            "UPDATE cart.cart SET status = 'expired', updated_at = NOW() \
             WHERE status = 'open' AND updated_at < $1 \
             RETURNING id",
        )
        .bind(cutoff)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(ids)
    }
}
