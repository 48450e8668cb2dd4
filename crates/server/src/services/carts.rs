//! Cart operations as exposed over HTTP.
//!
//! Every operation runs in one transaction: authorize the caller against the
//! cart, mutate, recompute, commit. Audit entries go to the background
//! writer once the commit has succeeded.

use serde::Serialize;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, instrument};

use cartkeeper_core::pricing::TaxShare;
use cartkeeper_core::{Amount, AuditAction, CartId, CartStatus, ProductId, Quantity, SessionToken, UserId};

use super::identity::{Access, CartIdentityResolver};
use super::merge::{MergeOutcome, MergeReconciler};
use super::{AuditLog, CartError};
use crate::config::CartPolicy;
use crate::db::{CartStore, LineItemManager, LineOutcome, PricingEngine};
use crate::models::{Caller, Cart, CartHeaderUpdate, LineCount, LineItem, NewCart};

/// A cart with its lines and, in multi-tax mode, the per-rule breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct CartSnapshot {
    pub cart: Cart,
    pub lines: Vec<LineItem>,
    pub tax_breakdown: Vec<TaxShare>,
}

/// A changed line together with the cart totals it produced.
#[derive(Debug, Clone, Serialize)]
pub struct LineChange {
    pub line: LineItem,
    pub cart: Cart,
}

/// Cart lifecycle operations.
#[derive(Clone)]
pub struct CartService {
    pool: PgPool,
    policy: CartPolicy,
    audit: AuditLog,
}

impl CartService {
    #[must_use]
    pub const fn new(pool: PgPool, policy: CartPolicy, audit: AuditLog) -> Self {
        Self {
            pool,
            policy,
            audit,
        }
    }

    /// Open a transaction and authorize `caller` against cart `id` in it.
    ///
    /// A cart found stale is expired in that transaction, which is then
    /// committed before `Expired` is returned.
    async fn begin_authorized(
        &self,
        id: CartId,
        caller: &Caller,
        access: Access,
    ) -> Result<(Transaction<'static, Postgres>, Cart), CartError> {
        let mut tx = self.pool.begin().await?;
        let result = CartIdentityResolver::new(&mut tx, self.policy.expiry_days)
            .authorize(id, &caller.identity, access)
            .await;

        match result {
            Ok(cart) => Ok((tx, cart)),
            Err(CartError::Expired) => {
                tx.commit().await?;
                Err(CartError::Expired)
            }
            Err(e) => Err(e),
        }
    }

    /// Create a new cart for the caller with the pricing fields `settings`
    /// sets. Its status is always `open`.
    ///
    /// # Errors
    ///
    /// Returns `CartError::MissingIdentity` if the caller has no identity.
    #[instrument(skip(self, caller, settings))]
    pub async fn create(
        &self,
        caller: &Caller,
        settings: CartHeaderUpdate,
    ) -> Result<Cart, CartError> {
        let owner = caller
            .identity
            .preferred_owner()
            .ok_or(CartError::MissingIdentity)?;

        let mut conn = self.pool.acquire().await?;
        let cart = CartStore::new(&mut conn)
            .create(&NewCart::for_owner(owner).with_settings(&settings))
            .await?;

        info!(cart_id = %cart.id, currency = %cart.currency, "Created cart");
        let entry = caller.audit(cart.id, AuditAction::Create);
        let entry = if settings.is_empty() {
            entry
        } else {
            entry.with_detail(header_detail(&settings))
        };
        self.audit.append(entry);
        Ok(cart)
    }

    /// The caller's open cart, created on a miss.
    ///
    /// # Errors
    ///
    /// Returns `CartError::MissingIdentity` if the caller has no identity.
    #[instrument(skip(self, caller))]
    pub async fn current(&self, caller: &Caller) -> Result<Cart, CartError> {
        let mut tx = self.pool.begin().await?;
        let (cart, created) = CartIdentityResolver::new(&mut tx, self.policy.expiry_days)
            .resolve(&caller.identity)
            .await?;
        tx.commit().await?;

        if created {
            self.audit.append(caller.audit(cart.id, AuditAction::Create));
        }
        Ok(cart)
    }

    /// Read a cart with its lines.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Forbidden` or `Expired`.
    #[instrument(skip(self, caller), fields(cart_id = %id))]
    pub async fn get(&self, id: CartId, caller: &Caller) -> Result<CartSnapshot, CartError> {
        let (mut tx, cart) = self.begin_authorized(id, caller, Access::Read).await?;

        let lines = LineItemManager::new(&mut tx, self.policy.max_lines)
            .list(id)
            .await?;
        let tax_breakdown = PricingEngine::new(&mut tx).breakdown(id).await?;
        tx.commit().await?;

        Ok(CartSnapshot {
            cart,
            lines,
            tax_breakdown,
        })
    }

    /// Change header fields and recompute totals.
    ///
    /// An empty update returns the cart unchanged.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatusChange` when asked to set `expired`.
    /// Returns `NotFound`, `Forbidden`, `Expired` or `NotOpen`.
    #[instrument(skip(self, caller, update), fields(cart_id = %id))]
    pub async fn update_header(
        &self,
        id: CartId,
        caller: &Caller,
        update: CartHeaderUpdate,
    ) -> Result<Cart, CartError> {
        if update.status == Some(CartStatus::Expired) {
            return Err(CartError::InvalidStatusChange);
        }

        let (mut tx, cart) = self.begin_authorized(id, caller, Access::Write).await?;
        if update.is_empty() {
            tx.commit().await?;
            return Ok(cart);
        }

        let cart = CartStore::new(&mut tx).update_header(id, &update).await?;
        tx.commit().await?;

        self.audit.append(
            caller
                .audit(id, AuditAction::UpdateHeader)
                .with_detail(header_detail(&update)),
        );
        Ok(cart)
    }

    /// Hard-delete a cart and everything attached to it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Forbidden` or `Expired`.
    #[instrument(skip(self, caller), fields(cart_id = %id))]
    pub async fn delete(&self, id: CartId, caller: &Caller) -> Result<(), CartError> {
        let (mut tx, _) = self.begin_authorized(id, caller, Access::Lock).await?;
        if !CartStore::new(&mut tx).delete(id).await? {
            return Err(CartError::NotFound);
        }
        tx.commit().await?;

        info!("Deleted cart");
        self.audit.append(caller.audit(id, AuditAction::DeleteCart));
        Ok(())
    }

    /// All lines of a cart.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Forbidden` or `Expired`.
    #[instrument(skip(self, caller), fields(cart_id = %id))]
    pub async fn list_lines(&self, id: CartId, caller: &Caller) -> Result<Vec<LineItem>, CartError> {
        let (mut tx, _) = self.begin_authorized(id, caller, Access::Read).await?;
        let lines = LineItemManager::new(&mut tx, self.policy.max_lines)
            .list(id)
            .await?;
        tx.commit().await?;
        Ok(lines)
    }

    /// Distinct lines and total quantity.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Forbidden` or `Expired`.
    #[instrument(skip(self, caller), fields(cart_id = %id))]
    pub async fn count_lines(&self, id: CartId, caller: &Caller) -> Result<LineCount, CartError> {
        let (mut tx, _) = self.begin_authorized(id, caller, Access::Read).await?;
        let count = LineItemManager::new(&mut tx, self.policy.max_lines)
            .count(id)
            .await?;
        tx.commit().await?;
        Ok(count)
    }

    /// Add a product, or grow its existing line.
    ///
    /// # Errors
    ///
    /// Returns `LineCapReached` if a new line would exceed the cap.
    /// Returns `ProductNotFound` if the product is unknown and no price was given.
    /// Returns `NotFound`, `Forbidden`, `Expired` or `NotOpen`.
    #[instrument(skip(self, caller), fields(cart_id = %id, product_id = %product_id))]
    pub async fn add_line(
        &self,
        id: CartId,
        caller: &Caller,
        product_id: ProductId,
        quantity: Quantity,
        unit_price: Option<Amount>,
    ) -> Result<LineChange, CartError> {
        let (mut tx, _) = self.begin_authorized(id, caller, Access::Write).await?;
        let (line, outcome) = LineItemManager::new(&mut tx, self.policy.max_lines)
            .add(id, product_id, quantity, unit_price)
            .await?;
        let cart = reload(&mut tx, id).await?;
        tx.commit().await?;

        let detail = json!({
            "product_id": product_id,
            "quantity": quantity,
            "unit_price": line.unit_price,
            "incremented": outcome == LineOutcome::Incremented,
        });
        self.audit
            .append(caller.audit(id, AuditAction::AddLine).with_detail(detail));
        Ok(LineChange { line, cart })
    }

    /// Set a line's quantity and optionally its price.
    ///
    /// # Errors
    ///
    /// Returns `LineNotFound` if the cart has no line for the product.
    /// Returns `NotFound`, `Forbidden`, `Expired` or `NotOpen`.
    #[instrument(skip(self, caller), fields(cart_id = %id, product_id = %product_id))]
    pub async fn update_line(
        &self,
        id: CartId,
        caller: &Caller,
        product_id: ProductId,
        quantity: Quantity,
        unit_price: Option<Amount>,
    ) -> Result<LineChange, CartError> {
        let (mut tx, _) = self.begin_authorized(id, caller, Access::Write).await?;
        let line = LineItemManager::new(&mut tx, self.policy.max_lines)
            .update(id, product_id, quantity, unit_price)
            .await?;
        let cart = reload(&mut tx, id).await?;
        tx.commit().await?;

        let detail = json!({
            "product_id": product_id,
            "quantity": quantity,
            "unit_price": unit_price.map(|p| p.value()),
        });
        self.audit
            .append(caller.audit(id, AuditAction::UpdateLine).with_detail(detail));
        Ok(LineChange { line, cart })
    }

    /// Remove a product's line.
    ///
    /// # Errors
    ///
    /// Returns `LineNotFound` if the cart has no line for the product.
    /// Returns `NotFound`, `Forbidden`, `Expired` or `NotOpen`.
    #[instrument(skip(self, caller), fields(cart_id = %id, product_id = %product_id))]
    pub async fn remove_line(
        &self,
        id: CartId,
        caller: &Caller,
        product_id: ProductId,
    ) -> Result<Cart, CartError> {
        let (mut tx, _) = self.begin_authorized(id, caller, Access::Write).await?;
        LineItemManager::new(&mut tx, self.policy.max_lines)
            .remove(id, product_id)
            .await?;
        let cart = reload(&mut tx, id).await?;
        tx.commit().await?;

        self.audit.append(
            caller
                .audit(id, AuditAction::RemoveLine)
                .with_detail(json!({ "product_id": product_id })),
        );
        Ok(cart)
    }

    /// Remove every line; totals drop to zero.
    ///
    /// Returns the emptied cart and the number of lines removed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Forbidden`, `Expired` or `NotOpen`.
    #[instrument(skip(self, caller), fields(cart_id = %id))]
    pub async fn empty(&self, id: CartId, caller: &Caller) -> Result<(Cart, u64), CartError> {
        let (mut tx, _) = self.begin_authorized(id, caller, Access::Write).await?;
        let removed = LineItemManager::new(&mut tx, self.policy.max_lines)
            .empty(id)
            .await?;
        let cart = reload(&mut tx, id).await?;
        tx.commit().await?;

        self.audit.append(
            caller
                .audit(id, AuditAction::Empty)
                .with_detail(json!({ "removed": removed })),
        );
        Ok((cart, removed))
    }

    /// Fold the anonymous cart of `session_token` into `user_id`'s cart.
    ///
    /// The caller must be authenticated as `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `MergeUserMismatch` if the caller is not `user_id`.
    /// Returns `Repository` if the merge fails; nothing is changed then.
    #[instrument(skip(self, caller, session_token), fields(user_id = %user_id))]
    pub async fn merge(
        &self,
        caller: &Caller,
        user_id: UserId,
        session_token: &SessionToken,
    ) -> Result<MergeOutcome, CartError> {
        if caller.identity.user_id != Some(user_id) {
            return Err(CartError::MergeUserMismatch);
        }

        let mut tx = self.pool.begin().await?;
        let outcome = MergeReconciler::new(&mut tx, self.policy.max_lines, self.policy.expiry_days)
            .merge(user_id, session_token, caller)
            .await?;
        tx.commit().await?;

        if outcome.created {
            self.audit
                .append(caller.audit(outcome.cart.id, AuditAction::Create));
        }
        Ok(outcome)
    }
}

async fn reload(tx: &mut Transaction<'static, Postgres>, id: CartId) -> Result<Cart, CartError> {
    CartStore::new(tx).get(id).await?.ok_or(CartError::NotFound)
}


/// Audit detail for header fields; unset fields are `null`.
fn header_detail(update: &CartHeaderUpdate) -> serde_json::Value {
    json!({
        "currency": update.currency.map(|c| c.to_string()),
        "tax_mode": update.tax_mode,
        "tax_pct": update.tax_pct.map(|p| p.value()),
        "discount_pct": update.discount_pct.map(|p| p.value()),
        "discount_amount": update.discount_amount.map(|a| a.value()),
        "status": update.status,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartkeeper_core::{CurrencyCode, Percent, TaxMode};
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_header_detail_lists_changed_fields() {
        let update = CartHeaderUpdate {
            currency: Some(CurrencyCode::parse("EUR").unwrap()),
            tax_mode: Some(TaxMode::Multi),
            discount_pct: Some(Percent::new(dec!(5)).unwrap()),
            ..Default::default()
        };
        let detail = header_detail(&update);
        assert_eq!(detail["currency"], "EUR");
        assert_eq!(detail["tax_mode"], "multi");
        assert_eq!(detail["discount_pct"], "5");
        assert!(detail["tax_pct"].is_null());
        assert!(detail["status"].is_null());
    }
}
