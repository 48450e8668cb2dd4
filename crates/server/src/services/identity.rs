//! Mapping callers to carts.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::PgConnection;
use tracing::info;

use cartkeeper_core::{AuditAction, CallerIdentity, CartId, CartStatus};

use super::{AuditLog, CartError};
use crate::db::CartStore;
use crate::models::{Cart, NewAuditEntry, NewCart};

/// How a cart is about to be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read only; no row lock.
    Read,
    /// Locks the row whatever its status.
    Lock,
    /// Line or header mutation; locks the row and requires an open cart.
    Write,
}

/// Resolves a request to the cart it may act on.
///
/// Runs on the caller's transaction. When a read notices that an open cart
/// went stale it expires the row (and writes the `expire` audit entry) on
/// that transaction, so the caller must commit even when it gets
/// [`CartError::Expired`] back.
pub struct CartIdentityResolver<'c> {
    conn: &'c mut PgConnection,
    expiry_days: i64,
}

impl<'c> CartIdentityResolver<'c> {
    /// Create a resolver that treats carts idle for `expiry_days` as expired.
    #[must_use]
    pub const fn new(conn: &'c mut PgConnection, expiry_days: i64) -> Self {
        Self { conn, expiry_days }
    }

    fn cutoff(&self) -> DateTime<Utc> {
        Utc::now() - Duration::days(self.expiry_days)
    }

    /// Load a cart by ID on behalf of `caller`.
    ///
    /// Checks, in order: existence, ownership (a caller without any identity
    /// never passes), expiry, and for [`Access::Write`] that the cart is
    /// still open. An already expired cart is reported as `Expired`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Forbidden`, `Expired` or `NotOpen` as above, or
    /// `Repository` if a query fails.
    pub async fn authorize(
        &mut self,
        id: CartId,
        caller: &CallerIdentity,
        access: Access,
    ) -> Result<Cart, CartError> {
        let mut store = CartStore::new(&mut *self.conn);
        let cart = match access {
            Access::Read => store.get(id).await?,
            Access::Lock | Access::Write => store.lock(id).await?,
        }
        .ok_or(CartError::NotFound)?;

        if !cart.owner.is_owned_by(caller) {
            return Err(CartError::Forbidden);
        }

        self.ensure_fresh(&cart).await?;

        if access == Access::Write && !cart.status.is_open() {
            return Err(CartError::NotOpen);
        }

        Ok(cart)
    }

    /// The caller's most recently updated open cart that has not gone stale.
    ///
    /// # Errors
    ///
    /// Returns `Repository` if a query fails.
    pub async fn find(&mut self, caller: &CallerIdentity) -> Result<Option<Cart>, CartError> {
        let Some(cart) = CartStore::new(&mut *self.conn)
            .get_by_identity(caller)
            .await?
        else {
            return Ok(None);
        };

        match self.ensure_fresh(&cart).await {
            Ok(()) => Ok(Some(cart)),
            Err(CartError::Expired) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The caller's open cart, created on a miss.
    ///
    /// A new cart is owned by the user id when present, else by the token.
    /// Returns the cart and whether it was created.
    ///
    /// # Errors
    ///
    /// Returns `MissingIdentity` if the caller presented no identity.
    /// Returns `Repository` if a query fails.
    pub async fn resolve(&mut self, caller: &CallerIdentity) -> Result<(Cart, bool), CartError> {
        let owner = caller.preferred_owner().ok_or(CartError::MissingIdentity)?;

        if let Some(cart) = self.find(caller).await? {
            return Ok((cart, false));
        }

        let cart = CartStore::new(&mut *self.conn)
            .create(&NewCart::for_owner(owner))
            .await?;
        info!(cart_id = %cart.id, "Created cart on resolve");
        Ok((cart, true))
    }

    /// Expire `cart` if it is open and stale.
    ///
    /// Only the transaction whose conditional update flips the row writes
    /// the audit entry, so a read racing the sweeper logs at most once.
    pub(crate) async fn ensure_fresh(&mut self, cart: &Cart) -> Result<(), CartError> {
        if cart.status == CartStatus::Expired {
            return Err(CartError::Expired);
        }

        let cutoff = self.cutoff();
        if !cart.is_stale(cutoff) {
            return Ok(());
        }

        if CartStore::new(&mut *self.conn)
            .expire_if_stale(cart.id, cutoff)
            .await?
        {
            info!(cart_id = %cart.id, "Expired stale cart on read");
            let entry = NewAuditEntry::system(
                cart.id,
                AuditAction::Expire,
                json!({ "trigger": "read", "threshold_days": self.expiry_days }),
            );
            AuditLog::record_in(&mut *self.conn, &entry).await;
        }

        Err(CartError::Expired)
    }
}
