//! Folding an anonymous cart into a user's cart at login.

use serde::Serialize;
use serde_json::json;
use sqlx::{Connection, PgConnection};
use tracing::{info, instrument, warn};

use cartkeeper_core::merge::{LineDisposition, MergePlanner, MergeStats, OmitReason};
use cartkeeper_core::{AuditAction, CartId, CartOwner, CartStatus, SessionToken, UserId};

use super::identity::CartIdentityResolver;
use super::{AuditLog, CartError};
use crate::db::{CartStore, LineItemManager, PricingEngine, RepositoryError};
use crate::models::{Cart, Caller, LineItem, NewCart};

/// Which path a merge took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    /// No anonymous cart; the user's cart is returned as is.
    Noop,
    /// The anonymous cart changed hands.
    Reassign,
    /// Anonymous lines were folded into the user's cart.
    Fuse,
}

impl MergeKind {
    const fn message(self) -> &'static str {
        match self {
            Self::Noop => "nothing to merge",
            Self::Reassign => "anonymous cart reassigned",
            Self::Fuse => "cart merged",
        }
    }
}

/// Result of a merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub kind: MergeKind,
    pub message: &'static str,
    /// The user's cart after the merge.
    pub cart: Cart,
    pub stats: MergeStats,
    /// Whether a no-op merge had to create the user's cart.
    #[serde(skip)]
    pub created: bool,
}

impl MergeOutcome {
    fn new(kind: MergeKind, cart: Cart, stats: MergeStats) -> Self {
        Self {
            kind,
            message: kind.message(),
            cart,
            stats,
            created: false,
        }
    }
}

/// Runs a merge on one transaction.
///
/// The caller owns the transaction: commit on `Ok`, drop on `Err` and the
/// user's cart is exactly as it was. Both carts are row-locked for the
/// duration, the anonymous one first.
pub struct MergeReconciler<'c> {
    conn: &'c mut PgConnection,
    max_lines: usize,
    expiry_days: i64,
}

impl<'c> MergeReconciler<'c> {
    /// Create a reconciler enforcing `max_lines` on the destination.
    #[must_use]
    pub const fn new(conn: &'c mut PgConnection, max_lines: usize, expiry_days: i64) -> Self {
        Self {
            conn,
            max_lines,
            expiry_days,
        }
    }

    /// Merge the anonymous cart of `session_token` into `user_id`'s open cart.
    ///
    /// `caller` is recorded on the merge audit entry, which is written on
    /// this transaction.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if a cart-level query fails. Failures
    /// writing individual lines are reported in the stats instead.
    #[instrument(skip(self, session_token, caller), fields(user_id = %user_id))]
    pub async fn merge(
        &mut self,
        user_id: UserId,
        session_token: &SessionToken,
        caller: &Caller,
    ) -> Result<MergeOutcome, CartError> {
        let source = self.lock_fresh_source(session_token).await?;
        let destination = self.lock_fresh_destination(user_id).await?;

        match (source, destination) {
            (None, Some(destination)) => {
                Ok(MergeOutcome::new(MergeKind::Noop, destination, MergeStats::default()))
            }
            (None, None) => {
                let cart = CartStore::new(&mut *self.conn)
                    .create(&NewCart::for_owner(CartOwner::User { user_id }))
                    .await?;
                let mut outcome = MergeOutcome::new(MergeKind::Noop, cart, MergeStats::default());
                outcome.created = true;
                Ok(outcome)
            }
            (Some(source), None) => self.reassign(source, user_id, caller).await,
            (Some(source), Some(destination)) => {
                self.fuse(&source, destination.id, caller).await
            }
        }
    }

    async fn lock_fresh_source(&mut self, token: &SessionToken) -> Result<Option<Cart>, CartError> {
        let cart = CartStore::new(&mut *self.conn)
            .open_for_token(token, true)
            .await?;
        self.drop_if_stale(cart).await
    }

    async fn lock_fresh_destination(&mut self, user_id: UserId) -> Result<Option<Cart>, CartError> {
        let cart = CartStore::new(&mut *self.conn)
            .open_for_user(user_id, true)
            .await?;
        self.drop_if_stale(cart).await
    }

    /// A stale cart is expired on the spot and takes no part in the merge.
    async fn drop_if_stale(&mut self, cart: Option<Cart>) -> Result<Option<Cart>, CartError> {
        let Some(cart) = cart else {
            return Ok(None);
        };
        match CartIdentityResolver::new(&mut *self.conn, self.expiry_days)
            .ensure_fresh(&cart)
            .await
        {
            Ok(()) => Ok(Some(cart)),
            Err(CartError::Expired) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn reassign(
        &mut self,
        source: Cart,
        user_id: UserId,
        caller: &Caller,
    ) -> Result<MergeOutcome, CartError> {
        let mut store = CartStore::new(&mut *self.conn);
        store
            .reassign_owner(source.id, &CartOwner::User { user_id })
            .await?;
        let cart = store
            .get(source.id)
            .await?
            .ok_or(CartError::NotFound)?;

        info!(cart_id = %cart.id, "Reassigned anonymous cart");
        let entry = caller
            .audit(cart.id, AuditAction::Merge)
            .with_detail(json!({ "kind": "reassign", "source_cart_id": source.id }));
        AuditLog::record_in(&mut *self.conn, &entry).await;

        Ok(MergeOutcome::new(MergeKind::Reassign, cart, MergeStats::default()))
    }

    async fn fuse(
        &mut self,
        source: &Cart,
        destination: CartId,
        caller: &Caller,
    ) -> Result<MergeOutcome, CartError> {
        let mut lines = LineItemManager::new(&mut *self.conn, self.max_lines);
        let source_lines = lines.list(source.id).await?;
        let destination_lines = lines.list(destination).await?;

        let mut planner = MergePlanner::new(
            self.max_lines,
            destination_lines.iter().map(|line| line.product_id),
        );

        for line in &source_lines {
            let disposition = planner.classify(line.product_id);
            if disposition == LineDisposition::Omit {
                planner.record_omitted(line.product_id, &OmitReason::LineCap);
                continue;
            }

            match self.write_line(disposition, line, destination).await {
                Ok(()) if disposition == LineDisposition::Fuse => planner.record_fused(),
                Ok(()) => planner.record_inserted(line.product_id),
                Err(e) => {
                    let reason = omit_reason(&e);
                    warn!(
                        error = %e,
                        product_id = %line.product_id,
                        source_cart_id = %source.id,
                        "Merge line write failed"
                    );
                    planner.record_omitted(line.product_id, &reason);
                }
            }
        }

        let stats = planner.finish();

        LineItemManager::new(&mut *self.conn, self.max_lines)
            .delete_all(source.id)
            .await?;
        CartStore::new(&mut *self.conn)
            .set_status(source.id, CartStatus::Cancelled)
            .await?;
        PricingEngine::new(&mut *self.conn)
            .recompute(destination)
            .await?;

        let cart = CartStore::new(&mut *self.conn)
            .get(destination)
            .await?
            .ok_or(CartError::NotFound)?;

        info!(
            cart_id = %cart.id,
            source_cart_id = %source.id,
            fused = stats.fused,
            added = stats.added,
            omitted = stats.omitted,
            "Merged anonymous cart"
        );

        let entry = caller.audit(cart.id, AuditAction::Merge).with_detail(json!({
            "kind": "fuse",
            "source_cart_id": source.id,
            "fused": stats.fused,
            "added": stats.added,
            "omitted": stats.omitted,
            "warnings": stats.warnings,
        }));
        AuditLog::record_in(&mut *self.conn, &entry).await;

        Ok(MergeOutcome::new(MergeKind::Fuse, cart, stats))
    }

    /// Write one source line under its own savepoint.
    async fn write_line(
        &mut self,
        disposition: LineDisposition,
        line: &LineItem,
        destination: CartId,
    ) -> Result<(), RepositoryError> {
        let mut savepoint = self.conn.begin().await?;
        let mut lines = LineItemManager::new(&mut savepoint, self.max_lines);
        match disposition {
            LineDisposition::Fuse => {
                lines
                    .fuse(destination, line.product_id, line.quantity)
                    .await?;
            }
            LineDisposition::Insert => lines.insert_copy(line, destination).await?,
            LineDisposition::Omit => return Ok(()),
        }
        savepoint.commit().await?;
        Ok(())
    }
}

fn omit_reason(err: &RepositoryError) -> OmitReason {
    let detail = match err {
        RepositoryError::Database(sqlx::Error::Database(db_err))
            if db_err.is_foreign_key_violation() =>
        {
            "product no longer exists"
        }
        _ => "line could not be written",
    };
    OmitReason::WriteFailed(detail.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_messages() {
        assert_eq!(MergeKind::Noop.message(), "nothing to merge");
        assert_eq!(MergeKind::Reassign.message(), "anonymous cart reassigned");
        assert_eq!(MergeKind::Fuse.message(), "cart merged");
    }

    #[test]
    fn test_omit_reason_hides_internal_errors() {
        let reason = omit_reason(&RepositoryError::DataCorruption("bad row".to_owned()));
        assert_eq!(
            reason,
            OmitReason::WriteFailed("line could not be written".to_owned())
        );
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(MergeKind::Reassign).ok(),
            Some(serde_json::Value::String("reassign".to_owned()))
        );
    }
}
