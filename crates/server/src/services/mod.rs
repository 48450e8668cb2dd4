//! Business logic services.
//!
//! The components that run inside a single transaction (`CartIdentityResolver`,
//! `MergeReconciler`, `ExpirationSweeper`) borrow a connection, like the
//! repositories they build on. `CartService` and `MaintenanceService` own the
//! pool, open and commit transactions, and hand finished audit entries to the
//! background writer.

pub mod audit;
pub mod carts;
pub mod expiration;
pub mod identity;
pub mod maintenance;
pub mod merge;

use thiserror::Error;

use crate::db::RepositoryError;

pub use audit::AuditLog;
pub use carts::{CartService, CartSnapshot, LineChange};
pub use expiration::{ExpirationSweeper, SweepReport, spawn_periodic, sweep_once};
pub use identity::{Access, CartIdentityResolver};
pub use maintenance::{AuditPage, MaintenanceService, PurgeReport};
pub use merge::{MergeKind, MergeOutcome, MergeReconciler};

/// Errors from cart operations.
///
/// Everything except `Repository` is an expected outcome with a message that
/// is safe to show to the caller.
#[derive(Debug, Error)]
pub enum CartError {
    /// Database or data integrity failure.
    #[error(transparent)]
    Repository(RepositoryError),

    /// The caller asserted neither a user id nor a session token.
    #[error("caller identity required")]
    MissingIdentity,

    /// The cart does not exist.
    #[error("cart not found")]
    NotFound,

    /// The cart exists but has expired.
    #[error("cart expired")]
    Expired,

    /// The caller does not own the cart.
    #[error("access denied")]
    Forbidden,

    /// The cart is no longer open for changes.
    #[error("cart is not open")]
    NotOpen,

    /// The cart has no line for the product.
    #[error("line not found")]
    LineNotFound,

    /// The product is unknown or inactive.
    #[error("product not found")]
    ProductNotFound,

    /// Expiry is owned by the sweeper and may not be set by callers.
    #[error("status cannot be set to expired")]
    InvalidStatusChange,

    /// A merge named a user other than the authenticated one.
    #[error("merge user does not match caller")]
    MergeUserMismatch,

    /// A new line would exceed the per-cart cap.
    #[error("cart line limit reached ({0} lines)")]
    LineCapReached(usize),
}

impl From<RepositoryError> for CartError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound("cart") => Self::NotFound,
            RepositoryError::NotFound("line") => Self::LineNotFound,
            RepositoryError::NotFound("product") => Self::ProductNotFound,
            RepositoryError::LineCapReached(cap) => Self::LineCapReached(cap),
            other => Self::Repository(other),
        }
    }
}

impl From<sqlx::Error> for CartError {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::Database(err))
    }
}
