//! Database operations for the cart `PostgreSQL` schema.
//!
//! ## Tables
//!
//! - `cart.cart` - Cart headers and stored totals
//! - `cart.line` - Cart lines, unique per (cart, product)
//! - `cart.tax_breakdown` - Per-rule tax amounts for `multi` mode carts
//! - `cart.audit_log` - Append-only mutation log
//! - `catalog.*` - Product prices and tax rules (read-only, owned by the catalog service)
//!
//! Every repository borrows a single `PgConnection` for its lifetime. Callers
//! pass `&mut *tx` so that all reads, writes and the totals recompute of one
//! operation share a transaction.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p cartkeeper-cli -- migrate
//! ```

pub mod audit;
pub mod carts;
pub mod catalog;
pub mod lines;
pub mod pricing;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use audit::{AuditFilter, AuditRepository};
pub use carts::CartStore;
pub use catalog::CatalogRepository;
pub use lines::{LineItemManager, LineOutcome};
pub use pricing::PricingEngine;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Adding a new line would exceed the per-cart line cap.
    #[error("cart line limit reached ({0} lines)")]
    LineCapReached(usize),

    /// Constraint violation.
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Parse a TEXT column into one of the core enums.
pub(crate) fn parse_column<T>(column: &str, value: &str) -> Result<T, RepositoryError>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid {column} in database: {e}")))
}
