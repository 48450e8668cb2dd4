//! Database migration command.
//!
//! Applies `crates/server/migrations/`, which are embedded at build time.
//! The `catalog` tables in the first migration are created only if the
//! catalog service has not already created them.

use super::{CommandError, connect};

/// Apply all pending migrations.
///
/// # Errors
///
/// Returns an error if the connection or a migration fails.
pub async fn run() -> Result<(), CommandError> {
    let pool = connect().await?;

    tracing::info!("Running migrations...");
    sqlx::migrate!("../server/migrations").run(&pool).await?;

    tracing::info!("Migrations complete");
    Ok(())
}
