//! CLI command implementations.

pub mod maintenance;
pub mod migrate;

use sqlx::PgPool;
use thiserror::Error;

use cartkeeper_server::config::{ConfigError, database_url_from_env};
use cartkeeper_server::db::create_pool;
use cartkeeper_server::services::CartError;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Cart operation failed: {0}")]
    Cart(#[from] CartError),

    #[error("--days must be positive, got {0}")]
    InvalidDays(i64),
}

/// Connect using `CARTKEEPER_DATABASE_URL`.
async fn connect() -> Result<PgPool, CommandError> {
    let database_url = database_url_from_env()?;
    tracing::info!("Connecting to database...");
    Ok(create_pool(&database_url).await?)
}
