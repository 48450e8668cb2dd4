//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::ServerConfig;
use crate::services::{AuditLog, CartService, MaintenanceService};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    pool: PgPool,
    carts: CartService,
    maintenance: MaintenanceService,
}

impl AppState {
    /// Create a new application state.
    ///
    /// `audit` is the handle of an already running audit writer.
    #[must_use]
    pub fn new(config: ServerConfig, pool: PgPool, audit: AuditLog) -> Self {
        let carts = CartService::new(pool.clone(), config.policy.clone(), audit);
        let maintenance = MaintenanceService::new(pool.clone(), config.policy.clone());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                carts,
                maintenance,
            }),
        }
    }

    /// Get a reference to the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    #[must_use]
    pub fn carts(&self) -> &CartService {
        &self.inner.carts
    }

    #[must_use]
    pub fn maintenance(&self) -> &MaintenanceService {
        &self.inner.maintenance
    }
}
