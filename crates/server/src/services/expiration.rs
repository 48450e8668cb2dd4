//! Expiration of abandoned carts.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use cartkeeper_core::{AuditAction, CartId};

use super::{AuditLog, CartError};
use crate::db::CartStore;
use crate::models::NewAuditEntry;

/// What one sweep did.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    /// Carts that transitioned to `expired` in this run.
    pub expired: Vec<CartId>,
    pub count: usize,
    pub threshold_days: i64,
    pub cutoff: DateTime<Utc>,
}

/// Expires every open cart idle for longer than the threshold.
pub struct ExpirationSweeper<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> ExpirationSweeper<'c> {
    #[must_use]
    pub const fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    /// Run one sweep.
    ///
    /// The transition is a single predicate-guarded update, so running the
    /// sweep again straight away (or concurrently with a read that expires
    /// the same cart) changes nothing and writes no second `expire` entry.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if the update fails.
    #[instrument(skip(self))]
    pub async fn sweep(&mut self, expiry_days: i64) -> Result<SweepReport, CartError> {
        let cutoff = Utc::now() - Duration::days(expiry_days);
        let expired = CartStore::new(&mut *self.conn)
            .expire_stale(cutoff)
            .await?;

        for &cart_id in &expired {
            let entry = NewAuditEntry::system(
                cart_id,
                AuditAction::Expire,
                json!({ "trigger": "sweep", "threshold_days": expiry_days }),
            );
            AuditLog::record_in(&mut *self.conn, &entry).await;
        }

        if !expired.is_empty() {
            info!(count = expired.len(), threshold_days = expiry_days, "Expired stale carts");
        }

        Ok(SweepReport {
            count: expired.len(),
            expired,
            threshold_days: expiry_days,
            cutoff,
        })
    }
}

/// Sweep on a pool, in a transaction of its own.
///
/// # Errors
///
/// Returns `CartError::Repository` if the sweep or the commit fails.
pub async fn sweep_once(pool: &PgPool, expiry_days: i64) -> Result<SweepReport, CartError> {
    let mut tx = pool.begin().await?;
    let report = ExpirationSweeper::new(&mut tx).sweep(expiry_days).await?;
    tx.commit().await?;
    Ok(report)
}

/// Start the periodic sweeper.
///
/// The first sweep runs one full `interval` after startup. A failed sweep
/// is logged and retried on the next tick.
#[must_use]
pub fn spawn_periodic(pool: PgPool, expiry_days: i64, interval: StdDuration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = sweep_once(&pool, expiry_days).await {
                error!(error = %e, "Periodic cart sweep failed");
            }
        }
    })
}
