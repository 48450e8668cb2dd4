//! Best-effort audit logging.
//!
//! Two write paths, neither of which can fail the cart operation that
//! produced the entry:
//!
//! - [`AuditLog::append`] hands entries to a bounded queue drained by a
//!   background task. Used after a transaction commits.
//! - [`AuditLog::record_in`] writes inside the caller's transaction under a
//!   savepoint. Used by the merge and the sweeper, whose entries should
//!   commit or roll back with the change they describe.

use sqlx::{Connection, PgConnection, PgPool};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::AuditRepository;
use crate::models::NewAuditEntry;

/// Entries written per connection checkout by the background task.
const MAX_BATCH: usize = 64;

/// Handle to the background audit writer. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuditLog {
    sender: mpsc::Sender<NewAuditEntry>,
}

impl AuditLog {
    /// Start the background writer.
    ///
    /// The task stops once every `AuditLog` handle is dropped and the queue
    /// is drained.
    #[must_use]
    pub fn spawn(pool: PgPool, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_writer(pool, receiver));
        (Self { sender }, handle)
    }

    /// Queue an entry. Never blocks; a full or closed queue drops the entry.
    pub fn append(&self, entry: NewAuditEntry) {
        if let Err(e) = self.sender.try_send(entry) {
            let (reason, entry) = match e {
                mpsc::error::TrySendError::Full(entry) => ("queue full", entry),
                mpsc::error::TrySendError::Closed(entry) => ("writer stopped", entry),
            };
            warn!(
                cart_id = ?entry.cart_id,
                action = %entry.action,
                reason,
                "Dropping audit entry"
            );
        }
    }

    /// Write an entry inside the caller's transaction.
    ///
    /// The insert runs under a savepoint, so a failure is rolled back on its
    /// own and the surrounding transaction stays usable. Returns whether
    /// the entry was written.
    pub async fn record_in(conn: &mut PgConnection, entry: &NewAuditEntry) -> bool {
        let result = async {
            let mut savepoint = conn.begin().await?;
            AuditRepository::new(&mut savepoint).insert(entry).await?;
            savepoint.commit().await?;
            Ok::<(), crate::db::RepositoryError>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(
                    error = %e,
                    cart_id = ?entry.cart_id,
                    action = %entry.action,
                    "Failed to write audit entry"
                );
                false
            }
        }
    }
}

async fn run_writer(pool: PgPool, mut receiver: mpsc::Receiver<NewAuditEntry>) {
    let mut batch = Vec::with_capacity(MAX_BATCH);

    while receiver.recv_many(&mut batch, MAX_BATCH).await > 0 {
        write_batch(&pool, &batch).await;
        batch.clear();
    }

    info!("Audit writer stopped");
}

async fn write_batch(pool: &PgPool, batch: &[NewAuditEntry]) {
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => {
            error!(error = %e, dropped = batch.len(), "Audit writer could not get a connection");
            return;
        }
    };

    let mut repo = AuditRepository::new(&mut conn);
    for entry in batch {
        if let Err(e) = repo.insert(entry).await {
            error!(
                error = %e,
                cart_id = ?entry.cart_id,
                action = %entry.action,
                "Failed to write audit entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use cartkeeper_core::{AuditAction, CartId};
    use serde_json::json;

    use super::*;

    fn entry() -> NewAuditEntry {
        NewAuditEntry::system(CartId::new(1), AuditAction::Expire, json!({}))
    }

    #[tokio::test]
    async fn test_append_on_full_queue_does_not_block() {
        let (sender, mut receiver) = mpsc::channel(1);
        let log = AuditLog { sender };

        log.append(entry());
        log.append(entry());

        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_append_after_writer_stopped_is_silent() {
        let (sender, receiver) = mpsc::channel(4);
        drop(receiver);
        let log = AuditLog { sender };

        log.append(entry());
    }
}
