//! Audit log repository.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use cartkeeper_core::{AuditAction, AuditEntryId, CartId, UserId};

use super::{RepositoryError, parse_column};
use crate::models::{AuditEntry, NewAuditEntry};

const AUDIT_COLUMNS: &str =
    "id, cart_id, action, detail, user_id, session_token, ip, user_agent, request_id, created_at";

/// Filter predicate shared by the count, page and export queries.
///
/// Every parameter is optional: `$n IS NULL` disables that clause.
const FILTER_CLAUSE: &str = "($1::int4 IS NULL OR cart_id = $1) \
     AND ($2::text IS NULL OR action = $2) \
     AND ($3::timestamptz IS NULL OR created_at >= $3) \
     AND ($4::timestamptz IS NULL OR created_at <= $4)";

/// Audit query filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    /// Only entries for this cart.
    pub cart_id: Option<CartId>,
    /// Only entries with this action.
    pub action: Option<AuditAction>,
    /// Only entries at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Only entries at or before this instant.
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: AuditEntryId,
    cart_id: Option<CartId>,
    action: String,
    detail: Option<serde_json::Value>,
    user_id: Option<UserId>,
    session_token: Option<String>,
    ip: Option<String>,
    user_agent: Option<String>,
    request_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = RepositoryError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            cart_id: row.cart_id,
            action: parse_column("audit action", &row.action)?,
            detail: row.detail,
            user_id: row.user_id,
            session_token: row.session_token,
            ip: row.ip,
            user_agent: row.user_agent,
            request_id: row.request_id,
            created_at: row.created_at,
        })
    }
}

/// Repository for the append-only audit log.
pub struct AuditRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> AuditRepository<'c> {
    /// Create a new audit repository.
    #[must_use]
    pub const fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    /// Append one entry.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn insert(&mut self, entry: &NewAuditEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO cart.audit_log \
             (cart_id, action, detail, user_id, session_token, ip, user_agent, request_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entry.cart_id)
        .bind(entry.action.as_str())
        .bind(entry.detail.as_ref())
        .bind(entry.actor.user_id)
        .bind(entry.actor.session_token.as_ref())
        .bind(entry.client.ip.as_deref())
        .bind(entry.client.user_agent.as_deref())
        .bind(entry.client.request_id.as_deref())
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Delete entries created before `cutoff`.
    ///
    /// Returns the number of entries deleted.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the delete fails.
    pub async fn purge_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM cart.audit_log WHERE created_at < $1")
            .bind(cutoff)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of entries matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn count(&mut self, filter: &AuditFilter) -> Result<i64, RepositoryError> {
        let sql = format!("SELECT COUNT(*) FROM cart.audit_log WHERE {FILTER_CLAUSE}");
        let total = sqlx::query_scalar::<_, i64>(&sql)
            .bind(filter.cart_id)
            .bind(filter.action.map(AuditAction::as_str))
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(total)
    }

    /// One page of matching entries, newest first.
    ///
    /// `page` is 1-based.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn page(
        &mut self,
        filter: &AuditFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<AuditEntry>, RepositoryError> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} \
             FROM cart.audit_log WHERE {FILTER_CLAUSE} \
             ORDER BY created_at DESC, id DESC LIMIT $5 OFFSET $6"
        );
        sqlx::query_as::<_, AuditRow>(&sql)
            .bind(filter.cart_id)
            .bind(filter.action.map(AuditAction::as_str))
            .bind(filter.from)
            .bind(filter.to)
            .bind(i64::from(page_size))
            .bind(offset)
            .fetch_all(&mut *self.conn)
            .await?
            .into_iter()
            .map(AuditEntry::try_from)
            .collect()
    }

    /// Every matching entry, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn export(&mut self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, RepositoryError> {
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} \
             FROM cart.audit_log WHERE {FILTER_CLAUSE} \
             ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, AuditRow>(&sql)
            .bind(filter.cart_id)
            .bind(filter.action.map(AuditAction::as_str))
            .bind(filter.from)
            .bind(filter.to)
            .fetch_all(&mut *self.conn)
            .await?
            .into_iter()
            .map(AuditEntry::try_from)
            .collect()
    }
}
