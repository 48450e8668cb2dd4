//! Operator tasks: sweeping, audit retention and audit export.

use std::fmt::Write as _;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, instrument};

use super::expiration::{SweepReport, sweep_once};
use super::CartError;
use crate::config::CartPolicy;
use crate::db::{AuditFilter, AuditRepository};
use crate::models::AuditEntry;

/// Largest page the audit query returns.
pub const MAX_AUDIT_PAGE_SIZE: u32 = 200;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_AUDIT_PAGE_SIZE: u32 = 50;

const CSV_HEADER: &str =
    "id,cart_id,action,detail,user_id,session_token,ip,user_agent,request_id,created_at";

/// What an audit purge did.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeReport {
    pub deleted: u64,
    pub retention_days: i64,
    pub cutoff: DateTime<Utc>,
}

/// One page of audit entries.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub page: u32,
    pub page_size: u32,
    /// Entries matching the filter across all pages.
    pub total: i64,
}

/// Maintenance operations over the whole store.
#[derive(Clone)]
pub struct MaintenanceService {
    pool: PgPool,
    policy: CartPolicy,
}

impl MaintenanceService {
    #[must_use]
    pub const fn new(pool: PgPool, policy: CartPolicy) -> Self {
        Self { pool, policy }
    }

    /// Expire stale carts using the configured threshold.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if the sweep fails.
    pub async fn sweep(&self) -> Result<SweepReport, CartError> {
        sweep_once(&self.pool, self.policy.expiry_days).await
    }

    /// Delete audit entries older than the retention window.
    ///
    /// `days` overrides the configured window when positive.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if the delete fails.
    #[instrument(skip(self))]
    pub async fn purge_audit(&self, days: Option<i64>) -> Result<PurgeReport, CartError> {
        let retention_days = days
            .filter(|d| *d > 0)
            .unwrap_or(self.policy.audit_retention_days);
        let cutoff = Utc::now() - Duration::days(retention_days);

        let mut conn = self.pool.acquire().await?;
        let deleted = AuditRepository::new(&mut conn)
            .purge_older_than(cutoff)
            .await?;

        info!(deleted, retention_days, "Purged audit entries");

        Ok(PurgeReport {
            deleted,
            retention_days,
            cutoff,
        })
    }

    /// One page of matching audit entries, newest first.
    ///
    /// `page` is 1-based; both arguments are clamped into range.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if a query fails.
    pub async fn audit_page(
        &self,
        filter: &AuditFilter,
        page: u32,
        page_size: u32,
    ) -> Result<AuditPage, CartError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_AUDIT_PAGE_SIZE);

        let mut conn = self.pool.acquire().await?;
        let mut repo = AuditRepository::new(&mut conn);
        let total = repo.count(filter).await?;
        let entries = repo.page(filter, page, page_size).await?;

        Ok(AuditPage {
            entries,
            page,
            page_size,
            total,
        })
    }

    /// Every matching audit entry as CSV, newest first.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Repository` if the query fails.
    pub async fn export_audit_csv(&self, filter: &AuditFilter) -> Result<String, CartError> {
        let mut conn = self.pool.acquire().await?;
        let entries = AuditRepository::new(&mut conn).export(filter).await?;
        Ok(render_csv(&entries))
    }
}

fn render_csv(entries: &[AuditEntry]) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + 1 + entries.len() * 128);
    out.push_str(CSV_HEADER);
    out.push('\n');

    for entry in entries {
        let detail = entry
            .detail
            .as_ref()
            .map(serde_json::Value::to_string)
            .unwrap_or_default();
        let fields = [
            entry.id.to_string(),
            entry.cart_id.map(|id| id.to_string()).unwrap_or_default(),
            entry.action.to_string(),
            detail,
            entry.user_id.map(|id| id.to_string()).unwrap_or_default(),
            entry.session_token.clone().unwrap_or_default(),
            entry.ip.clone().unwrap_or_default(),
            entry.user_agent.clone().unwrap_or_default(),
            entry.request_id.clone().unwrap_or_default(),
            entry.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        ];

        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            push_csv_field(&mut out, field);
        }
        out.push('\n');
    }

    out
}

/// RFC 4180 quoting: fields containing a separator, quote or line break are
/// wrapped in quotes with embedded quotes doubled.
fn push_csv_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        let _ = write!(out, "\"{}\"", field.replace('"', "\"\""));
    } else {
        out.push_str(field);
    }
}
