//! Maintenance route handlers, guarded by [`MaintenanceAccess`].

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use cartkeeper_core::{AuditAction, CartId};

use super::{Envelope, QueryParams};
use crate::db::AuditFilter;
use crate::error::{AppError, Result};
use crate::middleware::MaintenanceAccess;
use crate::services::maintenance::DEFAULT_AUDIT_PAGE_SIZE;
use crate::services::{AuditPage, PurgeReport, SweepReport};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PurgeQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditFormat {
    #[default]
    Json,
    Csv,
}

/// Filters and paging for `GET /maintenance/audit`.
#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub format: AuditFormat,
    pub cart_id: Option<i32>,
    pub action: Option<AuditAction>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl AuditQuery {
    fn filter(&self) -> Result<AuditFilter> {
        let cart_id = self
            .cart_id
            .map(|raw| {
                CartId::parse_positive(raw)
                    .ok_or_else(|| AppError::BadRequest("invalid cart id".to_string()))
            })
            .transpose()?;

        if let (Some(from), Some(to)) = (self.from, self.to)
            && from > to
        {
            return Err(AppError::BadRequest("from must not be after to".to_string()));
        }

        Ok(AuditFilter {
            cart_id,
            action: self.action,
            from: self.from,
            to: self.to,
        })
    }
}

/// Run an expiration sweep now.
///
/// # Errors
///
/// Returns 403 without the maintenance token.
pub async fn expire(
    _access: MaintenanceAccess,
    State(state): State<AppState>,
) -> Result<Envelope<SweepReport>> {
    let report = state.maintenance().sweep().await?;
    Ok(Envelope::ok(report))
}

/// Delete audit entries past retention.
///
/// # Errors
///
/// Returns 403 without the maintenance token.
pub async fn purge(
    _access: MaintenanceAccess,
    State(state): State<AppState>,
    QueryParams(query): QueryParams<PurgeQuery>,
) -> Result<Envelope<PurgeReport>> {
    let report = state.maintenance().purge_audit(query.days).await?;
    Ok(Envelope::ok(report))
}

/// Query the audit log as a JSON page or a CSV export.
///
/// # Errors
///
/// Returns 403 without the maintenance token, 400 for invalid filters.
pub async fn audit(
    _access: MaintenanceAccess,
    State(state): State<AppState>,
    QueryParams(query): QueryParams<AuditQuery>,
) -> Result<Response> {
    let filter = query.filter()?;

    match query.format {
        AuditFormat::Json => {
            let page: AuditPage = state
                .maintenance()
                .audit_page(
                    &filter,
                    query.page.unwrap_or(1),
                    query.page_size.unwrap_or(DEFAULT_AUDIT_PAGE_SIZE),
                )
                .await?;
            Ok(Envelope::ok(page).into_response())
        }
        AuditFormat::Csv => {
            let csv = state.maintenance().export_audit_csv(&filter).await?;
            Ok((
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                    (
                        header::CONTENT_DISPOSITION,
                        "attachment; filename=\"cart-audit.csv\"",
                    ),
                ],
                csv,
            )
                .into_response())
        }
    }
}
