//! One-shot maintenance commands, for cron jobs and deployments that run
//! the server with the in-process sweeper disabled.

use cartkeeper_server::config::CartPolicy;
use cartkeeper_server::services::{MaintenanceService, sweep_once};

use super::{CommandError, connect};

fn resolve_days(days: Option<i64>, configured: i64) -> Result<i64, CommandError> {
    match days {
        Some(d) if d <= 0 => Err(CommandError::InvalidDays(d)),
        Some(d) => Ok(d),
        None => Ok(configured),
    }
}

/// Expire open carts idle for more than `days`.
///
/// # Errors
///
/// Returns an error if `days` is not positive or the sweep fails.
pub async fn sweep(days: Option<i64>) -> Result<(), CommandError> {
    let pool = connect().await?;
    let policy = CartPolicy::from_env()?;
    let days = resolve_days(days, policy.expiry_days)?;

    let report = sweep_once(&pool, days).await?;
    tracing::info!(
        count = report.count,
        threshold_days = report.threshold_days,
        cutoff = %report.cutoff,
        "Sweep complete"
    );
    Ok(())
}

/// Delete audit entries older than `days`.
///
/// # Errors
///
/// Returns an error if `days` is not positive or the purge fails.
pub async fn purge_logs(days: Option<i64>) -> Result<(), CommandError> {
    let pool = connect().await?;
    let policy = CartPolicy::from_env()?;
    let days = resolve_days(days, policy.audit_retention_days)?;

    let report = MaintenanceService::new(pool, policy)
        .purge_audit(Some(days))
        .await?;
    tracing::info!(
        deleted = report.deleted,
        retention_days = report.retention_days,
        "Audit purge complete"
    );
    Ok(())
}
