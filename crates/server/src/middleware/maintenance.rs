//! Shared-secret guard for maintenance endpoints.

use axum::{
    extract::{FromRequestParts, Query},
    http::{Uri, request::Parts},
};
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

pub const MAINTENANCE_TOKEN_HEADER: &str = "x-maintenance-token";

/// Extractor that admits only callers presenting the maintenance token.
///
/// The token is read from `x-maintenance-token`, or from the percent-encoded
/// `token` query parameter when the header is absent. When no token is
/// configured every call is denied.
pub struct MaintenanceAccess;

impl FromRequestParts<AppState> for MaintenanceAccess {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config().maintenance_token.as_ref() else {
            tracing::warn!("Maintenance call denied: no maintenance token configured");
            return Err(denied());
        };

        let presented = parts
            .headers
            .get(MAINTENANCE_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .or_else(|| token_from_query(&parts.uri));

        match presented {
            Some(token) if token == expected.expose_secret() => Ok(Self),
            _ => Err(denied()),
        }
    }
}

fn denied() -> AppError {
    AppError::Forbidden("access denied".to_string())
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn token_from_query(uri: &Uri) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(uri).ok()?.0.token
}
