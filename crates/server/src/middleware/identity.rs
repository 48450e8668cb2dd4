//! Caller identity extractor.
//!
//! Authentication happens upstream. The gateway forwards the authenticated
//! user in `x-user-id` and the anonymous session in `x-session-token`; this
//! service trusts both headers as given and only validates their format.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};

use cartkeeper_core::{CallerIdentity, SessionToken, UserId};

use super::RequestId;
use crate::error::AppError;
use crate::models::{Caller, ClientMeta};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

const MAX_USER_AGENT_LEN: usize = 512;

/// Extractor for the identity and client details of the current request.
///
/// Absent headers yield an empty identity; malformed ones reject the request
/// with 400.
///
/// ```rust,ignore
/// async fn handler(RequestCaller(caller): RequestCaller) -> impl IntoResponse {
///     caller.identity.user_id.map(|id| id.to_string())
/// }
/// ```
pub struct RequestCaller(pub Caller);

impl<S> FromRequestParts<S> for RequestCaller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = identity_from_headers(&parts.headers)?;
        let mut client = client_from_headers(&parts.headers);
        client.request_id = parts
            .extensions
            .get::<RequestId>()
            .map(|id| id.as_str().to_owned());

        if let Some(user_id) = identity.user_id {
            sentry::configure_scope(|scope| {
                scope.set_user(Some(sentry::User {
                    id: Some(user_id.to_string()),
                    ..Default::default()
                }));
            });
        }

        Ok(Self(Caller { identity, client }))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Parse the identity headers.
///
/// # Errors
///
/// Returns `AppError::BadRequest` for a non-positive or non-numeric user id
/// or a malformed session token.
pub fn identity_from_headers(headers: &HeaderMap) -> Result<CallerIdentity, AppError> {
    let user_id = header_str(headers, USER_ID_HEADER)
        .map(|raw| {
            raw.parse::<i32>()
                .ok()
                .and_then(UserId::parse_positive)
                .ok_or_else(|| AppError::BadRequest(format!("invalid {USER_ID_HEADER} header")))
        })
        .transpose()?;

    let session_token = header_str(headers, SESSION_TOKEN_HEADER)
        .map(SessionToken::parse)
        .transpose()?;

    Ok(CallerIdentity {
        user_id,
        session_token,
    })
}

/// Client IP and user agent for the audit trail.
///
/// The IP is the first hop of `x-forwarded-for`, falling back to
/// `x-real-ip`. The request id comes from the request extensions instead,
/// so it is left unset here.
#[must_use]
pub fn client_from_headers(headers: &HeaderMap) -> ClientMeta {
    let ip = header_str(headers, "x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
        .map(String::from);

    let user_agent = header_str(headers, "user-agent")
        .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect());

    ClientMeta {
        ip,
        user_agent,
        request_id: None,
    }
}
