//! Login-time cart merge.

use axum::extract::State;
use serde::Deserialize;

use cartkeeper_core::{SessionToken, UserId};

use super::{Envelope, JsonBody};
use crate::error::{AppError, Result};
use crate::middleware::RequestCaller;
use crate::services::MergeOutcome;
use crate::state::AppState;

/// Body of `POST /carts/merge`.
#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub user_id: i32,
    pub session_token: String,
}

/// Fold the anonymous cart of `session_token` into `user_id`'s cart.
///
/// The caller must be authenticated as `user_id` (`x-user-id`).
///
/// # Errors
///
/// Returns 400 for a malformed body, 403 when `user_id` is not the caller.
pub async fn merge(
    State(state): State<AppState>,
    RequestCaller(caller): RequestCaller,
    JsonBody(body): JsonBody<MergeRequest>,
) -> Result<Envelope<MergeOutcome>> {
    let user_id = UserId::parse_positive(body.user_id)
        .ok_or_else(|| AppError::BadRequest("invalid user id".to_string()))?;
    let session_token = SessionToken::parse(&body.session_token)?;

    let outcome = state
        .carts()
        .merge(&caller, user_id, &session_token)
        .await?;
    Ok(Envelope::ok(outcome))
}
