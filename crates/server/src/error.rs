//! Unified error handling with Sentry integration.
//!
//! Every handler returns `Result<T, AppError>`. Errors render as the JSON
//! envelope `{"success": false, "error": "..."}`; server errors are captured
//! to Sentry first and reach the client only as a generic message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use cartkeeper_core::{CurrencyError, MoneyError, QuantityError, SessionTokenError};

use crate::db::RepositoryError;
use crate::services::CartError;

/// Application-level error type for the cart service.
#[derive(Debug, Error)]
pub enum AppError {
    /// Cart operation failed.
    #[error(transparent)]
    Cart(#[from] CartError),

    /// Bad request from client.
    #[error("{0}")]
    BadRequest(String),

    /// Caller is not allowed to do this.
    #[error("{0}")]
    Forbidden(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: &'a str,
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Cart(err) => match err {
                CartError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
                CartError::MissingIdentity | CartError::Forbidden | CartError::MergeUserMismatch => {
                    StatusCode::FORBIDDEN
                }
                CartError::NotFound
                | CartError::Expired
                | CartError::LineNotFound
                | CartError::ProductNotFound => StatusCode::NOT_FOUND,
                CartError::NotOpen | CartError::InvalidStatusChange | CartError::LineCapReached(_) => {
                    StatusCode::BAD_REQUEST
                }
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    const fn is_server_error(&self) -> bool {
        matches!(self, Self::Cart(CartError::Repository(_)))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if self.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let message = if self.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            success: false,
            error: &message,
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        Self::Cart(CartError::from(err))
    }
}

impl From<QuantityError> for AppError {
    fn from(err: QuantityError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<MoneyError> for AppError {
    fn from(err: MoneyError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<CurrencyError> for AppError {
    fn from(err: CurrencyError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<SessionTokenError> for AppError {
    fn from(err: SessionTokenError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
