//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                          - Liveness
//! GET    /health/ready                    - Readiness (database ping)
//!
//! # Carts (caller identity from x-user-id / x-session-token)
//! POST   /carts                           - Create a cart
//! GET    /carts/current                   - Resolve or create the caller's open cart
//! POST   /carts/merge                     - Fold an anonymous cart into the user's
//! GET    /carts/{id}                      - Cart with lines and tax breakdown
//! PATCH  /carts/{id}                      - Update header fields
//! DELETE /carts/{id}                      - Hard delete
//!
//! # Lines
//! GET    /carts/{id}/lines                - List lines
//! POST   /carts/{id}/lines                - Add (or grow) a line
//! DELETE /carts/{id}/lines                - Empty the cart
//! GET    /carts/{id}/lines/count          - Line count and total quantity
//! PUT    /carts/{id}/lines/{product_id}   - Set quantity / price
//! DELETE /carts/{id}/lines/{product_id}   - Remove a line
//!
//! # Maintenance (x-maintenance-token or ?token=)
//! POST   /maintenance/expire              - Expiration sweep
//! POST   /maintenance/audit/purge         - Audit retention purge (?days=)
//! GET    /maintenance/audit               - Audit query (?format=json|csv)
//! ```

pub mod carts;
pub mod lines;
pub mod maintenance;
pub mod merge;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::request::Parts,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Serialize, de::DeserializeOwned};

use cartkeeper_core::{CartId, ProductId};

use crate::error::AppError;
use crate::state::AppState;

/// Successful response envelope: `{"success": true, ...payload}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    success: bool,
    #[serde(flatten)]
    data: T,
}

impl<T: Serialize> Envelope<T> {
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// `Json` that rejects malformed bodies with the error envelope.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// [`JsonBody`] for endpoints whose body may be left out entirely.
///
/// An empty or all-whitespace body yields `None`; anything else must be
/// valid JSON for `T`.
pub struct OptionalJsonBody<T>(pub Option<T>);

impl<S, T> FromRequest<S> for OptionalJsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        if bytes.trim_ascii().is_empty() {
            return Ok(Self(None));
        }
        let Json(value) =
            Json::<T>::from_bytes(&bytes).map_err(|e| AppError::BadRequest(e.body_text()))?;
        Ok(Self(Some(value)))
    }
}

/// `Path` that rejects malformed segments with the error envelope.
pub struct PathParams<T>(pub T);

impl<S, T> FromRequestParts<S> for PathParams<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

/// `Query` that rejects malformed parameters with the error envelope.
pub struct QueryParams<T>(pub T);

impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        Ok(Self(value))
    }
}

pub(crate) fn cart_id(raw: i32) -> Result<CartId, AppError> {
    CartId::parse_positive(raw).ok_or_else(|| AppError::BadRequest("invalid cart id".to_string()))
}

pub(crate) fn product_id(raw: i32) -> Result<ProductId, AppError> {
    ProductId::parse_positive(raw)
        .ok_or_else(|| AppError::BadRequest("invalid product id".to_string()))
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(carts::create))
        .route("/current", get(carts::current))
        .route("/merge", post(merge::merge))
        .route(
            "/{id}",
            get(carts::show)
                .patch(carts::update)
                .delete(carts::destroy),
        )
        .route(
            "/{id}/lines",
            get(lines::index).post(lines::add).delete(lines::empty),
        )
        .route("/{id}/lines/count", get(lines::count))
        .route(
            "/{id}/lines/{product_id}",
            put(lines::update).delete(lines::remove),
        )
}

/// Create the maintenance routes router.
pub fn maintenance_routes() -> Router<AppState> {
    Router::new()
        .route("/expire", post(maintenance::expire))
        .route("/audit", get(maintenance::audit))
        .route("/audit/purge", post(maintenance::purge))
}

/// Create all routes for the service.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/carts", cart_routes())
        .nest("/maintenance", maintenance_routes())
}
