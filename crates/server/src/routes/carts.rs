//! Cart header route handlers.

use axum::extract::State;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cartkeeper_core::{Amount, CartId, CartStatus, CurrencyCode, Percent, TaxMode};

use super::{Envelope, JsonBody, OptionalJsonBody, PathParams, cart_id};
use crate::error::{AppError, Result};
use crate::middleware::RequestCaller;
use crate::models::{Cart, CartHeaderUpdate};
use crate::services::CartSnapshot;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub cart: Cart,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub cart_id: CartId,
    pub deleted: bool,
}

/// Pricing settings accepted by `POST /carts`. Absent fields take the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct CreateCartRequest {
    pub currency: Option<String>,
    pub tax_mode: Option<String>,
    pub tax_pct: Option<Decimal>,
    pub discount_pct: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
}

impl TryFrom<CreateCartRequest> for CartHeaderUpdate {
    type Error = AppError;

    fn try_from(req: CreateCartRequest) -> Result<Self> {
        Self::try_from(UpdateCartRequest {
            currency: req.currency,
            tax_mode: req.tax_mode,
            tax_pct: req.tax_pct,
            discount_pct: req.discount_pct,
            discount_amount: req.discount_amount,
            status: None,
        })
    }
}

/// Header fields accepted by `PATCH /carts/{id}`. Absent fields are left alone.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateCartRequest {
    pub currency: Option<String>,
    pub tax_mode: Option<String>,
    pub tax_pct: Option<Decimal>,
    pub discount_pct: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
    pub status: Option<String>,
}

impl TryFrom<UpdateCartRequest> for CartHeaderUpdate {
    type Error = AppError;

    fn try_from(req: UpdateCartRequest) -> Result<Self> {
        Ok(Self {
            currency: req.currency.as_deref().map(CurrencyCode::parse).transpose()?,
            tax_mode: req
                .tax_mode
                .as_deref()
                .map(str::parse::<TaxMode>)
                .transpose()
                .map_err(AppError::BadRequest)?,
            tax_pct: req.tax_pct.map(Percent::new).transpose()?,
            discount_pct: req.discount_pct.map(Percent::new).transpose()?,
            discount_amount: req.discount_amount.map(Amount::new).transpose()?,
            status: req
                .status
                .as_deref()
                .map(str::parse::<CartStatus>)
                .transpose()
                .map_err(AppError::BadRequest)?,
        })
    }
}

/// Create a cart for the caller, optionally with its pricing settings.
///
/// # Errors
///
/// Returns 403 if the request carries no identity, 400 for invalid settings.
pub async fn create(
    State(state): State<AppState>,
    RequestCaller(caller): RequestCaller,
    OptionalJsonBody(body): OptionalJsonBody<CreateCartRequest>,
) -> Result<Envelope<CartResponse>> {
    let settings = CartHeaderUpdate::try_from(body.unwrap_or_default())?;
    let cart = state.carts().create(&caller, settings).await?;
    Ok(Envelope::ok(CartResponse { cart }))
}

/// Resolve the caller's open cart, creating one if needed.
///
/// # Errors
///
/// Returns 403 if the request carries no identity.
pub async fn current(
    State(state): State<AppState>,
    RequestCaller(caller): RequestCaller,
) -> Result<Envelope<CartResponse>> {
    let cart = state.carts().current(&caller).await?;
    Ok(Envelope::ok(CartResponse { cart }))
}

/// Read a cart with its lines.
///
/// # Errors
///
/// Returns 404 if the cart is missing or expired, 403 if it is not the caller's.
pub async fn show(
    State(state): State<AppState>,
    RequestCaller(caller): RequestCaller,
    PathParams(id): PathParams<i32>,
) -> Result<Envelope<CartSnapshot>> {
    let snapshot = state.carts().get(cart_id(id)?, &caller).await?;
    Ok(Envelope::ok(snapshot))
}

/// Update header fields and recompute totals.
///
/// # Errors
///
/// Returns 400 for invalid fields or a cart that is no longer open.
pub async fn update(
    State(state): State<AppState>,
    RequestCaller(caller): RequestCaller,
    PathParams(id): PathParams<i32>,
    JsonBody(body): JsonBody<UpdateCartRequest>,
) -> Result<Envelope<CartResponse>> {
    let id = cart_id(id)?;
    let update = CartHeaderUpdate::try_from(body)?;
    let cart = state.carts().update_header(id, &caller, update).await?;
    Ok(Envelope::ok(CartResponse { cart }))
}

/// Hard-delete a cart.
///
/// # Errors
///
/// Returns 404 if the cart is missing, 403 if it is not the caller's.
pub async fn destroy(
    State(state): State<AppState>,
    RequestCaller(caller): RequestCaller,
    PathParams(id): PathParams<i32>,
) -> Result<Envelope<DeleteResponse>> {
    let id = cart_id(id)?;
    state.carts().delete(id, &caller).await?;
    Ok(Envelope::ok(DeleteResponse {
        cart_id: id,
        deleted: true,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_update_request_parses_fields() {
        let req: UpdateCartRequest = serde_json::from_str(
            r#"{"currency":"eur","tax_mode":"multi","discount_pct":10,"status":"confirmed"}"#,
        )
        .unwrap();
        let update = CartHeaderUpdate::try_from(req).unwrap();
        assert_eq!(update.currency, Some(CurrencyCode::parse("EUR").unwrap()));
        assert_eq!(update.tax_mode, Some(TaxMode::Multi));
        assert_eq!(update.discount_pct.unwrap().value(), dec!(10));
        assert_eq!(update.status, Some(CartStatus::Confirmed));
        assert!(update.tax_pct.is_none());
    }

    #[test]
    fn test_create_request_never_sets_status() {
        let req: CreateCartRequest = serde_json::from_str(
            r#"{"currency":"EUR","tax_mode":"multi","discount_amount":"5","status":"confirmed"}"#,
        )
        .unwrap();
        let settings = CartHeaderUpdate::try_from(req).unwrap();
        assert_eq!(settings.currency, Some(CurrencyCode::parse("EUR").unwrap()));
        assert_eq!(settings.tax_mode, Some(TaxMode::Multi));
        assert_eq!(settings.discount_amount.unwrap().value(), dec!(5));
        assert!(settings.status.is_none());
    }

    #[test]
    fn test_create_request_rejects_oversized_discount() {
        let req = CreateCartRequest {
            discount_amount: Some(dec!(100000000000000)),
            ..Default::default()
        };
        assert!(matches!(
            CartHeaderUpdate::try_from(req),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_update_request_rejects_out_of_range_percent() {
        let req = UpdateCartRequest {
            tax_pct: Some(dec!(120)),
            ..Default::default()
        };
        assert!(matches!(
            CartHeaderUpdate::try_from(req),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_update_request_rejects_unknown_mode() {
        let req = UpdateCartRequest {
            tax_mode: Some("compound".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            CartHeaderUpdate::try_from(req),
            Err(AppError::BadRequest(_))
        ));
    }
}
