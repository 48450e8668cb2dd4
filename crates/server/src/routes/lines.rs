//! Cart line route handlers.

use axum::extract::State;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cartkeeper_core::{Amount, Quantity};

use super::{Envelope, JsonBody, PathParams, cart_id, product_id};
use crate::error::Result;
use crate::middleware::RequestCaller;
use crate::models::{Cart, LineCount, LineItem};
use crate::services::LineChange;
use crate::state::AppState;

const fn default_quantity() -> i64 {
    1
}

/// Body of `POST /carts/{id}/lines`.
#[derive(Debug, Deserialize)]
pub struct AddLineRequest {
    pub product_id: i32,
    /// Clamped into `1..=999`.
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    /// Defaults to the catalog price for a new line.
    pub unit_price: Option<Decimal>,
}

/// Body of `PUT /carts/{id}/lines/{product_id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateLineRequest {
    /// Must be within `1..=999`.
    pub quantity: i64,
    /// Leaves the stored price alone when absent.
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct LinesResponse {
    pub lines: Vec<LineItem>,
}

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub cart: Cart,
}

#[derive(Debug, Serialize)]
pub struct EmptyResponse {
    pub cart: Cart,
    pub removed: u64,
}

/// List a cart's lines.
///
/// # Errors
///
/// Returns 404 if the cart is missing or expired, 403 if it is not the caller's.
pub async fn index(
    State(state): State<AppState>,
    RequestCaller(caller): RequestCaller,
    PathParams(id): PathParams<i32>,
) -> Result<Envelope<LinesResponse>> {
    let lines = state.carts().list_lines(cart_id(id)?, &caller).await?;
    Ok(Envelope::ok(LinesResponse { lines }))
}

/// Add a product, or grow its line.
///
/// # Errors
///
/// Returns 400 at the line cap or for a negative price, 404 for an unknown product.
pub async fn add(
    State(state): State<AppState>,
    RequestCaller(caller): RequestCaller,
    PathParams(id): PathParams<i32>,
    JsonBody(body): JsonBody<AddLineRequest>,
) -> Result<Envelope<LineChange>> {
    let id = cart_id(id)?;
    let product = product_id(body.product_id)?;
    let quantity = Quantity::clamped(body.quantity);
    let unit_price = body.unit_price.map(Amount::new).transpose()?;

    let change = state
        .carts()
        .add_line(id, &caller, product, quantity, unit_price)
        .await?;
    Ok(Envelope::ok(change))
}

/// Set a line's quantity and optionally its price.
///
/// # Errors
///
/// Returns 400 for a quantity outside `1..=999`, 404 if the line does not exist.
pub async fn update(
    State(state): State<AppState>,
    RequestCaller(caller): RequestCaller,
    PathParams((id, product)): PathParams<(i32, i32)>,
    JsonBody(body): JsonBody<UpdateLineRequest>,
) -> Result<Envelope<LineChange>> {
    let id = cart_id(id)?;
    let product = product_id(product)?;
    let quantity = Quantity::parse(body.quantity)?;
    let unit_price = body.unit_price.map(Amount::new).transpose()?;

    let change = state
        .carts()
        .update_line(id, &caller, product, quantity, unit_price)
        .await?;
    Ok(Envelope::ok(change))
}

/// Remove a product's line.
///
/// # Errors
///
/// Returns 404 if the line does not exist.
pub async fn remove(
    State(state): State<AppState>,
    RequestCaller(caller): RequestCaller,
    PathParams((id, product)): PathParams<(i32, i32)>,
) -> Result<Envelope<CartResponse>> {
    let cart = state
        .carts()
        .remove_line(cart_id(id)?, &caller, product_id(product)?)
        .await?;
    Ok(Envelope::ok(CartResponse { cart }))
}

/// Remove every line.
///
/// # Errors
///
/// Returns 400 if the cart is no longer open.
pub async fn empty(
    State(state): State<AppState>,
    RequestCaller(caller): RequestCaller,
    PathParams(id): PathParams<i32>,
) -> Result<Envelope<EmptyResponse>> {
    let (cart, removed) = state.carts().empty(cart_id(id)?, &caller).await?;
    Ok(Envelope::ok(EmptyResponse { cart, removed }))
}

/// Distinct lines and total quantity.
///
/// # Errors
///
/// Returns 404 if the cart is missing or expired, 403 if it is not the caller's.
pub async fn count(
    State(state): State<AppState>,
    RequestCaller(caller): RequestCaller,
    PathParams(id): PathParams<i32>,
) -> Result<Envelope<LineCount>> {
    let count = state.carts().count_lines(cart_id(id)?, &caller).await?;
    Ok(Envelope::ok(count))
}
