//! Order placement, cancellation, and admin endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::{
    AdvanceStatus, CancelOrder, CartLine, DeleteOrder, Money, Order, OrderStatus, PaymentMethod,
    PaymentStatus, PhoneNumber, PlaceOrder, ShippingAddress, UpdatePaymentStatus,
};
use placement::{OrderPlacementService, PaymentFlow, PlacementError};
use serde::{Deserialize, Serialize};
use store::OrderStore;

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore + Clone> {
    pub service: OrderPlacementService<S>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    pub lines: Vec<LineRequest>,
    pub total_amount_cents: i64,
    pub shipping_address: AddressRequest,
    pub payment_method: String,
    pub phone_number: String,
    /// Gateway reference of a payment the client completed before placing.
    #[serde(default)]
    pub payment_reference: Option<String>,
}

#[derive(Deserialize)]
pub struct LineRequest {
    pub product_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub unit_price_cents: i64,
}

#[derive(Deserialize)]
pub struct AddressRequest {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct PaymentStatusRequest {
    pub payment_status: String,
    pub reference: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: String,
    pub payment_reference: Option<String>,
    pub total_amount_cents: i64,
    pub shipping_address: ShippingAddress,
    pub phone_number: String,
    pub tracking_number: String,
    pub tracking_reference: String,
    pub estimated_delivery: String,
    pub created_at: String,
    pub lines: Vec<OrderLineResponse>,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            user_id: order.user_id.to_string(),
            status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method.to_string(),
            payment_reference: order.payment_reference,
            total_amount_cents: order.total_amount.cents(),
            shipping_address: order.shipping_address,
            phone_number: order.phone_number.to_string(),
            tracking_number: order.tracking_number,
            tracking_reference: order.tracking_reference,
            estimated_delivery: order.estimated_delivery.to_rfc3339(),
            created_at: order.created_at.to_rfc3339(),
            lines: order
                .lines
                .into_iter()
                .map(|line| OrderLineResponse {
                    product_id: line.product_id.to_string(),
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price.cents(),
                    subtotal_cents: line.subtotal.cents(),
                })
                .collect(),
        }
    }
}

// -- Handlers --

/// POST /orders: place an order for the authenticated user.
#[tracing::instrument(skip(state, req), fields(user_id = %user.0))]
pub async fn place<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthenticatedUser,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let (command, flow) = to_command(user, req)?;
    let order = state.service.place_order(command, flow).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /orders: list the caller's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.service.orders_for_user(user.0).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /orders/{id}: load one of the caller's orders.
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.service.get_order(order_id).await?;
    if !order.is_owned_by(user.0) {
        return Err(PlacementError::order_not_found(order_id).into());
    }
    Ok(Json(order.into()))
}

/// POST /orders/{id}/cancel: cancel one of the caller's pending orders.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .service
        .cancel_order(CancelOrder::new(user.0, order_id))
        .await?;
    Ok(Json(order.into()))
}

/// DELETE /admin/orders/{id}: hard-delete a pending or cancelled order.
#[tracing::instrument(skip(state))]
pub async fn delete<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let order_id = parse_order_id(&id)?;
    state.service.delete_order(DeleteOrder::new(order_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /admin/orders/{id}/status: move an order along its lifecycle.
#[tracing::instrument(skip(state, req))]
pub async fn update_status<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let to: OrderStatus = req.status.parse().map_err(PlacementError::from)?;
    let order = state
        .service
        .advance_status(AdvanceStatus::new(order_id, to))
        .await?;
    Ok(Json(order.into()))
}

/// PATCH /admin/orders/{id}/payment: record a payment status change.
#[tracing::instrument(skip(state, req))]
pub async fn update_payment<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<PaymentStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let to: PaymentStatus = req.payment_status.parse().map_err(PlacementError::from)?;
    let order = state
        .service
        .update_payment_status(UpdatePaymentStatus::new(order_id, to, req.reference))
        .await?;
    Ok(Json(order.into()))
}

fn to_command(
    user: AuthenticatedUser,
    req: PlaceOrderRequest,
) -> Result<(PlaceOrder, PaymentFlow), ApiError> {
    let lines = req
        .lines
        .into_iter()
        .enumerate()
        .map(|(i, line)| {
            let quantity = u32::try_from(line.quantity)
                .ok()
                .filter(|q| *q >= 1)
                .ok_or_else(|| ApiError::invalid(format!("lines[{i}].quantity"), "must be at least 1"))?;
            Ok(CartLine::new(
                line.product_id,
                quantity,
                Money::from_cents(line.unit_price_cents),
            ))
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let address = req.shipping_address;
    let shipping_address = ShippingAddress::new(
        address.street,
        address.city,
        address.state,
        address.zip_code,
        address.country,
    )
    .map_err(PlacementError::from)?;
    let phone_number = PhoneNumber::new(req.phone_number).map_err(PlacementError::from)?;
    let payment_method: PaymentMethod = req.payment_method.parse().map_err(PlacementError::from)?;

    let flow = match req.payment_reference {
        Some(reference) => PaymentFlow::Confirmed { reference },
        None if payment_method.settles_on_delivery() => PaymentFlow::OnDelivery,
        None => PaymentFlow::CaptureAfterPlacement,
    };

    let command = PlaceOrder::new(
        user.0,
        lines,
        Money::from_cents(req.total_amount_cents),
        shipping_address,
        payment_method,
        phone_number,
    );
    Ok((command, flow))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::invalid("id", format!("invalid order id: {e}")))
}
