use axum::{
    extract::State,
    middleware,
    routing::post,
    Extension, Json, Router,
};
use busline_booking::{BookingError, ConfirmRequest};
use busline_core::payment::GatewayOrder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    bookings::BookingResponse,
    error::AppError,
    middleware::{circuit_breaker_middleware, Claims},
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub booking_id: Uuid,
}

/// What the checkout widget needs to open the provider's payment sheet.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub booking_id: Uuid,
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub created_at: DateTime<Utc>,
}

impl OrderResponse {
    fn new(booking_id: Uuid, order: GatewayOrder) -> Self {
        Self {
            booking_id,
            order_id: order.order_id,
            amount: order.amount,
            currency: order.currency,
            receipt: order.receipt,
            created_at: order.created_at,
        }
    }
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/v1/pay/order",
            post(create_order)
                .route_layer(middleware::from_fn_with_state(state, circuit_breaker_middleware)),
        )
        .route("/v1/pay/confirm", post(confirm_payment))
}

pub async fn create_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state
        .coordinator
        .create_order(req.booking_id, &claims.sub)
        .await?;

    Ok(Json(OrderResponse::new(req.booking_id, order)))
}

/// Accepts the provider's payment id and signature for a pending booking.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    match state.coordinator.confirm_with_outcome(req).await {
        Ok(confirmation) => {
            let outcome = if confirmation.is_repeat() { "repeat" } else { "confirmed" };
            state.metrics.record_confirmation(outcome);
            Ok(Json(confirmation.into_booking().into()))
        }
        Err(e) => {
            let outcome = match &e {
                BookingError::VerificationFailed => "verification_failed",
                BookingError::AlreadyFinalized => "finalized",
                BookingError::Storage(_) => "error",
                _ => "rejected",
            };
            state.metrics.record_confirmation(outcome);
            Err(e.into())
        }
    }
}
