use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use busline_booking::{BookingError, ClaimRequest};
use busline_core::booking::{CancellationRecord, PaymentRecord};
use busline_core::{Booking, BookingStatus, Passenger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, middleware::Claims, state::AppState};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub booking_id: Uuid,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub verification: &'static str,
}

impl From<&PaymentRecord> for PaymentResponse {
    fn from(p: &PaymentRecord) -> Self {
        Self {
            order_id: p.order_id.clone(),
            payment_id: p.payment_id.clone(),
            verification: p.verification.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationResponse {
    pub cancelled_at: DateTime<Utc>,
    pub reason: String,
    pub refund_percent: u8,
    pub refund_amount: i64,
    pub refund_status: &'static str,
}

impl From<&CancellationRecord> for CancellationResponse {
    fn from(c: &CancellationRecord) -> Self {
        Self {
            cancelled_at: c.cancelled_at,
            reason: c.reason.clone(),
            refund_percent: c.refund_percent,
            refund_amount: c.refund_amount,
            refund_status: c.refund_status.as_str(),
        }
    }
}

/// Contact details are deliberately left out of every response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    pub booking_id: Uuid,
    pub schedule_id: Uuid,
    pub status: BookingStatus,
    pub seats: Vec<String>,
    pub passengers: Vec<Passenger>,
    pub total_amount: i64,
    pub currency: String,
    pub payment: PaymentResponse,
    pub cancellation: Option<CancellationResponse>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            booking_id: b.id,
            schedule_id: b.schedule_id,
            status: b.status,
            payment: PaymentResponse::from(&b.payment),
            cancellation: b.cancellation.as_ref().map(CancellationResponse::from),
            seats: b.seats,
            passengers: b.passengers,
            total_amount: b.total_amount,
            currency: b.currency,
            created_at: b.created_at,
            expires_at: b.expires_at,
            updated_at: b.updated_at,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/reserve", post(reserve))
        .route("/v1/cancel", post(cancel))
        .route("/v1/bookings", get(list_bookings))
        .route("/v1/bookings/{id}", get(get_booking))
}

// ============================================================================
// Handlers
// ============================================================================

/// Claim seats as a pending booking for the authenticated passenger.
pub async fn reserve(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(mut req): Json<ClaimRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    req.user_id = claims.sub;

    match state.coordinator.claim(req).await {
        Ok(booking) => {
            state.metrics.record_claim("held");
            Ok((StatusCode::CREATED, Json(booking.into())))
        }
        Err(e) => {
            let outcome = match &e {
                BookingError::SeatConflict(_) => "conflict",
                BookingError::Storage(_) => "error",
                _ => "rejected",
            };
            state.metrics.record_claim(outcome);
            Err(e.into())
        }
    }
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state
        .coordinator
        .cancel(req.booking_id, &claims.sub, &req.reason)
        .await?;

    state.metrics.record_cancellation();
    Ok(Json(booking.into()))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<BookingResponse>>, AppError> {
    let bookings = state.coordinator.bookings_for(&claims.sub).await?;
    Ok(Json(bookings.into_iter().map(BookingResponse::from).collect()))
}

pub async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state.coordinator.booking(id, &claims.sub).await?;
    Ok(Json(booking.into()))
}
