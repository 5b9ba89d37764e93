use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use busline_booking::BookingError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    InternalServerError(String),

    #[error(transparent)]
    Booking(#[from] BookingError),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InternalServerError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            AppError::Booking(e) => match e {
                BookingError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
                BookingError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                BookingError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
                BookingError::SeatConflict(_) => (StatusCode::CONFLICT, "SEAT_CONFLICT"),
                BookingError::ScheduleInactive => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "SCHEDULE_INACTIVE")
                }
                BookingError::AlreadyFinalized => (StatusCode::CONFLICT, "ALREADY_FINALIZED"),
                BookingError::VerificationFailed => {
                    (StatusCode::PAYMENT_REQUIRED, "VERIFICATION_FAILED")
                }
                BookingError::PaymentProviderUnavailable => {
                    (StatusCode::SERVICE_UNAVAILABLE, "PAYMENT_PROVIDER_UNAVAILABLE")
                }
                BookingError::PaymentRejected(_) => (StatusCode::BAD_GATEWAY, "PAYMENT_REJECTED"),
                BookingError::TooCloseToDeparture(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "TOO_CLOSE_TO_DEPARTURE")
                }
                BookingError::NotConfirmed => (StatusCode::CONFLICT, "NOT_CONFIRMED"),
                BookingError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal Server Error: {}", self);
            "Internal Server Error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}
