use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use busline_booking::SeatMap;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/seats/{schedule_id}", get(seat_map))
}

/// Occupancy for every seat in the schedule's layout.
pub async fn seat_map(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<SeatMap>, AppError> {
    let map = state.resolver.occupancy(schedule_id).await?;
    Ok(Json(map))
}
