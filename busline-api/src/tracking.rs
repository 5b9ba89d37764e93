use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use busline_shared::events::Coordinates;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRequest {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalRequest {
    pub stop_name: String,
    pub eta: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRequest {
    /// Defaults to the time the notice is received.
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeResponse {
    pub passengers_notified: usize,
}

pub async fn update_location(
    State(state): State<AppState>,
    Path(bus_id): Path<Uuid>,
    Json(req): Json<LocationRequest>,
) -> Result<StatusCode, AppError> {
    let coordinates = Coordinates {
        latitude: req.latitude,
        longitude: req.longitude,
    };
    state
        .tracker
        .update_location(bus_id, coordinates, req.speed)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn announce_arrival(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
    Json(req): Json<ArrivalRequest>,
) -> Result<Json<NoticeResponse>, AppError> {
    let passengers_notified = state
        .tracker
        .announce_arrival(schedule_id, &req.stop_name, req.eta)
        .await?;
    Ok(Json(NoticeResponse { passengers_notified }))
}

pub async fn announce_destination(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
    Json(req): Json<DestinationRequest>,
) -> Result<Json<NoticeResponse>, AppError> {
    let time = req.time.unwrap_or_else(Utc::now);
    let passengers_notified = state
        .tracker
        .announce_destination(schedule_id, time)
        .await?;
    Ok(Json(NoticeResponse { passengers_notified }))
}
