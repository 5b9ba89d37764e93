use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topic for everything concerning one bus (seat maps, live position, stop notices).
pub fn bus_topic(bus_id: Uuid) -> String {
    format!("bus:{}", bus_id)
}

/// Topic for a single passenger's own notices.
pub fn user_topic(user_id: &str) -> String {
    format!("user:{}", user_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// What happened to the seats named in a [`SeatOccupancyChangedEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Occupancy {
    PendingHold,
    Confirmed,
    Released,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatOccupancyChangedEvent {
    pub schedule_id: Uuid,
    pub seats: Vec<String>,
    pub occupancy: Occupancy,
    pub changed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdateEvent {
    pub bus_id: Uuid,
    pub coordinates: Coordinates,
    /// km/h as reported by the vehicle
    pub speed: f64,
    pub recorded_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalNoticeEvent {
    pub bus_id: Uuid,
    pub schedule_id: Uuid,
    pub stop_name: String,
    pub eta: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationNoticeEvent {
    pub bus_id: Uuid,
    pub schedule_id: Uuid,
    pub time: DateTime<Utc>,
}

/// Ephemeral message fanned out to trip subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripEvent {
    SeatOccupancyChanged(SeatOccupancyChangedEvent),
    LocationUpdate(LocationUpdateEvent),
    ArrivalNotice(ArrivalNoticeEvent),
    DestinationNotice(DestinationNoticeEvent),
}

impl TripEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TripEvent::SeatOccupancyChanged(_) => "SEAT_OCCUPANCY_CHANGED",
            TripEvent::LocationUpdate(_) => "LOCATION_UPDATE",
            TripEvent::ArrivalNotice(_) => "ARRIVAL_NOTICE",
            TripEvent::DestinationNotice(_) => "DESTINATION_NOTICE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = TripEvent::SeatOccupancyChanged(SeatOccupancyChangedEvent {
            schedule_id: Uuid::nil(),
            seats: vec!["12A".to_string()],
            occupancy: Occupancy::PendingHold,
            changed_at: 0,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SEAT_OCCUPANCY_CHANGED");
        assert_eq!(json["occupancy"], "pending-hold");
        assert_eq!(json["seats"][0], "12A");
        assert_eq!(event.kind(), "SEAT_OCCUPANCY_CHANGED");
    }

    #[test]
    fn test_topic_names() {
        let bus_id = Uuid::nil();
        assert_eq!(bus_topic(bus_id), format!("bus:{}", Uuid::nil()));
        assert_eq!(user_topic("guest-1"), "user:guest-1");
    }
}
