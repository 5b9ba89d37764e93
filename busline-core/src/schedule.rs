use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Active,
    Cancelled,
    Completed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Active => "ACTIVE",
            ScheduleStatus::Cancelled => "CANCELLED",
            ScheduleStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(ScheduleStatus::Active),
            "CANCELLED" => Some(ScheduleStatus::Cancelled),
            "COMPLETED" => Some(ScheduleStatus::Completed),
            _ => None,
        }
    }
}

/// Per-seat fare, in minor currency units (paise).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FareComponents {
    pub base: i64,
    pub tax: i64,
    pub service_fee: i64,
}

impl FareComponents {
    pub fn new(base: i64, tax: i64, service_fee: i64) -> Self {
        Self { base, tax, service_fee }
    }

    pub fn per_seat(&self) -> i64 {
        self.base + self.tax + self.service_fee
    }

    pub fn total_for(&self, seat_count: usize) -> i64 {
        self.per_seat() * seat_count as i64
    }
}

/// A bus trip on a route. Owned by schedule management; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub route_id: Uuid,
    pub bus_id: Uuid,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub fare: FareComponents,
    /// Seat labels of the bus layout. Empty when the layout is unknown.
    #[serde(default)]
    pub seat_labels: Vec<String>,
    pub status: ScheduleStatus,
}

impl Schedule {
    pub fn is_active(&self) -> bool {
        self.status == ScheduleStatus::Active
    }

    pub fn has_seat(&self, label: &str) -> bool {
        self.seat_labels.is_empty() || self.seat_labels.iter().any(|s| s == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fare_totals() {
        let fare = FareComponents::new(50_000, 5_000, 2_000);
        assert_eq!(fare.per_seat(), 57_000);
        assert_eq!(fare.total_for(2), 114_000);
    }

    #[test]
    fn test_seat_layout_lookup() {
        let mut schedule = Schedule {
            id: Uuid::new_v4(),
            route_id: Uuid::new_v4(),
            bus_id: Uuid::new_v4(),
            departure_time: Utc::now(),
            arrival_time: Utc::now(),
            fare: FareComponents::default(),
            seat_labels: vec![],
            status: ScheduleStatus::Active,
        };
        assert!(schedule.has_seat("99Z"));

        schedule.seat_labels = vec!["1A".to_string(), "1B".to_string()];
        assert!(schedule.has_seat("1B"));
        assert!(!schedule.has_seat("2A"));
    }
}
