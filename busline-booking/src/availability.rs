use busline_core::{
    booking::Gender, BookingLedger, BookingStatus, Clock, ScheduleRepository,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::coordinator::BookingError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SeatState {
    Available,
    PendingHold,
    Confirmed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatStatus {
    pub state: SeatState,
    /// Gender of the passenger on the seat, for gender-aware seat maps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
}

impl SeatStatus {
    fn available() -> Self {
        Self { state: SeatState::Available, gender: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatMap {
    pub schedule_id: Uuid,
    pub seats: BTreeMap<String, SeatStatus>,
}

impl SeatMap {
    pub fn state_of(&self, seat: &str) -> SeatState {
        self.seats
            .get(seat)
            .map(|s| s.state)
            .unwrap_or(SeatState::Available)
    }

    /// Seats currently held, by pending holds or confirmed bookings.
    pub fn unavailable(&self) -> impl Iterator<Item = (&String, &SeatStatus)> {
        self.seats
            .iter()
            .filter(|(_, status)| status.state != SeatState::Available)
    }
}

/// Read-only occupancy view over the ledger.
///
/// Pending bookings past their TTL are reported as available even if the
/// sweep has not transitioned them yet.
pub struct SeatAvailabilityResolver {
    schedules: Arc<dyn ScheduleRepository>,
    ledger: Arc<dyn BookingLedger>,
    clock: Arc<dyn Clock>,
}

impl SeatAvailabilityResolver {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        ledger: Arc<dyn BookingLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { schedules, ledger, clock }
    }

    pub async fn occupancy(&self, schedule_id: Uuid) -> Result<SeatMap, BookingError> {
        let schedule = self
            .schedules
            .get_schedule(schedule_id)
            .await
            .map_err(BookingError::Storage)?
            .ok_or(BookingError::NotFound("Schedule"))?;

        let now = self.clock.now();
        let holders = self
            .ledger
            .list_by_schedule(
                schedule_id,
                &[BookingStatus::Pending, BookingStatus::Confirmed],
            )
            .await?;

        let mut seats: BTreeMap<String, SeatStatus> = schedule
            .seat_labels
            .iter()
            .map(|label| (label.clone(), SeatStatus::available()))
            .collect();

        for booking in holders.iter().filter(|b| b.holds_seats(now)) {
            let state = match booking.status {
                BookingStatus::Confirmed => SeatState::Confirmed,
                _ => SeatState::PendingHold,
            };
            for seat in &booking.seats {
                seats.insert(
                    seat.clone(),
                    SeatStatus {
                        state,
                        gender: booking.passenger_for_seat(seat).map(|p| p.gender),
                    },
                );
            }
        }

        Ok(SeatMap { schedule_id, seats })
    }
}
