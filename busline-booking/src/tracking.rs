//! Live trip updates from the bus side: position, next stop, arrival.

use busline_core::{BookingLedger, BookingStatus, Clock, ScheduleRepository};
use busline_shared::events::{
    bus_topic, user_topic, ArrivalNoticeEvent, Coordinates, DestinationNoticeEvent,
    LocationUpdateEvent,
};
use busline_shared::TripEvent;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::broadcast::TripEventBroadcaster;
use crate::coordinator::BookingError;

pub struct TripTracker {
    schedules: Arc<dyn ScheduleRepository>,
    ledger: Arc<dyn BookingLedger>,
    broadcaster: TripEventBroadcaster,
    clock: Arc<dyn Clock>,
}

impl TripTracker {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        ledger: Arc<dyn BookingLedger>,
        broadcaster: TripEventBroadcaster,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { schedules, ledger, broadcaster, clock }
    }

    pub async fn update_location(
        &self,
        bus_id: Uuid,
        coordinates: Coordinates,
        speed: f64,
    ) -> Result<(), BookingError> {
        if !(-90.0..=90.0).contains(&coordinates.latitude)
            || !(-180.0..=180.0).contains(&coordinates.longitude)
        {
            return Err(BookingError::InvalidInput("coordinates out of range".to_string()));
        }
        if !speed.is_finite() || speed < 0.0 {
            return Err(BookingError::InvalidInput("speed must be non-negative".to_string()));
        }

        let event = TripEvent::LocationUpdate(LocationUpdateEvent {
            bus_id,
            coordinates,
            speed,
            recorded_at: self.clock.now().timestamp(),
        });
        self.broadcaster.publish(&bus_topic(bus_id), event).await;
        Ok(())
    }

    /// Tell everyone following the bus, and each confirmed passenger, about the next stop.
    pub async fn announce_arrival(
        &self,
        schedule_id: Uuid,
        stop_name: &str,
        eta: DateTime<Utc>,
    ) -> Result<usize, BookingError> {
        if stop_name.trim().is_empty() {
            return Err(BookingError::InvalidInput("stop name is required".to_string()));
        }

        let bus_id = self.bus_for(schedule_id).await?;
        let event = TripEvent::ArrivalNotice(ArrivalNoticeEvent {
            bus_id,
            schedule_id,
            stop_name: stop_name.trim().to_string(),
            eta,
        });

        let passengers = self.fan_out(bus_id, schedule_id, event).await?;
        info!(schedule_id = %schedule_id, passengers, "Arrival at {} announced", stop_name.trim());
        Ok(passengers)
    }

    pub async fn announce_destination(
        &self,
        schedule_id: Uuid,
        time: DateTime<Utc>,
    ) -> Result<usize, BookingError> {
        let bus_id = self.bus_for(schedule_id).await?;
        let event = TripEvent::DestinationNotice(DestinationNoticeEvent {
            bus_id,
            schedule_id,
            time,
        });

        let passengers = self.fan_out(bus_id, schedule_id, event).await?;
        info!(schedule_id = %schedule_id, passengers, "Destination reached");
        Ok(passengers)
    }

    async fn bus_for(&self, schedule_id: Uuid) -> Result<Uuid, BookingError> {
        self.schedules
            .get_schedule(schedule_id)
            .await
            .map_err(BookingError::Storage)?
            .map(|s| s.bus_id)
            .ok_or(BookingError::NotFound("Schedule"))
    }

    /// Publishes to the bus topic and to each confirmed passenger once.
    /// Returns the number of distinct passengers addressed.
    async fn fan_out(
        &self,
        bus_id: Uuid,
        schedule_id: Uuid,
        event: TripEvent,
    ) -> Result<usize, BookingError> {
        let users: BTreeSet<String> = self
            .ledger
            .list_by_schedule(schedule_id, &[BookingStatus::Confirmed])
            .await?
            .into_iter()
            .map(|b| b.user_id)
            .collect();

        self.broadcaster.publish(&bus_topic(bus_id), event.clone()).await;
        for user in &users {
            self.broadcaster.publish(&user_topic(user), event.clone()).await;
        }

        Ok(users.len())
    }
}
