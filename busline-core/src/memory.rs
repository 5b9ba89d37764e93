//! In-process implementations of the storage ports.
//!
//! Each ledger operation takes the state lock once, performs its checks and
//! writes, and releases it before returning. No lock is held across an await.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::booking::{Booking, BookingStatus, Transition, VerificationStatus};
use crate::repository::{BookingLedger, LedgerError, ScheduleRepository};
use crate::schedule::{Schedule, ScheduleStatus};

#[derive(Default)]
struct LedgerState {
    bookings: HashMap<Uuid, Booking>,
    /// (schedule, seat) -> booking that last claimed it
    holds: HashMap<(Uuid, String), Uuid>,
}

impl LedgerState {
    fn release(&mut self, booking: &Booking) {
        for seat in &booking.seats {
            let key = (booking.schedule_id, seat.clone());
            if self.holds.get(&key) == Some(&booking.id) {
                self.holds.remove(&key);
            }
        }
    }
}

#[derive(Default)]
pub struct InMemoryBookingLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryBookingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState>, LedgerError> {
        self.state
            .read()
            .map_err(|_| LedgerError::Storage("booking ledger lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerState>, LedgerError> {
        self.state
            .write()
            .map_err(|_| LedgerError::Storage("booking ledger lock poisoned".into()))
    }
}

#[async_trait]
impl BookingLedger for InMemoryBookingLedger {
    async fn create(&self, booking: &Booking, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let mut state = self.write()?;

        if state.bookings.contains_key(&booking.id) {
            return Err(LedgerError::Storage(
                format!("duplicate booking id {}", booking.id).into(),
            ));
        }

        let mut conflicts = Vec::new();
        let mut lapsed = HashSet::new();

        for seat in &booking.seats {
            let Some(holder_id) = state.holds.get(&(booking.schedule_id, seat.clone())) else {
                continue;
            };
            match state.bookings.get(holder_id) {
                Some(holder) if holder.holds_seats(now) => conflicts.push(seat.clone()),
                Some(holder) if holder.hold_lapsed(now) => {
                    lapsed.insert(holder.id);
                }
                _ => {}
            }
        }

        if !conflicts.is_empty() {
            return Err(LedgerError::SeatConflict(conflicts));
        }

        for holder_id in lapsed {
            if let Some(holder) = state.bookings.get_mut(&holder_id) {
                Transition::Expire.apply(holder, now);
                let released = holder.clone();
                state.release(&released);
                tracing::info!("Booking {} expired lazily while reclaiming seats", holder_id);
            }
        }

        for seat in &booking.seats {
            state
                .holds
                .insert((booking.schedule_id, seat.clone()), booking.id);
        }
        state.bookings.insert(booking.id, booking.clone());

        Ok(())
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: BookingStatus,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<Booking, LedgerError> {
        let mut state = self.write()?;

        let current = state.bookings.get(&id).ok_or(LedgerError::NotFound(id))?;
        if current.status != expected {
            return Err(LedgerError::StateMismatch {
                id,
                expected,
                actual: current.status,
            });
        }

        let target = transition.target();
        if !expected.can_transition_to(target) {
            return Err(LedgerError::InvalidTransition { from: expected, to: target });
        }

        match transition {
            Transition::Confirm { .. } if current.hold_lapsed(now) => {
                return Err(LedgerError::HoldLapsed(id));
            }
            Transition::Expire if !current.hold_lapsed(now) => {
                return Err(LedgerError::HoldLive(id));
            }
            _ => {}
        }

        let updated = {
            let booking = state.bookings.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
            transition.apply(booking, now);
            booking.clone()
        };

        if target.is_terminal() {
            state.release(&updated);
        }

        Ok(updated)
    }

    async fn attach_order(
        &self,
        id: Uuid,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Booking, LedgerError> {
        let mut state = self.write()?;
        let booking = state.bookings.get_mut(&id).ok_or(LedgerError::NotFound(id))?;

        if booking.status != BookingStatus::Pending {
            return Err(LedgerError::StateMismatch {
                id,
                expected: BookingStatus::Pending,
                actual: booking.status,
            });
        }
        if booking.hold_lapsed(now) {
            return Err(LedgerError::HoldLapsed(id));
        }

        if booking.payment.order_id.is_none() {
            booking.payment.order_id = Some(order_id.to_string());
            booking.updated_at = now;
        }

        Ok(booking.clone())
    }

    async fn mark_verification_failed(&self, id: Uuid) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        let booking = state.bookings.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        if booking.status == BookingStatus::Pending {
            booking.payment.verification = VerificationStatus::Failed;
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, LedgerError> {
        Ok(self.read()?.bookings.get(&id).cloned())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Booking>, LedgerError> {
        let state = self.read()?;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn list_by_schedule(
        &self,
        schedule_id: Uuid,
        states: &[BookingStatus],
    ) -> Result<Vec<Booking>, LedgerError> {
        let state = self.read()?;
        Ok(state
            .bookings
            .values()
            .filter(|b| b.schedule_id == schedule_id && states.contains(&b.status))
            .cloned()
            .collect())
    }

    async fn list_lapsed(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, LedgerError> {
        let state = self.read()?;
        let mut lapsed: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.hold_lapsed(now))
            .cloned()
            .collect();
        lapsed.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        lapsed.truncate(limit);
        Ok(lapsed)
    }
}

/// Schedule lookup backed by a map. Seeded by tests and local runs.
#[derive(Default)]
pub struct InMemoryScheduleRepository {
    schedules: RwLock<HashMap<Uuid, Schedule>>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, schedule: Schedule) {
        let mut schedules = self.schedules.write().unwrap_or_else(|e| e.into_inner());
        schedules.insert(schedule.id, schedule);
    }

    pub fn set_status(&self, id: Uuid, status: ScheduleStatus) {
        let mut schedules = self.schedules.write().unwrap_or_else(|e| e.into_inner());
        if let Some(schedule) = schedules.get_mut(&id) {
            schedule.status = status;
        }
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn get_schedule(
        &self,
        id: Uuid,
    ) -> Result<Option<Schedule>, Box<dyn std::error::Error + Send + Sync>> {
        let schedules = self
            .schedules
            .read()
            .map_err(|_| "schedule store lock poisoned")?;
        Ok(schedules.get(&id).cloned())
    }
}
