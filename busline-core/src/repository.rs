use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::{Booking, BookingStatus, Transition};
use crate::schedule::Schedule;

/// Read access to bus schedules, owned by schedule management.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn get_schedule(
        &self,
        id: Uuid,
    ) -> Result<Option<Schedule>, Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Booking not found: {0}")]
    NotFound(Uuid),

    #[error("Seats already held: {}", .0.join(", "))]
    SeatConflict(Vec<String>),

    #[error("Booking {id} is {actual}, expected {expected}")]
    StateMismatch {
        id: Uuid,
        expected: BookingStatus,
        actual: BookingStatus,
    },

    #[error("Hold on booking {0} has lapsed")]
    HoldLapsed(Uuid),

    #[error("Hold on booking {0} is still live")]
    HoldLive(Uuid),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Authoritative store of bookings.
///
/// Every write is a single atomic step from the point of view of concurrent
/// callers. `create` checks seat disjointness and inserts together; `transition`
/// only applies when the stored status equals `expected`.
#[async_trait]
pub trait BookingLedger: Send + Sync {
    /// Inserts a new pending booking, or fails with `SeatConflict` if any of its
    /// seats is held by a live booking on the same schedule. Pending holders whose
    /// TTL already passed are expired in the same step.
    async fn create(&self, booking: &Booking, now: DateTime<Utc>) -> Result<(), LedgerError>;

    /// Compare-and-swap on the status field.
    ///
    /// `Confirm` additionally requires the hold to be live at `now` (`HoldLapsed`
    /// otherwise) and `Expire` requires it to have lapsed (`HoldLive` otherwise).
    async fn transition(
        &self,
        id: Uuid,
        expected: BookingStatus,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<Booking, LedgerError>;

    /// Stores the gateway order id on a live pending booking that has none.
    /// If another caller attached one first, the stored booking is returned unchanged.
    async fn attach_order(
        &self,
        id: Uuid,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Booking, LedgerError>;

    /// Audit marker for a rejected payment proof. Only touches pending bookings.
    async fn mark_verification_failed(&self, id: Uuid) -> Result<(), LedgerError>;

    async fn get(&self, id: Uuid) -> Result<Option<Booking>, LedgerError>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Booking>, LedgerError>;

    async fn list_by_schedule(
        &self,
        schedule_id: Uuid,
        states: &[BookingStatus],
    ) -> Result<Vec<Booking>, LedgerError>;

    /// Pending bookings whose TTL passed before `now`, oldest first.
    async fn list_lapsed(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, LedgerError>;
}
