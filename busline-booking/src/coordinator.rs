use busline_core::booking::PaymentRecord;
use busline_core::notification::Notification;
use busline_core::payment::{GatewayOrder, PaymentError};
use busline_core::{
    Booking, BookingLedger, BookingStatus, Clock, Contact, LedgerError, Passenger, Schedule,
    ScheduleRepository, Transition,
};
use busline_shared::events::{bus_topic, Occupancy, SeatOccupancyChangedEvent};
use busline_shared::TripEvent;
use chrono::Duration;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcast::TripEventBroadcaster;
use crate::notify::NotificationDispatcher;
use crate::payment::PaymentBridge;
use crate::refund::{RefundError, RefundPolicy};

const SWEEP_BATCH: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Booking belongs to another user")]
    Forbidden,

    #[error("Seat(s) {} no longer available, please reselect", .0.join(", "))]
    SeatConflict(Vec<String>),

    #[error("Schedule is not open for booking")]
    ScheduleInactive,

    #[error("This booking was already completed or expired, check your booking history")]
    AlreadyFinalized,

    #[error("Payment verification failed")]
    VerificationFailed,

    #[error("Payment provider unavailable, please retry")]
    PaymentProviderUnavailable,

    #[error("Payment provider rejected the order: {0}")]
    PaymentRejected(String),

    #[error(transparent)]
    TooCloseToDeparture(#[from] RefundError),

    #[error("Only confirmed bookings can be cancelled")]
    NotConfirmed,

    #[error("Storage error: {0}")]
    Storage(Box<dyn std::error::Error + Send + Sync>),
}

impl From<LedgerError> for BookingError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(_) => BookingError::NotFound("Booking"),
            LedgerError::SeatConflict(seats) => BookingError::SeatConflict(seats),
            LedgerError::StateMismatch { .. }
            | LedgerError::HoldLapsed(_)
            | LedgerError::HoldLive(_)
            | LedgerError::InvalidTransition { .. } => BookingError::AlreadyFinalized,
            LedgerError::Storage(e) => BookingError::Storage(e),
        }
    }
}

impl From<PaymentError> for BookingError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ProviderUnavailable(_) => BookingError::PaymentProviderUnavailable,
            PaymentError::Rejected(reason) => BookingError::PaymentRejected(reason),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub schedule_id: Uuid,
    #[serde(default)]
    pub user_id: String,
    pub seats: Vec<String>,
    pub passengers: Vec<Passenger>,
    pub contact: Contact,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub booking_id: Uuid,
    #[serde(alias = "gatewayPaymentId")]
    pub payment_id: String,
    #[serde(alias = "gatewaySignature")]
    pub signature: String,
}

#[derive(Debug, Clone)]
pub enum Confirmation {
    /// This call moved the booking to confirmed.
    Confirmed(Booking),
    /// The booking was already confirmed with the same proof.
    Repeated(Booking),
}

impl Confirmation {
    pub fn is_repeat(&self) -> bool {
        matches!(self, Confirmation::Repeated(_))
    }

    pub fn into_booking(self) -> Booking {
        match self {
            Confirmation::Confirmed(booking) | Confirmation::Repeated(booking) => booking,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub hold_ttl: Duration,
    pub refund_policy: RefundPolicy,
    pub currency: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::minutes(15),
            refund_policy: RefundPolicy::default(),
            currency: "INR".to_string(),
        }
    }
}

/// Sole entry point for creating bookings and moving them through
/// `pending -> confirmed -> cancelled` and `pending -> expired`.
///
/// Holds no booking state of its own. Every write goes through the ledger's
/// atomic create or compare-and-swap, so any number of coordinators (and
/// processes) can run side by side.
pub struct ReservationCoordinator {
    schedules: Arc<dyn ScheduleRepository>,
    ledger: Arc<dyn BookingLedger>,
    bridge: Arc<PaymentBridge>,
    broadcaster: TripEventBroadcaster,
    notifications: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
}

impl ReservationCoordinator {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        ledger: Arc<dyn BookingLedger>,
        bridge: Arc<PaymentBridge>,
        broadcaster: TripEventBroadcaster,
        notifications: NotificationDispatcher,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            schedules,
            ledger,
            bridge,
            broadcaster,
            notifications,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // ========================================================================
    // Claim
    // ========================================================================

    /// Atomically claim all requested seats as a new pending booking.
    pub async fn claim(&self, request: ClaimRequest) -> Result<Booking, BookingError> {
        // 1. Shape checks, no I/O
        let seats = validate_claim(&request)?;

        // 2. Schedule must exist, be active, and not have left yet
        let schedule = self.load_schedule(request.schedule_id).await?;
        let now = self.clock.now();
        if !schedule.is_active() || schedule.departure_time <= now {
            return Err(BookingError::ScheduleInactive);
        }
        if let Some(unknown) = seats.iter().find(|s| !schedule.has_seat(s)) {
            return Err(BookingError::InvalidInput(format!(
                "Seat {} does not exist on this bus",
                unknown
            )));
        }

        // 3. Freeze the fare and insert; the ledger enforces seat disjointness
        let booking = Booking {
            id: Uuid::new_v4(),
            schedule_id: schedule.id,
            user_id: request.user_id,
            total_amount: schedule.fare.total_for(seats.len()),
            fare: schedule.fare,
            seats,
            passengers: request.passengers,
            contact: request.contact,
            currency: self.config.currency.clone(),
            status: BookingStatus::Pending,
            payment: PaymentRecord::default(),
            cancellation: None,
            created_at: now,
            expires_at: now + self.config.hold_ttl,
            updated_at: now,
        };

        match self.ledger.create(&booking, now).await {
            Ok(()) => {}
            Err(LedgerError::SeatConflict(taken)) => {
                warn!(
                    schedule_id = %schedule.id,
                    "Seat claim lost: {} already held",
                    taken.join(", ")
                );
                return Err(BookingError::SeatConflict(taken));
            }
            Err(e) => {
                error!(schedule_id = %schedule.id, "Failed to store booking: {}", e);
                return Err(e.into());
            }
        }

        info!(
            booking_id = %booking.id,
            schedule_id = %booking.schedule_id,
            seats = ?booking.seats,
            total = booking.total_amount,
            "Seats claimed, booking pending until {}",
            booking.expires_at
        );

        // 4. Announce only after the insert committed
        self.announce(schedule.bus_id, &booking, Occupancy::PendingHold).await;

        Ok(booking)
    }

    // ========================================================================
    // Payment
    // ========================================================================

    /// Create (or return the already stored) gateway order for a pending booking.
    pub async fn create_order(
        &self,
        booking_id: Uuid,
        requested_by: &str,
    ) -> Result<GatewayOrder, BookingError> {
        let booking = self.owned_booking(booking_id, requested_by).await?;
        let now = self.clock.now();

        if booking.status != BookingStatus::Pending {
            return Err(BookingError::AlreadyFinalized);
        }
        if booking.hold_lapsed(now) {
            self.expire_one(&booking).await;
            return Err(BookingError::AlreadyFinalized);
        }

        if let Some(order_id) = &booking.payment.order_id {
            debug!(booking_id = %booking.id, "Reusing stored gateway order {}", order_id);
            return Ok(stored_order(&booking, order_id));
        }

        // Nothing is written until the gateway answers, so a failure here
        // leaves the booking pending with no order id and the call can be retried.
        let order = self.bridge.create_order(&booking).await.map_err(|e| {
            error!(booking_id = %booking.id, "Gateway order creation failed: {}", e);
            BookingError::from(e)
        })?;

        let stored = self
            .ledger
            .attach_order(booking.id, &order.order_id, self.clock.now())
            .await?;

        match stored.payment.order_id.as_deref() {
            Some(id) if id == order.order_id => {
                info!(
                    booking_id = %booking.id,
                    schedule_id = %booking.schedule_id,
                    "Gateway order {} attached",
                    order.order_id
                );
                Ok(order)
            }
            Some(winner) => {
                debug!(booking_id = %booking.id, "Concurrent order {} won, adopting it", winner);
                Ok(stored_order(&stored, winner))
            }
            None => Err(BookingError::AlreadyFinalized),
        }
    }

    /// Verify the gateway's payment proof and confirm the booking.
    ///
    /// Repeating a successful confirmation with the same proof returns the
    /// confirmed booking without any further side effects.
    pub async fn confirm(&self, request: ConfirmRequest) -> Result<Booking, BookingError> {
        self.confirm_with_outcome(request)
            .await
            .map(Confirmation::into_booking)
    }

    /// Same as [`confirm`](Self::confirm), but tells a first confirmation
    /// apart from a replay of one.
    pub async fn confirm_with_outcome(
        &self,
        request: ConfirmRequest,
    ) -> Result<Confirmation, BookingError> {
        let booking = self
            .ledger
            .get(request.booking_id)
            .await?
            .ok_or(BookingError::NotFound("Booking"))?;

        match booking.status {
            BookingStatus::Pending => {}
            BookingStatus::Confirmed if self.is_same_confirmation(&booking, &request) => {
                debug!(booking_id = %booking.id, "Repeated confirmation, returning stored booking");
                return Ok(Confirmation::Repeated(booking));
            }
            _ => return Err(BookingError::AlreadyFinalized),
        }

        // 1. Proof must match the order stored on the booking
        let verified = booking
            .payment
            .order_id
            .as_deref()
            .map(|order_id| {
                self.bridge
                    .verify(order_id, &request.payment_id, &request.signature)
            })
            .unwrap_or(false);

        if !verified {
            warn!(booking_id = %booking.id, "Payment proof rejected");
            if let Err(e) = self.ledger.mark_verification_failed(booking.id).await {
                error!(booking_id = %booking.id, "Failed to record verification failure: {}", e);
            }
            return Err(BookingError::VerificationFailed);
        }

        // 2. CAS pending -> confirmed; the ledger refuses lapsed holds
        let now = self.clock.now();
        let result = self
            .ledger
            .transition(
                booking.id,
                BookingStatus::Pending,
                Transition::Confirm {
                    payment_id: request.payment_id.clone(),
                },
                now,
            )
            .await;

        let confirmed = match result {
            Ok(confirmed) => confirmed,
            Err(LedgerError::HoldLapsed(_)) => {
                warn!(
                    booking_id = %booking.id,
                    "Payment {} arrived after hold lapsed, needs reconciliation",
                    request.payment_id
                );
                self.expire_one(&booking).await;
                return Err(BookingError::AlreadyFinalized);
            }
            Err(LedgerError::StateMismatch {
                actual: BookingStatus::Confirmed,
                ..
            }) => {
                // Lost to a concurrent confirm; fine if it carried the same proof
                let current = self.ledger.get(booking.id).await?;
                return match current {
                    Some(current) if self.is_same_confirmation(&current, &request) => {
                        Ok(Confirmation::Repeated(current))
                    }
                    _ => Err(BookingError::AlreadyFinalized),
                };
            }
            Err(LedgerError::StateMismatch { actual, .. }) => {
                warn!(
                    booking_id = %booking.id,
                    "Payment {} arrived for a booking already {}, needs reconciliation",
                    request.payment_id,
                    actual
                );
                return Err(BookingError::AlreadyFinalized);
            }
            Err(e) => {
                error!(booking_id = %booking.id, "Confirmation write failed: {}", e);
                return Err(e.into());
            }
        };

        info!(
            booking_id = %confirmed.id,
            schedule_id = %confirmed.schedule_id,
            payment_id = %request.payment_id,
            "Booking confirmed"
        );

        // 3. Side effects strictly after commit
        self.announce_for_schedule(&confirmed, Occupancy::Confirmed).await;
        self.notifications.dispatch(Notification::confirmed(&confirmed));

        Ok(Confirmation::Confirmed(confirmed))
    }

    fn is_same_confirmation(&self, booking: &Booking, request: &ConfirmRequest) -> bool {
        let (Some(order_id), Some(payment_id)) = (
            booking.payment.order_id.as_deref(),
            booking.payment.payment_id.as_deref(),
        ) else {
            return false;
        };

        payment_id == request.payment_id
            && self.bridge.verify(order_id, payment_id, &request.signature)
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    /// Move every pending booking past its TTL to expired.
    ///
    /// Each booking goes through the CAS on its own, so one confirmed in the
    /// meantime is skipped. Returns how many bookings this call expired.
    pub async fn expire_stale(&self) -> Result<usize, BookingError> {
        let now = self.clock.now();
        let lapsed = self.ledger.list_lapsed(now, SWEEP_BATCH).await?;
        if lapsed.is_empty() {
            return Ok(0);
        }

        let mut expired = 0;
        for booking in &lapsed {
            if self.expire_one(booking).await {
                expired += 1;
            }
        }

        info!("Expiry sweep: {} of {} lapsed bookings expired", expired, lapsed.len());
        Ok(expired)
    }

    async fn expire_one(&self, booking: &Booking) -> bool {
        let result = self
            .ledger
            .transition(
                booking.id,
                BookingStatus::Pending,
                Transition::Expire,
                self.clock.now(),
            )
            .await;

        match result {
            Ok(expired) => {
                info!(
                    booking_id = %expired.id,
                    schedule_id = %expired.schedule_id,
                    "Booking expired, seats released"
                );
                self.announce_for_schedule(&expired, Occupancy::Released).await;
                true
            }
            Err(LedgerError::StateMismatch { actual, .. }) => {
                debug!(booking_id = %booking.id, "Skipping expiry, booking is now {}", actual);
                false
            }
            Err(LedgerError::HoldLive(_)) => false,
            Err(e) => {
                error!(booking_id = %booking.id, "Failed to expire booking: {}", e);
                false
            }
        }
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    pub async fn cancel(
        &self,
        booking_id: Uuid,
        requested_by: &str,
        reason: &str,
    ) -> Result<Booking, BookingError> {
        // 1. Ownership and state
        let booking = self.owned_booking(booking_id, requested_by).await?;
        if booking.status != BookingStatus::Confirmed {
            return Err(BookingError::NotConfirmed);
        }

        // 2. Refund from time to departure
        let schedule = self.load_schedule(booking.schedule_id).await?;
        let now = self.clock.now();
        let quote = self
            .config
            .refund_policy
            .quote(booking.total_amount, schedule.departure_time, now)?;

        let reason = match reason.trim() {
            "" => "Cancelled by passenger",
            r => r,
        };

        // 3. CAS confirmed -> cancelled; releases the seats in the same step
        let cancelled = self
            .ledger
            .transition(
                booking.id,
                BookingStatus::Confirmed,
                Transition::Cancel {
                    reason: reason.to_string(),
                    refund_percent: quote.percent,
                    refund_amount: quote.amount,
                },
                now,
            )
            .await
            .map_err(|e| match e {
                LedgerError::StateMismatch { .. } => BookingError::NotConfirmed,
                other => other.into(),
            })?;

        info!(
            booking_id = %cancelled.id,
            schedule_id = %cancelled.schedule_id,
            refund_percent = quote.percent,
            refund_amount = quote.amount,
            "Booking cancelled"
        );

        self.announce(schedule.bus_id, &cancelled, Occupancy::Released).await;
        self.notifications.dispatch(Notification::cancelled(&cancelled));

        Ok(cancelled)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn booking(&self, booking_id: Uuid, requested_by: &str) -> Result<Booking, BookingError> {
        self.owned_booking(booking_id, requested_by).await
    }

    pub async fn bookings_for(&self, user_id: &str) -> Result<Vec<Booking>, BookingError> {
        Ok(self.ledger.list_by_user(user_id).await?)
    }

    async fn owned_booking(&self, booking_id: Uuid, requested_by: &str) -> Result<Booking, BookingError> {
        let booking = self
            .ledger
            .get(booking_id)
            .await?
            .ok_or(BookingError::NotFound("Booking"))?;

        if booking.user_id != requested_by {
            warn!(booking_id = %booking_id, "Access to another user's booking refused");
            return Err(BookingError::Forbidden);
        }
        Ok(booking)
    }

    async fn load_schedule(&self, schedule_id: Uuid) -> Result<Schedule, BookingError> {
        self.schedules
            .get_schedule(schedule_id)
            .await
            .map_err(BookingError::Storage)?
            .ok_or(BookingError::NotFound("Schedule"))
    }

    // ========================================================================
    // Events
    // ========================================================================

    async fn announce_for_schedule(&self, booking: &Booking, occupancy: Occupancy) {
        match self.schedules.get_schedule(booking.schedule_id).await {
            Ok(Some(schedule)) => self.announce(schedule.bus_id, booking, occupancy).await,
            Ok(None) => warn!(
                schedule_id = %booking.schedule_id,
                "Schedule vanished, occupancy change not announced"
            ),
            Err(e) => warn!(
                schedule_id = %booking.schedule_id,
                "Schedule lookup failed, occupancy change not announced: {}",
                e
            ),
        }
    }

    async fn announce(&self, bus_id: Uuid, booking: &Booking, occupancy: Occupancy) {
        let event = TripEvent::SeatOccupancyChanged(SeatOccupancyChangedEvent {
            schedule_id: booking.schedule_id,
            seats: booking.seats.clone(),
            occupancy,
            changed_at: booking.updated_at.timestamp(),
        });
        self.broadcaster.publish(&bus_topic(bus_id), event).await;
    }
}

fn stored_order(booking: &Booking, order_id: &str) -> GatewayOrder {
    GatewayOrder {
        order_id: order_id.to_string(),
        amount: booking.total_amount,
        currency: booking.currency.clone(),
        receipt: booking.id.to_string(),
        created_at: booking.updated_at,
    }
}

/// Returns the trimmed seat labels.
fn validate_claim(request: &ClaimRequest) -> Result<Vec<String>, BookingError> {
    if request.user_id.trim().is_empty() {
        return Err(BookingError::InvalidInput("user is required".to_string()));
    }
    if request.seats.is_empty() {
        return Err(BookingError::InvalidInput("at least one seat is required".to_string()));
    }

    let seats: Vec<String> = request.seats.iter().map(|s| s.trim().to_string()).collect();
    if seats.iter().any(|s| s.is_empty()) {
        return Err(BookingError::InvalidInput("seat labels must not be blank".to_string()));
    }

    let mut seen = HashSet::new();
    if let Some(dup) = seats.iter().find(|s| !seen.insert(s.as_str())) {
        return Err(BookingError::InvalidInput(format!("seat {} requested twice", dup)));
    }

    if request.passengers.len() != seats.len() {
        return Err(BookingError::InvalidInput(format!(
            "{} passengers for {} seats",
            request.passengers.len(),
            seats.len()
        )));
    }
    if request.passengers.iter().any(|p| p.name.trim().is_empty()) {
        return Err(BookingError::InvalidInput("passenger name is required".to_string()));
    }

    let contact = &request.contact;
    if !contact.email.expose().contains('@') {
        return Err(BookingError::InvalidInput("contact email is required".to_string()));
    }
    if contact.phone.expose().trim().is_empty() {
        return Err(BookingError::InvalidInput("contact phone is required".to_string()));
    }

    Ok(seats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use busline_core::booking::Gender;

    fn request(seats: &[&str], passengers: usize) -> ClaimRequest {
        ClaimRequest {
            schedule_id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            seats: seats.iter().map(|s| s.to_string()).collect(),
            passengers: (0..passengers)
                .map(|i| Passenger { name: format!("P{}", i), age: 30, gender: Gender::Female })
                .collect(),
            contact: Contact { email: "p@example.com".into(), phone: "+911234567890".into() },
        }
    }

    #[test]
    fn test_claim_validation() {
        assert!(validate_claim(&request(&["1A", "1B"], 2)).is_ok());

        assert!(matches!(validate_claim(&request(&[], 0)), Err(BookingError::InvalidInput(_))));
        assert!(matches!(
            validate_claim(&request(&["1A", "1A"], 2)),
            Err(BookingError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_claim(&request(&["1A", " 1A "], 2)),
            Err(BookingError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_claim(&request(&["1A", "1B"], 1)),
            Err(BookingError::InvalidInput(_))
        ));

        let mut no_phone = request(&["1A"], 1);
        no_phone.contact.phone = "".into();
        assert!(matches!(validate_claim(&no_phone), Err(BookingError::InvalidInput(_))));
    }

    #[test]
    fn test_user_facing_messages() {
        assert_eq!(
            BookingError::SeatConflict(vec!["12A".to_string()]).to_string(),
            "Seat(s) 12A no longer available, please reselect"
        );
        assert!(BookingError::AlreadyFinalized
            .to_string()
            .contains("check your booking history"));
    }
}
