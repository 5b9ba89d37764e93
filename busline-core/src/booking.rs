use busline_shared::Masked;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::schedule::FareComponents;

/// Booking status in the reservation lifecycle.
///
/// `Pending -> Confirmed -> Cancelled` and `Pending -> Expired` are the only edges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Expired,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Expired => "EXPIRED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    /// Expired and cancelled bookings hold no seats and never move again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Expired | BookingStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Expired)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BookingStatus::Pending),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "EXPIRED" => Ok(BookingStatus::Expired),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            other => Err(format!("Unknown booking status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Passenger {
    pub name: String,
    pub age: u8,
    pub gender: Gender,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub email: Masked<String>,
    pub phone: Masked<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    #[default]
    Unverified,
    Verified,
    Failed,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "UNVERIFIED",
            VerificationStatus::Verified => "VERIFIED",
            VerificationStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "VERIFIED" => VerificationStatus::Verified,
            "FAILED" => VerificationStatus::Failed,
            _ => VerificationStatus::Unverified,
        }
    }
}

/// Gateway references recorded on a booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PaymentRecord {
    pub order_id: Option<String>,
    /// Set only on confirmation.
    pub payment_id: Option<String>,
    pub verification: VerificationStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Pending,
    Processed,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "PENDING",
            RefundStatus::Processed => "PROCESSED",
            RefundStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "PROCESSED" => RefundStatus::Processed,
            "FAILED" => RefundStatus::Failed,
            _ => RefundStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancellationRecord {
    pub cancelled_at: DateTime<Utc>,
    pub reason: String,
    pub refund_percent: u8,
    pub refund_amount: i64,
    pub refund_status: RefundStatus,
}

/// A reservation attempt and everything needed to settle it.
///
/// Never deleted: expired and cancelled bookings stay in the ledger for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub user_id: String,
    pub seats: Vec<String>,
    /// One per seat, in the same order as `seats`.
    pub passengers: Vec<Passenger>,
    pub contact: Contact,
    /// Fare snapshot taken at claim time.
    pub fare: FareComponents,
    pub total_amount: i64,
    pub currency: String,
    pub status: BookingStatus,
    pub payment: PaymentRecord,
    pub cancellation: Option<CancellationRecord>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Whether this booking excludes others from its seats at `now`.
    pub fn holds_seats(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            BookingStatus::Pending => self.expires_at > now,
            BookingStatus::Confirmed => true,
            BookingStatus::Expired | BookingStatus::Cancelled => false,
        }
    }

    /// Pending, but past its TTL. The sweep may not have caught up yet.
    pub fn hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == BookingStatus::Pending && self.expires_at <= now
    }

    pub fn passenger_for_seat(&self, seat: &str) -> Option<&Passenger> {
        self.seats
            .iter()
            .position(|s| s == seat)
            .and_then(|idx| self.passengers.get(idx))
    }
}

/// A state change applied through the ledger's compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Confirm {
        payment_id: String,
    },
    Expire,
    Cancel {
        reason: String,
        refund_percent: u8,
        refund_amount: i64,
    },
}

impl Transition {
    pub fn target(&self) -> BookingStatus {
        match self {
            Transition::Confirm { .. } => BookingStatus::Confirmed,
            Transition::Expire => BookingStatus::Expired,
            Transition::Cancel { .. } => BookingStatus::Cancelled,
        }
    }

    /// Writes the transition onto an in-memory record. Callers have already
    /// checked the expected prior state.
    pub fn apply(&self, booking: &mut Booking, now: DateTime<Utc>) {
        match self {
            Transition::Confirm { payment_id } => {
                booking.payment.payment_id = Some(payment_id.clone());
                booking.payment.verification = VerificationStatus::Verified;
            }
            Transition::Expire => {}
            Transition::Cancel {
                reason,
                refund_percent,
                refund_amount,
            } => {
                booking.cancellation = Some(CancellationRecord {
                    cancelled_at: now,
                    reason: reason.clone(),
                    refund_percent: *refund_percent,
                    refund_amount: *refund_amount,
                    refund_status: RefundStatus::Pending,
                });
            }
        }
        booking.status = self.target();
        booking.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(status: BookingStatus, expires_in: Duration) -> Booking {
        let now = Utc::now();
        Booking {
            id: Uuid::new_v4(),
            schedule_id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            seats: vec!["1A".to_string(), "1B".to_string()],
            passengers: vec![
                Passenger { name: "Asha".to_string(), age: 31, gender: Gender::Female },
                Passenger { name: "Ravi".to_string(), age: 34, gender: Gender::Male },
            ],
            contact: Contact {
                email: "asha@example.com".into(),
                phone: "+919800000000".into(),
            },
            fare: FareComponents::new(50_000, 5_000, 2_000),
            total_amount: 114_000,
            currency: "INR".to_string(),
            status,
            payment: PaymentRecord::default(),
            cancellation: None,
            created_at: now,
            expires_at: now + expires_in,
            updated_at: now,
        }
    }

    #[test]
    fn test_valid_transitions() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Expired));
        assert!(Confirmed.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Cancelled));
        assert!(!Confirmed.can_transition_to(Expired));
        assert!(!Expired.can_transition_to(Confirmed));
        assert!(!Cancelled.can_transition_to(Pending));
    }

    #[test]
    fn test_seat_holding_respects_ttl() {
        let now = Utc::now();
        let live = sample(BookingStatus::Pending, Duration::minutes(15));
        assert!(live.holds_seats(now));
        assert!(!live.hold_lapsed(now));

        let stale = sample(BookingStatus::Pending, Duration::minutes(-1));
        assert!(!stale.holds_seats(now));
        assert!(stale.hold_lapsed(now));

        let confirmed = sample(BookingStatus::Confirmed, Duration::minutes(-60));
        assert!(confirmed.holds_seats(now));
    }

    #[test]
    fn test_cancel_transition_records_refund() {
        let mut booking = sample(BookingStatus::Confirmed, Duration::minutes(15));
        let now = Utc::now();
        Transition::Cancel {
            reason: "plans changed".to_string(),
            refund_percent: 90,
            refund_amount: 102_600,
        }
        .apply(&mut booking, now);

        assert_eq!(booking.status, BookingStatus::Cancelled);
        let record = booking.cancellation.unwrap();
        assert_eq!(record.refund_amount, 102_600);
        assert_eq!(record.refund_status, RefundStatus::Pending);
        assert_eq!(booking.total_amount, 114_000);
    }

    #[test]
    fn test_passenger_lookup_by_seat() {
        let booking = sample(BookingStatus::Pending, Duration::minutes(15));
        assert_eq!(booking.passenger_for_seat("1B").unwrap().name, "Ravi");
        assert!(booking.passenger_for_seat("2A").is_none());
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Expired,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        assert!("REFUNDED".parse::<BookingStatus>().is_err());
    }
}
