use async_trait::async_trait;
use busline_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::Booking;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    BookingConfirmed,
    BookingCancelled,
}

/// A receipt to be rendered and sent by the messaging collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub booking_id: Uuid,
    pub schedule_id: Uuid,
    pub user_id: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
    pub seats: Vec<String>,
    /// Amount paid for confirmations, refund due for cancellations.
    pub amount: i64,
    pub currency: String,
}

impl Notification {
    pub fn confirmed(booking: &Booking) -> Self {
        Self::build(NotificationKind::BookingConfirmed, booking, booking.total_amount)
    }

    pub fn cancelled(booking: &Booking) -> Self {
        let refund = booking
            .cancellation
            .as_ref()
            .map(|c| c.refund_amount)
            .unwrap_or(0);
        Self::build(NotificationKind::BookingCancelled, booking, refund)
    }

    fn build(kind: NotificationKind, booking: &Booking, amount: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            booking_id: booking.id,
            schedule_id: booking.schedule_id,
            user_id: booking.user_id.clone(),
            email: booking.contact.email.clone(),
            phone: booking.contact.phone.clone(),
            seats: booking.seats.clone(),
            amount,
            currency: booking.currency.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Email/SMS delivery collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}
