pub mod availability;
pub mod broadcast;
pub mod coordinator;
pub mod notify;
pub mod payment;
pub mod refund;
pub mod sweeper;
pub mod tracking;

pub use availability::{SeatAvailabilityResolver, SeatMap, SeatState, SeatStatus};
pub use broadcast::{Subscription, TripEventBroadcaster};
pub use coordinator::{
    BookingError, ClaimRequest, Confirmation, ConfirmRequest, CoordinatorConfig,
    ReservationCoordinator,
};
pub use notify::{spawn_notification_worker, LogNotifier, NotificationDispatcher, RetryPolicy};
pub use payment::{sign_payment, MockPaymentGateway, PaymentBridge};
pub use refund::{RefundError, RefundPolicy, RefundQuote, RefundTier};
pub use sweeper::spawn_expiry_sweeper;
pub use tracking::TripTracker;
