pub mod booking;
pub mod clock;
pub mod events;
pub mod memory;
pub mod notification;
pub mod payment;
pub mod repository;
pub mod schedule;

pub use booking::{Booking, BookingStatus, Contact, Gender, Passenger, Transition};
pub use clock::{Clock, ManualClock, SystemClock};
pub use repository::{BookingLedger, LedgerError, ScheduleRepository};
pub use schedule::{FareComponents, Schedule, ScheduleStatus};
