pub mod models;
pub mod pii;

pub use models::events::{self, TripEvent};
pub use pii::Masked;
