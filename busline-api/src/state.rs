use busline_booking::{
    ReservationCoordinator, SeatAvailabilityResolver, TripEventBroadcaster, TripTracker,
};
use busline_store::RedisClient;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::Metrics;
use crate::middleware::resiliency::CircuitBreaker;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

pub struct ResiliencyState {
    pub payment_cb: CircuitBreaker,
}

impl Default for ResiliencyState {
    fn default() -> Self {
        Self {
            payment_cb: CircuitBreaker::new("payment-gateway", 5, Duration::from_secs(30)),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ReservationCoordinator>,
    pub resolver: Arc<SeatAvailabilityResolver>,
    pub tracker: Arc<TripTracker>,
    pub broadcaster: TripEventBroadcaster,
    /// Rate limiting is skipped without it.
    pub redis: Option<Arc<RedisClient>>,
    pub rate_limit_per_minute: i64,
    pub metrics: Arc<Metrics>,
    pub resiliency: Arc<ResiliencyState>,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(
        coordinator: Arc<ReservationCoordinator>,
        resolver: Arc<SeatAvailabilityResolver>,
        tracker: Arc<TripTracker>,
        broadcaster: TripEventBroadcaster,
        metrics: Arc<Metrics>,
        auth: AuthConfig,
    ) -> Self {
        Self {
            coordinator,
            resolver,
            tracker,
            broadcaster,
            redis: None,
            rate_limit_per_minute: 100,
            metrics,
            resiliency: Arc::new(ResiliencyState::default()),
            auth,
        }
    }

    pub fn with_rate_limit(mut self, redis: Arc<RedisClient>, per_minute: i64) -> Self {
        self.redis = Some(redis);
        self.rate_limit_per_minute = per_minute;
        self
    }
}
