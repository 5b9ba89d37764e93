use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::coordinator::ReservationCoordinator;

/// Run `expire_stale` every `every`. `on_sweep` receives the number of
/// bookings each pass expired.
pub fn spawn_expiry_sweeper<F>(
    coordinator: Arc<ReservationCoordinator>,
    every: Duration,
    on_sweep: F,
) -> JoinHandle<()>
where
    F: Fn(usize) + Send + 'static,
{
    tokio::spawn(async move {
        info!("Expiry sweeper started, interval {:?}", every);

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match coordinator.expire_stale().await {
                Ok(expired) => on_sweep(expired),
                Err(e) => error!("Expiry sweep failed: {}", e),
            }
        }
    })
}
