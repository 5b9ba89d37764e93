use busline_booking::{spawn_expiry_sweeper, spawn_notification_worker, RetryPolicy};
use busline_core::notification::{Notification, Notifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::state::AppState;

/// Background jobs that run for the life of the server.
pub struct Workers {
    pub sweeper: JoinHandle<()>,
    pub notifications: JoinHandle<()>,
}

pub fn start_workers(
    state: &AppState,
    sweep_every: Duration,
    notification_rx: mpsc::UnboundedReceiver<Notification>,
    notifier: Arc<dyn Notifier>,
) -> Workers {
    let metrics = state.metrics.clone();
    let sweeper = spawn_expiry_sweeper(state.coordinator.clone(), sweep_every, move |expired| {
        metrics.record_expired(expired);
    });

    let notifications =
        spawn_notification_worker(notification_rx, notifier, RetryPolicy::default());

    tracing::info!(
        "Background workers started (sweep every {}s)",
        sweep_every.as_secs()
    );

    Workers {
        sweeper,
        notifications,
    }
}
