//! Out-of-band receipt delivery.
//!
//! The coordinator enqueues a `Notification` after a ledger commit and moves
//! on. A background worker drains the queue and retries failed deliveries
//! with exponential backoff. Nothing here can fail a booking operation.

use async_trait::async_trait;
use busline_core::notification::{Notification, Notifier, NotifyError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);

        delay.min(self.max_delay)
    }
}

/// Handle used by the coordinator to queue receipts.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a notification. Never fails the caller; a closed queue is logged.
    pub fn dispatch(&self, notification: Notification) {
        let booking_id = notification.booking_id;
        if self.tx.send(notification).is_err() {
            error!("Notification queue closed, dropping receipt for booking {}", booking_id);
        }
    }
}

/// Drain `rx` until every dispatcher is dropped.
pub fn spawn_notification_worker(
    mut rx: mpsc::UnboundedReceiver<Notification>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Notification worker started");
        while let Some(notification) = rx.recv().await {
            deliver_with_retry(notifier.as_ref(), &notification, &policy).await;
        }
        info!("Notification worker stopped");
    })
}

/// Returns whether the notification was eventually delivered.
pub async fn deliver_with_retry(
    notifier: &dyn Notifier,
    notification: &Notification,
    policy: &RetryPolicy,
) -> bool {
    let mut attempt = 0;
    loop {
        match notifier.deliver(notification).await {
            Ok(()) => {
                if attempt > 0 {
                    info!(
                        booking_id = %notification.booking_id,
                        attempt,
                        "Notification delivered after retry"
                    );
                }
                return true;
            }
            Err(e) if attempt >= policy.max_retries => {
                error!(
                    booking_id = %notification.booking_id,
                    kind = ?notification.kind,
                    "Giving up on notification after {} attempts: {}",
                    attempt + 1,
                    e
                );
                return false;
            }
            Err(e) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    booking_id = %notification.booking_id,
                    attempt,
                    "Notification delivery failed, retrying in {:?}: {}",
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Writes receipts to the log. Used when no outbound channel is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            booking_id = %notification.booking_id,
            kind = ?notification.kind,
            email = %notification.email,
            seats = ?notification.seats,
            amount = notification.amount,
            "Receipt sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busline_core::notification::NotificationKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn receipt() -> Notification {
        Notification {
            id: Uuid::new_v4(),
            kind: NotificationKind::BookingConfirmed,
            booking_id: Uuid::new_v4(),
            schedule_id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            email: "a@example.com".into(),
            phone: "+910000000000".into(),
            seats: vec!["1A".to_string()],
            amount: 57_000,
            currency: "INR".to_string(),
        }
    }

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    /// Fails the first `failures` deliveries.
    struct FlakyNotifier {
        failures: usize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn deliver(&self, _n: &Notification) -> Result<(), NotifyError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                Err(NotifyError::Delivery("smtp timeout".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(8), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let notifier = FlakyNotifier { failures: 2, attempts: AtomicUsize::new(0) };
        assert!(deliver_with_retry(&notifier, &receipt(), &fast_policy(3)).await);
        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let notifier = FlakyNotifier { failures: 100, attempts: AtomicUsize::new(0) };
        assert!(!deliver_with_retry(&notifier, &receipt(), &fast_policy(2)).await);
        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_worker_drains_queue() {
        let notifier = Arc::new(FlakyNotifier { failures: 0, attempts: AtomicUsize::new(0) });
        let (dispatcher, rx) = NotificationDispatcher::new();
        let worker = spawn_notification_worker(rx, notifier.clone(), fast_policy(0));

        dispatcher.dispatch(receipt());
        dispatcher.dispatch(receipt());
        drop(dispatcher);

        worker.await.unwrap();
        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 2);
    }
}
