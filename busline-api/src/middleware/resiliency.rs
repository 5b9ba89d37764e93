use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    /// One trial call allowed through after the reset timeout.
    HalfOpen,
}

pub struct CircuitBreaker {
    pub name: String,
    state: RwLock<CircuitState>,
    failure_count: AtomicUsize,
    failure_threshold: usize,
    reset_timeout: Duration,
    opened_at: RwLock<Option<Instant>>,
    trial_in_flight: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, reset_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            failure_threshold: threshold.max(1),
            reset_timeout,
            opened_at: RwLock::new(None),
            trial_in_flight: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Whether a call may go through right now. While half-open only the
    /// trial call passes; a trial that never reports back is replaced after
    /// another reset timeout.
    pub async fn allow(&self) -> bool {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if self
                    .trial_in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    *self.opened_at.write().await = Some(Instant::now());
                    return true;
                }
                self.start_trial_if_elapsed().await
            }
            CircuitState::Open => {
                let started = self.start_trial_if_elapsed().await;
                if started {
                    *state = CircuitState::HalfOpen;
                    tracing::info!("Circuit Breaker [{}] moving to Half-Open", self.name);
                }
                started
            }
        }
    }

    async fn start_trial_if_elapsed(&self) -> bool {
        let mut opened_at = self.opened_at.write().await;
        let elapsed = opened_at
            .map(|at| at.elapsed() >= self.reset_timeout)
            .unwrap_or(true);
        if elapsed {
            *opened_at = Some(Instant::now());
            self.trial_in_flight.store(true, Ordering::SeqCst);
        }
        elapsed
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        self.failure_count.store(0, Ordering::SeqCst);
        self.trial_in_flight.store(false, Ordering::SeqCst);
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            tracing::info!("Circuit Breaker [{}] recovered to Closed", self.name);
        }
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;
        self.trial_in_flight.store(false, Ordering::SeqCst);

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            *self.opened_at.write().await = Some(Instant::now());
            tracing::error!("Circuit Breaker [{}] TRIPPED to Open. Failures: {}", self.name, count);
        }
    }
}

/// Guards the payment order route. Server errors (including the 503 a
/// gateway outage maps to) count as failures; client errors do not.
pub async fn circuit_breaker_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let cb = &state.resiliency.payment_cb;

    if !cb.allow().await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "Payment provider is temporarily unavailable, please retry shortly",
                "code": "PAYMENT_PROVIDER_UNAVAILABLE",
            })),
        )
            .into_response();
    }

    let response = next.run(req).await;

    if response.status().is_server_error() {
        cb.record_failure().await;
    } else {
        cb.record_success().await;
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trips_after_threshold() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_secs(60));
        cb.record_failure().await;
        assert!(cb.allow().await);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allow().await);
    }

    #[tokio::test]
    async fn test_half_open_recovers_on_success() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_millis(0));
        cb.record_failure().await;
        assert!(cb.allow().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_millis(0));
        for _ in 0..3 {
            cb.record_failure().await;
        }
        assert!(cb.allow().await);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_half_open_admits_a_single_trial() {
        let cb = std::sync::Arc::new(CircuitBreaker::new("test", 1, Duration::from_millis(50)));
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cb = cb.clone();
            handles.push(tokio::spawn(async move { cb.allow().await }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.allow().await);
        assert!(cb.allow().await);
    }

    #[tokio::test]
    async fn test_abandoned_trial_is_replaced_after_timeout() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_millis(30));
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cb.allow().await);
        assert!(!cb.allow().await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cb.allow().await);
        assert!(!cb.allow().await);
    }
}
