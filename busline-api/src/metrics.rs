//! Prometheus metrics for the booking lifecycle, scraped from `GET /metrics`.

use prometheus::{
    core::{AtomicU64, GenericGauge},
    opts, CounterVec, IntCounter, Registry, TextEncoder,
};
use std::sync::Arc;

pub struct Metrics {
    registry: Registry,

    /// Labels: `outcome` (held, conflict, rejected, error)
    claims: CounterVec,

    /// Labels: `outcome` (confirmed, repeat, verification_failed, finalized, rejected, error)
    confirmations: CounterVec,

    cancellations: IntCounter,

    expired: IntCounter,

    /// Open SSE connections across all topics.
    event_subscribers: GenericGauge<AtomicU64>,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let claims = CounterVec::new(
            opts!("busline_claims_total", "Seat claim attempts by outcome"),
            &["outcome"],
        )?;
        let confirmations = CounterVec::new(
            opts!("busline_confirmations_total", "Payment confirmations by outcome"),
            &["outcome"],
        )?;
        let cancellations = IntCounter::new(
            "busline_cancellations_total",
            "Confirmed bookings cancelled by passengers",
        )?;
        let expired = IntCounter::new(
            "busline_expired_total",
            "Pending bookings expired by the sweeper",
        )?;
        let event_subscribers = GenericGauge::new(
            "busline_event_subscribers",
            "Currently connected trip event subscribers",
        )?;

        registry.register(Box::new(claims.clone()))?;
        registry.register(Box::new(confirmations.clone()))?;
        registry.register(Box::new(cancellations.clone()))?;
        registry.register(Box::new(expired.clone()))?;
        registry.register(Box::new(event_subscribers.clone()))?;

        Ok(Self {
            registry,
            claims,
            confirmations,
            cancellations,
            expired,
            event_subscribers,
        })
    }

    pub fn record_claim(&self, outcome: &str) {
        self.claims.with_label_values(&[outcome]).inc();
    }

    pub fn record_confirmation(&self, outcome: &str) {
        self.confirmations.with_label_values(&[outcome]).inc();
    }

    pub fn record_cancellation(&self) {
        self.cancellations.inc();
    }

    pub fn record_expired(&self, count: usize) {
        self.expired.inc_by(count as u64);
    }

    pub fn subscribers(&self) -> u64 {
        self.event_subscribers.get()
    }

    /// Prometheus text exposition format.
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Counts one open event stream for as long as it lives.
pub struct SubscriberGuard {
    metrics: Arc<Metrics>,
}

impl SubscriberGuard {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        metrics.event_subscribers.inc();
        Self { metrics }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.metrics.event_subscribers.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_lifecycle_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_claim("held");
        metrics.record_claim("conflict");
        metrics.record_expired(3);

        let text = metrics.export().unwrap();
        assert!(text.contains("busline_claims_total{outcome=\"held\"} 1"));
        assert!(text.contains("busline_claims_total{outcome=\"conflict\"} 1"));
        assert!(text.contains("busline_expired_total 3"));
    }

    #[test]
    fn test_subscriber_guard_tracks_open_streams() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let first = SubscriberGuard::new(metrics.clone());
        let second = SubscriberGuard::new(metrics.clone());
        assert_eq!(metrics.subscribers(), 2);

        drop(first);
        assert_eq!(metrics.subscribers(), 1);
        drop(second);
        assert_eq!(metrics.subscribers(), 0);
    }
}
