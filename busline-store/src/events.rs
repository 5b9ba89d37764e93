use async_trait::async_trait;
use busline_core::events::EventSink;
use busline_core::notification::{Notification, Notifier, NotifyError};
use busline_shared::TripEvent;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

pub const TRIP_EVENTS_TOPIC: &str = "trip.events";
pub const NOTIFICATIONS_TOPIC: &str = "notifications.outbound";

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                debug!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

/// Mirrors broadcaster traffic onto `trip.events`, keyed by subscriber topic.
pub struct KafkaEventSink {
    producer: EventProducer,
}

impl KafkaEventSink {
    pub fn new(producer: EventProducer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl EventSink for KafkaEventSink {
    async fn forward(
        &self,
        topic: &str,
        event: &TripEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = json!({ "topic": topic, "event": event }).to_string();
        self.producer.publish(TRIP_EVENTS_TOPIC, topic, &payload).await?;
        Ok(())
    }
}

/// Hands receipts to the messaging service through `notifications.outbound`.
/// Contact details are unmasked here; this is the one place they leave the process.
pub struct KafkaNotifier {
    producer: EventProducer,
}

impl KafkaNotifier {
    pub fn new(producer: EventProducer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl Notifier for KafkaNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notification)
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        self.producer
            .publish(
                NOTIFICATIONS_TOPIC,
                &notification.booking_id.to_string(),
                &payload,
            )
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }
}
