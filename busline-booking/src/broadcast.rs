//! Topic-keyed fan-out of trip events.
//!
//! Topics look like `bus:<id>` or `user:<id>`. Each topic owns a bounded
//! `tokio::sync::broadcast` channel created on first subscription. Delivery is
//! at-most-once: a subscriber that falls behind loses the oldest events, and a
//! publish with nobody listening is dropped. Publishing never returns an error
//! to the caller.

use busline_core::events::EventSink;
use busline_shared::TripEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 256;

type Channels = Arc<RwLock<HashMap<String, broadcast::Sender<TripEvent>>>>;

#[derive(Clone, Default)]
pub struct TripEventBroadcaster {
    channels: Channels,
    sink: Option<Arc<dyn EventSink>>,
}

impl TripEventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror every published event to `sink` as well, on a detached task.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Deliver `event` to the current subscribers of `topic`.
    ///
    /// Returns how many subscribers the event was handed to.
    pub async fn publish(&self, topic: &str, event: TripEvent) -> usize {
        let (delivered, orphaned) = {
            let channels = self.channels.read().await;
            match channels.get(topic) {
                Some(tx) => {
                    let delivered = tx.send(event.clone()).unwrap_or(0);
                    (delivered, tx.receiver_count() == 0)
                }
                None => (0, false),
            }
        };

        if orphaned {
            let mut channels = self.channels.write().await;
            if channels.get(topic).is_some_and(|tx| tx.receiver_count() == 0) {
                channels.remove(topic);
            }
        }

        debug!(topic, kind = event.kind(), delivered, "Trip event published");

        if let Some(sink) = &self.sink {
            let sink = Arc::clone(sink);
            let topic = topic.to_string();
            tokio::spawn(async move {
                if let Err(e) = sink.forward(&topic, &event).await {
                    warn!("Failed to mirror {} event on {}: {}", event.kind(), topic, e);
                }
            });
        }

        delivered
    }

    pub async fn subscribe(&self, topic: &str) -> Subscription {
        let mut channels = self.channels.write().await;
        let rx = channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        debug!(topic, "Subscriber attached");
        Subscription {
            topic: topic.to_string(),
            rx,
        }
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.channels
            .read()
            .await
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Subscribers across all topics.
    pub async fn total_subscribers(&self) -> usize {
        self.channels
            .read()
            .await
            .values()
            .map(|tx| tx.receiver_count())
            .sum()
    }
}

/// Receiving end of one topic. Dropping it (or calling `close`) unsubscribes.
pub struct Subscription {
    topic: String,
    rx: broadcast::Receiver<TripEvent>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next event on the topic, skipping over anything lost to lag.
    /// `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<TripEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(topic = %self.topic, missed, "Subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use busline_shared::events::{Coordinates, LocationUpdateEvent};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn location(bus_id: Uuid) -> TripEvent {
        TripEvent::LocationUpdate(LocationUpdateEvent {
            bus_id,
            coordinates: Coordinates { latitude: 12.97, longitude: 77.59 },
            speed: 42.0,
            recorded_at: 0,
        })
    }

    #[tokio::test]
    async fn test_only_topic_subscribers_receive() {
        let broadcaster = TripEventBroadcaster::new();
        let mut bus_a = broadcaster.subscribe("bus:a").await;
        let mut bus_b = broadcaster.subscribe("bus:b").await;

        let delivered = broadcaster.publish("bus:a", location(Uuid::nil())).await;
        assert_eq!(delivered, 1);

        assert_eq!(bus_a.recv().await.unwrap().kind(), "LOCATION_UPDATE");
        assert!(tokio::time::timeout(std::time::Duration::from_millis(50), bus_b.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let broadcaster = TripEventBroadcaster::new();
        assert_eq!(broadcaster.publish("user:nobody", location(Uuid::nil())).await, 0);
    }

    #[tokio::test]
    async fn test_closed_subscription_prunes_topic() {
        let broadcaster = TripEventBroadcaster::new();
        let sub = broadcaster.subscribe("bus:x").await;
        assert_eq!(broadcaster.subscriber_count("bus:x").await, 1);

        sub.close();
        assert_eq!(broadcaster.subscriber_count("bus:x").await, 0);

        broadcaster.publish("bus:x", location(Uuid::nil())).await;
        assert!(broadcaster.channels.read().await.get("bus:x").is_none());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let broadcaster = TripEventBroadcaster::new();
        let mut sub = broadcaster.subscribe("bus:busy").await;

        for _ in 0..(CHANNEL_CAPACITY + 10) {
            broadcaster.publish("bus:busy", location(Uuid::nil())).await;
        }

        // Still receives the newest events instead of erroring out
        assert!(sub.recv().await.is_some());
    }

    struct ChannelSink(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl EventSink for ChannelSink {
        async fn forward(
            &self,
            topic: &str,
            _event: &TripEvent,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.0.send(topic.to_string())?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_events_are_mirrored_to_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broadcaster = TripEventBroadcaster::new().with_sink(Arc::new(ChannelSink(tx)));

        broadcaster.publish("bus:mirror", location(Uuid::nil())).await;
        assert_eq!(rx.recv().await.unwrap(), "bus:mirror");
    }
}
