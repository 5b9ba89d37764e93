use async_trait::async_trait;
use busline_shared::TripEvent;

/// Secondary destination for trip events (e.g. a message bus), fed best-effort.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn forward(
        &self,
        topic: &str,
        event: &TripEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
