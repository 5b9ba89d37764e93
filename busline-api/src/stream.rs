use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use busline_booking::Subscription;
use busline_shared::events::{bus_topic, user_topic};
use futures_util::stream::{self, Stream};
use std::time::Duration;
use uuid::Uuid;

use crate::{
    metrics::SubscriberGuard,
    middleware::Claims,
    state::AppState,
};

/// Everything concerning one bus: seat occupancy, position, stop notices.
pub async fn bus_events(
    State(state): State<AppState>,
    Path(bus_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = state.broadcaster.subscribe(&bus_topic(bus_id)).await;
    event_stream(&state, subscription)
}

/// The caller's own arrival and destination notices.
pub async fn my_events(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = state.broadcaster.subscribe(&user_topic(&claims.sub)).await;
    event_stream(&state, subscription)
}

fn event_stream(
    state: &AppState,
    subscription: Subscription,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    tracing::debug!("SSE subscriber joined {}", subscription.topic());
    let guard = SubscriberGuard::new(state.metrics.clone());

    // Ends when the topic is dropped; the guard goes with it
    let events = stream::unfold((subscription, guard), |(mut sub, guard)| async move {
        let event = sub.recv().await?;
        let frame = Event::default().event(event.kind()).json_data(&event);
        Some((frame, (sub, guard)))
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
