//! Converts the event bus into one Server-Sent-Events stream per client,
//! with a 15-second heartbeat so intermediaries don't time the connection
//! out. Disconnecting a client only ever cancels its own stream; it never
//! touches the operation that produced the events.

use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::Stream;

use crate::bus::{EventBus, Topic};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Build an Axum SSE response subscribed to every event on the bus.
pub fn event_stream(
  bus: &EventBus,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>> + use<>> {
  let mut subscription = bus.subscribe(Topic::All);
  let stream = async_stream::stream! {
    yield Ok(SseEvent::default().event("connected").data("{}"));
    while let Some(event) = subscription.recv().await {
      let data = serde_json::to_string(&event).unwrap_or_default();
      yield Ok(SseEvent::default().event(event.event_type().as_topic()).data(data));
    }
  };
  Sse::new(stream).keep_alive(
    KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("keepalive"),
  )
}
