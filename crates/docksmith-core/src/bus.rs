//! In-process pub/sub of typed events. Built on `tokio::sync::broadcast`,
//! fanning one internal channel out to many client sockets: a lagging
//! subscriber's oldest queued event is dropped and its drop counter
//! incremented, the publisher never blocks or learns about it.

use std::sync::{
  Arc,
  atomic::{AtomicBool, AtomicU64, Ordering},
};

use docksmith_types::{Event, EventType};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
  All,
  Type(EventType),
}

impl Topic {
  fn matches(self, event_type: EventType) -> bool {
    match self {
      Topic::All => true,
      Topic::Type(t) => t == event_type,
    }
  }
}

/// The narrow capability orchestrators depend on. The bus itself never
/// depends on any orchestrator type, avoiding a cyclic-reference shape by
/// depending on a trait at this seam instead.
pub trait Publisher: Send + Sync {
  fn publish(&self, event: Event);
}

pub struct EventBus {
  tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new(DEFAULT_CAPACITY)
  }
}

impl EventBus {
  pub fn new(capacity: usize) -> Self {
    let (tx, _rx) = broadcast::channel(capacity);
    EventBus { tx }
  }

  /// Subscribe with a topic selector. Returns a receive endpoint; dropping
  /// it (or calling `unsubscribe`) is idempotent and stops delivery.
  pub fn subscribe(&self, topic: Topic) -> Subscription {
    Subscription {
      rx: self.tx.subscribe(),
      topic,
      dropped: Arc::new(AtomicU64::new(0)),
      unsubscribed: Arc::new(AtomicBool::new(false)),
    }
  }
}

impl Publisher for EventBus {
  /// Never blocks: `broadcast::Sender::send` is synchronous and a full
  /// receiver queue degrades that receiver (next `recv` sees `Lagged`)
  /// rather than backing up the publisher.
  fn publish(&self, event: Event) {
    // No active subscribers is not an error for a publisher that doesn't
    // care whether anyone is listening.
    let _ = self.tx.send(event);
  }
}

pub struct Subscription {
  rx: broadcast::Receiver<Event>,
  topic: Topic,
  dropped: Arc<AtomicU64>,
  unsubscribed: Arc<AtomicBool>,
}

impl Subscription {
  pub async fn recv(&mut self) -> Option<Event> {
    loop {
      if self.unsubscribed.load(Ordering::Relaxed) {
        return None;
      }
      match self.rx.recv().await {
        Ok(event) => {
          if self.topic.matches(event.event_type()) {
            return Some(event);
          }
        }
        Err(broadcast::error::RecvError::Lagged(n)) => {
          self.dropped.fetch_add(n, Ordering::Relaxed);
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }

  pub fn dropped_count(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }

  /// Idempotent: safe to call more than once, and safe to never call
  /// (dropping the `Subscription` has the same effect).
  pub fn unsubscribe(&self) {
    self.unsubscribed.store(true, Ordering::Relaxed);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use docksmith_types::{CheckProgressPayload, EventPayload};

  fn check_progress_event(checked: usize) -> Event {
    Event::new(EventPayload::CheckProgress(CheckProgressPayload {
      checked,
      total: 10,
      percent: 0,
      container_name: "web".into(),
      message: String::new(),
    }))
  }

  #[tokio::test]
  async fn subscriber_receives_published_events() {
    let bus = EventBus::default();
    let mut sub = bus.subscribe(Topic::All);
    bus.publish(check_progress_event(1));
    let event = sub.recv().await.unwrap();
    assert_eq!(event.event_type(), EventType::CheckProgress);
  }

  #[tokio::test]
  async fn topic_filter_excludes_other_event_types() {
    let bus = EventBus::default();
    let mut sub = bus.subscribe(Topic::Type(EventType::UpdateProgress));
    bus.publish(check_progress_event(1));
    bus.publish(Event::new(EventPayload::ContainerUpdated(
      docksmith_types::ContainerUpdatedPayload {
        container_id: None,
        container_name: "web".into(),
        operation_id: None,
        status: docksmith_types::ContainerUpdatedStatus::CheckComplete,
      },
    )));
    // Neither published event matches the subscriber's topic.
    let outcome = tokio::time::timeout(
      std::time::Duration::from_millis(50),
      sub.recv(),
    )
    .await;
    assert!(outcome.is_err(), "no UpdateProgress event was published");
  }

  #[tokio::test]
  async fn publish_never_blocks_when_subscriber_lags() {
    let bus = EventBus::new(2);
    let mut sub = bus.subscribe(Topic::All);
    for i in 0..10 {
      bus.publish(check_progress_event(i));
    }
    let event = sub.recv().await.unwrap();
    assert!(matches!(event.payload, EventPayload::CheckProgress(_)));
    assert!(sub.dropped_count() > 0);
  }

  #[tokio::test]
  async fn unsubscribe_is_idempotent() {
    let bus = EventBus::default();
    let sub = bus.subscribe(Topic::All);
    sub.unsubscribe();
    sub.unsubscribe();
  }
}
