use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operation::Stage;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
  CheckProgress,
  UpdateProgress,
  ContainerUpdated,
}

impl EventType {
  pub fn as_topic(self) -> &'static str {
    match self {
      EventType::CheckProgress => "CheckProgress",
      EventType::UpdateProgress => "UpdateProgress",
      EventType::ContainerUpdated => "ContainerUpdated",
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckProgressPayload {
  pub checked: usize,
  pub total: usize,
  pub percent: u8,
  pub container_name: String,
  pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProgressPayload {
  pub operation_id: String,
  pub container_name: String,
  pub stack_name: Option<String>,
  pub stage: Stage,
  pub progress: u8,
  pub message: String,
  pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerUpdatedStatus {
  Updated,
  Failed,
  CheckComplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerUpdatedPayload {
  pub container_id: Option<String>,
  pub container_name: String,
  pub operation_id: Option<String>,
  pub status: ContainerUpdatedStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventPayload {
  CheckProgress(CheckProgressPayload),
  UpdateProgress(UpdateProgressPayload),
  ContainerUpdated(ContainerUpdatedPayload),
}

impl EventPayload {
  pub fn event_type(&self) -> EventType {
    match self {
      EventPayload::CheckProgress(_) => EventType::CheckProgress,
      EventPayload::UpdateProgress(_) => EventType::UpdateProgress,
      EventPayload::ContainerUpdated(_) => EventType::ContainerUpdated,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
  #[serde(flatten)]
  pub payload: EventPayload,
  pub timestamp: DateTime<Utc>,
}

impl Event {
  pub fn new(payload: EventPayload) -> Self {
    Event { payload, timestamp: Utc::now() }
  }

  pub fn event_type(&self) -> EventType {
    self.payload.event_type()
  }
}
