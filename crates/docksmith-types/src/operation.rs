use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
  Update,
  Rollback,
  Restart,
  Start,
  Stop,
  Remove,
  LabelChange,
  FixComposeMismatch,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
  InProgress,
  Complete,
  Failed,
}

/// The stages an update/label/restart operation moves through, with their
/// canonical progress-percent anchor. `updating_compose` and
/// `pulling_image` are skipped for operation kinds that don't touch them
/// (e.g. a plain restart jumps straight to `stopping`).
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  Validating,
  PreCheck,
  UpdatingCompose,
  PullingImage,
  Stopping,
  Recreating,
  /// Entered only on a failed recreate, while the orchestrator restores
  /// the prior container image to leave the stack running.
  RollingBack,
  Starting,
  HealthCheck,
  Complete,
  Failed,
}

impl Stage {
  pub fn progress_percent(self) -> u8 {
    match self {
      Stage::Validating => 0,
      Stage::PreCheck => 5,
      Stage::UpdatingCompose => 15,
      Stage::PullingImage => 30,
      Stage::Stopping => 50,
      Stage::RollingBack => 60,
      Stage::Recreating => 70,
      Stage::Starting => 80,
      Stage::HealthCheck => 90,
      Stage::Complete => 100,
      Stage::Failed => 100,
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, Stage::Complete | Stage::Failed)
  }
}

/// The tagged payload that the `old_version`/`new_version` string columns
/// decode to, dispatched on `operation_type`. Keeps the rollback path for
/// updates and label changes on one code path while the persisted schema
/// stays two plain strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum OperationPayload {
  Update { from: String, to: String },
  LabelChange {
    before: BTreeMap<String, String>,
    after: BTreeMap<String, String>,
  },
}

impl OperationPayload {
  pub fn encode(&self) -> (String, String) {
    match self {
      OperationPayload::Update { from, to } => {
        (from.clone(), to.clone())
      }
      OperationPayload::LabelChange { before, after } => (
        serde_json::to_string(before).unwrap_or_default(),
        serde_json::to_string(after).unwrap_or_default(),
      ),
    }
  }

  pub fn decode(
    op_type: OperationType,
    old_version: &str,
    new_version: &str,
  ) -> Self {
    match op_type {
      OperationType::LabelChange => OperationPayload::LabelChange {
        before: serde_json::from_str(old_version).unwrap_or_default(),
        after: serde_json::from_str(new_version).unwrap_or_default(),
      },
      _ => OperationPayload::Update {
        from: old_version.to_string(),
        to: new_version.to_string(),
      },
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
  pub operation_id: String,
  pub container_id: Option<String>,
  pub container_name: String,
  pub stack_name: Option<String>,
  pub operation_type: OperationType,
  pub status: OperationStatus,
  pub old_version: String,
  pub new_version: String,
  pub batch_group_id: Option<String>,
  pub error_message: Option<String>,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub updated_at: DateTime<Utc>,
  pub rollback_occurred: bool,
}

impl Operation {
  pub fn new(
    operation_id: String,
    container_name: String,
    stack_name: Option<String>,
    operation_type: OperationType,
    batch_group_id: Option<String>,
  ) -> Self {
    let now = Utc::now();
    Operation {
      operation_id,
      container_id: None,
      container_name,
      stack_name,
      operation_type,
      status: OperationStatus::InProgress,
      old_version: String::new(),
      new_version: String::new(),
      batch_group_id,
      error_message: None,
      created_at: now,
      started_at: Some(now),
      completed_at: None,
      updated_at: now,
      rollback_occurred: false,
    }
  }

  pub fn payload(&self) -> OperationPayload {
    OperationPayload::decode(
      self.operation_type,
      &self.old_version,
      &self.new_version,
    )
  }

  pub fn set_payload(&mut self, payload: OperationPayload) {
    let (old, new) = payload.encode();
    self.old_version = old;
    self.new_version = new;
  }

  /// Enforces the monotonic transition rule: a terminal status can never
  /// move back to `InProgress`.
  pub fn complete(&mut self) {
    if self.status != OperationStatus::InProgress {
      return;
    }
    self.status = OperationStatus::Complete;
    self.error_message = None;
    let now = Utc::now();
    self.completed_at = Some(now);
    self.updated_at = now;
  }

  pub fn fail(&mut self, error: impl Into<String>) {
    if self.status != OperationStatus::InProgress {
      return;
    }
    self.status = OperationStatus::Failed;
    self.error_message = Some(error.into());
    let now = Utc::now();
    self.completed_at = Some(now);
    self.updated_at = now;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn terminal_status_is_monotonic() {
    let mut op = Operation::new(
      "op1".into(),
      "web".into(),
      None,
      OperationType::Update,
      None,
    );
    op.complete();
    assert_eq!(op.status, OperationStatus::Complete);
    // A later fail() must not move a completed operation back.
    op.fail("should not apply");
    assert_eq!(op.status, OperationStatus::Complete);
    assert!(op.error_message.is_none());
  }

  #[test]
  fn failed_status_always_carries_an_error_message() {
    let mut op = Operation::new(
      "op2".into(),
      "db".into(),
      None,
      OperationType::Update,
      None,
    );
    op.fail("pre-update check failed");
    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.error_message.as_deref(), Some("pre-update check failed"));
  }

  #[test]
  fn label_change_payload_round_trips_through_old_new_version_columns() {
    let mut before = BTreeMap::new();
    before.insert("docksmith.ignore".to_string(), "true".to_string());
    let payload = OperationPayload::LabelChange {
      before: before.clone(),
      after: BTreeMap::new(),
    };
    let mut op = Operation::new(
      "op3".into(),
      "web".into(),
      None,
      OperationType::LabelChange,
      None,
    );
    op.set_payload(payload);
    match op.payload() {
      OperationPayload::LabelChange { before: b, after } => {
        assert_eq!(b, before);
        assert!(after.is_empty());
      }
      _ => panic!("expected LabelChange payload"),
    }
  }
}
