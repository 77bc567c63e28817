//! The external collaborators this crate consumes. Each is a narrow
//! async trait; the core depends only on these contracts, never on a
//! concrete storage or runtime mechanism.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use docksmith_types::{Container, ImageRef, Operation, OperationStatus};

use crate::error::PortError;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
  async fn list_containers(&self) -> Result<Vec<Container>, PortError>;
  async fn inspect_container(
    &self,
    id: &str,
  ) -> Result<Container, PortError>;
  async fn start_container(&self, id: &str) -> Result<(), PortError>;
  async fn stop_container(
    &self,
    id: &str,
    timeout: Duration,
  ) -> Result<(), PortError>;
  async fn restart_container(
    &self,
    id: &str,
    timeout: Duration,
  ) -> Result<(), PortError>;
  async fn remove_container(
    &self,
    id: &str,
    force: bool,
  ) -> Result<(), PortError>;
  async fn pull_image(&self, image_ref: &ImageRef) -> Result<(), PortError>;
  /// Recreate `name` from the compose-resolved image and labels, replacing
  /// whatever container currently holds that name.
  async fn recreate_container(
    &self,
    name: &str,
    image_ref: &ImageRef,
    labels: &BTreeMap<String, String>,
  ) -> Result<Container, PortError>;
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
  async fn list_tags(
    &self,
    image_ref: &ImageRef,
  ) -> Result<Vec<String>, PortError>;
  async fn resolve_manifest(
    &self,
    image_ref: &ImageRef,
    tag: &str,
  ) -> Result<String, PortError>;
}

/// A single compose service's identity, enough for the label transaction
/// and update orchestrator to locate and rewrite it.
#[derive(Debug, Clone)]
pub struct ComposeService {
  pub name: String,
  pub image: ImageRef,
  pub labels: BTreeMap<String, String>,
}

#[async_trait]
pub trait ComposeFile: Send + Sync {
  /// Load the compose file at `path` and return the parsed document handle
  /// implementations key their own edits against (an opaque path string
  /// here, since compose YAML parsing itself is out of scope).
  async fn load(&self, path: &str) -> Result<(), PortError>;
  async fn find_service_by_container_name(
    &self,
    path: &str,
    container_name: &str,
  ) -> Result<ComposeService, PortError>;
  async fn set_label(
    &self,
    path: &str,
    service: &str,
    key: &str,
    value: &str,
  ) -> Result<(), PortError>;
  async fn remove_label(
    &self,
    path: &str,
    service: &str,
    key: &str,
  ) -> Result<(), PortError>;
  /// Rewrite the service's image reference, the compose-file side of an
  /// update or a drift fix.
  async fn set_image(
    &self,
    path: &str,
    service: &str,
    image_ref: &ImageRef,
  ) -> Result<(), PortError>;
  async fn save(&self, path: &str) -> Result<(), PortError>;
}

#[async_trait]
pub trait OperationStore: Send + Sync {
  async fn save_operation(&self, op: Operation) -> Result<(), PortError>;
  async fn update_operation_status(
    &self,
    operation_id: &str,
    status: OperationStatus,
    error: Option<String>,
  ) -> Result<(), PortError>;
  async fn get_operation(
    &self,
    operation_id: &str,
  ) -> Result<Operation, PortError>;
  async fn list_by_batch_group(
    &self,
    batch_group_id: &str,
  ) -> Result<Vec<Operation>, PortError>;
  async fn list_by_container(
    &self,
    container_name: &str,
    limit: usize,
  ) -> Result<Vec<Operation>, PortError>;
  /// Most recent operations across every container, newest first — backs
  /// `GET /operations` and `GET /history`.
  async fn list_all(&self, limit: usize) -> Result<Vec<Operation>, PortError>;
}

/// Reference in-memory implementation of the `OperationStore` contract,
/// used by the binary and by tests. A production deployment would back
/// this with persistent storage instead.
#[derive(Default, Clone)]
pub struct InMemoryOperationStore {
  operations: std::sync::Arc<dashmap::DashMap<String, Operation>>,
}

impl InMemoryOperationStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl OperationStore for InMemoryOperationStore {
  async fn save_operation(&self, op: Operation) -> Result<(), PortError> {
    // Upsert by operation_id, but never let a later write move a
    // terminal state back to in_progress.
    if let Some(existing) = self.operations.get(&op.operation_id)
      && existing.status != OperationStatus::InProgress
      && op.status == OperationStatus::InProgress
    {
      return Ok(());
    }
    self.operations.insert(op.operation_id.clone(), op);
    Ok(())
  }

  async fn update_operation_status(
    &self,
    operation_id: &str,
    status: OperationStatus,
    error: Option<String>,
  ) -> Result<(), PortError> {
    let mut op = self
      .operations
      .get_mut(operation_id)
      .ok_or_else(|| PortError::NotFound(operation_id.to_string()))?;
    if op.status != OperationStatus::InProgress {
      return Ok(());
    }
    match status {
      OperationStatus::Complete => op.complete(),
      OperationStatus::Failed => {
        op.fail(error.unwrap_or_else(|| "unknown error".to_string()))
      }
      OperationStatus::InProgress => {
        op.updated_at = chrono::Utc::now();
      }
    }
    Ok(())
  }

  async fn get_operation(
    &self,
    operation_id: &str,
  ) -> Result<Operation, PortError> {
    self
      .operations
      .get(operation_id)
      .map(|o| o.clone())
      .ok_or_else(|| PortError::NotFound(operation_id.to_string()))
  }

  async fn list_by_batch_group(
    &self,
    batch_group_id: &str,
  ) -> Result<Vec<Operation>, PortError> {
    Ok(
      self
        .operations
        .iter()
        .filter(|e| {
          e.value().batch_group_id.as_deref() == Some(batch_group_id)
        })
        .map(|e| e.value().clone())
        .collect(),
    )
  }

  async fn list_by_container(
    &self,
    container_name: &str,
    limit: usize,
  ) -> Result<Vec<Operation>, PortError> {
    let mut ops: Vec<Operation> = self
      .operations
      .iter()
      .filter(|e| e.value().container_name == container_name)
      .map(|e| e.value().clone())
      .collect();
    ops.sort_by_key(|o| std::cmp::Reverse(o.created_at));
    ops.truncate(limit);
    Ok(ops)
  }

  async fn list_all(&self, limit: usize) -> Result<Vec<Operation>, PortError> {
    let mut ops: Vec<Operation> =
      self.operations.iter().map(|e| e.value().clone()).collect();
    ops.sort_by_key(|o| std::cmp::Reverse(o.created_at));
    ops.truncate(limit);
    Ok(ops)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use docksmith_types::OperationType;

  #[tokio::test]
  async fn save_operation_never_reverts_a_terminal_status() {
    let store = InMemoryOperationStore::new();
    let mut op = Operation::new(
      "op1".into(),
      "web".into(),
      None,
      OperationType::Update,
      None,
    );
    store.save_operation(op.clone()).await.unwrap();
    op.complete();
    store.save_operation(op.clone()).await.unwrap();

    // A stale in-progress write (e.g. a retried upsert) must not revert.
    let mut stale = op.clone();
    stale.status = OperationStatus::InProgress;
    stale.completed_at = None;
    store.save_operation(stale).await.unwrap();

    let fetched = store.get_operation("op1").await.unwrap();
    assert_eq!(fetched.status, OperationStatus::Complete);
  }
}
