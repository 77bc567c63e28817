//! The label-change operation: atomically rewrites a container's managed
//! labels in its compose file and recreates it, tracked the same way an
//! update is.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use docksmith_types::{
  Container, ContainerUpdatedPayload, ContainerUpdatedStatus, Event,
  EventPayload, LabelAssignment, ManagedLabels, Operation, OperationPayload,
  OperationType, Stage, UpdateProgressPayload, labels::ALL_KEYS,
};
use uuid::Uuid;

use crate::{
  bus::Publisher,
  compose_lock::ComposeLocks,
  error::OpError,
  ports::{ComposeFile, ContainerRuntime, OperationStore},
  precheck::run_pre_update_check,
};

const COMPOSE_CONFIG_FILES_LABEL: &str =
  "com.docker.compose.project.config_files";

pub struct LabelTransaction {
  runtime: Arc<dyn ContainerRuntime>,
  compose: Arc<dyn ComposeFile>,
  store: Arc<dyn OperationStore>,
  bus: Arc<dyn Publisher>,
  compose_locks: Arc<ComposeLocks>,
  pre_check_timeout: Duration,
}

impl LabelTransaction {
  pub fn new(
    runtime: Arc<dyn ContainerRuntime>,
    compose: Arc<dyn ComposeFile>,
    store: Arc<dyn OperationStore>,
    bus: Arc<dyn Publisher>,
    pre_check_timeout: Duration,
  ) -> Arc<Self> {
    Arc::new(LabelTransaction {
      runtime,
      compose,
      store,
      bus,
      compose_locks: Arc::new(ComposeLocks::new()),
      pre_check_timeout,
    })
  }

  pub async fn set_labels(
    self: &Arc<Self>,
    name: &str,
    assignments: Vec<LabelAssignment>,
    no_restart: bool,
    force: bool,
  ) -> Result<String, OpError> {
    let container = self.find_container(name).await?;
    let mut op = Operation::new(
      Uuid::new_v4().to_string(),
      container.name.clone(),
      container.stack.clone(),
      OperationType::LabelChange,
      None,
    );
    op.container_id = Some(container.id.clone());
    let op_id = op.operation_id.clone();
    self.store.save_operation(op.clone()).await?;

    let this = self.clone();
    tokio::spawn(async move {
      this.run(op, container, assignments, no_restart, force).await;
    });
    Ok(op_id)
  }

  /// Restores the managed labels to their state before `op_id`, by
  /// inverting the recorded before/after maps. Covers every managed key,
  /// not only the ones explicitly touched by the original change.
  pub async fn rollback(
    self: &Arc<Self>,
    op_id: &str,
    force: bool,
  ) -> Result<String, OpError> {
    let original = self.store.get_operation(op_id).await?;
    let OperationPayload::LabelChange { before, after } = original.payload()
    else {
      return Err(OpError::BadRequest(
        "operation has no label-change payload to roll back".into(),
      ));
    };

    let inverse: Vec<LabelAssignment> = ALL_KEYS
      .iter()
      .filter(|key| before.get(**key) != after.get(**key))
      .map(|key| LabelAssignment {
        key: key.to_string(),
        value: before.get(*key).cloned(),
      })
      .collect();

    let container = self.find_container(&original.container_name).await?;
    let mut op = Operation::new(
      Uuid::new_v4().to_string(),
      container.name.clone(),
      container.stack.clone(),
      OperationType::LabelChange,
      original.batch_group_id.clone(),
    );
    op.container_id = Some(container.id.clone());
    op.rollback_occurred = true;
    let op_id_new = op.operation_id.clone();
    self.store.save_operation(op.clone()).await?;

    let this = self.clone();
    tokio::spawn(async move {
      this.run(op, container, inverse, false, force).await;
    });
    Ok(op_id_new)
  }

  async fn find_container(&self, name: &str) -> Result<Container, OpError> {
    self
      .runtime
      .list_containers()
      .await
      .map_err(OpError::from)?
      .into_iter()
      .find(|c| c.name == name)
      .ok_or_else(|| OpError::NotFound(format!("container {name} not found")))
  }

  fn publish(&self, op: &Operation, stage: Stage, message: impl Into<String>) {
    self.bus.publish(Event::new(EventPayload::UpdateProgress(
      UpdateProgressPayload {
        operation_id: op.operation_id.clone(),
        container_name: op.container_name.clone(),
        stack_name: op.stack_name.clone(),
        stage,
        progress: stage.progress_percent(),
        message: message.into(),
        timestamp: chrono::Utc::now(),
      },
    )));
  }

  async fn finish_failed(&self, mut op: Operation, error: OpError) {
    self.publish(&op, Stage::Failed, error.to_string());
    op.fail(error.to_string());
    let _ = self.store.save_operation(op.clone()).await;
    self.bus.publish(Event::new(EventPayload::ContainerUpdated(
      ContainerUpdatedPayload {
        container_id: op.container_id.clone(),
        container_name: op.container_name.clone(),
        operation_id: Some(op.operation_id.clone()),
        status: ContainerUpdatedStatus::Failed,
      },
    )));
  }

  async fn run(
    &self,
    op: Operation,
    container: Container,
    assignments: Vec<LabelAssignment>,
    no_restart: bool,
    force: bool,
  ) {
    self.publish(&op, Stage::Validating, "snapshotting managed labels");
    let before = match ManagedLabels::parse(&container.labels) {
      Ok(m) => m.to_map(),
      Err(e) => {
        return self
          .finish_failed(op, OpError::Fatal(format!("invalid managed labels: {e}")))
          .await;
      }
    };

    if !no_restart && !force {
      self.publish(&op, Stage::PreCheck, "running pre-update check");
      if let Ok(managed) = ManagedLabels::parse(&container.labels)
        && let Some(check) = &managed.pre_update_check
        && let Err(e) = run_pre_update_check(check, self.pre_check_timeout).await
      {
        return self.finish_failed(op, e).await;
      }
    }

    let Some(config_files) = container.labels.get(COMPOSE_CONFIG_FILES_LABEL)
    else {
      return self
        .finish_failed(
          op,
          OpError::BadRequest(format!(
            "container {} is not managed by a compose file",
            container.name
          )),
        )
        .await;
    };
    let compose_path =
      config_files.split(',').next().unwrap_or(config_files).to_string();

    self.publish(&op, Stage::UpdatingCompose, "rewriting compose labels");
    let service = match self
      .compose
      .find_service_by_container_name(&compose_path, &container.name)
      .await
    {
      Ok(s) => s,
      Err(e) => return self.finish_failed(op, OpError::from(e)).await,
    };

    let new_labels = apply_assignments(container.labels.clone(), &assignments);
    let after = match ManagedLabels::parse(&new_labels) {
      Ok(m) => m.to_map(),
      Err(e) => {
        return self
          .finish_failed(op, OpError::BadRequest(format!("invalid label value: {e}")))
          .await;
      }
    };
    if let Some(re) = &after.get(docksmith_types::labels::TAG_REGEX)
      && let Err(e) = regex::Regex::new(re)
    {
      return self
        .finish_failed(op, OpError::BadRequest(format!("invalid tag-regex: {e}")))
        .await;
    }

    let guard = self.compose_locks.lock(&compose_path).await;
    let write_result: Result<(), OpError> = async {
      for key in ALL_KEYS {
        match (before.get(*key), after.get(*key)) {
          (old, new) if old == new => {}
          (_, Some(value)) => {
            self
              .compose
              .set_label(&compose_path, &service.name, key, value)
              .await
              .map_err(OpError::from)?;
          }
          (Some(_), None) => {
            self
              .compose
              .remove_label(&compose_path, &service.name, key)
              .await
              .map_err(OpError::from)?;
          }
          (None, None) => {}
        }
      }
      self.compose.save(&compose_path).await.map_err(OpError::from)
    }
    .await;
    drop(guard);
    if let Err(e) = write_result {
      return self.finish_failed(op, e).await;
    }

    if !no_restart {
      self.publish(&op, Stage::Recreating, "recreating container");
      if let Err(e) = self
        .runtime
        .recreate_container(&container.name, &container.image_ref, &new_labels)
        .await
      {
        return self.finish_failed(op, OpError::from(e)).await;
      }
      self.publish(&op, Stage::Starting, "starting container");
    }

    let mut op = op;
    op.set_payload(OperationPayload::LabelChange { before, after });
    self.publish(&op, Stage::Complete, "complete");
    op.complete();
    let _ = self.store.save_operation(op.clone()).await;
    self.bus.publish(Event::new(EventPayload::ContainerUpdated(
      ContainerUpdatedPayload {
        container_id: op.container_id.clone(),
        container_name: op.container_name.clone(),
        operation_id: Some(op.operation_id.clone()),
        status: ContainerUpdatedStatus::Updated,
      },
    )));
  }
}

/// Overlays assignments onto a container's full label map. `None` or an
/// empty string resets the key to unset; `"false"` does the same for the
/// boolean-valued managed keys, matching the "default value == removed"
/// rule.
fn apply_assignments(
  mut labels: BTreeMap<String, String>,
  assignments: &[LabelAssignment],
) -> BTreeMap<String, String> {
  use docksmith_types::labels::{ALLOW_LATEST, ALLOW_PRERELEASE, IGNORE};
  let bool_keys = [IGNORE, ALLOW_LATEST, ALLOW_PRERELEASE];
  for a in assignments {
    match &a.value {
      None => {
        labels.remove(&a.key);
      }
      Some(v) if v.is_empty() => {
        labels.remove(&a.key);
      }
      Some(v)
        if v == "false" && bool_keys.contains(&a.key.as_str()) =>
      {
        labels.remove(&a.key);
      }
      Some(v) => {
        labels.insert(a.key.clone(), v.clone());
      }
    }
  }
  labels
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{bus::EventBus, error::PortError, ports::{ComposeService, InMemoryOperationStore}};
  use async_trait::async_trait;
  use docksmith_types::{ContainerHealth, ContainerState, ImageRef, OperationStatus, labels};
  use tokio::sync::Mutex;

  struct FakeRuntime {
    container: Mutex<Container>,
  }

  #[async_trait]
  impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<Container>, PortError> {
      Ok(vec![self.container.lock().await.clone()])
    }
    async fn inspect_container(&self, _id: &str) -> Result<Container, PortError> {
      Ok(self.container.lock().await.clone())
    }
    async fn start_container(&self, _id: &str) -> Result<(), PortError> {
      Ok(())
    }
    async fn stop_container(&self, _id: &str, _timeout: Duration) -> Result<(), PortError> {
      Ok(())
    }
    async fn restart_container(&self, _id: &str, _timeout: Duration) -> Result<(), PortError> {
      Ok(())
    }
    async fn remove_container(&self, _id: &str, _force: bool) -> Result<(), PortError> {
      Ok(())
    }
    async fn pull_image(&self, _image_ref: &ImageRef) -> Result<(), PortError> {
      Ok(())
    }
    async fn recreate_container(
      &self,
      _name: &str,
      image_ref: &ImageRef,
      labels: &BTreeMap<String, String>,
    ) -> Result<Container, PortError> {
      let mut c = self.container.lock().await;
      c.image_ref = image_ref.clone();
      c.labels = labels.clone();
      Ok(c.clone())
    }
  }

  struct FakeCompose;
  #[async_trait]
  impl ComposeFile for FakeCompose {
    async fn load(&self, _path: &str) -> Result<(), PortError> {
      Ok(())
    }
    async fn find_service_by_container_name(
      &self,
      _path: &str,
      container_name: &str,
    ) -> Result<ComposeService, PortError> {
      Ok(ComposeService {
        name: container_name.to_string(),
        image: ImageRef::parse("nginx:1.24.0"),
        labels: BTreeMap::new(),
      })
    }
    async fn set_label(&self, _path: &str, _service: &str, _key: &str, _value: &str) -> Result<(), PortError> {
      Ok(())
    }
    async fn remove_label(&self, _path: &str, _service: &str, _key: &str) -> Result<(), PortError> {
      Ok(())
    }
    async fn set_image(&self, _path: &str, _service: &str, _image_ref: &ImageRef) -> Result<(), PortError> {
      Ok(())
    }
    async fn save(&self, _path: &str) -> Result<(), PortError> {
      Ok(())
    }
  }

  fn web_container() -> Container {
    let mut map = BTreeMap::new();
    map.insert(COMPOSE_CONFIG_FILES_LABEL.to_string(), "/srv/compose.yml".to_string());
    map.insert(labels::IGNORE.to_string(), "true".to_string());
    Container {
      id: "c-web".into(),
      name: "web".into(),
      stack: Some("s1".into()),
      image_ref: ImageRef::parse("nginx:1.24.0"),
      labels: map,
      state: ContainerState::Running,
      health: ContainerHealth::None,
    }
  }

  fn transaction() -> (Arc<LabelTransaction>, Arc<InMemoryOperationStore>) {
    let runtime = Arc::new(FakeRuntime { container: Mutex::new(web_container()) });
    let store = Arc::new(InMemoryOperationStore::new());
    let txn = LabelTransaction::new(
      runtime,
      Arc::new(FakeCompose),
      store.clone(),
      Arc::new(EventBus::default()),
      Duration::from_secs(5),
    );
    (txn, store)
  }

  #[tokio::test]
  async fn label_change_then_rollback_restores_original_labels() {
    let (txn, store) = transaction();

    let op_id = txn
      .set_labels(
        "web",
        vec![
          LabelAssignment { key: labels::IGNORE.to_string(), value: Some("false".to_string()) },
          LabelAssignment { key: labels::ALLOW_LATEST.to_string(), value: Some("true".to_string()) },
        ],
        false,
        true,
      )
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let op = store.get_operation(&op_id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Complete);

    let rollback_id = txn.rollback(&op_id, true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let rollback_op = store.get_operation(&rollback_id).await.unwrap();
    assert_eq!(rollback_op.status, OperationStatus::Complete);
    assert!(rollback_op.rollback_occurred);

    if let OperationPayload::LabelChange { after, .. } = rollback_op.payload() {
      assert_eq!(after.get(labels::IGNORE).map(String::as_str), Some("true"));
      assert!(!after.contains_key(labels::ALLOW_LATEST));
    } else {
      panic!("expected label-change payload");
    }
  }

  #[test]
  fn apply_assignments_resets_boolean_default_to_unset() {
    let mut base = BTreeMap::new();
    base.insert(labels::IGNORE.to_string(), "true".to_string());
    let result = apply_assignments(
      base,
      &[LabelAssignment { key: labels::IGNORE.to_string(), value: Some("false".to_string()) }],
    );
    assert!(!result.contains_key(labels::IGNORE));
  }
}
