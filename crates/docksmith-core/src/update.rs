//! Lifecycle state machine for update, rollback, and drift-fix operations.
//! Each public operation writes an `in_progress` record, spawns the stage
//! runner on its own detached task, and returns the `operation_id`
//! immediately — the work itself never shares a cancellation scope with
//! the caller's request.

use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};

use docksmith_types::{
  Container, ContainerUpdatedPayload, ContainerUpdatedStatus, Event,
  EventPayload, ImageRef, ManagedLabels, Operation, OperationPayload,
  OperationType, Stage, UpdateProgressPayload,
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

const RETRY_DELAYS: [Duration; 3] = [
  Duration::from_millis(250),
  Duration::from_secs(1),
  Duration::from_secs(4),
];

#[derive(Debug, Clone)]
pub struct UpdateConfig {
  pub stop_timeout: Duration,
  pub health_check_timeout: Duration,
  pub health_poll_interval: Duration,
  pub pre_check_timeout: Duration,
}

impl Default for UpdateConfig {
  fn default() -> Self {
    UpdateConfig {
      stop_timeout: Duration::from_secs(60),
      health_check_timeout: Duration::from_secs(30),
      health_poll_interval: Duration::from_secs(1),
      pre_check_timeout: Duration::from_secs(10),
    }
  }
}

/// A single container's place in a batch: its current name, the compose
/// service that resolves to, and the tag it should move to.
#[derive(Debug, Clone)]
struct Target {
  name: String,
  target_tag: Option<String>,
}

pub struct UpdateOrchestrator {
  runtime: Arc<dyn ContainerRuntime>,
  compose: Arc<dyn ComposeFile>,
  store: Arc<dyn OperationStore>,
  bus: Arc<dyn Publisher>,
  compose_locks: Arc<ComposeLocks>,
  config: UpdateConfig,
}

impl UpdateOrchestrator {
  pub fn new(
    runtime: Arc<dyn ContainerRuntime>,
    compose: Arc<dyn ComposeFile>,
    store: Arc<dyn OperationStore>,
    bus: Arc<dyn Publisher>,
    config: UpdateConfig,
  ) -> Arc<Self> {
    Arc::new(UpdateOrchestrator {
      runtime,
      compose,
      store,
      bus,
      compose_locks: Arc::new(ComposeLocks::new()),
      config,
    })
  }

  pub async fn update_single_container(
    self: &Arc<Self>,
    name: &str,
    target_version: Option<String>,
  ) -> Result<String, OpError> {
    self
      .update_single_container_in_group(name, target_version, None, false)
      .await
  }

  pub async fn update_single_container_in_group(
    self: &Arc<Self>,
    name: &str,
    target_version: Option<String>,
    batch_group: Option<String>,
    force: bool,
  ) -> Result<String, OpError> {
    let container = self.find_container(name).await?;
    let op = self.new_operation(
      &container,
      OperationType::Update,
      batch_group,
    );
    let op_id = op.operation_id.clone();
    self.store.save_operation(op.clone()).await?;

    let this = self.clone();
    tokio::spawn(async move {
      this
        .run_update_one(op, vec![Target { name: container.name, target_tag: target_version }], force)
        .await;
    });
    Ok(op_id)
  }

  /// Updates every selected container of one stack as a single compose
  /// operation, per container, in request order (dependency order is
  /// derived from the compose file upstream of this call).
  pub async fn update_batch_containers_in_group(
    self: &Arc<Self>,
    names: Vec<String>,
    mut targets: BTreeMap<String, String>,
    batch_group: Option<String>,
    force: bool,
  ) -> Result<Vec<String>, OpError> {
    let batch_group = batch_group.unwrap_or_else(|| Uuid::new_v4().to_string());
    let containers = self.runtime.list_containers().await.map_err(OpError::from)?;
    let mut by_stack: BTreeMap<Option<String>, Vec<Container>> = BTreeMap::new();
    for container in containers {
      if names.contains(&container.name) {
        by_stack.entry(container.stack.clone()).or_default().push(container);
      }
    }

    let mut op_ids = Vec::with_capacity(by_stack.len());
    for (stack, members) in by_stack {
      let joined_name = members
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(",");
      let representative = Container {
        name: joined_name,
        stack,
        ..members[0].clone()
      };
      let op = self.new_operation(
        &representative,
        OperationType::Update,
        Some(batch_group.clone()),
      );
      let op_id = op.operation_id.clone();
      self.store.save_operation(op.clone()).await?;

      let stage_targets = members
        .iter()
        .map(|c| Target {
          name: c.name.clone(),
          target_tag: targets.remove(&c.name),
        })
        .collect();

      let this = self.clone();
      tokio::spawn(async move {
        this.run_update_one(op, stage_targets, force).await;
      });
      op_ids.push(op_id);
    }
    Ok(op_ids)
  }

  pub async fn fix_compose_mismatch(
    self: &Arc<Self>,
    name: &str,
  ) -> Result<String, OpError> {
    let container = self.find_container(name).await?;
    let op = self.new_operation(
      &container,
      OperationType::FixComposeMismatch,
      None,
    );
    let op_id = op.operation_id.clone();
    self.store.save_operation(op.clone()).await?;

    let this = self.clone();
    tokio::spawn(async move {
      // No target tag: the stage runner resolves it from the compose file.
      this
        .run_update_one(op, vec![Target { name: container.name, target_tag: None }], true)
        .await;
    });
    Ok(op_id)
  }

  pub async fn rollback_operation(
    self: &Arc<Self>,
    op_id: &str,
    force: bool,
  ) -> Result<String, OpError> {
    let original = self.store.get_operation(op_id).await?;
    self
      .rollback_containers(
        op_id,
        std::slice::from_ref(&original.container_name),
        force,
      )
      .await
  }

  pub async fn rollback_containers(
    self: &Arc<Self>,
    op_id: &str,
    names: &[String],
    force: bool,
  ) -> Result<String, OpError> {
    let original = self.store.get_operation(op_id).await?;
    let OperationPayload::Update { from, .. } = original.payload() else {
      return Err(OpError::BadRequest(
        "operation has no update payload to roll back".into(),
      ));
    };

    let all_names: Vec<&str> = original.container_name.split(',').collect();
    let all_tags: Vec<&str> = from.split(',').collect();
    if all_names.len() != all_tags.len() {
      return Err(OpError::Fatal(
        "operation's container list and recorded versions are out of sync".into(),
      ));
    }
    let tag_by_name: BTreeMap<&str, &str> =
      all_names.iter().copied().zip(all_tags.iter().copied()).collect();

    let target_names: Vec<String> = if names.is_empty() {
      all_names.iter().map(|n| n.to_string()).collect()
    } else {
      names.to_vec()
    };

    let container_name = target_names.join(",");
    let mut op = Operation::new(
      Uuid::new_v4().to_string(),
      container_name,
      original.stack_name.clone(),
      OperationType::Rollback,
      original.batch_group_id.clone(),
    );
    op.rollback_occurred = true;
    let op_id_new = op.operation_id.clone();
    self.store.save_operation(op.clone()).await?;

    let mut targets = Vec::with_capacity(target_names.len());
    for name in &target_names {
      let tag = tag_by_name.get(name.as_str()).copied().ok_or_else(|| {
        OpError::BadRequest(format!(
          "container {name} was not part of operation {op_id}"
        ))
      })?;
      targets.push(Target { name: name.clone(), target_tag: Some(tag.to_string()) });
    }

    let this = self.clone();
    tokio::spawn(async move {
      this.run_update_one(op, targets, force).await;
    });
    Ok(op_id_new)
  }

  fn new_operation(
    &self,
    container: &Container,
    op_type: OperationType,
    batch_group: Option<String>,
  ) -> Operation {
    let mut op = Operation::new(
      Uuid::new_v4().to_string(),
      container.name.clone(),
      container.stack.clone(),
      op_type,
      batch_group,
    );
    op.container_id = Some(container.id.clone());
    op
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

  async fn finish_complete(&self, mut op: Operation, payload: OperationPayload) {
    op.set_payload(payload);
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

  /// Runs the full stage sequence for one operation record, covering one or
  /// more containers of the same stack. `force` skips the pre-update check.
  async fn run_update_one(
    &self,
    op: Operation,
    targets: Vec<Target>,
    force: bool,
  ) {
    self.publish(&op, Stage::Validating, "locating containers and compose service");

    let mut resolved = Vec::with_capacity(targets.len());
    for target in &targets {
      match self.resolve_target(target).await {
        Ok(r) => resolved.push(r),
        Err(e) => return self.finish_failed(op, e).await,
      }
    }

    if !force {
      self.publish(&op, Stage::PreCheck, "running pre-update checks");
      for r in &resolved {
        if let Some(check) = &r.labels.pre_update_check
          && let Err(e) =
            run_pre_update_check(check, self.config.pre_check_timeout).await
        {
          return self.finish_failed(op, e).await;
        }
      }
    }

    self.publish(&op, Stage::UpdatingCompose, "rewriting compose file");
    for r in &resolved {
      let guard = self.compose_locks.lock(&r.compose_path).await;
      let result = self
        .compose
        .set_image(&r.compose_path, &r.service_name, &r.new_image)
        .await
        .map_err(OpError::from);
      drop(guard);
      if let Err(e) = result {
        return self.finish_failed(op, e).await;
      }
    }
    for path in resolved.iter().map(|r| r.compose_path.clone()).collect::<std::collections::BTreeSet<_>>() {
      let guard = self.compose_locks.lock(&path).await;
      let result = self.compose.save(&path).await.map_err(OpError::from);
      drop(guard);
      if let Err(e) = result {
        return self.finish_failed(op, e).await;
      }
    }

    self.publish(&op, Stage::PullingImage, "pulling new image");
    for r in &resolved {
      let runtime = self.runtime.clone();
      let image = r.new_image.clone();
      let outcome = retry_with_backoff(|| {
        let runtime = runtime.clone();
        let image = image.clone();
        async move { runtime.pull_image(&image).await.map_err(OpError::from) }
      })
      .await;
      if let Err(e) = outcome {
        return self.finish_failed(op, e).await;
      }
    }

    self.publish(&op, Stage::Stopping, "stopping containers");
    for r in &resolved {
      if let Err(e) = self
        .runtime
        .stop_container(&r.container_id, self.config.stop_timeout)
        .await
        .map_err(OpError::from)
      {
        return self.finish_failed(op, e).await;
      }
    }

    self.publish(&op, Stage::Recreating, "recreating containers");
    let mut recreated = Vec::with_capacity(resolved.len());
    let mut recreate_err = None;
    for r in &resolved {
      match self
        .runtime
        .recreate_container(&r.name, &r.new_image, &r.labels_map)
        .await
      {
        Ok(c) => recreated.push(c),
        Err(e) => {
          recreate_err = Some(OpError::from(e));
          break;
        }
      }
    }

    if let Some(err) = recreate_err {
      self.publish(&op, Stage::RollingBack, "restoring previous image");
      let mut restore_failed = false;
      for r in &resolved {
        if self
          .runtime
          .recreate_container(&r.name, &r.old_image, &r.labels_map)
          .await
          .is_err()
        {
          restore_failed = true;
        }
      }
      let mut op = op;
      op.rollback_occurred = true;
      if restore_failed {
        return self
          .finish_failed(
            op,
            OpError::Fatal(format!(
              "recreate failed ({err}) and restoring the prior image also failed"
            )),
          )
          .await;
      }
      return self.finish_failed(op, err).await;
    }

    self.publish(&op, Stage::Starting, "starting containers");
    for c in &recreated {
      let _ = self.runtime.start_container(&c.id).await;
    }

    self.publish(&op, Stage::HealthCheck, "waiting for healthy/running");
    for c in &recreated {
      if !self.wait_healthy(&c.id).await {
        tracing::warn!(
          container = %c.name,
          "health check timed out; container left running"
        );
      }
    }

    let from = resolved
      .iter()
      .map(|r| r.old_image.tag.clone().unwrap_or_default())
      .collect::<Vec<_>>()
      .join(",");
    let to = resolved
      .iter()
      .map(|r| r.new_image.tag.clone().unwrap_or_default())
      .collect::<Vec<_>>()
      .join(",");
    self
      .finish_complete(op, OperationPayload::Update { from, to })
      .await;
  }

  async fn resolve_target(&self, target: &Target) -> Result<ResolvedTarget, OpError> {
    let container = self.find_container(&target.name).await?;
    let labels = ManagedLabels::parse(&container.labels)
      .map_err(|e| OpError::Fatal(format!("invalid managed labels: {e}")))?;

    let config_files = container
      .labels
      .get(COMPOSE_CONFIG_FILES_LABEL)
      .ok_or_else(|| {
        OpError::BadRequest(format!(
          "container {} is not managed by a compose file",
          container.name
        ))
      })?;
    let compose_path = config_files.split(',').next().unwrap_or(config_files).to_string();

    let service = self
      .compose
      .find_service_by_container_name(&compose_path, &container.name)
      .await
      .map_err(OpError::from)?;

    let old_image = container.image_ref.clone();
    let new_image = match &target.target_tag {
      Some(tag) => ImageRef { tag: Some(tag.clone()), ..old_image.clone() },
      None => service.image.clone(),
    };

    Ok(ResolvedTarget {
      name: container.name,
      container_id: container.id,
      compose_path,
      service_name: service.name,
      labels,
      labels_map: container.labels,
      old_image,
      new_image,
    })
  }

  async fn wait_healthy(&self, container_id: &str) -> bool {
    let deadline = tokio::time::Instant::now() + self.config.health_check_timeout;
    loop {
      if let Ok(c) = self.runtime.inspect_container(container_id).await {
        use docksmith_types::{ContainerHealth, ContainerState};
        match c.health {
          ContainerHealth::Healthy => return true,
          ContainerHealth::None if c.state == ContainerState::Running => {
            return true;
          }
          _ => {}
        }
      }
      if tokio::time::Instant::now() >= deadline {
        return false;
      }
      tokio::time::sleep(self.config.health_poll_interval).await;
    }
  }
}

struct ResolvedTarget {
  name: String,
  container_id: String,
  compose_path: String,
  service_name: String,
  labels: ManagedLabels,
  labels_map: BTreeMap<String, String>,
  old_image: ImageRef,
  new_image: ImageRef,
}

/// Retries a transient failure up to three times with the fixed backoff
/// sequence, giving up (returning the last error) on any non-transient
/// failure or once the sequence is exhausted.
async fn retry_with_backoff<F, Fut, T>(mut f: F) -> Result<T, OpError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, OpError>>,
{
  let mut attempt = 0;
  loop {
    match f().await {
      Ok(v) => return Ok(v),
      Err(e) if e.is_transient() && attempt < RETRY_DELAYS.len() => {
        tokio::time::sleep(RETRY_DELAYS[attempt]).await;
        attempt += 1;
      }
      Err(e) => return Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ports::{ComposeService, InMemoryOperationStore};
  use crate::{bus::EventBus, error::PortError};
  use async_trait::async_trait;
  use docksmith_types::{ContainerHealth, ContainerState, OperationStatus};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tokio::sync::Mutex;

  struct FakeRuntime {
    containers: Mutex<Vec<Container>>,
    recreate_calls: AtomicUsize,
    fail_recreate_for: Option<String>,
  }

  #[async_trait]
  impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<Container>, PortError> {
      Ok(self.containers.lock().await.clone())
    }
    async fn inspect_container(
      &self,
      id: &str,
    ) -> Result<Container, PortError> {
      self
        .containers
        .lock()
        .await
        .iter()
        .find(|c| c.id == id)
        .cloned()
        .ok_or_else(|| PortError::NotFound(id.to_string()))
    }
    async fn start_container(&self, _id: &str) -> Result<(), PortError> {
      Ok(())
    }
    async fn stop_container(
      &self,
      _id: &str,
      _timeout: Duration,
    ) -> Result<(), PortError> {
      Ok(())
    }
    async fn restart_container(
      &self,
      _id: &str,
      _timeout: Duration,
    ) -> Result<(), PortError> {
      Ok(())
    }
    async fn remove_container(
      &self,
      _id: &str,
      _force: bool,
    ) -> Result<(), PortError> {
      Ok(())
    }
    async fn pull_image(&self, _image_ref: &ImageRef) -> Result<(), PortError> {
      Ok(())
    }
    async fn recreate_container(
      &self,
      name: &str,
      image_ref: &ImageRef,
      labels: &BTreeMap<String, String>,
    ) -> Result<Container, PortError> {
      self.recreate_calls.fetch_add(1, Ordering::SeqCst);
      if self.fail_recreate_for.as_deref() == Some(name) {
        return Err(PortError::Backend("engine unavailable".into()));
      }
      let mut containers = self.containers.lock().await;
      if let Some(c) = containers.iter_mut().find(|c| c.name == name) {
        c.image_ref = image_ref.clone();
        c.labels = labels.clone();
        c.state = ContainerState::Running;
        c.health = ContainerHealth::None;
        return Ok(c.clone());
      }
      Err(PortError::NotFound(name.to_string()))
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
    async fn set_label(
      &self,
      _path: &str,
      _service: &str,
      _key: &str,
      _value: &str,
    ) -> Result<(), PortError> {
      Ok(())
    }
    async fn remove_label(
      &self,
      _path: &str,
      _service: &str,
      _key: &str,
    ) -> Result<(), PortError> {
      Ok(())
    }
    async fn set_image(
      &self,
      _path: &str,
      _service: &str,
      _image_ref: &ImageRef,
    ) -> Result<(), PortError> {
      Ok(())
    }
    async fn save(&self, _path: &str) -> Result<(), PortError> {
      Ok(())
    }
  }

  fn web_container() -> Container {
    let mut labels = BTreeMap::new();
    labels.insert(
      COMPOSE_CONFIG_FILES_LABEL.to_string(),
      "/srv/compose.yml".to_string(),
    );
    Container {
      id: "c-web".into(),
      name: "web".into(),
      stack: Some("s1".into()),
      image_ref: ImageRef::parse("nginx:1.24.0"),
      labels,
      state: ContainerState::Running,
      health: ContainerHealth::None,
    }
  }

  fn orchestrator(
    fail_recreate_for: Option<String>,
  ) -> (Arc<UpdateOrchestrator>, Arc<InMemoryOperationStore>) {
    let runtime = Arc::new(FakeRuntime {
      containers: Mutex::new(vec![web_container()]),
      recreate_calls: AtomicUsize::new(0),
      fail_recreate_for,
    });
    let store = Arc::new(InMemoryOperationStore::new());
    let orchestrator = UpdateOrchestrator::new(
      runtime,
      Arc::new(FakeCompose),
      store.clone(),
      Arc::new(EventBus::default()),
      UpdateConfig {
        health_check_timeout: Duration::from_millis(20),
        health_poll_interval: Duration::from_millis(5),
        ..Default::default()
      },
    );
    (orchestrator, store)
  }

  #[tokio::test]
  async fn update_single_container_completes_and_records_versions() {
    let (orchestrator, store) = orchestrator(None);
    let op_id = orchestrator
      .update_single_container("web", Some("1.25.0".to_string()))
      .await
      .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let op = store.get_operation(&op_id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Complete);
    assert_eq!(op.old_version, "1.24.0");
    assert_eq!(op.new_version, "1.25.0");
  }

  #[tokio::test]
  async fn pre_check_failure_blocks_without_mutating_runtime() {
    let runtime = Arc::new(FakeRuntime {
      containers: Mutex::new(vec![{
        let mut c = web_container();
        c.labels.insert(
          docksmith_types::labels::PRE_UPDATE_CHECK.to_string(),
          "/bin/false".to_string(),
        );
        c
      }]),
      recreate_calls: AtomicUsize::new(0),
      fail_recreate_for: None,
    });
    let store = Arc::new(InMemoryOperationStore::new());
    let orchestrator = UpdateOrchestrator::new(
      runtime.clone(),
      Arc::new(FakeCompose),
      store.clone(),
      Arc::new(EventBus::default()),
      UpdateConfig::default(),
    );

    let op_id = orchestrator
      .update_single_container("web", Some("1.25.0".to_string()))
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let op = store.get_operation(&op_id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
    assert!(op.error_message.unwrap().contains("pre-update check"));
    assert_eq!(runtime.recreate_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn rollback_restores_the_bare_old_tag_not_a_malformed_reference() {
    let (orchestrator, store) = orchestrator(None);
    let op_id = orchestrator
      .update_single_container("web", Some("1.25.0".to_string()))
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let op = store.get_operation(&op_id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Complete);

    let rollback_id =
      orchestrator.rollback_operation(&op_id, false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let rollback_op = store.get_operation(&rollback_id).await.unwrap();
    assert_eq!(rollback_op.status, OperationStatus::Complete);
    assert_eq!(rollback_op.new_version, "1.24.0");
  }

  #[tokio::test]
  async fn failed_recreate_rolls_back_and_marks_operation_failed() {
    let (orchestrator, store) = orchestrator(Some("web".to_string()));
    let op_id = orchestrator
      .update_single_container("web", Some("1.25.0".to_string()))
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let op = store.get_operation(&op_id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
    assert!(op.rollback_occurred);
  }

  #[tokio::test]
  async fn batch_update_produces_one_operation_per_stack() {
    let mut s1a = web_container();
    s1a.name = "a".into();
    s1a.stack = Some("s1".into());
    let mut s1b = web_container();
    s1b.name = "b".into();
    s1b.stack = Some("s1".into());
    let mut s2c = web_container();
    s2c.name = "c".into();
    s2c.stack = Some("s2".into());

    let runtime = Arc::new(FakeRuntime {
      containers: Mutex::new(vec![s1a, s1b, s2c]),
      recreate_calls: AtomicUsize::new(0),
      fail_recreate_for: None,
    });
    let store = Arc::new(InMemoryOperationStore::new());
    let orchestrator = UpdateOrchestrator::new(
      runtime,
      Arc::new(FakeCompose),
      store.clone(),
      Arc::new(EventBus::default()),
      UpdateConfig::default(),
    );

    let mut targets = BTreeMap::new();
    targets.insert("a".to_string(), "1.25.0".to_string());
    targets.insert("b".to_string(), "1.25.0".to_string());
    targets.insert("c".to_string(), "1.25.0".to_string());

    let op_ids = orchestrator
      .update_batch_containers_in_group(
        vec!["a".into(), "b".into(), "c".into()],
        targets,
        None,
        false,
      )
      .await
      .unwrap();
    assert_eq!(op_ids.len(), 2);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let group_id = store
      .get_operation(&op_ids[0])
      .await
      .unwrap()
      .batch_group_id
      .unwrap();
    let s1_op = store
      .list_by_batch_group(&group_id)
      .await
      .unwrap()
      .into_iter()
      .find(|o| o.container_name.contains('a'))
      .unwrap();
    assert!(s1_op.container_name.contains('a') && s1_op.container_name.contains('b'));
  }
}
