//! Restarts a container plus its one-hop dependents (the `restart-after`
//! label), fanning pre-checks in before touching anything and collecting
//! a per-dependent error report.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use docksmith_types::{
  Container, ContainerHealth, ContainerState, ContainerUpdatedPayload,
  ContainerUpdatedStatus, Event, EventPayload, ManagedLabels, Operation,
  OperationType, Stage, UpdateProgressPayload,
};
use uuid::Uuid;

use crate::{
  bus::Publisher,
  error::OpError,
  ports::{ContainerRuntime, OperationStore},
  precheck::run_pre_update_check,
};

#[derive(Debug, Clone)]
pub struct RestartConfig {
  pub container_timeout: Duration,
  pub stack_timeout: Duration,
  pub health_check_timeout: Duration,
  pub health_poll_interval: Duration,
  pub pre_check_timeout: Duration,
}

impl Default for RestartConfig {
  fn default() -> Self {
    RestartConfig {
      container_timeout: Duration::from_secs(60),
      stack_timeout: Duration::from_secs(120),
      health_check_timeout: Duration::from_secs(30),
      health_poll_interval: Duration::from_secs(1),
      pre_check_timeout: Duration::from_secs(10),
    }
  }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RestartReport {
  pub target: String,
  pub dependents_restarted: Vec<String>,
  pub errors: BTreeMap<String, String>,
}

pub struct RestartCoordinator {
  runtime: Arc<dyn ContainerRuntime>,
  store: Arc<dyn OperationStore>,
  bus: Arc<dyn Publisher>,
  config: RestartConfig,
}

impl RestartCoordinator {
  pub fn new(
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn OperationStore>,
    bus: Arc<dyn Publisher>,
    config: RestartConfig,
  ) -> Arc<Self> {
    Arc::new(RestartCoordinator { runtime, store, bus, config })
  }

  pub async fn restart_single_container(
    &self,
    name: &str,
    force: bool,
  ) -> Result<RestartReport, OpError> {
    let containers = self.runtime.list_containers().await.map_err(OpError::from)?;
    let target = containers
      .iter()
      .find(|c| c.name == name)
      .cloned()
      .ok_or_else(|| OpError::NotFound(format!("container {name} not found")))?;

    let dependents: Vec<Container> = containers
      .iter()
      .filter(|c| c.name != target.name)
      .filter(|c| {
        ManagedLabels::parse(&c.labels)
          .map(|l| l.restart_after.iter().any(|dep| dep == &target.name))
          .unwrap_or(false)
      })
      .cloned()
      .collect();

    let op = Operation::new(
      Uuid::new_v4().to_string(),
      target.name.clone(),
      target.stack.clone(),
      OperationType::Restart,
      None,
    );
    let op_id = op.operation_id.clone();
    self.store.save_operation(op.clone()).await?;

    self.publish(&op, Stage::PreCheck, "running pre-update checks");
    let mut failed_checks = Vec::new();
    for c in std::iter::once(&target).chain(dependents.iter()) {
      if let Ok(labels) = ManagedLabels::parse(&c.labels)
        && let Some(check) = &labels.pre_update_check
        && run_pre_update_check(check, self.config.pre_check_timeout).await.is_err()
      {
        failed_checks.push(c.name.clone());
      }
    }
    if !failed_checks.is_empty() && !force {
      let mut op = op;
      self
        .fail(&mut op, format!("pre-update check failed for: {}", failed_checks.join(", ")))
        .await;
      return Err(OpError::PreCheckFailed(failed_checks.join(", ")));
    }

    self.publish(&op, Stage::Stopping, "restarting target");
    if let Err(e) = self
      .runtime
      .restart_container(&target.id, self.config.container_timeout)
      .await
    {
      let mut op = op;
      self.fail(&mut op, e.to_string()).await;
      return Err(e.into());
    }
    if !self.wait_healthy(&target.id).await {
      tracing::warn!(container = %target.name, "restart health check timed out");
    }

    self.publish(&op, Stage::Recreating, "restarting dependents");
    let mut restarted = Vec::new();
    let mut errors = BTreeMap::new();
    for dep in &dependents {
      match self
        .runtime
        .restart_container(&dep.id, self.config.container_timeout)
        .await
      {
        Ok(()) => {
          if !self.wait_healthy(&dep.id).await {
            tracing::warn!(container = %dep.name, "dependent health check timed out");
          }
          restarted.push(dep.name.clone());
        }
        Err(e) => {
          errors.insert(dep.name.clone(), e.to_string());
        }
      }
    }

    let mut op = op;
    self.publish(&op, Stage::Complete, "complete");
    op.complete();
    let _ = self.store.save_operation(op.clone()).await;
    self.bus.publish(Event::new(EventPayload::ContainerUpdated(
      ContainerUpdatedPayload {
        container_id: Some(target.id.clone()),
        container_name: target.name.clone(),
        operation_id: Some(op_id),
        status: ContainerUpdatedStatus::Updated,
      },
    )));

    Ok(RestartReport { target: target.name, dependents_restarted: restarted, errors })
  }

  pub async fn restart_stack(
    &self,
    stack: &str,
    names: &[String],
    force: bool,
  ) -> Result<Vec<RestartReport>, OpError> {
    let mut reports = Vec::with_capacity(names.len());
    for name in names {
      reports.push(self.restart_single_container(name, force).await?);
    }
    let _ = stack;
    Ok(reports)
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

  async fn fail(&self, op: &mut Operation, message: String) {
    self.publish(op, Stage::Failed, message.clone());
    op.fail(message);
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

  async fn wait_healthy(&self, container_id: &str) -> bool {
    let deadline = tokio::time::Instant::now() + self.config.health_check_timeout;
    loop {
      if let Ok(c) = self.runtime.inspect_container(container_id).await {
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

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{bus::EventBus, error::PortError, ports::InMemoryOperationStore};
  use async_trait::async_trait;
  use docksmith_types::{ImageRef, labels};
  use tokio::sync::Mutex;

  struct FakeRuntime {
    containers: Mutex<Vec<Container>>,
  }

  #[async_trait]
  impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<Container>, PortError> {
      Ok(self.containers.lock().await.clone())
    }
    async fn inspect_container(&self, id: &str) -> Result<Container, PortError> {
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
      _image_ref: &ImageRef,
      _labels: &BTreeMap<String, String>,
    ) -> Result<Container, PortError> {
      unimplemented!()
    }
  }

  fn container(name: &str, restart_after: Option<&str>) -> Container {
    let mut labels = BTreeMap::new();
    if let Some(dep) = restart_after {
      labels.insert(docksmith_types::labels::RESTART_AFTER.to_string(), dep.to_string());
    }
    Container {
      id: format!("c-{name}"),
      name: name.to_string(),
      stack: None,
      image_ref: ImageRef::parse("nginx:1.0.0"),
      labels,
      state: ContainerState::Running,
      health: ContainerHealth::None,
    }
  }

  #[tokio::test]
  async fn restarting_target_also_restarts_its_dependent() {
    let runtime = Arc::new(FakeRuntime {
      containers: Mutex::new(vec![
        container("redis", None),
        container("app", Some("redis")),
      ]),
    });
    let store = Arc::new(InMemoryOperationStore::new());
    let coordinator = RestartCoordinator::new(
      runtime,
      store,
      Arc::new(EventBus::default()),
      RestartConfig {
        health_check_timeout: Duration::from_millis(20),
        health_poll_interval: Duration::from_millis(5),
        ..Default::default()
      },
    );

    let report = coordinator.restart_single_container("redis", false).await.unwrap();
    assert_eq!(report.target, "redis");
    assert_eq!(report.dependents_restarted, vec!["app".to_string()]);
    assert!(report.errors.is_empty());
  }

  #[tokio::test]
  async fn failing_pre_check_aborts_without_restarting_anything() {
    let mut target = container("db", None);
    target.labels.insert(labels::PRE_UPDATE_CHECK.to_string(), "/bin/false".to_string());
    let runtime = Arc::new(FakeRuntime { containers: Mutex::new(vec![target]) });
    let store = Arc::new(InMemoryOperationStore::new());
    let coordinator = RestartCoordinator::new(
      runtime,
      store,
      Arc::new(EventBus::default()),
      RestartConfig::default(),
    );

    let err = coordinator.restart_single_container("db", false).await.unwrap_err();
    assert!(matches!(err, OpError::PreCheckFailed(_)));
  }
}
