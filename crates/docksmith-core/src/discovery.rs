//! Enumerates containers, classifies each against registry data and the
//! compose file, and emits per-container progress.

use std::{sync::Arc, time::Duration};

use docksmith_types::{
  ChangeType, Container, ContainerInfo, ContainerStatus,
  DiscoveryResult, EventPayload, ManagedLabels,
};
use tokio::sync::Semaphore;

use crate::{
  bus::Publisher,
  classify::{change_type, has_pinnable_concrete_version, parse_semver,
    pick_candidate},
  error::{OpError, PortError},
  ports::{ComposeFile, ContainerRuntime},
  precheck::run_pre_update_check,
  registry_cache::RegistryCache,
};

const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
const COMPOSE_CONFIG_FILES_LABEL: &str =
  "com.docker.compose.project.config_files";

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
  pub worker_limit: usize,
  pub pre_check_timeout: Duration,
}

impl Default for DiscoveryConfig {
  fn default() -> Self {
    DiscoveryConfig {
      worker_limit: 8,
      pre_check_timeout: Duration::from_secs(10),
    }
  }
}

pub struct DiscoveryOrchestrator {
  runtime: Arc<dyn ContainerRuntime>,
  registry: Arc<RegistryCache>,
  compose: Arc<dyn ComposeFile>,
  bus: Arc<dyn Publisher>,
  config: DiscoveryConfig,
}

impl DiscoveryOrchestrator {
  pub fn new(
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<RegistryCache>,
    compose: Arc<dyn ComposeFile>,
    bus: Arc<dyn Publisher>,
    config: DiscoveryConfig,
  ) -> Self {
    DiscoveryOrchestrator { runtime, registry, compose, bus, config }
  }

  pub async fn clear_cache(&self) {
    self.registry.clear().await;
  }

  pub async fn discover_and_check(
    &self,
  ) -> Result<DiscoveryResult, OpError> {
    let containers = self
      .runtime
      .list_containers()
      .await
      .map_err(OpError::from)?;

    let total = containers.len();
    let semaphore = Arc::new(Semaphore::new(self.config.worker_limit.max(1)));
    let checked = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(total);
    for container in containers {
      let semaphore = semaphore.clone();
      let checked = checked.clone();
      let this = self.clone_handles();
      handles.push(tokio::spawn(async move {
        let _permit = semaphore.acquire_owned().await.ok();
        let info = this.classify(&container).await;
        let n = checked.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        this.bus.publish(docksmith_types::Event::new(
          EventPayload::CheckProgress(docksmith_types::CheckProgressPayload {
            checked: n,
            total,
            #[allow(clippy::manual_checked_ops)]
            percent: if total == 0 { 100 } else { (n * 100 / total) as u8 },
            container_name: container.name.clone(),
            message: format!("{:?}", info.status),
          }),
        ));
        info
      }));
    }

    let mut infos = Vec::with_capacity(handles.len());
    for handle in handles {
      if let Ok(info) = handle.await {
        infos.push(info);
      }
    }

    Ok(DiscoveryResult::assemble(infos))
  }

  pub async fn discover_and_check_single(
    &self,
    name: &str,
  ) -> Result<Option<ContainerInfo>, OpError> {
    let containers =
      self.runtime.list_containers().await.map_err(OpError::from)?;
    let Some(container) = containers.into_iter().find(|c| c.name == name)
    else {
      return Ok(None);
    };
    Ok(Some(self.classify(&container).await))
  }

  /// A cheap clone carrying only what the spawned classification task
  /// needs, so `discover_and_check` doesn't have to wrap the whole
  /// orchestrator in an `Arc` at the call site.
  fn clone_handles(&self) -> ClassifyHandles {
    ClassifyHandles {
      registry: self.registry.clone(),
      compose: self.compose.clone(),
      bus: self.bus.clone(),
      pre_check_timeout: self.config.pre_check_timeout,
    }
  }

  async fn classify(&self, container: &Container) -> ContainerInfo {
    self.clone_handles().classify(container).await
  }
}

#[derive(Clone)]
struct ClassifyHandles {
  registry: Arc<RegistryCache>,
  compose: Arc<dyn ComposeFile>,
  bus: Arc<dyn Publisher>,
  pre_check_timeout: Duration,
}

impl ClassifyHandles {
  async fn classify(&self, container: &Container) -> ContainerInfo {
    let labels = match ManagedLabels::parse(&container.labels) {
      Ok(labels) => labels,
      Err(e) => {
        return failed(container, format!("invalid managed labels: {e}"));
      }
    };

    if labels.ignore {
      return ContainerInfo {
        container: container.clone(),
        status: ContainerStatus::Ignored,
        change_type: ChangeType::None,
        available_tag: None,
        message: None,
      };
    }

    let tags = match self.registry.list_tags(&container.image_ref).await {
      Ok(tags) => tags,
      Err(PortError::NotFound(_)) => {
        return ContainerInfo {
          container: container.clone(),
          status: ContainerStatus::LocalImage,
          change_type: ChangeType::None,
          available_tag: None,
          message: None,
        };
      }
      Err(PortError::Backend(msg)) => return failed(container, msg),
    };

    if let Some(mismatch) =
      self.compose_mismatch(container).await
    {
      return mismatch;
    }

    let current = container
      .image_ref
      .tag
      .as_deref()
      .and_then(parse_semver);

    let candidate = match pick_candidate(&tags, current.as_ref(), &labels) {
      Ok(c) => c,
      Err(e) => return failed(container, format!("invalid tag-regex: {e}")),
    };

    let (status, change, available_tag) = match (current, candidate) {
      (Some(current), Some((tag, candidate_version))) => {
        let change = change_type(&current, &candidate_version);
        if change == ChangeType::None {
          (ContainerStatus::UpToDate, ChangeType::None, None)
        } else {
          (
            ContainerStatus::UpdateAvailable,
            change,
            Some(tag),
          )
        }
      }
      (None, _) => {
        // Floating tag (e.g. `latest`): pinnable if a concrete version
        // exists and the container doesn't explicitly allow latest.
        if !labels.allow_latest
          && has_pinnable_concrete_version(&tags, &labels)
        {
          (ContainerStatus::UpToDatePinnable, ChangeType::Unknown, None)
        } else {
          (ContainerStatus::UpToDate, ChangeType::None, None)
        }
      }
      (Some(_), None) => (ContainerStatus::UpToDate, ChangeType::None, None),
    };

    if status != ContainerStatus::UpdateAvailable {
      return ContainerInfo {
        container: container.clone(),
        status,
        change_type: change,
        available_tag,
        message: None,
      };
    }

    let Some(check) = &labels.pre_update_check else {
      return ContainerInfo {
        container: container.clone(),
        status,
        change_type: change,
        available_tag,
        message: None,
      };
    };

    match run_pre_update_check(check, self.pre_check_timeout).await {
      Ok(()) => ContainerInfo {
        container: container.clone(),
        status,
        change_type: change,
        available_tag,
        message: None,
      },
      Err(e) => ContainerInfo {
        container: container.clone(),
        status: ContainerStatus::UpdateAvailableBlocked,
        change_type: change,
        available_tag,
        message: Some(e.to_string()),
      },
    }
  }

  async fn compose_mismatch(
    &self,
    container: &Container,
  ) -> Option<ContainerInfo> {
    let project = container.labels.get(COMPOSE_PROJECT_LABEL)?;
    let config_files = container.labels.get(COMPOSE_CONFIG_FILES_LABEL)?;
    let path = config_files.split(',').next().unwrap_or(config_files);
    let _ = project;

    let service = self
      .compose
      .find_service_by_container_name(path, &container.name)
      .await
      .ok()?;

    if service.image != container.image_ref {
      return Some(ContainerInfo {
        container: container.clone(),
        status: ContainerStatus::ComposeMismatch,
        change_type: ChangeType::None,
        available_tag: None,
        message: Some(format!(
          "running {} but compose specifies {}",
          container.image_ref, service.image
        )),
      });
    }
    None
  }
}

fn failed(container: &Container, message: String) -> ContainerInfo {
  ContainerInfo {
    container: container.clone(),
    status: ContainerStatus::Failed,
    change_type: ChangeType::None,
    available_tag: None,
    message: Some(message),
  }
}
