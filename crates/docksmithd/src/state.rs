//! Constructs one instance of each core component and wires the narrow
//! `Publisher` capability into every orchestrator, the way `main.rs`'s
//! `app()` does for the teacher's db/auth/background-loop singletons.

use std::{sync::Arc, time::Duration};

use docksmith_core::{
  BackgroundChecker, DiscoveryConfig, DiscoveryOrchestrator, EventBus,
  LabelTransaction, RegistryCache, RestartConfig, RestartCoordinator,
  UpdateConfig, UpdateOrchestrator,
  ports::{ContainerRuntime, InMemoryOperationStore, OperationStore},
};

use crate::{
  adapters::{compose::YamlComposeFile, docker::DockerRuntime, registry::DockerRegistryClient},
  config::Config,
};

pub struct AppState {
  pub bus: Arc<EventBus>,
  pub runtime: Arc<dyn ContainerRuntime>,
  pub checker: Arc<BackgroundChecker>,
  pub update: Arc<UpdateOrchestrator>,
  pub label: Arc<LabelTransaction>,
  pub restart: Arc<RestartCoordinator>,
  pub store: Arc<dyn OperationStore>,
}

impl AppState {
  pub fn build(config: &Config) -> anyhow::Result<Arc<Self>> {
    let bus = Arc::new(EventBus::default());
    let runtime: Arc<dyn ContainerRuntime> =
      Arc::new(DockerRuntime::connect()?);
    let registry_client =
      Arc::new(DockerRegistryClient::new(config.registry_base_url.clone()));
    let registry = Arc::new(RegistryCache::new(
      registry_client,
      Duration::from_secs(config.registry_ttl_secs),
    ));
    let compose = Arc::new(YamlComposeFile::new());
    let store: Arc<dyn OperationStore> = Arc::new(InMemoryOperationStore::new());

    let discovery = Arc::new(DiscoveryOrchestrator::new(
      runtime.clone(),
      registry,
      compose.clone(),
      bus.clone(),
      DiscoveryConfig {
        worker_limit: config.worker_limit,
        ..Default::default()
      },
    ));

    let checker = BackgroundChecker::new(
      discovery.clone(),
      bus.clone(),
      Duration::from_secs(config.check_interval_secs),
    );

    let update = UpdateOrchestrator::new(
      runtime.clone(),
      compose.clone(),
      store.clone(),
      bus.clone(),
      UpdateConfig::default(),
    );

    let label = LabelTransaction::new(
      runtime.clone(),
      compose,
      store.clone(),
      bus.clone(),
      UpdateConfig::default().pre_check_timeout,
    );

    let restart = RestartCoordinator::new(
      runtime.clone(),
      store.clone(),
      bus.clone(),
      RestartConfig::default(),
    );

    Ok(Arc::new(AppState {
      bus,
      runtime,
      checker,
      update,
      label,
      restart,
      store,
    }))
  }
}
