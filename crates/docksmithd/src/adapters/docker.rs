//! `ContainerRuntime` over the Docker Engine API, grounded on the
//! teacher's `bin/periphery/src/docker/*` client but calling `bollard`
//! directly rather than shelling out, since there's no compose-project
//! write path to reconcile with here.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use bollard::{
  Docker,
  query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions,
    ListContainersOptions, RemoveContainerOptions, RestartContainerOptions,
    StartContainerOptions, StopContainerOptions,
  },
  models::{ContainerCreateBody, ContainerStateStatusEnum, HealthStatusEnum},
};
use docksmith_core::{error::PortError, ports::ContainerRuntime};
use docksmith_types::{Container, ContainerHealth, ContainerState, ImageRef};
use futures::StreamExt;

const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

pub struct DockerRuntime {
  docker: Docker,
}

impl DockerRuntime {
  pub fn connect() -> anyhow::Result<Self> {
    Ok(DockerRuntime { docker: Docker::connect_with_local_defaults()? })
  }
}

fn backend(e: bollard::errors::Error) -> PortError {
  PortError::Backend(e.to_string())
}

fn convert_state(state: Option<ContainerStateStatusEnum>) -> ContainerState {
  match state {
    Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
    Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Restarting,
    Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Paused,
    Some(ContainerStateStatusEnum::DEAD) => ContainerState::Dead,
    Some(ContainerStateStatusEnum::CREATED) => ContainerState::Created,
    _ => ContainerState::Stopped,
  }
}

fn convert_health(status: Option<HealthStatusEnum>) -> ContainerHealth {
  match status {
    Some(HealthStatusEnum::STARTING) => ContainerHealth::Starting,
    Some(HealthStatusEnum::HEALTHY) => ContainerHealth::Healthy,
    Some(HealthStatusEnum::UNHEALTHY) => ContainerHealth::Unhealthy,
    _ => ContainerHealth::None,
  }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
  async fn list_containers(&self) -> Result<Vec<Container>, PortError> {
    let summaries = self
      .docker
      .list_containers(Some(ListContainersOptions {
        all: true,
        ..Default::default()
      }))
      .await
      .map_err(backend)?;

    Ok(
      summaries
        .into_iter()
        .map(|s| {
          let labels = s.labels.unwrap_or_default();
          let name = s
            .names
            .and_then(|names| names.into_iter().next())
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
          Container {
            id: s.id.unwrap_or_default(),
            name,
            stack: labels.get(COMPOSE_PROJECT_LABEL).cloned(),
            image_ref: ImageRef::parse(
              s.image.as_deref().unwrap_or("unknown"),
            ),
            labels: labels.into_iter().collect::<BTreeMap<_, _>>(),
            state: match s.state {
              Some(state) => match state.to_string().as_str() {
                "running" => ContainerState::Running,
                "restarting" => ContainerState::Restarting,
                "paused" => ContainerState::Paused,
                "dead" => ContainerState::Dead,
                "created" => ContainerState::Created,
                _ => ContainerState::Stopped,
              },
              None => ContainerState::Stopped,
            },
            health: ContainerHealth::None,
          }
        })
        .collect(),
    )
  }

  async fn inspect_container(&self, id: &str) -> Result<Container, PortError> {
    let resp = self
      .docker
      .inspect_container(id, None::<InspectContainerOptions>)
      .await
      .map_err(|e| match e {
        bollard::errors::Error::DockerResponseServerError {
          status_code: 404,
          ..
        } => PortError::NotFound(id.to_string()),
        other => backend(other),
      })?;

    let state = resp.state.unwrap_or_default();
    let labels = resp
      .config
      .and_then(|c| c.labels)
      .unwrap_or_default();

    Ok(Container {
      id: resp.id.unwrap_or_else(|| id.to_string()),
      name: resp
        .name
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default(),
      stack: labels.get(COMPOSE_PROJECT_LABEL).cloned(),
      image_ref: ImageRef::parse(resp.image.as_deref().unwrap_or("unknown")),
      labels: labels.into_iter().collect::<BTreeMap<_, _>>(),
      state: convert_state(state.status),
      health: state
        .health
        .and_then(|h| h.status)
        .map(|s| convert_health(Some(s)))
        .unwrap_or(ContainerHealth::None),
    })
  }

  async fn start_container(&self, id: &str) -> Result<(), PortError> {
    self
      .docker
      .start_container(id, None::<StartContainerOptions>)
      .await
      .map_err(backend)
  }

  async fn stop_container(
    &self,
    id: &str,
    timeout: Duration,
  ) -> Result<(), PortError> {
    self
      .docker
      .stop_container(
        id,
        Some(StopContainerOptions {
          t: Some(timeout.as_secs() as i32),
          ..Default::default()
        }),
      )
      .await
      .map_err(backend)
  }

  async fn restart_container(
    &self,
    id: &str,
    timeout: Duration,
  ) -> Result<(), PortError> {
    self
      .docker
      .restart_container(
        id,
        Some(RestartContainerOptions {
          t: Some(timeout.as_secs() as i32),
          ..Default::default()
        }),
      )
      .await
      .map_err(backend)
  }

  async fn remove_container(
    &self,
    id: &str,
    force: bool,
  ) -> Result<(), PortError> {
    self
      .docker
      .remove_container(
        id,
        Some(RemoveContainerOptions { force, ..Default::default() }),
      )
      .await
      .map_err(backend)
  }

  async fn pull_image(&self, image_ref: &ImageRef) -> Result<(), PortError> {
    let from_image = format!(
      "{}{}",
      image_ref
        .registry
        .as_ref()
        .map(|r| format!("{r}/"))
        .unwrap_or_default(),
      image_ref.repository,
    );
    let tag = image_ref.tag.clone().unwrap_or_else(|| "latest".to_string());

    let mut stream = self.docker.create_image(
      Some(CreateImageOptions {
        from_image: Some(from_image),
        tag: Some(tag),
        ..Default::default()
      }),
      None,
      None,
    );
    while let Some(item) = stream.next().await {
      let info = item.map_err(backend)?;
      if let Some(error) = info.error {
        return Err(PortError::Backend(error));
      }
    }
    Ok(())
  }

  async fn recreate_container(
    &self,
    name: &str,
    image_ref: &ImageRef,
    labels: &BTreeMap<String, String>,
  ) -> Result<Container, PortError> {
    let existing = self.inspect_container(name).await.ok();
    if let Some(existing) = &existing {
      let _ = self.stop_container(&existing.id, Duration::from_secs(10)).await;
      self.remove_container(&existing.id, true).await?;
    }

    let mut container_labels = labels.clone();
    container_labels.insert(
      COMPOSE_SERVICE_LABEL.to_string(),
      name.to_string(),
    );

    let created = self
      .docker
      .create_container(
        Some(CreateContainerOptions {
          name: Some(name.to_string()),
          ..Default::default()
        }),
        ContainerCreateBody {
          image: Some(image_ref.to_string()),
          labels: Some(container_labels.into_iter().collect()),
          ..Default::default()
        },
      )
      .await
      .map_err(backend)?;

    self.start_container(&created.id).await?;
    self.inspect_container(&created.id).await
  }
}
