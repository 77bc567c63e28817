use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::container::Container;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerStatus {
  UpToDate,
  UpToDatePinnable,
  UpdateAvailable,
  UpdateAvailableBlocked,
  LocalImage,
  ComposeMismatch,
  Ignored,
  Failed,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
  #[default]
  None,
  Patch,
  Minor,
  Major,
  Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
  pub container: Container,
  pub status: ContainerStatus,
  pub change_type: ChangeType,
  pub available_tag: Option<String>,
  pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stack {
  pub name: String,
  pub containers: Vec<ContainerInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryCounts {
  pub total_checked: usize,
  pub updates_found: usize,
  pub up_to_date: usize,
  pub local_images: usize,
  pub failed: usize,
  pub ignored: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryResult {
  pub containers: Vec<ContainerInfo>,
  pub stacks: BTreeMap<String, Stack>,
  pub standalone_containers: Vec<ContainerInfo>,
  pub counts: DiscoveryCounts,
  pub last_check: Option<DateTime<Utc>>,
  pub last_background_run: Option<DateTime<Utc>>,
  pub next_check: Option<DateTime<Utc>>,
  pub checking: bool,
}

impl DiscoveryResult {
  /// Assemble a result from classified containers, honoring the invariant
  /// that every container appears exactly once: either inside its stack,
  /// or in `standalone_containers`, never both. Sorted by (stack, name)
  /// independent of the order containers were classified in.
  pub fn assemble(mut infos: Vec<ContainerInfo>) -> Self {
    infos.sort_by(|a, b| {
      let stack_a = a.container.stack.as_deref().unwrap_or("");
      let stack_b = b.container.stack.as_deref().unwrap_or("");
      stack_a.cmp(stack_b).then_with(|| a.container.name.cmp(&b.container.name))
    });

    let mut stacks: BTreeMap<String, Stack> = BTreeMap::new();
    let mut standalone = Vec::new();
    let mut counts = DiscoveryCounts::default();

    for info in infos.iter() {
      counts.total_checked += 1;
      match info.status {
        ContainerStatus::Ignored => counts.ignored += 1,
        ContainerStatus::LocalImage => counts.local_images += 1,
        ContainerStatus::Failed => counts.failed += 1,
        ContainerStatus::UpdateAvailable
        | ContainerStatus::UpdateAvailableBlocked => {
          counts.updates_found += 1
        }
        ContainerStatus::UpToDate
        | ContainerStatus::UpToDatePinnable
        | ContainerStatus::ComposeMismatch => counts.up_to_date += 1,
      }
    }

    for info in infos.into_iter() {
      match &info.container.stack {
        Some(stack_name) => {
          stacks
            .entry(stack_name.clone())
            .or_insert_with(|| Stack {
              name: stack_name.clone(),
              containers: Vec::new(),
            })
            .containers
            .push(info.clone());
        }
        None => standalone.push(info.clone()),
      }
    }

    let containers = stacks
      .values()
      .flat_map(|s| s.containers.iter().cloned())
      .chain(standalone.iter().cloned())
      .collect::<Vec<_>>();

    DiscoveryResult {
      containers,
      stacks,
      standalone_containers: standalone,
      counts,
      last_check: Some(Utc::now()),
      last_background_run: None,
      next_check: None,
      checking: false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::container::{ContainerHealth, ContainerState, ImageRef};
  use std::collections::BTreeMap as Map;

  fn info(name: &str, stack: Option<&str>, status: ContainerStatus) -> ContainerInfo {
    ContainerInfo {
      container: Container {
        id: name.to_string(),
        name: name.to_string(),
        stack: stack.map(str::to_string),
        image_ref: ImageRef::parse("nginx:1.0.0"),
        labels: Map::new(),
        state: ContainerState::Running,
        health: ContainerHealth::None,
      },
      status,
      change_type: ChangeType::None,
      available_tag: None,
      message: None,
    }
  }

  #[test]
  fn every_container_appears_exactly_once() {
    let result = DiscoveryResult::assemble(vec![
      info("a", Some("s1"), ContainerStatus::UpToDate),
      info("b", None, ContainerStatus::UpToDate),
    ]);
    assert_eq!(result.containers.len(), 2);
    assert_eq!(result.stacks.get("s1").unwrap().containers.len(), 1);
    assert_eq!(result.standalone_containers.len(), 1);
  }

  #[test]
  fn sorted_by_stack_then_name_regardless_of_input_order() {
    let result = DiscoveryResult::assemble(vec![
      info("z", Some("s2"), ContainerStatus::UpToDate),
      info("a", Some("s1"), ContainerStatus::UpToDate),
      info("m", Some("s1"), ContainerStatus::UpToDate),
    ]);
    let names: Vec<_> =
      result.containers.iter().map(|c| c.container.name.as_str()).collect();
    assert_eq!(names, vec!["a", "m", "z"]);
  }
}
