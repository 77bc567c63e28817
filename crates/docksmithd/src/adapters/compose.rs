//! `ComposeFile` over on-disk compose YAML: a plain read-modify-write
//! cycle keyed by path, grounded on the teacher's
//! `bin/periphery/src/compose/write.rs` shape but without its
//! multi-source (git/host-file) resolution, which is out of scope here.

use async_trait::async_trait;
use dashmap::DashMap;
use docksmith_core::{
  error::PortError,
  ports::{ComposeFile, ComposeService},
};
use docksmith_types::ImageRef;
use serde_yaml_ng::Value;
use std::collections::BTreeMap;

pub struct YamlComposeFile {
  docs: DashMap<String, Value>,
}

impl Default for YamlComposeFile {
  fn default() -> Self {
    YamlComposeFile { docs: DashMap::new() }
  }
}

impl YamlComposeFile {
  pub fn new() -> Self {
    Self::default()
  }

  async fn ensure_loaded(&self, path: &str) -> Result<(), PortError> {
    if self.docs.contains_key(path) {
      return Ok(());
    }
    self.load(path).await
  }

  fn services_mut(
    doc: &mut Value,
  ) -> Result<&mut serde_yaml_ng::Mapping, PortError> {
    doc
      .get_mut("services")
      .and_then(|v| v.as_mapping_mut())
      .ok_or_else(|| PortError::Backend("compose file has no services map".into()))
  }

  fn service_labels(
    service: &mut Value,
  ) -> &mut serde_yaml_ng::Mapping {
    if service.get("labels").and_then(|v| v.as_mapping()).is_none() {
      // Compose also allows a `- KEY=VALUE` list form; normalize it into
      // a mapping so set/remove have one representation to edit.
      let as_map: serde_yaml_ng::Mapping = service
        .get("labels")
        .and_then(|v| v.as_sequence())
        .map(|seq| {
          seq
            .iter()
            .filter_map(|entry| entry.as_str())
            .filter_map(|entry| entry.split_once('='))
            .map(|(k, v)| {
              (Value::String(k.to_string()), Value::String(v.to_string()))
            })
            .collect()
        })
        .unwrap_or_default();
      service
        .as_mapping_mut()
        .expect("service entries are mappings")
        .insert("labels".into(), Value::Mapping(as_map));
    }
    service
      .get_mut("labels")
      .and_then(|v| v.as_mapping_mut())
      .expect("labels normalized to a mapping above")
  }
}

#[async_trait]
impl ComposeFile for YamlComposeFile {
  async fn load(&self, path: &str) -> Result<(), PortError> {
    let content = tokio::fs::read_to_string(path)
      .await
      .map_err(|e| PortError::Backend(format!("reading {path}: {e}")))?;
    let value: Value = serde_yaml_ng::from_str(&content)
      .map_err(|e| PortError::Backend(format!("parsing {path}: {e}")))?;
    self.docs.insert(path.to_string(), value);
    Ok(())
  }

  async fn find_service_by_container_name(
    &self,
    path: &str,
    container_name: &str,
  ) -> Result<ComposeService, PortError> {
    self.ensure_loaded(path).await?;
    let doc = self
      .docs
      .get(path)
      .ok_or_else(|| PortError::NotFound(path.to_string()))?;
    let services = doc
      .get("services")
      .and_then(|v| v.as_mapping())
      .ok_or_else(|| PortError::Backend("compose file has no services map".into()))?;

    for (key, service) in services {
      let service_name = key.as_str().unwrap_or_default();
      let explicit_name =
        service.get("container_name").and_then(|v| v.as_str());
      if service_name == container_name || explicit_name == Some(container_name)
      {
        let image = service
          .get("image")
          .and_then(|v| v.as_str())
          .ok_or_else(|| {
            PortError::Backend(format!("service {service_name} has no image"))
          })?;
        let labels = service
          .get("labels")
          .map(|v| match v {
            Value::Mapping(map) => map
              .iter()
              .filter_map(|(k, v)| {
                Some((k.as_str()?.to_string(), v.as_str()?.to_string()))
              })
              .collect::<BTreeMap<_, _>>(),
            Value::Sequence(seq) => seq
              .iter()
              .filter_map(|entry| entry.as_str())
              .filter_map(|entry| entry.split_once('='))
              .map(|(k, v)| (k.to_string(), v.to_string()))
              .collect(),
            _ => BTreeMap::new(),
          })
          .unwrap_or_default();

        return Ok(ComposeService {
          name: service_name.to_string(),
          image: ImageRef::parse(image),
          labels,
        });
      }
    }
    Err(PortError::NotFound(container_name.to_string()))
  }

  async fn set_label(
    &self,
    path: &str,
    service: &str,
    key: &str,
    value: &str,
  ) -> Result<(), PortError> {
    self.ensure_loaded(path).await?;
    let mut doc = self
      .docs
      .get_mut(path)
      .ok_or_else(|| PortError::NotFound(path.to_string()))?;
    let services = Self::services_mut(&mut doc)?;
    let entry = services
      .get_mut(service)
      .ok_or_else(|| PortError::NotFound(service.to_string()))?;
    Self::service_labels(entry)
      .insert(key.into(), value.into());
    Ok(())
  }

  async fn remove_label(
    &self,
    path: &str,
    service: &str,
    key: &str,
  ) -> Result<(), PortError> {
    self.ensure_loaded(path).await?;
    let mut doc = self
      .docs
      .get_mut(path)
      .ok_or_else(|| PortError::NotFound(path.to_string()))?;
    let services = Self::services_mut(&mut doc)?;
    let entry = services
      .get_mut(service)
      .ok_or_else(|| PortError::NotFound(service.to_string()))?;
    Self::service_labels(entry).remove(key);
    Ok(())
  }

  async fn set_image(
    &self,
    path: &str,
    service: &str,
    image_ref: &ImageRef,
  ) -> Result<(), PortError> {
    self.ensure_loaded(path).await?;
    let mut doc = self
      .docs
      .get_mut(path)
      .ok_or_else(|| PortError::NotFound(path.to_string()))?;
    let services = Self::services_mut(&mut doc)?;
    let entry = services
      .get_mut(service)
      .ok_or_else(|| PortError::NotFound(service.to_string()))?;
    entry
      .as_mapping_mut()
      .expect("service entries are mappings")
      .insert("image".into(), image_ref.to_string().into());
    Ok(())
  }

  async fn save(&self, path: &str) -> Result<(), PortError> {
    let doc = self
      .docs
      .get(path)
      .ok_or_else(|| PortError::NotFound(path.to_string()))?;
    let content = serde_yaml_ng::to_string(&*doc)
      .map_err(|e| PortError::Backend(format!("serializing {path}: {e}")))?;
    tokio::fs::write(path, content)
      .await
      .map_err(|e| PortError::Backend(format!("writing {path}: {e}")))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn write_fixture() -> String {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("docksmithd-compose-{}.yml", uuid::Uuid::new_v4()));
    tokio::fs::write(
      &path,
      "services:\n  web:\n    image: nginx:1.24.0\n    labels:\n      docksmith.ignore: \"false\"\n",
    )
    .await
    .unwrap();
    path.to_string_lossy().to_string()
  }

  #[tokio::test]
  async fn finds_service_and_round_trips_label_edits() {
    let path = write_fixture().await;
    let compose = YamlComposeFile::new();

    let service = compose.find_service_by_container_name(&path, "web").await.unwrap();
    assert_eq!(service.image.tag.as_deref(), Some("1.24.0"));
    assert_eq!(service.labels.get("docksmith.ignore"), Some(&"false".to_string()));

    compose.set_label(&path, "web", "docksmith.allow-latest", "true").await.unwrap();
    compose.remove_label(&path, "web", "docksmith.ignore").await.unwrap();
    compose
      .set_image(&path, "web", &ImageRef::parse("nginx:1.25.0"))
      .await
      .unwrap();
    compose.save(&path).await.unwrap();

    let fresh = YamlComposeFile::new();
    let service = fresh.find_service_by_container_name(&path, "web").await.unwrap();
    assert_eq!(service.image.tag.as_deref(), Some("1.25.0"));
    assert_eq!(service.labels.get("docksmith.allow-latest"), Some(&"true".to_string()));
    assert!(!service.labels.contains_key("docksmith.ignore"));

    tokio::fs::remove_file(&path).await.ok();
  }
}
