//! `RegistryClient` over the Docker Registry HTTP API v2: tag listing and
//! manifest digest resolution, including the anonymous bearer-token
//! exchange most registries (Docker Hub, GHCR) require per the challenge
//! in a 401's `WWW-Authenticate` header.

use async_trait::async_trait;
use docksmith_core::{error::PortError, ports::RegistryClient};
use docksmith_types::ImageRef;
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json,application/vnd.oci.image.manifest.v1+json,application/vnd.docker.distribution.manifest.list.v2+json";

pub struct DockerRegistryClient {
  client: Client,
  default_host: String,
}

impl DockerRegistryClient {
  pub fn new(default_host: String) -> Self {
    DockerRegistryClient { client: Client::new(), default_host }
  }

  fn host(&self, image_ref: &ImageRef) -> String {
    image_ref.registry.clone().unwrap_or_else(|| self.default_host.clone())
  }

  /// Docker Hub namespaces unqualified repositories under `library/`.
  fn repository_path(&self, image_ref: &ImageRef) -> String {
    if image_ref.registry.is_none() && !image_ref.repository.contains('/') {
      format!("library/{}", image_ref.repository)
    } else {
      image_ref.repository.clone()
    }
  }

  fn base_url(&self, image_ref: &ImageRef) -> String {
    format!("https://{}/v2/{}", self.host(image_ref), self.repository_path(image_ref))
  }

  /// Completes the bearer-token challenge described by a 401 response's
  /// `WWW-Authenticate: Bearer realm="...",service="...",scope="..."`
  /// header, returning the token to retry the request with.
  async fn bearer_token(&self, challenge: &str) -> Option<String> {
    let mut realm = None;
    let mut service = None;
    let mut scope = None;
    for part in challenge.trim_start_matches("Bearer ").split(',') {
      let (key, value) = part.trim().split_once('=')?;
      let value = value.trim_matches('"');
      match key {
        "realm" => realm = Some(value.to_string()),
        "service" => service = Some(value.to_string()),
        "scope" => scope = Some(value.to_string()),
        _ => {}
      }
    }
    let realm = realm?;
    let mut request = self.client.get(realm);
    if let Some(service) = service {
      request = request.query(&[("service", service)]);
    }
    if let Some(scope) = scope {
      request = request.query(&[("scope", scope)]);
    }
    let resp = request.send().await.ok()?;
    let body: TokenResponse = resp.json().await.ok()?;
    body.token.or(body.access_token)
  }

  async fn authenticated_get(
    &self,
    url: &str,
    accept: &str,
  ) -> Result<reqwest::Response, PortError> {
    let resp = self
      .client
      .get(url)
      .header(header::ACCEPT, accept)
      .send()
      .await
      .map_err(|e| PortError::Backend(e.to_string()))?;

    if resp.status() != StatusCode::UNAUTHORIZED {
      return Ok(resp);
    }
    let challenge = resp
      .headers()
      .get(header::WWW_AUTHENTICATE)
      .and_then(|v| v.to_str().ok())
      .unwrap_or_default()
      .to_string();
    let Some(token) = self.bearer_token(&challenge).await else {
      return Ok(resp);
    };
    self
      .client
      .get(url)
      .header(header::ACCEPT, accept)
      .bearer_auth(token)
      .send()
      .await
      .map_err(|e| PortError::Backend(e.to_string()))
  }
}

#[derive(Deserialize)]
struct TokenResponse {
  token: Option<String>,
  access_token: Option<String>,
}

#[derive(Deserialize)]
struct TagsList {
  tags: Vec<String>,
}

#[async_trait]
impl RegistryClient for DockerRegistryClient {
  async fn list_tags(
    &self,
    image_ref: &ImageRef,
  ) -> Result<Vec<String>, PortError> {
    let url = format!("{}/tags/list", self.base_url(image_ref));
    let resp = self.authenticated_get(&url, "application/json").await?;
    if resp.status() == StatusCode::NOT_FOUND {
      return Err(PortError::NotFound(image_ref.repository.clone()));
    }
    if !resp.status().is_success() {
      return Err(PortError::Backend(format!(
        "registry returned {}",
        resp.status()
      )));
    }
    let list: TagsList = resp
      .json()
      .await
      .map_err(|e| PortError::Backend(e.to_string()))?;
    Ok(list.tags)
  }

  async fn resolve_manifest(
    &self,
    image_ref: &ImageRef,
    tag: &str,
  ) -> Result<String, PortError> {
    let url = format!("{}/manifests/{tag}", self.base_url(image_ref));
    let resp = self.authenticated_get(&url, MANIFEST_ACCEPT).await?;
    if resp.status() == StatusCode::NOT_FOUND {
      return Err(PortError::NotFound(format!(
        "{}:{tag}",
        image_ref.repository
      )));
    }
    if !resp.status().is_success() {
      return Err(PortError::Backend(format!(
        "registry returned {}",
        resp.status()
      )));
    }
    resp
      .headers()
      .get("Docker-Content-Digest")
      .and_then(|v| v.to_str().ok())
      .map(|s| s.to_string())
      .ok_or_else(|| {
        PortError::Backend("response missing Docker-Content-Digest".into())
      })
  }
}
