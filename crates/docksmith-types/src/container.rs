use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Reference to an image, split into the parts the classifier reasons
/// about independently. Mirrors how `bollard`'s image summaries expose
/// `repo_tags` as `registry/repository:tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
  pub registry: Option<String>,
  pub repository: String,
  pub tag: Option<String>,
  pub digest: Option<String>,
}

impl ImageRef {
  /// Canonical key for registry cache lookups: host + repository, no tag.
  pub fn cache_key(&self) -> String {
    match &self.registry {
      Some(registry) => format!("{registry}/{}", self.repository),
      None => self.repository.clone(),
    }
  }

  /// Parse a docker-style reference string such as
  /// `ghcr.io/acme/web:1.24.0` or `nginx:latest` or
  /// `nginx@sha256:abcd`.
  pub fn parse(reference: &str) -> Self {
    let (without_digest, digest) = match reference.split_once('@') {
      Some((rest, digest)) => (rest, Some(digest.to_string())),
      None => (reference, None),
    };

    // A registry host segment contains a '.' or ':' before the first '/',
    // or is literally "localhost". Otherwise the first segment is part of
    // the repository path (e.g. docker hub's "library/nginx").
    let (registry, rest) = match without_digest.split_once('/') {
      Some((first, rest))
        if first.contains('.')
          || first.contains(':')
          || first == "localhost" =>
      {
        (Some(first.to_string()), rest)
      }
      _ => (None, without_digest),
    };

    let (repository, tag) = match rest.rsplit_once(':') {
      // Guard against mistaking a port-bearing registry tail for a tag
      // when there was no explicit registry segment recognised above.
      Some((repo, tag)) if !tag.contains('/') => {
        (repo.to_string(), Some(tag.to_string()))
      }
      _ => (rest.to_string(), None),
    };

    ImageRef { registry, repository, tag, digest }
  }
}

impl fmt::Display for ImageRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(registry) = &self.registry {
      write!(f, "{registry}/")?;
    }
    write!(f, "{}", self.repository)?;
    if let Some(tag) = &self.tag {
      write!(f, ":{tag}")?;
    }
    if let Some(digest) = &self.digest {
      write!(f, "@{digest}")?;
    }
    Ok(())
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
  #[default]
  Running,
  Stopped,
  Restarting,
  Paused,
  Dead,
  Created,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ContainerHealth {
  #[default]
  None,
  Starting,
  Healthy,
  Unhealthy,
}

/// A container as observed from the runtime. Read-only from this system's
/// point of view; the runtime is the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
  pub id: String,
  pub name: String,
  pub stack: Option<String>,
  pub image_ref: ImageRef,
  pub labels: BTreeMap<String, String>,
  pub state: ContainerState,
  pub health: ContainerHealth,
}
