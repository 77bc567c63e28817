//! TTL-bounded cache of tag lists and manifest digests per image
//! reference. Lazy eviction only — entries are checked for expiry on
//! read, there is no background reaper.

use std::{collections::HashMap, sync::Arc, time::Duration};

use docksmith_types::ImageRef;
use tokio::sync::{Mutex, RwLock};

use crate::{error::PortError, ports::RegistryClient};

#[derive(Debug, Clone)]
struct Entry {
  tags: Vec<String>,
  manifest_digests: HashMap<String, String>,
  fetched_at: std::time::Instant,
  stale: bool,
}

pub struct RegistryCache {
  client: Arc<dyn RegistryClient>,
  ttl: Duration,
  entries: RwLock<HashMap<String, Entry>>,
  // Per-key fetch locks, so concurrent callers for the same key coalesce
  // onto a single underlying fetch instead of a thundering herd.
  fetch_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl RegistryCache {
  pub fn new(client: Arc<dyn RegistryClient>, ttl: Duration) -> Self {
    RegistryCache {
      client,
      ttl,
      entries: RwLock::new(HashMap::new()),
      fetch_locks: RwLock::new(HashMap::new()),
    }
  }

  async fn fetch_lock(&self, key: &str) -> Arc<Mutex<()>> {
    {
      let locks = self.fetch_locks.read().await;
      if let Some(lock) = locks.get(key) {
        return lock.clone();
      }
    }
    let mut locks = self.fetch_locks.write().await;
    locks
      .entry(key.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone()
  }

  fn is_expired(&self, entry: &Entry) -> bool {
    entry.fetched_at.elapsed() > self.ttl
  }

  pub async fn list_tags(
    &self,
    image_ref: &ImageRef,
  ) -> Result<Vec<String>, PortError> {
    let key = image_ref.cache_key();

    if let Some(tags) = self.fresh_tags(&key).await {
      return Ok(tags);
    }

    let lock = self.fetch_lock(&key).await;
    let _guard = lock.lock().await;

    // Re-check: another caller may have refreshed it while we waited.
    if let Some(tags) = self.fresh_tags(&key).await {
      return Ok(tags);
    }

    match self.client.list_tags(image_ref).await {
      Ok(tags) => {
        let mut entries = self.entries.write().await;
        entries.insert(
          key,
          Entry {
            tags: tags.clone(),
            manifest_digests: HashMap::new(),
            fetched_at: std::time::Instant::now(),
            stale: false,
          },
        );
        Ok(tags)
      }
      Err(e) => {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&key) {
          entry.stale = true;
          return Ok(entry.tags.clone());
        }
        Err(e)
      }
    }
  }

  async fn fresh_tags(&self, key: &str) -> Option<Vec<String>> {
    let entries = self.entries.read().await;
    let entry = entries.get(key)?;
    if self.is_expired(entry) {
      return None;
    }
    Some(entry.tags.clone())
  }

  pub async fn resolve_digest(
    &self,
    image_ref: &ImageRef,
    tag: &str,
  ) -> Result<String, PortError> {
    let key = image_ref.cache_key();
    {
      let entries = self.entries.read().await;
      if let Some(entry) = entries.get(&key)
        && !self.is_expired(entry)
        && let Some(digest) = entry.manifest_digests.get(tag)
      {
        return Ok(digest.clone());
      }
    }
    match self.client.resolve_manifest(image_ref, tag).await {
      Ok(digest) => {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(key).or_insert_with(|| Entry {
          tags: Vec::new(),
          manifest_digests: HashMap::new(),
          fetched_at: std::time::Instant::now(),
          stale: false,
        });
        entry.manifest_digests.insert(tag.to_string(), digest.clone());
        Ok(digest)
      }
      Err(e) => {
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(&key)
          && let Some(digest) = entry.manifest_digests.get(tag)
        {
          return Ok(digest.clone());
        }
        Err(e)
      }
    }
  }

  /// Wipe every cached entry. Used before a "fresh-only" discovery sweep.
  pub async fn clear(&self) {
    self.entries.write().await.clear();
  }
}
