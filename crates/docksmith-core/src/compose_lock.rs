//! Per-compose-file-path serialization. The compose file on disk is the
//! authoritative source for label edits and concurrent writers to the
//! same path are not supported, so every edit path takes this lock first.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct ComposeLocks {
  locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ComposeLocks {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn lock(&self, path: &str) -> OwnedMutexGuard<()> {
    let mutex = self
      .locks
      .entry(path.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone();
    mutex.lock_owned().await
  }
}
