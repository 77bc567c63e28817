//! Periodic driver of discovery with manual-trigger coalescing and a
//! cached-result surface.

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use chrono::{DateTime, Utc};
use docksmith_types::{
  ContainerUpdatedPayload, ContainerUpdatedStatus, DiscoveryResult,
  Event, EventPayload,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::{bus::Publisher, discovery::DiscoveryOrchestrator};

struct State {
  result: DiscoveryResult,
  last_check: Option<DateTime<Utc>>,
  last_background_run: Option<DateTime<Utc>>,
}

pub struct BackgroundChecker {
  discovery: Arc<DiscoveryOrchestrator>,
  bus: Arc<dyn Publisher>,
  check_interval: Duration,
  state: RwLock<State>,
  checking: AtomicBool,
  pending: AtomicBool,
  cache_cleared: AtomicBool,
  cancel: CancellationToken,
}

impl BackgroundChecker {
  pub fn new(
    discovery: Arc<DiscoveryOrchestrator>,
    bus: Arc<dyn Publisher>,
    check_interval: Duration,
  ) -> Arc<Self> {
    Arc::new(BackgroundChecker {
      discovery,
      bus,
      check_interval,
      state: RwLock::new(State {
        result: DiscoveryResult::default(),
        last_check: None,
        last_background_run: None,
      }),
      checking: AtomicBool::new(false),
      pending: AtomicBool::new(false),
      cache_cleared: AtomicBool::new(false),
      cancel: CancellationToken::new(),
    })
  }

  pub fn start(self: &Arc<Self>) {
    let this = self.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(this.check_interval);
      interval.tick().await; // first tick fires immediately
      loop {
        tokio::select! {
          _ = this.cancel.cancelled() => break,
          _ = interval.tick() => {
            this.run_background().await;
          }
        }
      }
    });
  }

  pub fn stop(&self) {
    self.cancel.cancel();
  }

  pub fn mark_cache_cleared(&self) {
    self.cache_cleared.store(true, Ordering::SeqCst);
  }

  /// Single-flight trigger: if a check is already running, this just
  /// records that one more run is wanted once it finishes, regardless of
  /// how many concurrent callers do the same.
  pub fn trigger_check(self: &Arc<Self>) {
    if self
      .checking
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_ok()
    {
      let this = self.clone();
      tokio::spawn(async move {
        this.run_check_loop(false).await;
      });
    } else {
      self.pending.store(true, Ordering::SeqCst);
    }
  }

  async fn run_background(self: &Arc<Self>) {
    if self
      .checking
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_ok()
    {
      self.run_check_loop(true).await;
    } else {
      self.pending.store(true, Ordering::SeqCst);
    }
  }

  async fn run_check_loop(&self, mut is_background: bool) {
    loop {
      self.run_once(is_background).await;
      if !self.pending.swap(false, Ordering::SeqCst) {
        break;
      }
      // A coalesced rerun was requested manually, not by the interval.
      is_background = false;
    }
    self.checking.store(false, Ordering::SeqCst);
  }

  async fn run_once(&self, is_background: bool) {
    if self.cache_cleared.swap(false, Ordering::SeqCst) {
      self.discovery.clear_cache().await;
    }

    match self.discovery.discover_and_check().await {
      Ok(mut result) => {
        let now = Utc::now();
        result.last_check = Some(now);
        result.next_check = Some(now + self.check_interval);
        let mut state = self.state.write().await;
        if is_background {
          state.last_background_run = Some(now);
          result.last_background_run = Some(now);
        } else {
          result.last_background_run = state.last_background_run;
        }
        state.last_check = Some(now);
        state.result = result;
        drop(state);
        self.bus.publish(Event::new(EventPayload::ContainerUpdated(
          ContainerUpdatedPayload {
            container_id: None,
            container_name: String::new(),
            operation_id: None,
            status: ContainerUpdatedStatus::CheckComplete,
          },
        )));
      }
      Err(e) => {
        tracing::warn!("background discovery failed: {e}");
        // Retain the previous result; publish nothing.
      }
    }
  }

  /// Returns a deep copy so callers can't race on the shared snapshot.
  pub async fn get_cached_results(
    &self,
  ) -> (DiscoveryResult, Option<DateTime<Utc>>, Option<DateTime<Utc>>, bool) {
    let state = self.state.read().await;
    let mut result = state.result.clone();
    result.checking = self.checking.load(Ordering::SeqCst);
    (
      result,
      state.last_check,
      state.last_background_run,
      self.checking.load(Ordering::SeqCst),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    bus::EventBus,
    ports::{ComposeFile, ComposeService, ContainerRuntime},
  };
  use async_trait::async_trait;
  use docksmith_types::{Container, ImageRef};
  use std::sync::atomic::AtomicUsize;

  struct EmptyRuntime {
    calls: AtomicUsize,
  }

  #[async_trait]
  impl ContainerRuntime for EmptyRuntime {
    async fn list_containers(
      &self,
    ) -> Result<Vec<Container>, crate::error::PortError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(20)).await;
      Ok(Vec::new())
    }
    async fn inspect_container(
      &self,
      _id: &str,
    ) -> Result<Container, crate::error::PortError> {
      unimplemented!()
    }
    async fn start_container(
      &self,
      _id: &str,
    ) -> Result<(), crate::error::PortError> {
      unimplemented!()
    }
    async fn stop_container(
      &self,
      _id: &str,
      _timeout: Duration,
    ) -> Result<(), crate::error::PortError> {
      unimplemented!()
    }
    async fn restart_container(
      &self,
      _id: &str,
      _timeout: Duration,
    ) -> Result<(), crate::error::PortError> {
      unimplemented!()
    }
    async fn remove_container(
      &self,
      _id: &str,
      _force: bool,
    ) -> Result<(), crate::error::PortError> {
      unimplemented!()
    }
    async fn pull_image(
      &self,
      _image_ref: &ImageRef,
    ) -> Result<(), crate::error::PortError> {
      unimplemented!()
    }
    async fn recreate_container(
      &self,
      _name: &str,
      _image_ref: &ImageRef,
      _labels: &std::collections::BTreeMap<String, String>,
    ) -> Result<Container, crate::error::PortError> {
      unimplemented!()
    }
  }

  struct NoCompose;
  #[async_trait]
  impl ComposeFile for NoCompose {
    async fn load(&self, _path: &str) -> Result<(), crate::error::PortError> {
      Ok(())
    }
    async fn find_service_by_container_name(
      &self,
      _path: &str,
      _name: &str,
    ) -> Result<ComposeService, crate::error::PortError> {
      Err(crate::error::PortError::NotFound("no compose".into()))
    }
    async fn set_label(
      &self,
      _path: &str,
      _service: &str,
      _key: &str,
      _value: &str,
    ) -> Result<(), crate::error::PortError> {
      Ok(())
    }
    async fn remove_label(
      &self,
      _path: &str,
      _service: &str,
      _key: &str,
    ) -> Result<(), crate::error::PortError> {
      Ok(())
    }
    async fn set_image(
      &self,
      _path: &str,
      _service: &str,
      _image_ref: &ImageRef,
    ) -> Result<(), crate::error::PortError> {
      Ok(())
    }
    async fn save(&self, _path: &str) -> Result<(), crate::error::PortError> {
      Ok(())
    }
  }

  fn make_checker() -> (Arc<BackgroundChecker>, Arc<EmptyRuntime>) {
    let runtime = Arc::new(EmptyRuntime { calls: AtomicUsize::new(0) });
    let bus = Arc::new(EventBus::default());
    let registry_client = Arc::new(NeverCalledRegistry);
    let registry = Arc::new(crate::registry_cache::RegistryCache::new(
      registry_client,
      Duration::from_secs(60),
    ));
    let discovery = Arc::new(DiscoveryOrchestrator::new(
      runtime.clone(),
      registry,
      Arc::new(NoCompose),
      bus.clone(),
      Default::default(),
    ));
    (
      BackgroundChecker::new(discovery, bus, Duration::from_secs(3600)),
      runtime,
    )
  }

  struct NeverCalledRegistry;
  #[async_trait]
  impl crate::ports::RegistryClient for NeverCalledRegistry {
    async fn list_tags(
      &self,
      _image_ref: &ImageRef,
    ) -> Result<Vec<String>, crate::error::PortError> {
      Ok(Vec::new())
    }
    async fn resolve_manifest(
      &self,
      _image_ref: &ImageRef,
      _tag: &str,
    ) -> Result<String, crate::error::PortError> {
      Ok(String::new())
    }
  }

  #[tokio::test]
  async fn concurrent_triggers_collapse_into_one_extra_run() {
    let (checker, runtime) = make_checker();
    // Kick off one run, then fire several triggers while it's in flight.
    checker.trigger_check();
    tokio::time::sleep(Duration::from_millis(5)).await;
    for _ in 0..5 {
      checker.trigger_check();
    }
    // Allow the in-flight run (20ms) plus exactly one coalesced rerun to
    // finish.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runtime.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn cached_results_are_a_deep_copy() {
    let (checker, _runtime) = make_checker();
    checker.trigger_check();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (mut first, ..) = checker.get_cached_results().await;
    first.counts.total_checked = 999;
    let (second, ..) = checker.get_cached_results().await;
    assert_eq!(second.counts.total_checked, 0);
  }
}
