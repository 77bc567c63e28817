//! The operation orchestration and event/state machinery for a fleet
//! control plane: discovery, registry caching, lifecycle operations, and
//! the event bus that streams their progress.

pub mod bus;
pub mod checker;
pub mod classify;
pub mod compose_lock;
pub mod discovery;
pub mod error;
pub mod label;
pub mod ports;
pub mod precheck;
pub mod registry_cache;
pub mod restart;
pub mod sse;
pub mod update;

pub use bus::{EventBus, Publisher, Subscription, Topic};
pub use checker::BackgroundChecker;
pub use discovery::{DiscoveryConfig, DiscoveryOrchestrator};
pub use error::{OpError, PortError};
pub use label::LabelTransaction;
pub use registry_cache::RegistryCache;
pub use restart::{RestartConfig, RestartCoordinator, RestartReport};
pub use update::{UpdateConfig, UpdateOrchestrator};
