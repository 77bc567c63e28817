//! Shared data model for docksmith: the containers, labels, discovery
//! snapshots, operations, and events the core orchestration components
//! pass between each other.

pub mod container;
pub mod discovery;
pub mod event;
pub mod labels;
pub mod operation;

pub use container::{Container, ContainerHealth, ContainerState, ImageRef};
pub use discovery::{
  ChangeType, ContainerInfo, ContainerStatus, DiscoveryCounts,
  DiscoveryResult, Stack,
};
pub use event::{
  CheckProgressPayload, ContainerUpdatedPayload, ContainerUpdatedStatus,
  Event, EventPayload, EventType, UpdateProgressPayload,
};
pub use labels::{LabelAssignment, LabelError, ManagedLabels, VersionPin};
pub use operation::{
  Operation, OperationPayload, OperationStatus, OperationType, Stage,
};
