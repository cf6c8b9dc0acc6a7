//! Domain models

pub mod container;
pub mod sync;

pub use container::{ContainerInfo, ContainerSpec, ContainerState, ContainerStatus, VolumeBinding};
pub use sync::{SyncJobHandle, SyncResult, SyncStatus};
