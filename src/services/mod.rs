//! Services
//!
//! Sync jobs and the coordinator that schedules them

pub mod coordinator;
pub mod sync;

pub use coordinator::{CoordinatorSettings, SyncCoordinator};
pub use sync::{MonitorSettings, SyncEngine, SyncJob};
