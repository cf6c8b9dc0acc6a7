//! linux-mirrors - local APT/YUM repository mirrors
//!
//! Each (distribution, version) sync runs in a short-lived docker/podman
//! container; this crate builds the sync commands, drives the containers and
//! collects one `SyncResult` per requested version.

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

pub use config::{DistributionConfig, MirrorConfig, RepoType};
pub use domain::{SyncResult, SyncStatus};
pub use infra::{CliGateway, ContainerGateway};
pub use services::{CoordinatorSettings, SyncCoordinator};
