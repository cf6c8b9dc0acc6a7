//! Configuration
//!
//! Mirror/distribution definitions and environment overrides

pub mod distribution;
pub mod env;
pub mod mirror;

pub use distribution::{DistributionConfig, ProxySettings, RepoType};
pub use mirror::MirrorConfig;
