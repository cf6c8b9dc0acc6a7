//! Error types
//!
//! Faults are typed at the seams where they can occur. Sync jobs never return
//! these to their callers: `SyncJob::sync_version` folds them into a failed
//! `SyncResult`.

use std::time::Duration;
use thiserror::Error;

/// Failure to run a container runtime CLI invocation
#[derive(Debug, Error)]
pub enum CommandError {
    /// The process could not be spawned
    #[error("Failed to spawn command `{program}`: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process did not finish in time
    #[error("Command `{program}` timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    /// Waiting for the process failed
    #[error("Failed to wait for command: {0}")]
    WaitFailed(#[source] std::io::Error),
}

/// Container runtime gateway errors
///
/// Variants that come from a rejected CLI call carry the runtime's stderr.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Container runtime '{runtime}' not available: {reason}")]
    RuntimeUnavailable { runtime: String, reason: String },

    #[error("Image build failed for {image}: {stderr}")]
    Build { image: String, stderr: String },

    #[error("Container creation failed for {name}: {stderr}")]
    Creation { name: String, stderr: String },

    #[error("Container start failed for {container_id}: {stderr}")]
    Start { container_id: String, stderr: String },

    #[error("Container stop failed for {container_id}: {stderr}")]
    Stop { container_id: String, stderr: String },

    #[error("Container removal failed for {container_id}: {stderr}")]
    Remove { container_id: String, stderr: String },

    #[error("Failed to fetch logs for {container_id}: {stderr}")]
    Logs { container_id: String, stderr: String },

    #[error("Failed to list containers: {0}")]
    List(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a version sync ends in `failed`
///
/// The display text becomes `SyncResult::error`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid configuration for sync")]
    InvalidConfig,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Container terminated abnormally ({state})")]
    ContainerFailed { state: String, logs: String },

    #[error("Container was removed externally before sync completed")]
    ContainerRemoved,

    #[error("Container status query failed: {0}")]
    StatusQuery(String),

    #[error("Sync timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Container logs captured before the failure, if any
    pub fn into_logs(self) -> String {
        match self {
            SyncError::ContainerFailed { logs, .. } => logs,
            _ => String::new(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error loading config from {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Unknown repository type: {0}")]
    UnknownRepoType(String),

    #[error("Unknown distribution: {0}")]
    UnknownDistribution(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
