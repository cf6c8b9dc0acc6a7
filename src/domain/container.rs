//! Container domain models

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Runtime-reported container state, normalized across docker and podman
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Oom,
    Killed,
    /// The container no longer exists (removed externally)
    NotFound,
    /// The runtime could not be queried
    Error,
    /// Anything else the runtime reports
    Other(String),
}

impl ContainerState {
    /// Map a runtime status string (`State.Status` / `ps` state)
    pub fn from_runtime(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "created" | "configured" | "initialized" => ContainerState::Created,
            "running" | "up" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            // podman reports `stopped` for containers that exited after `stop`
            "exited" | "stopped" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            "oom" | "oomkilled" => ContainerState::Oom,
            "killed" => ContainerState::Killed,
            "not-found" | "not found" => ContainerState::NotFound,
            "error" => ContainerState::Error,
            other => ContainerState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
            ContainerState::Oom => "oom",
            ContainerState::Killed => "killed",
            ContainerState::NotFound => "not-found",
            ContainerState::Error => "error",
            ContainerState::Other(s) => s,
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one status poll
///
/// Always fetched fresh from the runtime; never cached between polls.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ContainerStatus {
    pub state: ContainerState,
    /// Short (12 character) id
    pub id: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub created: Option<String>,
    pub started: Option<String>,
    pub finished: Option<String>,
    pub exit_code: Option<i64>,
    /// Set for `NotFound` and `Error`
    pub error: Option<String>,
}

impl ContainerStatus {
    pub fn new(state: ContainerState) -> Self {
        Self {
            state,
            id: None,
            name: None,
            image: None,
            created: None,
            started: None,
            finished: None,
            exit_code: None,
            error: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            error: Some("Container not found".to_string()),
            ..Self::new(ContainerState::NotFound)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(ContainerState::Error)
        }
    }
}

/// Container summary for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    /// RFC 3339 when the runtime gave a parseable time
    pub created: String,
}

/// Host directory mounted into a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl VolumeBinding {
    pub fn read_write(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    /// `--volume` argument value
    pub fn to_arg(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            mode
        )
    }
}

/// Everything needed to create a sync container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Shell command run with `sh -c`
    pub command: String,
    pub volumes: Vec<VolumeBinding>,
    pub environment: Vec<(String, String)>,
}
