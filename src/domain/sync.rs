//! Sync domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal state of a version sync
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SyncStatus::Completed)
    }
}

/// Outcome of one (distribution, version) sync
///
/// Exactly one is produced per requested pair, however the job ended.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SyncResult {
    pub distribution: String,
    pub version: String,
    pub status: SyncStatus,
    pub container_id: Option<String>,
    pub logs: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncResult {
    /// A failure for a pair that never got a job handle
    pub fn failed_for(distribution: &str, version: &str, error: impl Into<String>) -> Self {
        SyncJobHandle::new(distribution, version).fail(error, String::new())
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Per-call state of one `sync_version` invocation
///
/// Owned by that call alone; consumed into the `SyncResult`.
#[derive(Clone, Debug)]
pub struct SyncJobHandle {
    pub distribution: String,
    pub version: String,
    pub container_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl SyncJobHandle {
    pub fn new(distribution: &str, version: &str) -> Self {
        Self {
            distribution: distribution.to_string(),
            version: version.to_string(),
            container_id: None,
            started_at: Utc::now(),
        }
    }

    pub fn record_container(&mut self, container_id: impl Into<String>) {
        self.container_id = Some(container_id.into());
    }

    pub fn complete(self, logs: String) -> SyncResult {
        self.finish(SyncStatus::Completed, logs, None)
    }

    pub fn fail(self, error: impl Into<String>, logs: String) -> SyncResult {
        self.finish(SyncStatus::Failed, logs, Some(error.into()))
    }

    fn finish(self, status: SyncStatus, logs: String, error: Option<String>) -> SyncResult {
        SyncResult {
            distribution: self.distribution,
            version: self.version,
            status,
            container_id: self.container_id,
            logs,
            error,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_as_str() {
        assert_eq!(SyncStatus::Completed.as_str(), "completed");
        assert_eq!(SyncStatus::Failed.as_str(), "failed");
        assert!(SyncStatus::Completed.is_success());
        assert!(!SyncStatus::Failed.is_success());
    }

    #[test]
    fn test_handle_lifecycle() {
        let mut handle = SyncJobHandle::new("debian", "bookworm");
        assert!(handle.container_id.is_none());

        handle.record_container("abc123");
        let result = handle.complete("done".to_string());
        assert_eq!(result.distribution, "debian");
        assert_eq!(result.version, "bookworm");
        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(result.container_id.as_deref(), Some("abc123"));
        assert_eq!(result.logs, "done");
        assert!(result.error.is_none());
        assert!(result.duration_ms() >= 0);
    }

    #[test]
    fn test_failed_for() {
        let result = SyncResult::failed_for("rocky", "9", "boom");
        assert_eq!(result.status, SyncStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.container_id.is_none());
        assert!(result.logs.is_empty());
    }

    #[test]
    fn test_result_serializes_status_lowercase() {
        let result = SyncJobHandle::new("rocky", "9").complete(String::new());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["distribution"], "rocky");
    }
}
