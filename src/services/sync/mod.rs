//! Sync jobs
//!
//! A `SyncEngine` knows how to mirror one ecosystem (APT or YUM) and turns a
//! version into a shell command. A `SyncJob` drives that command through the
//! container lifecycle:
//!
//! 1. validate the distribution and version
//! 2. ensure the image, create and start the container
//! 3. poll the container until it reaches a terminal state
//! 4. fold every outcome into a `SyncResult`

pub mod apt;
pub mod shell;
pub mod yum;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::env::constants::{
    CONTAINER_MIRROR_PATH, CONTAINER_NAME_PREFIX, DEFAULT_LOG_TAIL, DEFAULT_POLL_INTERVAL_SECS,
    STOP_TIMEOUT_SECS,
};
use crate::config::{DistributionConfig, RepoType};
use crate::domain::container::{ContainerSpec, ContainerState, VolumeBinding};
use crate::domain::sync::{SyncJobHandle, SyncResult};
use crate::error::SyncError;
use crate::infra::runtime::ContainerGateway;

pub use apt::AptSyncEngine;
pub use yum::YumSyncEngine;

/// Ecosystem-specific half of a sync job
pub trait SyncEngine: Send + Sync {
    fn distribution(&self) -> &DistributionConfig;

    /// Required fields present and safe to interpolate
    fn validate_config(&self) -> bool;

    /// Shell command run inside the container; pure and deterministic
    fn generate_sync_command(&self, version: &str) -> String;
}

/// Engine for the distribution's ecosystem
pub fn engine_for(config: DistributionConfig) -> Box<dyn SyncEngine> {
    match config.repo_type {
        RepoType::Apt => Box::new(AptSyncEngine::new(config)),
        RepoType::Yum => Box::new(YumSyncEngine::new(config)),
    }
}

/// Checks shared by both ecosystems
pub(crate) fn validate_common(config: &DistributionConfig) -> bool {
    let kind = config.repo_type.as_str().to_ascii_uppercase();
    if config.mirror_urls.is_empty() {
        error!(distribution = %config.name, "Missing required field for {} sync: mirror_urls", kind);
        return false;
    }
    if config.architectures.is_empty() {
        error!(distribution = %config.name, "Missing required field for {} sync: architectures", kind);
        return false;
    }
    if let Some(url) = config.mirror_urls.iter().find(|u| !shell::is_valid_mirror_url(u)) {
        error!(distribution = %config.name, url = %url, "Rejected mirror URL");
        return false;
    }
    if let Some(token) = config
        .architectures
        .iter()
        .chain(&config.components)
        .find(|t| !shell::is_safe_token(t))
    {
        error!(distribution = %config.name, value = %token, "Rejected architecture or component name");
        return false;
    }
    if let Some(proxy) = &config.proxy {
        let values = [&proxy.http, &proxy.https, &proxy.no_proxy];
        if values
            .iter()
            .filter_map(|v| v.as_deref())
            .any(|v| v.chars().any(|c| c.is_whitespace() || c.is_control()))
        {
            error!(distribution = %config.name, "Rejected proxy setting");
            return false;
        }
    }
    true
}

/// Container name for a distribution version
///
/// Deterministic so a re-run replaces the previous container.
pub fn container_name(distribution: &str, version: &str) -> String {
    format!("{}{}-{}", CONTAINER_NAME_PREFIX, distribution, version)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Polling parameters of the monitor loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// Overall limit from the first poll; `None` polls until a terminal state
    pub deadline: Option<Duration>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            deadline: None,
        }
    }
}

/// Runs versions of one distribution through the container lifecycle
///
/// Shared between concurrent versions; per-call state lives in the
/// `SyncJobHandle` each `sync_version` call creates.
pub struct SyncJob {
    engine: Box<dyn SyncEngine>,
    gateway: Arc<dyn ContainerGateway>,
    host_path: PathBuf,
    monitor: MonitorSettings,
    log_tail: usize,
    image: OnceCell<String>,
}

impl SyncJob {
    pub fn new(
        engine: Box<dyn SyncEngine>,
        gateway: Arc<dyn ContainerGateway>,
        host_path: PathBuf,
        monitor: MonitorSettings,
    ) -> Self {
        Self {
            engine,
            gateway,
            host_path,
            monitor,
            log_tail: DEFAULT_LOG_TAIL,
            image: OnceCell::new(),
        }
    }

    pub fn distribution(&self) -> &DistributionConfig {
        self.engine.distribution()
    }

    pub fn validate_config(&self) -> bool {
        self.engine.validate_config()
    }

    pub fn generate_sync_command(&self, version: &str) -> String {
        self.engine.generate_sync_command(version)
    }

    /// Environment of the sync container
    pub fn environment(&self, version: &str) -> Vec<(String, String)> {
        let dist = self.distribution();
        let mut env = vec![
            ("DIST_NAME".to_string(), dist.name.clone()),
            ("DIST_VERSION".to_string(), version.to_string()),
            ("MIRROR_PATH".to_string(), CONTAINER_MIRROR_PATH.to_string()),
        ];
        if let Some(proxy) = &dist.proxy {
            env.extend(proxy.env_vars());
        }
        env
    }

    /// Sync one version; never fails, every fault becomes a failed result
    pub async fn sync_version(&self, version: &str, cancel: &CancellationToken) -> SyncResult {
        let mut handle = SyncJobHandle::new(&self.distribution().name, version);

        match self.run(&mut handle, cancel).await {
            Ok(logs) => {
                info!(
                    distribution = %handle.distribution,
                    version = %handle.version,
                    "Sync completed"
                );
                handle.complete(logs)
            }
            Err(e) => {
                error!(
                    distribution = %handle.distribution,
                    version = %handle.version,
                    container_id = ?handle.container_id,
                    error = %e,
                    "Sync failed"
                );
                let message = e.to_string();
                handle.fail(message, e.into_logs())
            }
        }
    }

    async fn run(
        &self,
        handle: &mut SyncJobHandle,
        cancel: &CancellationToken,
    ) -> Result<String, SyncError> {
        if !self.validate_config() || !shell::is_safe_token(&handle.version) {
            return Err(SyncError::InvalidConfig);
        }
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let command = self.generate_sync_command(&handle.version);
        let image = self
            .image
            .get_or_try_init(|| self.gateway.ensure_image(self.distribution()))
            .await?
            .clone();

        let spec = ContainerSpec {
            name: container_name(&handle.distribution, &handle.version),
            image,
            command,
            volumes: vec![VolumeBinding::read_write(
                self.host_path.clone(),
                CONTAINER_MIRROR_PATH,
            )],
            environment: self.environment(&handle.version),
        };

        let container_id = self.gateway.create_container(&spec).await?;
        handle.record_container(container_id.clone());
        self.gateway.start_container(&container_id).await?;
        info!(
            distribution = %handle.distribution,
            version = %handle.version,
            container_id = %container_id,
            "Sync container started"
        );

        self.monitor(&container_id, cancel).await
    }

    /// Poll until the container reaches a terminal state
    ///
    /// Returns the container logs on a clean exit.
    async fn monitor(
        &self,
        container_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SyncError> {
        let deadline = self.monitor.deadline.map(|limit| (Instant::now() + limit, limit));

        loop {
            let status = self.gateway.get_status(container_id).await;
            match status.state {
                ContainerState::Exited => {
                    debug!(container_id = %container_id, exit_code = ?status.exit_code, "Container exited");
                    return Ok(self.collect_logs(container_id).await);
                }
                ContainerState::Dead | ContainerState::Oom | ContainerState::Killed => {
                    let logs = self.collect_logs(container_id).await;
                    return Err(SyncError::ContainerFailed {
                        state: status.state.to_string(),
                        logs,
                    });
                }
                ContainerState::NotFound => return Err(SyncError::ContainerRemoved),
                ContainerState::Error => {
                    return Err(SyncError::StatusQuery(
                        status
                            .error
                            .unwrap_or_else(|| "unknown runtime error".to_string()),
                    ));
                }
                ContainerState::Created
                | ContainerState::Running
                | ContainerState::Paused
                | ContainerState::Restarting
                | ContainerState::Other(_) => {
                    debug!(container_id = %container_id, state = %status.state, "Sync in progress");
                }
            }

            let until_deadline = async {
                match deadline {
                    Some((at, _)) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(self.monitor.poll_interval) => {}
                _ = until_deadline => {
                    self.stop_quietly(container_id).await;
                    let limit = deadline.map(|(_, limit)| limit).unwrap_or_default();
                    return Err(SyncError::TimedOut(limit));
                }
                _ = cancel.cancelled() => {
                    self.stop_quietly(container_id).await;
                    return Err(SyncError::Cancelled);
                }
            }
        }
    }

    async fn collect_logs(&self, container_id: &str) -> String {
        match self.gateway.get_logs(container_id, self.log_tail).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!(container_id = %container_id, error = %e, "Failed to retrieve container logs");
                format!("Error retrieving logs: {}", e)
            }
        }
    }

    async fn stop_quietly(&self, container_id: &str) {
        let timeout = Duration::from_secs(STOP_TIMEOUT_SECS);
        if let Err(e) = self.gateway.stop_container(container_id, timeout).await {
            warn!(container_id = %container_id, error = %e, "Failed to stop container");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxySettings;
    use crate::domain::container::ContainerStatus;
    use crate::domain::sync::SyncStatus;
    use crate::infra::fake::{container_id_for, FakeGateway};

    fn debian() -> DistributionConfig {
        DistributionConfig {
            versions: vec!["bookworm".to_string()],
            mirror_urls: vec!["http://deb.debian.org/debian/".to_string()],
            components: vec!["main".to_string()],
            architectures: vec!["amd64".to_string()],
            ..DistributionConfig::new("debian", RepoType::Apt)
        }
    }

    fn job(config: DistributionConfig, gateway: Arc<FakeGateway>) -> SyncJob {
        job_with(config, gateway, MonitorSettings::default())
    }

    fn job_with(
        config: DistributionConfig,
        gateway: Arc<FakeGateway>,
        monitor: MonitorSettings,
    ) -> SyncJob {
        SyncJob::new(
            engine_for(config),
            gateway,
            PathBuf::from("/srv/mirror/apt/debian"),
            monitor,
        )
    }

    #[test]
    fn test_container_name() {
        assert_eq!(container_name("debian", "bookworm"), "linux-mirror-debian-bookworm");
        assert_eq!(container_name("rocky", "9.3"), "linux-mirror-rocky-9.3");
        assert_eq!(container_name("my dist", "a/b"), "linux-mirror-my-dist-a-b");
    }

    #[test]
    fn test_engine_factory() {
        let apt = engine_for(debian());
        assert_eq!(apt.distribution().repo_type, RepoType::Apt);
        assert!(apt.generate_sync_command("bookworm").contains("apt-mirror"));

        let yum = engine_for(DistributionConfig {
            mirror_urls: vec!["https://download.rockylinux.org/pub/rocky/".to_string()],
            architectures: vec!["x86_64".to_string()],
            ..DistributionConfig::new("rocky", RepoType::Yum)
        });
        assert!(yum.generate_sync_command("9").contains("dnf reposync"));
    }

    #[test]
    fn test_environment_includes_proxy() {
        let config = DistributionConfig {
            proxy: Some(ProxySettings {
                http: Some("http://proxy:3128".to_string()),
                https: None,
                no_proxy: None,
            }),
            ..debian()
        };
        let job = job(config, Arc::new(FakeGateway::new()));
        let env = job.environment("bookworm");
        assert_eq!(env[0], ("DIST_NAME".to_string(), "debian".to_string()));
        assert_eq!(env[1], ("DIST_VERSION".to_string(), "bookworm".to_string()));
        assert_eq!(env[2], ("MIRROR_PATH".to_string(), "/mirror".to_string()));
        assert!(env.contains(&("HTTP_PROXY".to_string(), "http://proxy:3128".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_version_completes() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script_states(
            "linux-mirror-debian-bookworm",
            &[ContainerState::Running, ContainerState::Exited],
        );
        gateway.set_logs("linux-mirror-debian-bookworm", "mirrored 42 packages\n");

        let job = job(debian(), gateway.clone());
        let result = job.sync_version("bookworm", &CancellationToken::new()).await;

        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(result.distribution, "debian");
        assert_eq!(result.version, "bookworm");
        assert_eq!(
            result.container_id.as_deref(),
            Some("id-linux-mirror-debian-bookworm")
        );
        assert_eq!(result.logs, "mirrored 42 packages\n");
        assert!(result.error.is_none());

        let specs = gateway.created_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].image, "localhost/linux-mirror-debian:latest");
        assert_eq!(specs[0].volumes[0].to_arg(), "/srv/mirror/apt/debian:/mirror:rw");
        assert_eq!(gateway.calls_for("get_status").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_creates_no_container() {
        let gateway = Arc::new(FakeGateway::new());
        let config = DistributionConfig {
            mirror_urls: Vec::new(),
            ..debian()
        };
        let result = job(config, gateway.clone())
            .sync_version("bookworm", &CancellationToken::new())
            .await;

        assert_eq!(result.status, SyncStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("Invalid configuration for sync"));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hostile_version_rejected() {
        let gateway = Arc::new(FakeGateway::new());
        let result = job(debian(), gateway.clone())
            .sync_version("bookworm; reboot", &CancellationToken::new())
            .await;

        assert_eq!(result.error.as_deref(), Some("Invalid configuration for sync"));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_state_mapping() {
        let cases: Vec<(ContainerStatus, SyncStatus, Option<&str>, bool)> = vec![
            (
                ContainerStatus::new(ContainerState::Exited),
                SyncStatus::Completed,
                None,
                true,
            ),
            (
                ContainerStatus::new(ContainerState::Dead),
                SyncStatus::Failed,
                Some("Container terminated abnormally (dead)"),
                true,
            ),
            (
                ContainerStatus::new(ContainerState::Oom),
                SyncStatus::Failed,
                Some("Container terminated abnormally (oom)"),
                true,
            ),
            (
                ContainerStatus::new(ContainerState::Killed),
                SyncStatus::Failed,
                Some("Container terminated abnormally (killed)"),
                true,
            ),
            (
                ContainerStatus::not_found(),
                SyncStatus::Failed,
                Some("Container was removed externally before sync completed"),
                false,
            ),
            (
                ContainerStatus::error("permission denied"),
                SyncStatus::Failed,
                Some("Container status query failed: permission denied"),
                false,
            ),
        ];

        for (status, expected, error, has_logs) in cases {
            let gateway = Arc::new(FakeGateway::new());
            gateway.script_statuses("linux-mirror-debian-bookworm", vec![status.clone()]);

            let result = job(debian(), gateway.clone())
                .sync_version("bookworm", &CancellationToken::new())
                .await;

            assert_eq!(result.status, expected, "state {}", status.state);
            assert_eq!(result.error.as_deref(), error, "state {}", status.state);
            assert_eq!(!result.logs.is_empty(), has_logs, "state {}", status.state);
            assert_eq!(
                gateway.calls_for("get_logs").len(),
                usize::from(has_logs),
                "state {}",
                status.state
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_terminal_states_keep_polling() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script_states(
            "linux-mirror-debian-bookworm",
            &[
                ContainerState::Created,
                ContainerState::Running,
                ContainerState::Paused,
                ContainerState::Restarting,
                ContainerState::Other("removing".to_string()),
                ContainerState::Exited,
            ],
        );

        let started = Instant::now();
        let result = job(debian(), gateway.clone())
            .sync_version("bookworm", &CancellationToken::new())
            .await;

        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(gateway.calls_for("get_status").len(), 6);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5 * 30) && elapsed < Duration::from_secs(5 * 30 + 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failure_skips_monitoring() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.fail_create("linux-mirror-debian-trixie", "name conflict");

        let result = job(debian(), gateway.clone())
            .sync_version("trixie", &CancellationToken::new())
            .await;

        assert_eq!(result.status, SyncStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("name conflict"));
        assert!(result.container_id.is_none());
        assert!(gateway.calls_for("get_status").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_keeps_container_id() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.fail_start("linux-mirror-debian-bookworm");

        let result = job(debian(), gateway.clone())
            .sync_version("bookworm", &CancellationToken::new())
            .await;

        assert_eq!(result.status, SyncStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("OCI runtime error"));
        assert_eq!(
            result.container_id.as_deref(),
            Some("id-linux-mirror-debian-bookworm")
        );
        assert!(gateway.calls_for("get_status").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_failure_fails_result() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.fail_image("debian");

        let result = job(debian(), gateway.clone())
            .sync_version("bookworm", &CancellationToken::new())
            .await;

        assert_eq!(result.status, SyncStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("build step failed"));
        assert!(gateway.calls_for("create_container").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_resolved_once_per_job() {
        let gateway = Arc::new(FakeGateway::new());
        let job = job(debian(), gateway.clone());
        let cancel = CancellationToken::new();

        job.sync_version("bookworm", &cancel).await;
        job.sync_version("trixie", &cancel).await;

        assert_eq!(gateway.calls_for("ensure_image").len(), 1);
        assert_eq!(gateway.calls_for("create_container").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_failure_does_not_fail_job() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.fail_logs("linux-mirror-debian-bookworm");

        let result = job(debian(), gateway.clone())
            .sync_version("bookworm", &CancellationToken::new())
            .await;

        assert_eq!(result.status, SyncStatus::Completed);
        assert!(result.logs.starts_with("Error retrieving logs: "));
        assert!(result.logs.contains("log driver unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_container() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script_states("linux-mirror-debian-bookworm", &[ContainerState::Running]);

        let monitor = MonitorSettings {
            poll_interval: Duration::from_secs(30),
            deadline: Some(Duration::from_secs(100)),
        };
        let started = Instant::now();
        let result = job_with(debian(), gateway.clone(), monitor)
            .sync_version("bookworm", &CancellationToken::new())
            .await;

        assert_eq!(result.status, SyncStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("Sync timed out after 100s"));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(100) && elapsed < Duration::from_secs(101));
        // polls at 0, 30, 60 and 90
        assert_eq!(gateway.calls_for("get_status").len(), 4);
        let stops = gateway.calls_for("stop_container");
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].target, container_id_for("linux-mirror-debian-bookworm"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_container() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script_states("linux-mirror-debian-bookworm", &[ContainerState::Running]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            trigger.cancel();
        });

        let result = job(debian(), gateway.clone())
            .sync_version("bookworm", &cancel)
            .await;

        assert_eq!(result.error.as_deref(), Some("Sync cancelled"));
        assert_eq!(gateway.calls_for("stop_container").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_creates_nothing() {
        let gateway = Arc::new(FakeGateway::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = job(debian(), gateway.clone())
            .sync_version("bookworm", &cancel)
            .await;

        assert_eq!(result.error.as_deref(), Some("Sync cancelled"));
        assert!(gateway.calls().is_empty());
    }
}
