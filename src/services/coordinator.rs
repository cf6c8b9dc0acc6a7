//! Sync coordinator
//!
//! Fans sync jobs out across distributions and versions:
//! - APT: one shared permit, versions strictly in request order
//! - YUM: a pool of permits, versions run as concurrent tasks
//!
//! Every requested (distribution, version) pair yields exactly one result.

use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::env::constants::YUM_DISPATCH_DELAY_MS;
use crate::config::{DistributionConfig, MirrorConfig, RepoType};
use crate::domain::sync::SyncResult;
use crate::infra::runtime::ContainerGateway;
use crate::services::sync::{engine_for, MonitorSettings, SyncJob};

/// Admission and timing parameters, injected so tests can use tiny pools
#[derive(Clone, Debug)]
pub struct CoordinatorSettings {
    /// Shared by every APT job; holds a single permit
    pub apt_permits: Arc<Semaphore>,
    pub yum_permits: Arc<Semaphore>,
    pub monitor: MonitorSettings,
    /// Head start for YUM tasks in a mixed request
    pub yum_dispatch_delay: Duration,
}

impl CoordinatorSettings {
    pub fn new(yum_pool_size: usize, monitor: MonitorSettings) -> Self {
        Self {
            apt_permits: Arc::new(Semaphore::new(1)),
            yum_permits: Arc::new(Semaphore::new(yum_pool_size.max(1))),
            monitor,
            yum_dispatch_delay: Duration::from_millis(YUM_DISPATCH_DELAY_MS),
        }
    }

    pub fn from_config(config: &MirrorConfig) -> Self {
        Self::new(
            config.max_concurrent_syncs,
            MonitorSettings {
                poll_interval: config.poll_interval(),
                deadline: config.sync_timeout(),
            },
        )
    }
}

type JobKey = (String, RepoType);

/// Runs sync jobs under the per-ecosystem concurrency policy
#[derive(Clone)]
pub struct SyncCoordinator {
    config: Arc<MirrorConfig>,
    gateway: Arc<dyn ContainerGateway>,
    settings: CoordinatorSettings,
    jobs: Arc<Mutex<HashMap<JobKey, Arc<SyncJob>>>>,
    cancel: CancellationToken,
}

impl SyncCoordinator {
    pub fn new(
        config: Arc<MirrorConfig>,
        gateway: Arc<dyn ContainerGateway>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            config,
            gateway,
            settings,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Token that stops every in-flight job when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of jobs created so far
    pub fn cached_jobs(&self) -> usize {
        match self.jobs.lock() {
            Ok(jobs) => jobs.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Cached job for the distribution, created on first use
    fn job_for(&self, dist: &DistributionConfig) -> Arc<SyncJob> {
        let key = (dist.name.clone(), dist.repo_type);
        let mut jobs = match self.jobs.lock() {
            Ok(jobs) => jobs,
            Err(poisoned) => poisoned.into_inner(),
        };

        jobs.entry(key)
            .or_insert_with(|| {
                // Distribution proxy wins over the global one unless it sets nothing
                let effective = DistributionConfig {
                    proxy: dist
                        .proxy
                        .clone()
                        .filter(|proxy| !proxy.is_empty())
                        .or_else(|| self.config.proxy.clone()),
                    ..dist.clone()
                };
                Arc::new(SyncJob::new(
                    engine_for(effective),
                    self.gateway.clone(),
                    self.config.distribution_path(dist),
                    self.settings.monitor,
                ))
            })
            .clone()
    }

    /// Sync the requested versions (all configured versions when `None` or empty)
    pub async fn sync_distribution(
        &self,
        dist: &DistributionConfig,
        versions: Option<&[String]>,
    ) -> Vec<SyncResult> {
        if !dist.enabled {
            warn!(distribution = %dist.name, "Distribution is disabled, skipping sync");
            return Vec::new();
        }

        let versions = resolve_versions(dist, versions);
        let job = self.job_for(dist);
        info!(
            distribution = %dist.name,
            repo_type = %dist.repo_type,
            versions = ?versions,
            "Starting distribution sync"
        );

        match dist.repo_type {
            RepoType::Apt => self.sync_apt(&job, &versions).await,
            RepoType::Yum => {
                let handles = versions
                    .into_iter()
                    .map(|version| self.spawn_yum(job.clone(), version))
                    .collect();
                collect_yum(handles).await
            }
        }
    }

    /// Sync several distributions at once
    ///
    /// YUM versions are dispatched as tasks first, then APT distributions run
    /// one after another, then the YUM tasks are awaited. Results list APT
    /// first, then YUM, then names missing from the configuration.
    pub async fn sync_multiple_distributions(
        &self,
        request: &BTreeMap<String, Vec<String>>,
    ) -> Vec<SyncResult> {
        let mut apt_work = Vec::new();
        let mut yum_handles = Vec::new();
        let mut unknown = Vec::new();

        for (name, versions) in request {
            let dist = match self.config.distribution(name) {
                Ok(dist) => dist,
                Err(e) => {
                    error!(distribution = %name, "Distribution not found in configuration");
                    unknown.extend(
                        unique_in_order(versions)
                            .iter()
                            .map(|version| SyncResult::failed_for(name, version, e.to_string())),
                    );
                    continue;
                }
            };

            if !dist.enabled {
                warn!(distribution = %name, "Distribution is disabled, skipping sync");
                continue;
            }

            let versions = resolve_versions(dist, Some(versions.as_slice()));
            match dist.repo_type {
                RepoType::Apt => apt_work.push((self.job_for(dist), versions)),
                RepoType::Yum => {
                    let job = self.job_for(dist);
                    for version in versions {
                        yum_handles.push(self.spawn_yum(job.clone(), version));
                    }
                }
            }
        }

        info!(
            apt_distributions = apt_work.len(),
            yum_jobs = yum_handles.len(),
            "Dispatching multi-distribution sync"
        );

        if !yum_handles.is_empty() && !apt_work.is_empty() {
            tokio::time::sleep(self.settings.yum_dispatch_delay).await;
        }

        let mut results = Vec::new();
        for (job, versions) in &apt_work {
            results.extend(self.sync_apt(job, versions).await);
        }
        results.extend(collect_yum(yum_handles).await);
        results.extend(unknown);
        results
    }

    /// Sync every enabled distribution with its configured versions
    pub async fn sync_all(&self) -> Vec<SyncResult> {
        let request: BTreeMap<String, Vec<String>> = self
            .config
            .enabled_distributions()
            .map(|d| (d.name.clone(), Vec::new()))
            .collect();
        self.sync_multiple_distributions(&request).await
    }

    /// One version at a time; each runs as its own task holding the APT permit
    async fn sync_apt(&self, job: &Arc<SyncJob>, versions: &[String]) -> Vec<SyncResult> {
        let mut results = Vec::with_capacity(versions.len());
        for version in versions {
            let distribution = &job.distribution().name;
            let permit = match self.settings.apt_permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    results.push(SyncResult::failed_for(distribution, version, "Sync permits closed"));
                    continue;
                }
            };

            let task_job = job.clone();
            let task_version = version.clone();
            let cancel = self.cancel.clone();
            let joined = tokio::spawn(async move {
                let _permit = permit;
                task_job.sync_version(&task_version, &cancel).await
            })
            .await;

            results.push(match joined {
                Ok(result) => result,
                Err(e) => task_failed(distribution, version, e),
            });
        }
        results
    }

    fn spawn_yum(&self, job: Arc<SyncJob>, version: String) -> (String, String, JoinHandle<SyncResult>) {
        let permits = self.settings.yum_permits.clone();
        let cancel = self.cancel.clone();
        let distribution = job.distribution().name.clone();
        let task_version = version.clone();

        let handle = tokio::spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => job.sync_version(&task_version, &cancel).await,
                Err(_) => SyncResult::failed_for(
                    &job.distribution().name,
                    &task_version,
                    "Sync permits closed",
                ),
            }
        });
        (distribution, version, handle)
    }
}

/// Requested versions, or the configured ones; repeats are dropped
fn resolve_versions(dist: &DistributionConfig, versions: Option<&[String]>) -> Vec<String> {
    match versions {
        Some(versions) if !versions.is_empty() => unique_in_order(versions),
        _ => unique_in_order(&dist.versions),
    }
}

/// Each version is scheduled once; two jobs for the same version would share a container name
fn unique_in_order(versions: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    versions
        .iter()
        .filter(|version| seen.insert(version.as_str()))
        .cloned()
        .collect()
}

fn task_failed(distribution: &str, version: &str, e: JoinError) -> SyncResult {
    error!(distribution = %distribution, version = %version, error = %e, "Sync task crashed");
    SyncResult::failed_for(distribution, version, format!("Sync task failed: {}", e))
}

/// Await YUM tasks in dispatch order; a crashed task becomes a failed result
async fn collect_yum(handles: Vec<(String, String, JoinHandle<SyncResult>)>) -> Vec<SyncResult> {
    let (keys, handles): (Vec<_>, Vec<_>) = handles
        .into_iter()
        .map(|(dist, version, handle)| ((dist, version), handle))
        .unzip();

    join_all(handles)
        .await
        .into_iter()
        .zip(keys)
        .map(|(joined, (dist, version))| match joined {
            Ok(result) => result,
            Err(e) => task_failed(&dist, &version, e),
        })
        .collect()
}
