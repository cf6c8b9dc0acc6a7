//! Mirror configuration
//!
//! Read-only input of the sync engine. Loaded from YAML; a missing file means
//! the built-in defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::distribution::{DistributionConfig, ProxySettings, RepoType};
use crate::config::env::constants::{
    DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_MAX_CONCURRENT_SYNCS, DEFAULT_POLL_INTERVAL_SECS,
};
use crate::error::ConfigError;

/// Top-level configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub apt_path: PathBuf,
    pub yum_path: PathBuf,
    /// Runtime command line, e.g. `podman` or `sudo docker`
    pub container_runtime: String,
    /// Size of the YUM admission pool
    pub max_concurrent_syncs: usize,
    pub poll_interval_secs: u64,
    /// Overall deadline for one version sync; unbounded when absent
    pub sync_timeout_secs: Option<u64>,
    /// Timeout for a single runtime CLI call
    pub command_timeout_secs: u64,
    pub proxy: Option<ProxySettings>,
    pub distributions: BTreeMap<String, DistributionConfig>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            apt_path: PathBuf::from("/srv/mirror/apt"),
            yum_path: PathBuf::from("/srv/mirror/yum"),
            container_runtime: "docker".to_string(),
            max_concurrent_syncs: DEFAULT_MAX_CONCURRENT_SYNCS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            sync_timeout_secs: None,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            proxy: None,
            distributions: default_distributions(),
        }
    }
}

impl MirrorConfig {
    /// Default location: `$XDG_CONFIG_HOME/linux-mirrors/config.yaml`
    pub fn default_path() -> PathBuf {
        let config_home = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
            .unwrap_or_else(|| PathBuf::from(".config"));
        config_home.join("linux-mirrors").join("config.yaml")
    }

    /// Load from `path`, falling back to defaults if the file does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content, &path.display().to_string())
    }

    /// Parse, normalize and validate a YAML document
    pub fn from_yaml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let mut config: MirrorConfig =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: origin.to_string(),
                source,
            })?;

        for (key, dist) in config.distributions.iter_mut() {
            if dist.name.is_empty() {
                dist.name = key.clone();
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.container_runtime.split_whitespace().next().is_none() {
            return Err(ConfigError::Invalid("container_runtime is empty".to_string()));
        }
        if self.max_concurrent_syncs == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_syncs must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }

        for (key, dist) in &self.distributions {
            if dist.name.is_empty() || dist.name.contains(['/', '\\']) || dist.name == ".." {
                return Err(ConfigError::Invalid(format!(
                    "invalid distribution name '{}'",
                    dist.name
                )));
            }
            if &dist.name != key {
                return Err(ConfigError::Invalid(format!(
                    "distribution '{}' is listed under key '{}'",
                    dist.name, key
                )));
            }
        }
        Ok(())
    }

    pub fn distribution(&self, name: &str) -> Result<&DistributionConfig, ConfigError> {
        self.distributions
            .get(name)
            .ok_or_else(|| ConfigError::UnknownDistribution(name.to_string()))
    }

    pub fn enabled_distributions(&self) -> impl Iterator<Item = &DistributionConfig> {
        self.distributions.values().filter(|d| d.enabled)
    }

    /// Host directory holding the mirror of `dist`
    pub fn distribution_path(&self, dist: &DistributionConfig) -> PathBuf {
        match dist.repo_type {
            RepoType::Apt => self.apt_path.join(&dist.name),
            RepoType::Yum => self.yum_path.join(&dist.name),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_secs.map(Duration::from_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn default_distributions() -> BTreeMap<String, DistributionConfig> {
    let debian = DistributionConfig {
        versions: strings(&["bullseye", "bookworm", "trixie"]),
        mirror_urls: strings(&["http://deb.debian.org/debian/"]),
        components: strings(&["main", "contrib", "non-free"]),
        architectures: strings(&["amd64", "arm64"]),
        ..DistributionConfig::new("debian", RepoType::Apt)
    };
    let ubuntu = DistributionConfig {
        versions: strings(&["focal", "jammy", "mantic", "noble"]),
        mirror_urls: strings(&["http://archive.ubuntu.com/ubuntu/"]),
        components: strings(&["main", "restricted", "universe", "multiverse"]),
        architectures: strings(&["amd64", "arm64"]),
        ..DistributionConfig::new("ubuntu", RepoType::Apt)
    };
    let kali = DistributionConfig {
        versions: strings(&["kali-rolling"]),
        mirror_urls: strings(&["http://http.kali.org/kali/"]),
        components: strings(&["main", "contrib", "non-free"]),
        architectures: strings(&["amd64", "arm64"]),
        ..DistributionConfig::new("kali", RepoType::Apt)
    };
    let rocky = DistributionConfig {
        versions: strings(&["8", "9"]),
        mirror_urls: strings(&["https://download.rockylinux.org/pub/rocky/"]),
        architectures: strings(&["x86_64", "aarch64"]),
        ..DistributionConfig::new("rocky", RepoType::Yum)
    };
    // Requires a subscription
    let rhel = DistributionConfig {
        versions: strings(&["8", "9"]),
        mirror_urls: strings(&["https://cdn.redhat.com/content/dist/rhel/"]),
        architectures: strings(&["x86_64", "aarch64"]),
        enabled: false,
        ..DistributionConfig::new("rhel", RepoType::Yum)
    };

    [debian, ubuntu, kali, rocky, rhel]
        .into_iter()
        .map(|d| (d.name.clone(), d))
        .collect()
}
