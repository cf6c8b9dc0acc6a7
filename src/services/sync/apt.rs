//! APT mirroring with apt-mirror

use tracing::error;

use super::shell::{self, quote};
use super::{validate_common, SyncEngine};
use crate::config::env::constants::CONTAINER_MIRROR_PATH;
use crate::config::DistributionConfig;

const DEBIAN_SECURITY_URL: &str = "http://security.debian.org/debian-security";

/// Debian releases with update and backport suites; all but buster also have
/// `{codename}-security` on the security archive
const DEBIAN_STABLE: &[&str] = &["buster", "bullseye", "bookworm", "trixie"];

pub struct AptSyncEngine {
    config: DistributionConfig,
}

impl AptSyncEngine {
    pub fn new(config: DistributionConfig) -> Self {
        Self { config }
    }

    fn list_path() -> String {
        format!("{}/apt-mirror.list", CONTAINER_MIRROR_PATH)
    }

    /// (mirror url, suite) pairs to mirror for `version`
    fn repositories(&self, version: &str) -> Vec<(String, String)> {
        let extra: &[&str] = match self.config.name.as_str() {
            "ubuntu" => &["updates", "security", "backports"],
            "debian" if DEBIAN_STABLE.contains(&version) => &["updates", "backports"],
            _ => &[],
        };

        let mut repos = Vec::new();
        for url in &self.config.mirror_urls {
            repos.push((url.clone(), version.to_string()));
            for suffix in extra {
                repos.push((url.clone(), format!("{}-{}", version, suffix)));
            }
        }
        if self.has_debian_security(version) {
            repos.push((
                DEBIAN_SECURITY_URL.to_string(),
                format!("{}-security", version),
            ));
        }
        repos
    }

    fn has_debian_security(&self, version: &str) -> bool {
        self.config.name == "debian" && DEBIAN_STABLE.contains(&version) && version != "buster"
    }

    /// Contents of the apt-mirror list file
    pub fn mirror_list(&self, version: &str) -> Vec<String> {
        let base = CONTAINER_MIRROR_PATH;
        let default_arch = self
            .config
            .architectures
            .first()
            .map(String::as_str)
            .unwrap_or("amd64");

        let mut lines = vec![
            format!("set base_path {}", base),
            format!("set mirror_path {}/mirror", base),
            format!("set skel_path {}/skel", base),
            format!("set var_path {}/var", base),
            format!("set cleanscript {}/var/clean.sh", base),
            format!("set defaultarch {}", default_arch),
            format!("set postmirror_script {}/var/postmirror.sh", base),
            "set run_postmirror 0".to_string(),
            "set nthreads 20".to_string(),
            "set _tilde 0".to_string(),
        ];

        if let Some(proxy) = &self.config.proxy {
            if proxy.http.is_some() || proxy.https.is_some() {
                lines.push("set use_proxy on".to_string());
            }
            if let Some(http) = &proxy.http {
                lines.push(format!("set http_proxy {}", http));
            }
            if let Some(https) = &proxy.https {
                lines.push(format!("set https_proxy {}", https));
            }
        }
        lines.push(String::new());

        let components = self.config.components.join(" ");
        let repositories = self.repositories(version);
        for (url, suite) in &repositories {
            for arch in &self.config.architectures {
                lines.push(format!("deb-{} {} {} {}", arch, url, suite, components));
            }
            if self.config.include_source_packages {
                lines.push(format!("deb-src {} {} {}", url, suite, components));
            }
        }

        lines.push(String::new());
        for url in &self.config.mirror_urls {
            lines.push(format!("clean {}", url));
        }
        if self.has_debian_security(version) {
            lines.push(format!("clean {}", DEBIAN_SECURITY_URL));
        }
        lines
    }
}

impl SyncEngine for AptSyncEngine {
    fn distribution(&self) -> &DistributionConfig {
        &self.config
    }

    fn validate_config(&self) -> bool {
        if self.config.components.is_empty() {
            error!(distribution = %self.config.name, "Missing required field for APT sync: components");
            return false;
        }
        validate_common(&self.config)
    }

    fn generate_sync_command(&self, version: &str) -> String {
        let list = Self::list_path();
        format!(
            "{} && apt-mirror {}",
            shell::write_file(&list, &self.mirror_list(version)),
            quote(&list)
        )
    }
}
