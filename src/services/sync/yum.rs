//! YUM/DNF mirroring with dnf reposync and createrepo_c

use super::shell::{self, quote};
use super::{validate_common, SyncEngine};
use crate::config::env::constants::CONTAINER_MIRROR_PATH;
use crate::config::DistributionConfig;

/// Repository components and directory layout of a major release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    components: &'static [&'static str],
    /// `{Component}/{arch}/os` instead of `{component}/{arch}`
    nested: bool,
}

fn layout(major: Option<u32>) -> Layout {
    match major {
        Some(m) if m >= 9 => Layout {
            components: &["BaseOS", "AppStream", "CRB", "extras"],
            nested: true,
        },
        Some(8) => Layout {
            components: &["BaseOS", "AppStream", "PowerTools", "extras"],
            nested: true,
        },
        _ => Layout {
            components: &["os", "updates", "extras"],
            nested: false,
        },
    }
}

/// Leading digits of a version such as `9`, `8.9` or `9-stream`
pub fn major_version(version: &str) -> Option<u32> {
    let digits: String = version.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

pub struct YumSyncEngine {
    config: DistributionConfig,
}

impl YumSyncEngine {
    pub fn new(config: DistributionConfig) -> Self {
        Self { config }
    }

    /// Configured architectures the release actually ships
    ///
    /// s390x appeared in 9 and only x86_64 predates 8. Falls back to the
    /// configured list when filtering leaves nothing.
    pub fn architectures(&self, version: &str) -> Vec<String> {
        let Some(major) = major_version(version) else {
            return self.config.architectures.clone();
        };

        let supported: Vec<String> = self
            .config
            .architectures
            .iter()
            .filter(|arch| !(major < 9 && arch.as_str() == "s390x"))
            .filter(|arch| major >= 8 || arch.as_str() == "x86_64")
            .cloned()
            .collect();

        if supported.is_empty() {
            self.config.architectures.clone()
        } else {
            supported
        }
    }

    pub fn components(&self, version: &str) -> &'static [&'static str] {
        layout(major_version(version)).components
    }

    fn repo_file_path(&self, version: &str) -> String {
        format!("{}/{}-{}.repo", CONTAINER_MIRROR_PATH, self.config.name, version)
    }

    fn repo_id(&self, version: &str, component: &str, arch: &str) -> String {
        format!(
            "{}-{}-{}-{}",
            self.config.name,
            version,
            component.to_ascii_lowercase(),
            arch
        )
    }

    fn remote_path(layout: Layout, version: &str, component: &str, arch: &str) -> String {
        if layout.nested {
            format!("{}/{}/{}/os/", version, component, arch)
        } else {
            format!("{}/{}/{}/", version, component, arch)
        }
    }

    fn destination(layout: Layout, version: &str, component: &str, arch: &str) -> String {
        if layout.nested {
            format!("{}/{}/{}/{}/os", CONTAINER_MIRROR_PATH, version, component, arch)
        } else {
            format!("{}/{}/{}/{}", CONTAINER_MIRROR_PATH, version, component, arch)
        }
    }

    /// Contents of the dnf repository definition file
    pub fn repo_file(&self, version: &str) -> Vec<String> {
        let layout = layout(major_version(version));
        let proxy = self
            .config
            .proxy
            .as_ref()
            .and_then(|p| p.https.as_ref().or(p.http.as_ref()));

        let mut lines = Vec::new();
        for component in layout.components {
            for arch in self.architectures(version) {
                let remote = Self::remote_path(layout, version, component, &arch);
                let baseurls: Vec<String> = self
                    .config
                    .mirror_urls
                    .iter()
                    .map(|url| format!("{}{}", with_trailing_slash(url), remote))
                    .collect();

                lines.push(format!("[{}]", self.repo_id(version, component, &arch)));
                lines.push(format!(
                    "name={} {} - {} ({})",
                    self.config.name, version, component, arch
                ));
                lines.push(format!("baseurl={}", baseurls.join(" ")));
                lines.push("enabled=1".to_string());
                lines.push("gpgcheck=0".to_string());
                if let Some(proxy) = proxy {
                    lines.push(format!("proxy={}", proxy));
                }
                lines.push(String::new());
            }
        }
        lines
    }
}

impl SyncEngine for YumSyncEngine {
    fn distribution(&self) -> &DistributionConfig {
        &self.config
    }

    fn validate_config(&self) -> bool {
        validate_common(&self.config)
    }

    fn generate_sync_command(&self, version: &str) -> String {
        let layout = layout(major_version(version));
        let repo_file = self.repo_file_path(version);
        let staging = format!("{}/.staging/{}", CONTAINER_MIRROR_PATH, version);

        let mut steps = vec![shell::write_file(&repo_file, &self.repo_file(version))];
        for arch in self.architectures(version) {
            for component in layout.components {
                let repo_id = self.repo_id(version, component, &arch);
                let downloaded = format!("{}/{}/", staging, repo_id);
                let dest = Self::destination(layout, version, component, &arch);

                steps.push(format!(
                    "dnf reposync --config={} --repoid={} --arch={} --download-metadata --download-path={}",
                    quote(&repo_file),
                    quote(&repo_id),
                    quote(&format!("{},noarch", arch)),
                    quote(&staging)
                ));
                steps.push(format!("mkdir -p {}", quote(&dest)));
                steps.push(format!("rsync -a {} {}", quote(&downloaded), quote(&format!("{}/", dest))));
                steps.push(format!("rm -rf {}", quote(&downloaded)));
                steps.push(format!("createrepo_c --update {}", quote(&dest)));
            }
        }
        steps.push(format!("rm -rf {}", quote(&staging)));

        steps.join(" && ")
    }
}
