//! Container runtime gateway
//!
//! Translates container lifecycle intents into docker/podman CLI calls and
//! normalizes what comes back. The gateway keeps no container state; every
//! status comes from re-querying the runtime.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::env::constants::{BUILD_TIMEOUT_SECS, CONTAINER_NAME_PREFIX};
use crate::config::{DistributionConfig, RepoType};
use crate::domain::container::{ContainerInfo, ContainerSpec, ContainerState, ContainerStatus};
use crate::error::GatewayError;
use crate::infra::command::{CommandOutput, CommandRunner};

/// Container lifecycle operations used by the sync engine
#[async_trait]
pub trait ContainerGateway: Send + Sync {
    /// Make sure the mirroring image for `distribution` exists, building it if needed
    async fn ensure_image(&self, distribution: &DistributionConfig) -> Result<String, GatewayError>;

    /// Create a container, replacing any existing container with the same name
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, GatewayError>;

    async fn start_container(&self, container_id: &str) -> Result<(), GatewayError>;

    /// Current status; a missing container is reported as `NotFound`, never as an error
    async fn get_status(&self, container_id: &str) -> ContainerStatus;

    async fn get_logs(&self, container_id: &str, tail: usize) -> Result<String, GatewayError>;

    async fn stop_container(&self, container_id: &str, timeout: Duration)
        -> Result<(), GatewayError>;

    async fn list_containers(&self, name_prefix: &str) -> Result<Vec<ContainerInfo>, GatewayError>;

    /// Remove exited containers whose name starts with `name_prefix`
    ///
    /// Returns the number actually removed.
    async fn cleanup_exited(&self, name_prefix: &str) -> Result<usize, GatewayError>;
}

/// Image tag used for a distribution's sync containers
pub fn image_tag(distribution: &str) -> String {
    format!("localhost/{}{}:latest", CONTAINER_NAME_PREFIX, distribution)
}

/// Build description of the mirroring image for an ecosystem
pub fn containerfile(repo_type: RepoType) -> &'static str {
    match repo_type {
        RepoType::Apt => {
            "FROM docker.io/library/ubuntu:latest\n\
             ENV DEBIAN_FRONTEND=noninteractive\n\
             RUN apt-get update && \\\n    \
             apt-get install -y --no-install-recommends apt-mirror debmirror wget curl rsync ca-certificates && \\\n    \
             rm -rf /var/lib/apt/lists/*\n\
             WORKDIR /mirror\n\
             VOLUME [\"/mirror\"]\n"
        }
        RepoType::Yum => {
            "FROM docker.io/library/rockylinux:9\n\
             RUN dnf install -y dnf-plugins-core createrepo_c wget curl rsync && \\\n    \
             dnf clean all\n\
             WORKDIR /mirror\n\
             VOLUME [\"/mirror\"]\n"
        }
    }
}

/// Gateway backed by the docker or podman command line
pub struct CliGateway {
    /// Full runtime command line, e.g. `sudo podman`
    runtime: String,
    program: String,
    base_args: Vec<String>,
    command_timeout: Duration,
    build_timeout: Duration,
}

impl CliGateway {
    /// Create a gateway without probing the runtime
    pub fn new(runtime: &str, command_timeout: Duration) -> Result<Self, GatewayError> {
        let mut parts = runtime.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| GatewayError::RuntimeUnavailable {
            runtime: runtime.to_string(),
            reason: "empty runtime command".to_string(),
        })?;

        Ok(Self {
            runtime: runtime.trim().to_string(),
            program,
            base_args: parts.collect(),
            command_timeout,
            build_timeout: Duration::from_secs(BUILD_TIMEOUT_SECS),
        })
    }

    /// Create a gateway and verify the runtime answers `--version`
    pub async fn connect(runtime: &str, command_timeout: Duration) -> Result<Self, GatewayError> {
        let gateway = Self::new(runtime, command_timeout)?;
        let version = gateway.verify().await?;
        info!(runtime = %gateway.runtime, version = %version, "Container runtime available");
        Ok(gateway)
    }

    /// Run `<runtime> --version`
    pub async fn verify(&self) -> Result<String, GatewayError> {
        let unavailable = |reason: String| GatewayError::RuntimeUnavailable {
            runtime: self.runtime.clone(),
            reason,
        };

        let output = self
            .run(&["--version".to_string()])
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !output.success {
            return Err(unavailable(output.error_text()));
        }
        Ok(output.stdout.trim().to_string())
    }

    fn command_args(&self, args: &[String]) -> Vec<String> {
        self.base_args.iter().chain(args).cloned().collect()
    }

    async fn run(&self, args: &[String]) -> Result<CommandOutput, GatewayError> {
        debug!(runtime = %self.runtime, args = ?args, "Running container runtime command");
        let output =
            CommandRunner::run_simple(&self.program, &self.command_args(args), self.command_timeout)
                .await?;
        Ok(output)
    }

    async fn image_exists(&self, tag: &str) -> Result<bool, GatewayError> {
        let output = self.run(&args(&["image", "inspect", tag])).await?;
        Ok(output.success)
    }

    async fn build_image(&self, tag: &str, repo_type: RepoType) -> Result<(), GatewayError> {
        let context = tempfile::tempdir()?;
        let containerfile_path = context.path().join("Containerfile");
        tokio::fs::write(&containerfile_path, containerfile(repo_type)).await?;

        info!(image = %tag, repo_type = %repo_type, "Building mirror image");
        let build_args = self.command_args(&[
            "build".to_string(),
            "-t".to_string(),
            tag.to_string(),
            "-f".to_string(),
            containerfile_path.display().to_string(),
            context.path().display().to_string(),
        ]);
        let output =
            CommandRunner::run_with_streaming(&self.program, &build_args, tag, self.build_timeout)
                .await?;

        if !output.success {
            return Err(GatewayError::Build {
                image: tag.to_string(),
                stderr: output.error_text(),
            });
        }
        info!(image = %tag, "Mirror image built");
        Ok(())
    }
}

#[async_trait]
impl ContainerGateway for CliGateway {
    async fn ensure_image(&self, distribution: &DistributionConfig) -> Result<String, GatewayError> {
        let tag = image_tag(&distribution.name);
        if self.image_exists(&tag).await? {
            debug!(image = %tag, "Image already present");
            return Ok(tag);
        }
        self.build_image(&tag, distribution.repo_type).await?;
        Ok(tag)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, GatewayError> {
        for volume in &spec.volumes {
            tokio::fs::create_dir_all(&volume.host_path).await?;
        }

        // Replace any leftover container from a previous run
        let removed = self.run(&args(&["rm", "-f", &spec.name])).await?;
        if removed.success {
            debug!(container = %spec.name, "Removed existing container");
        }

        let mut create = args(&["create", "--name", &spec.name]);
        for volume in &spec.volumes {
            create.push("--volume".to_string());
            create.push(volume.to_arg());
        }
        for (key, value) in &spec.environment {
            create.push("-e".to_string());
            create.push(format!("{}={}", key, value));
        }
        create.push(spec.image.clone());
        create.push("sh".to_string());
        create.push("-c".to_string());
        create.push(spec.command.clone());

        let output = self.run(&create).await?;
        if !output.success {
            return Err(GatewayError::Creation {
                name: spec.name.clone(),
                stderr: output.error_text(),
            });
        }

        let container_id = output
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(short_id)
            .ok_or_else(|| GatewayError::Creation {
                name: spec.name.clone(),
                stderr: "runtime returned no container id".to_string(),
            })?;

        info!(container = %spec.name, container_id = %container_id, "Container created");
        Ok(container_id)
    }

    async fn start_container(&self, container_id: &str) -> Result<(), GatewayError> {
        let output = self.run(&args(&["start", container_id])).await?;
        if !output.success {
            return Err(GatewayError::Start {
                container_id: container_id.to_string(),
                stderr: output.error_text(),
            });
        }

        info!(container_id = %container_id, "Container started");
        Ok(())
    }

    async fn get_status(&self, container_id: &str) -> ContainerStatus {
        let output = match self.run(&args(&["inspect", container_id])).await {
            Ok(output) => output,
            Err(e) => return ContainerStatus::error(e.to_string()),
        };

        if !output.success {
            let text = output.error_text();
            if is_missing_container(&text) {
                return ContainerStatus::not_found();
            }
            return ContainerStatus::error(text);
        }

        parse_inspect(&output.stdout)
    }

    async fn get_logs(&self, container_id: &str, tail: usize) -> Result<String, GatewayError> {
        let output = self
            .run(&args(&[
                "logs",
                "--timestamps",
                "--tail",
                &tail.to_string(),
                container_id,
            ]))
            .await?;

        if !output.success {
            return Err(GatewayError::Logs {
                container_id: container_id.to_string(),
                stderr: output.error_text(),
            });
        }

        // The runtime forwards the container's stderr on its own stderr
        let mut logs = output.stdout;
        if !output.stderr.is_empty() {
            if !logs.is_empty() && !logs.ends_with('\n') {
                logs.push('\n');
            }
            logs.push_str(&output.stderr);
        }
        Ok(logs)
    }

    async fn stop_container(
        &self,
        container_id: &str,
        timeout: Duration,
    ) -> Result<(), GatewayError> {
        let output = self
            .run(&args(&[
                "stop",
                "-t",
                &timeout.as_secs().to_string(),
                container_id,
            ]))
            .await?;

        if !output.success {
            return Err(GatewayError::Stop {
                container_id: container_id.to_string(),
                stderr: output.error_text(),
            });
        }

        info!(container_id = %container_id, "Container stopped");
        Ok(())
    }

    async fn list_containers(&self, name_prefix: &str) -> Result<Vec<ContainerInfo>, GatewayError> {
        let output = self
            .run(&args(&[
                "ps",
                "-a",
                "--filter",
                &format!("name={}", name_prefix),
                "--format",
                "json",
            ]))
            .await?;

        if !output.success {
            return Err(GatewayError::List(output.error_text()));
        }

        // The name filter is a substring match on some runtimes
        Ok(parse_ps_output(&output.stdout)
            .into_iter()
            .filter(|c| c.name.starts_with(name_prefix))
            .collect())
    }

    async fn cleanup_exited(&self, name_prefix: &str) -> Result<usize, GatewayError> {
        let containers = self.list_containers(name_prefix).await?;
        let mut removed = 0;

        for container in containers
            .iter()
            .filter(|c| ContainerState::from_runtime(&c.state) == ContainerState::Exited)
        {
            match self.run(&args(&["rm", &container.id])).await {
                Ok(output) if output.success => {
                    info!(container = %container.name, "Removed exited container");
                    removed += 1;
                }
                Ok(output) => {
                    let err = GatewayError::Remove {
                        container_id: container.id.clone(),
                        stderr: output.error_text(),
                    };
                    warn!(container = %container.name, error = %err, "Failed to remove container");
                }
                Err(e) => {
                    warn!(container = %container.name, error = %e, "Failed to remove container");
                }
            }
        }

        Ok(removed)
    }
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

fn is_missing_container(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    text.contains("no such container")
        || text.contains("no such object")
        || text.contains("no container with name or id")
}

/// Accept a JSON array, a single object or one object per line
fn json_objects(raw: &str) -> Vec<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items,
        Ok(value @ Value::Object(_)) => vec![value],
        Ok(_) => Vec::new(),
        Err(_) => raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Value>(line) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(error = %e, "Skipping unparsable runtime output line");
                    None
                }
            })
            .collect(),
    }
}

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| value.get(*key).and_then(Value::as_str))
}

/// Normalize an `inspect` document into a status
pub(crate) fn parse_inspect(raw: &str) -> ContainerStatus {
    let Some(doc) = json_objects(raw).into_iter().next() else {
        return ContainerStatus::not_found();
    };

    let state = doc.get("State").cloned().unwrap_or(Value::Null);
    let oom_killed = state.get("OOMKilled").and_then(Value::as_bool).unwrap_or(false);
    let container_state = if oom_killed {
        ContainerState::Oom
    } else {
        match state.get("Status").and_then(Value::as_str) {
            Some(status) => ContainerState::from_runtime(status),
            None => return ContainerStatus::error("runtime inspect output has no State.Status"),
        }
    };

    ContainerStatus {
        state: container_state,
        id: str_field(&doc, &["Id", "ID"]).map(short_id),
        name: str_field(&doc, &["Name"]).map(|n| n.trim_start_matches('/').to_string()),
        image: doc
            .get("Config")
            .and_then(|c| c.get("Image"))
            .and_then(Value::as_str)
            .or_else(|| str_field(&doc, &["ImageName", "Image"]))
            .map(str::to_string),
        created: str_field(&doc, &["Created"]).map(str::to_string),
        started: str_field(&state, &["StartedAt"]).map(str::to_string),
        finished: str_field(&state, &["FinishedAt"]).map(str::to_string),
        exit_code: state.get("ExitCode").and_then(Value::as_i64),
        error: None,
    }
}

/// Normalize `ps --format json` output from docker or podman
pub(crate) fn parse_ps_output(raw: &str) -> Vec<ContainerInfo> {
    json_objects(raw)
        .iter()
        .filter_map(|item| {
            let id = str_field(item, &["Id", "ID"])?;
            let name = match item.get("Names") {
                // podman
                Some(Value::Array(names)) => names
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                // docker, comma separated
                Some(Value::String(names)) => {
                    names.split(',').next().unwrap_or_default().to_string()
                }
                _ => str_field(item, &["Name"]).unwrap_or_default().to_string(),
            };

            Some(ContainerInfo {
                id: short_id(id),
                name: name.trim_start_matches('/').to_string(),
                image: str_field(item, &["Image"]).unwrap_or_default().to_string(),
                state: str_field(item, &["State", "Status"])
                    .unwrap_or_default()
                    .to_ascii_lowercase(),
                created: normalize_created(item),
            })
        })
        .collect()
}

fn normalize_created(item: &Value) -> String {
    if let Some(secs) = item.get("Created").and_then(Value::as_i64) {
        if let Some(time) = Utc.timestamp_opt(secs, 0).single() {
            return time.to_rfc3339();
        }
    }

    let raw = str_field(item, &["CreatedAt", "Created"]).unwrap_or_default();
    normalize_timestamp(raw)
}

/// RFC 3339 for the formats docker and podman print; anything else unchanged
fn normalize_timestamp(raw: &str) -> String {
    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
        return time.with_timezone(&Utc).to_rfc3339();
    }

    // docker: "2024-01-15 10:30:00 +0000 UTC"
    let without_zone_name = match raw.rsplit_once(' ') {
        Some((head, tail)) if tail.chars().all(|c| c.is_ascii_alphabetic()) => head,
        _ => raw,
    };
    match DateTime::parse_from_str(without_zone_name, "%Y-%m-%d %H:%M:%S%.f %z") {
        Ok(time) => time.with_timezone(&Utc).to_rfc3339(),
        Err(_) => raw.to_string(),
    }
}
