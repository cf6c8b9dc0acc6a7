//! In-memory gateway for engine and coordinator tests
//!
//! Every call is recorded with a global sequence number. Container ids are
//! derived from container names (`id-<name>`) so scripts can be keyed by name.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::DistributionConfig;
use crate::domain::container::{ContainerInfo, ContainerSpec, ContainerState, ContainerStatus};
use crate::error::GatewayError;
use crate::infra::runtime::{image_tag, ContainerGateway};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GatewayCall {
    pub seq: usize,
    pub op: &'static str,
    /// Distribution name, container name or container id
    pub target: String,
}

#[derive(Default)]
struct FakeState {
    seq: usize,
    calls: Vec<GatewayCall>,
    specs: Vec<ContainerSpec>,
    statuses: HashMap<String, VecDeque<ContainerStatus>>,
    logs: HashMap<String, String>,
    image_failures: HashSet<String>,
    create_failures: HashMap<String, String>,
    start_failures: HashSet<String>,
    create_panics: HashSet<String>,
    log_failures: HashSet<String>,
    active: HashSet<String>,
    max_active: usize,
}

impl FakeState {
    fn record(&mut self, op: &'static str, target: &str) -> usize {
        self.seq += 1;
        self.calls.push(GatewayCall {
            seq: self.seq,
            op,
            target: target.to_string(),
        });
        self.seq
    }
}

#[derive(Default)]
pub(crate) struct FakeGateway {
    state: Mutex<FakeState>,
}

pub(crate) fn container_id_for(name: &str) -> String {
    format!("id-{}", name)
}

fn name_for(container_id: &str) -> &str {
    container_id.strip_prefix("id-").unwrap_or(container_id)
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Statuses returned by successive polls; the last one repeats
    pub fn script_states(&self, container_name: &str, states: &[ContainerState]) {
        let statuses = states.iter().cloned().map(ContainerStatus::new).collect();
        self.script_statuses(container_name, statuses);
    }

    pub fn script_statuses(&self, container_name: &str, statuses: Vec<ContainerStatus>) {
        self.lock()
            .statuses
            .insert(container_name.to_string(), statuses.into());
    }

    pub fn set_logs(&self, container_name: &str, logs: &str) {
        self.lock()
            .logs
            .insert(container_name.to_string(), logs.to_string());
    }

    pub fn fail_image(&self, distribution: &str) {
        self.lock().image_failures.insert(distribution.to_string());
    }

    pub fn fail_create(&self, container_name: &str, stderr: &str) {
        self.lock()
            .create_failures
            .insert(container_name.to_string(), stderr.to_string());
    }

    pub fn fail_start(&self, container_name: &str) {
        self.lock().start_failures.insert(container_name.to_string());
    }

    /// Make `create_container` panic for this container
    pub fn panic_on_create(&self, container_name: &str) {
        self.lock().create_panics.insert(container_name.to_string());
    }

    pub fn fail_logs(&self, container_name: &str) {
        self.lock().log_failures.insert(container_name.to_string());
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, op: &str) -> Vec<GatewayCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    /// Containers handed to `create_container`, in call order
    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.lock().specs.clone()
    }

    /// Sequence number of the poll that first observed a terminal state
    pub fn terminal_poll_seq(&self, container_name: &str) -> Option<usize> {
        let id = container_id_for(container_name);
        let state = self.lock();
        state
            .calls
            .iter()
            .filter(|c| c.op == "terminal" && c.target == id)
            .map(|c| c.seq)
            .next()
    }

    /// Largest number of containers created and not yet seen terminal
    pub fn max_active(&self) -> usize {
        self.lock().max_active
    }
}

fn is_terminal(state: &ContainerState) -> bool {
    matches!(
        state,
        ContainerState::Exited
            | ContainerState::Dead
            | ContainerState::Oom
            | ContainerState::Killed
            | ContainerState::NotFound
            | ContainerState::Error
    )
}

#[async_trait]
impl ContainerGateway for FakeGateway {
    async fn ensure_image(&self, distribution: &DistributionConfig) -> Result<String, GatewayError> {
        let mut state = self.lock();
        state.record("ensure_image", &distribution.name);
        let tag = image_tag(&distribution.name);
        if state.image_failures.contains(&distribution.name) {
            return Err(GatewayError::Build {
                image: tag,
                stderr: "build step failed".to_string(),
            });
        }
        Ok(tag)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, GatewayError> {
        let mut state = self.lock();
        state.record("create_container", &spec.name);
        if state.create_panics.contains(&spec.name) {
            // release the lock first so other tasks keep working
            drop(state);
            panic!("simulated gateway panic for {}", spec.name);
        }
        if let Some(stderr) = state.create_failures.get(&spec.name).cloned() {
            return Err(GatewayError::Creation {
                name: spec.name.clone(),
                stderr,
            });
        }

        state.specs.push(spec.clone());
        let id = container_id_for(&spec.name);
        state.active.insert(id.clone());
        state.max_active = state.max_active.max(state.active.len());
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.record("start_container", container_id);
        if state.start_failures.contains(name_for(container_id)) {
            state.active.remove(container_id);
            return Err(GatewayError::Start {
                container_id: container_id.to_string(),
                stderr: "OCI runtime error".to_string(),
            });
        }
        Ok(())
    }

    async fn get_status(&self, container_id: &str) -> ContainerStatus {
        let mut state = self.lock();
        state.record("get_status", container_id);

        let status = match state.statuses.get_mut(name_for(container_id)) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        }
        .unwrap_or_else(|| ContainerStatus::new(ContainerState::Exited));

        if is_terminal(&status.state) && state.active.remove(container_id) {
            state.record("terminal", container_id);
        }
        status
    }

    async fn get_logs(&self, container_id: &str, _tail: usize) -> Result<String, GatewayError> {
        let mut state = self.lock();
        state.record("get_logs", container_id);
        let name = name_for(container_id);
        if state.log_failures.contains(name) {
            return Err(GatewayError::Logs {
                container_id: container_id.to_string(),
                stderr: "log driver unavailable".to_string(),
            });
        }
        Ok(state
            .logs
            .get(name)
            .cloned()
            .unwrap_or_else(|| format!("{} done\n", name)))
    }

    async fn stop_container(
        &self,
        container_id: &str,
        _timeout: Duration,
    ) -> Result<(), GatewayError> {
        let mut state = self.lock();
        state.record("stop_container", container_id);
        state.active.remove(container_id);
        Ok(())
    }

    async fn list_containers(&self, name_prefix: &str) -> Result<Vec<ContainerInfo>, GatewayError> {
        let mut state = self.lock();
        state.record("list_containers", name_prefix);
        let containers = state
            .specs
            .iter()
            .filter(|spec| spec.name.starts_with(name_prefix))
            .map(|spec| ContainerInfo {
                id: container_id_for(&spec.name),
                name: spec.name.clone(),
                image: spec.image.clone(),
                state: "exited".to_string(),
                created: String::new(),
            })
            .collect();
        Ok(containers)
    }

    async fn cleanup_exited(&self, name_prefix: &str) -> Result<usize, GatewayError> {
        let mut state = self.lock();
        state.record("cleanup_exited", name_prefix);
        let before = state.specs.len();
        state.specs.retain(|spec| !spec.name.starts_with(name_prefix));
        Ok(before - state.specs.len())
    }
}
