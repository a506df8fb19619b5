//! In-memory runtime
//!
//! Containers and networks live in a map. Every call is recorded, and a
//! per-operation fault queue lets a test make the next N calls of an
//! operation fail with a chosen error. `exec` is answered by a pluggable
//! handler.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sandcheck_errors::AssessmentError;
use sandcheck_types::ContainerHandle;
use uuid::Uuid;

use crate::client::{not_found, ContainerRuntime, RuntimeOp};
use crate::spec::{ContainerSpec, ContainerState, ContainerStatus, ExecOutput};

/// Answers `exec` calls: `(handle, argv) -> output`
pub type ExecHandler =
    Arc<dyn Fn(&ContainerHandle, &[String]) -> Result<ExecOutput, AssessmentError> + Send + Sync>;

/// One recorded runtime call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCall {
    pub op: RuntimeOp,
    pub target: String,
}

#[derive(Debug, Clone)]
struct MemoryContainer {
    spec: ContainerSpec,
    status: ContainerStatus,
    copied: Vec<(PathBuf, PathBuf)>,
}

#[derive(Default)]
struct MemoryState {
    containers: HashMap<String, MemoryContainer>,
    networks: BTreeSet<String>,
    calls: Vec<RuntimeCall>,
    faults: HashMap<RuntimeOp, VecDeque<AssessmentError>>,
}

/// Runtime that never leaves the process
#[derive(Clone, Default)]
pub struct MemoryRuntime {
    state: Arc<Mutex<MemoryState>>,
    exec_handler: Arc<Mutex<Option<ExecHandler>>>,
}

impl std::fmt::Debug for MemoryRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryRuntime")
            .field("containers", &state.containers.len())
            .field("networks", &state.networks.len())
            .field("calls", &state.calls.len())
            .finish()
    }
}

impl MemoryRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: RuntimeOp, error: AssessmentError) {
        self.fail_times(op, 1, &error);
    }

    /// Make the next `times` calls of `op` fail with `error`.
    pub fn fail_times(&self, op: RuntimeOp, times: usize, error: &AssessmentError) {
        let mut state = self.lock();
        let queue = state.faults.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Drop every pending fault.
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Install the `exec` handler. Without one, `exec` succeeds with empty output.
    pub fn set_exec_handler<F>(&self, handler: F)
    where
        F: Fn(&ContainerHandle, &[String]) -> Result<ExecOutput, AssessmentError>
            + Send
            + Sync
            + 'static,
    {
        *self
            .exec_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn call_count(&self, op: RuntimeOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    #[must_use]
    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    #[must_use]
    pub fn network_names(&self) -> Vec<String> {
        self.lock().networks.iter().cloned().collect()
    }

    #[must_use]
    pub fn spec_of(&self, handle: &ContainerHandle) -> Option<ContainerSpec> {
        self.lock()
            .containers
            .get(handle.as_str())
            .map(|c| c.spec.clone())
    }

    #[must_use]
    pub fn status_of(&self, handle: &ContainerHandle) -> Option<ContainerStatus> {
        self.lock()
            .containers
            .get(handle.as_str())
            .map(|c| c.status)
    }

    /// Host/container path pairs copied into `handle`.
    #[must_use]
    pub fn copies_into(&self, handle: &ContainerHandle) -> Vec<(PathBuf, PathBuf)> {
        self.lock()
            .containers
            .get(handle.as_str())
            .map(|c| c.copied.clone())
            .unwrap_or_default()
    }

    /// Record the call and pop a pending fault for it, if any.
    fn enter(&self, op: RuntimeOp, target: &str) -> Result<MutexGuard<'_, MemoryState>, AssessmentError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall {
            op,
            target: target.to_string(),
        });
        if let Some(err) = state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }

    fn with_container<T>(
        &self,
        op: RuntimeOp,
        handle: &ContainerHandle,
        f: impl FnOnce(&mut MemoryContainer) -> T,
    ) -> Result<T, AssessmentError> {
        let mut state = self.enter(op, handle.as_str())?;
        state
            .containers
            .get_mut(handle.as_str())
            .map(f)
            .ok_or_else(|| not_found(op, format!("container {handle}")))
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, AssessmentError> {
        let mut state = self.enter(RuntimeOp::Create, &spec.name)?;
        let id = Uuid::new_v4().simple().to_string();
        state.containers.insert(
            id.clone(),
            MemoryContainer {
                spec: spec.clone(),
                status: ContainerStatus::Created,
                copied: Vec::new(),
            },
        );
        Ok(ContainerHandle::new(id))
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), AssessmentError> {
        self.with_container(RuntimeOp::Start, handle, |c| {
            c.status = ContainerStatus::Running;
        })
    }

    async fn stop(&self, handle: &ContainerHandle, _grace: Duration) -> Result<(), AssessmentError> {
        self.with_container(RuntimeOp::Stop, handle, |c| {
            c.status = ContainerStatus::Exited;
        })
    }

    async fn kill(&self, handle: &ContainerHandle) -> Result<(), AssessmentError> {
        self.with_container(RuntimeOp::Kill, handle, |c| {
            c.status = ContainerStatus::Exited;
        })
    }

    async fn remove(&self, handle: &ContainerHandle, force: bool) -> Result<(), AssessmentError> {
        let mut state = self.enter(RuntimeOp::Remove, handle.as_str())?;
        let Some(container) = state.containers.get(handle.as_str()) else {
            return Err(not_found(RuntimeOp::Remove, format!("container {handle}")));
        };
        if container.status == ContainerStatus::Running && !force {
            return Err(AssessmentError::container_destroy(format!(
                "container {handle} is running; stop it or force removal"
            )));
        }
        state.containers.remove(handle.as_str());
        Ok(())
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerState, AssessmentError> {
        self.with_container(RuntimeOp::Inspect, handle, |c| ContainerState {
            status: c.status,
            running: c.status == ContainerStatus::Running,
            exit_code: (c.status == ContainerStatus::Exited).then_some(0),
        })
    }

    async fn exec(
        &self,
        handle: &ContainerHandle,
        argv: &[String],
    ) -> Result<ExecOutput, AssessmentError> {
        let running = self.with_container(RuntimeOp::Exec, handle, |c| {
            c.status == ContainerStatus::Running
        })?;
        if !running {
            return Err(AssessmentError::container_start(format!(
                "container {handle} is not running"
            )));
        }
        let handler = self
            .exec_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(handler) => handler(handle, argv),
            None => Ok(ExecOutput::default()),
        }
    }

    async fn copy_in(
        &self,
        handle: &ContainerHandle,
        host_path: &Path,
        container_path: &Path,
    ) -> Result<(), AssessmentError> {
        if tokio::fs::metadata(host_path).await.is_err() {
            // Recorded anyway so tests can see the attempt.
            self.lock().calls.push(RuntimeCall {
                op: RuntimeOp::CopyIn,
                target: handle.as_str().to_string(),
            });
            return Err(AssessmentError::external_resource(format!(
                "copy source {} does not exist",
                host_path.display()
            )));
        }
        let pair = (host_path.to_path_buf(), container_path.to_path_buf());
        self.with_container(RuntimeOp::CopyIn, handle, |c| c.copied.push(pair))
    }

    async fn create_network(&self, name: &str, _internal: bool) -> Result<String, AssessmentError> {
        let mut state = self.enter(RuntimeOp::CreateNetwork, name)?;
        state.networks.insert(name.to_string());
        Ok(name.to_string())
    }

    async fn remove_network(&self, name: &str) -> Result<(), AssessmentError> {
        let mut state = self.enter(RuntimeOp::RemoveNetwork, name)?;
        if state.networks.remove(name) {
            Ok(())
        } else {
            Err(not_found(RuntimeOp::RemoveNetwork, format!("network {name}")))
        }
    }
}
