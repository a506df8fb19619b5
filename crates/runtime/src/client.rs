//! The container runtime capability

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sandcheck_errors::{AssessmentError, ContainerOperation};
use sandcheck_types::ContainerHandle;
use serde::{Deserialize, Serialize};

use crate::spec::{ContainerSpec, ContainerState, ExecOutput};

const NOT_FOUND_LABEL: &str = "runtime.not_found";

/// Operations of the runtime client, used for call recording and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeOp {
    Create,
    Start,
    Stop,
    Kill,
    Remove,
    Inspect,
    Exec,
    CopyIn,
    CreateNetwork,
    RemoveNetwork,
}

impl RuntimeOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Kill => "kill",
            Self::Remove => "remove",
            Self::Inspect => "inspect",
            Self::Exec => "exec",
            Self::CopyIn => "copy_in",
            Self::CreateNetwork => "create_network",
            Self::RemoveNetwork => "remove_network",
        }
    }

    /// Container error family an unclassified failure of this op belongs to.
    #[must_use]
    pub fn container_operation(self) -> ContainerOperation {
        match self {
            Self::Create | Self::CreateNetwork | Self::CopyIn => ContainerOperation::Creation,
            Self::Start | Self::Exec | Self::Inspect => ContainerOperation::Start,
            Self::Stop | Self::Kill => ContainerOperation::Stop,
            Self::Remove | Self::RemoveNetwork => ContainerOperation::Destroy,
        }
    }
}

impl fmt::Display for RuntimeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a container or network the runtime does not know.
pub fn not_found(op: RuntimeOp, target: impl fmt::Display) -> AssessmentError {
    AssessmentError::container(op.container_operation(), format!("{target} not found"))
        .with_context(NOT_FOUND_LABEL, "true")
        .with_context("runtimeOp", op.as_str())
}

/// Whether `err` reports an object that is already gone.
#[must_use]
pub fn is_not_found(err: &AssessmentError) -> bool {
    err.context_value(NOT_FOUND_LABEL) == Some("true")
}

/// Async client over a container runtime.
///
/// Every method is a single suspending call; retries, breakers and recovery
/// are layered on top by the caller.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short name for logs, e.g. `docker`.
    fn name(&self) -> &str;

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, AssessmentError>;

    async fn start(&self, handle: &ContainerHandle) -> Result<(), AssessmentError>;

    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<(), AssessmentError>;

    async fn kill(&self, handle: &ContainerHandle) -> Result<(), AssessmentError>;

    async fn remove(&self, handle: &ContainerHandle, force: bool) -> Result<(), AssessmentError>;

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerState, AssessmentError>;

    async fn exec(
        &self,
        handle: &ContainerHandle,
        argv: &[String],
    ) -> Result<ExecOutput, AssessmentError>;

    async fn copy_in(
        &self,
        handle: &ContainerHandle,
        host_path: &Path,
        container_path: &Path,
    ) -> Result<(), AssessmentError>;

    /// Create a network; `internal` networks have no route to the outside.
    async fn create_network(&self, name: &str, internal: bool) -> Result<String, AssessmentError>;

    async fn remove_network(&self, name: &str) -> Result<(), AssessmentError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandcheck_errors::ErrorFamily;

    #[test]
    fn not_found_is_detectable() {
        let err = not_found(RuntimeOp::Remove, "container abc");
        assert!(is_not_found(&err));
        assert_eq!(err.family(), ErrorFamily::Container);
        assert!(!is_not_found(&AssessmentError::network("reset")));
    }
}
