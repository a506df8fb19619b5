use std::path::PathBuf;

use sandcheck_types::{EnvironmentId, EnvironmentStatus};
use serde::{Deserialize, Serialize};

use super::FailureContext;

/// Environment lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvironmentEvent {
    CreationStarted {
        environment_id: EnvironmentId,
        codebase_type: String,
    },
    Created {
        environment_id: EnvironmentId,
        duration_ms: u64,
    },
    CreationFailed {
        environment_id: EnvironmentId,
        failure: FailureContext,
    },
    StatusChanged {
        environment_id: EnvironmentId,
        from: EnvironmentStatus,
        to: EnvironmentStatus,
    },
    CodebaseMounted {
        environment_id: EnvironmentId,
        source: PathBuf,
        container_path: PathBuf,
        files_scanned: usize,
    },
    Stopped {
        environment_id: EnvironmentId,
        forced: bool,
    },
    Destroyed {
        environment_id: EnvironmentId,
    },
    DestroyFailed {
        environment_id: EnvironmentId,
        failure: FailureContext,
    },
    EmergencyTerminated {
        environment_id: EnvironmentId,
        reason: String,
    },
}

impl EnvironmentEvent {
    #[must_use]
    pub fn environment_id(&self) -> &EnvironmentId {
        match self {
            Self::CreationStarted { environment_id, .. }
            | Self::Created { environment_id, .. }
            | Self::CreationFailed { environment_id, .. }
            | Self::StatusChanged { environment_id, .. }
            | Self::CodebaseMounted { environment_id, .. }
            | Self::Stopped { environment_id, .. }
            | Self::Destroyed { environment_id }
            | Self::DestroyFailed { environment_id, .. }
            | Self::EmergencyTerminated { environment_id, .. } => environment_id,
        }
    }
}
