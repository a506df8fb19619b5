use sandcheck_types::{EnvironmentId, ProgressUpdate};
use serde::{Deserialize, Serialize};

use super::FailureContext;

/// Workflow engine events, one per step transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Started {
        environment_id: EnvironmentId,
        workflow: String,
        version: String,
        total_steps: usize,
    },
    GroupStarted {
        environment_id: EnvironmentId,
        steps: Vec<String>,
    },
    StepStarted {
        environment_id: EnvironmentId,
        step: String,
        tool: String,
        attempt: u32,
    },
    StepSkipped {
        environment_id: EnvironmentId,
        step: String,
        reason: String,
    },
    StepRetrying {
        environment_id: EnvironmentId,
        step: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    StepSucceeded {
        environment_id: EnvironmentId,
        step: String,
        attempts: u32,
        duration_ms: u64,
    },
    StepFailed {
        environment_id: EnvironmentId,
        step: String,
        attempts: u32,
        failure: FailureContext,
    },
    Degraded {
        environment_id: EnvironmentId,
        skipped: Vec<String>,
        modified: Vec<String>,
    },
    ProgressReported {
        environment_id: EnvironmentId,
        update: ProgressUpdate,
    },
    Completed {
        environment_id: EnvironmentId,
        workflow: String,
        status: String,
        duration_ms: u64,
    },
    Failed {
        environment_id: EnvironmentId,
        workflow: String,
        failure: FailureContext,
    },
}

impl WorkflowEvent {
    #[must_use]
    pub fn environment_id(&self) -> Option<&EnvironmentId> {
        match self {
            Self::Started { environment_id, .. }
            | Self::GroupStarted { environment_id, .. }
            | Self::StepStarted { environment_id, .. }
            | Self::StepSkipped { environment_id, .. }
            | Self::StepRetrying { environment_id, .. }
            | Self::StepSucceeded { environment_id, .. }
            | Self::StepFailed { environment_id, .. }
            | Self::Degraded { environment_id, .. }
            | Self::ProgressReported { environment_id, .. }
            | Self::Completed { environment_id, .. }
            | Self::Failed { environment_id, .. } => Some(environment_id),
        }
    }
}
