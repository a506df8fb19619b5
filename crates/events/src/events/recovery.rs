use sandcheck_types::EnvironmentId;
use serde::{Deserialize, Serialize};

/// Recovery manager events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryEvent {
    CheckpointCreated {
        environment_id: EnvironmentId,
        step: String,
        retained: usize,
    },
    RecoveryAttempted {
        environment_id: EnvironmentId,
        strategy: String,
        success: bool,
        attempt: u32,
    },
    RecoveryRejected {
        environment_id: EnvironmentId,
        reason: String,
    },
    DegradationPlanned {
        environment_id: Option<EnvironmentId>,
        skipped: usize,
        modified: usize,
        total: usize,
        can_continue: bool,
    },
    PartialResultsPreserved {
        environment_id: EnvironmentId,
        completed_steps: usize,
    },
}

impl RecoveryEvent {
    #[must_use]
    pub fn environment_id(&self) -> Option<&EnvironmentId> {
        match self {
            Self::CheckpointCreated { environment_id, .. }
            | Self::RecoveryAttempted { environment_id, .. }
            | Self::RecoveryRejected { environment_id, .. }
            | Self::PartialResultsPreserved { environment_id, .. } => Some(environment_id),
            Self::DegradationPlanned { environment_id, .. } => environment_id.as_ref(),
        }
    }
}
