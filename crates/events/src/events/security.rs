use sandcheck_types::{EnvironmentId, SecurityAlert};
use serde::{Deserialize, Serialize};

/// Security policy engine events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityEvent {
    /// A violation was detected, by the mount scan or the activity monitor
    Alert(SecurityAlert),

    /// A monitored action was recorded for an environment
    ActivityRecorded {
        environment_id: EnvironmentId,
        activity: String,
        detail: String,
    },

    /// A requested limit exceeded host capacity and was reduced
    LimitDegraded {
        environment_id: Option<EnvironmentId>,
        resource: String,
        requested: u64,
        granted: u64,
    },

    /// Monitoring was enabled for an environment
    MonitoringEnabled { environment_id: EnvironmentId },
}

impl SecurityEvent {
    #[must_use]
    pub fn environment_id(&self) -> Option<&EnvironmentId> {
        match self {
            Self::Alert(alert) => Some(&alert.environment_id),
            Self::ActivityRecorded { environment_id, .. }
            | Self::MonitoringEnabled { environment_id } => Some(environment_id),
            Self::LimitDegraded { environment_id, .. } => environment_id.as_ref(),
        }
    }
}
