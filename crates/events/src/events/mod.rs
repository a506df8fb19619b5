use serde::{Deserialize, Serialize};

use crate::EventSource;
use sandcheck_errors::UserFacingError;

/// Structured failure information shared across domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Stable error code, e.g. `CONTAINER_CREATION_FAILED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Short user-facing message.
    pub message: String,
    /// Optional remediation hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether retrying the operation might succeed.
    pub retryable: bool,
}

impl FailureContext {
    /// Construct a new failure context.
    #[must_use]
    pub fn new(
        code: Option<impl Into<String>>,
        message: impl Into<String>,
        hint: Option<impl Into<String>>,
        retryable: bool,
    ) -> Self {
        Self {
            code: code.map(Into::into),
            message: message.into(),
            hint: hint.map(Into::into),
            retryable,
        }
    }

    /// Build failure context from a `UserFacingError` implementation.
    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self::new(
            error.user_code(),
            error.user_message().into_owned(),
            error.user_hint(),
            error.is_retryable(),
        )
    }
}

pub mod environment;
pub mod general;
pub mod recovery;
pub mod resilience;
pub mod security;
pub mod workflow;

pub use environment::*;
pub use general::*;
pub use recovery::*;
pub use resilience::*;
pub use security::*;
pub use workflow::*;

/// Top-level application event enum that aggregates all domain-specific events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// General utility events (warnings, errors, operations)
    General(GeneralEvent),

    /// Environment lifecycle (provisioning, mount, teardown)
    Environment(EnvironmentEvent),

    /// Alerts, monitored activity and limit adjustments
    Security(SecurityEvent),

    /// Retries and circuit breaker transitions
    Resilience(ResilienceEvent),

    /// Checkpoints, recovery attempts and degradation plans
    Recovery(RecoveryEvent),

    /// Workflow and per-step execution
    Workflow(WorkflowEvent),
}

impl AppEvent {
    /// Identify the source domain for this event (used for metadata/logging).
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::General(_) => EventSource::General,
            Self::Environment(_) => EventSource::Environment,
            Self::Security(_) => EventSource::Security,
            Self::Resilience(_) => EventSource::Resilience,
            Self::Recovery(_) => EventSource::Recovery,
            Self::Workflow(_) => EventSource::Workflow,
        }
    }

    /// Environment this event concerns, if any. Used as the correlation id.
    #[must_use]
    pub fn environment_id(&self) -> Option<&str> {
        match self {
            Self::Environment(event) => Some(event.environment_id().as_str()),
            Self::Security(event) => event.environment_id().map(|id| id.as_str()),
            Self::Recovery(event) => event.environment_id().map(|id| id.as_str()),
            Self::Workflow(event) => event.environment_id().map(|id| id.as_str()),
            Self::General(_) | Self::Resilience(_) => None,
        }
    }

    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            // Error-level events
            Self::General(GeneralEvent::Error { .. } | GeneralEvent::OperationFailed { .. })
            | Self::Environment(
                EnvironmentEvent::CreationFailed { .. }
                | EnvironmentEvent::EmergencyTerminated { .. }
                | EnvironmentEvent::DestroyFailed { .. },
            )
            | Self::Security(SecurityEvent::Alert(_))
            | Self::Resilience(ResilienceEvent::RetriesExhausted { .. })
            | Self::Recovery(RecoveryEvent::PartialResultsPreserved { .. })
            | Self::Workflow(WorkflowEvent::StepFailed { .. } | WorkflowEvent::Failed { .. }) => {
                Level::ERROR
            }

            // Warning-level events
            Self::General(GeneralEvent::Warning { .. })
            | Self::Security(
                SecurityEvent::LimitDegraded { .. } | SecurityEvent::ActivityRecorded { .. },
            )
            | Self::Resilience(
                ResilienceEvent::RetryScheduled { .. }
                | ResilienceEvent::BreakerRejected { .. }
                | ResilienceEvent::BreakerStateChanged { .. },
            )
            | Self::Recovery(
                RecoveryEvent::RecoveryAttempted { .. }
                | RecoveryEvent::RecoveryRejected { .. }
                | RecoveryEvent::DegradationPlanned { .. },
            )
            | Self::Workflow(
                WorkflowEvent::StepRetrying { .. } | WorkflowEvent::Degraded { .. },
            ) => Level::WARN,

            // Debug-level events (progress updates, internal state)
            Self::General(GeneralEvent::DebugLog { .. })
            | Self::Recovery(RecoveryEvent::CheckpointCreated { .. })
            | Self::Workflow(
                WorkflowEvent::ProgressReported { .. } | WorkflowEvent::StepSkipped { .. },
            ) => Level::DEBUG,

            // Default to INFO for most events
            _ => Level::INFO,
        }
    }

    /// Get the log target for this event (for structured logging)
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            Self::General(_) => "sandcheck::events::general",
            Self::Environment(_) => "sandcheck::events::environment",
            Self::Security(_) => "sandcheck::events::security",
            Self::Resilience(_) => "sandcheck::events::resilience",
            Self::Recovery(_) => "sandcheck::events::recovery",
            Self::Workflow(_) => "sandcheck::events::workflow",
        }
    }
}
