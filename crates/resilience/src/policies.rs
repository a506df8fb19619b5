//! Predefined retry policies per operation class

use std::fmt;
use std::time::Duration;

use sandcheck_config::{RetryConfig, RetryPolicyConfig};
use sandcheck_errors::{AssessmentError, ErrorKind, ResourceIssue};

use crate::retry::RetryPolicy;

/// Operation classes with their own retry policy and breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    ContainerCreation,
    ResourceAllocation,
    Network,
    AnalysisExecution,
}

impl OperationClass {
    pub const ALL: [Self; 4] = [
        Self::ContainerCreation,
        Self::ResourceAllocation,
        Self::Network,
        Self::AnalysisExecution,
    ];

    /// Breaker registry key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContainerCreation => "container-creation",
            Self::ResourceAllocation => "resource-allocation",
            Self::Network => "network",
            Self::AnalysisExecution => "analysis-execution",
        }
    }

    /// Whether an error of this class is worth another attempt.
    #[must_use]
    pub fn is_transient(self, err: &AssessmentError) -> bool {
        if err.is_fail_fast() || !err.recoverable {
            return false;
        }
        match self {
            Self::ContainerCreation => matches!(
                err.kind,
                ErrorKind::Container { .. }
                    | ErrorKind::Resource {
                        issue: ResourceIssue::Allocation | ResourceIssue::Insufficient
                    }
                    | ErrorKind::Network
                    | ErrorKind::ExternalResource
                    | ErrorKind::Timeout { .. }
            ),
            Self::ResourceAllocation => matches!(
                err.kind,
                ErrorKind::Resource { .. } | ErrorKind::ExternalResource | ErrorKind::Timeout { .. }
            ),
            Self::Network => matches!(
                err.kind,
                ErrorKind::Network | ErrorKind::ExternalResource | ErrorKind::Timeout { .. }
            ),
            Self::AnalysisExecution => matches!(
                err.kind,
                ErrorKind::Analysis
                    | ErrorKind::WorkflowExecution
                    | ErrorKind::Timeout { .. }
                    | ErrorKind::Network
                    | ErrorKind::ExternalResource
                    | ErrorKind::Container { .. }
            ),
        }
    }

    fn config(self, retry: &RetryConfig) -> &RetryPolicyConfig {
        match self {
            Self::ContainerCreation => &retry.container_creation,
            Self::ResourceAllocation => &retry.resource_allocation,
            Self::Network => &retry.network,
            Self::AnalysisExecution => &retry.analysis_execution,
        }
    }

    /// Retry policy for this class, tuned by `retry`.
    #[must_use]
    pub fn policy(self, retry: &RetryConfig) -> RetryPolicy<AssessmentError> {
        let config = self.config(retry);
        RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
        .with_multiplier(config.multiplier)
        .with_jitter(Duration::from_millis(config.jitter_ms))
        .retry_if(move |err| self.is_transient(err))
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_follow_configuration() {
        let mut retry = RetryConfig::default();
        retry.network.max_attempts = 9;
        let policy = OperationClass::Network.policy(&retry);
        assert_eq!(policy.max_attempts, 9);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }

    #[test]
    fn fail_fast_kinds_are_never_transient() {
        for class in OperationClass::ALL {
            assert!(!class.is_transient(&AssessmentError::configuration("x")));
            assert!(!class.is_transient(&AssessmentError::validation("x")));
            assert!(!class.is_transient(&AssessmentError::network_violation("x")));
        }
    }

    #[test]
    fn container_creation_retries_runtime_failures_only() {
        let class = OperationClass::ContainerCreation;
        assert!(class.is_transient(&AssessmentError::container_creation("daemon busy")));
        assert!(!class.is_transient(&AssessmentError::analysis("lint failed")));
        assert!(!class.is_transient(&AssessmentError::resource_limit_exceeded("too big")));
    }
}
