//! The assessment error envelope

use std::collections::BTreeMap;
use std::fmt::Display;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::kind::{
    ContainerOperation, ErrorFamily, ErrorKind, ResourceIssue, Severity, ViolationKind,
};
use crate::partial::PartialAnalysis;

/// A classified failure with its code, severity and structured context.
///
/// `Display` renders only the message. The user-facing single line is
/// produced by [`AssessmentError::user_line`]; everything else (context,
/// cause) is meant for the structured log record.
#[derive(Clone, Debug, PartialEq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[error("{message}")]
pub struct AssessmentError {
    pub kind: ErrorKind,
    pub message: String,
    pub severity: Severity,
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "BTreeMap::is_empty"))]
    pub context: BTreeMap<String, String>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub cause: Option<String>,
}

impl AssessmentError {
    /// Build an error of `kind` with the kind's default severity and recoverability.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            severity: kind.default_severity(),
            recoverable: kind.default_recoverable(),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            context: BTreeMap::new(),
            cause: None,
        }
    }

    pub fn container(operation: ContainerOperation, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Container { operation }, message)
    }

    pub fn container_creation(message: impl Into<String>) -> Self {
        Self::container(ContainerOperation::Creation, message)
    }

    pub fn container_start(message: impl Into<String>) -> Self {
        Self::container(ContainerOperation::Start, message)
    }

    pub fn container_stop(message: impl Into<String>) -> Self {
        Self::container(ContainerOperation::Stop, message)
    }

    pub fn container_destroy(message: impl Into<String>) -> Self {
        Self::container(ContainerOperation::Destroy, message)
    }

    pub fn resource(issue: ResourceIssue, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource { issue }, message)
    }

    pub fn resource_allocation(message: impl Into<String>) -> Self {
        Self::resource(ResourceIssue::Allocation, message)
    }

    pub fn resource_limit_exceeded(message: impl Into<String>) -> Self {
        Self::resource(ResourceIssue::LimitExceeded, message)
    }

    pub fn insufficient_resources(message: impl Into<String>) -> Self {
        Self::resource(ResourceIssue::Insufficient, message)
    }

    pub fn security_violation(violation: ViolationKind, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SecurityViolation { violation }, message)
    }

    pub fn network_violation(message: impl Into<String>) -> Self {
        Self::security_violation(ViolationKind::Network, message)
    }

    pub fn filesystem_violation(message: impl Into<String>) -> Self {
        Self::security_violation(ViolationKind::Filesystem, message)
    }

    pub fn privilege_escalation(message: impl Into<String>) -> Self {
        Self::security_violation(ViolationKind::PrivilegeEscalation, message)
    }

    pub fn analysis(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Analysis, message)
    }

    pub fn workflow_execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WorkflowExecution, message)
    }

    pub fn partial_analysis(message: impl Into<String>, partial: PartialAnalysis) -> Self {
        Self::new(ErrorKind::PartialAnalysis(Box::new(partial)), message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn external_resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalResource, message)
    }

    pub fn timeout(message: impl Into<String>, timeout_ms: u64) -> Self {
        Self::new(ErrorKind::Timeout { timeout_ms }, message)
            .with_context("timeoutMs", timeout_ms.to_string())
    }

    /// Attach a context field (kept in the log record, never in `user_line`).
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Record the underlying error that triggered this one.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Override the default severity. Security violations stay critical.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        if !self.is_security_violation() {
            self.severity = severity;
        }
        self
    }

    /// Override recoverability. Fail-fast kinds stay unrecoverable.
    #[must_use]
    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable && !self.kind.is_fail_fast();
        self
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub fn family(&self) -> ErrorFamily {
        self.kind.family()
    }

    #[must_use]
    pub fn is_security_violation(&self) -> bool {
        matches!(self.kind, ErrorKind::SecurityViolation { .. })
    }

    #[must_use]
    pub fn is_fail_fast(&self) -> bool {
        self.kind.is_fail_fast()
    }

    #[must_use]
    pub fn timeout_ms(&self) -> Option<u64> {
        match self.kind {
            ErrorKind::Timeout { timeout_ms } => Some(timeout_ms),
            _ => None,
        }
    }

    #[must_use]
    pub fn partial(&self) -> Option<&PartialAnalysis> {
        match &self.kind {
            ErrorKind::PartialAnalysis(partial) => Some(partial),
            _ => None,
        }
    }

    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// The single line shown to users: `[timestamp] SEVERITY: message (Code: CODE)`.
    #[must_use]
    pub fn user_line(&self) -> String {
        format!(
            "[{}] {}: {} (Code: {})",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.severity,
            self.message,
            self.code()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_line_has_fixed_shape() {
        let err = AssessmentError::configuration("memory limit must be positive")
            .with_context("field", "memory");
        let line = err.user_line();
        assert!(line.starts_with('['));
        assert!(line.ends_with("HIGH: memory limit must be positive (Code: CONFIGURATION_ERROR)"));
        assert!(!line.contains("field"));
    }

    #[test]
    fn security_violation_cannot_be_softened() {
        let err = AssessmentError::filesystem_violation("escape")
            .with_severity(Severity::Low)
            .with_recoverable(true);
        assert_eq!(err.severity, Severity::Critical);
        assert!(!err.recoverable);
        assert_eq!(err.code(), "FILESYSTEM_SECURITY_VIOLATION");
    }

    #[test]
    fn timeout_carries_value_in_kind_and_context() {
        let err = AssessmentError::timeout("step took too long", 30_000);
        assert_eq!(err.timeout_ms(), Some(30_000));
        assert_eq!(err.context_value("timeoutMs"), Some("30000"));
        assert!(err.recoverable);
    }

    #[test]
    fn partial_analysis_exposes_payload() {
        let err = AssessmentError::partial_analysis(
            "stopped after lint",
            PartialAnalysis {
                environment_id: "env-1".into(),
                completed_steps: vec!["lint".into()],
                ..PartialAnalysis::default()
            },
        );
        let partial = err.partial().expect("payload");
        assert_eq!(partial.completed_count(), 1);
        assert_eq!(err.code(), "PARTIAL_ANALYSIS_FAILURE");
    }

    #[test]
    fn round_trips_through_json() {
        let err = AssessmentError::container_creation("image pull failed").with_cause("EOF");
        let json = serde_json::to_string(&err).unwrap();
        let back: AssessmentError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
