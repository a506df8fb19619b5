//! Error families and codes
//!
//! Every failure in the system is classified by an [`ErrorKind`]. The kind
//! decides the stable code, the default severity and whether the failure is
//! recoverable; retry predicates, circuit breakers and recovery strategies
//! all reason over it.

use std::fmt;

use thiserror::Error;

use crate::partial::PartialAnalysis;

/// How bad a failure is, ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Upper-case label used in the user-visible error line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container runtime operation that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ContainerOperation {
    #[error("creation")]
    Creation,
    #[error("start")]
    Start,
    #[error("stop")]
    Stop,
    #[error("destroy")]
    Destroy,
}

/// Resource problem reported by the runtime or the limit translator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ResourceIssue {
    #[error("allocation")]
    Allocation,
    #[error("limit exceeded")]
    LimitExceeded,
    #[error("insufficient")]
    Insufficient,
}

/// Category of a detected security violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ViolationKind {
    #[error("network")]
    Network,
    #[error("filesystem")]
    Filesystem,
    #[error("privilege escalation")]
    PrivilegeEscalation,
}

/// Coarse grouping of error kinds, used by strategy predicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorFamily {
    Container,
    Resource,
    Security,
    Analysis,
    Workflow,
    PartialAnalysis,
    Configuration,
    Validation,
    Network,
    ExternalResource,
    Timeout,
}

impl ErrorFamily {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Resource => "resource",
            Self::Security => "security",
            Self::Analysis => "analysis",
            Self::Workflow => "workflow",
            Self::PartialAnalysis => "partial-analysis",
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::Network => "network",
            Self::ExternalResource => "external-resource",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tagged error taxonomy.
#[derive(Clone, Debug, PartialEq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "family", rename_all = "snake_case"))]
pub enum ErrorKind {
    #[error("container {operation} failed")]
    Container { operation: ContainerOperation },

    #[error("resource {issue}")]
    Resource { issue: ResourceIssue },

    #[error("{violation} security violation")]
    SecurityViolation { violation: ViolationKind },

    #[error("analysis failed")]
    Analysis,

    #[error("workflow execution failed")]
    WorkflowExecution,

    #[error("partial analysis")]
    PartialAnalysis(Box<PartialAnalysis>),

    #[error("configuration error")]
    Configuration,

    #[error("validation error")]
    Validation,

    #[error("network error")]
    Network,

    #[error("external resource error")]
    ExternalResource,

    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl ErrorKind {
    /// Stable code surfaced to callers and logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Container { operation } => match operation {
                ContainerOperation::Creation => "CONTAINER_CREATION_FAILED",
                ContainerOperation::Start => "CONTAINER_START_FAILED",
                ContainerOperation::Stop => "CONTAINER_STOP_FAILED",
                ContainerOperation::Destroy => "CONTAINER_DESTROY_FAILED",
            },
            Self::Resource { issue } => match issue {
                ResourceIssue::Allocation => "RESOURCE_ALLOCATION_FAILED",
                ResourceIssue::LimitExceeded => "RESOURCE_LIMIT_EXCEEDED",
                ResourceIssue::Insufficient => "INSUFFICIENT_RESOURCES",
            },
            Self::SecurityViolation { violation } => match violation {
                ViolationKind::Network => "NETWORK_SECURITY_VIOLATION",
                ViolationKind::Filesystem => "FILESYSTEM_SECURITY_VIOLATION",
                ViolationKind::PrivilegeEscalation => "PRIVILEGE_ESCALATION_ATTEMPT",
            },
            Self::Analysis => "ANALYSIS_FAILED",
            Self::WorkflowExecution => "WORKFLOW_EXECUTION_FAILED",
            Self::PartialAnalysis(_) => "PARTIAL_ANALYSIS_FAILURE",
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::Network => "NETWORK_ERROR",
            Self::ExternalResource => "EXTERNAL_RESOURCE_ERROR",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
        }
    }

    #[must_use]
    pub fn family(&self) -> ErrorFamily {
        match self {
            Self::Container { .. } => ErrorFamily::Container,
            Self::Resource { .. } => ErrorFamily::Resource,
            Self::SecurityViolation { .. } => ErrorFamily::Security,
            Self::Analysis => ErrorFamily::Analysis,
            Self::WorkflowExecution => ErrorFamily::Workflow,
            Self::PartialAnalysis(_) => ErrorFamily::PartialAnalysis,
            Self::Configuration => ErrorFamily::Configuration,
            Self::Validation => ErrorFamily::Validation,
            Self::Network => ErrorFamily::Network,
            Self::ExternalResource => ErrorFamily::ExternalResource,
            Self::Timeout { .. } => ErrorFamily::Timeout,
        }
    }

    /// Severity a freshly constructed error of this kind carries.
    #[must_use]
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::Container { operation } => match operation {
                ContainerOperation::Creation | ContainerOperation::Start => Severity::High,
                ContainerOperation::Stop | ContainerOperation::Destroy => Severity::Medium,
            },
            Self::Resource { issue } => match issue {
                ResourceIssue::Allocation | ResourceIssue::LimitExceeded => Severity::High,
                ResourceIssue::Insufficient => Severity::Medium,
            },
            Self::SecurityViolation { .. } => Severity::Critical,
            Self::Configuration | Self::Validation => Severity::High,
            Self::Analysis
            | Self::WorkflowExecution
            | Self::PartialAnalysis(_)
            | Self::Network
            | Self::ExternalResource
            | Self::Timeout { .. } => Severity::Medium,
        }
    }

    /// Whether a freshly constructed error of this kind may be recovered from.
    #[must_use]
    pub fn default_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Resource {
                issue: ResourceIssue::LimitExceeded
            } | Self::SecurityViolation { .. }
                | Self::Configuration
                | Self::Validation
        )
    }

    /// Container lifecycle failures.
    #[must_use]
    pub fn is_container_class(&self) -> bool {
        matches!(self, Self::Container { .. })
    }

    /// Resource allocation and capacity failures.
    #[must_use]
    pub fn is_resource_class(&self) -> bool {
        matches!(self, Self::Resource { .. })
    }

    /// Failures raised while analysis steps were running.
    #[must_use]
    pub fn is_analysis_class(&self) -> bool {
        matches!(
            self,
            Self::Analysis | Self::WorkflowExecution | Self::PartialAnalysis(_) | Self::Timeout { .. }
        )
    }

    /// Kinds that must fail immediately without retry or recovery.
    #[must_use]
    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            Self::SecurityViolation { .. } | Self::Configuration | Self::Validation
        )
    }
}
