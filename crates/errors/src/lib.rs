#![warn(mismatched_lifetime_syntaxes)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Error types for sandcheck
//!
//! Every failure is an [`AssessmentError`]: one tagged type carrying a code,
//! a severity, a recoverability flag, a timestamp and a context map. Retry
//! predicates, circuit breakers and recovery strategies all reason over
//! [`ErrorKind`] rather than over message strings.

use std::borrow::Cow;

pub mod error;
pub mod kind;
pub mod partial;

pub use error::AssessmentError;
pub use kind::{ContainerOperation, ErrorFamily, ErrorKind, ResourceIssue, Severity, ViolationKind};
pub use partial::PartialAnalysis;

/// Result type alias for sandcheck operations
pub type Result<T> = std::result::Result<T, AssessmentError>;

/// Minimal interface for rendering user-facing error information.
pub trait UserFacingError {
    /// Short message suitable for CLI output.
    fn user_message(&self) -> Cow<'_, str>;

    /// Optional remediation hint.
    fn user_hint(&self) -> Option<&'static str> {
        None
    }

    /// Whether retrying the same operation is likely to succeed.
    fn is_retryable(&self) -> bool {
        false
    }

    /// Stable error code for structured reporting.
    fn user_code(&self) -> Option<&'static str> {
        None
    }
}

impl UserFacingError for AssessmentError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.user_line())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match &self.kind {
            ErrorKind::Configuration => {
                Some("Fix the security or analysis configuration and retry.")
            }
            ErrorKind::Validation => Some("Correct the request or workflow definition."),
            ErrorKind::SecurityViolation { .. } => {
                Some("The environment was terminated; inspect the source before resubmitting.")
            }
            ErrorKind::Resource {
                issue: ResourceIssue::LimitExceeded,
            } => Some("Lower the requested resource limits."),
            ErrorKind::Container { .. } => Some("Check that the container runtime is reachable."),
            ErrorKind::PartialAnalysis(_) => {
                Some("Completed steps are included; rerun to finish the remaining ones.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        self.recoverable && !self.is_fail_fast()
    }

    fn user_code(&self) -> Option<&'static str> {
        Some(self.code())
    }
}

impl From<std::io::Error> for AssessmentError {
    fn from(err: std::io::Error) -> Self {
        Self::external_resource(format!("I/O error: {err}"))
            .with_context("ioKind", format!("{:?}", err.kind()))
            .with_cause(err)
    }
}

impl From<serde_json::Error> for AssessmentError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(format!("JSON error: {err}")).with_cause(err)
    }
}

impl From<serde_yml::Error> for AssessmentError {
    fn from(err: serde_yml::Error) -> Self {
        Self::validation(format!("YAML error: {err}")).with_cause(err)
    }
}

impl From<toml::de::Error> for AssessmentError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(format!("TOML error: {err}")).with_cause(err)
    }
}
