//! Execution report returned by the workflow engine

use chrono::{DateTime, Utc};
use sandcheck_errors::AssessmentError;
use sandcheck_recovery::DegradationPlan;
use sandcheck_types::{AnalysisResults, EnvironmentId};
use serde::{Deserialize, Serialize};

/// Terminal state of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// What happened to one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub name: String,
    pub tool: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Skip reason for skipped steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Ran under a degradation plan
    #[serde(default)]
    pub degraded: bool,
}

impl StepRecord {
    pub(crate) fn skipped(name: &str, tool: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            tool: tool.to_string(),
            status: StepStatus::Skipped,
            attempts: 0,
            duration_ms: 0,
            error: None,
            reason: Some(reason.into()),
            degraded: false,
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowStatus {
    Completed,
    CompletedWithErrors,
    Failed,
}

impl WorkflowStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed-with-errors",
            Self::Failed => "failed",
        }
    }

    /// `Completed` without failures, `Failed` when nothing that ran
    /// succeeded, `CompletedWithErrors` otherwise.
    #[must_use]
    pub fn from_steps(steps: &[StepRecord]) -> Self {
        let failed = steps.iter().filter(|s| s.failed()).count();
        let succeeded = steps.iter().filter(|s| s.succeeded()).count();
        match (failed, succeeded) {
            (0, _) => Self::Completed,
            (_, 0) => Self::Failed,
            _ => Self::CompletedWithErrors,
        }
    }
}

/// A workflow-level error entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowError {
    pub step: String,
    pub code: String,
    pub message: String,
}

impl WorkflowError {
    pub(crate) fn from_error(step: &str, err: &AssessmentError) -> Self {
        Self {
            step: step.to_string(),
            code: err.code().to_string(),
            message: err.message.clone(),
        }
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub workflow: String,
    pub version: String,
    pub environment_id: EnvironmentId,
    pub status: WorkflowStatus,
    pub steps: Vec<StepRecord>,
    pub cleanup: Vec<StepRecord>,
    pub results: AnalysisResults,
    pub errors: Vec<WorkflowError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degradation: Option<DegradationPlan>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionReport {
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Names of steps that succeeded, in completion order.
    #[must_use]
    pub fn completed_steps(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.succeeded())
            .map(|s| s.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, status: StepStatus) -> StepRecord {
        StepRecord {
            name: name.to_string(),
            tool: name.to_string(),
            status,
            attempts: 1,
            duration_ms: 0,
            error: None,
            reason: None,
            degraded: false,
        }
    }

    #[test]
    fn status_from_steps() {
        use StepStatus::{Failed, Skipped, Succeeded};
        assert_eq!(
            WorkflowStatus::from_steps(&[record("a", Succeeded), record("b", Skipped)]),
            WorkflowStatus::Completed
        );
        assert_eq!(
            WorkflowStatus::from_steps(&[record("a", Succeeded), record("b", Failed)]),
            WorkflowStatus::CompletedWithErrors
        );
        assert_eq!(
            WorkflowStatus::from_steps(&[record("a", Failed), record("b", Skipped)]),
            WorkflowStatus::Failed
        );
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&WorkflowStatus::CompletedWithErrors).unwrap();
        assert_eq!(json, r#""completed-with-errors""#);
        assert_eq!(WorkflowStatus::CompletedWithErrors.as_str(), "completed-with-errors");
    }
}
