//! Per-environment recovery bookkeeping

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sandcheck_errors::AssessmentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The error that triggered the latest recovery attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub code: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl From<&AssessmentError> for LastError {
    fn from(err: &AssessmentError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.message.clone(),
            at: err.timestamp,
        }
    }
}

/// Recovery state of one environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryState {
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    pub recovery_attempts: u32,
    pub max_recovery_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    /// Attempts per strategy name
    #[serde(default)]
    pub strategy_attempts: BTreeMap<String, u32>,
    /// Results carried forward by partial continuation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_results: Option<Value>,
}

impl RecoveryState {
    #[must_use]
    pub fn new(max_recovery_attempts: u32) -> Self {
        Self {
            max_recovery_attempts,
            ..Self::default()
        }
    }

    pub fn complete_step(&mut self, step: impl Into<String>) {
        let step = step.into();
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
    }

    pub fn fail_step(&mut self, step: impl Into<String>, error: &AssessmentError) {
        self.failed_steps.push(step.into());
        self.last_error = Some(LastError::from(error));
    }

    /// No further recovery attempt is allowed.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.recovery_attempts >= self.max_recovery_attempts
    }

    #[must_use]
    pub fn strategy_attempts(&self, strategy: &str) -> u32 {
        self.strategy_attempts.get(strategy).copied().unwrap_or(0)
    }

    /// Serializable copy for checkpoints.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_steps_are_not_duplicated() {
        let mut state = RecoveryState::new(3);
        state.complete_step("container-creation");
        state.complete_step("container-creation");
        assert_eq!(state.completed_steps, vec!["container-creation"]);
    }

    #[test]
    fn failing_a_step_remembers_the_error() {
        let mut state = RecoveryState::new(1);
        state.fail_step("eslint", &AssessmentError::analysis("lint crashed"));
        assert_eq!(state.failed_steps, vec!["eslint"]);
        assert_eq!(state.last_error.as_ref().map(|e| e.code.as_str()), Some("ANALYSIS_FAILED"));
        assert!(!state.exhausted());
        state.recovery_attempts = 1;
        assert!(state.exhausted());
    }

    #[test]
    fn snapshot_uses_camel_case() {
        let snapshot = RecoveryState::new(3).snapshot();
        assert_eq!(snapshot["maxRecoveryAttempts"], 3);
        assert!(snapshot["completedSteps"].as_array().unwrap().is_empty());
    }
}
