//! Packaging finished work into a partial-analysis error

use sandcheck_errors::{AssessmentError, PartialAnalysis};
use sandcheck_types::EnvironmentId;
use serde_json::Value;

use crate::checkpoint::Checkpoint;

/// Wrap `error` so that the completed steps and their results reach the
/// caller. A partial-analysis error is returned unchanged.
#[must_use]
pub fn preserve_partial_results(
    environment_id: &EnvironmentId,
    completed_steps: &[String],
    partial_results: Value,
    last_checkpoint: Option<&Checkpoint>,
    error: &AssessmentError,
) -> AssessmentError {
    if error.partial().is_some() {
        return error.clone();
    }
    let partial = PartialAnalysis {
        environment_id: environment_id.to_string(),
        completed_steps: completed_steps.to_vec(),
        partial_results,
        last_checkpoint: last_checkpoint.and_then(|c| serde_json::to_value(c).ok()),
        original_code: error.code().to_string(),
        original_message: error.message.clone(),
    };
    let mut preserved = AssessmentError::partial_analysis(
        format!(
            "analysis stopped after {} completed steps: {}",
            completed_steps.len(),
            error.message
        ),
        partial,
    )
    .with_context("environmentId", environment_id.as_str())
    .with_context("originalCode", error.code());
    for (key, value) in &error.context {
        preserved = preserved.with_context(key.clone(), value.clone());
    }
    preserved
}
