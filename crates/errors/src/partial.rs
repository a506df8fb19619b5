//! Payload carried by partial-analysis failures

use serde_json::Value;

/// Work that was finished before an assessment failed.
///
/// Returned to callers inside a `PARTIAL_ANALYSIS_FAILURE` error so that a
/// late failure never discards results that were already produced.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct PartialAnalysis {
    pub environment_id: String,
    pub completed_steps: Vec<String>,
    pub partial_results: Value,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub last_checkpoint: Option<Value>,
    pub original_code: String,
    pub original_message: String,
}

impl PartialAnalysis {
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.completed_steps.len()
    }

    #[must_use]
    pub fn has_results(&self) -> bool {
        !matches!(self.partial_results, Value::Null)
    }
}
