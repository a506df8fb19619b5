//! Analysis result aggregation

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Findings grouped into the five reporting categories.
///
/// A single tool returns one of these as its fragment; the workflow engine
/// folds fragments together with [`AnalysisResults::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResults {
    #[serde(default)]
    pub security_findings: Vec<Value>,
    #[serde(default)]
    pub code_quality_issues: Vec<Value>,
    #[serde(default)]
    pub test_results: Vec<Value>,
    #[serde(default)]
    pub performance_metrics: Vec<Value>,
    #[serde(default)]
    pub recommendations: Vec<Value>,
}

/// The output of one tool invocation
pub type ResultFragment = AnalysisResults;

impl AnalysisResults {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn security_finding(mut self, finding: Value) -> Self {
        self.security_findings.push(finding);
        self
    }

    #[must_use]
    pub fn quality_issue(mut self, issue: Value) -> Self {
        self.code_quality_issues.push(issue);
        self
    }

    #[must_use]
    pub fn test_result(mut self, result: Value) -> Self {
        self.test_results.push(result);
        self
    }

    #[must_use]
    pub fn metric(mut self, metric: Value) -> Self {
        self.performance_metrics.push(metric);
        self
    }

    #[must_use]
    pub fn recommendation(mut self, recommendation: Value) -> Self {
        self.recommendations.push(recommendation);
        self
    }

    /// Append every entry of `fragment`. Duplicates are kept.
    pub fn merge(&mut self, fragment: ResultFragment) {
        self.security_findings.extend(fragment.security_findings);
        self.code_quality_issues.extend(fragment.code_quality_issues);
        self.test_results.extend(fragment.test_results);
        self.performance_metrics.extend(fragment.performance_metrics);
        self.recommendations.extend(fragment.recommendations);
    }

    /// Total number of entries across all categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.security_findings.len()
            + self.code_quality_issues.len()
            + self.test_results.len()
            + self.performance_metrics.len()
            + self.recommendations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot as a JSON value, for checkpoints and partial results.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
