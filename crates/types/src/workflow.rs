//! Declarative workflow definitions

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Codebase type wildcard accepted by generic workflows
pub const ANY_CODEBASE: &str = "*";

/// What a step condition inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionKind {
    FileExists,
    LanguageDetected,
    FrameworkDetected,
    Custom,
}

/// How a condition's value is compared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    #[default]
    Equals,
    Contains,
    Matches,
}

/// Gate deciding whether a step runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCondition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    pub value: String,
    #[serde(default)]
    pub operator: ConditionOperator,
}

impl StepCondition {
    pub fn file_exists(path: impl Into<String>) -> Self {
        Self {
            kind: ConditionKind::FileExists,
            value: path.into(),
            operator: ConditionOperator::Equals,
        }
    }

    pub fn language(language: impl Into<String>) -> Self {
        Self {
            kind: ConditionKind::LanguageDetected,
            value: language.into(),
            operator: ConditionOperator::Equals,
        }
    }

    pub fn framework(framework: impl Into<String>) -> Self {
        Self {
            kind: ConditionKind::FrameworkDetected,
            value: framework.into(),
            operator: ConditionOperator::Equals,
        }
    }
}

/// One named, independently retryable unit of analysis work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub name: String,
    pub tool: String,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StepCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default)]
    pub continue_on_error: bool,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tool: tool.into(),
            config: BTreeMap::new(),
            condition: None,
            timeout_ms: None,
            retries: None,
            continue_on_error: false,
        }
    }

    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn when(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    #[must_use]
    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    /// Configured retry count, zero when absent.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retries.unwrap_or(0)
    }

    /// Command-line style arguments from the `args` config entry.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        match self.config.get("args") {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(serde_json::Value::String(s)) => {
                s.split_whitespace().map(str::to_string).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// A named, versioned analysis pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub codebase_types: Vec<String>,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub parallel_groups: Vec<Vec<String>>,
    #[serde(default)]
    pub cleanup: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            codebase_types: Vec::new(),
            steps: Vec::new(),
            parallel_groups: Vec::new(),
            cleanup: Vec::new(),
        }
    }

    #[must_use]
    pub fn for_codebases<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codebase_types = types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn parallel<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parallel_groups
            .push(names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn cleanup_step(mut self, step: WorkflowStep) -> Self {
        self.cleanup.push(step);
        self
    }

    /// Whether this workflow declares support for `codebase_type`.
    #[must_use]
    pub fn supports(&self, codebase_type: &str) -> bool {
        self.codebase_types
            .iter()
            .any(|t| t == ANY_CODEBASE || t.eq_ignore_ascii_case(codebase_type))
    }

    #[must_use]
    pub fn is_generic(&self) -> bool {
        self.codebase_types.iter().any(|t| t == ANY_CODEBASE)
    }

    #[must_use]
    pub fn find_step(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Index of the parallel group containing `step`, if any.
    #[must_use]
    pub fn group_of(&self, step: &str) -> Option<usize> {
        self.parallel_groups
            .iter()
            .position(|group| group.iter().any(|name| name == step))
    }

    /// Names of steps that belong to some parallel group.
    #[must_use]
    pub fn grouped_steps(&self) -> HashSet<&str> {
        self.parallel_groups
            .iter()
            .flatten()
            .map(String::as_str)
            .collect()
    }
}
