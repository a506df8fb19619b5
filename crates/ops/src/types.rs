//! Types returned by operations

use std::path::PathBuf;

use sandcheck_types::{
    AnalysisConfiguration, Environment, SecurityConfiguration, WorkflowDefinition,
};
use sandcheck_workflow::ExecutionReport;
use serde::{Deserialize, Serialize};

/// How `execute_workflow` picks what to run
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowSelection {
    /// Select from the catalog by codebase type, languages and frameworks
    Auto,
    /// A definition file path, a catalog name, or a name under the
    /// configured definitions directory
    Reference(String),
    /// A definition supplied by the caller
    Definition(WorkflowDefinition),
}

impl From<Option<String>> for WorkflowSelection {
    fn from(reference: Option<String>) -> Self {
        reference.map_or(Self::Auto, Self::Reference)
    }
}

/// Summary of a workflow for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInfo {
    pub name: String,
    pub version: String,
    pub codebase_types: Vec<String>,
    pub steps: Vec<String>,
    pub parallel_groups: usize,
    pub cleanup_steps: usize,
}

impl From<&WorkflowDefinition> for WorkflowInfo {
    fn from(definition: &WorkflowDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            version: definition.version.clone(),
            codebase_types: definition.codebase_types.clone(),
            steps: definition.steps.iter().map(|s| s.name.clone()).collect(),
            parallel_groups: definition.parallel_groups.len(),
            cleanup_steps: definition.cleanup.len(),
        }
    }
}

/// Everything `assess` needs: where the code is and how to sandbox it
#[derive(Debug, Clone)]
pub struct AssessmentRequest {
    pub source: PathBuf,
    pub security: SecurityConfiguration,
    pub analysis: AnalysisConfiguration,
    pub workflow: WorkflowSelection,
    /// Leave the environment running afterwards
    pub keep_environment: bool,
}

/// Outcome of a full create, mount, analyze, destroy run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentReport {
    pub environment: Environment,
    pub report: ExecutionReport,
    pub destroyed: bool,
}

/// Operation result that can be serialized for CLI output
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum OperationResult {
    Environment(Box<Environment>),
    EnvironmentList(Vec<Environment>),
    Assessment(Box<AssessmentReport>),
    Workflows(Vec<WorkflowInfo>),
    Workflow(WorkflowInfo),
    Success(String),
}

impl OperationResult {
    /// Convert to a pretty JSON string
    ///
    /// # Errors
    ///
    /// Returns a validation error if the result cannot be serialized.
    pub fn to_json(&self) -> Result<String, sandcheck_errors::AssessmentError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Whether the result describes a clean outcome
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            Self::Assessment(assessment) => {
                assessment.report.status == sandcheck_workflow::WorkflowStatus::Completed
            }
            Self::Environment(_)
            | Self::EnvironmentList(_)
            | Self::Workflows(_)
            | Self::Workflow(_)
            | Self::Success(_) => true,
        }
    }
}
