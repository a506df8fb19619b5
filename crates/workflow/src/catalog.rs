//! Built-in workflows and automatic selection

use sandcheck_errors::AssessmentError;
use sandcheck_types::{
    AnalysisConfiguration, StepCondition, WorkflowDefinition, WorkflowStep, ANY_CODEBASE,
};
use serde_json::json;

use crate::definition::validate_definition;

pub const NODEJS_STANDARD: &str = "nodejs-standard";
pub const SOLIDITY_STANDARD: &str = "solidity-standard";
pub const MIXED_COMPREHENSIVE: &str = "mixed-comprehensive";
pub const GENERIC_BASIC: &str = "generic-basic";

const SOLIDITY_FRAMEWORKS: &[&str] = &["hardhat", "truffle", "foundry"];
const JS_FRAMEWORKS: &[&str] = &["react", "express", "next", "vue", "angular"];

fn cleanup() -> WorkflowStep {
    WorkflowStep::new("workspace-cleanup", "workspace-cleanup").continue_on_error()
}

fn nodejs_standard() -> WorkflowDefinition {
    WorkflowDefinition::new(NODEJS_STANDARD, "1.0.0")
        .for_codebases(["nodejs"])
        .step(
            WorkflowStep::new("dependency-audit", "dependency-audit")
                .when(StepCondition::file_exists("package.json"))
                .with_retries(1),
        )
        .step(WorkflowStep::new("lint", "eslint").continue_on_error())
        .step(WorkflowStep::new("secret-scan", "secret-scan"))
        .step(
            WorkflowStep::new("unit-tests", "npm-test")
                .with_timeout_ms(600_000)
                .with_retries(1),
        )
        .parallel(["lint", "secret-scan"])
        .cleanup_step(cleanup())
}

fn solidity_standard() -> WorkflowDefinition {
    WorkflowDefinition::new(SOLIDITY_STANDARD, "1.0.0")
        .for_codebases(["solidity"])
        .step(WorkflowStep::new("solhint", "solhint").continue_on_error())
        .step(WorkflowStep::new("slither", "slither").with_retries(1))
        .step(
            WorkflowStep::new("hardhat-tests", "hardhat-test")
                .when(StepCondition::framework("hardhat"))
                .with_timeout_ms(900_000),
        )
        .step(WorkflowStep::new("gas-optimization", "gas-report").continue_on_error())
        .parallel(["solhint", "slither"])
        .cleanup_step(cleanup())
}

fn mixed_comprehensive() -> WorkflowDefinition {
    WorkflowDefinition::new(MIXED_COMPREHENSIVE, "1.0.0")
        .for_codebases(["mixed"])
        .step(
            WorkflowStep::new("dependency-audit", "dependency-audit")
                .when(StepCondition::file_exists("package.json"))
                .with_retries(1),
        )
        .step(WorkflowStep::new("lint", "eslint").continue_on_error())
        .step(WorkflowStep::new("solhint", "solhint").continue_on_error())
        .step(WorkflowStep::new("slither", "slither").with_retries(1))
        .step(WorkflowStep::new("secret-scan", "secret-scan"))
        .step(
            WorkflowStep::new("unit-tests", "npm-test")
                .with_timeout_ms(600_000)
                .with_config("args", json!(["--maxWorkers=4"])),
        )
        .step(
            WorkflowStep::new("hardhat-tests", "hardhat-test")
                .when(StepCondition::framework("hardhat")),
        )
        .step(WorkflowStep::new("gas-optimization", "gas-report").continue_on_error())
        .parallel(["lint", "solhint", "secret-scan"])
        .cleanup_step(cleanup())
}

fn generic_basic() -> WorkflowDefinition {
    WorkflowDefinition::new(GENERIC_BASIC, "1.0.0")
        .for_codebases([ANY_CODEBASE])
        .step(WorkflowStep::new("inventory", "file-inventory"))
        .step(WorkflowStep::new("secret-scan", "secret-scan"))
        .cleanup_step(cleanup())
}

/// Named workflows available without a definition file
#[derive(Debug, Clone)]
pub struct WorkflowCatalog {
    definitions: Vec<WorkflowDefinition>,
}

impl Default for WorkflowCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl WorkflowCatalog {
    /// The four built-in workflows.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            definitions: vec![
                nodejs_standard(),
                solidity_standard(),
                mixed_comprehensive(),
                generic_basic(),
            ],
        }
    }

    /// Add or replace a workflow by name.
    ///
    /// # Errors
    ///
    /// Returns a validation error for structurally invalid definitions.
    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<(), AssessmentError> {
        validate_definition(&definition)?;
        self.definitions.retain(|d| d.name != definition.name);
        self.definitions.push(definition);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.name.as_str()).collect()
    }

    #[must_use]
    pub fn definitions(&self) -> &[WorkflowDefinition] {
        &self.definitions
    }

    /// Pick a workflow for `analysis`.
    ///
    /// A nodejs codebase declaring Solidity or a Solidity framework, and a
    /// solidity codebase declaring a JavaScript application framework, are
    /// treated as mixed. Otherwise the first workflow naming
    /// the codebase type wins, then the generic one.
    #[must_use]
    pub fn select(&self, analysis: &AnalysisConfiguration) -> Option<&WorkflowDefinition> {
        let codebase = effective_codebase(analysis);
        self.definitions
            .iter()
            .find(|d| !d.is_generic() && d.supports(&codebase))
            .or_else(|| self.definitions.iter().find(|d| d.is_generic()))
    }
}

fn declares(set: &std::collections::BTreeSet<String>, candidates: &[&str]) -> bool {
    set.iter()
        .any(|item| candidates.iter().any(|c| item.eq_ignore_ascii_case(c)))
}

fn effective_codebase(analysis: &AnalysisConfiguration) -> String {
    let declared = analysis.codebase_type.trim().to_ascii_lowercase();
    let solidity = declares(&analysis.languages, &["solidity"])
        || declares(&analysis.frameworks, SOLIDITY_FRAMEWORKS);
    let js_only_frameworks = declares(&analysis.frameworks, JS_FRAMEWORKS);
    match declared.as_str() {
        "nodejs" if solidity => "mixed".to_string(),
        "solidity" if js_only_frameworks => "mixed".to_string(),
        _ => declared,
    }
}
