//! Workflow engine settings and tool command adapters

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How a configured tool is invoked inside the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommandConfig {
    /// Command and fixed arguments; step `args` are appended
    pub command: Vec<String>,
    /// Result category for non-JSON output, e.g. `codeQualityIssues`
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "codeQualityIssues".to_string()
}

/// Workflow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Directory searched for `<name>.json|yaml|yml` definitions
    #[serde(default)]
    pub definitions_dir: Option<PathBuf>,
    /// Base of the per-step retry backoff, doubled on each retry
    #[serde(default = "default_step_backoff_base_ms")]
    pub step_backoff_base_ms: u64,
    #[serde(default = "default_tools")]
    pub tools: BTreeMap<String, ToolCommandConfig>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            definitions_dir: None,
            step_backoff_base_ms: default_step_backoff_base_ms(),
            tools: default_tools(),
        }
    }
}

fn default_step_backoff_base_ms() -> u64 {
    1_000
}

fn tool(command: &[&str], category: &str) -> ToolCommandConfig {
    ToolCommandConfig {
        command: command.iter().map(|s| (*s).to_string()).collect(),
        category: category.to_string(),
    }
}

fn default_tools() -> BTreeMap<String, ToolCommandConfig> {
    BTreeMap::from([
        (
            "dependency-audit".to_string(),
            tool(&["npm", "audit", "--json"], "securityFindings"),
        ),
        (
            "eslint".to_string(),
            tool(&["npx", "--no-install", "eslint", "-f", "json", "."], "codeQualityIssues"),
        ),
        (
            "npm-test".to_string(),
            tool(&["npm", "test", "--silent"], "testResults"),
        ),
        (
            "slither".to_string(),
            tool(&["slither", ".", "--json", "-"], "securityFindings"),
        ),
        (
            "solhint".to_string(),
            tool(&["solhint", "-f", "json", "**/*.sol"], "codeQualityIssues"),
        ),
        (
            "hardhat-test".to_string(),
            tool(&["npx", "--no-install", "hardhat", "test"], "testResults"),
        ),
        (
            "gas-report".to_string(),
            tool(&["npx", "--no-install", "hardhat", "test", "--gas"], "performanceMetrics"),
        ),
        (
            "secret-scan".to_string(),
            tool(&["gitleaks", "detect", "--no-git", "-f", "json", "-r", "-"], "securityFindings"),
        ),
        (
            "file-inventory".to_string(),
            tool(&["find", ".", "-type", "f", "-not", "-path", "./node_modules/*"], "recommendations"),
        ),
        (
            "workspace-cleanup".to_string(),
            tool(&["rm", "-rf", "/tmp/sandcheck"], "recommendations"),
        ),
    ])
}
