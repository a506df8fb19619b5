//! Tool adapters and the registry the engine resolves step tools from

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sandcheck_config::{ToolCommandConfig, WorkflowConfig};
use sandcheck_errors::AssessmentError;
use sandcheck_runtime::ContainerRuntime;
use sandcheck_types::{AnalysisConfiguration, ContainerHandle, EnvironmentId, ResultFragment};
use serde_json::Value;

const CATEGORY_KEYS: [&str; 5] = [
    "securityFindings",
    "codeQualityIssues",
    "testResults",
    "performanceMetrics",
    "recommendations",
];

/// The result bucket unstructured tool output lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCategory {
    SecurityFindings,
    CodeQualityIssues,
    TestResults,
    PerformanceMetrics,
    Recommendations,
}

impl ResultCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SecurityFindings => CATEGORY_KEYS[0],
            Self::CodeQualityIssues => CATEGORY_KEYS[1],
            Self::TestResults => CATEGORY_KEYS[2],
            Self::PerformanceMetrics => CATEGORY_KEYS[3],
            Self::Recommendations => CATEGORY_KEYS[4],
        }
    }

    fn bucket(self, fragment: &mut ResultFragment) -> &mut Vec<Value> {
        match self {
            Self::SecurityFindings => &mut fragment.security_findings,
            Self::CodeQualityIssues => &mut fragment.code_quality_issues,
            Self::TestResults => &mut fragment.test_results,
            Self::PerformanceMetrics => &mut fragment.performance_metrics,
            Self::Recommendations => &mut fragment.recommendations,
        }
    }
}

impl fmt::Display for ResultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultCategory {
    type Err = AssessmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "securityFindings" => Ok(Self::SecurityFindings),
            "codeQualityIssues" => Ok(Self::CodeQualityIssues),
            "testResults" => Ok(Self::TestResults),
            "performanceMetrics" => Ok(Self::PerformanceMetrics),
            "recommendations" => Ok(Self::Recommendations),
            other => Err(AssessmentError::configuration(format!(
                "unknown result category '{other}'"
            ))
            .with_context("category", other)),
        }
    }
}

/// Everything a tool invocation may touch
#[derive(Clone)]
pub struct ToolContext {
    pub environment_id: EnvironmentId,
    pub container: ContainerHandle,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub analysis: AnalysisConfiguration,
    pub step: String,
    /// 1-based attempt number
    pub attempt: u32,
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("environment_id", &self.environment_id)
            .field("container", &self.container)
            .field("step", &self.step)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// A single analysis tool
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Run the tool once with the step's `config`.
    async fn execute(
        &self,
        config: &BTreeMap<String, Value>,
        context: &ToolContext,
    ) -> Result<ResultFragment, AssessmentError>;
}

/// Adapter running a fixed command inside the container
#[derive(Debug, Clone)]
pub struct ExecToolAdapter {
    name: String,
    command: Vec<String>,
    category: ResultCategory,
}

impl ExecToolAdapter {
    #[must_use]
    pub fn new(name: impl Into<String>, command: Vec<String>, category: ResultCategory) -> Self {
        Self {
            name: name.into(),
            command,
            category,
        }
    }

    /// Adapter for a configured tool.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty command or an unknown
    /// category.
    pub fn from_config(name: &str, config: &ToolCommandConfig) -> Result<Self, AssessmentError> {
        if config.command.is_empty() {
            return Err(
                AssessmentError::configuration(format!("tool '{name}' has an empty command"))
                    .with_context("tool", name),
            );
        }
        let category = config
            .category
            .parse()
            .map_err(|e: AssessmentError| e.with_context("tool", name))?;
        Ok(Self::new(name, config.command.clone(), category))
    }

    fn argv(&self, config: &BTreeMap<String, Value>) -> Vec<String> {
        let mut argv = self.command.clone();
        match config.get("args") {
            Some(Value::Array(items)) => {
                argv.extend(items.iter().filter_map(|v| v.as_str().map(str::to_string)));
            }
            Some(Value::String(s)) => argv.extend(s.split_whitespace().map(str::to_string)),
            _ => {}
        }
        argv
    }

    /// Fold stdout into a fragment, or `None` when it is not JSON.
    fn parse_json(&self, stdout: &str) -> Option<ResultFragment> {
        let value: Value = serde_json::from_str(stdout).ok()?;
        let mut fragment = ResultFragment::new();
        match value {
            Value::Object(map) if CATEGORY_KEYS.iter().any(|k| map.contains_key(*k)) => {
                fragment = serde_json::from_value(Value::Object(map)).ok()?;
            }
            Value::Array(items) => self.category.bucket(&mut fragment).extend(items),
            Value::Null => {}
            other => self.category.bucket(&mut fragment).push(other),
        }
        Some(fragment)
    }

    fn parse_lines(&self, stdout: &str) -> ResultFragment {
        let mut fragment = ResultFragment::new();
        self.category.bucket(&mut fragment).extend(
            stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| Value::String(l.to_string())),
        );
        fragment
    }
}

#[async_trait]
impl ToolAdapter for ExecToolAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    /// JSON output is folded into the tool's category, or taken as a whole
    /// fragment when it already names categories. Other output becomes one
    /// entry per line. A non-zero exit is only a failure when the output
    /// is not JSON, since scanners exit non-zero when they find something.
    async fn execute(
        &self,
        config: &BTreeMap<String, Value>,
        context: &ToolContext,
    ) -> Result<ResultFragment, AssessmentError> {
        let argv = self.argv(config);
        tracing::debug!(
            environment_id = %context.environment_id,
            step = %context.step,
            tool = %self.name,
            attempt = context.attempt,
            argv = ?argv,
            "running tool"
        );
        let output = context
            .runtime
            .exec(&context.container, &argv)
            .await
            .map_err(|e| e.with_context("tool", self.name.clone()))?;

        let stdout = output.stdout.trim();
        if let Some(fragment) = self.parse_json(stdout) {
            return Ok(fragment);
        }
        if !output.success() {
            return Err(AssessmentError::analysis(format!(
                "tool '{}' exited with status {}",
                self.name, output.exit_code
            ))
            .with_context("tool", self.name.clone())
            .with_context("step", context.step.clone())
            .with_context("exitCode", output.exit_code.to_string())
            .with_context("stderr", output.stderr.trim().to_string()));
        }
        Ok(self.parse_lines(stdout))
    }
}

/// Tool identifiers mapped to adapters
#[derive(Clone, Default)]
pub struct ToolRegistry {
    adapters: HashMap<String, Arc<dyn ToolAdapter>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exec adapters for every configured tool.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error among the tool entries.
    pub fn from_config(config: &WorkflowConfig) -> Result<Self, AssessmentError> {
        let mut registry = Self::new();
        for (name, tool) in &config.tools {
            registry.register(Arc::new(ExecToolAdapter::from_config(name, tool)?));
        }
        Ok(registry)
    }

    /// Add an adapter, replacing any with the same name.
    pub fn register(&mut self, adapter: Arc<dyn ToolAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolAdapter>> {
        self.adapters.get(name).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandcheck_runtime::{ContainerSpec, ExecOutput, HostConstraints, MemoryRuntime, NetworkMode};
    use serde_json::json;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "tool-test".into(),
            image: "node:20".into(),
            working_dir: "/workspace".into(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            command: vec!["sleep".into(), "infinity".into()],
            host: HostConstraints {
                memory_bytes: 1 << 29,
                cpu_quota: 50_000,
                cpu_period: 100_000,
                disk_bytes: 1 << 30,
                pids_limit: 128,
                network_mode: NetworkMode::None,
                cap_drop: vec!["ALL".into()],
                cap_add: vec![],
                privileged: false,
                security_opts: vec!["no-new-privileges".into()],
                read_only_rootfs: true,
                tmpfs: vec![],
            },
        }
    }

    async fn context(runtime: &MemoryRuntime) -> ToolContext {
        let handle = runtime.create(&spec()).await.unwrap();
        runtime.start(&handle).await.unwrap();
        ToolContext {
            environment_id: EnvironmentId::from("env-tool"),
            container: handle,
            runtime: Arc::new(runtime.clone()),
            analysis: AnalysisConfiguration::new("nodejs"),
            step: "audit".to_string(),
            attempt: 1,
        }
    }

    fn audit() -> ExecToolAdapter {
        ExecToolAdapter::new(
            "dependency-audit",
            vec!["npm".into(), "audit".into()],
            ResultCategory::SecurityFindings,
        )
    }

    #[tokio::test]
    async fn json_array_lands_in_the_category() {
        let runtime = MemoryRuntime::new();
        runtime.set_exec_handler(|_, argv| {
            assert_eq!(argv, ["npm", "audit", "--omit=dev"]);
            Ok(ExecOutput {
                exit_code: 1,
                stdout: r#"[{"id":"CVE-1"},{"id":"CVE-2"}]"#.to_string(),
                stderr: String::new(),
            })
        });
        let ctx = context(&runtime).await;
        let config = BTreeMap::from([("args".to_string(), json!(["--omit=dev"]))]);

        let fragment = audit().execute(&config, &ctx).await.unwrap();
        assert_eq!(fragment.security_findings.len(), 2);
        assert_eq!(fragment.len(), 2);
    }

    #[tokio::test]
    async fn categorized_json_is_taken_as_a_fragment() {
        let runtime = MemoryRuntime::new();
        runtime.set_exec_handler(|_, _| {
            Ok(ExecOutput::ok(
                r#"{"testResults":[{"passed":12}],"recommendations":["add coverage"]}"#,
            ))
        });
        let ctx = context(&runtime).await;
        let fragment = audit().execute(&BTreeMap::new(), &ctx).await.unwrap();
        assert_eq!(fragment.test_results, vec![json!({"passed": 12})]);
        assert_eq!(fragment.recommendations.len(), 1);
        assert!(fragment.security_findings.is_empty());
    }

    #[tokio::test]
    async fn plain_text_becomes_one_entry_per_line() {
        let runtime = MemoryRuntime::new();
        runtime.set_exec_handler(|_, _| Ok(ExecOutput::ok("./a.js\n\n./b.js\n")));
        let ctx = context(&runtime).await;
        let inventory = ExecToolAdapter::new("file-inventory", vec!["find".into()], ResultCategory::Recommendations);
        let fragment = inventory.execute(&BTreeMap::new(), &ctx).await.unwrap();
        assert_eq!(fragment.recommendations, vec![json!("./a.js"), json!("./b.js")]);
    }

    #[tokio::test]
    async fn failing_text_output_is_an_analysis_error() {
        let runtime = MemoryRuntime::new();
        runtime.set_exec_handler(|_, _| {
            Ok(ExecOutput {
                exit_code: 2,
                stdout: "boom".to_string(),
                stderr: "segfault".to_string(),
            })
        });
        let ctx = context(&runtime).await;
        let err = audit().execute(&BTreeMap::new(), &ctx).await.unwrap_err();
        assert_eq!(err.code(), "ANALYSIS_FAILED");
        assert_eq!(err.context_value("stderr"), Some("segfault"));
        assert!(err.recoverable);
    }

    #[test]
    fn registry_builds_from_config() {
        let registry = ToolRegistry::from_config(&WorkflowConfig::default()).unwrap();
        assert!(registry.get("eslint").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert!(registry.names().contains(&"secret-scan".to_string()));
    }

    #[test]
    fn unknown_category_is_rejected() {
        let config = ToolCommandConfig {
            command: vec!["true".into()],
            category: "vibes".into(),
        };
        let err = ExecToolAdapter::from_config("odd", &config).unwrap_err();
        assert_eq!(err.context_value("tool"), Some("odd"));
    }
}
