//! Shared fixtures: an operations context over the in-memory runtime

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sandcheck_config::{Config, SecurityPolicyConfig};
use sandcheck_errors::AssessmentError;
use sandcheck_events::{AppEvent, EventReceiver};
use sandcheck_lifecycle::LifecycleManager;
use sandcheck_ops::{OpsContextBuilder, OpsCtx};
use sandcheck_runtime::{ExecOutput, MemoryRuntime};
use sandcheck_security::{HostCapacity, SecurityPolicyEngine};
use sandcheck_types::{AnalysisConfiguration, ResultFragment, SecurityConfiguration};
use sandcheck_workflow::{ToolAdapter, ToolContext};
use serde_json::{json, Value};
use tempfile::TempDir;

pub struct TestEnvironment {
    pub ctx: OpsCtx,
    pub runtime: MemoryRuntime,
    pub events: EventReceiver,
    pub root: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_tools(Vec::new())
    }

    pub fn with_tools(tools: Vec<Arc<dyn ToolAdapter>>) -> Self {
        let (tx, rx) = sandcheck_events::channel();
        let runtime = MemoryRuntime::new();
        runtime.set_exec_handler(|_, argv| {
            let stdout = match argv.first().map(String::as_str) {
                Some("npm") if argv.get(1).is_some_and(|a| a == "audit") => {
                    r#"[{"id":"GHSA-demo","severity":"high"}]"#
                }
                Some("npm") => r#"{"testResults":[{"suite":"unit","passed":3,"failed":0}]}"#,
                Some("npx") => r#"[{"rule":"no-eval","file":"index.js"}]"#,
                Some("gitleaks") => "[]",
                _ => "",
            };
            Ok(ExecOutput::ok(stdout))
        });
        let root = tempfile::tempdir().unwrap();
        let config = Config::default();
        let security = SecurityPolicyEngine::new(
            &SecurityPolicyConfig::default(),
            "sandcheck-net",
            Some(tx.clone()),
        )
        .unwrap()
        .with_host_capacity(HostCapacity {
            available_memory_bytes: 64 << 30,
            cpus: 16,
        });
        let lifecycle = LifecycleManager::builder()
            .with_runtime(Arc::new(runtime.clone()))
            .with_config(config.clone())
            .with_security(Arc::new(security))
            .with_mount_roots(vec![root.path().to_path_buf()])
            .with_events(tx.clone())
            .build()
            .unwrap();
        let mut builder = OpsContextBuilder::new()
            .with_event_sender(tx)
            .with_config(config)
            .with_lifecycle(Arc::new(lifecycle));
        for tool in tools {
            builder = builder.with_tool(tool);
        }
        Self {
            ctx: builder.build().unwrap(),
            runtime,
            events: rx,
            root,
        }
    }

    pub fn drain(&mut self) -> Vec<AppEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.events.try_recv() {
            events.push(message.event);
        }
        events
    }
}

pub fn write_nodejs_project(dir: &Path) {
    fs::write(
        dir.join("package.json"),
        r#"{"name":"demo","version":"1.0.0","scripts":{"test":"node test.js"}}"#,
    )
    .unwrap();
    fs::write(dir.join("index.js"), "module.exports = (a, b) => a + b;\n").unwrap();
    fs::write(
        dir.join("test.js"),
        "const add = require('./index');\nif (add(1, 2) !== 3) process.exit(1);\n",
    )
    .unwrap();
}

pub fn nodejs_limits() -> SecurityConfiguration {
    SecurityConfiguration::default().with_limits("0.5", "512m", "1g")
}

pub fn nodejs_analysis() -> AnalysisConfiguration {
    AnalysisConfiguration::new("nodejs").with_language("javascript")
}

/// Tool adapter that fails its first `failures` calls
pub struct Scripted {
    name: String,
    failures: u32,
    delay: Duration,
    error: fn(String) -> AssessmentError,
    calls: AtomicU32,
}

impl Scripted {
    pub fn new(name: &str, failures: u32) -> Arc<Self> {
        Self::slow(name, failures, Duration::ZERO)
    }

    pub fn slow(name: &str, failures: u32, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failures,
            delay,
            error: |message| AssessmentError::analysis(message),
            calls: AtomicU32::new(0),
        })
    }

    /// Adapter whose every call fails with the error `error` builds
    pub fn failing(name: &str, error: fn(String) -> AssessmentError) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failures: u32::MAX,
            delay: Duration::ZERO,
            error,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolAdapter for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _config: &BTreeMap<String, Value>,
        context: &ToolContext,
    ) -> Result<ResultFragment, AssessmentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call <= self.failures {
            return Err((self.error)(format!("{} failed on call {call}", self.name)));
        }
        Ok(ResultFragment::new().security_finding(json!({
            "tool": self.name,
            "step": context.step,
        })))
    }
}
