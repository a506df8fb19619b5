//! Operations context for dependency injection

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use sandcheck_config::Config;
use sandcheck_errors::AssessmentError;
use sandcheck_events::{AppEvent, EventEmitter, EventMeta, EventSender};
use sandcheck_lifecycle::LifecycleManager;
use sandcheck_runtime::ContainerRuntime;
use sandcheck_workflow::{ToolAdapter, WorkflowCatalog, WorkflowEngine};
use uuid::Uuid;

/// Operations context providing access to all system components
pub struct OpsCtx {
    /// Environment lifecycle, security and recovery
    pub lifecycle: Arc<LifecycleManager>,
    /// Workflow engine sharing the lifecycle's recovery manager
    pub engine: WorkflowEngine,
    /// Workflows selectable by name
    pub catalog: WorkflowCatalog,
    /// Event sender for progress reporting
    pub tx: EventSender,
    /// System configuration
    pub config: Config,
    correlation: RwLock<Vec<String>>,
}

impl std::fmt::Debug for OpsCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpsCtx")
            .field("lifecycle", &self.lifecycle)
            .field("engine", &self.engine)
            .field("workflows", &self.catalog.names())
            .finish_non_exhaustive()
    }
}

impl EventEmitter for OpsCtx {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(&self.tx)
    }

    fn enrich_event_meta(&self, _event: &AppEvent, meta: &mut EventMeta) {
        meta.correlate(self.current_correlation());
    }
}

/// Pops its correlation id when dropped
pub struct CorrelationGuard<'a> {
    ctx: &'a OpsCtx,
}

impl Drop for CorrelationGuard<'_> {
    fn drop(&mut self) {
        self.ctx
            .correlation
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
    }
}

impl OpsCtx {
    // No public constructor - use OpsContextBuilder instead

    /// Tag events emitted through this context until the guard drops.
    pub fn push_correlation(&self, label: impl Into<String>) -> CorrelationGuard<'_> {
        let id = format!("{}:{}", label.into(), Uuid::new_v4());
        self.correlation
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        CorrelationGuard { ctx: self }
    }

    #[must_use]
    pub fn current_correlation(&self) -> Option<String> {
        self.correlation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    #[must_use]
    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        self.lifecycle.runtime()
    }
}

/// Builder for operations context
#[derive(Default)]
pub struct OpsContextBuilder {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    tx: Option<EventSender>,
    config: Option<Config>,
    mount_roots: Option<Vec<PathBuf>>,
    catalog: Option<WorkflowCatalog>,
    tools: Vec<Arc<dyn ToolAdapter>>,
    lifecycle: Option<Arc<LifecycleManager>>,
}

impl OpsContextBuilder {
    /// Create new context builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set container runtime
    #[must_use]
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set event sender
    #[must_use]
    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Set configuration
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the mount allow-list derived from the configuration
    #[must_use]
    pub fn with_mount_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.mount_roots = Some(roots);
        self
    }

    /// Replace the built-in workflow catalog
    #[must_use]
    pub fn with_catalog(mut self, catalog: WorkflowCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Register a tool adapter on top of the configured ones
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn ToolAdapter>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Use a prebuilt lifecycle manager instead of building one
    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: Arc<LifecycleManager>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Build the context
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the event sender or the runtime is
    /// missing, or if a component cannot be built from the configuration.
    pub fn build(self) -> Result<OpsCtx, AssessmentError> {
        let tx = self
            .tx
            .ok_or_else(|| missing_component("event_sender"))?;
        let config = self.config.unwrap_or_default();

        let lifecycle = match self.lifecycle {
            Some(lifecycle) => lifecycle,
            None => {
                let runtime = self.runtime.ok_or_else(|| missing_component("runtime"))?;
                let mut builder = LifecycleManager::builder()
                    .with_runtime(runtime)
                    .with_config(config.clone())
                    .with_events(tx.clone());
                if let Some(roots) = self.mount_roots {
                    builder = builder.with_mount_roots(roots);
                }
                Arc::new(builder.build()?)
            }
        };

        let mut engine = WorkflowEngine::from_config(&config.workflow, lifecycle.recovery().clone())?
            .with_events(Some(tx.clone()));
        for tool in self.tools {
            engine = engine.with_tool(tool);
        }

        Ok(OpsCtx {
            lifecycle,
            engine,
            catalog: self.catalog.unwrap_or_default(),
            tx,
            config,
            correlation: RwLock::new(Vec::new()),
        })
    }
}

fn missing_component(component: &str) -> AssessmentError {
    AssessmentError::configuration(format!("operations context is missing the {component}"))
        .with_context("component", component)
}
