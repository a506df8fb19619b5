//! Lifecycle manager: construction and environment creation

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sandcheck_config::{Config, LifecycleConfig, RetryConfig};
use sandcheck_errors::AssessmentError;
use sandcheck_events::{
    AppEvent, EnvironmentEvent, EventEmitter, EventSender, FailureContext, ResilienceEvent,
};
use sandcheck_recovery::{Checkpoint, RecoveryManager, RecoveryState};
use sandcheck_resilience::{
    with_retry, BreakerSettings, CircuitBreakerRegistry, OperationClass, RetryPolicy,
};
use sandcheck_runtime::{is_not_found, ContainerRuntime, ContainerSpec};
use sandcheck_security::{ContainerTemplate, SecurityPolicyEngine};
use sandcheck_types::{
    AnalysisConfiguration, CodebaseType, ContainerHandle, Environment, EnvironmentId,
    EnvironmentStatus, SecurityConfiguration,
};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::registry::EnvironmentRegistry;
use crate::validation::validate_request;

/// Owns every active environment and the resources behind it
pub struct LifecycleManager {
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) security: Arc<SecurityPolicyEngine>,
    pub(crate) recovery: Arc<RecoveryManager>,
    pub(crate) breakers: Arc<CircuitBreakerRegistry>,
    pub(crate) registry: EnvironmentRegistry,
    pub(crate) config: LifecycleConfig,
    pub(crate) retry: RetryConfig,
    pub(crate) mount_roots: Vec<PathBuf>,
    pub(crate) events: Option<EventSender>,
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("runtime", &self.runtime.name())
            .field("environments", &self.registry.len())
            .field("image", &self.config.image)
            .field("mount_roots", &self.mount_roots)
            .finish_non_exhaustive()
    }
}

impl EventEmitter for LifecycleManager {
    fn event_sender(&self) -> Option<&EventSender> {
        self.events.as_ref()
    }
}

/// Builder for [`LifecycleManager`]
///
/// Only the runtime is required. Collaborators that are not supplied are
/// built from the configuration and share the builder's event sender.
#[derive(Default)]
pub struct LifecycleBuilder {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    config: Option<Config>,
    security: Option<Arc<SecurityPolicyEngine>>,
    recovery: Option<Arc<RecoveryManager>>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    mount_roots: Option<Vec<PathBuf>>,
    events: Option<EventSender>,
}

impl LifecycleBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn with_security(mut self, security: Arc<SecurityPolicyEngine>) -> Self {
        self.security = Some(security);
        self
    }

    #[must_use]
    pub fn with_recovery(mut self, recovery: Arc<RecoveryManager>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    #[must_use]
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Replace the default mount allow-list.
    #[must_use]
    pub fn with_mount_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.mount_roots = Some(roots);
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// # Errors
    ///
    /// Returns a configuration error if no runtime was supplied or the
    /// security engine cannot be built from the configuration.
    pub fn build(self) -> Result<LifecycleManager, AssessmentError> {
        let runtime = self
            .runtime
            .ok_or_else(|| AssessmentError::configuration("a container runtime is required"))?;
        let config = self.config.unwrap_or_default();

        let security = match self.security {
            Some(security) => security,
            None => Arc::new(SecurityPolicyEngine::new(
                &config.security,
                config.lifecycle.network_prefix.clone(),
                self.events.clone(),
            )?),
        };
        let recovery = self.recovery.unwrap_or_else(|| {
            Arc::new(RecoveryManager::new(&config.recovery).with_events(self.events.clone()))
        });
        let breakers = self.breakers.unwrap_or_else(|| {
            Arc::new(CircuitBreakerRegistry::new(
                BreakerSettings::from(&config.circuit_breaker),
                self.events.clone(),
            ))
        });
        let mount_roots = self
            .mount_roots
            .unwrap_or_else(|| config.allowed_mount_roots());

        Ok(LifecycleManager {
            runtime,
            security,
            recovery,
            breakers,
            registry: EnvironmentRegistry::new(),
            config: config.lifecycle,
            retry: config.retry,
            mount_roots,
            events: self.events,
        })
    }
}

impl LifecycleManager {
    #[must_use]
    pub fn builder() -> LifecycleBuilder {
        LifecycleBuilder::new()
    }

    #[must_use]
    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        Arc::clone(&self.runtime)
    }

    #[must_use]
    pub fn security(&self) -> &Arc<SecurityPolicyEngine> {
        &self.security
    }

    #[must_use]
    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    #[must_use]
    pub fn registry(&self) -> &EnvironmentRegistry {
        &self.registry
    }

    #[must_use]
    pub fn mount_roots(&self) -> &[PathBuf] {
        &self.mount_roots
    }

    #[must_use]
    pub fn get(&self, id: &EnvironmentId) -> Option<Environment> {
        self.registry.get(id)
    }

    /// Provision a new isolated environment.
    ///
    /// The request is validated synchronously first; validation failures
    /// are never retried. Provisioning runs inside the container-creation
    /// circuit breaker around a bounded retry. When it still fails with a
    /// recoverable error the recovery manager is consulted, and if it says
    /// to continue the whole creation is repeated once under a fresh id,
    /// with the reduced limits a resource reduction may have produced.
    ///
    /// # Errors
    ///
    /// Returns the validation error, or the typed provisioning error once
    /// recovery declined or the single repeat also failed.
    pub async fn create_environment(
        &self,
        security: SecurityConfiguration,
        analysis: AnalysisConfiguration,
    ) -> Result<Environment, AssessmentError> {
        let validated = validate_request(&self.security, &security, &analysis)?;
        let started = Instant::now();
        let id = EnvironmentId::generate();

        let err = match self
            .provision_environment(&id, &security, &analysis, validated.codebase)
            .await
        {
            Ok(environment) => return Ok(self.finish_creation(environment, started)),
            Err(err) => err,
        };
        self.discard_partial(&id).await;

        if !err.recoverable || err.is_fail_fast() {
            self.fail_creation(&id, &err);
            return Err(err);
        }

        let recovery = self
            .recovery
            .attempt_recovery(&id, &err, Some(&security))
            .await;
        if !recovery.should_continue {
            info!(environment_id = %id, reason = %recovery.message, "creation not recoverable");
            self.fail_creation(&id, &err);
            return Err(err);
        }

        let security = recovery.reduced_security.unwrap_or(security);
        let retry_id = EnvironmentId::generate();
        self.recovery.transfer_state(&id, &retry_id);
        info!(
            environment_id = %retry_id,
            previous = %id,
            strategy = ?recovery.strategy,
            "retrying environment creation"
        );

        let validated = match validate_request(&self.security, &security, &analysis) {
            Ok(validated) => validated,
            Err(retry_err) => {
                self.fail_creation(&retry_id, &retry_err);
                return Err(retry_err);
            }
        };
        match self
            .provision_environment(&retry_id, &security, &analysis, validated.codebase)
            .await
        {
            Ok(environment) => Ok(self.finish_creation(environment, started)),
            Err(retry_err) => {
                self.discard_partial(&retry_id).await;
                self.fail_creation(&retry_id, &retry_err);
                Err(retry_err)
            }
        }
    }

    async fn provision_environment(
        &self,
        id: &EnvironmentId,
        security: &SecurityConfiguration,
        analysis: &AnalysisConfiguration,
        codebase: CodebaseType,
    ) -> Result<Environment, AssessmentError> {
        self.registry.insert(Environment::creating(
            id.clone(),
            security.clone(),
            analysis.clone(),
        ))?;
        self.recovery.init_state(id);
        self.checkpoint(id, "creation-start", Some(json!({ "codebaseType": codebase.as_str() })));
        self.emit(AppEvent::Environment(EnvironmentEvent::CreationStarted {
            environment_id: id.clone(),
            codebase_type: codebase.as_str().to_string(),
        }));

        let plan = self.security.network_plan(id, security)?;
        let template = ContainerTemplate {
            image: &self.config.image,
            working_dir: &self.config.working_dir,
            codebase_type: codebase.as_str(),
        };
        let spec = self.security.container_spec(id, security, &plan, &template)?;
        let network = plan.dedicated_network();

        let (handle, network) = self
            .guarded(OperationClass::ContainerCreation, "container-creation", |attempt| {
                self.provision_once(id, &spec, network, attempt)
            })
            .await?;

        self.security.enable_monitoring(id, security);
        self.registry
            .update(id, |environment| {
                environment.container = Some(handle);
                environment.network = network;
            })
            .ok_or_else(|| crate::registry::unknown_environment(id))
    }

    /// One provisioning attempt; whatever it created is released again on
    /// failure so the next attempt starts clean.
    async fn provision_once(
        &self,
        id: &EnvironmentId,
        spec: &ContainerSpec,
        network: Option<&str>,
        attempt: u32,
    ) -> Result<(ContainerHandle, Option<String>), AssessmentError> {
        debug!(environment_id = %id, attempt, image = %spec.image, "provisioning container");
        let network = match network {
            Some(name) => Some(self.runtime.create_network(name, true).await?),
            None => None,
        };

        let handle = match self.runtime.create(spec).await {
            Ok(handle) => handle,
            Err(err) => {
                self.release_network(id, network.as_deref()).await;
                return Err(err);
            }
        };
        if let Err(err) = self.runtime.start(&handle).await {
            self.release_container(id, &handle).await;
            self.release_network(id, network.as_deref()).await;
            return Err(err);
        }
        Ok((handle, network))
    }

    fn finish_creation(&self, mut environment: Environment, started: Instant) -> Environment {
        let id = environment.id.clone();
        let previous = self.registry.set_status(&id, EnvironmentStatus::Ready);
        environment.status = EnvironmentStatus::Ready;
        self.checkpoint(&id, "creation-complete", None);
        self.recovery.record_step_completed(&id, "container-creation");

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(environment_id = %id, duration_ms, "environment ready");
        if let Some(from) = previous {
            self.emit_status(&id, from, EnvironmentStatus::Ready);
        }
        self.emit(AppEvent::Environment(EnvironmentEvent::Created {
            environment_id: id,
            duration_ms,
        }));
        environment
    }

    /// Release anything a failed provisioning left behind, keeping the
    /// recovery state so a retry can inherit it.
    async fn discard_partial(&self, id: &EnvironmentId) {
        let Some(environment) = self.registry.remove(id) else {
            return;
        };
        if let Some(handle) = &environment.container {
            self.release_container(id, handle).await;
        }
        self.release_network(id, environment.network.as_deref()).await;
        self.security.forget(id);
    }

    fn fail_creation(&self, id: &EnvironmentId, err: &AssessmentError) {
        warn!(environment_id = %id, code = err.code(), error = %err, "environment creation failed");
        self.recovery.clear(id);
        self.emit(AppEvent::Environment(EnvironmentEvent::CreationFailed {
            environment_id: id.clone(),
            failure: FailureContext::from_error(err),
        }));
    }

    /// Set `id` to `status`, emitting the transition.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown ids.
    pub fn set_status(&self, id: &EnvironmentId, status: EnvironmentStatus) -> Result<(), AssessmentError> {
        let previous = self
            .registry
            .set_status(id, status)
            .ok_or_else(|| crate::registry::unknown_environment(id))?;
        if previous != status {
            self.emit_status(id, previous, status);
        }
        Ok(())
    }

    #[must_use]
    pub fn get_checkpoints(&self, id: &EnvironmentId) -> Vec<Checkpoint> {
        self.recovery.get_checkpoints(id)
    }

    #[must_use]
    pub fn get_recovery_state(&self, id: &EnvironmentId) -> Option<RecoveryState> {
        self.recovery.state(id)
    }

    pub(crate) fn emit_status(&self, id: &EnvironmentId, from: EnvironmentStatus, to: EnvironmentStatus) {
        debug!(environment_id = %id, %from, %to, "status changed");
        self.emit(AppEvent::Environment(EnvironmentEvent::StatusChanged {
            environment_id: id.clone(),
            from,
            to,
        }));
    }

    pub(crate) fn checkpoint(&self, id: &EnvironmentId, step: &str, metadata: Option<Value>) {
        if let Err(err) = self.recovery.checkpoint(id, step, metadata) {
            warn!(environment_id = %id, step, error = %err, "checkpoint failed");
        }
    }

    pub(crate) fn grace(&self) -> Duration {
        Duration::from_secs(self.config.stop_grace_seconds)
    }

    /// Retry policy for `class` that reports every scheduled retry.
    pub(crate) fn retry_policy(&self, class: OperationClass, label: &str) -> RetryPolicy<AssessmentError> {
        let events = self.events.clone();
        let operation = label.to_string();
        class.policy(&self.retry).on_retry(move |err, attempt, delay| {
            if let Some(sender) = &events {
                sender.emit(AppEvent::Resilience(ResilienceEvent::RetryScheduled {
                    operation: operation.clone(),
                    attempt,
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error: err.to_string(),
                }));
            }
        })
    }

    /// Bounded retry for one operation class.
    pub(crate) async fn retrying<T, F, Fut>(
        &self,
        class: OperationClass,
        label: &str,
        operation: F,
    ) -> Result<T, AssessmentError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AssessmentError>>,
    {
        let policy = self.retry_policy(class, label);
        let outcome = with_retry(label, &policy, operation).await;
        if let Err(err) = &outcome.result {
            if outcome.attempts > 1 {
                self.emit(AppEvent::Resilience(ResilienceEvent::RetriesExhausted {
                    operation: label.to_string(),
                    attempts: outcome.attempts,
                    error: err.to_string(),
                }));
            }
        }
        outcome.into_result()
    }

    /// Bounded retry inside the breaker for `class`.
    pub(crate) async fn guarded<T, F, Fut>(
        &self,
        class: OperationClass,
        label: &str,
        operation: F,
    ) -> Result<T, AssessmentError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AssessmentError>>,
    {
        let breaker = self.breakers.get(class.as_str());
        breaker
            .call(|| self.retrying(class, label, operation))
            .await
    }

    pub(crate) async fn release_container(&self, id: &EnvironmentId, handle: &ContainerHandle) {
        if let Err(err) = self.runtime.remove(handle, true).await {
            if !is_not_found(&err) {
                warn!(environment_id = %id, container = %handle, error = %err, "failed to remove container");
            }
        }
    }

    pub(crate) async fn release_network(&self, id: &EnvironmentId, network: Option<&str>) {
        let Some(network) = network else {
            return;
        };
        if let Err(err) = self.runtime.remove_network(network).await {
            if !is_not_found(&err) {
                warn!(environment_id = %id, network, error = %err, "failed to remove network");
            }
        }
    }
}
