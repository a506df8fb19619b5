//! Recovery manager: state registry, checkpoints and the strategy chain

use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use sandcheck_config::RecoveryConfig;
use sandcheck_errors::AssessmentError;
use sandcheck_events::{AppEvent, EventEmitter, EventSender, RecoveryEvent};
use sandcheck_types::{EnvironmentId, SecurityConfiguration, WorkflowStep};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::degradation::{plan_degradation, DegradationPlan};
use crate::partial::preserve_partial_results;
use crate::state::{LastError, RecoveryState};
use crate::strategy::{
    ContainerRecreation, PartialContinuation, RecoveryRequest, RecoveryResult, RecoveryStrategy,
    ResourceReduction,
};

/// Owns recovery state and checkpoints for every live environment
pub struct RecoveryManager {
    strategies: RwLock<Vec<Arc<dyn RecoveryStrategy>>>,
    states: DashMap<EnvironmentId, RecoveryState>,
    checkpoints: CheckpointStore,
    max_recovery_attempts: u32,
    events: Option<EventSender>,
}

impl std::fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("strategies", &self.strategy_names())
            .field("environments", &self.states.len())
            .field("max_recovery_attempts", &self.max_recovery_attempts)
            .finish_non_exhaustive()
    }
}

impl EventEmitter for RecoveryManager {
    fn event_sender(&self) -> Option<&EventSender> {
        self.events.as_ref()
    }
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new(&RecoveryConfig::default())
    }
}

impl RecoveryManager {
    /// Manager with the built-in strategies: container recreation, resource
    /// reduction, partial continuation.
    #[must_use]
    pub fn new(config: &RecoveryConfig) -> Self {
        let strategies: Vec<Arc<dyn RecoveryStrategy>> = vec![
            Arc::new(ContainerRecreation {
                max_attempts: config.container_recreation_attempts,
            }),
            Arc::new(ResourceReduction {
                max_attempts: config.resource_reduction_attempts,
            }),
            Arc::new(PartialContinuation),
        ];
        Self {
            strategies: RwLock::new(strategies),
            states: DashMap::new(),
            checkpoints: CheckpointStore::default(),
            max_recovery_attempts: config.max_recovery_attempts,
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: Option<EventSender>) -> Self {
        self.events = events;
        self
    }

    /// Append a strategy to the end of the chain.
    pub fn register_strategy(&self, strategy: Arc<dyn RecoveryStrategy>) {
        debug!(strategy = strategy.name(), "registering recovery strategy");
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(strategy);
    }

    #[must_use]
    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Start tracking `environment_id`, keeping any existing state.
    pub fn init_state(&self, environment_id: &EnvironmentId) -> RecoveryState {
        self.states
            .entry(environment_id.clone())
            .or_insert_with(|| RecoveryState::new(self.max_recovery_attempts))
            .clone()
    }

    #[must_use]
    pub fn state(&self, environment_id: &EnvironmentId) -> Option<RecoveryState> {
        self.states.get(environment_id).map(|s| s.clone())
    }

    /// Move a state to a new id, e.g. when creation is retried under a fresh id.
    pub fn transfer_state(&self, from: &EnvironmentId, to: &EnvironmentId) {
        if let Some((_, state)) = self.states.remove(from) {
            self.states.insert(to.clone(), state);
        }
        self.checkpoints.clear(from);
    }

    pub fn record_step_completed(&self, environment_id: &EnvironmentId, step: &str) {
        self.update(environment_id, |state| state.complete_step(step));
    }

    pub fn record_step_failed(&self, environment_id: &EnvironmentId, step: &str, error: &AssessmentError) {
        self.update(environment_id, |state| state.fail_step(step, error));
    }

    pub fn record_partial_results(&self, environment_id: &EnvironmentId, results: Value) {
        self.update(environment_id, |state| state.partial_results = Some(results));
    }

    fn update(&self, environment_id: &EnvironmentId, f: impl FnOnce(&mut RecoveryState)) {
        let mut entry = self
            .states
            .entry(environment_id.clone())
            .or_insert_with(|| RecoveryState::new(self.max_recovery_attempts));
        f(entry.value_mut());
    }

    /// Append a deep copy of `state` to the checkpoint history.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `state` cannot be serialized.
    pub fn create_checkpoint<S: Serialize + ?Sized>(
        &self,
        environment_id: &EnvironmentId,
        step_name: &str,
        state: &S,
        results: Option<Value>,
        metadata: Option<Value>,
    ) -> Result<Checkpoint, AssessmentError> {
        let (checkpoint, retained) =
            self.checkpoints
                .create(environment_id, step_name, state, results, metadata)?;
        debug!(environment_id = %environment_id, step = step_name, retained, "checkpoint created");
        self.emit(AppEvent::Recovery(RecoveryEvent::CheckpointCreated {
            environment_id: environment_id.clone(),
            step: step_name.to_string(),
            retained,
        }));
        Ok(checkpoint)
    }

    /// Checkpoint the tracked recovery state of `environment_id`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the snapshot cannot be serialized.
    pub fn checkpoint(
        &self,
        environment_id: &EnvironmentId,
        step_name: &str,
        metadata: Option<Value>,
    ) -> Result<Checkpoint, AssessmentError> {
        let state = self.init_state(environment_id);
        self.create_checkpoint(environment_id, step_name, &state, None, metadata)
    }

    #[must_use]
    pub fn get_checkpoints(&self, environment_id: &EnvironmentId) -> Vec<Checkpoint> {
        self.checkpoints.history(environment_id)
    }

    #[must_use]
    pub fn latest_checkpoint(&self, environment_id: &EnvironmentId) -> Option<Checkpoint> {
        self.checkpoints.latest(environment_id)
    }

    /// Forget everything about `environment_id`.
    pub fn clear(&self, environment_id: &EnvironmentId) {
        self.states.remove(environment_id);
        self.checkpoints.clear(environment_id);
        debug!(environment_id = %environment_id, "recovery state cleared");
    }

    fn reject(&self, environment_id: &EnvironmentId, reason: String) -> RecoveryResult {
        info!(environment_id = %environment_id, %reason, "recovery rejected");
        self.emit(AppEvent::Recovery(RecoveryEvent::RecoveryRejected {
            environment_id: environment_id.clone(),
            reason: reason.clone(),
        }));
        RecoveryResult::rejected(reason)
    }

    /// Run the strategy chain for `error`.
    ///
    /// Fail-fast and non-recoverable errors are rejected without consulting
    /// any strategy, as is every attempt past the configured maximum. The
    /// first strategy that accepts the error and recovers wins.
    pub async fn attempt_recovery(
        &self,
        environment_id: &EnvironmentId,
        error: &AssessmentError,
        security: Option<&SecurityConfiguration>,
    ) -> RecoveryResult {
        if error.is_fail_fast() || !error.recoverable {
            return self.reject(
                environment_id,
                format!("{} is not recoverable", error.code()),
            );
        }

        let reserved = {
            let mut entry = self
                .states
                .entry(environment_id.clone())
                .or_insert_with(|| RecoveryState::new(self.max_recovery_attempts));
            let state = entry.value_mut();
            if state.exhausted() {
                Err(format!(
                    "recovery attempts exhausted ({}/{})",
                    state.recovery_attempts, state.max_recovery_attempts
                ))
            } else {
                state.recovery_attempts += 1;
                state.last_error = Some(LastError::from(error));
                Ok(state.clone())
            }
        };
        let state = match reserved {
            Ok(state) => state,
            Err(reason) => return self.reject(environment_id, reason),
        };
        let attempt = state.recovery_attempts;

        let strategies = self
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut outcome = None;
        let mut tried = Vec::new();
        for strategy in strategies {
            let request = RecoveryRequest {
                environment_id,
                error,
                state: &state,
                security,
            };
            if !strategy.can_recover(&request) {
                continue;
            }
            let name = strategy.name().to_string();
            let result = strategy.recover(&request).await;
            tried.push(name.clone());

            let success = matches!(&result, Ok(r) if r.success);
            self.emit(AppEvent::Recovery(RecoveryEvent::RecoveryAttempted {
                environment_id: environment_id.clone(),
                strategy: name.clone(),
                success,
                attempt,
            }));
            match result {
                Ok(result) if result.success => {
                    info!(environment_id = %environment_id, strategy = %name, attempt, "recovered");
                    outcome = Some(result);
                    break;
                }
                Ok(result) => {
                    debug!(environment_id = %environment_id, strategy = %name, message = %result.message, "strategy declined");
                }
                Err(err) => {
                    warn!(environment_id = %environment_id, strategy = %name, error = %err, "strategy failed");
                }
            }
        }

        // Merge into the live entry so steps recorded meanwhile survive. A
        // cleared entry stays cleared.
        let state = match self.states.get_mut(environment_id) {
            Some(mut current) => {
                for name in tried {
                    *current.strategy_attempts.entry(name).or_insert(0) += 1;
                }
                if let Some(results) = outcome.as_ref().and_then(|r| r.partial_results.clone()) {
                    current.partial_results = Some(results);
                }
                current.clone()
            }
            None => state,
        };

        match outcome {
            Some(mut result) => {
                result.new_state = Some(state);
                result
            }
            None => {
                let mut result = RecoveryResult::rejected(format!(
                    "no strategy could recover from {}",
                    error.code()
                ));
                result.new_state = Some(state);
                result
            }
        }
    }

    /// Plan how the remaining steps can still run after `error`.
    #[must_use]
    pub fn create_degradation_plan(
        &self,
        environment_id: Option<&EnvironmentId>,
        error: &AssessmentError,
        remaining: &[WorkflowStep],
    ) -> DegradationPlan {
        let state = environment_id
            .and_then(|id| self.state(id))
            .unwrap_or_else(|| RecoveryState::new(self.max_recovery_attempts));
        let plan = plan_degradation(error, &state, remaining);
        info!(
            skipped = plan.skipped_steps.len(),
            modified = plan.modified_steps.len(),
            can_continue = plan.can_continue,
            rationale = %plan.rationale,
            "degradation planned"
        );
        self.emit(AppEvent::Recovery(RecoveryEvent::DegradationPlanned {
            environment_id: environment_id.cloned(),
            skipped: plan.skipped_steps.len(),
            modified: plan.modified_steps.len(),
            total: plan.total(),
            can_continue: plan.can_continue,
        }));
        plan
    }

    /// Build a partial-analysis error carrying completed work and the
    /// latest checkpoint.
    #[must_use]
    pub fn preserve_partial_results(
        &self,
        environment_id: &EnvironmentId,
        completed_steps: &[String],
        partial_results: Value,
        error: &AssessmentError,
    ) -> AssessmentError {
        let latest = self.latest_checkpoint(environment_id);
        let preserved = preserve_partial_results(
            environment_id,
            completed_steps,
            partial_results,
            latest.as_ref(),
            error,
        );
        self.emit(AppEvent::Recovery(RecoveryEvent::PartialResultsPreserved {
            environment_id: environment_id.clone(),
            completed_steps: completed_steps.len(),
        }));
        preserved
    }
}
