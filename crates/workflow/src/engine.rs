//! Step scheduling, retries, parallel groups and degradation
//!
//! Steps outside parallel groups run strictly in declaration order. A
//! parallel group runs at the position of its first member and settles as
//! a whole before the next stage starts; a failing member does not cancel
//! its siblings. Cleanup steps run after the main sequence whatever
//! happened to it.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use sandcheck_config::WorkflowConfig;
use sandcheck_errors::AssessmentError;
use sandcheck_events::{AppEvent, EventEmitter, EventSender, FailureContext, WorkflowEvent};
use sandcheck_recovery::{DegradationPlan, RecoveryManager};
use sandcheck_resilience::{with_retry, RetryPolicy};
use sandcheck_runtime::ContainerRuntime;
use sandcheck_types::{
    AnalysisConfiguration, AnalysisResults, ContainerHandle, Environment, EnvironmentId,
    ProgressUpdate, ResultFragment, WorkflowDefinition, WorkflowStep,
};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::condition::{evaluate_condition, ConditionContext};
use crate::definition::validate_definition;
use crate::report::{ExecutionReport, StepRecord, StepStatus, WorkflowError, WorkflowStatus};
use crate::tool::{ToolAdapter, ToolContext, ToolRegistry};

/// Receives progress reports; must not block
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// The environment a workflow runs in
#[derive(Clone)]
pub struct ExecutionTarget {
    pub environment_id: EnvironmentId,
    pub container: ContainerHandle,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub analysis: AnalysisConfiguration,
    /// Host copy of the mounted codebase, consulted by `file-exists`
    pub source_root: Option<PathBuf>,
}

impl std::fmt::Debug for ExecutionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionTarget")
            .field("environment_id", &self.environment_id)
            .field("container", &self.container)
            .field("source_root", &self.source_root)
            .finish_non_exhaustive()
    }
}

impl ExecutionTarget {
    /// Target for a usable environment.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the environment is not ready or has
    /// no container.
    pub fn from_environment(
        environment: &Environment,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, AssessmentError> {
        let container = match (&environment.container, environment.is_usable()) {
            (Some(container), true) => container.clone(),
            _ => {
                return Err(AssessmentError::validation(format!(
                    "environment {} is {} and cannot run a workflow",
                    environment.id, environment.status
                ))
                .with_context("environmentId", environment.id.as_str()));
            }
        };
        Ok(Self {
            environment_id: environment.id.clone(),
            container,
            runtime,
            analysis: environment.analysis_config.clone(),
            source_root: environment.mount.as_ref().map(|m| m.source.clone()),
        })
    }
}

#[derive(Debug, Clone)]
enum Stage {
    Single(WorkflowStep),
    Group(Vec<WorkflowStep>),
}

/// Order `steps` into stages. A group is placed at its first member and
/// keeps only the members present in `steps`.
fn schedule(steps: &[WorkflowStep], definition: &WorkflowDefinition) -> Vec<Stage> {
    let mut stages = Vec::new();
    let mut placed = HashSet::new();
    for step in steps {
        match definition.group_of(&step.name) {
            Some(group) if placed.insert(group) => {
                let members: Vec<WorkflowStep> = steps
                    .iter()
                    .filter(|s| definition.group_of(&s.name) == Some(group))
                    .cloned()
                    .collect();
                stages.push(Stage::Group(members));
            }
            Some(_) => {}
            None => stages.push(Stage::Single(step.clone())),
        }
    }
    stages
}

fn stage_steps(stage: &Stage) -> Vec<&WorkflowStep> {
    match stage {
        Stage::Single(step) => vec![step],
        Stage::Group(steps) => steps.iter().collect(),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// What running one step produced
struct StepOutcome {
    record: StepRecord,
    fragment: Option<ResultFragment>,
    error: Option<AssessmentError>,
    continue_on_error: bool,
}

impl StepOutcome {
    fn aborts(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|err| err.is_security_violation() || !self.continue_on_error)
    }
}

/// Mutable bookkeeping of one run
struct RunState {
    records: Vec<StepRecord>,
    results: AnalysisResults,
    errors: Vec<WorkflowError>,
    settled: usize,
    total: usize,
}

/// Runs workflow definitions against an environment
pub struct WorkflowEngine {
    tools: Arc<ToolRegistry>,
    recovery: Arc<RecoveryManager>,
    backoff_base: Duration,
    events: Option<EventSender>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("tools", &self.tools)
            .field("backoff_base", &self.backoff_base)
            .finish_non_exhaustive()
    }
}

impl EventEmitter for WorkflowEngine {
    fn event_sender(&self) -> Option<&EventSender> {
        self.events.as_ref()
    }
}

impl WorkflowEngine {
    #[must_use]
    pub fn new(tools: ToolRegistry, recovery: Arc<RecoveryManager>) -> Self {
        Self {
            tools: Arc::new(tools),
            recovery,
            backoff_base: Duration::from_secs(1),
            events: None,
        }
    }

    /// Engine with exec adapters for every configured tool.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid tool entry.
    pub fn from_config(
        config: &WorkflowConfig,
        recovery: Arc<RecoveryManager>,
    ) -> Result<Self, AssessmentError> {
        Ok(Self::new(ToolRegistry::from_config(config)?, recovery)
            .with_backoff_base(Duration::from_millis(config.step_backoff_base_ms)))
    }

    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: Option<EventSender>) -> Self {
        self.events = events;
        self
    }

    /// Register `tool`, replacing any adapter with the same name.
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn ToolAdapter>) -> Self {
        Arc::make_mut(&mut self.tools).register(tool);
        self
    }

    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run `definition` in `target`.
    ///
    /// Failed steps with `continueOnError` are recorded and the run goes
    /// on. A recoverable failure asks the recovery manager for a
    /// degradation plan over the remaining steps; the run continues
    /// degraded when the plan allows it, once. Non-recoverable failures
    /// stop the run.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid definition, a security
    /// violation raised by any step unchanged, and a partial-analysis error
    /// carrying completed steps and results when the run had to stop.
    pub async fn execute(
        &self,
        target: &ExecutionTarget,
        definition: &WorkflowDefinition,
        progress: Option<ProgressCallback>,
    ) -> Result<ExecutionReport, AssessmentError> {
        validate_definition(definition)?;
        let id = &target.environment_id;
        let started = Instant::now();
        let started_at = Utc::now();
        let mut run = RunState {
            records: Vec::new(),
            results: AnalysisResults::new(),
            errors: Vec::new(),
            settled: 0,
            total: definition.steps.len(),
        };

        info!(
            environment_id = %id,
            workflow = %definition.name,
            version = %definition.version,
            steps = run.total,
            "workflow started"
        );
        self.emit(AppEvent::Workflow(WorkflowEvent::Started {
            environment_id: id.clone(),
            workflow: definition.name.clone(),
            version: definition.version.clone(),
            total_steps: run.total,
        }));
        self.report(
            id,
            progress.as_ref(),
            ProgressUpdate::new("started", 0, format!("running {}", definition.name)),
        );

        let mut stages = schedule(&definition.steps, definition);
        let mut next = 0;
        let mut degradation: Option<DegradationPlan> = None;
        let mut abort: Option<AssessmentError> = None;

        while next < stages.len() {
            if let Some(limit) = target.analysis.timeout_ms {
                if millis(started.elapsed()) > limit {
                    abort = Some(
                        AssessmentError::timeout(
                            format!("analysis exceeded its {limit}ms budget"),
                            limit,
                        )
                        .with_context("workflow", definition.name.clone()),
                    );
                    break;
                }
            }

            let stage = stages[next].clone();
            next += 1;
            let outcomes = self.run_stage(target, &stage, degradation.is_some()).await;

            let mut failure = None;
            for outcome in outcomes {
                let escalates = outcome
                    .error
                    .as_ref()
                    .is_some_and(AssessmentError::is_security_violation)
                    && !failure.as_ref().is_some_and(AssessmentError::is_security_violation);
                if outcome.aborts() && (failure.is_none() || escalates) {
                    failure = outcome.error.clone();
                }
                self.settle(target, progress.as_ref(), &mut run, outcome);
            }
            self.checkpoint_stage(id, &stage, &run);

            let Some(err) = failure else { continue };

            if err.is_security_violation() {
                return Err(self.violation(target, definition, progress.as_ref(), &run, err));
            }

            let remaining: Vec<WorkflowStep> = stages[next..]
                .iter()
                .flat_map(|s| stage_steps(s).into_iter().cloned())
                .collect();
            if degradation.is_some() || !err.recoverable || err.is_fail_fast() {
                abort = Some(err);
                break;
            }
            let plan = self
                .recovery
                .create_degradation_plan(Some(id), &err, &remaining);
            if !plan.can_continue {
                abort = Some(err);
                break;
            }

            warn!(
                environment_id = %id,
                skipped = ?plan.skipped_steps,
                modified = ?plan.modified_steps,
                "continuing degraded"
            );
            self.emit(AppEvent::Workflow(WorkflowEvent::Degraded {
                environment_id: id.clone(),
                skipped: plan.skipped_steps.clone(),
                modified: plan.modified_steps.clone(),
            }));
            for name in &plan.skipped_steps {
                if let Some(step) = remaining.iter().find(|s| &s.name == name) {
                    let record = StepRecord::skipped(&step.name, &step.tool, "dropped by degradation plan");
                    self.skip(id, &step.name, "dropped by degradation plan");
                    run.records.push(record);
                    run.settled += 1;
                }
            }
            stages = schedule(&plan.steps, definition);
            next = 0;
            degradation = Some(plan);
        }

        let cleanup = self.run_cleanup(target, definition, &mut run).await;

        if let Some(err) = abort {
            let completed: Vec<String> = run
                .records
                .iter()
                .filter(|r| r.succeeded())
                .map(|r| r.name.clone())
                .collect();
            let partial = self.recovery.preserve_partial_results(
                id,
                &completed,
                run.results.to_value(),
                &err,
            );
            warn!(
                environment_id = %id,
                workflow = %definition.name,
                completed = completed.len(),
                error = %err,
                "workflow aborted"
            );
            self.emit(AppEvent::Workflow(WorkflowEvent::Failed {
                environment_id: id.clone(),
                workflow: definition.name.clone(),
                failure: FailureContext::from_error(&partial),
            }));
            self.report(
                id,
                progress.as_ref(),
                ProgressUpdate::new(
                    "failed",
                    ProgressUpdate::percent_of(run.settled, run.total),
                    err.message.clone(),
                ),
            );
            return Err(partial);
        }

        let status = WorkflowStatus::from_steps(&run.records);
        let duration_ms = millis(started.elapsed());
        info!(
            environment_id = %id,
            workflow = %definition.name,
            status = status.as_str(),
            findings = run.results.len(),
            duration_ms,
            "workflow finished"
        );
        self.emit(AppEvent::Workflow(WorkflowEvent::Completed {
            environment_id: id.clone(),
            workflow: definition.name.clone(),
            status: status.as_str().to_string(),
            duration_ms,
        }));
        self.report(
            id,
            progress.as_ref(),
            ProgressUpdate::new("completed", 100, format!("{} {}", definition.name, status.as_str())),
        );

        Ok(ExecutionReport {
            workflow: definition.name.clone(),
            version: definition.version.clone(),
            environment_id: id.clone(),
            status,
            steps: run.records,
            cleanup,
            results: run.results,
            errors: run.errors,
            degradation,
            started_at,
            duration_ms,
        })
    }

    /// Stop on a security violation. No recovery, no degradation and no
    /// cleanup run inside the compromised environment; the violation is
    /// returned unchanged.
    fn violation(
        &self,
        target: &ExecutionTarget,
        definition: &WorkflowDefinition,
        progress: Option<&ProgressCallback>,
        run: &RunState,
        err: AssessmentError,
    ) -> AssessmentError {
        let id = &target.environment_id;
        error!(
            environment_id = %id,
            workflow = %definition.name,
            code = err.code(),
            error = %err,
            "security violation during workflow"
        );
        self.emit(AppEvent::Workflow(WorkflowEvent::Failed {
            environment_id: id.clone(),
            workflow: definition.name.clone(),
            failure: FailureContext::from_error(&err),
        }));
        self.report(
            id,
            progress,
            ProgressUpdate::new(
                "failed",
                ProgressUpdate::percent_of(run.settled, run.total),
                err.message.clone(),
            ),
        );
        err
    }

    async fn run_stage(
        &self,
        target: &ExecutionTarget,
        stage: &Stage,
        degraded: bool,
    ) -> Vec<StepOutcome> {
        match stage {
            Stage::Single(step) => vec![self.run_step(target, step, degraded).await],
            Stage::Group(steps) => {
                debug!(
                    environment_id = %target.environment_id,
                    steps = steps.len(),
                    "running parallel group"
                );
                self.emit(AppEvent::Workflow(WorkflowEvent::GroupStarted {
                    environment_id: target.environment_id.clone(),
                    steps: steps.iter().map(|s| s.name.clone()).collect(),
                }));
                let mut pending: FuturesUnordered<_> = steps
                    .iter()
                    .map(|step| self.run_step(target, step, degraded))
                    .collect();
                let mut outcomes = Vec::with_capacity(steps.len());
                while let Some(outcome) = pending.next().await {
                    outcomes.push(outcome);
                }
                outcomes
            }
        }
    }

    async fn run_cleanup(
        &self,
        target: &ExecutionTarget,
        definition: &WorkflowDefinition,
        run: &mut RunState,
    ) -> Vec<StepRecord> {
        let mut records = Vec::with_capacity(definition.cleanup.len());
        for step in &definition.cleanup {
            let outcome = self.run_step(target, step, false).await;
            if let Some(err) = &outcome.error {
                warn!(
                    environment_id = %target.environment_id,
                    step = %step.name,
                    error = %err,
                    "cleanup step failed"
                );
            }
            if let Some(fragment) = outcome.fragment {
                run.results.merge(fragment);
            }
            records.push(outcome.record);
        }
        records
    }

    /// Fold a finished step into the run.
    fn settle(
        &self,
        target: &ExecutionTarget,
        progress: Option<&ProgressCallback>,
        run: &mut RunState,
        outcome: StepOutcome,
    ) {
        let id = &target.environment_id;
        let name = outcome.record.name.clone();
        if let Some(fragment) = outcome.fragment {
            run.results.merge(fragment);
        }
        if let Some(err) = &outcome.error {
            run.errors.push(WorkflowError::from_error(&name, err));
        }
        let verb = match outcome.record.status {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        run.records.push(outcome.record);
        run.settled += 1;
        self.recovery
            .record_partial_results(id, run.results.to_value());
        self.report(
            id,
            progress,
            ProgressUpdate::new(
                name.clone(),
                ProgressUpdate::percent_of(run.settled, run.total),
                format!("step {name} {verb}"),
            ),
        );
    }

    fn checkpoint_stage(&self, id: &EnvironmentId, stage: &Stage, run: &RunState) {
        let names: Vec<&str> = stage_steps(stage).iter().map(|s| s.name.as_str()).collect();
        let label = names.join("+");
        let state = self.recovery.init_state(id);
        if let Err(err) = self.recovery.create_checkpoint(
            id,
            &label,
            &state,
            Some(run.results.to_value()),
            Some(json!({ "steps": names, "settled": run.settled, "total": run.total })),
        ) {
            warn!(environment_id = %id, stage = %label, error = %err, "checkpoint failed");
        }
    }

    fn skip(&self, id: &EnvironmentId, step: &str, reason: &str) {
        debug!(environment_id = %id, step, reason, "step skipped");
        self.emit(AppEvent::Workflow(WorkflowEvent::StepSkipped {
            environment_id: id.clone(),
            step: step.to_string(),
            reason: reason.to_string(),
        }));
    }

    fn report(&self, id: &EnvironmentId, progress: Option<&ProgressCallback>, update: ProgressUpdate) {
        if let Some(callback) = progress {
            callback(update.clone());
        }
        self.emit(AppEvent::Workflow(WorkflowEvent::ProgressReported {
            environment_id: id.clone(),
            update,
        }));
    }

    fn step_policy(&self, target: &ExecutionTarget, step: &WorkflowStep) -> RetryPolicy<AssessmentError> {
        let retries = step.retry_count();
        let max_delay = self
            .backoff_base
            .saturating_mul(1 << retries.min(16));
        let events = self.events.clone();
        let environment_id = target.environment_id.clone();
        let name = step.name.clone();
        let mut policy = RetryPolicy::new(retries + 1, self.backoff_base, max_delay)
            .with_multiplier(2.0)
            .on_retry(move |err: &AssessmentError, attempt, delay| {
                events.emit(AppEvent::Workflow(WorkflowEvent::StepRetrying {
                    environment_id: environment_id.clone(),
                    step: name.clone(),
                    attempt: attempt + 1,
                    delay_ms: millis(delay),
                    error: err.message.clone(),
                }));
            });
        if let Some(timeout_ms) = step.timeout_ms {
            let budget = Duration::from_millis(timeout_ms);
            let started = Instant::now();
            policy = policy.retry_if(move |_| started.elapsed() < budget);
        }
        policy
    }

    async fn run_step(
        &self,
        target: &ExecutionTarget,
        step: &WorkflowStep,
        degraded: bool,
    ) -> StepOutcome {
        let id = &target.environment_id;
        let skipped = |reason: &str| {
            self.skip(id, &step.name, reason);
            StepOutcome {
                record: StepRecord::skipped(&step.name, &step.tool, reason),
                fragment: None,
                error: None,
                continue_on_error: step.continue_on_error,
            }
        };

        if let Some(condition) = &step.condition {
            let context = ConditionContext {
                analysis: &target.analysis,
                source_root: target.source_root.as_deref(),
            };
            match evaluate_condition(condition, &context) {
                Ok(true) => {}
                Ok(false) => return skipped("condition not met"),
                Err(err) => return self.failed(target, step, 0, Duration::ZERO, degraded, err),
            }
        }
        if !target.analysis.tool_enabled(&step.tool) {
            return skipped("tool not enabled for this analysis");
        }
        let Some(adapter) = self.tools.get(&step.tool) else {
            let err = AssessmentError::workflow_execution(format!("unknown tool '{}'", step.tool))
                .with_context("step", step.name.clone())
                .with_context("tool", step.tool.clone())
                .with_recoverable(false);
            return self.failed(target, step, 0, Duration::ZERO, degraded, err);
        };

        let policy = self.step_policy(target, step);
        let config = &step.config;
        let outcome = with_retry(&step.name, &policy, |attempt| {
            self.emit(AppEvent::Workflow(WorkflowEvent::StepStarted {
                environment_id: id.clone(),
                step: step.name.clone(),
                tool: step.tool.clone(),
                attempt,
            }));
            let adapter = adapter.clone();
            let context = ToolContext {
                environment_id: id.clone(),
                container: target.container.clone(),
                runtime: target.runtime.clone(),
                analysis: target.analysis.clone(),
                step: step.name.clone(),
                attempt,
            };
            async move { adapter.execute(config, &context).await }
        })
        .await;

        let attempts = outcome.attempts;
        let elapsed = outcome.total_duration;
        match outcome.result {
            Ok(fragment) => {
                let duration_ms = millis(elapsed);
                debug!(environment_id = %id, step = %step.name, attempts, duration_ms, findings = fragment.len(), "step succeeded");
                self.recovery.record_step_completed(id, &step.name);
                self.emit(AppEvent::Workflow(WorkflowEvent::StepSucceeded {
                    environment_id: id.clone(),
                    step: step.name.clone(),
                    attempts,
                    duration_ms,
                }));
                StepOutcome {
                    record: StepRecord {
                        name: step.name.clone(),
                        tool: step.tool.clone(),
                        status: StepStatus::Succeeded,
                        attempts,
                        duration_ms,
                        error: None,
                        reason: None,
                        degraded,
                    },
                    fragment: Some(fragment),
                    error: None,
                    continue_on_error: step.continue_on_error,
                }
            }
            Err(err) => self.failed(target, step, attempts, elapsed, degraded, err),
        }
    }

    fn failed(
        &self,
        target: &ExecutionTarget,
        step: &WorkflowStep,
        attempts: u32,
        elapsed: Duration,
        degraded: bool,
        err: AssessmentError,
    ) -> StepOutcome {
        let id = &target.environment_id;
        let err = err.with_context("step", step.name.clone());
        warn!(
            environment_id = %id,
            step = %step.name,
            attempts,
            continue_on_error = step.continue_on_error,
            error = %err,
            "step failed"
        );
        self.recovery.record_step_failed(id, &step.name, &err);
        self.emit(AppEvent::Workflow(WorkflowEvent::StepFailed {
            environment_id: id.clone(),
            step: step.name.clone(),
            attempts,
            failure: FailureContext::from_error(&err),
        }));
        StepOutcome {
            record: StepRecord {
                name: step.name.clone(),
                tool: step.tool.clone(),
                status: StepStatus::Failed,
                attempts,
                duration_ms: millis(elapsed),
                error: Some(err.user_line()),
                reason: None,
                degraded,
            },
            fragment: None,
            error: Some(err),
            continue_on_error: step.continue_on_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(stage: &Stage) -> Vec<&str> {
        stage_steps(stage).iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn groups_are_placed_at_their_first_member() {
        let definition = WorkflowDefinition::new("order", "1")
            .step(WorkflowStep::new("a", "t"))
            .step(WorkflowStep::new("b", "t"))
            .step(WorkflowStep::new("c", "t"))
            .step(WorkflowStep::new("d", "t"))
            .parallel(["b", "d"]);
        let stages = schedule(&definition.steps, &definition);
        let order: Vec<Vec<&str>> = stages.iter().map(names).collect();
        assert_eq!(order, vec![vec!["a"], vec!["b", "d"], vec!["c"]]);
    }

    #[test]
    fn rescheduling_keeps_surviving_group_members() {
        let definition = WorkflowDefinition::new("order", "1")
            .step(WorkflowStep::new("a", "t"))
            .step(WorkflowStep::new("b", "t"))
            .step(WorkflowStep::new("c", "t"))
            .parallel(["b", "c"]);
        let remaining = vec![definition.steps[2].clone()];
        let stages = schedule(&remaining, &definition);
        assert_eq!(stages.len(), 1);
        assert!(matches!(&stages[0], Stage::Group(steps) if steps.len() == 1));
    }
}
