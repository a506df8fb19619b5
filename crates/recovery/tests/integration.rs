//! Integration tests for the recovery crate

use std::sync::Arc;

use async_trait::async_trait;
use sandcheck_config::RecoveryConfig;
use sandcheck_errors::{AssessmentError, ErrorFamily};
use sandcheck_events::{AppEvent, RecoveryEvent};
use sandcheck_recovery::{
    RecoveryManager, RecoveryRequest, RecoveryResult, RecoveryStrategy, MAX_CHECKPOINTS,
};
use sandcheck_types::{EnvironmentId, SecurityConfiguration, WorkflowStep};
use serde_json::json;
use tokio::sync::Notify;

fn manager(max: u32) -> RecoveryManager {
    RecoveryManager::new(&RecoveryConfig {
        max_recovery_attempts: max,
        ..RecoveryConfig::default()
    })
}

#[tokio::test]
async fn container_failure_recovers_until_attempts_run_out() {
    let manager = manager(3);
    let id = EnvironmentId::from("env-a");
    let error = AssessmentError::container_creation("runtime hiccup");

    let first = manager.attempt_recovery(&id, &error, None).await;
    assert!(first.success && first.should_continue);
    assert_eq!(first.strategy.as_deref(), Some("container-recreation"));

    let second = manager.attempt_recovery(&id, &error, None).await;
    assert!(second.success);

    // container recreation is capped at two attempts
    let third = manager.attempt_recovery(&id, &error, None).await;
    assert!(!third.success);

    let fourth = manager.attempt_recovery(&id, &error, None).await;
    assert!(!fourth.should_continue);
    let state = manager.state(&id).unwrap();
    assert_eq!(state.recovery_attempts, 3);
    assert!(state.recovery_attempts <= state.max_recovery_attempts);
}

#[tokio::test]
async fn security_violations_never_reach_strategies() {
    let (tx, mut rx) = sandcheck_events::channel();
    let manager = manager(3).with_events(Some(tx));
    let id = EnvironmentId::from("env-b");

    let result = manager
        .attempt_recovery(&id, &AssessmentError::filesystem_violation("escape"), None)
        .await;
    assert!(!result.success);
    assert!(manager.state(&id).is_none());

    let message = rx.try_recv().unwrap();
    assert!(matches!(
        message.event,
        AppEvent::Recovery(RecoveryEvent::RecoveryRejected { .. })
    ));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn resource_failure_yields_reduced_limits() {
    let manager = manager(3);
    let id = EnvironmentId::from("env-c");
    let security = SecurityConfiguration::default().with_limits("1", "1g", "2g");
    let result = manager
        .attempt_recovery(
            &id,
            &AssessmentError::insufficient_resources("no memory"),
            Some(&security),
        )
        .await;
    let reduced = result.reduced_security.unwrap();
    assert_eq!(reduced.resource_limits.memory, "512m");
    assert_eq!(reduced.resource_limits.cpu, "0.5");
}

struct AlwaysRecovers;

#[async_trait]
impl RecoveryStrategy for AlwaysRecovers {
    fn name(&self) -> &str {
        "always"
    }

    fn can_recover(&self, _request: &RecoveryRequest<'_>) -> bool {
        true
    }

    async fn recover(&self, _request: &RecoveryRequest<'_>) -> Result<RecoveryResult, AssessmentError> {
        Ok(RecoveryResult::recovered("always", "fine"))
    }
}

#[tokio::test]
async fn registered_strategies_run_after_built_ins() {
    let manager = manager(3);
    manager.register_strategy(Arc::new(AlwaysRecovers));
    assert_eq!(manager.strategy_names().last().map(String::as_str), Some("always"));

    let id = EnvironmentId::from("env-d");
    let result = manager
        .attempt_recovery(&id, &AssessmentError::network("dns"), None)
        .await;
    assert_eq!(result.strategy.as_deref(), Some("always"));
}

struct Gated(Arc<Notify>);

#[async_trait]
impl RecoveryStrategy for Gated {
    fn name(&self) -> &str {
        "gated"
    }

    fn can_recover(&self, _request: &RecoveryRequest<'_>) -> bool {
        true
    }

    async fn recover(&self, _request: &RecoveryRequest<'_>) -> Result<RecoveryResult, AssessmentError> {
        self.0.notified().await;
        Ok(RecoveryResult::recovered("gated", "released"))
    }
}

#[tokio::test]
async fn concurrent_attempts_share_one_budget_and_keep_recorded_steps() {
    let manager = manager(1);
    let gate = Arc::new(Notify::new());
    manager.register_strategy(Arc::new(Gated(Arc::clone(&gate))));
    let id = EnvironmentId::from("env-f");
    let error = AssessmentError::network("dns");

    // the first attempt parks inside its strategy while the second one runs
    let (first, second) = tokio::join!(manager.attempt_recovery(&id, &error, None), async {
        let second = manager.attempt_recovery(&id, &error, None).await;
        manager.record_step_completed(&id, "dependency-audit");
        gate.notify_one();
        second
    });

    assert!(first.success);
    assert!(!second.success && !second.should_continue);
    let state = manager.state(&id).unwrap();
    assert_eq!(state.recovery_attempts, 1);
    assert_eq!(state.completed_steps, vec!["dependency-audit".to_string()]);
    assert_eq!(state.strategy_attempts("gated"), 1);
    assert_eq!(first.new_state.unwrap().completed_steps.len(), 1);
}

#[test]
fn checkpoints_and_partial_results_survive_until_cleared() {
    let manager = manager(3);
    let id = EnvironmentId::from("env-e");
    for i in 0..12 {
        manager
            .checkpoint(&id, &format!("step-{i}"), Some(json!({ "i": i })))
            .unwrap();
    }
    assert_eq!(manager.get_checkpoints(&id).len(), MAX_CHECKPOINTS);
    manager.record_step_completed(&id, "dependency-audit");

    let err = manager.preserve_partial_results(
        &id,
        &["dependency-audit".to_string()],
        json!({ "securityFindings": [] }),
        &AssessmentError::analysis("eslint crashed"),
    );
    assert_eq!(err.family(), ErrorFamily::PartialAnalysis);
    let last = &err.partial().unwrap().last_checkpoint;
    assert_eq!(last.as_ref().unwrap()["stepName"], "step-11");

    manager.clear(&id);
    assert!(manager.get_checkpoints(&id).is_empty());
    assert!(manager.state(&id).is_none());
}

#[test]
fn degradation_plan_reports_whether_the_run_can_continue() {
    let manager = manager(3);
    let steps = vec![
        WorkflowStep::new("lint", "eslint").continue_on_error(),
        WorkflowStep::new("test", "npm-test"),
    ];
    let plan = manager.create_degradation_plan(None, &AssessmentError::analysis("x"), &steps);
    assert!(plan.can_continue);
    assert_eq!(plan.steps.len(), 1);

    let only_optional = vec![WorkflowStep::new("lint", "eslint").continue_on_error()];
    let plan =
        manager.create_degradation_plan(None, &AssessmentError::analysis("x"), &only_optional);
    assert!(!plan.can_continue);
}
