//! Degradation planning across the recovery manager and the workflow engine

mod common;

use std::path::Path;
use std::sync::Arc;

use common::{nodejs_analysis, nodejs_limits, write_nodejs_project, Scripted, TestEnvironment};
use proptest::prelude::*;
use sandcheck_config::RecoveryConfig;
use sandcheck_errors::{AssessmentError, ErrorFamily, ViolationKind};
use sandcheck_ops::{create_environment, execute_workflow, mount_codebase, WorkflowSelection};
use sandcheck_recovery::{plan_degradation, RecoveryManager, RecoveryState};
use sandcheck_types::{EnvironmentId, WorkflowDefinition, WorkflowStep};
use sandcheck_workflow::{StepStatus, ToolAdapter, WorkflowStatus};

fn remaining() -> Vec<WorkflowStep> {
    vec![
        WorkflowStep::new("gas-optimization", "gas-report"),
        WorkflowStep::new("docs", "documentation"),
        WorkflowStep::new("unit-tests", "npm-test").with_timeout_ms(600_000),
        WorkflowStep::new("secret-scan", "secret-scan"),
    ]
}

#[test]
fn analysis_failure_degrades_optional_steps_and_continues() {
    let recovery = RecoveryManager::new(&RecoveryConfig::default());
    let id = EnvironmentId::from("env-degrade");
    let _ = recovery.init_state(&id);

    let plan = recovery.create_degradation_plan(
        Some(&id),
        &AssessmentError::analysis("slither crashed"),
        &remaining(),
    );

    assert!(plan.can_continue);
    assert_eq!(plan.skipped_steps, vec!["gas-optimization", "docs"]);
    assert_eq!(plan.modified_steps, vec!["unit-tests"]);
    assert_eq!(plan.unchanged_steps, vec!["secret-scan"]);
    let tests = plan.steps.iter().find(|s| s.name == "unit-tests").unwrap();
    assert_eq!(tests.timeout_ms, Some(300_000));
    assert!(tests.continue_on_error);
}

#[test]
fn security_violation_cannot_continue() {
    let recovery = RecoveryManager::new(&RecoveryConfig::default());
    let plan = recovery.create_degradation_plan(
        None,
        &AssessmentError::security_violation(ViolationKind::Network, "egress attempt"),
        &remaining(),
    );
    assert!(!plan.can_continue);
}

#[test]
fn nothing_left_to_run_cannot_continue() {
    let recovery = RecoveryManager::new(&RecoveryConfig::default());
    let optional_only = vec![
        WorkflowStep::new("gas-optimization", "gas-report"),
        WorkflowStep::new("inventory", "file-inventory"),
    ];
    let plan = recovery.create_degradation_plan(
        None,
        &AssessmentError::analysis("tool crashed"),
        &optional_only,
    );
    assert_eq!(plan.skipped_steps.len(), 2);
    assert!(!plan.can_continue);
}

#[tokio::test(start_paused = true)]
async fn aborted_workflow_preserves_partial_results() {
    let lint = Scripted::new("lint-tool", 0);
    let analyzer = Scripted::new("analyzer", 10);
    let gas = Scripted::new("gas-report", 0);
    let tools: Vec<Arc<dyn ToolAdapter>> = vec![lint, analyzer, gas.clone()];
    let t = TestEnvironment::with_tools(tools);
    write_nodejs_project(t.root.path());

    let env = create_environment(&t.ctx, nodejs_limits(), nodejs_analysis())
        .await
        .unwrap();
    mount_codebase(&t.ctx, &env.id, t.root.path(), Path::new("/workspace"))
        .await
        .unwrap();

    let definition = WorkflowDefinition::new("aborting", "1")
        .step(WorkflowStep::new("lint", "lint-tool"))
        .step(WorkflowStep::new("analyze", "analyzer"))
        .step(WorkflowStep::new("gas-optimization", "gas-report"));
    let err = execute_workflow(
        &t.ctx,
        &env.id,
        WorkflowSelection::Definition(definition),
        None,
    )
    .await
    .unwrap_err();

    assert_eq!(err.family(), ErrorFamily::PartialAnalysis);
    let partial = err.partial().unwrap();
    assert_eq!(partial.completed_steps, vec!["lint".to_string()]);
    assert_eq!(gas.calls(), 0);
    assert!(partial.last_checkpoint.is_some());
}

#[tokio::test(start_paused = true)]
async fn degraded_workflow_completes_with_errors() {
    let analyzer = Scripted::new("analyzer", 10);
    let scanner = Scripted::new("scanner", 0);
    let docs = Scripted::new("documentation", 0);
    let tools: Vec<Arc<dyn ToolAdapter>> = vec![analyzer, scanner.clone(), docs.clone()];
    let t = TestEnvironment::with_tools(tools);
    write_nodejs_project(t.root.path());

    let env = create_environment(&t.ctx, nodejs_limits(), nodejs_analysis())
        .await
        .unwrap();
    mount_codebase(&t.ctx, &env.id, t.root.path(), Path::new("/workspace"))
        .await
        .unwrap();

    let definition = WorkflowDefinition::new("degrading", "1")
        .step(WorkflowStep::new("analyze", "analyzer"))
        .step(WorkflowStep::new("docs", "documentation"))
        .step(WorkflowStep::new("scan", "scanner"));
    let report = execute_workflow(
        &t.ctx,
        &env.id,
        WorkflowSelection::Definition(definition),
        None,
    )
    .await
    .unwrap();

    assert_eq!(report.status, WorkflowStatus::CompletedWithErrors);
    let plan = report.degradation.as_ref().unwrap();
    assert_eq!(plan.skipped_steps, vec!["docs"]);
    assert_eq!(report.step("docs").unwrap().status, StepStatus::Skipped);
    assert_eq!(report.step("scan").unwrap().status, StepStatus::Succeeded);
    assert_eq!(docs.calls(), 0);
    assert_eq!(scanner.calls(), 1);
}

fn step_strategy() -> impl Strategy<Value = WorkflowStep> {
    (
        "[a-z]{3,8}",
        prop::sample::select(vec!["eslint", "gas-report", "coverage", "slither", "npm-test"]),
        any::<bool>(),
        prop::option::of(1_000u64..2_000_000),
    )
        .prop_map(|(name, tool, continue_on_error, timeout)| {
            let mut step = WorkflowStep::new(name, tool);
            step.continue_on_error = continue_on_error;
            step.timeout_ms = timeout;
            step
        })
}

proptest! {
    #[test]
    fn plan_partitions_the_remaining_steps(steps in prop::collection::vec(step_strategy(), 0..8)) {
        let plan = plan_degradation(
            &AssessmentError::analysis("tool crashed"),
            &RecoveryState::new(3),
            &steps,
        );
        prop_assert_eq!(plan.total(), steps.len());
        prop_assert_eq!(plan.steps.len(), steps.len() - plan.skipped_steps.len());
        prop_assert_eq!(plan.can_continue, plan.skipped_steps.len() < steps.len());
        for step in plan.steps.iter().filter(|s| s.continue_on_error) {
            prop_assert!(plan.modified_steps.contains(&step.name));
        }
    }

    #[test]
    fn security_errors_never_continue(steps in prop::collection::vec(step_strategy(), 0..8)) {
        let plan = plan_degradation(
            &AssessmentError::filesystem_violation("escape"),
            &RecoveryState::new(3),
            &steps,
        );
        prop_assert!(!plan.can_continue);
    }
}
