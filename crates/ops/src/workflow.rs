//! Workflow operations

use sandcheck_errors::AssessmentError;
use sandcheck_events::EventEmitter;
use sandcheck_types::{Environment, EnvironmentId, EnvironmentStatus, WorkflowDefinition};
use sandcheck_workflow::{
    resolve_definition, validate_definition, ExecutionReport, ExecutionTarget, ProgressCallback,
};
use tracing::{info, warn};

use crate::{OpsCtx, WorkflowInfo, WorkflowSelection};

/// Resolve `selection` for `environment`.
///
/// # Errors
///
/// Returns a validation error for invalid or unknown workflows.
pub async fn select_workflow(
    ctx: &OpsCtx,
    environment: &Environment,
    selection: WorkflowSelection,
) -> Result<WorkflowDefinition, AssessmentError> {
    match selection {
        WorkflowSelection::Definition(definition) => {
            validate_definition(&definition)?;
            Ok(definition)
        }
        WorkflowSelection::Reference(reference) => {
            resolve_definition(
                &reference,
                &ctx.catalog,
                ctx.config.workflow.definitions_dir.as_deref(),
            )
            .await
        }
        WorkflowSelection::Auto => ctx
            .catalog
            .select(&environment.analysis_config)
            .cloned()
            .ok_or_else(|| {
                AssessmentError::validation(format!(
                    "no workflow matches codebase type '{}'",
                    environment.analysis_config.codebase_type
                ))
            }),
    }
}

/// Run a workflow in a ready environment.
///
/// The environment is `running` for the duration and back to `ready`
/// afterwards. A security violation raised by any step terminates the
/// environment instead.
///
/// # Errors
///
/// Returns a validation error for unknown or unusable environments and
/// invalid workflows, the security violation that terminated the
/// environment, and a partial-analysis error when the run stopped early.
pub async fn execute_workflow(
    ctx: &OpsCtx,
    id: &EnvironmentId,
    selection: WorkflowSelection,
    on_progress: Option<ProgressCallback>,
) -> Result<ExecutionReport, AssessmentError> {
    let _correlation = ctx.push_correlation(format!("workflow:{id}"));
    let environment = ctx.lifecycle.registry().require(id)?;
    let definition = select_workflow(ctx, &environment, selection).await?;
    let target = ExecutionTarget::from_environment(&environment, ctx.runtime())?;

    info!(environment_id = %id, workflow = %definition.name, "executing workflow");
    ctx.emit_operation_started(format!("workflow:{}", definition.name));
    ctx.lifecycle.set_status(id, EnvironmentStatus::Running)?;

    let result = ctx.engine.execute(&target, &definition, on_progress).await;

    match &result {
        Err(err) if err.is_security_violation() => {
            ctx.lifecycle.emergency_terminate(id, &err.message).await;
        }
        _ => {
            if let Err(err) = ctx.lifecycle.set_status(id, EnvironmentStatus::Ready) {
                warn!(environment_id = %id, error = %err, "environment vanished during the workflow");
            }
        }
    }
    match &result {
        Ok(report) => ctx.emit_operation_completed(
            format!("workflow:{}", definition.name),
            report.errors.is_empty(),
        ),
        Err(err) => {
            ctx.emit_operation_failed(format!("workflow:{}", definition.name), err.user_line());
        }
    }
    result
}

/// Every workflow in the catalog.
#[must_use]
pub fn list_workflows(ctx: &OpsCtx) -> Vec<WorkflowInfo> {
    ctx.catalog
        .definitions()
        .iter()
        .map(WorkflowInfo::from)
        .collect()
}

/// Load and validate a definition by path or name without running it.
///
/// # Errors
///
/// Returns the load or validation error.
pub async fn validate_workflow(
    ctx: &OpsCtx,
    reference: &str,
) -> Result<WorkflowInfo, AssessmentError> {
    let definition = resolve_definition(
        reference,
        &ctx.catalog,
        ctx.config.workflow.definitions_dir.as_deref(),
    )
    .await?;
    let known: Vec<String> = ctx.engine.tools().names();
    for step in definition.steps.iter().chain(&definition.cleanup) {
        if !known.contains(&step.tool) {
            warn!(workflow = %definition.name, step = %step.name, tool = %step.tool, "step uses an unregistered tool");
        }
    }
    Ok(WorkflowInfo::from(&definition))
}
