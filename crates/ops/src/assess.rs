//! The full create, mount, analyze, destroy pipeline

use sandcheck_errors::AssessmentError;
use sandcheck_events::EventEmitter;
use sandcheck_workflow::ProgressCallback;
use tracing::warn;

use crate::{
    create_environment, destroy_environment, execute_workflow, mount_codebase, AssessmentReport,
    AssessmentRequest, OpsCtx,
};

/// Assess a codebase end to end.
///
/// The environment is destroyed afterwards unless the request keeps it,
/// also when mounting or the workflow failed. An environment terminated
/// by a security violation is already gone.
///
/// # Errors
///
/// Returns the first creation, mount or workflow error.
pub async fn assess(
    ctx: &OpsCtx,
    request: AssessmentRequest,
    on_progress: Option<ProgressCallback>,
) -> Result<AssessmentReport, AssessmentError> {
    let _correlation = ctx.push_correlation("assess");
    ctx.emit_operation_started("assess");

    let environment = create_environment(ctx, request.security, request.analysis).await?;
    let id = environment.id.clone();

    let outcome = async {
        mount_codebase(ctx, &id, &request.source, &ctx.config.lifecycle.working_dir).await?;
        execute_workflow(ctx, &id, request.workflow, on_progress).await
    }
    .await;

    let current = ctx.lifecycle.get(&id).unwrap_or(environment);
    let terminated = matches!(&outcome, Err(err) if err.is_security_violation());
    let destroyed = if request.keep_environment || terminated {
        false
    } else {
        match destroy_environment(ctx, &id).await {
            Ok(()) => true,
            Err(err) => {
                warn!(environment_id = %id, error = %err, "environment left behind after assessment");
                false
            }
        }
    };

    match outcome {
        Ok(report) => {
            ctx.emit_operation_completed("assess", report.errors.is_empty());
            Ok(AssessmentReport {
                environment: current,
                report,
                destroyed,
            })
        }
        Err(err) => {
            ctx.emit_operation_failed("assess", err.user_line());
            Err(err)
        }
    }
}
