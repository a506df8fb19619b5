//! Environment operations

use std::path::Path;

use sandcheck_errors::AssessmentError;
use sandcheck_events::EventEmitter;
use sandcheck_recovery::Checkpoint;
use sandcheck_types::{
    AnalysisConfiguration, Environment, EnvironmentId, MountRecord, SecurityConfiguration,
};

use crate::OpsCtx;

/// Provision an isolated environment.
///
/// # Errors
///
/// Returns a configuration or security error for invalid requests and the
/// provisioning error when creation failed even after recovery.
pub async fn create_environment(
    ctx: &OpsCtx,
    security: SecurityConfiguration,
    analysis: AnalysisConfiguration,
) -> Result<Environment, AssessmentError> {
    let _correlation = ctx.push_correlation("environment:create");
    ctx.emit_operation_started("create_environment");
    match ctx.lifecycle.create_environment(security, analysis).await {
        Ok(environment) => {
            ctx.emit_operation_completed("create_environment", true);
            Ok(environment)
        }
        Err(err) => {
            ctx.emit_operation_failed("create_environment", err.user_line());
            Err(err)
        }
    }
}

/// Copy a scanned codebase into the environment.
///
/// # Errors
///
/// Returns a security violation for sources outside the allow-list, for
/// dangerous content (the environment is terminated) and for sensitive
/// destinations.
pub async fn mount_codebase(
    ctx: &OpsCtx,
    id: &EnvironmentId,
    source: &Path,
    container_path: &Path,
) -> Result<MountRecord, AssessmentError> {
    let _correlation = ctx.push_correlation(format!("environment:mount:{id}"));
    ctx.lifecycle.mount_codebase(id, source, container_path).await
}

/// Stop and remove the environment. Destroying an unknown environment
/// succeeds.
///
/// # Errors
///
/// Returns the runtime error when the container could not be removed.
pub async fn destroy_environment(ctx: &OpsCtx, id: &EnvironmentId) -> Result<(), AssessmentError> {
    let _correlation = ctx.push_correlation(format!("environment:destroy:{id}"));
    ctx.lifecycle.destroy_environment(id).await
}

/// Current state of one environment.
///
/// # Errors
///
/// Returns a validation error for unknown ids.
pub async fn get_environment_status(
    ctx: &OpsCtx,
    id: &EnvironmentId,
) -> Result<Environment, AssessmentError> {
    ctx.lifecycle.get_status(id).await
}

/// Every environment whose container can still be inspected.
pub async fn list_environments(ctx: &OpsCtx) -> Vec<Environment> {
    ctx.lifecycle.list().await
}

/// Stop the environment's container, escalating to a kill.
///
/// # Errors
///
/// Returns a validation error for unknown ids or the kill error.
pub async fn stop_environment(ctx: &OpsCtx, id: &EnvironmentId) -> Result<(), AssessmentError> {
    let _correlation = ctx.push_correlation(format!("environment:stop:{id}"));
    ctx.lifecycle.stop(id).await
}

/// Checkpoint history of an environment, oldest first.
#[must_use]
pub fn get_checkpoints(ctx: &OpsCtx, id: &EnvironmentId) -> Vec<Checkpoint> {
    ctx.lifecycle.get_checkpoints(id)
}
