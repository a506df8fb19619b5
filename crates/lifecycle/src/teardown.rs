//! Status queries, stop, destroy and emergency termination

use sandcheck_errors::{AssessmentError, ViolationKind};
use sandcheck_events::{AppEvent, EnvironmentEvent, EventEmitter, FailureContext};
use sandcheck_runtime::is_not_found;
use sandcheck_types::{AlertSource, Environment, EnvironmentId, EnvironmentStatus, SecurityAlert};
use tracing::{debug, error, info, warn};

use crate::manager::LifecycleManager;

impl LifecycleManager {
    /// Current record for `id`, refreshed with one runtime inspection.
    ///
    /// A container that is no longer running moves a ready or running
    /// environment to `stopped`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown ids and the inspection error
    /// otherwise.
    pub async fn get_status(&self, id: &EnvironmentId) -> Result<Environment, AssessmentError> {
        let mut environment = self.registry.require(id)?;
        let Some(handle) = environment.container.clone() else {
            return Ok(environment);
        };
        let state = self.runtime.inspect(&handle).await?;
        if !state.running
            && matches!(
                environment.status,
                EnvironmentStatus::Ready | EnvironmentStatus::Running
            )
        {
            self.set_status(id, EnvironmentStatus::Stopped)?;
            environment.status = EnvironmentStatus::Stopped;
        }
        Ok(environment)
    }

    /// Every registered environment whose container can still be inspected.
    pub async fn list(&self) -> Vec<Environment> {
        let mut listed = Vec::new();
        for environment in self.registry.snapshot() {
            let Some(handle) = &environment.container else {
                listed.push(environment);
                continue;
            };
            match self.runtime.inspect(handle).await {
                Ok(_) => listed.push(environment),
                Err(err) => warn!(
                    environment_id = %environment.id,
                    container = %handle,
                    error = %err,
                    "omitting environment whose container cannot be inspected"
                ),
            }
        }
        listed
    }

    /// Stop the container, escalating to a kill when the graceful stop
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown ids, or the kill error when
    /// both attempts fail.
    pub async fn stop(&self, id: &EnvironmentId) -> Result<(), AssessmentError> {
        let environment = self.registry.require(id)?;
        let Some(handle) = environment.container else {
            return Err(AssessmentError::validation(format!(
                "environment {id} has no container to stop"
            ))
            .with_context("environmentId", id.as_str()));
        };

        let forced = match self.runtime.stop(&handle, self.grace()).await {
            Ok(()) => false,
            Err(err) if is_not_found(&err) => false,
            Err(err) => {
                warn!(environment_id = %id, error = %err, "graceful stop failed, killing");
                match self.runtime.kill(&handle).await {
                    Ok(()) => true,
                    Err(kill_err) if is_not_found(&kill_err) => true,
                    Err(kill_err) => return Err(kill_err.with_context("environmentId", id.as_str())),
                }
            }
        };

        self.set_status(id, EnvironmentStatus::Stopped)?;
        info!(environment_id = %id, forced, "environment stopped");
        self.emit(AppEvent::Environment(EnvironmentEvent::Stopped {
            environment_id: id.clone(),
            forced,
        }));
        Ok(())
    }

    /// Stop and remove the environment and everything held for it.
    ///
    /// Local state (registry entry, recovery state, checkpoints, monitoring)
    /// is released whatever the runtime answers. A container that is
    /// already gone counts as removed.
    ///
    /// # Errors
    ///
    /// Returns the removal error when the container could not be removed.
    pub async fn destroy_environment(&self, id: &EnvironmentId) -> Result<(), AssessmentError> {
        let environment = self.registry.remove(id);
        let mut failure = None;

        if let Some(handle) = environment.as_ref().and_then(|e| e.container.clone()) {
            match self.runtime.stop(&handle, self.grace()).await {
                Ok(()) => {}
                Err(err) if is_not_found(&err) => {}
                Err(err) => {
                    warn!(environment_id = %id, error = %err, "graceful stop failed, killing");
                    if let Err(kill_err) = self.runtime.kill(&handle).await {
                        debug!(environment_id = %id, error = %kill_err, "kill failed");
                    }
                }
            }
            match self.runtime.remove(&handle, true).await {
                Ok(()) => {}
                Err(err) if is_not_found(&err) => {
                    debug!(environment_id = %id, "container already gone");
                }
                Err(err) => failure = Some(err.with_context("environmentId", id.as_str())),
            }
        }
        if let Some(environment) = &environment {
            self.release_network(id, environment.network.as_deref()).await;
        }

        self.recovery.clear(id);
        self.security.forget(id);

        match failure {
            None => {
                info!(environment_id = %id, "environment destroyed");
                self.emit(AppEvent::Environment(EnvironmentEvent::Destroyed {
                    environment_id: id.clone(),
                }));
                Ok(())
            }
            Some(err) => {
                error!(environment_id = %id, error = %err, "environment destroy failed");
                self.emit(AppEvent::Environment(EnvironmentEvent::DestroyFailed {
                    environment_id: id.clone(),
                    failure: FailureContext::from_error(&err),
                }));
                Err(err)
            }
        }
    }

    /// Kill and force-remove the environment without retry or recovery,
    /// raising a security alert first.
    pub async fn emergency_terminate(&self, id: &EnvironmentId, reason: &str) {
        self.security.raise_alert(SecurityAlert::new(
            id.clone(),
            ViolationKind::PrivilegeEscalation,
            AlertSource::Lifecycle,
            format!("emergency termination: {reason}"),
        ));
        self.terminate(id, reason).await;
    }

    /// Termination without the alert, for callers that already raised one.
    pub(crate) async fn terminate(&self, id: &EnvironmentId, reason: &str) {
        error!(environment_id = %id, reason, "emergency termination");
        let environment = self.registry.remove(id);
        if let Some(environment) = &environment {
            if let Some(handle) = &environment.container {
                if let Err(err) = self.runtime.kill(handle).await {
                    if !is_not_found(&err) {
                        warn!(environment_id = %id, error = %err, "kill failed during termination");
                    }
                }
                self.release_container(id, handle).await;
            }
            self.release_network(id, environment.network.as_deref()).await;
        }

        self.recovery.clear(id);
        self.security.forget(id);
        self.emit(AppEvent::Environment(EnvironmentEvent::EmergencyTerminated {
            environment_id: id.clone(),
            reason: reason.to_string(),
        }));
    }
}
