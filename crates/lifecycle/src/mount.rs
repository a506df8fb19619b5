//! Placing untrusted source into an environment

use std::path::Path;

use chrono::Utc;
use sandcheck_errors::{AssessmentError, ErrorKind};
use sandcheck_events::{AppEvent, EnvironmentEvent, EventEmitter};
use sandcheck_resilience::OperationClass;
use sandcheck_security::{resolve_mount_source, validate_container_path};
use sandcheck_types::{AlertSource, ContainerHandle, EnvironmentId, MountRecord, SecurityAlert};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::manager::LifecycleManager;

impl LifecycleManager {
    /// Copy `source` into the environment at `container_path`.
    ///
    /// The source must resolve under one of the allowed roots and the
    /// destination must not be a system directory; neither failure touches
    /// the container. The tree is then scanned, and any high-risk pattern
    /// raises an alert and terminates the environment before anything is
    /// copied. A clean tree is copied with bounded retry.
    ///
    /// # Errors
    ///
    /// Returns a security violation for escaping or dirty sources and for
    /// sensitive destinations, a validation error for unknown or unusable
    /// environments, and the copy error once retries are exhausted.
    pub async fn mount_codebase(
        &self,
        id: &EnvironmentId,
        source: &Path,
        container_path: &Path,
    ) -> Result<MountRecord, AssessmentError> {
        let environment = self.registry.require(id)?;
        let Some(handle) = environment.container.clone().filter(|_| environment.is_usable()) else {
            return Err(AssessmentError::validation(format!(
                "environment {id} is {} and cannot accept a mount",
                environment.status
            ))
            .with_context("environmentId", id.as_str()));
        };

        validate_container_path(container_path)
            .map_err(|e| e.with_context("environmentId", id.as_str()))?;
        let canonical = match resolve_mount_source(source, &self.mount_roots) {
            Ok(canonical) => canonical,
            Err(err) => {
                if let ErrorKind::SecurityViolation { violation } = err.kind {
                    self.security.raise_alert(SecurityAlert::new(
                        id.clone(),
                        violation,
                        AlertSource::Lifecycle,
                        err.message.clone(),
                    ));
                }
                return Err(err.with_context("environmentId", id.as_str()));
            }
        };

        let report = self.security.scan_source(&canonical).await?;
        if let Some(violation) = report.to_violation() {
            let violation = violation.with_context("environmentId", id.as_str());
            if let ErrorKind::SecurityViolation { violation: kind } = violation.kind {
                self.security.raise_alert(SecurityAlert::new(
                    id.clone(),
                    kind,
                    AlertSource::MountScan,
                    violation.message.clone(),
                ));
            }
            self.terminate(id, &violation.message).await;
            return Err(violation);
        }
        debug!(
            environment_id = %id,
            files = report.files_scanned,
            skipped = report.files_skipped,
            "source scan clean"
        );

        self.retrying(OperationClass::ContainerCreation, "copy-in", |_| {
            self.runtime.copy_in(&handle, &canonical, container_path)
        })
        .await?;
        self.verify_mount(id, &handle, container_path).await;

        let record = MountRecord {
            source: canonical,
            container_path: container_path.to_path_buf(),
            mounted_at: Utc::now(),
            files_scanned: report.files_scanned,
        };
        self.registry.update(id, |environment| {
            environment.mount = Some(record.clone());
        });
        self.checkpoint(
            id,
            "codebase-mounted",
            Some(json!({ "containerPath": container_path.display().to_string() })),
        );
        self.recovery.record_step_completed(id, "codebase-mount");

        info!(
            environment_id = %id,
            source = %record.source.display(),
            container_path = %container_path.display(),
            "codebase mounted"
        );
        self.emit(AppEvent::Environment(EnvironmentEvent::CodebaseMounted {
            environment_id: id.clone(),
            source: record.source.clone(),
            container_path: record.container_path.clone(),
            files_scanned: record.files_scanned,
        }));
        Ok(record)
    }

    /// Readable for the analysis user. Failures are logged only.
    async fn verify_mount(
        &self,
        id: &EnvironmentId,
        handle: &ContainerHandle,
        container_path: &Path,
    ) {
        let argv = vec![
            "test".to_string(),
            "-r".to_string(),
            container_path.display().to_string(),
        ];
        match self.runtime.exec(handle, &argv).await {
            Ok(output) if output.success() => {}
            Ok(output) => warn!(
                environment_id = %id,
                container_path = %container_path.display(),
                exit_code = output.exit_code,
                "mount permission check failed"
            ),
            Err(err) => warn!(
                environment_id = %id,
                container_path = %container_path.display(),
                error = %err,
                "mount permission check could not run"
            ),
        }
    }
}
