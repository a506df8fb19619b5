//! Security policy engine: from configuration to container constraints

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use sandcheck_config::SecurityPolicyConfig;
use sandcheck_errors::AssessmentError;
use sandcheck_events::{AppEvent, EventEmitter, EventSender, SecurityEvent};
use sandcheck_runtime::{ContainerSpec, HostConstraints};
use sandcheck_types::{EnvironmentId, SecurityAlert, SecurityConfiguration};
use tracing::{debug, warn};

use crate::alert::AlertSink;
use crate::filesystem::{default_tmpfs, validate_filesystem_access};
use crate::limits::{fit_to_host, translate_limits, HostCapacity, ResourceQuota};
use crate::monitor::{Activity, ActivityMonitor, ActivityRecord};
use crate::network::{plan_network, NetworkPlan};
use crate::scanner::{ScanReport, SourceScanner};

/// Label carrying the environment id on every container
pub const ENVIRONMENT_LABEL: &str = "sandcheck.environment";

/// Image, working directory and keep-alive command for new containers
#[derive(Debug, Clone)]
pub struct ContainerTemplate<'a> {
    pub image: &'a str,
    pub working_dir: &'a Path,
    pub codebase_type: &'a str,
}

/// Applies isolation, limits, scanning and monitoring policy
#[derive(Debug)]
pub struct SecurityPolicyEngine {
    config: SecurityPolicyConfig,
    network_prefix: String,
    host: HostCapacity,
    scanner: Arc<SourceScanner>,
    monitor: ActivityMonitor,
    alerts: AlertSink,
    events: Option<EventSender>,
}

impl EventEmitter for SecurityPolicyEngine {
    fn event_sender(&self) -> Option<&EventSender> {
        self.events.as_ref()
    }
}

impl SecurityPolicyEngine {
    /// # Errors
    ///
    /// Returns a configuration error if a configured scan pattern is invalid.
    pub fn new(
        config: &SecurityPolicyConfig,
        network_prefix: impl Into<String>,
        events: Option<EventSender>,
    ) -> Result<Self, AssessmentError> {
        Ok(Self {
            scanner: Arc::new(SourceScanner::new(config)?),
            config: config.clone(),
            network_prefix: network_prefix.into(),
            host: HostCapacity::detect(),
            monitor: ActivityMonitor::new(),
            alerts: AlertSink::new(events.clone()),
            events,
        })
    }

    /// Override the sampled host capacity.
    #[must_use]
    pub fn with_host_capacity(mut self, host: HostCapacity) -> Self {
        self.host = host;
        self
    }

    #[must_use]
    pub fn host_capacity(&self) -> HostCapacity {
        self.host
    }

    /// Synchronous checks done before anything is provisioned.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed limits, hosts or
    /// filesystem partitions, and a security violation for sensitive targets.
    pub fn validate(&self, security: &SecurityConfiguration) -> Result<ResourceQuota, AssessmentError> {
        let quota = translate_limits(&security.resource_limits)?;
        validate_filesystem_access(&security.filesystem_access)?;
        for host in &security.allowed_network_access {
            crate::network::validate_host(host, &self.config.sensitive_hosts)?;
        }
        Ok(quota)
    }

    /// Validated limits, degraded to fit the host when necessary.
    ///
    /// # Errors
    ///
    /// See [`SecurityPolicyEngine::validate`].
    pub fn resolve_limits(
        &self,
        environment_id: Option<&EnvironmentId>,
        security: &SecurityConfiguration,
    ) -> Result<ResourceQuota, AssessmentError> {
        let requested = self.validate(security)?;
        let (fitted, degraded) =
            fit_to_host(requested, self.host, self.config.host_capacity_percent);
        for degradation in degraded {
            warn!(
                environment_id = ?environment_id.map(EnvironmentId::as_str),
                resource = %degradation.resource,
                requested = degradation.requested,
                granted = degradation.granted,
                "resource limit exceeds host capacity, degrading"
            );
            self.emit(AppEvent::Security(SecurityEvent::LimitDegraded {
                environment_id: environment_id.cloned(),
                resource: degradation.resource,
                requested: degradation.requested,
                granted: degradation.granted,
            }));
        }
        Ok(fitted)
    }

    /// # Errors
    ///
    /// Returns the first invalid or sensitive allow-list entry.
    pub fn network_plan(
        &self,
        environment_id: &EnvironmentId,
        security: &SecurityConfiguration,
    ) -> Result<NetworkPlan, AssessmentError> {
        plan_network(
            environment_id,
            security,
            &self.network_prefix,
            &self.config.sensitive_hosts,
        )
    }

    /// Full create spec for `environment_id`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`SecurityPolicyEngine::resolve_limits`].
    pub fn container_spec(
        &self,
        environment_id: &EnvironmentId,
        security: &SecurityConfiguration,
        plan: &NetworkPlan,
        template: &ContainerTemplate<'_>,
    ) -> Result<ContainerSpec, AssessmentError> {
        let quota = self.resolve_limits(Some(environment_id), security)?;

        let mut env = BTreeMap::new();
        env.insert("CI".to_string(), "true".to_string());
        env.insert("HOME".to_string(), "/tmp".to_string());
        if let NetworkPlan::Restricted { allowed_hosts, .. } = plan {
            env.insert("SANDCHECK_ALLOWED_HOSTS".to_string(), allowed_hosts.join(","));
        }

        let mut labels = BTreeMap::new();
        labels.insert(ENVIRONMENT_LABEL.to_string(), environment_id.to_string());
        labels.insert("sandcheck.codebase".to_string(), template.codebase_type.to_string());
        for policy in &security.security_policies {
            labels.insert(format!("sandcheck.policy.{policy}"), "true".to_string());
        }

        let mut access = security.filesystem_access.clone();
        access.writable_mounts.insert(template.working_dir.to_path_buf());

        let host = HostConstraints {
            memory_bytes: quota.memory_bytes,
            cpu_quota: quota.cpu_quota,
            cpu_period: quota.cpu_period,
            disk_bytes: quota.disk_bytes,
            pids_limit: self.config.pids_limit,
            network_mode: plan.mode(),
            cap_drop: vec!["ALL".to_string()],
            cap_add: Vec::new(),
            privileged: false,
            security_opts: vec!["no-new-privileges".to_string()],
            read_only_rootfs: true,
            tmpfs: default_tmpfs(&access, &self.config.tmpfs_size),
        };
        debug!(environment_id = %environment_id, network = %host.network_mode, memory = host.memory_bytes, "container spec built");

        Ok(ContainerSpec {
            name: environment_id.to_string(),
            image: template.image.to_string(),
            working_dir: template.working_dir.to_path_buf(),
            env,
            labels,
            command: vec!["sleep".to_string(), "infinity".to_string()],
            host,
        })
    }

    /// Scan an untrusted tree on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `root` is missing, or an external
    /// resource error if the scan task dies.
    pub async fn scan_source(&self, root: &Path) -> Result<ScanReport, AssessmentError> {
        let scanner = Arc::clone(&self.scanner);
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || scanner.scan(&root))
            .await
            .map_err(|e| AssessmentError::external_resource("source scan task failed").with_cause(e))?
    }

    pub fn enable_monitoring(&self, environment_id: &EnvironmentId, security: &SecurityConfiguration) {
        self.monitor.enable(environment_id, security);
        debug!(environment_id = %environment_id, "monitoring enabled");
        self.emit(AppEvent::Security(SecurityEvent::MonitoringEnabled {
            environment_id: environment_id.clone(),
        }));
    }

    /// Record an attempted action; a policy breach raises an alert.
    pub fn record_activity(&self, environment_id: &EnvironmentId, activity: Activity) -> Option<SecurityAlert> {
        self.emit(AppEvent::Security(SecurityEvent::ActivityRecorded {
            environment_id: environment_id.clone(),
            activity: activity.label().to_string(),
            detail: activity.detail(),
        }));
        let alert = self.monitor.record(environment_id, activity)?;
        self.raise_alert(alert.clone());
        Some(alert)
    }

    pub fn raise_alert(&self, alert: SecurityAlert) {
        self.alerts.raise(alert);
    }

    #[must_use]
    pub fn activity(&self, environment_id: &EnvironmentId) -> Vec<ActivityRecord> {
        self.monitor.activity(environment_id)
    }

    #[must_use]
    pub fn alerts(&self, environment_id: &EnvironmentId) -> Vec<SecurityAlert> {
        self.alerts.alerts_for(environment_id)
    }

    #[must_use]
    pub fn is_monitored(&self, environment_id: &EnvironmentId) -> bool {
        self.monitor.is_enabled(environment_id)
    }

    /// Drop monitoring and alert history for a destroyed environment.
    pub fn forget(&self, environment_id: &EnvironmentId) {
        self.monitor.disable(environment_id);
        self.alerts.clear(environment_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandcheck_runtime::NetworkMode;

    fn engine() -> SecurityPolicyEngine {
        SecurityPolicyEngine::new(&SecurityPolicyConfig::default(), "sandcheck-net", None)
            .unwrap()
            .with_host_capacity(HostCapacity {
                available_memory_bytes: 64 << 30,
                cpus: 8,
            })
    }

    fn template() -> ContainerTemplate<'static> {
        ContainerTemplate {
            image: "node:20-bookworm-slim",
            working_dir: Path::new("/workspace"),
            codebase_type: "nodejs",
        }
    }

    #[test]
    fn spec_is_locked_down() {
        let engine = engine();
        let id = EnvironmentId::from("env-1");
        let security = SecurityConfiguration::default().with_limits("0.5", "512m", "1g");
        let plan = engine.network_plan(&id, &security).unwrap();
        let spec = engine.container_spec(&id, &security, &plan, &template()).unwrap();

        assert!(spec.host.is_locked_down());
        assert!(spec.host.read_only_rootfs);
        assert_eq!(spec.host.network_mode, NetworkMode::None);
        assert_eq!(spec.host.memory_bytes, 512 << 20);
        assert_eq!(spec.host.cpu_quota, 50_000);
        assert_eq!(spec.host.cpu_period, 100_000);
        assert_eq!(spec.labels.get(ENVIRONMENT_LABEL).map(String::as_str), Some("env-1"));
        assert!(spec.host.tmpfs.iter().any(|t| t.path == Path::new("/workspace")));
    }

    #[test]
    fn invalid_limits_fail_validation() {
        let security = SecurityConfiguration::default().with_limits("zero", "512m", "1g");
        assert!(engine().validate(&security).is_err());
    }

    #[tokio::test]
    async fn degradation_is_reported() {
        let (tx, mut rx) = sandcheck_events::channel();
        let engine = SecurityPolicyEngine::new(&SecurityPolicyConfig::default(), "net", Some(tx))
            .unwrap()
            .with_host_capacity(HostCapacity {
                available_memory_bytes: 1 << 30,
                cpus: 1,
            });
        let security = SecurityConfiguration::default().with_limits("1", "4g", "1g");
        let quota = engine.resolve_limits(None, &security).unwrap();
        assert!(quota.memory_bytes < 1 << 30);
        let message = rx.try_recv().unwrap();
        assert!(matches!(
            message.event,
            AppEvent::Security(SecurityEvent::LimitDegraded { .. })
        ));
    }
}
