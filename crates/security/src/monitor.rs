//! Per-environment activity recording

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sandcheck_errors::ViolationKind;
use sandcheck_types::{AlertSource, EnvironmentId, SecurityAlert, SecurityConfiguration};
use serde::{Deserialize, Serialize};

/// Activity records kept per environment; the oldest are dropped first
pub const MAX_ACTIVITY_RECORDS: usize = 256;

/// Something an analysis container attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Activity {
    Egress { host: String },
    PrivilegeAction { action: String },
    FilesystemWrite { path: PathBuf },
}

impl Activity {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Egress { .. } => "egress",
            Self::PrivilegeAction { .. } => "privilege-action",
            Self::FilesystemWrite { .. } => "filesystem-write",
        }
    }

    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Egress { host } => host.clone(),
            Self::PrivilegeAction { action } => action.clone(),
            Self::FilesystemWrite { path } => path.display().to_string(),
        }
    }
}

/// A recorded activity and whether it was allowed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub activity: Activity,
    pub allowed: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Policy {
    network_isolation: bool,
    allowed_hosts: BTreeSet<String>,
    writable: BTreeSet<PathBuf>,
}

#[derive(Debug, Clone)]
struct Monitored {
    policy: Policy,
    records: VecDeque<ActivityRecord>,
}

fn host_allowed(host: &str, patterns: &BTreeSet<String>) -> bool {
    let host = host.to_ascii_lowercase();
    patterns.iter().any(|pattern| {
        let pattern = pattern.to_ascii_lowercase();
        match pattern.strip_prefix("*.") {
            Some(suffix) => host.ends_with(&format!(".{suffix}")),
            None => host == pattern,
        }
    })
}

/// Activity recorder for monitored environments
#[derive(Debug, Default)]
pub struct ActivityMonitor {
    environments: DashMap<EnvironmentId, Monitored>,
}

impl ActivityMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self, environment_id: &EnvironmentId, security: &SecurityConfiguration) {
        let policy = Policy {
            network_isolation: security.network_isolation,
            allowed_hosts: security.allowed_network_access.clone(),
            writable: security.filesystem_access.writable_mounts.clone(),
        };
        self.environments.insert(
            environment_id.clone(),
            Monitored {
                policy,
                records: VecDeque::new(),
            },
        );
    }

    #[must_use]
    pub fn is_enabled(&self, environment_id: &EnvironmentId) -> bool {
        self.environments.contains_key(environment_id)
    }

    /// Record `activity`. Returns the alert to raise when it breaks policy,
    /// `None` when it was allowed or the environment is not monitored.
    pub fn record(&self, environment_id: &EnvironmentId, activity: Activity) -> Option<SecurityAlert> {
        let mut monitored = self.environments.get_mut(environment_id)?;
        let violation = match &activity {
            Activity::Egress { host } => (monitored.policy.network_isolation
                && !host_allowed(host, &monitored.policy.allowed_hosts))
            .then_some(ViolationKind::Network),
            Activity::PrivilegeAction { .. } => Some(ViolationKind::PrivilegeEscalation),
            Activity::FilesystemWrite { path } => {
                let writable = path.starts_with(Path::new("/tmp"))
                    || monitored.policy.writable.iter().any(|w| path.starts_with(w));
                (!writable).then_some(ViolationKind::Filesystem)
            }
        };
        tracing::info!(
            environment_id = %environment_id,
            activity = activity.label(),
            detail = %activity.detail(),
            allowed = violation.is_none(),
            "activity recorded"
        );
        let alert = violation.map(|kind| {
            SecurityAlert::new(
                environment_id.clone(),
                kind,
                AlertSource::ActivityMonitor,
                format!("blocked {} attempt: {}", activity.label(), activity.detail()),
            )
        });
        if monitored.records.len() == MAX_ACTIVITY_RECORDS {
            monitored.records.pop_front();
        }
        monitored.records.push_back(ActivityRecord {
            activity,
            allowed: alert.is_none(),
            at: Utc::now(),
        });
        alert
    }

    #[must_use]
    pub fn activity(&self, environment_id: &EnvironmentId) -> Vec<ActivityRecord> {
        self.environments
            .get(environment_id)
            .map(|m| m.records.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn disable(&self, environment_id: &EnvironmentId) {
        self.environments.remove(environment_id);
    }
}
