//! Security configuration supplied when an environment is requested

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Human-unit resource quotas, e.g. `cpu = "0.5"`, `memory = "512m"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimitSpec {
    pub cpu: String,
    pub memory: String,
    pub disk_space: String,
}

impl Default for ResourceLimitSpec {
    fn default() -> Self {
        Self {
            cpu: "1".to_string(),
            memory: "1g".to_string(),
            disk_space: "2g".to_string(),
        }
    }
}

/// Container paths partitioned by access mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemAccess {
    #[serde(default)]
    pub read_only_mounts: BTreeSet<PathBuf>,
    #[serde(default)]
    pub writable_mounts: BTreeSet<PathBuf>,
}

/// Isolation requirements for one environment.
///
/// Immutable once the environment exists; a recovery that needs different
/// limits produces a new configuration for a new environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfiguration {
    #[serde(default = "default_network_isolation")]
    pub network_isolation: bool,
    /// Host patterns reachable through the controlled proxy
    #[serde(default)]
    pub allowed_network_access: BTreeSet<String>,
    #[serde(default)]
    pub resource_limits: ResourceLimitSpec,
    #[serde(default)]
    pub filesystem_access: FilesystemAccess,
    #[serde(default)]
    pub security_policies: BTreeSet<String>,
}

fn default_network_isolation() -> bool {
    true
}

impl Default for SecurityConfiguration {
    fn default() -> Self {
        Self {
            network_isolation: true,
            allowed_network_access: BTreeSet::new(),
            resource_limits: ResourceLimitSpec::default(),
            filesystem_access: FilesystemAccess::default(),
            security_policies: BTreeSet::new(),
        }
    }
}

impl SecurityConfiguration {
    #[must_use]
    pub fn with_limits(
        mut self,
        cpu: impl Into<String>,
        memory: impl Into<String>,
        disk_space: impl Into<String>,
    ) -> Self {
        self.resource_limits = ResourceLimitSpec {
            cpu: cpu.into(),
            memory: memory.into(),
            disk_space: disk_space.into(),
        };
        self
    }

    #[must_use]
    pub fn allow_host(mut self, pattern: impl Into<String>) -> Self {
        self.allowed_network_access.insert(pattern.into());
        self
    }

    #[must_use]
    pub fn has_policy(&self, tag: &str) -> bool {
        self.security_policies.contains(tag)
    }
}
