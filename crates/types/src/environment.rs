//! Environment identity and lifecycle records

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::AnalysisConfiguration;
use crate::security::SecurityConfiguration;

/// Unique identifier of an assessment environment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentId(String);

impl EnvironmentId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("sandcheck-{}", Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EnvironmentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EnvironmentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque reference to a container owned by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentStatus {
    Creating,
    Ready,
    Running,
    Failed,
    Stopped,
}

impl fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Creating => "creating",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Where untrusted source was placed inside an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountRecord {
    /// Canonical host path the source was copied from
    pub source: PathBuf,
    /// Destination inside the container
    pub container_path: PathBuf,
    pub mounted_at: DateTime<Utc>,
    pub files_scanned: usize,
}

/// One isolated, disposable sandbox hosting a single assessment run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: EnvironmentId,
    pub status: EnvironmentStatus,
    pub security_config: SecurityConfiguration,
    pub analysis_config: AnalysisConfiguration,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerHandle>,
    /// Dedicated restricted network, released on destroy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount: Option<MountRecord>,
}

impl Environment {
    /// A new environment record in the `creating` state.
    #[must_use]
    pub fn creating(
        id: EnvironmentId,
        security_config: SecurityConfiguration,
        analysis_config: AnalysisConfiguration,
    ) -> Self {
        Self {
            id,
            status: EnvironmentStatus::Creating,
            security_config,
            analysis_config,
            created_at: Utc::now(),
            container: None,
            network: None,
            mount: None,
        }
    }

    /// Whether work can be scheduled into this environment.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(
            self.status,
            EnvironmentStatus::Ready | EnvironmentStatus::Running
        ) && self.container.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = EnvironmentId::generate();
        let b = EnvironmentId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("sandcheck-"));
    }

    #[test]
    fn creating_environment_is_not_usable() {
        let env = Environment::creating(
            EnvironmentId::from("env-a"),
            SecurityConfiguration::default(),
            AnalysisConfiguration::new("nodejs"),
        );
        assert_eq!(env.status, EnvironmentStatus::Creating);
        assert!(!env.is_usable());
        assert_eq!(env.status.to_string(), "creating");
    }
}
