//! What the runtime is asked to create, and what it reports back

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How the container is attached to the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "network", rename_all = "snake_case")]
pub enum NetworkMode {
    /// No interfaces besides loopback
    None,
    /// A dedicated internal network, egress only through the controlled proxy
    Restricted(String),
    /// The runtime's default bridge
    Bridge,
}

impl NetworkMode {
    /// Value passed to `--network`.
    #[must_use]
    pub fn as_arg(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Restricted(name) => name,
            Self::Bridge => "bridge",
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Restricted(name) => write!(f, "restricted({name})"),
            Self::Bridge => f.write_str("bridge"),
        }
    }
}

/// A tmpfs mount with its mount options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmpfsMount {
    pub path: PathBuf,
    pub options: String,
}

impl TmpfsMount {
    /// `path:options` as accepted by `--tmpfs`.
    #[must_use]
    pub fn as_arg(&self) -> String {
        format!("{}:{}", self.path.display(), self.options)
    }
}

/// Kernel-enforced constraints for one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConstraints {
    pub memory_bytes: u64,
    pub cpu_quota: u64,
    pub cpu_period: u64,
    pub disk_bytes: u64,
    pub pids_limit: u32,
    pub network_mode: NetworkMode,
    pub cap_drop: Vec<String>,
    pub cap_add: Vec<String>,
    pub privileged: bool,
    pub security_opts: Vec<String>,
    pub read_only_rootfs: bool,
    pub tmpfs: Vec<TmpfsMount>,
}

impl HostConstraints {
    /// Whether the constraints drop every capability and forbid escalation.
    #[must_use]
    pub fn is_locked_down(&self) -> bool {
        !self.privileged
            && self.cap_add.is_empty()
            && self.cap_drop.iter().any(|c| c.eq_ignore_ascii_case("ALL"))
            && self.security_opts.iter().any(|o| o == "no-new-privileges")
    }
}

/// Everything `create` needs to build a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Keep-alive command; analysis runs through `exec`
    pub command: Vec<String>,
    pub host: HostConstraints,
}

/// Runtime-reported container status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "created" | "configured" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "exited" | "stopped" => Self::Exited,
            "dead" | "removing" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

/// Result of `inspect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub status: ContainerStatus,
    pub running: bool,
    #[serde(default)]
    pub exit_code: Option<i64>,
}

impl ContainerState {
    #[must_use]
    pub fn running() -> Self {
        Self {
            status: ContainerStatus::Running,
            running: true,
            exit_code: None,
        }
    }
}

/// Result of `exec`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_is_lenient() {
        assert_eq!(ContainerStatus::parse("Running"), ContainerStatus::Running);
        assert_eq!(ContainerStatus::parse("stopped"), ContainerStatus::Exited);
        assert_eq!(ContainerStatus::parse("weird"), ContainerStatus::Unknown);
    }

    #[test]
    fn network_mode_args() {
        assert_eq!(NetworkMode::None.as_arg(), "none");
        assert_eq!(NetworkMode::Restricted("net-1".into()).as_arg(), "net-1");
    }

    #[test]
    fn tmpfs_renders_options() {
        let tmpfs = TmpfsMount {
            path: PathBuf::from("/tmp"),
            options: "rw,noexec,nosuid,size=64m".into(),
        };
        assert_eq!(tmpfs.as_arg(), "/tmp:rw,noexec,nosuid,size=64m");
    }
}
