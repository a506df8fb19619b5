#![warn(mismatched_lifetime_syntaxes)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for sandcheck
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/sandcheck/config.toml)
//! - Environment variables
//! - CLI flags (applied by the binary)

mod policy;
mod tools;

pub use policy::{CircuitBreakerConfig, RetryConfig, RetryPolicyConfig};
pub use tools::{ToolCommandConfig, WorkflowConfig};

use sandcheck_errors::AssessmentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub security: SecurityPolicyConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,
}

/// Which container CLI drives the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeBackend {
    Docker,
    Podman,
}

impl RuntimeBackend {
    #[must_use]
    pub fn binary(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

impl fmt::Display for RuntimeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

impl FromStr for RuntimeBackend {
    type Err = AssessmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            other => Err(invalid_value("lifecycle.runtime", other)),
        }
    }
}

/// Environment provisioning and teardown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_runtime")]
    pub runtime: RuntimeBackend,
    /// Image every analysis container starts from
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Grace period given to `stop` before escalating to `kill`
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
    /// Extra allow-listed root for `mount_codebase` sources
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    #[serde(default = "default_network_prefix")]
    pub network_prefix: String,
}

/// Security policy tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicyConfig {
    /// Additional high-risk source patterns (regular expressions)
    #[serde(default)]
    pub extra_patterns: Vec<String>,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: u32,
    #[serde(default = "default_tmpfs_size")]
    pub tmpfs_size: String,
    /// Share of host capacity a degraded limit may take, in percent
    #[serde(default = "default_host_capacity_percent")]
    pub host_capacity_percent: u8,
    /// Hosts treated as sensitive in addition to the built-in list
    #[serde(default)]
    pub sensitive_hosts: Vec<String>,
}

/// Recovery manager limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
    #[serde(default = "default_container_recreation_attempts")]
    pub container_recreation_attempts: u32,
    #[serde(default = "default_resource_reduction_attempts")]
    pub resource_reduction_attempts: u32,
}

// Default implementations

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            image: default_image(),
            working_dir: default_working_dir(),
            stop_grace_seconds: default_stop_grace_seconds(),
            workspace_root: None,
            network_prefix: default_network_prefix(),
        }
    }
}

impl Default for SecurityPolicyConfig {
    fn default() -> Self {
        Self {
            extra_patterns: Vec::new(),
            pids_limit: default_pids_limit(),
            tmpfs_size: default_tmpfs_size(),
            host_capacity_percent: default_host_capacity_percent(),
            sensitive_hosts: Vec::new(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: default_max_recovery_attempts(),
            container_recreation_attempts: default_container_recreation_attempts(),
            resource_reduction_attempts: default_resource_reduction_attempts(),
        }
    }
}

// Default value functions for serde
fn default_runtime() -> RuntimeBackend {
    RuntimeBackend::Docker
}

fn default_image() -> String {
    "node:20-bookworm-slim".to_string()
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("/workspace")
}

fn default_stop_grace_seconds() -> u64 {
    10
}

fn default_network_prefix() -> String {
    "sandcheck-net".to_string()
}

fn default_pids_limit() -> u32 {
    256
}

fn default_tmpfs_size() -> String {
    "64m".to_string()
}

fn default_host_capacity_percent() -> u8 {
    80
}

fn default_max_recovery_attempts() -> u32 {
    3
}

fn default_container_recreation_attempts() -> u32 {
    2
}

fn default_resource_reduction_attempts() -> u32 {
    3
}

fn invalid_value(field: &str, value: &str) -> AssessmentError {
    AssessmentError::configuration(format!("invalid value '{value}' for {field}"))
        .with_context("field", field)
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, AssessmentError> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            AssessmentError::configuration("cannot determine the user config directory")
        })?;
        Ok(config_dir.join("sandcheck").join("config.toml"))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the file contents
    /// contain invalid TOML syntax that cannot be parsed.
    pub async fn load_from_file(path: &Path) -> Result<Self, AssessmentError> {
        let contents = fs::read_to_string(path).await.map_err(|e| {
            AssessmentError::configuration(format!(
                "cannot read config file {}",
                path.display()
            ))
            .with_context("path", path.display().to_string())
            .with_cause(e)
        })?;

        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub async fn load() -> Result<Self, AssessmentError> {
        let config_path = Self::default_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, AssessmentError> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), AssessmentError> {
        // SANDCHECK_IMAGE
        if let Ok(image) = std::env::var("SANDCHECK_IMAGE") {
            if image.trim().is_empty() {
                return Err(invalid_value("SANDCHECK_IMAGE", &image));
            }
            self.lifecycle.image = image;
        }

        // SANDCHECK_WORKSPACE_ROOT
        if let Ok(root) = std::env::var("SANDCHECK_WORKSPACE_ROOT") {
            let root = PathBuf::from(root);
            if !root.is_absolute() {
                return Err(invalid_value(
                    "SANDCHECK_WORKSPACE_ROOT",
                    &root.display().to_string(),
                ));
            }
            self.lifecycle.workspace_root = Some(root);
        }

        // SANDCHECK_RUNTIME
        if let Ok(runtime) = std::env::var("SANDCHECK_RUNTIME") {
            self.lifecycle.runtime = runtime
                .parse()
                .map_err(|_| invalid_value("SANDCHECK_RUNTIME", &runtime))?;
        }

        // SANDCHECK_MAX_RECOVERY_ATTEMPTS
        if let Ok(attempts) = std::env::var("SANDCHECK_MAX_RECOVERY_ATTEMPTS") {
            self.recovery.max_recovery_attempts = attempts
                .parse()
                .map_err(|_| invalid_value("SANDCHECK_MAX_RECOVERY_ATTEMPTS", &attempts))?;
        }

        // SANDCHECK_STOP_GRACE_SECONDS
        if let Ok(grace) = std::env::var("SANDCHECK_STOP_GRACE_SECONDS") {
            self.lifecycle.stop_grace_seconds = grace
                .parse()
                .map_err(|_| invalid_value("SANDCHECK_STOP_GRACE_SECONDS", &grace))?;
        }

        self.validate()
    }

    /// Check cross-field constraints the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first offending field.
    pub fn validate(&self) -> Result<(), AssessmentError> {
        if self.security.host_capacity_percent == 0 || self.security.host_capacity_percent > 100 {
            return Err(invalid_value(
                "security.host_capacity_percent",
                &self.security.host_capacity_percent.to_string(),
            ));
        }
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        Ok(())
    }

    /// Roots a mount source may resolve under: the temp dir, the configured
    /// workspace root and the process working directory.
    #[must_use]
    pub fn allowed_mount_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![std::env::temp_dir()];
        if let Some(root) = &self.lifecycle.workspace_root {
            roots.push(root.clone());
        }
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd);
        }
        roots
    }
}
