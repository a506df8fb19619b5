//! Progress and alert records handed to callers

use chrono::{DateTime, Utc};
use sandcheck_errors::ViolationKind;
use serde::{Deserialize, Serialize};

use crate::environment::EnvironmentId;

/// A fire-and-forget progress report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: String,
    /// Completion in percent, 0 to 100
    pub percent: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    /// Build an update; `percent` is clamped to 100.
    pub fn new(stage: impl Into<String>, percent: u8, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            percent: percent.min(100),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Percent of `done` out of `total` work units.
    #[must_use]
    pub fn percent_of(done: usize, total: usize) -> u8 {
        if total == 0 {
            return 100;
        }
        let pct = done.min(total) * 100 / total;
        u8::try_from(pct).unwrap_or(100)
    }
}

/// Where a security alert was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertSource {
    MountScan,
    ActivityMonitor,
    Lifecycle,
}

/// A detected violation for one environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAlert {
    pub environment_id: EnvironmentId,
    pub kind: ViolationKind,
    pub description: String,
    pub source: AlertSource,
    pub timestamp: DateTime<Utc>,
}

impl SecurityAlert {
    pub fn new(
        environment_id: EnvironmentId,
        kind: ViolationKind,
        source: AlertSource,
        description: impl Into<String>,
    ) -> Self {
        Self {
            environment_id,
            kind,
            description: description.into(),
            source,
            timestamp: Utc::now(),
        }
    }
}
