//! Emission metadata attached to every event

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Level;
use uuid::Uuid;

/// Metadata stamped on an event when it is emitted.
///
/// `environment_id` is taken from the event itself; `correlation_id` is
/// filled in by the emitter and ties together everything one operation
/// (an assessment, a mount, a workflow run) produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub event_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub source: EventSource,
}

impl EventMeta {
    #[must_use]
    pub fn new(level: impl Into<EventLevel>, source: EventSource) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            correlation_id: None,
            environment_id: None,
            timestamp: Utc::now(),
            level: level.into(),
            source,
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment_id: impl Into<String>) -> Self {
        self.environment_id = Some(environment_id.into());
        self
    }

    /// Set the correlation id unless one is already present.
    pub fn correlate(&mut self, correlation_id: Option<String>) {
        if self.correlation_id.is_none() {
            self.correlation_id = correlation_id;
        }
    }

    #[must_use]
    pub fn tracing_level(&self) -> Level {
        self.level.into()
    }
}

/// Severity used to route events to the log
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<EventLevel> for Level {
    fn from(level: EventLevel) -> Self {
        match level {
            EventLevel::Trace => Level::TRACE,
            EventLevel::Debug => Level::DEBUG,
            EventLevel::Info => Level::INFO,
            EventLevel::Warn => Level::WARN,
            EventLevel::Error => Level::ERROR,
        }
    }
}

impl From<Level> for EventLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::TRACE => EventLevel::Trace,
            Level::DEBUG => EventLevel::Debug,
            Level::INFO => EventLevel::Info,
            Level::WARN => EventLevel::Warn,
            Level::ERROR => EventLevel::Error,
        }
    }
}

/// Component an event came from
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    General,
    Environment,
    Security,
    Resilience,
    Recovery,
    Workflow,
}

impl EventSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Environment => "environment",
            Self::Security => "security",
            Self::Resilience => "resilience",
            Self::Recovery => "recovery",
            Self::Workflow => "workflow",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
