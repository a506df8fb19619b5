//! The single path every security alert takes

use dashmap::DashMap;
use sandcheck_events::{AppEvent, EventEmitter, EventSender, SecurityEvent};
use sandcheck_types::{EnvironmentId, SecurityAlert};

/// Logs, emits and remembers alerts per environment
#[derive(Debug, Default)]
pub struct AlertSink {
    history: DashMap<EnvironmentId, Vec<SecurityAlert>>,
    events: Option<EventSender>,
}

impl EventEmitter for AlertSink {
    fn event_sender(&self) -> Option<&EventSender> {
        self.events.as_ref()
    }
}

impl AlertSink {
    #[must_use]
    pub fn new(events: Option<EventSender>) -> Self {
        Self {
            history: DashMap::new(),
            events,
        }
    }

    pub fn raise(&self, alert: SecurityAlert) {
        tracing::error!(
            target: "sandcheck::security",
            environment_id = %alert.environment_id,
            kind = ?alert.kind,
            source = ?alert.source,
            description = %alert.description,
            "security alert"
        );
        self.history
            .entry(alert.environment_id.clone())
            .or_default()
            .push(alert.clone());
        self.emit(AppEvent::Security(SecurityEvent::Alert(alert)));
    }

    #[must_use]
    pub fn alerts_for(&self, environment_id: &EnvironmentId) -> Vec<SecurityAlert> {
        self.history
            .get(environment_id)
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self, environment_id: &EnvironmentId) {
        self.history.remove(environment_id);
    }
}
