//! Breakers keyed by operation-class name

use std::sync::Arc;

use dashmap::DashMap;
use sandcheck_events::EventSender;

use crate::circuit_breaker::{BreakerSettings, BreakerStats, CircuitBreaker};

/// Lazily-created circuit breakers, one per operation class
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    settings: BreakerSettings,
    events: Option<EventSender>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(settings: BreakerSettings, events: Option<EventSender>) -> Self {
        Self {
            breakers: DashMap::new(),
            settings,
            events,
        }
    }

    /// The breaker for `name`, created with the registry settings on first use.
    #[must_use]
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(name, self.settings).with_events(self.events.clone()))
        });
        Arc::clone(entry.value())
    }

    /// Statistics for every breaker created so far, sorted by name.
    #[must_use]
    pub fn stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<_> = self.breakers.iter().map(|b| b.value().stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn reset_all(&self) {
        for breaker in &self.breakers {
            breaker.value().reset();
        }
    }
}
