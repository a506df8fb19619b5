//! Circuit breaker for flaky operation classes.
//!
//! Transitions:
//! - Closed: calls flow; `failure_threshold` consecutive failures open it
//! - Open: calls are rejected until `cooldown` has passed since the last
//!   failure; the next call then moves it to half-open
//! - Half-open: a single trial call at a time; a trial success resets the
//!   failure count and closes it, a trial failure reopens it

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sandcheck_errors::AssessmentError;
use sandcheck_events::{AppEvent, EventEmitter, EventSender, ResilienceEvent};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::retry::RetryClassify;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,

    /// Circuit is open, requests are blocked.
    Open,

    /// Circuit is testing whether the operation has recovered.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Rejection returned while the breaker is open
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker '{breaker}' is open")]
pub struct CircuitOpenError {
    pub breaker: String,
    /// Time left until a trial call is allowed
    pub retry_after: Duration,
}

impl From<CircuitOpenError> for AssessmentError {
    fn from(err: CircuitOpenError) -> Self {
        AssessmentError::external_resource(err.to_string())
            .with_context("breaker", err.breaker.clone())
            .with_context(
                "retryAfterMs",
                u64::try_from(err.retry_after.as_millis())
                    .unwrap_or(u64::MAX)
                    .to_string(),
            )
    }
}

/// Breaker thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl From<&sandcheck_config::CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &sandcheck_config::CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            cooldown: Duration::from_millis(config.cooldown_ms),
        }
    }
}

/// Point-in-time breaker statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    trial_in_flight: bool,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    total_calls: u64,
    total_failures: u64,
    rejected_calls: u64,
}

/// Circuit breaker for one named operation class
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
    events: Option<EventSender>,
}

impl EventEmitter for CircuitBreaker {
    fn event_sender(&self) -> Option<&EventSender> {
        self.events.as_ref()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                trial_in_flight: false,
                last_failure: None,
                last_failure_at: None,
                total_calls: 0,
                total_failures: 0,
                rejected_calls: 0,
            }),
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: Option<EventSender>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state. An open breaker stays open here until a call arrives.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        info!(breaker = %self.name, from = %from, to = %to, "circuit breaker transition");
        self.emit(AppEvent::Resilience(ResilienceEvent::BreakerStateChanged {
            breaker: self.name.clone(),
            from: from.to_string(),
            to: to.to_string(),
        }));
    }

    /// Ask for permission to run one call.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitOpenError`] while the breaker is open, or while a
    /// half-open trial is already in flight.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.lock();
        inner.total_calls += 1;
        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map_or(self.settings.cooldown, |at| at.elapsed());
                if elapsed >= self.settings.cooldown {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Ok(())
                } else {
                    inner.rejected_calls += 1;
                    drop(inner);
                    self.reject(self.settings.cooldown - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.rejected_calls += 1;
                    drop(inner);
                    self.reject(Duration::ZERO)
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn reject(&self, retry_after: Duration) -> Result<(), CircuitOpenError> {
        debug!(breaker = %self.name, "call rejected by open circuit");
        self.emit(AppEvent::Resilience(ResilienceEvent::BreakerRejected {
            breaker: self.name.clone(),
        }));
        Err(CircuitOpenError {
            breaker: self.name.clone(),
            retry_after,
        })
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "circuit breaker closing after successful trial");
                inner.trial_in_flight = false;
                inner.failure_count = 0;
                self.transition(&mut inner, CircuitState::Closed);
            }
            CircuitState::Open => {
                debug!(breaker = %self.name, "success recorded while circuit open");
            }
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.settings.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "circuit breaker opening due to failures"
                    );
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "circuit breaker re-opening after half-open failure");
                inner.failure_count += 1;
                inner.trial_in_flight = false;
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Give up a half-open trial slot without judging the operation.
    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// Errors that are never retried (security, configuration, validation)
    /// pass through without counting as failures.
    ///
    /// # Errors
    ///
    /// Returns the rejection converted into `E` while the breaker is open,
    /// otherwise whatever `operation` returns.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        E: RetryClassify + From<CircuitOpenError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_acquire()?;
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if err.never_retry() {
                    self.release_trial();
                } else {
                    self.record_failure();
                }
                Err(err)
            }
        }
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.trial_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed);
    }

    /// Get circuit breaker statistics.
    #[must_use]
    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
            last_failure_at: inner.last_failure_at,
        }
    }
}
