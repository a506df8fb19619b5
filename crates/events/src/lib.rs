#![warn(mismatched_lifetime_syntaxes)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Event system for async communication in sandcheck
//!
//! Library crates never print. Everything a caller may want to observe
//! (lifecycle transitions, alerts, retries, recovery decisions, workflow
//! step progress) is emitted as an [`AppEvent`] wrapped in an
//! [`EventMessage`] and sent over an unbounded channel. Sending is
//! fire-and-forget: a dropped receiver is not an error.
//!
//! ## Architecture
//!
//! - **Domain-driven events**: one enum per component, aggregated by [`AppEvent`]
//! - **Unified `EventEmitter` trait**: single API for every emission site
//! - **Tracing integration**: each event knows its log level and target

pub mod meta;
pub use meta::{EventLevel, EventMeta, EventSource};

pub mod events;
pub use events::{
    AppEvent, EnvironmentEvent, FailureContext, GeneralEvent, RecoveryEvent, ResilienceEvent,
    SecurityEvent, WorkflowEvent,
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// An event together with its emission metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub meta: EventMeta,
    pub event: AppEvent,
}

impl EventMessage {
    #[must_use]
    pub fn new(meta: EventMeta, event: AppEvent) -> Self {
        Self { meta, event }
    }

    /// Wrap an event with metadata derived from the event itself.
    #[must_use]
    pub fn from_event(event: AppEvent) -> Self {
        let level = EventLevel::from(event.log_level());
        let mut meta = EventMeta::new(level, event.event_source());
        if let Some(env) = event.environment_id() {
            meta = meta.with_environment(env);
        }
        Self { meta, event }
    }
}

/// Type alias for the event sender
pub type EventSender = UnboundedSender<EventMessage>;

/// Type alias for the event receiver
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<EventMessage>;

/// Create a new event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// The unified trait for emitting events throughout sandcheck
///
/// Implemented for the raw [`EventSender`] and for any component that holds
/// an optional sender.
pub trait EventEmitter {
    /// Get the event sender for this emitter
    fn event_sender(&self) -> Option<&EventSender>;

    /// Hook for emitters that stamp extra metadata before sending.
    fn enrich_event_meta(&self, _event: &AppEvent, _meta: &mut EventMeta) {}

    /// Emit an event with explicit metadata
    fn emit_with_meta(&self, mut meta: EventMeta, event: AppEvent) {
        if let Some(sender) = self.event_sender() {
            self.enrich_event_meta(&event, &mut meta);
            // Ignore send errors - if receiver is dropped, we just continue
            let _ = sender.send(EventMessage::new(meta, event));
        }
    }

    /// Emit an event through this emitter
    fn emit(&self, event: AppEvent) {
        if self.event_sender().is_some() {
            let EventMessage { meta, event } = EventMessage::from_event(event);
            self.emit_with_meta(meta, event);
        }
    }

    /// Emit a debug log event
    fn emit_debug(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::debug(message)));
    }

    /// Emit a warning event
    fn emit_warning(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning(message)));
    }

    /// Emit a warning event with context
    fn emit_warning_with_context(&self, message: impl Into<String>, context: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning_with_context(
            message, context,
        )));
    }

    /// Emit an error event
    fn emit_error(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::error(message)));
    }

    /// Emit an operation started event
    fn emit_operation_started(&self, operation: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::OperationStarted {
            operation: operation.into(),
        }));
    }

    /// Emit an operation completed event
    fn emit_operation_completed(&self, operation: impl Into<String>, success: bool) {
        self.emit(AppEvent::General(GeneralEvent::OperationCompleted {
            operation: operation.into(),
            success,
        }));
    }

    /// Emit an operation failed event
    fn emit_operation_failed(&self, operation: impl Into<String>, error: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::OperationFailed {
            operation: operation.into(),
            error: error.into(),
        }));
    }
}

/// Implementation of `EventEmitter` for the raw `EventSender`
impl EventEmitter for EventSender {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(self)
    }
}

impl EventEmitter for Option<EventSender> {
    fn event_sender(&self) -> Option<&EventSender> {
        self.as_ref()
    }
}
