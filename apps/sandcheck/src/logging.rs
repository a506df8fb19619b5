//! Structured logging integration for events
//!
//! Converts domain events into tracing records. Step transitions and
//! security alerts get dedicated fields; everything else is logged with
//! its debug representation at the level the event metadata carries.

use sandcheck_events::{AppEvent, EventMessage, SecurityEvent, WorkflowEvent};
use tracing::{debug, error, info, trace, warn};

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            tracing::Level::ERROR => error!($($arg)+),
            tracing::Level::WARN => warn!($($arg)+),
            tracing::Level::INFO => info!($($arg)+),
            tracing::Level::DEBUG => debug!($($arg)+),
            tracing::Level::TRACE => trace!($($arg)+),
        }
    };
}

/// Log an event using the tracing infrastructure with structured fields
pub fn log_event_with_tracing(message: &EventMessage) {
    let event = &message.event;
    let meta = &message.meta;
    let level = meta.tracing_level();

    match event {
        AppEvent::Workflow(WorkflowEvent::StepRetrying {
            environment_id,
            step,
            attempt,
            delay_ms,
            error,
        }) => {
            warn!(
                source = meta.source.as_str(),
                correlation = ?meta.correlation_id,
                environment_id = %environment_id,
                step = %step,
                attempt,
                delay_ms,
                error = %error,
                "Step retrying"
            );
        }
        AppEvent::Workflow(WorkflowEvent::StepFailed {
            environment_id,
            step,
            attempts,
            failure,
        }) => {
            error!(
                source = meta.source.as_str(),
                correlation = ?meta.correlation_id,
                environment_id = %environment_id,
                step = %step,
                attempts,
                code = ?failure.code,
                message = %failure.message,
                "Step failed"
            );
        }
        AppEvent::Workflow(WorkflowEvent::ProgressReported {
            environment_id,
            update,
        }) => {
            info!(
                source = meta.source.as_str(),
                environment_id = %environment_id,
                stage = %update.stage,
                percent = update.percent,
                "{}",
                update.message
            );
        }
        AppEvent::Security(SecurityEvent::Alert(alert)) => {
            error!(
                source = meta.source.as_str(),
                correlation = ?meta.correlation_id,
                environment_id = %alert.environment_id,
                kind = ?alert.kind,
                alert_source = ?alert.source,
                description = %alert.description,
                "Security alert"
            );
        }
        _ => log_at!(
            level,
            target: "sandcheck::events",
            source = meta.source.as_str(),
            event_id = %meta.event_id,
            correlation = ?meta.correlation_id,
            environment_id = ?meta.environment_id,
            event = ?event,
            "Application event"
        ),
    }
}
