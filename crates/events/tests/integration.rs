//! Integration tests for events

use sandcheck_errors::AssessmentError;
use sandcheck_events::*;
use sandcheck_types::{AlertSource, EnvironmentId, SecurityAlert};
use sandcheck_errors::ViolationKind;
use tracing::Level;

#[tokio::test]
async fn emitted_events_carry_metadata() {
    let (tx, mut rx) = channel();

    tx.emit_warning("low disk");
    tx.emit(AppEvent::Workflow(WorkflowEvent::StepRetrying {
        environment_id: EnvironmentId::from("env-7"),
        step: "audit".into(),
        attempt: 1,
        delay_ms: 2000,
        error: "flaky".into(),
    }));

    let first = rx.recv().await.unwrap();
    assert!(matches!(
        first.event,
        AppEvent::General(GeneralEvent::Warning { .. })
    ));
    assert_eq!(first.meta.level, EventLevel::Warn);
    assert!(first.meta.correlation_id.is_none());
    assert!(first.meta.environment_id.is_none());

    let second = rx.recv().await.unwrap();
    assert_eq!(second.meta.source, EventSource::Workflow);
    assert_eq!(second.meta.environment_id.as_deref(), Some("env-7"));
    assert!(second.meta.correlation_id.is_none());
    assert_eq!(second.event.log_target(), "sandcheck::events::workflow");
}

#[tokio::test]
async fn dropped_receiver_is_ignored() {
    let (tx, rx) = channel();
    drop(rx);
    tx.emit_error("ignored");
}

#[test]
fn missing_sender_is_a_no_op() {
    let none: Option<EventSender> = None;
    none.emit_debug("nobody listening");
}

#[test]
fn security_alerts_log_at_error() {
    let alert = SecurityAlert::new(
        EnvironmentId::from("env-1"),
        ViolationKind::Filesystem,
        AlertSource::MountScan,
        "rm -rf / in install.sh",
    );
    let event = AppEvent::Security(SecurityEvent::Alert(alert));
    assert_eq!(event.log_level(), Level::ERROR);
    assert_eq!(event.environment_id(), Some("env-1"));
}

#[test]
fn failure_context_comes_from_user_facing_error() {
    let err = AssessmentError::configuration("memory must be positive");
    let failure = FailureContext::from_error(&err);
    assert_eq!(failure.code.as_deref(), Some("CONFIGURATION_ERROR"));
    assert!(!failure.retryable);
    assert!(failure.message.contains("HIGH: memory must be positive"));
}

#[test]
fn events_serialize_with_domain_tag() {
    let event = AppEvent::Environment(EnvironmentEvent::Destroyed {
        environment_id: EnvironmentId::from("env-2"),
    });
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["domain"], "environment");
    assert_eq!(json["event"]["type"], "destroyed");
}
