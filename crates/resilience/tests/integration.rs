//! Integration tests for the resilience crate

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sandcheck_config::RetryConfig;
use sandcheck_errors::AssessmentError;
use sandcheck_events::{AppEvent, ResilienceEvent};
use sandcheck_resilience::{
    with_retry, BreakerSettings, CircuitBreaker, CircuitBreakerRegistry, CircuitState,
    OperationClass,
};

fn fast_settings() -> BreakerSettings {
    BreakerSettings {
        failure_threshold: 2,
        cooldown: Duration::from_millis(1_000),
    }
}

#[tokio::test(start_paused = true)]
async fn breaker_walks_through_its_state_machine() {
    let breaker = CircuitBreaker::new("container-creation", fast_settings());

    for _ in 0..2 {
        let result: Result<(), AssessmentError> = breaker
            .call(|| async { Err(AssessmentError::container_creation("daemon down")) })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let calls = AtomicU32::new(0);
    let rejected: Result<(), AssessmentError> = breaker
        .call(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
    let err = rejected.unwrap_err();
    assert_eq!(err.context_value("breaker"), Some("container-creation"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    tokio::time::advance(Duration::from_millis(1_001)).await;

    // Trial fails: straight back to open.
    let trial: Result<(), AssessmentError> = breaker
        .call(|| async { Err(AssessmentError::container_creation("still down")) })
        .await;
    assert!(trial.is_err());
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(1_001)).await;

    let trial: Result<u8, AssessmentError> = breaker.call(|| async { Ok(7) }).await;
    assert_eq!(trial.unwrap(), 7);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn breaker_emits_transition_events() {
    let (tx, mut rx) = sandcheck_events::channel();
    let breaker = CircuitBreaker::new("network", fast_settings()).with_events(Some(tx));
    breaker.record_failure();
    breaker.record_failure();
    let _ = breaker.try_acquire();

    let mut transitions = Vec::new();
    let mut rejections = 0;
    while let Ok(message) = rx.try_recv() {
        match message.event {
            AppEvent::Resilience(ResilienceEvent::BreakerStateChanged { from, to, .. }) => {
                transitions.push((from, to));
            }
            AppEvent::Resilience(ResilienceEvent::BreakerRejected { .. }) => rejections += 1,
            _ => {}
        }
    }
    assert_eq!(transitions, vec![("closed".to_string(), "open".to_string())]);
    assert_eq!(rejections, 1);
}

#[tokio::test(start_paused = true)]
async fn class_policy_retries_transient_creation_failures() {
    let policy = OperationClass::ContainerCreation.policy(&RetryConfig::default());
    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();

    let outcome = with_retry("create", &policy, move |_| {
        let seen = seen.clone();
        async move {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AssessmentError::container_creation("image pull timeout"))
            } else {
                Ok("handle")
            }
        }
    })
    .await;

    assert!(outcome.success());
    assert_eq!(outcome.attempts, 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn security_violation_is_never_retried_or_counted() {
    let registry = CircuitBreakerRegistry::new(fast_settings(), None);
    let breaker = registry.get(OperationClass::ContainerCreation.as_str());
    let policy = OperationClass::ContainerCreation.policy(&RetryConfig::default());

    let outcome: sandcheck_resilience::RetryOutcome<(), AssessmentError> =
        with_retry("create", &policy, |_| {
            breaker.call(|| async { Err(AssessmentError::privilege_escalation("setuid binary")) })
        })
        .await;

    assert_eq!(outcome.attempts, 1);
    assert!(outcome.into_result().unwrap_err().is_security_violation());
    assert_eq!(breaker.failure_count(), 0);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[test]
fn registry_reports_stats_per_class() {
    let registry = CircuitBreakerRegistry::default();
    for class in OperationClass::ALL {
        registry.get(class.as_str());
    }
    registry.get("network").record_failure();
    let stats = registry.stats();
    assert_eq!(stats.len(), 4);
    let network = stats.iter().find(|s| s.name == "network").unwrap();
    assert_eq!(network.total_failures, 1);
    assert!(network.last_failure_at.is_some());
}
