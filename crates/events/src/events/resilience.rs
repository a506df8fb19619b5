use serde::{Deserialize, Serialize};

/// Retry executor and circuit breaker events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResilienceEvent {
    RetryScheduled {
        operation: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    RetriesExhausted {
        operation: String,
        attempts: u32,
        error: String,
    },
    BreakerStateChanged {
        breaker: String,
        from: String,
        to: String,
    },
    BreakerRejected {
        breaker: String,
    },
}
