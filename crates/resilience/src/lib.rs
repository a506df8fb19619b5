#![warn(mismatched_lifetime_syntaxes)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Resilience primitives for sandcheck
//!
//! - [`with_retry`]: bounded retry with exponential backoff and jitter,
//!   returning a structured [`RetryOutcome`]
//! - [`CircuitBreaker`]: closed/open/half-open guard per operation class
//! - [`CircuitBreakerRegistry`]: breakers keyed by operation-class name
//! - [`policies`]: predefined retry policies per operation class
//!
//! Errors that report [`RetryClassify::never_retry`] short-circuit every
//! path here: they are returned on the first attempt and do not count
//! against a breaker.

pub mod circuit_breaker;
pub mod policies;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{BreakerSettings, BreakerStats, CircuitBreaker, CircuitOpenError, CircuitState};
pub use policies::OperationClass;
pub use registry::CircuitBreakerRegistry;
pub use retry::{with_retry, RetryClassify, RetryOutcome, RetryPolicy};
