//! Retry executor with exponential backoff

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use sandcheck_errors::AssessmentError;
use tokio::time::Instant;

/// Errors the retry executor and breakers can classify.
pub trait RetryClassify {
    /// Never retried, never passed to a breaker or a recovery strategy.
    fn never_retry(&self) -> bool;
}

impl RetryClassify for AssessmentError {
    fn never_retry(&self) -> bool {
        self.is_fail_fast() || !self.recoverable
    }
}

type RetryCondition<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type RetryHook<E> = Arc<dyn Fn(&E, u32, Duration) + Send + Sync>;

/// Backoff parameters and hooks for [`with_retry`]
pub struct RetryPolicy<E> {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: Duration,
    retry_condition: Option<RetryCondition<E>>,
    on_retry: Option<RetryHook<E>>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
            jitter: self.jitter,
            retry_condition: self.retry_condition.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .field("has_condition", &self.retry_condition.is_some())
            .finish_non_exhaustive()
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl<E> RetryPolicy<E> {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter: Duration::ZERO,
            retry_condition: None,
            on_retry: None,
        }
    }

    /// A policy that runs the operation exactly once.
    #[must_use]
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Only errors matching `condition` are retried. Without one every
    /// retryable error is.
    #[must_use]
    pub fn retry_if<F>(mut self, condition: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Some(Arc::new(condition));
        self
    }

    /// Called with `(error, attempt, delay)` before each wait.
    #[must_use]
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&E, u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    #[must_use]
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        // Precision loss acceptable for backoff calculations
        #[allow(clippy::cast_precision_loss)]
        let base = self.base_delay.as_millis().min(u128::from(u64::MAX)) as f64;
        #[allow(clippy::cast_precision_loss)]
        let max = self.max_delay.as_millis().min(u128::from(u64::MAX)) as f64;
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay = (base * self.multiplier.powi(exponent)).min(max);
        // Safe cast: max(0.0) ensures non-negative, round() handles fractional part
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = delay.max(0.0).round() as u64;
        Duration::from_millis(millis)
    }

    /// Delay before retry number `attempt`, with uniform jitter in `[0, jitter]`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }

    fn should_retry(&self, error: &E) -> bool
    where
        E: RetryClassify,
    {
        if error.never_retry() {
            return false;
        }
        self.retry_condition
            .as_ref()
            .is_none_or(|condition| condition(error))
    }
}

/// Structured result of [`with_retry`]
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    pub total_duration: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    #[must_use]
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    #[must_use]
    pub fn total_duration_ms(&self) -> u64 {
        u64::try_from(self.total_duration.as_millis()).unwrap_or(u64::MAX)
    }

    /// Discard the bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns the last error when every attempt failed.
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Run `operation` until it succeeds, a non-retryable error occurs, or
/// `policy.max_attempts` is reached.
pub async fn with_retry<T, E, F, Fut>(
    label: &str,
    policy: &RetryPolicy<E>,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    E: RetryClassify + fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation = label, attempts = attempt, "succeeded after retry");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    total_duration: start.elapsed(),
                };
            }
            Err(err) => {
                if attempt >= policy.max_attempts || !policy.should_retry(&err) {
                    if attempt >= policy.max_attempts && policy.max_attempts > 1 {
                        tracing::warn!(operation = label, attempts = attempt, error = %err, "retries exhausted");
                    }
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                        total_duration: start.elapsed(),
                    };
                }
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    operation = label,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "operation failed, retrying"
                );
                if let Some(hook) = &policy.on_retry {
                    hook(&err, attempt, delay);
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
