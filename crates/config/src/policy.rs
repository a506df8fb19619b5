//! Retry and circuit breaker tuning

use sandcheck_errors::AssessmentError;
use serde::{Deserialize, Serialize};

/// Backoff parameters for one operation class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub jitter_ms: u64,
}

fn default_multiplier() -> f64 {
    2.0
}

impl RetryPolicyConfig {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            multiplier: default_multiplier(),
            jitter_ms,
        }
    }

    fn validate(&self, class: &str) -> Result<(), AssessmentError> {
        if self.max_attempts == 0 {
            return Err(AssessmentError::configuration(format!(
                "retry.{class}.max_attempts must be at least 1"
            ))
            .with_context("field", format!("retry.{class}.max_attempts")));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(AssessmentError::configuration(format!(
                "retry.{class}.multiplier must be a finite number >= 1"
            ))
            .with_context("field", format!("retry.{class}.multiplier")));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(AssessmentError::configuration(format!(
                "retry.{class}.max_delay_ms is below base_delay_ms"
            ))
            .with_context("field", format!("retry.{class}.max_delay_ms")));
        }
        Ok(())
    }
}

/// Retry policies per operation class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_container_creation")]
    pub container_creation: RetryPolicyConfig,
    #[serde(default = "default_resource_allocation")]
    pub resource_allocation: RetryPolicyConfig,
    #[serde(default = "default_network")]
    pub network: RetryPolicyConfig,
    #[serde(default = "default_analysis_execution")]
    pub analysis_execution: RetryPolicyConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            container_creation: default_container_creation(),
            resource_allocation: default_resource_allocation(),
            network: default_network(),
            analysis_execution: default_analysis_execution(),
        }
    }
}

fn default_container_creation() -> RetryPolicyConfig {
    RetryPolicyConfig::new(3, 1_000, 10_000, 500)
}

fn default_resource_allocation() -> RetryPolicyConfig {
    RetryPolicyConfig::new(2, 2_000, 8_000, 250)
}

fn default_network() -> RetryPolicyConfig {
    RetryPolicyConfig::new(5, 500, 8_000, 250)
}

fn default_analysis_execution() -> RetryPolicyConfig {
    RetryPolicyConfig::new(2, 1_000, 5_000, 0)
}

impl RetryConfig {
    pub(crate) fn validate(&self) -> Result<(), AssessmentError> {
        self.container_creation.validate("container_creation")?;
        self.resource_allocation.validate("resource_allocation")?;
        self.network.validate("network")?;
        self.analysis_execution.validate("analysis_execution")
    }
}

/// Circuit breaker thresholds, shared by every operation class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    60_000
}

impl CircuitBreakerConfig {
    pub(crate) fn validate(&self) -> Result<(), AssessmentError> {
        if self.failure_threshold == 0 {
            return Err(AssessmentError::configuration(
                "circuit_breaker.failure_threshold must be at least 1",
            )
            .with_context("field", "circuit_breaker"));
        }
        Ok(())
    }
}
