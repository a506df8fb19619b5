//! Recovery strategies, tried in registration order

use async_trait::async_trait;
use sandcheck_errors::AssessmentError;
use sandcheck_types::{EnvironmentId, SecurityConfiguration};
use serde_json::Value;

use crate::state::RecoveryState;

/// Everything a strategy may look at
#[derive(Debug, Clone, Copy)]
pub struct RecoveryRequest<'a> {
    pub environment_id: &'a EnvironmentId,
    pub error: &'a AssessmentError,
    pub state: &'a RecoveryState,
    /// Configuration the failed operation ran with, when there is one
    pub security: Option<&'a SecurityConfiguration>,
}

/// Outcome of a recovery attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryResult {
    pub success: bool,
    /// The caller may retry or resume the failed operation
    pub should_continue: bool,
    pub strategy: Option<String>,
    pub message: String,
    pub new_state: Option<RecoveryState>,
    pub partial_results: Option<Value>,
    /// Reduced limits to use for the retried operation
    pub reduced_security: Option<SecurityConfiguration>,
}

impl RecoveryResult {
    #[must_use]
    pub fn recovered(strategy: &str, message: impl Into<String>) -> Self {
        Self {
            success: true,
            should_continue: true,
            strategy: Some(strategy.to_string()),
            message: message.into(),
            new_state: None,
            partial_results: None,
            reduced_security: None,
        }
    }

    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            should_continue: false,
            strategy: None,
            message: message.into(),
            new_state: None,
            partial_results: None,
            reduced_security: None,
        }
    }
}

/// A way of getting an environment back on its feet
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn can_recover(&self, request: &RecoveryRequest<'_>) -> bool;

    /// # Errors
    ///
    /// Returns an error when the strategy itself fails; the manager then
    /// moves on to the next strategy.
    async fn recover(&self, request: &RecoveryRequest<'_>) -> Result<RecoveryResult, AssessmentError>;
}

/// Retry a container-class failure with a fresh container
#[derive(Debug, Clone)]
pub struct ContainerRecreation {
    pub max_attempts: u32,
}

impl Default for ContainerRecreation {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

impl ContainerRecreation {
    pub const NAME: &'static str = "container-recreation";
}

#[async_trait]
impl RecoveryStrategy for ContainerRecreation {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_recover(&self, request: &RecoveryRequest<'_>) -> bool {
        request.error.kind.is_container_class()
            && request.state.strategy_attempts(Self::NAME) < self.max_attempts
    }

    async fn recover(&self, request: &RecoveryRequest<'_>) -> Result<RecoveryResult, AssessmentError> {
        tracing::info!(
            environment_id = %request.environment_id,
            code = request.error.code(),
            "recreating container"
        );
        Ok(RecoveryResult::recovered(
            Self::NAME,
            "container will be recreated",
        ))
    }
}

/// Halve memory and CPU after a resource-class failure
#[derive(Debug, Clone)]
pub struct ResourceReduction {
    pub max_attempts: u32,
}

impl Default for ResourceReduction {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl ResourceReduction {
    pub const NAME: &'static str = "resource-reduction";
}

#[async_trait]
impl RecoveryStrategy for ResourceReduction {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_recover(&self, request: &RecoveryRequest<'_>) -> bool {
        request.error.kind.is_resource_class()
            && request.security.is_some()
            && request.state.strategy_attempts(Self::NAME) < self.max_attempts
    }

    async fn recover(&self, request: &RecoveryRequest<'_>) -> Result<RecoveryResult, AssessmentError> {
        let Some(security) = request.security else {
            return Ok(RecoveryResult::rejected("no resource limits to reduce"));
        };
        let limits = &security.resource_limits;
        let (Some(memory), Some(cpu)) = (halve_quantity(&limits.memory), halve_cpu(&limits.cpu))
        else {
            return Ok(RecoveryResult::rejected(format!(
                "cannot reduce limits memory={} cpu={}",
                limits.memory, limits.cpu
            )));
        };

        tracing::info!(
            environment_id = %request.environment_id,
            from_memory = %limits.memory,
            to_memory = %memory,
            from_cpu = %limits.cpu,
            to_cpu = %cpu,
            "reducing resource limits"
        );
        let reduced = security
            .clone()
            .with_limits(cpu.clone(), memory.clone(), limits.disk_space.clone());
        let mut result = RecoveryResult::recovered(
            Self::NAME,
            format!("limits reduced to memory={memory} cpu={cpu}"),
        );
        result.reduced_security = Some(reduced);
        Ok(result)
    }
}

/// Keep going after an analysis failure when some work already finished
#[derive(Debug, Clone, Default)]
pub struct PartialContinuation;

impl PartialContinuation {
    pub const NAME: &'static str = "partial-continuation";
}

#[async_trait]
impl RecoveryStrategy for PartialContinuation {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn can_recover(&self, request: &RecoveryRequest<'_>) -> bool {
        request.error.kind.is_analysis_class() && !request.state.completed_steps.is_empty()
    }

    async fn recover(&self, request: &RecoveryRequest<'_>) -> Result<RecoveryResult, AssessmentError> {
        let mut result = RecoveryResult::recovered(
            Self::NAME,
            format!(
                "continuing with {} completed steps",
                request.state.completed_steps.len()
            ),
        );
        result.partial_results = request.state.partial_results.clone();
        Ok(result)
    }
}

const UNITS: [(char, u64); 3] = [('g', 1 << 30), ('m', 1 << 20), ('k', 1 << 10)];

/// Halve a `<digits>[kmg]` quantity, stepping down a unit when needed.
fn halve_quantity(value: &str) -> Option<String> {
    let value = value.trim().to_ascii_lowercase();
    let (digits, multiplier) = match value.chars().last()? {
        c if c.is_ascii_digit() => (value.as_str(), 1),
        c => {
            let (_, mult) = UNITS.iter().find(|(unit, _)| *unit == c)?;
            (&value[..value.len() - 1], *mult)
        }
    };
    let bytes = digits.parse::<u64>().ok()?.checked_mul(multiplier)? / 2;
    if bytes == 0 {
        return None;
    }
    for (unit, mult) in UNITS {
        if bytes % mult == 0 {
            return Some(format!("{}{unit}", bytes / mult));
        }
    }
    Some(bytes.to_string())
}

fn halve_cpu(value: &str) -> Option<String> {
    let cpus: f64 = value.trim().parse().ok()?;
    if !cpus.is_finite() || cpus <= 0.0 {
        return None;
    }
    let halved = (cpus / 2.0 * 1000.0).round() / 1000.0;
    if halved <= 0.0 {
        return None;
    }
    Some(format!("{halved}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_memory_across_units() {
        assert_eq!(halve_quantity("1g").as_deref(), Some("512m"));
        assert_eq!(halve_quantity("512M").as_deref(), Some("256m"));
        assert_eq!(halve_quantity("3k").as_deref(), Some("1536"));
        assert_eq!(halve_quantity("1").as_deref(), None);
        assert_eq!(halve_quantity("lots").as_deref(), None);
    }

    #[test]
    fn halves_cpu() {
        assert_eq!(halve_cpu("1").as_deref(), Some("0.5"));
        assert_eq!(halve_cpu("0.5").as_deref(), Some("0.25"));
        assert_eq!(halve_cpu("-1"), None);
    }

    #[tokio::test]
    async fn resource_reduction_carries_reduced_configuration() {
        let id = EnvironmentId::from("env");
        let security = SecurityConfiguration::default().with_limits("2", "2g", "4g");
        let state = RecoveryState::new(3);
        let error = AssessmentError::resource_allocation("oom");
        let request = RecoveryRequest {
            environment_id: &id,
            error: &error,
            state: &state,
            security: Some(&security),
        };
        let strategy = ResourceReduction::default();
        assert!(strategy.can_recover(&request));
        let result = strategy.recover(&request).await.unwrap();
        let reduced = result.reduced_security.unwrap();
        assert_eq!(reduced.resource_limits.memory, "1g");
        assert_eq!(reduced.resource_limits.cpu, "1");
        assert_eq!(reduced.resource_limits.disk_space, "4g");
    }

    #[test]
    fn container_recreation_is_bounded() {
        let id = EnvironmentId::from("env");
        let mut state = RecoveryState::new(5);
        let error = AssessmentError::container_start("exited 137");
        let strategy = ContainerRecreation::default();
        state.strategy_attempts.insert(ContainerRecreation::NAME.into(), 2);
        let request = RecoveryRequest {
            environment_id: &id,
            error: &error,
            state: &state,
            security: None,
        };
        assert!(!strategy.can_recover(&request));
    }

    #[test]
    fn partial_continuation_needs_completed_work() {
        let id = EnvironmentId::from("env");
        let error = AssessmentError::analysis("tool crashed");
        let mut state = RecoveryState::new(3);
        let fresh = state.clone();
        state.complete_step("dependency-audit");
        let before = RecoveryRequest {
            environment_id: &id,
            error: &error,
            state: &fresh,
            security: None,
        };
        assert!(!PartialContinuation.can_recover(&before));
        let after = RecoveryRequest {
            state: &state,
            ..before
        };
        assert!(PartialContinuation.can_recover(&after));
    }
}
