//! Synchronous request validation done before anything is provisioned

use sandcheck_errors::AssessmentError;
use sandcheck_security::{ResourceQuota, SecurityPolicyEngine};
use sandcheck_types::{AnalysisConfiguration, CodebaseType, SecurityConfiguration};

/// A creation request that passed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub codebase: CodebaseType,
    pub quota: ResourceQuota,
}

/// Check the codebase type and the security configuration.
///
/// Every failure is a non-recoverable configuration error (or a security
/// violation for sensitive targets), so the caller never retries it.
///
/// # Errors
///
/// Returns the first problem found.
pub fn validate_request(
    engine: &SecurityPolicyEngine,
    security: &SecurityConfiguration,
    analysis: &AnalysisConfiguration,
) -> Result<ValidatedRequest, AssessmentError> {
    let codebase = analysis.codebase()?;
    let quota = engine.validate(security)?;
    Ok(ValidatedRequest { codebase, quota })
}
