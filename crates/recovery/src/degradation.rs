//! Graceful degradation of the steps left after a failure

use sandcheck_errors::AssessmentError;
use sandcheck_types::WorkflowStep;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::RecoveryState;

/// Steps above this timeout get it halved
pub const LONG_STEP_TIMEOUT_MS: u64 = 300_000;
/// Lower bound for a halved timeout
pub const MIN_DEGRADED_TIMEOUT_MS: u64 = 60_000;

const OPTIONAL_TOOLS: &[&str] = &["gas-report", "coverage", "documentation", "file-inventory"];
const OPTIONAL_NAME_MARKERS: &[&str] = &["optional", "enhancement", "optimization"];

/// Resource flags and the highest value a degraded run may pass
const RESOURCE_FLAGS: &[(&str, u64)] = &[
    ("--max-old-space-size", 2048),
    ("--maxWorkers", 2),
    ("--max-workers", 2),
    ("--workers", 2),
    ("--jobs", 2),
    ("--parallel", 2),
];

/// What to do with each remaining step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradationPlan {
    pub skipped_steps: Vec<String>,
    pub modified_steps: Vec<String>,
    pub unchanged_steps: Vec<String>,
    /// Remaining steps to run, in order, with modifications applied
    pub steps: Vec<WorkflowStep>,
    pub can_continue: bool,
    pub rationale: String,
}

impl DegradationPlan {
    #[must_use]
    pub fn total(&self) -> usize {
        self.skipped_steps.len() + self.modified_steps.len() + self.unchanged_steps.len()
    }
}

fn is_skippable(step: &WorkflowStep) -> bool {
    let name = step.name.to_ascii_lowercase();
    step.continue_on_error
        || OPTIONAL_TOOLS.contains(&step.tool.as_str())
        || step.config.get("optional").and_then(Value::as_bool) == Some(true)
        || OPTIONAL_NAME_MARKERS.iter().any(|m| name.contains(m))
}

fn cap_resource_arg(arg: &str) -> Option<String> {
    let (flag, value) = arg.split_once('=')?;
    let (_, cap) = RESOURCE_FLAGS.iter().find(|(f, _)| *f == flag)?;
    let requested: u64 = value.parse().ok()?;
    (requested > *cap).then(|| format!("{flag}={cap}"))
}

/// Degraded copy of `step`, or `None` when nothing needs changing.
fn degrade(step: &WorkflowStep) -> Option<WorkflowStep> {
    let long_timeout = step.timeout_ms.filter(|t| *t > LONG_STEP_TIMEOUT_MS);
    let args = step.args();
    let capped: Vec<Option<String>> = args.iter().map(|a| cap_resource_arg(a)).collect();
    let resource_sensitive = capped.iter().any(Option::is_some);
    if long_timeout.is_none() && !resource_sensitive {
        return None;
    }

    let mut degraded = step.clone();
    if let Some(timeout) = long_timeout {
        degraded.timeout_ms = Some((timeout / 2).max(MIN_DEGRADED_TIMEOUT_MS));
    }
    if resource_sensitive {
        let args: Vec<Value> = args
            .into_iter()
            .zip(capped)
            .map(|(original, capped)| Value::String(capped.unwrap_or(original)))
            .collect();
        degraded.config.insert("args".to_string(), Value::Array(args));
    }
    degraded.continue_on_error = true;
    Some(degraded)
}

/// Classify `remaining` steps after `error` into skipped, modified and
/// unchanged.
#[must_use]
pub fn plan_degradation(
    error: &AssessmentError,
    state: &RecoveryState,
    remaining: &[WorkflowStep],
) -> DegradationPlan {
    let mut plan = DegradationPlan {
        skipped_steps: Vec::new(),
        modified_steps: Vec::new(),
        unchanged_steps: Vec::new(),
        steps: Vec::new(),
        can_continue: false,
        rationale: String::new(),
    };

    for step in remaining {
        if is_skippable(step) {
            plan.skipped_steps.push(step.name.clone());
        } else if let Some(degraded) = degrade(step) {
            plan.modified_steps.push(step.name.clone());
            plan.steps.push(degraded);
        } else {
            plan.unchanged_steps.push(step.name.clone());
            plan.steps.push(step.clone());
        }
    }

    let total = remaining.len();
    let skipped = plan.skipped_steps.len();
    let degradable = error.recoverable && !error.is_fail_fast();
    plan.can_continue = degradable && skipped < total;
    plan.rationale = format!(
        "{} failure after {} completed steps: {} of {} remaining steps skipped, {} modified, {} unchanged",
        error.family().as_str(),
        state.completed_steps.len(),
        skipped,
        total,
        plan.modified_steps.len(),
        plan.unchanged_steps.len(),
    );
    if error.is_security_violation() {
        plan.rationale.push_str("; security violations never degrade");
    } else if !degradable {
        plan.rationale.push_str("; non-recoverable errors never degrade");
    }
    plan
}
