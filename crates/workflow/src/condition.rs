//! Step condition evaluation

use std::collections::BTreeSet;
use std::path::{Component, Path};

use regex::Regex;
use sandcheck_errors::AssessmentError;
use sandcheck_types::{AnalysisConfiguration, ConditionKind, ConditionOperator, StepCondition};

/// What a condition may look at
#[derive(Debug, Clone, Copy)]
pub struct ConditionContext<'a> {
    pub analysis: &'a AnalysisConfiguration,
    /// Host copy of the mounted source, for `file-exists`
    pub source_root: Option<&'a Path>,
}

fn compare(operator: ConditionOperator, candidate: &str, value: &str) -> Result<bool, AssessmentError> {
    Ok(match operator {
        ConditionOperator::Equals => candidate.eq_ignore_ascii_case(value),
        ConditionOperator::Contains => candidate
            .to_ascii_lowercase()
            .contains(&value.to_ascii_lowercase()),
        ConditionOperator::Matches => pattern(value)?.is_match(candidate),
    })
}

fn pattern(value: &str) -> Result<Regex, AssessmentError> {
    Regex::new(value).map_err(|e| {
        AssessmentError::configuration(format!("invalid condition pattern '{value}'"))
            .with_context("pattern", value)
            .with_cause(e)
    })
}

fn any_matches(
    set: &BTreeSet<String>,
    operator: ConditionOperator,
    value: &str,
) -> Result<bool, AssessmentError> {
    for item in set {
        if compare(operator, item, value)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Relative paths only; anything that could leave the root is false.
fn file_exists(root: &Path, operator: ConditionOperator, value: &str) -> Result<bool, AssessmentError> {
    if operator == ConditionOperator::Equals {
        let relative = Path::new(value);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Ok(false);
        }
        return Ok(root.join(relative).exists());
    }

    let Ok(entries) = std::fs::read_dir(root) else {
        return Ok(false);
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if compare(operator, &name.to_string_lossy(), value)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// `key=expected` compares the option `key` against `expected`; a bare
/// `key` is true when the option is set to anything but `false`.
fn custom(analysis: &AnalysisConfiguration, operator: ConditionOperator, value: &str) -> Result<bool, AssessmentError> {
    match value.split_once('=') {
        Some((key, expected)) => match analysis.options.get(key.trim()) {
            Some(actual) => compare(operator, actual, expected.trim()),
            None => Ok(false),
        },
        None => Ok(analysis
            .options
            .get(value.trim())
            .is_some_and(|v| !v.eq_ignore_ascii_case("false"))),
    }
}

/// Whether `condition` holds.
///
/// # Errors
///
/// Returns a configuration error for an invalid `matches` pattern.
pub fn evaluate_condition(
    condition: &StepCondition,
    context: &ConditionContext<'_>,
) -> Result<bool, AssessmentError> {
    let value = condition.value.as_str();
    match condition.kind {
        ConditionKind::FileExists => match context.source_root {
            Some(root) => file_exists(root, condition.operator, value),
            None => Ok(false),
        },
        ConditionKind::LanguageDetected => {
            any_matches(&context.analysis.languages, condition.operator, value)
        }
        ConditionKind::FrameworkDetected => {
            any_matches(&context.analysis.frameworks, condition.operator, value)
        }
        ConditionKind::Custom => custom(context.analysis, condition.operator, value),
    }
}
