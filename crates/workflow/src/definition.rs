//! Loading and structural validation of workflow definitions

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sandcheck_errors::AssessmentError;
use sandcheck_types::WorkflowDefinition;
use tokio::fs;

use crate::catalog::WorkflowCatalog;

/// Serialization formats a definition file may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Json,
    Yaml,
}

impl DefinitionFormat {
    /// Format implied by the file extension.
    ///
    /// # Errors
    ///
    /// Returns a validation error for anything but `.json`, `.yaml`, `.yml`.
    pub fn from_path(path: &Path) -> Result<Self, AssessmentError> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => Ok(Self::Json),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            _ => Err(AssessmentError::validation(format!(
                "workflow file {} must end in .json, .yaml or .yml",
                path.display()
            ))
            .with_context("path", path.display().to_string())),
        }
    }
}

/// Parse and validate a definition.
///
/// # Errors
///
/// Returns a validation error for malformed documents and for
/// structurally invalid workflows.
pub fn parse_definition(
    contents: &str,
    format: DefinitionFormat,
) -> Result<WorkflowDefinition, AssessmentError> {
    let definition: WorkflowDefinition = match format {
        DefinitionFormat::Json => serde_json::from_str(contents)?,
        DefinitionFormat::Yaml => serde_yml::from_str(contents)?,
    };
    validate_definition(&definition)?;
    Ok(definition)
}

/// Read a definition file, choosing the parser by extension.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub async fn load_definition(path: &Path) -> Result<WorkflowDefinition, AssessmentError> {
    let format = DefinitionFormat::from_path(path)?;
    let contents = fs::read_to_string(path).await.map_err(|e| {
        AssessmentError::validation(format!("cannot read workflow file {}", path.display()))
            .with_context("path", path.display().to_string())
            .with_cause(e)
    })?;
    let definition = parse_definition(&contents, format)
        .map_err(|e| e.with_context("path", path.display().to_string()))?;
    tracing::debug!(
        path = %path.display(),
        workflow = %definition.name,
        steps = definition.steps.len(),
        "loaded workflow definition"
    );
    Ok(definition)
}

/// Resolve `reference` as a file path, a catalog name, or a
/// `<name>.json|yaml|yml` file under `definitions_dir`, in that order.
///
/// # Errors
///
/// Returns a validation error when nothing matches, or the load error of
/// the file that did.
pub async fn resolve_definition(
    reference: &str,
    catalog: &WorkflowCatalog,
    definitions_dir: Option<&Path>,
) -> Result<WorkflowDefinition, AssessmentError> {
    let as_path = Path::new(reference);
    if fs::metadata(as_path).await.is_ok_and(|m| m.is_file()) {
        return load_definition(as_path).await;
    }
    if let Some(definition) = catalog.get(reference) {
        return Ok(definition.clone());
    }
    if let Some(dir) = definitions_dir {
        for ext in ["json", "yaml", "yml"] {
            let candidate: PathBuf = dir.join(format!("{reference}.{ext}"));
            if fs::metadata(&candidate).await.is_ok_and(|m| m.is_file()) {
                return load_definition(&candidate).await;
            }
        }
    }
    Err(
        AssessmentError::validation(format!("unknown workflow '{reference}'"))
            .with_context("workflow", reference),
    )
}

fn invalid(definition: &WorkflowDefinition, message: String) -> AssessmentError {
    AssessmentError::validation(message).with_context("workflow", definition.name.clone())
}

/// Structural checks: a name, at least one step, unique step names,
/// parallel groups that reference existing steps, and no step in more
/// than one group.
///
/// # Errors
///
/// Returns a validation error describing the first violation.
pub fn validate_definition(definition: &WorkflowDefinition) -> Result<(), AssessmentError> {
    if definition.name.trim().is_empty() {
        return Err(AssessmentError::validation("workflow name must not be empty"));
    }
    if definition.steps.is_empty() {
        return Err(invalid(
            definition,
            format!("workflow '{}' has no steps", definition.name),
        ));
    }

    let mut names = HashSet::new();
    for step in &definition.steps {
        if step.name.trim().is_empty() || step.tool.trim().is_empty() {
            return Err(invalid(
                definition,
                format!("workflow '{}' has a step without a name or tool", definition.name),
            ));
        }
        if !names.insert(step.name.as_str()) {
            return Err(invalid(
                definition,
                format!("duplicate step name '{}'", step.name),
            ));
        }
    }

    let mut grouped = HashSet::new();
    for group in &definition.parallel_groups {
        if group.is_empty() {
            return Err(invalid(definition, "empty parallel group".to_string()));
        }
        for name in group {
            if !names.contains(name.as_str()) {
                return Err(invalid(
                    definition,
                    format!("parallel group references unknown step '{name}'"),
                ));
            }
            if !grouped.insert(name.as_str()) {
                return Err(invalid(
                    definition,
                    format!("step '{name}' appears in more than one parallel group"),
                ));
            }
        }
    }

    let mut cleanup = HashSet::new();
    for step in &definition.cleanup {
        if !cleanup.insert(step.name.as_str()) {
            return Err(invalid(
                definition,
                format!("duplicate cleanup step name '{}'", step.name),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandcheck_errors::ErrorFamily;
    use sandcheck_types::WorkflowStep;

    fn two_steps() -> WorkflowDefinition {
        WorkflowDefinition::new("demo", "1.0.0")
            .for_codebases(["nodejs"])
            .step(WorkflowStep::new("lint", "eslint"))
            .step(WorkflowStep::new("audit", "dependency-audit"))
    }

    #[test]
    fn accepts_a_valid_definition() {
        validate_definition(&two_steps().parallel(["lint", "audit"])).unwrap();
    }

    #[test]
    fn rejects_unknown_group_members() {
        let err = validate_definition(&two_steps().parallel(["lint", "ghost"])).unwrap_err();
        assert_eq!(err.family(), ErrorFamily::Validation);
        assert!(err.message.contains("ghost"));
    }

    #[test]
    fn rejects_duplicate_names_and_empty_workflows() {
        let dup = two_steps().step(WorkflowStep::new("lint", "eslint"));
        assert!(validate_definition(&dup).is_err());
        assert!(validate_definition(&WorkflowDefinition::new("empty", "1")).is_err());
    }

    #[test]
    fn rejects_steps_in_two_groups() {
        let def = two_steps().parallel(["lint", "audit"]).parallel(["lint"]);
        assert!(validate_definition(&def).is_err());
    }

    #[test]
    fn parses_yaml_by_format() {
        let yaml = r"
name: yaml-flow
version: '2'
codebaseTypes: ['*']
steps:
  - name: inventory
    tool: file-inventory
    retries: 1
";
        let def = parse_definition(yaml, DefinitionFormat::Yaml).unwrap();
        assert_eq!(def.steps[0].retry_count(), 1);
        assert!(def.is_generic());
    }

    #[test]
    fn malformed_json_is_a_validation_error() {
        let err = parse_definition("{ not json", DefinitionFormat::Json).unwrap_err();
        assert_eq!(err.family(), ErrorFamily::Validation);
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            DefinitionFormat::from_path(Path::new("a/flow.YML")).unwrap(),
            DefinitionFormat::Yaml
        );
        assert!(DefinitionFormat::from_path(Path::new("flow.toml")).is_err());
    }
}
