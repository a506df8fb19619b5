//! Analysis request configuration

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use sandcheck_errors::AssessmentError;
use serde::{Deserialize, Serialize};

/// Codebase families the catalog knows how to assess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodebaseType {
    Nodejs,
    Solidity,
    Mixed,
}

impl CodebaseType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nodejs => "nodejs",
            Self::Solidity => "solidity",
            Self::Mixed => "mixed",
        }
    }
}

impl fmt::Display for CodebaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodebaseType {
    type Err = AssessmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nodejs" => Ok(Self::Nodejs),
            "solidity" => Ok(Self::Solidity),
            "mixed" => Ok(Self::Mixed),
            other => Err(AssessmentError::configuration(format!(
                "unsupported codebase type '{other}' (expected nodejs, solidity or mixed)"
            ))
            .with_context("field", "codebaseType")),
        }
    }
}

/// What to analyze and how.
///
/// `codebase_type` stays a raw string so that an unsupported value surfaces
/// as a configuration error during environment validation rather than as a
/// deserialization failure somewhere upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfiguration {
    pub codebase_type: String,
    /// Languages declared for the codebase (lookup only, no detection)
    #[serde(default)]
    pub languages: BTreeSet<String>,
    #[serde(default)]
    pub frameworks: BTreeSet<String>,
    /// Tool identifiers the caller wants enabled; empty means all
    #[serde(default)]
    pub tools: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Free-form options consulted by `custom` step conditions
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl AnalysisConfiguration {
    pub fn new(codebase_type: impl Into<String>) -> Self {
        Self {
            codebase_type: codebase_type.into(),
            languages: BTreeSet::new(),
            frameworks: BTreeSet::new(),
            tools: BTreeSet::new(),
            timeout_ms: None,
            options: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.languages.insert(language.into());
        self
    }

    #[must_use]
    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.frameworks.insert(framework.into());
        self
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Parse the declared codebase type.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for anything other than
    /// `nodejs`, `solidity` or `mixed`.
    pub fn codebase(&self) -> Result<CodebaseType, AssessmentError> {
        self.codebase_type.parse()
    }

    /// Whether `tool` is enabled for this analysis.
    #[must_use]
    pub fn tool_enabled(&self, tool: &str) -> bool {
        self.tools.is_empty() || self.tools.contains(tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandcheck_errors::ErrorFamily;

    #[test]
    fn parses_known_codebase_types_case_insensitively() {
        assert_eq!("NodeJS".parse::<CodebaseType>().unwrap(), CodebaseType::Nodejs);
        assert_eq!(
            AnalysisConfiguration::new("solidity").codebase().unwrap(),
            CodebaseType::Solidity
        );
    }

    #[test]
    fn unknown_codebase_type_is_configuration_error() {
        let err = AnalysisConfiguration::new("cobol").codebase().unwrap_err();
        assert_eq!(err.family(), ErrorFamily::Configuration);
        assert!(!err.recoverable);
    }

    #[test]
    fn empty_tool_set_enables_everything() {
        let mut config = AnalysisConfiguration::new("nodejs");
        assert!(config.tool_enabled("eslint"));
        config.tools.insert("dependency-audit".into());
        assert!(!config.tool_enabled("eslint"));
        assert!(config.tool_enabled("dependency-audit"));
    }
}
