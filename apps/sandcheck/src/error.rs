//! CLI error handling

use std::fmt;

use sandcheck_errors::AssessmentError;

/// CLI-specific error type
#[derive(Debug)]
pub enum CliError {
    /// Any error surfaced by the operations layer
    Ops(AssessmentError),
    /// Invalid command arguments
    InvalidArguments(String),
    /// I/O error while rendering output
    Io(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Ops(e) => write!(f, "{}", e.user_line()),
            CliError::InvalidArguments(msg) => write!(f, "Invalid arguments: {msg}"),
            CliError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Ops(e) => Some(e),
            CliError::Io(e) => Some(e),
            CliError::InvalidArguments(_) => None,
        }
    }
}

impl From<AssessmentError> for CliError {
    fn from(e: AssessmentError) -> Self {
        CliError::Ops(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}
