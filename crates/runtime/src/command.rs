//! Runtime CLI command builder and execution

use std::time::Instant;

use sandcheck_errors::AssessmentError;
use tokio::process::Command;

use crate::client::RuntimeOp;

/// A runtime CLI invocation
#[derive(Debug, Clone)]
pub struct RuntimeCommand {
    program: String,
    args: Vec<String>,
}

impl RuntimeCommand {
    /// Create a new command
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    /// Add an argument to the command
    pub fn arg<S: AsRef<str>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments to the command
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add `flag value` as two arguments
    pub fn opt<S: AsRef<str>>(&mut self, flag: &str, value: S) -> &mut Self {
        self.arg(flag).arg(value)
    }

    /// Get the program name
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the arguments
    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Run to completion and capture output.
    ///
    /// A non-zero exit is not an error here; callers classify stderr.
    ///
    /// # Errors
    ///
    /// Returns a container error when the binary cannot be spawned.
    pub async fn output(&self, op: RuntimeOp) -> Result<CommandOutput, AssessmentError> {
        let start = Instant::now();
        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                AssessmentError::container(
                    op.container_operation(),
                    format!("failed to run {}: {e}", self.program),
                )
                .with_context("runtimeOp", op.as_str())
                .with_cause(e)
            })?;

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::trace!(
            program = %self.program,
            op = op.as_str(),
            exit_code = result.exit_code,
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "runtime command finished"
        );
        Ok(result)
    }
}

/// Output from command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_arguments_in_order() {
        let mut cmd = RuntimeCommand::new("docker");
        cmd.arg("create").opt("--network", "none").args(["img", "sleep"]);
        assert_eq!(cmd.program(), "docker");
        assert_eq!(
            cmd.get_args(),
            ["create", "--network", "none", "img", "sleep"]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_container_error() {
        let cmd = RuntimeCommand::new("/nonexistent/sandcheck-runtime");
        let err = cmd.output(RuntimeOp::Start).await.unwrap_err();
        assert_eq!(err.context_value("runtimeOp"), Some("start"));
        assert!(err.recoverable);
    }
}
