//! Docker/Podman CLI runtime
//!
//! Each operation is one invocation of the runtime binary. Failures are
//! classified from stderr: unknown objects become "not found" errors,
//! memory and quota complaints become resource errors, everything else is a
//! recoverable container error for the operation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sandcheck_errors::AssessmentError;
use sandcheck_types::ContainerHandle;
use serde::Deserialize;

use crate::client::{not_found, ContainerRuntime, RuntimeOp};
use crate::command::{CommandOutput, RuntimeCommand};
use crate::spec::{ContainerSpec, ContainerState, ContainerStatus, ExecOutput};

/// Runtime backed by the `docker` or `podman` binary
#[derive(Debug, Clone)]
pub struct CliRuntime {
    binary: String,
}

impl CliRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    #[must_use]
    pub fn docker() -> Self {
        Self::new("docker")
    }

    #[must_use]
    pub fn podman() -> Self {
        Self::new("podman")
    }

    fn command(&self) -> RuntimeCommand {
        RuntimeCommand::new(&self.binary)
    }

    /// Arguments for `create`, without the binary.
    #[must_use]
    pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
        let host = &spec.host;
        let mut cmd = RuntimeCommand::new("");
        cmd.arg("create")
            .opt("--name", &spec.name)
            .opt("--workdir", spec.working_dir.display().to_string())
            .opt("--memory", host.memory_bytes.to_string())
            .opt("--memory-swap", host.memory_bytes.to_string())
            .opt("--cpu-quota", host.cpu_quota.to_string())
            .opt("--cpu-period", host.cpu_period.to_string())
            .opt("--pids-limit", host.pids_limit.to_string())
            .opt("--network", host.network_mode.as_arg());

        for cap in &host.cap_drop {
            cmd.opt("--cap-drop", cap);
        }
        for cap in &host.cap_add {
            cmd.opt("--cap-add", cap);
        }
        if host.privileged {
            cmd.arg("--privileged");
        }
        for opt in &host.security_opts {
            cmd.opt("--security-opt", opt);
        }
        if host.read_only_rootfs {
            cmd.arg("--read-only");
        }
        for tmpfs in &host.tmpfs {
            cmd.opt("--tmpfs", tmpfs.as_arg());
        }
        for (key, value) in &spec.env {
            cmd.opt("--env", format!("{key}={value}"));
        }
        for (key, value) in &spec.labels {
            cmd.opt("--label", format!("{key}={value}"));
        }
        cmd.opt("--label", format!("sandcheck.disk-bytes={}", host.disk_bytes));
        cmd.arg(&spec.image);
        cmd.args(&spec.command);
        cmd.get_args().to_vec()
    }

    async fn run(
        &self,
        op: RuntimeOp,
        target: &str,
        build: impl FnOnce(&mut RuntimeCommand),
    ) -> Result<CommandOutput, AssessmentError> {
        let mut cmd = self.command();
        build(&mut cmd);
        let output = cmd.output(op).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(classify_failure(op, target, &output))
        }
    }
}

fn classify_failure(op: RuntimeOp, target: &str, output: &CommandOutput) -> AssessmentError {
    let stderr = output.stderr.trim();
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("no such container")
        || lower.contains("no such object")
        || lower.contains("no such network")
        || lower.contains("not found")
    {
        return not_found(op, target).with_cause(stderr);
    }
    if (lower.contains("memory")
        && (lower.contains("minimum") || lower.contains("cannot allocate")))
        || lower.contains("no space left")
        || lower.contains("quota")
    {
        return AssessmentError::resource_allocation(format!("{op} {target}: {stderr}"))
            .with_context("runtimeOp", op.as_str())
            .with_context("exitCode", output.exit_code.to_string());
    }
    AssessmentError::container(op.container_operation(), format!("{op} {target} failed: {stderr}"))
        .with_context("runtimeOp", op.as_str())
        .with_context("exitCode", output.exit_code.to_string())
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    running: bool,
    #[serde(default)]
    exit_code: Option<i64>,
}

fn parse_inspect(raw: &str) -> Result<ContainerState, AssessmentError> {
    let state: InspectState = serde_json::from_str(raw.trim()).map_err(|e| {
        AssessmentError::external_resource(format!("unreadable inspect output: {e}"))
            .with_context("runtimeOp", RuntimeOp::Inspect.as_str())
    })?;
    Ok(ContainerState {
        status: ContainerStatus::parse(&state.status),
        running: state.running,
        exit_code: state.exit_code,
    })
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    fn name(&self) -> &str {
        &self.binary
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, AssessmentError> {
        let args = Self::create_args(spec);
        let output = self
            .run(RuntimeOp::Create, &spec.name, |cmd| {
                cmd.args(&args);
            })
            .await?;
        let id = output.stdout.trim();
        if id.is_empty() {
            return Err(AssessmentError::container_creation(format!(
                "{} create returned no container id",
                self.binary
            )));
        }
        tracing::debug!(runtime = %self.binary, container = id, name = %spec.name, "container created");
        Ok(ContainerHandle::new(id))
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), AssessmentError> {
        self.run(RuntimeOp::Start, handle.as_str(), |cmd| {
            cmd.arg("start").arg(handle.as_str());
        })
        .await
        .map(drop)
    }

    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<(), AssessmentError> {
        let seconds = grace.as_secs().to_string();
        self.run(RuntimeOp::Stop, handle.as_str(), |cmd| {
            cmd.arg("stop").opt("--time", &seconds).arg(handle.as_str());
        })
        .await
        .map(drop)
    }

    async fn kill(&self, handle: &ContainerHandle) -> Result<(), AssessmentError> {
        self.run(RuntimeOp::Kill, handle.as_str(), |cmd| {
            cmd.arg("kill").arg(handle.as_str());
        })
        .await
        .map(drop)
    }

    async fn remove(&self, handle: &ContainerHandle, force: bool) -> Result<(), AssessmentError> {
        self.run(RuntimeOp::Remove, handle.as_str(), |cmd| {
            cmd.arg("rm");
            if force {
                cmd.arg("--force");
            }
            cmd.arg(handle.as_str());
        })
        .await
        .map(drop)
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerState, AssessmentError> {
        let output = self
            .run(RuntimeOp::Inspect, handle.as_str(), |cmd| {
                cmd.arg("inspect")
                    .opt("--format", "{{json .State}}")
                    .arg(handle.as_str());
            })
            .await?;
        parse_inspect(&output.stdout)
    }

    async fn exec(
        &self,
        handle: &ContainerHandle,
        argv: &[String],
    ) -> Result<ExecOutput, AssessmentError> {
        let mut cmd = self.command();
        cmd.arg("exec").arg(handle.as_str()).args(argv);
        let output = cmd.output(RuntimeOp::Exec).await?;
        // A non-zero exit from the tool itself is reported, not raised, so
        // the tool adapter can decide what it means.
        if output.exit_code == 125 || output.exit_code == 126 {
            return Err(classify_failure(RuntimeOp::Exec, handle.as_str(), &output));
        }
        Ok(ExecOutput {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn copy_in(
        &self,
        handle: &ContainerHandle,
        host_path: &Path,
        container_path: &Path,
    ) -> Result<(), AssessmentError> {
        // TODO: stream a tar through `exec -i` so copies can land on the
        // tmpfs-backed working directory of a read-only container.
        let dest = format!("{}:{}", handle.as_str(), container_path.display());
        let src = host_path.display().to_string();
        self.run(RuntimeOp::CopyIn, handle.as_str(), |cmd| {
            cmd.arg("cp").arg(&src).arg(&dest);
        })
        .await
        .map(drop)
    }

    async fn create_network(&self, name: &str, internal: bool) -> Result<String, AssessmentError> {
        self.run(RuntimeOp::CreateNetwork, name, |cmd| {
            cmd.arg("network").arg("create");
            if internal {
                cmd.arg("--internal");
            }
            cmd.opt("--label", "sandcheck.managed=true").arg(name);
        })
        .await?;
        Ok(name.to_string())
    }

    async fn remove_network(&self, name: &str) -> Result<(), AssessmentError> {
        self.run(RuntimeOp::RemoveNetwork, name, |cmd| {
            cmd.arg("network").arg("rm").arg(name);
        })
        .await
        .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::is_not_found;
    use crate::spec::{HostConstraints, NetworkMode, TmpfsMount};
    use sandcheck_errors::ErrorFamily;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "sandcheck-abc".into(),
            image: "node:20".into(),
            working_dir: PathBuf::from("/workspace"),
            env: BTreeMap::from([("CI".to_string(), "true".to_string())]),
            labels: BTreeMap::new(),
            command: vec!["sleep".into(), "infinity".into()],
            host: HostConstraints {
                memory_bytes: 536_870_912,
                cpu_quota: 50_000,
                cpu_period: 100_000,
                disk_bytes: 2_147_483_648,
                pids_limit: 256,
                network_mode: NetworkMode::None,
                cap_drop: vec!["ALL".into()],
                cap_add: vec![],
                privileged: false,
                security_opts: vec!["no-new-privileges".into()],
                read_only_rootfs: true,
                tmpfs: vec![TmpfsMount {
                    path: PathBuf::from("/tmp"),
                    options: "rw,noexec,nosuid,size=64m".into(),
                }],
            },
        }
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn create_args_encode_host_constraints() {
        let args = CliRuntime::create_args(&spec());
        assert_eq!(args[0], "create");
        assert!(has_pair(&args, "--memory", "536870912"));
        assert!(has_pair(&args, "--cpu-quota", "50000"));
        assert!(has_pair(&args, "--cpu-period", "100000"));
        assert!(has_pair(&args, "--network", "none"));
        assert!(has_pair(&args, "--cap-drop", "ALL"));
        assert!(has_pair(&args, "--security-opt", "no-new-privileges"));
        assert!(has_pair(&args, "--tmpfs", "/tmp:rw,noexec,nosuid,size=64m"));
        assert!(has_pair(&args, "--env", "CI=true"));
        assert!(args.contains(&"--read-only".to_string()));
        assert!(!args.contains(&"--privileged".to_string()));
        assert!(!args.contains(&"--cap-add".to_string()));
        // image comes right before the keep-alive command
        let image_at = args.iter().position(|a| a == "node:20").unwrap();
        assert_eq!(&args[image_at + 1..], ["sleep", "infinity"]);
    }

    #[test]
    fn stderr_classification() {
        let gone = CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "Error: No such container: abc".into(),
        };
        assert!(is_not_found(&classify_failure(RuntimeOp::Remove, "abc", &gone)));

        let oom = CommandOutput {
            exit_code: 125,
            stdout: String::new(),
            stderr: "Minimum memory limit allowed is 6MB".into(),
        };
        let err = classify_failure(RuntimeOp::Create, "abc", &oom);
        assert_eq!(err.family(), ErrorFamily::Resource);

        let other = CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "daemon unreachable".into(),
        };
        let err = classify_failure(RuntimeOp::Start, "abc", &other);
        assert_eq!(err.code(), "CONTAINER_START_FAILED");
        assert_eq!(err.context_value("exitCode"), Some("1"));
    }

    #[test]
    fn inspect_output_parses() {
        let state =
            parse_inspect(r#"{"Status":"running","Running":true,"ExitCode":0,"Pid":42}"#).unwrap();
        assert_eq!(state.status, ContainerStatus::Running);
        assert!(state.running);
        assert!(parse_inspect("not json").is_err());
    }
}
