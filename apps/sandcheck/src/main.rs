//! sandcheck - isolated security assessment of untrusted codebases
//!
//! Thin CLI over the ops crate: parses arguments, installs logging, builds
//! the operations context and renders the result.

mod cli;
mod display;
mod error;
mod logging;

use std::process;
use std::sync::Arc;

use clap::Parser;
use sandcheck_config::{Config, RuntimeBackend};
use sandcheck_events::{EventReceiver, EventSender};
use sandcheck_ops::{AssessmentRequest, OperationResult, OpsContextBuilder, OpsCtx};
use sandcheck_runtime::{CliRuntime, ContainerRuntime};
use sandcheck_types::{AnalysisConfiguration, SecurityConfiguration};
use tokio::select;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::display::OutputRenderer;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.global.json;

    init_tracing(cli.global.log_json);

    match run(cli).await {
        Ok(true) => {}
        // Some steps failed
        Ok(false) => process::exit(2),
        Err(e) => {
            error!("Application error: {}", e);
            if !json_mode {
                eprintln!("{e}");
            }
            process::exit(1);
        }
    }
}

/// Main application logic, returning whether the outcome was clean
async fn run(cli: Cli) -> Result<bool, CliError> {
    info!("Starting sandcheck v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_or_default(cli.global.config.as_deref()).await?;
    config.merge_env()?;
    config.validate()?;

    let (event_sender, event_receiver) = sandcheck_events::channel();
    let ctx = build_ops_context(event_sender, config)?;
    let renderer = OutputRenderer::new(cli.global.json);

    let result = execute_command_with_events(cli.command, ctx, event_receiver).await?;
    renderer.render_result(&result)?;

    info!("Command completed successfully");
    Ok(result.is_success())
}

/// Execute command while draining the event channel into the log
async fn execute_command_with_events(
    command: Commands,
    ctx: OpsCtx,
    mut event_receiver: EventReceiver,
) -> Result<OperationResult, CliError> {
    let mut command_future = Box::pin(execute_command(command, ctx));

    loop {
        select! {
            result = &mut command_future => {
                while let Ok(message) = event_receiver.try_recv() {
                    logging::log_event_with_tracing(&message);
                }
                return result;
            }

            message = event_receiver.recv() => {
                if let Some(message) = message {
                    logging::log_event_with_tracing(&message);
                }
            }
        }
    }
}

/// Execute the specified command
async fn execute_command(command: Commands, ctx: OpsCtx) -> Result<OperationResult, CliError> {
    match command {
        Commands::Assess {
            source,
            codebase_type,
            languages,
            frameworks,
            tools,
            workflow,
            cpu,
            memory,
            disk,
            allowed_hosts,
            timeout_ms,
            keep,
        } => {
            if !source.is_dir() {
                return Err(CliError::InvalidArguments(format!(
                    "{} is not a directory",
                    source.display()
                )));
            }
            let mut security = SecurityConfiguration::default().with_limits(cpu, memory, disk);
            for host in allowed_hosts {
                security = security.allow_host(host);
            }
            let mut analysis = AnalysisConfiguration::new(codebase_type);
            analysis.languages.extend(languages);
            analysis.frameworks.extend(frameworks);
            analysis.tools.extend(tools);
            analysis.timeout_ms = timeout_ms;

            let request = AssessmentRequest {
                source,
                security,
                analysis,
                workflow: workflow.into(),
                keep_environment: keep,
            };
            let report = sandcheck_ops::assess(&ctx, request, None).await?;
            Ok(OperationResult::Assessment(Box::new(report)))
        }

        Commands::Workflows => Ok(OperationResult::Workflows(sandcheck_ops::list_workflows(
            &ctx,
        ))),

        Commands::Validate { workflow } => {
            let info = sandcheck_ops::validate_workflow(&ctx, &workflow).await?;
            Ok(OperationResult::Workflow(info))
        }
    }
}

/// Build operations context with all required components
fn build_ops_context(event_sender: EventSender, config: Config) -> Result<OpsCtx, CliError> {
    let runtime: Arc<dyn ContainerRuntime> = match config.lifecycle.runtime {
        RuntimeBackend::Docker => Arc::new(CliRuntime::docker()),
        RuntimeBackend::Podman => Arc::new(CliRuntime::podman()),
    };
    let ctx = OpsContextBuilder::new()
        .with_runtime(runtime)
        .with_event_sender(event_sender)
        .with_config(config)
        .build()?;
    Ok(ctx)
}

/// Initialize tracing on stderr so stdout stays clean for results
fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sandcheck=debug"));
    if json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    }
}
