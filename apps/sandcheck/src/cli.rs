//! Command line interface definition

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// sandcheck - assess untrusted codebases inside locked-down containers
#[derive(Parser)]
#[command(name = "sandcheck")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Assess untrusted codebases inside isolated containers")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true, env = "SANDCHECK_LOG_JSON")]
    pub log_json: bool,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH", env = "SANDCHECK_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create an environment, mount the codebase, run a workflow, destroy
    Assess {
        /// Codebase directory on the host
        source: PathBuf,

        /// Codebase type: nodejs, solidity or mixed
        #[arg(long = "type", value_name = "TYPE")]
        codebase_type: String,

        /// Declared language (repeatable)
        #[arg(long = "language", value_name = "NAME")]
        languages: Vec<String>,

        /// Declared framework (repeatable)
        #[arg(long = "framework", value_name = "NAME")]
        frameworks: Vec<String>,

        /// Enable only these tools (repeatable, default all)
        #[arg(long = "tool", value_name = "NAME")]
        tools: Vec<String>,

        /// Workflow name or definition file (default: select by type)
        #[arg(short, long)]
        workflow: Option<String>,

        /// CPU quota, e.g. 0.5
        #[arg(long, default_value = "1")]
        cpu: String,

        /// Memory limit, e.g. 512m
        #[arg(long, default_value = "1g")]
        memory: String,

        /// Disk quota, e.g. 2g
        #[arg(long, default_value = "2g")]
        disk: String,

        /// Host reachable through the egress proxy (repeatable)
        #[arg(long = "allow-host", value_name = "HOST")]
        allowed_hosts: Vec<String>,

        /// Overall analysis deadline in milliseconds
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Leave the environment running afterwards
        #[arg(long)]
        keep: bool,
    },

    /// List the available workflows
    Workflows,

    /// Load and validate a workflow definition without running it
    Validate {
        /// Definition file or workflow name
        workflow: String,
    },
}
