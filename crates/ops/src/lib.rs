#![warn(mismatched_lifetime_syntaxes)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! High-level operations for sandcheck
//!
//! This crate is the layer between the CLI and the component crates. Each
//! operation takes an [`OpsCtx`] built once per process and tags the
//! events it emits with a correlation id.

mod assess;
mod context;
mod environment;
mod types;
mod workflow;

pub use assess::assess;
pub use context::{CorrelationGuard, OpsContextBuilder, OpsCtx};
pub use environment::{
    create_environment, destroy_environment, get_checkpoints, get_environment_status,
    list_environments, mount_codebase, stop_environment,
};
pub use types::{
    AssessmentReport, AssessmentRequest, OperationResult, WorkflowInfo, WorkflowSelection,
};
pub use workflow::{execute_workflow, list_workflows, select_workflow, validate_workflow};
