#![warn(mismatched_lifetime_syntaxes)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Workflow execution engine for sandcheck
//!
//! A [`WorkflowDefinition`](sandcheck_types::WorkflowDefinition) is a
//! list of steps, some of them grouped to run concurrently, followed by
//! cleanup steps that always run. Each step names a tool; the
//! [`ToolRegistry`] resolves it to an adapter that runs inside the
//! environment's container and returns a result fragment. The
//! [`WorkflowEngine`] drives the per-step state machine, retries failing
//! steps, degrades the remaining run through the recovery manager when a
//! step fails for good, and reports progress as it goes.

pub mod catalog;
pub mod condition;
pub mod definition;
pub mod engine;
pub mod report;
pub mod tool;

pub use catalog::WorkflowCatalog;
pub use condition::{evaluate_condition, ConditionContext};
pub use definition::{
    load_definition, parse_definition, resolve_definition, validate_definition, DefinitionFormat,
};
pub use engine::{ExecutionTarget, ProgressCallback, WorkflowEngine};
pub use report::{ExecutionReport, StepRecord, StepStatus, WorkflowError, WorkflowStatus};
pub use tool::{ExecToolAdapter, ResultCategory, ToolAdapter, ToolContext, ToolRegistry};
