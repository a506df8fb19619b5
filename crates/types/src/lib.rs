#![warn(mismatched_lifetime_syntaxes)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for sandcheck
//!
//! This crate provides the shared data model used across the workspace:
//! environments and their configurations, workflow definitions, result
//! fragments and progress records.

pub mod analysis;
pub mod environment;
pub mod progress;
pub mod results;
pub mod security;
pub mod workflow;

pub use analysis::{AnalysisConfiguration, CodebaseType};
pub use environment::{ContainerHandle, Environment, EnvironmentId, EnvironmentStatus, MountRecord};
pub use progress::{AlertSource, ProgressUpdate, SecurityAlert};
pub use results::{AnalysisResults, ResultFragment};
pub use security::{FilesystemAccess, ResourceLimitSpec, SecurityConfiguration};
pub use workflow::{
    ConditionKind, ConditionOperator, StepCondition, WorkflowDefinition, WorkflowStep,
    ANY_CODEBASE,
};
