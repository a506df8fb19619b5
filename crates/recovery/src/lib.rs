#![warn(mismatched_lifetime_syntaxes)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Recovery manager for sandcheck environments
//!
//! Keeps per-environment recovery state and a bounded checkpoint history,
//! runs an ordered chain of recovery strategies for recoverable failures,
//! plans graceful degradation of the remaining workflow steps and packages
//! finished work into partial-analysis errors when a run has to stop.

pub mod checkpoint;
pub mod degradation;
pub mod manager;
pub mod partial;
pub mod state;
pub mod strategy;

pub use checkpoint::{Checkpoint, CheckpointStore, MAX_CHECKPOINTS};
pub use degradation::{plan_degradation, DegradationPlan};
pub use manager::RecoveryManager;
pub use partial::preserve_partial_results;
pub use state::{LastError, RecoveryState};
pub use strategy::{
    ContainerRecreation, PartialContinuation, RecoveryRequest, RecoveryResult, RecoveryStrategy,
    ResourceReduction,
};
