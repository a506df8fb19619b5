#![warn(mismatched_lifetime_syntaxes)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Container lifecycle management for sandcheck
//!
//! The [`LifecycleManager`] owns every active [`Environment`](sandcheck_types::Environment):
//! it provisions containers through the resilience layer, places untrusted
//! source into them after a policy scan, and tears them down again. All
//! per-environment state held by other components (recovery state,
//! checkpoints, monitoring) is keyed by the environment id and released
//! here.

mod manager;
mod mount;
mod registry;
mod teardown;
mod validation;

pub use manager::{LifecycleBuilder, LifecycleManager};
pub use registry::EnvironmentRegistry;
pub use validation::{validate_request, ValidatedRequest};
