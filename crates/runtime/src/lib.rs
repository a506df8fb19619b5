#![warn(mismatched_lifetime_syntaxes)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Container runtime client abstraction for sandcheck
//!
//! The lifecycle manager never talks to Docker or Podman directly; it holds
//! an `Arc<dyn ContainerRuntime>`. Two implementations ship with the crate:
//! - [`CliRuntime`] drives the `docker` or `podman` binary through
//!   `tokio::process::Command`
//! - [`MemoryRuntime`] keeps containers in memory, records every call and
//!   lets tests inject failures per operation

pub mod client;
pub mod command;
pub mod implementations;
pub mod spec;

pub use client::{is_not_found, not_found, ContainerRuntime, RuntimeOp};
pub use command::{CommandOutput, RuntimeCommand};
pub use implementations::cli::CliRuntime;
pub use implementations::memory::{ExecHandler, MemoryRuntime, RuntimeCall};
pub use spec::{
    ContainerSpec, ContainerState, ContainerStatus, ExecOutput, HostConstraints, NetworkMode,
    TmpfsMount,
};
