#![warn(mismatched_lifetime_syntaxes)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Security policy engine for sandcheck
//!
//! Turns a [`SecurityConfiguration`](sandcheck_types::SecurityConfiguration)
//! into runtime host constraints, validates mounts, scans untrusted sources
//! for high-risk patterns and records per-environment activity. Every
//! violation, whatever detected it, goes out through the same alert path.

pub mod alert;
pub mod engine;
pub mod filesystem;
pub mod limits;
pub mod monitor;
pub mod network;
pub mod scanner;

pub use alert::AlertSink;
pub use engine::{ContainerTemplate, SecurityPolicyEngine, ENVIRONMENT_LABEL};
pub use filesystem::{
    default_tmpfs, is_sensitive_container_path, resolve_mount_source, validate_container_path,
    validate_filesystem_access, SENSITIVE_CONTAINER_PATHS,
};
pub use limits::{
    fit_to_host, parse_cpu, parse_quantity, translate_limits, HostCapacity, LimitDegradation,
    ResourceQuota, CPU_PERIOD_US,
};
pub use monitor::{Activity, ActivityMonitor, ActivityRecord, MAX_ACTIVITY_RECORDS};
pub use network::{plan_network, validate_host, NetworkPlan};
pub use scanner::{ScanFinding, ScanReport, SourceScanner};
