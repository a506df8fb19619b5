//! Runtime client implementations

pub mod cli;
pub mod memory;
