//! Subcommands, one module per top-level `Command` variant.

pub mod config;
pub mod metrics;
pub mod status;
