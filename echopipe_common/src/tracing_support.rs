//! Tracing initialization shared by the `echopipe` CLI and the
//! `echopipe-orchestrator` daemon (§4.11).

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global `tracing` subscriber from `RUST_LOG`, defaulting to
/// `info` for this crate and its binaries when the variable is unset.
pub fn initialize_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();
}
