//! Code shared between the `echopipe` CLI and the `echopipe-orchestrator`
//! daemon: storage backends, the bucket/file manager, the watcher, task
//! queue and worker pool, the transcription and downstream API clients, the
//! metrics collector, the control plane, and the REST types used to expose
//! all of the above over HTTP.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::derive_partial_eq_without_eq)]

pub use anyhow;
pub use chrono;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tracing;

pub mod api_client;
pub mod control_plane;
pub mod file_manager;
pub mod metrics;
pub mod models;
pub mod pause;
pub mod pipeline;
pub mod queue;
pub mod rest_api;
pub mod retry;
pub mod settings;
pub mod storage;
pub mod tracing_support;
pub mod transcription_client;
pub mod watcher;
pub mod worker_pool;

/// Common imports used by many modules.
pub mod prelude {
    pub use std::{
        collections::{HashMap, HashSet},
        fmt,
        path::{Path, PathBuf},
    };

    pub use anyhow::{format_err, Context};
    pub use chrono::{DateTime, Utc};
    pub use serde::{Deserialize, Serialize};
    pub use tracing::{
        debug, debug_span, error, error_span, info, info_span, instrument, trace,
        trace_span, warn, warn_span,
    };

    pub use super::{models::*, Error, Result};
}

/// Error type for this crate's functions.
pub use anyhow::Error;
/// Result type for this crate's functions.
pub use anyhow::Result;

/// The version of `echopipe_common` in use. Exposed so that the CLI and the
/// orchestrator can confirm they were built from the same workspace.
pub fn echopipe_common_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
