// src/logging.rs

//! Logging setup for `dagrun` using `tracing` + `tracing-subscriber`.
//!
//! The crate itself only emits `tracing` events; embedding applications
//! usually install their own subscriber. This helper exists for binaries
//! and demos that want a sensible default:
//! 1. `DAGRUN_LOG` environment variable (e.g. "info", "dagrun=debug")
//! 2. default to `info`

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise a global logging subscriber.
///
/// Safe to call once at startup; calling it again panics inside
/// `tracing-subscriber`, so embedders with their own subscriber should
/// skip it.
pub fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_env("DAGRUN_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    Ok(())
}
