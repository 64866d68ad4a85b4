// src/exec/mod.rs

//! Executor layer.
//!
//! Runs task attempts isolated from the scheduler's bookkeeping and
//! reports each one back as a structured [`crate::scheduler::AttemptOutcome`]
//! via the scheduler's event channel.
//!
//! [`ExecutorBackend`] is the seam tests use to substitute a fake executor
//! for the real tokio-backed one.

pub mod executor;

pub use executor::{ExecutorBackend, TaskAttempt, TokioExecutor};
