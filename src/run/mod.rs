// src/run/mod.rs

//! Per-run state: the [`Run`] record and its [`TaskInstance`] state machine.
//!
//! - [`instance`] owns the per-task state machine and enforces its
//!   transition table.
//! - [`run`] owns the run-level record: one instance per DAG task and the
//!   derived run state.

pub mod instance;
pub mod run;

pub use instance::{ErrorDetail, ErrorKind, InstanceState, TaskInstance};
pub use run::{Run, RunId, RunState};
