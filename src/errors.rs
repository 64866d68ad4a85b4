// src/errors.rs

//! Crate-wide error types.
//!
//! Build-time errors ([`DagError`]) are fatal to DAG construction: a failed
//! build never yields a partial DAG. Execution-time errors are contained
//! per task instance and drive the retry/failure state machine; they never
//! escape the scheduler loop. [`TransitionError`] is an internal invariant
//! violation and is reported, not swallowed.

use thiserror::Error;

// The async wiring layer (runner, executor backends) still uses `anyhow`
// for its Results, alongside the structured enums below.
pub use anyhow::{Error, Result};

/// Errors raised while building a [`crate::dag::Dag`].
#[derive(Debug, Error)]
pub enum DagError {
    /// The same task name was added twice.
    #[error("duplicate task '{0}' in DAG")]
    DuplicateTask(String),

    /// An edge references a task name that was never added.
    #[error("edge {from} -> {to} references unknown task '{unknown}'")]
    UnknownTask {
        from: String,
        to: String,
        unknown: String,
    },

    /// A task depends on itself.
    #[error("task '{0}' cannot depend on itself")]
    SelfDependency(String),

    /// The dependency edges form a cycle.
    #[error("cycle detected in DAG involving task '{task}'")]
    Cycle { task: String },

    /// A DAG with no tasks is not schedulable.
    #[error("DAG '{0}' must contain at least one task")]
    Empty(String),

    /// A DAG with this name is already registered.
    #[error("a DAG named '{0}' is already registered")]
    DuplicateDag(String),
}

/// An illegal state-machine transition was attempted.
///
/// Terminal states are final; any attempt to move out of one is a logic
/// error in the caller, never an expected runtime outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("illegal state transition for '{subject}': {from} -> {to}")]
pub struct TransitionError {
    /// Task name, or the run id for run-level transitions.
    pub subject: String,
    pub from: String,
    pub to: String,
}

/// Failure returned by a task body.
///
/// This is the only error type task handlers produce; everything the
/// executor captures (timeouts, panics, cancellation) is folded into the
/// same structured shape before it reaches the scheduler.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors from a [`crate::store::StateStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run '{0}' not found in store")]
    RunNotFound(String),

    #[error("storage error: {0}")]
    Backend(String),
}

/// Errors surfaced by the trigger entry point ([`crate::runner::Runner`]).
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("unknown DAG '{0}'")]
    UnknownDag(String),

    #[error("run '{0}' does not exist; trigger it before requesting a re-run")]
    UnknownRun(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("executor error: {0}")]
    Executor(String),
}
