// src/scheduler/mod.rs

//! The scheduler: ready-set computation and run driving.
//!
//! Split the same way as the rest of the crate's control logic:
//! - [`core`] is a pure, synchronous state machine over one [`crate::run::Run`].
//!   It consumes [`SchedulerEvent`]s and produces [`Command`]s plus
//!   transition events, with no channels, timers, or IO. It is the single
//!   writer of instance state.
//! - [`runtime`] is the async shell: an event loop that feeds the core,
//!   dispatches attempts to an executor backend, arms retry timers, and
//!   persists state through the store.

use std::time::Duration;

use serde_json::Value;

use crate::dag::TaskName;
use crate::observe::TransitionEvent;
use crate::run::{ErrorKind, RunState};

pub mod core;
pub mod runtime;

pub use self::core::SchedulerCore;
pub use self::runtime::{CancelHandle, RunDriver};

/// Structured result of one executor attempt.
///
/// The executor never raises past its boundary: every attempt ends in
/// exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success { payload: Value },
    Failed { kind: ErrorKind, message: String },
}

/// Events flowing into the scheduler loop from executors, retry timers,
/// and cancellation handles.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// An executor attempt finished with a concrete outcome.
    AttemptFinished {
        task: TaskName,
        outcome: AttemptOutcome,
    },
    /// A retry backoff elapsed; the instance may re-enter the ready set.
    RetryDue { task: TaskName },
    /// Cooperative cancellation of the whole run was requested.
    CancelRequested,
}

/// Instructions from the core to the async shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Dispatch one attempt of a task to the executor.
    Dispatch { task: TaskName, attempt: u32 },
    /// Arm a timer; send [`SchedulerEvent::RetryDue`] after `delay`.
    ScheduleRetry { task: TaskName, delay: Duration },
    /// The run reached a terminal state; the loop may stop.
    Finished(RunState),
}

/// Output of one core step: commands for the shell plus the transition
/// events recorded while applying the step.
#[derive(Debug, Default)]
pub struct CoreStep {
    pub commands: Vec<Command>,
    pub transitions: Vec<TransitionEvent>,
}
