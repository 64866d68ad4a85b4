// src/context.rs

//! Execution context handed to task bodies.
//!
//! This is the explicit, typed replacement for the "bag of kwargs" pattern:
//! everything a task body may observe about its run is an enumerated field
//! here, and nothing else is shared between task bodies.

use std::collections::BTreeMap;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::dag::TaskName;
use crate::run::RunId;

/// Context passed to a [`crate::dag::TaskHandler`] for one attempt.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Id of the run this attempt belongs to.
    pub run_id: RunId,
    /// Name of the DAG being executed.
    pub dag_name: String,
    /// Opaque trigger key the run was started with.
    pub trigger_key: String,
    /// Name of the task being executed.
    pub task: TaskName,
    /// Attempt number, 1-based.
    pub attempt: u32,
    /// Result payloads of all succeeded upstream tasks, keyed by task name.
    pub upstream_results: BTreeMap<TaskName, Value>,
    /// Cooperative cancellation signal for the run. Long-running task bodies
    /// should poll or await this and stop early when it fires.
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    /// Result payload of a single upstream task, if it succeeded with one.
    pub fn upstream_result(&self, task: &str) -> Option<&Value> {
        self.upstream_results.get(task)
    }

    /// True when cancellation of the run has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
