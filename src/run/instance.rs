// src/run/instance.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dag::TaskName;
use crate::errors::TransitionError;

/// State of one task instance within one run.
///
/// ```text
/// pending -> running -> { succeeded | up_for_retry | failed }
/// up_for_retry -> pending          (after backoff)
/// pending -> upstream_failed       (ancestor failed, never dispatched)
/// pending | up_for_retry -> cancelled
/// running -> cancelled             (forced after the grace period)
/// ```
///
/// Terminal states (`succeeded`, `failed`, `upstream_failed`, `cancelled`)
/// are final; leaving one is a [`TransitionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Running,
    Succeeded,
    UpForRetry,
    Failed,
    UpstreamFailed,
    Cancelled,
}

impl InstanceState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::UpstreamFailed | Self::Cancelled
        )
    }

    /// The transition table described above.
    fn can_transition_to(self, to: Self) -> bool {
        use InstanceState::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, UpstreamFailed)
                | (Pending, Cancelled)
                | (Running, Succeeded)
                | (Running, UpForRetry)
                | (Running, Failed)
                | (Running, Cancelled)
                | (UpForRetry, Pending)
                | (UpForRetry, Cancelled)
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::UpForRetry => "up_for_retry",
            Self::Failed => "failed",
            Self::UpstreamFailed => "upstream_failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Classification of a captured failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The task body returned an error or panicked.
    Execution,
    /// The attempt exceeded its configured timeout (retryable like any
    /// other execution failure).
    Timeout,
    /// The attempt was stopped because the run was cancelled.
    Cancelled,
}

/// Error detail captured from a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    /// Attempt number the failure was captured on, 1-based.
    pub attempt: u32,
}

/// The record of one task's execution within one run.
///
/// Owned exclusively by its [`crate::run::Run`]; all state transitions go
/// through [`TaskInstance::transition`], which enforces the table and
/// maintains timestamps and the attempt counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    task: TaskName,
    state: InstanceState,
    /// Number of executions started so far.
    attempts: u32,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    result: Option<Value>,
    error: Option<ErrorDetail>,
}

impl TaskInstance {
    pub fn new(task: impl Into<TaskName>) -> Self {
        Self {
            task: task.into(),
            state: InstanceState::Pending,
            attempts: 0,
            started_at: None,
            ended_at: None,
            result: None,
            error: None,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorDetail> {
        self.error.as_ref()
    }

    /// Apply a state transition, or fail with [`TransitionError`] if the
    /// table forbids it.
    ///
    /// Entering `Running` increments the attempt counter and stamps
    /// `started_at` on the first attempt; entering a terminal state stamps
    /// `ended_at`.
    pub(crate) fn transition(&mut self, to: InstanceState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError {
                subject: self.task.clone(),
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }

        if to == InstanceState::Running {
            self.attempts += 1;
            if self.started_at.is_none() {
                self.started_at = Some(Utc::now());
            }
        }
        if to.is_terminal() {
            self.ended_at = Some(Utc::now());
        }

        self.state = to;
        Ok(())
    }

    pub(crate) fn set_result(&mut self, payload: Value) {
        self.result = Some(payload);
        self.error = None;
    }

    pub(crate) fn set_error(&mut self, error: ErrorDetail) {
        self.error = Some(error);
    }

    /// Whether this instance may participate in an explicit re-run.
    pub fn is_rerunnable(&self) -> bool {
        matches!(
            self.state,
            InstanceState::Failed | InstanceState::UpstreamFailed | InstanceState::Cancelled
        )
    }

    /// Reset a failed/cancelled instance to a fresh pending record with a
    /// new attempt budget. Only valid for re-runnable instances.
    pub(crate) fn reset_for_rerun(&mut self) {
        debug_assert!(self.is_rerunnable());
        self.state = InstanceState::Pending;
        self.attempts = 0;
        self.started_at = None;
        self.ended_at = None;
        self.result = None;
        self.error = None;
    }
}
