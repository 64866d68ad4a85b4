// src/exec/executor.rs

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tracing::{info, warn};

use crate::context::ExecutionContext;
use crate::dag::{TaskHandler, TaskName};
use crate::errors::{ExecutionError, Result};
use crate::run::ErrorKind;
use crate::scheduler::{AttemptOutcome, SchedulerEvent};

/// One attempt of one task, ready to hand to an executor.
pub struct TaskAttempt {
    pub task: TaskName,
    /// Attempt number, 1-based.
    pub attempt: u32,
    pub ctx: ExecutionContext,
    pub handler: Arc<dyn TaskHandler>,
    /// Per-attempt timeout, if the task configured one.
    pub timeout: Option<Duration>,
}

impl fmt::Debug for TaskAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskAttempt")
            .field("task", &self.task)
            .field("attempt", &self.attempt)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Backend that executes dispatched attempts.
///
/// Implementations must report exactly one `AttemptFinished` event per
/// attempt, eventually, on the scheduler's event channel; the run driver
/// blocks on those events instead of polling.
pub trait ExecutorBackend: Send {
    fn spawn_attempts(
        &mut self,
        attempts: Vec<TaskAttempt>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Tokio-backed executor.
///
/// Each attempt runs in its own spawned task, so independent attempts run
/// in parallel. Concurrency is unbounded unless a cap is configured, in
/// which case attempts queue on a semaphore (the resource-pool policy
/// lives here, not in the scheduler). Task panics, timeouts, and
/// cancellation are all captured and reported as structured outcomes;
/// nothing raises past this boundary.
pub struct TokioExecutor {
    events_tx: mpsc::Sender<SchedulerEvent>,
    semaphore: Option<Arc<Semaphore>>,
    cancel_grace: Duration,
}

impl TokioExecutor {
    pub fn new(events_tx: mpsc::Sender<SchedulerEvent>) -> Self {
        Self {
            events_tx,
            semaphore: None,
            cancel_grace: Duration::from_secs(5),
        }
    }

    /// Cap the number of concurrently executing attempts.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.semaphore = Some(Arc::new(Semaphore::new(max_parallel.max(1))));
        self
    }

    /// How long an in-flight attempt gets after cancellation before it is
    /// forcibly aborted (default 5s).
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }
}

impl ExecutorBackend for TokioExecutor {
    fn spawn_attempts(
        &mut self,
        attempts: Vec<TaskAttempt>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let events_tx = self.events_tx.clone();
        let semaphore = self.semaphore.clone();
        let grace = self.cancel_grace;

        Box::pin(async move {
            for attempt in attempts {
                tokio::spawn(run_attempt(
                    attempt,
                    events_tx.clone(),
                    semaphore.clone(),
                    grace,
                ));
            }
            Ok(())
        })
    }
}

/// Run one attempt and report its outcome. All error paths funnel into a
/// single `AttemptFinished` event.
async fn run_attempt(
    attempt: TaskAttempt,
    events_tx: mpsc::Sender<SchedulerEvent>,
    semaphore: Option<Arc<Semaphore>>,
    grace: Duration,
) {
    let task = attempt.task.clone();
    let outcome = execute_attempt(attempt, semaphore, grace).await;

    if events_tx
        .send(SchedulerEvent::AttemptFinished {
            task: task.clone(),
            outcome,
        })
        .await
        .is_err()
    {
        warn!(task = %task, "scheduler gone before attempt result could be reported");
    }
}

async fn execute_attempt(
    attempt: TaskAttempt,
    semaphore: Option<Arc<Semaphore>>,
    grace: Duration,
) -> AttemptOutcome {
    let token = attempt.ctx.cancellation.clone();

    let _permit = match semaphore {
        Some(semaphore) => {
            tokio::select! {
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        return failed(ErrorKind::Execution, "executor pool closed");
                    }
                },
                _ = token.cancelled() => {
                    return failed(
                        ErrorKind::Cancelled,
                        "run cancelled while waiting for an executor slot",
                    );
                }
            }
        }
        None => None,
    };

    if token.is_cancelled() {
        return failed(ErrorKind::Cancelled, "run cancelled before execution");
    }

    info!(
        task = %attempt.task,
        attempt = attempt.attempt,
        "starting task attempt"
    );

    let handler = attempt.handler;
    let ctx = attempt.ctx;
    let mut handle = tokio::spawn(async move { handler.execute(ctx).await });
    let abort = handle.abort_handle();
    let attempt_timeout = attempt.timeout;

    let work = async {
        match attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(join) => join_outcome(join),
                Err(_) => {
                    abort.abort();
                    failed(
                        ErrorKind::Timeout,
                        format!("attempt timed out after {limit:?}"),
                    )
                }
            },
            None => join_outcome((&mut handle).await),
        }
    };
    tokio::pin!(work);

    tokio::select! {
        outcome = &mut work => outcome,
        _ = token.cancelled() => {
            // Bounded grace period for cooperative shutdown, then abort.
            match tokio::time::timeout(grace, &mut work).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    abort.abort();
                    failed(
                        ErrorKind::Cancelled,
                        "cancelled; attempt did not stop within the grace period",
                    )
                }
            }
        }
    }
}

fn join_outcome(join: std::result::Result<std::result::Result<Value, ExecutionError>, JoinError>) -> AttemptOutcome {
    match join {
        Ok(Ok(payload)) => AttemptOutcome::Success { payload },
        Ok(Err(err)) => failed(ErrorKind::Execution, err.message),
        Err(join_err) if join_err.is_panic() => {
            failed(ErrorKind::Execution, format!("task body panicked: {join_err}"))
        }
        Err(_) => failed(ErrorKind::Cancelled, "attempt aborted"),
    }
}

fn failed(kind: ErrorKind, message: impl Into<String>) -> AttemptOutcome {
    AttemptOutcome::Failed {
        kind,
        message: message.into(),
    }
}
