// src/scheduler/core.rs

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dag::{Dag, TaskName};
use crate::errors::TransitionError;
use crate::observe::TransitionEvent;
use crate::run::{ErrorDetail, ErrorKind, InstanceState, Run, RunState};
use crate::scheduler::{AttemptOutcome, Command, CoreStep, SchedulerEvent};

/// Pure scheduler core for one run.
///
/// Owns the [`Run`] and is its single writer. Each call to [`start`] or
/// [`handle`] applies one event, recomputes readiness, and returns the
/// commands the shell must carry out. Readiness rule: an instance is ready
/// when it is `pending` and every upstream instance is `succeeded`; a
/// pending instance with a terminally failed upstream goes straight to
/// `upstream_failed` without ever being dispatched.
///
/// [`start`]: SchedulerCore::start
/// [`handle`]: SchedulerCore::handle
#[derive(Debug)]
pub struct SchedulerCore {
    dag: Arc<Dag>,
    run: Run,
    cancelled: bool,
    finished: bool,
    transitions: Vec<TransitionEvent>,
}

impl SchedulerCore {
    pub fn new(dag: Arc<Dag>, run: Run) -> Self {
        Self {
            dag,
            run,
            cancelled: false,
            finished: false,
            transitions: Vec::new(),
        }
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn into_run(self) -> Run {
        self.run
    }

    /// No instance is pending, running, or awaiting a retry backoff.
    pub fn is_quiescent(&self) -> bool {
        !self.run.instances().any(|inst| {
            matches!(
                inst.state(),
                InstanceState::Pending | InstanceState::Running | InstanceState::UpForRetry
            )
        })
    }

    /// Compute the initial ready set (and, for an already-terminal run,
    /// report it finished immediately).
    pub fn start(&mut self) -> Result<CoreStep, TransitionError> {
        let commands = self.advance()?;
        Ok(self.finish_step(commands))
    }

    /// Apply one event and recompute readiness.
    pub fn handle(&mut self, event: SchedulerEvent) -> Result<CoreStep, TransitionError> {
        let mut commands = Vec::new();

        match event {
            SchedulerEvent::AttemptFinished { task, outcome } => {
                self.apply_attempt_outcome(&task, outcome, &mut commands)?;
            }
            SchedulerEvent::RetryDue { task } => {
                // The run may have been cancelled while the backoff timer
                // was armed; a stale timer firing is an expected race.
                match self.run.instance(&task).map(|i| i.state()) {
                    Some(InstanceState::UpForRetry) => {
                        self.apply_transition(&task, InstanceState::Pending)?;
                    }
                    state => {
                        debug!(task = %task, ?state, "ignoring stale retry timer");
                    }
                }
            }
            SchedulerEvent::CancelRequested => {
                self.apply_cancel()?;
            }
        }

        commands.extend(self.advance()?);
        Ok(self.finish_step(commands))
    }

    fn apply_attempt_outcome(
        &mut self,
        task: &str,
        outcome: AttemptOutcome,
        commands: &mut Vec<Command>,
    ) -> Result<(), TransitionError> {
        match outcome {
            AttemptOutcome::Success { payload } => {
                self.apply_transition(task, InstanceState::Succeeded)?;
                if let Some(inst) = self.run.instance_mut(task) {
                    inst.set_result(payload);
                }
            }
            AttemptOutcome::Failed { kind, message } => {
                let attempts = self
                    .run
                    .instance(task)
                    .map(|i| i.attempts())
                    .unwrap_or_default();
                let detail = ErrorDetail {
                    kind,
                    message,
                    attempt: attempts,
                };

                if self.cancelled {
                    // No retries once cancellation started. An attempt that
                    // was stopped by the token is cancelled; a genuine
                    // failure that raced the cancel stays a failure.
                    let to = if kind == ErrorKind::Cancelled {
                        InstanceState::Cancelled
                    } else {
                        InstanceState::Failed
                    };
                    self.apply_transition(task, to)?;
                } else if kind == ErrorKind::Cancelled {
                    // Attempt was aborted without a run-level cancel
                    // (executor shutdown). Not retryable.
                    warn!(task = %task, "attempt aborted outside run cancellation");
                    self.apply_transition(task, InstanceState::Failed)?;
                } else {
                    let policy = self
                        .dag
                        .task(task)
                        .map(|t| t.retry_policy().clone())
                        .unwrap_or_default();
                    match policy.delay_after_attempt(attempts) {
                        Some(delay) => {
                            info!(
                                task = %task,
                                attempt = attempts,
                                delay_ms = delay.as_millis() as u64,
                                "attempt failed; scheduling retry"
                            );
                            self.apply_transition(task, InstanceState::UpForRetry)?;
                            commands.push(Command::ScheduleRetry {
                                task: task.to_string(),
                                delay,
                            });
                        }
                        None => {
                            warn!(
                                task = %task,
                                attempts,
                                "attempt failed with retry budget exhausted"
                            );
                            self.apply_transition(task, InstanceState::Failed)?;
                        }
                    }
                }

                if let Some(inst) = self.run.instance_mut(task) {
                    inst.set_error(detail);
                }
            }
        }
        Ok(())
    }

    fn apply_cancel(&mut self) -> Result<(), TransitionError> {
        if self.cancelled {
            debug!(run_id = %self.run.id(), "cancel already in progress");
            return Ok(());
        }
        self.cancelled = true;
        info!(run_id = %self.run.id(), "cancelling run");

        let waiting: Vec<TaskName> = self
            .run
            .instances()
            .filter(|i| {
                matches!(
                    i.state(),
                    InstanceState::Pending | InstanceState::UpForRetry
                )
            })
            .map(|i| i.task().to_string())
            .collect();

        for task in waiting {
            self.apply_transition(&task, InstanceState::Cancelled)?;
            if let Some(inst) = self.run.instance_mut(&task) {
                let attempt = inst.attempts();
                inst.set_error(ErrorDetail {
                    kind: ErrorKind::Cancelled,
                    message: "run cancelled before execution".into(),
                    attempt,
                });
            }
        }
        // In-flight instances stay Running; the executor reports their
        // outcome after the cancellation token fires.
        Ok(())
    }

    /// Propagate upstream failures, dispatch the ready set, and finalize
    /// the run once everything is terminal.
    fn advance(&mut self) -> Result<Vec<Command>, TransitionError> {
        let mut commands = Vec::new();

        if !self.cancelled {
            self.propagate_upstream_failures()?;

            let ready: Vec<TaskName> = self
                .run
                .instances()
                .filter(|i| i.state() == InstanceState::Pending)
                .filter(|i| self.upstreams_succeeded(i.task()))
                .map(|i| i.task().to_string())
                .collect();

            for task in ready {
                self.apply_transition(&task, InstanceState::Running)?;
                let attempt = self
                    .run
                    .instance(&task)
                    .map(|i| i.attempts())
                    .unwrap_or_default();
                debug!(task = %task, attempt, "dependencies satisfied; dispatching");
                commands.push(Command::Dispatch { task, attempt });
            }
        }

        if !self.finished && self.is_quiescent() {
            let state = if self.run.is_terminal() {
                // Re-driving an already-terminal run is a no-op.
                self.run.state()
            } else {
                let state = self.run.derive_state();
                self.run.set_state(state);
                self.transitions.push(TransitionEvent::Run {
                    run_id: self.run.id().clone(),
                    from: RunState::Running,
                    to: state,
                    at: Utc::now(),
                });
                info!(run_id = %self.run.id(), state = %state, "run reached terminal state");
                state
            };
            self.finished = true;
            commands.push(Command::Finished(state));
        }

        Ok(commands)
    }

    /// Mark every pending instance with a terminally failed upstream as
    /// `upstream_failed`, repeating until a fixpoint so the status
    /// propagates transitively.
    fn propagate_upstream_failures(&mut self) -> Result<(), TransitionError> {
        loop {
            let doomed: Vec<TaskName> = self
                .run
                .instances()
                .filter(|i| i.state() == InstanceState::Pending)
                .filter(|i| {
                    self.dag.upstream_of(i.task()).iter().any(|up| {
                        matches!(
                            self.run.instance(up).map(|u| u.state()),
                            Some(InstanceState::Failed) | Some(InstanceState::UpstreamFailed)
                        )
                    })
                })
                .map(|i| i.task().to_string())
                .collect();

            if doomed.is_empty() {
                return Ok(());
            }

            for task in doomed {
                warn!(task = %task, "upstream failed; skipping task");
                self.apply_transition(&task, InstanceState::UpstreamFailed)?;
            }
        }
    }

    fn upstreams_succeeded(&self, task: &str) -> bool {
        self.dag.upstream_of(task).iter().all(|up| {
            matches!(
                self.run.instance(up).map(|u| u.state()),
                Some(InstanceState::Succeeded)
            )
        })
    }

    fn apply_transition(&mut self, task: &str, to: InstanceState) -> Result<(), TransitionError> {
        let run_id = self.run.id().clone();
        let inst = self
            .run
            .instance_mut(task)
            .ok_or_else(|| TransitionError {
                subject: task.to_string(),
                from: "<unknown instance>".into(),
                to: to.to_string(),
            })?;
        let from = inst.state();
        inst.transition(to)?;
        debug!(task = %task, %from, %to, "instance transition");
        self.transitions.push(TransitionEvent::Instance {
            run_id,
            task: task.to_string(),
            from,
            to,
            at: Utc::now(),
        });
        Ok(())
    }

    fn finish_step(&mut self, commands: Vec<Command>) -> CoreStep {
        CoreStep {
            commands,
            transitions: std::mem::take(&mut self.transitions),
        }
    }
}
