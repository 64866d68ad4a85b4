// src/scheduler/runtime.rs

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::dag::{Dag, TaskName};
use crate::errors::TriggerError;
use crate::exec::{ExecutorBackend, TaskAttempt};
use crate::observe::TransitionObserver;
use crate::run::Run;
use crate::scheduler::{Command, CoreStep, SchedulerCore, SchedulerEvent};
use crate::store::StateStore;

/// Handle for requesting cooperative cancellation of one in-flight run.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    events_tx: mpsc::Sender<SchedulerEvent>,
}

impl CancelHandle {
    pub(crate) fn new(events_tx: mpsc::Sender<SchedulerEvent>) -> Self {
        Self { events_tx }
    }

    /// Request cancellation. Returns false if the run already finished.
    pub async fn cancel(&self) -> bool {
        self.events_tx
            .send(SchedulerEvent::CancelRequested)
            .await
            .is_ok()
    }
}

/// Async shell driving one run to completion.
///
/// Single-threaded control loop: it blocks on the event channel while
/// attempts are outstanding and wakes per completion event to let the core
/// recompute readiness, so there is no busy-polling. All instance writes
/// happen on this loop; executors only ever send events.
pub struct RunDriver<E: ExecutorBackend> {
    core: SchedulerCore,
    dag: Arc<Dag>,
    store: Arc<dyn StateStore>,
    observer: Arc<dyn TransitionObserver>,
    executor: E,
    events_tx: mpsc::Sender<SchedulerEvent>,
    events_rx: mpsc::Receiver<SchedulerEvent>,
    cancellation: CancellationToken,
}

impl<E: ExecutorBackend> RunDriver<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dag: Arc<Dag>,
        run: Run,
        store: Arc<dyn StateStore>,
        observer: Arc<dyn TransitionObserver>,
        executor: E,
        events_tx: mpsc::Sender<SchedulerEvent>,
        events_rx: mpsc::Receiver<SchedulerEvent>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            core: SchedulerCore::new(Arc::clone(&dag), run),
            dag,
            store,
            observer,
            executor,
            events_tx,
            events_rx,
            cancellation,
        }
    }

    /// Handle callers can use to cancel this run from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.events_tx.clone())
    }

    /// Drive the run until it reaches a terminal state, then return the
    /// final run record.
    pub async fn drive(mut self) -> Result<Run, TriggerError> {
        info!(run_id = %self.core.run().id(), "run driver started");

        let step = self.core.start()?;
        let mut finished = self.process_step(step).await?;

        while !finished {
            let event = self.events_rx.recv().await.ok_or_else(|| {
                TriggerError::Executor("scheduler event channel closed mid-run".into())
            })?;
            debug!(?event, "scheduler received event");

            if matches!(event, SchedulerEvent::CancelRequested) {
                // Signal in-flight attempts before the core reshuffles
                // waiting instances.
                self.cancellation.cancel();
            }

            let step = self.core.handle(event)?;
            finished = self.process_step(step).await?;
        }

        info!(run_id = %self.core.run().id(), "run driver exiting");
        Ok(self.core.into_run())
    }

    /// Persist transitions, notify the observer, and carry out commands.
    async fn process_step(&mut self, step: CoreStep) -> Result<bool, TriggerError> {
        let CoreStep {
            commands,
            transitions,
        } = step;

        for event in &transitions {
            self.observer.on_transition(event).await;
            if let Some(task) = event.task() {
                if let Some(instance) = self.core.run().instance(task) {
                    let instance = instance.clone();
                    self.store
                        .save_task_instance(self.core.run().id(), &instance)
                        .await?;
                }
            }
        }

        let mut attempts = Vec::new();
        let mut finished = false;
        for command in commands {
            match command {
                Command::Dispatch { task, attempt } => {
                    attempts.push(self.build_attempt(task, attempt)?);
                }
                Command::ScheduleRetry { task, delay } => {
                    self.arm_retry_timer(task, delay);
                }
                Command::Finished(state) => {
                    self.store
                        .save_run_state(self.core.run().id(), state)
                        .await?;
                    finished = true;
                }
            }
        }

        if !attempts.is_empty() {
            self.executor
                .spawn_attempts(attempts)
                .await
                .map_err(|err| TriggerError::Executor(err.to_string()))?;
        }

        Ok(finished)
    }

    fn build_attempt(&self, task: TaskName, attempt: u32) -> Result<TaskAttempt, TriggerError> {
        let task_def = self.dag.task(&task).ok_or_else(|| {
            TriggerError::Executor(format!("dispatched unknown task '{task}'"))
        })?;

        let mut upstream_results = BTreeMap::new();
        for upstream in self.dag.upstream_of(&task) {
            if let Some(payload) = self
                .core
                .run()
                .instance(upstream)
                .and_then(|i| i.result().cloned())
            {
                upstream_results.insert(upstream.clone(), payload);
            }
        }

        let run = self.core.run();
        let ctx = ExecutionContext {
            run_id: run.id().clone(),
            dag_name: run.dag_name().to_string(),
            trigger_key: run.trigger_key().to_string(),
            task: task.clone(),
            attempt,
            upstream_results,
            cancellation: self.cancellation.clone(),
        };

        Ok(TaskAttempt {
            task,
            attempt,
            ctx,
            handler: task_def.handler(),
            timeout: task_def.timeout(),
        })
    }

    fn arm_retry_timer(&self, task: TaskName, delay: Duration) {
        let events_tx = self.events_tx.clone();
        debug!(task = %task, delay_ms = delay.as_millis() as u64, "arming retry timer");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if events_tx
                .send(SchedulerEvent::RetryDue { task: task.clone() })
                .await
                .is_err()
            {
                warn!(task = %task, "retry timer fired after run finished");
            }
        });
    }
}
