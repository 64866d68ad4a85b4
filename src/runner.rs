// src/runner.rs

//! The trigger entry point.
//!
//! [`Runner`] wires together the registry, store, observer, and executor,
//! and exposes `trigger_run` as the sole way to start work. CLI, API, and
//! timer callers all sit outside this crate and call the same method.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dag::Dag;
use crate::errors::{StoreError, TriggerError};
use crate::exec::TokioExecutor;
use crate::observe::{NoopObserver, TransitionObserver};
use crate::registry::DagRegistry;
use crate::run::{Run, RunId};
use crate::scheduler::{CancelHandle, RunDriver, SchedulerEvent};
use crate::store::{MemoryStore, StateStore};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Builder for [`Runner`].
pub struct RunnerBuilder {
    registry: DagRegistry,
    store: Option<Arc<dyn StateStore>>,
    observer: Option<Arc<dyn TransitionObserver>>,
    max_parallel: Option<usize>,
    cancel_grace: Duration,
}

impl RunnerBuilder {
    pub fn new(registry: DagRegistry) -> Self {
        Self {
            registry,
            store: None,
            observer: None,
            max_parallel: None,
            cancel_grace: Duration::from_secs(5),
        }
    }

    /// Use a custom state store (default: in-memory).
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach a transition observer (default: none).
    pub fn with_observer(mut self, observer: Arc<dyn TransitionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Cap executor concurrency (default: unbounded).
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    /// Grace period in-flight attempts get on cancellation (default 5s).
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn build(self) -> Runner {
        Runner {
            registry: self.registry,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
            max_parallel: self.max_parallel,
            cancel_grace: self.cancel_grace,
            active: Mutex::new(HashMap::new()),
        }
    }
}

/// Owns the scheduling wiring and drives runs to completion.
///
/// `trigger_run` awaits the run reaching a terminal state and returns its
/// id; callers wanting fire-and-forget semantics spawn it. Share the
/// runner behind an `Arc` to cancel runs from other tasks.
pub struct Runner {
    registry: DagRegistry,
    store: Arc<dyn StateStore>,
    observer: Arc<dyn TransitionObserver>,
    max_parallel: Option<usize>,
    cancel_grace: Duration,
    /// Cancel handles for currently executing runs.
    active: Mutex<HashMap<RunId, CancelHandle>>,
}

impl Runner {
    /// Start a run of `dag_name` for `trigger_key` and drive it to a
    /// terminal state.
    ///
    /// Idempotent per (dag, trigger key): if a run for this pair already
    /// exists in the store, nothing re-executes and the existing id is
    /// returned. Use [`Runner::rerun_failed`] to explicitly re-run the
    /// failed subset of an existing run.
    pub async fn trigger_run(
        &self,
        dag_name: &str,
        trigger_key: &str,
    ) -> Result<RunId, TriggerError> {
        let dag = self.lookup_dag(dag_name)?;
        let run_id = RunId::new(dag_name, trigger_key);

        if let Some(existing) = self.store.load_run(&run_id).await? {
            info!(
                run_id = %run_id,
                state = %existing.state(),
                "run already exists; trigger is a no-op"
            );
            return Ok(run_id);
        }

        let run = Run::create(&dag, trigger_key);
        self.store.save_run(&run).await?;
        self.drive_run(dag, run).await
    }

    /// Re-run only the failed/upstream-failed/cancelled instances of an
    /// existing run, keeping succeeded instances (and their payloads)
    /// untouched.
    pub async fn rerun_failed(
        &self,
        dag_name: &str,
        trigger_key: &str,
    ) -> Result<RunId, TriggerError> {
        let dag = self.lookup_dag(dag_name)?;
        let run_id = RunId::new(dag_name, trigger_key);

        let mut run = self
            .store
            .load_run(&run_id)
            .await?
            .ok_or_else(|| TriggerError::UnknownRun(run_id.to_string()))?;

        if !run.has_rerunnable_instances() {
            info!(run_id = %run_id, "no failed instances; re-run is a no-op");
            return Ok(run_id);
        }

        run.reset_for_rerun();
        self.store.save_run(&run).await?;
        self.drive_run(dag, run).await
    }

    /// Request cancellation of an in-flight run. Returns false if no such
    /// run is currently executing.
    pub async fn cancel(&self, run_id: &RunId) -> bool {
        let handle = match self.active.lock() {
            Ok(active) => active.get(run_id).cloned(),
            Err(_) => {
                warn!("active-run map lock poisoned");
                None
            }
        };
        match handle {
            Some(handle) => handle.cancel().await,
            None => false,
        }
    }

    /// Load a run record from the store.
    pub async fn run(&self, run_id: &RunId) -> Result<Option<Run>, StoreError> {
        self.store.load_run(run_id).await
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        Arc::clone(&self.store)
    }

    pub fn registry(&self) -> &DagRegistry {
        &self.registry
    }

    fn lookup_dag(&self, dag_name: &str) -> Result<Arc<Dag>, TriggerError> {
        self.registry
            .get(dag_name)
            .ok_or_else(|| TriggerError::UnknownDag(dag_name.to_string()))
    }

    async fn drive_run(&self, dag: Arc<Dag>, run: Run) -> Result<RunId, TriggerError> {
        let run_id = run.id().clone();
        let (events_tx, events_rx) = mpsc::channel::<SchedulerEvent>(EVENT_CHANNEL_CAPACITY);
        let cancellation = CancellationToken::new();

        let mut executor =
            TokioExecutor::new(events_tx.clone()).with_cancel_grace(self.cancel_grace);
        if let Some(max_parallel) = self.max_parallel {
            executor = executor.with_max_parallel(max_parallel);
        }

        let driver = RunDriver::new(
            dag,
            run,
            Arc::clone(&self.store),
            Arc::clone(&self.observer),
            executor,
            events_tx,
            events_rx,
            cancellation,
        );

        if let Ok(mut active) = self.active.lock() {
            active.insert(run_id.clone(), driver.cancel_handle());
        }

        let result = driver.drive().await;

        if let Ok(mut active) = self.active.lock() {
            active.remove(&run_id);
        }

        result.map(|run| run.id().clone())
    }
}
