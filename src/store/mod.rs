// src/store/mod.rs

//! State store seam.
//!
//! The core depends on durable state only through [`StateStore`]; swapping
//! in a database-backed implementation is a matter of implementing the
//! trait. Writes are per task instance and must be atomic: a crash mid-write
//! may lose the write but must never corrupt a single instance's record.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::run::{Run, RunId, RunState, TaskInstance};

/// Narrow read/write interface for run and task-instance state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load a run by id, or `None` if it was never saved.
    async fn load_run(&self, run_id: &RunId) -> Result<Option<Run>, StoreError>;

    /// Persist a whole run record (used at creation and re-run reset).
    async fn save_run(&self, run: &Run) -> Result<(), StoreError>;

    /// Persist one task instance atomically.
    async fn save_task_instance(
        &self,
        run_id: &RunId,
        instance: &TaskInstance,
    ) -> Result<(), StoreError>;

    /// Persist the run-level state.
    async fn save_run_state(&self, run_id: &RunId, state: RunState) -> Result<(), StoreError>;
}

/// In-memory reference store.
///
/// All writes go through one mutex, so a single instance's record is never
/// observed half-written.
#[derive(Debug, Default)]
pub struct MemoryStore {
    runs: Mutex<HashMap<RunId, Run>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_runs<T>(
        &self,
        f: impl FnOnce(&mut HashMap<RunId, Run>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut runs = self
            .runs
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))?;
        f(&mut runs)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load_run(&self, run_id: &RunId) -> Result<Option<Run>, StoreError> {
        self.with_runs(|runs| Ok(runs.get(run_id).cloned()))
    }

    async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        self.with_runs(|runs| {
            runs.insert(run.id().clone(), run.clone());
            Ok(())
        })
    }

    async fn save_task_instance(
        &self,
        run_id: &RunId,
        instance: &TaskInstance,
    ) -> Result<(), StoreError> {
        self.with_runs(|runs| {
            let run = runs
                .get_mut(run_id)
                .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
            run.replace_instance(instance.clone());
            Ok(())
        })
    }

    async fn save_run_state(&self, run_id: &RunId, state: RunState) -> Result<(), StoreError> {
        self.with_runs(|runs| {
            let run = runs
                .get_mut(run_id)
                .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
            run.set_state(state);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{DagBuilder, Task};
    use crate::run::InstanceState;

    fn tiny_run() -> Run {
        let dag = DagBuilder::new("tiny")
            .add_task(Task::from_fn("a", |_ctx| async {
                Ok(serde_json::Value::Null)
            }))
            .build()
            .unwrap();
        Run::create(&dag, "2026-08-30")
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let store = MemoryStore::new();
        let run = tiny_run();
        store.save_run(&run).await.unwrap();

        let loaded = store.load_run(run.id()).await.unwrap().unwrap();
        assert_eq!(loaded.id(), run.id());
        assert_eq!(loaded.instance("a").unwrap().state(), InstanceState::Pending);
    }

    #[tokio::test]
    async fn load_missing_run_is_none() {
        let store = MemoryStore::new();
        let id = RunId::new("ghost", "nope");
        assert!(store.load_run(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn instance_write_requires_existing_run() {
        let store = MemoryStore::new();
        let run = tiny_run();
        let inst = run.instance("a").unwrap().clone();

        let err = store.save_task_instance(run.id(), &inst).await.unwrap_err();
        assert!(matches!(err, StoreError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn run_state_write_updates_record() {
        let store = MemoryStore::new();
        let run = tiny_run();
        store.save_run(&run).await.unwrap();

        store
            .save_run_state(run.id(), RunState::Cancelled)
            .await
            .unwrap();
        let loaded = store.load_run(run.id()).await.unwrap().unwrap();
        assert_eq!(loaded.state(), RunState::Cancelled);
    }
}
