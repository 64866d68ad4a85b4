// src/run/run.rs

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dag::{Dag, TaskName};
use crate::run::instance::{InstanceState, TaskInstance};

/// Identifier of one run: a DAG name plus the opaque trigger key it was
/// started with. Triggering the same (dag, key) pair again addresses the
/// same run, which is what makes `trigger_run` idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    pub fn new(dag_name: &str, trigger_key: &str) -> Self {
        Self(format!("{dag_name}/{trigger_key}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Overall state of a run, derived from its instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One instantiation of a DAG against a trigger key.
///
/// Holds exactly one [`TaskInstance`] per DAG task. Mutated only by the
/// scheduler core, which is the single writer of instance state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    id: RunId,
    dag_name: String,
    trigger_key: String,
    created_at: DateTime<Utc>,
    state: RunState,
    instances: BTreeMap<TaskName, TaskInstance>,
}

impl Run {
    /// Create a fresh run with one pending instance per task in the DAG.
    pub fn create(dag: &Dag, trigger_key: impl Into<String>) -> Self {
        let trigger_key = trigger_key.into();
        let instances = dag
            .task_names()
            .map(|name| (name.to_string(), TaskInstance::new(name)))
            .collect();

        let run = Self {
            id: RunId::new(dag.name(), &trigger_key),
            dag_name: dag.name().to_string(),
            trigger_key,
            created_at: Utc::now(),
            state: RunState::Running,
            instances,
        };
        debug!(run_id = %run.id, tasks = run.instances.len(), "created run");
        run
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn dag_name(&self) -> &str {
        &self.dag_name
    }

    pub fn trigger_key(&self) -> &str {
        &self.trigger_key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn instance(&self, task: &str) -> Option<&TaskInstance> {
        self.instances.get(task)
    }

    pub fn instances(&self) -> impl Iterator<Item = &TaskInstance> {
        self.instances.values()
    }

    pub(crate) fn instance_mut(&mut self, task: &str) -> Option<&mut TaskInstance> {
        self.instances.get_mut(task)
    }

    pub(crate) fn set_state(&mut self, state: RunState) {
        self.state = state;
    }

    /// Overwrite the record for one instance (store write path).
    pub(crate) fn replace_instance(&mut self, instance: TaskInstance) {
        self.instances.insert(instance.task().to_string(), instance);
    }

    /// Derive the run state from the instances:
    /// still `Running` while any instance is non-terminal; `Succeeded` iff
    /// all succeeded; `Failed` if anything failed or was skipped by an
    /// upstream failure; otherwise `Cancelled`.
    pub fn derive_state(&self) -> RunState {
        let mut any_failed = false;
        let mut any_cancelled = false;
        for inst in self.instances.values() {
            match inst.state() {
                InstanceState::Pending | InstanceState::Running | InstanceState::UpForRetry => {
                    return RunState::Running;
                }
                InstanceState::Failed | InstanceState::UpstreamFailed => any_failed = true,
                InstanceState::Cancelled => any_cancelled = true,
                InstanceState::Succeeded => {}
            }
        }
        if any_failed {
            RunState::Failed
        } else if any_cancelled {
            RunState::Cancelled
        } else {
            RunState::Succeeded
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.instances
            .values()
            .all(|i| i.state() == InstanceState::Succeeded)
    }

    /// Instances in `failed` or `upstream_failed` state, with their captured
    /// error detail, for failure reporting and targeted re-runs.
    pub fn failed_instances(&self) -> Vec<&TaskInstance> {
        self.instances
            .values()
            .filter(|i| {
                matches!(
                    i.state(),
                    InstanceState::Failed | InstanceState::UpstreamFailed
                )
            })
            .collect()
    }

    /// True if an explicit re-run would have anything to do.
    pub fn has_rerunnable_instances(&self) -> bool {
        self.instances.values().any(|i| i.is_rerunnable())
    }

    /// Reset every failed/upstream-failed/cancelled instance back to
    /// pending, leaving succeeded instances untouched, and mark the run as
    /// running again. Returns the names of the reset instances.
    pub(crate) fn reset_for_rerun(&mut self) -> Vec<TaskName> {
        let mut reset = Vec::new();
        for (name, inst) in self.instances.iter_mut() {
            if inst.is_rerunnable() {
                inst.reset_for_rerun();
                reset.push(name.clone());
            }
        }
        self.state = RunState::Running;
        debug!(run_id = %self.id, reset = reset.len(), "reset run for re-run");
        reset
    }
}
