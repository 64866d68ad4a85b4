// src/observe.rs

//! Observability hook: one event per state transition.
//!
//! The scheduler core records a [`TransitionEvent`] for every instance and
//! run state change; the async shell forwards them to the configured
//! [`TransitionObserver`]. Transitions are also logged via `tracing`, so
//! the observer seam is for external metrics/audit consumers, not for the
//! crate's own logging.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::TaskName;
use crate::run::{InstanceState, RunId, RunState};

/// A single state transition, instance- or run-level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope")]
pub enum TransitionEvent {
    Instance {
        run_id: RunId,
        task: TaskName,
        from: InstanceState,
        to: InstanceState,
        at: DateTime<Utc>,
    },
    Run {
        run_id: RunId,
        from: RunState,
        to: RunState,
        at: DateTime<Utc>,
    },
}

impl TransitionEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::Instance { run_id, .. } | Self::Run { run_id, .. } => run_id,
        }
    }

    /// Task name for instance-level events, `None` for run-level ones.
    pub fn task(&self) -> Option<&str> {
        match self {
            Self::Instance { task, .. } => Some(task),
            Self::Run { .. } => None,
        }
    }
}

/// Consumer of transition events (logging, metrics, audit).
///
/// Observers must not block the scheduler for long; heavy work should be
/// handed off to a channel or background task.
#[async_trait]
pub trait TransitionObserver: Send + Sync {
    async fn on_transition(&self, event: &TransitionEvent);
}

/// An observer that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopObserver;

#[async_trait]
impl TransitionObserver for NoopObserver {
    async fn on_transition(&self, _event: &TransitionEvent) {}
}
