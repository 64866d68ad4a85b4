// src/dag/mod.rs

//! DAG model: tasks, dependency edges, build-time validation.
//!
//! - [`task`] holds the unit of work: a named handler plus retry/timeout
//!   policy.
//! - [`graph`] holds the explicit builder API and the immutable, validated
//!   [`Dag`] with its adjacency and topological order.

pub mod graph;
pub mod task;

/// Canonical task name type used throughout the crate.
pub type TaskName = String;

pub use graph::{Dag, DagBuilder};
pub use task::{Task, TaskHandler};
