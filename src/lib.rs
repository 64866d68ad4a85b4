// src/lib.rs

//! # dagrun
//!
//! An embeddable, dependency-aware task scheduler: workflows are directed
//! acyclic graphs of named tasks, independent tasks run concurrently, and
//! no task starts before all of its upstream tasks have succeeded.
//!
//! A library, not a service: it runs in your process, task bodies are
//! plain async Rust, and triggering is an external event you deliver by
//! calling [`Runner::trigger_run`].
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dagrun::{DagBuilder, DagRegistry, RunnerBuilder, Task};
//!
//! let dag = DagBuilder::new("csv_etl")
//!     .add_task(Task::from_fn("ingest", |_ctx| async { /* ... */ Ok(payload) }))
//!     .add_task(Task::from_fn("clean", |ctx| async move {
//!         let rows = ctx.upstream_result("ingest");
//!         /* ... */
//!         Ok(cleaned)
//!     }))
//!     .add_edge("ingest", "clean")
//!     .build()?;
//!
//! let mut registry = DagRegistry::new();
//! registry.register(dag)?;
//!
//! let runner = RunnerBuilder::new(registry).build();
//! let run_id = runner.trigger_run("csv_etl", "2026-08-30").await?;
//! let run = runner.run(&run_id).await?.unwrap();
//! assert!(run.all_succeeded());
//! ```
//!
//! ## Failure semantics
//!
//! - A failed attempt with retry budget left goes `up_for_retry` and
//!   re-enters the ready set after its backoff.
//! - A permanently failed task moves every (transitive) downstream task to
//!   `upstream_failed`; they are never dispatched.
//! - Re-triggering an existing run is a no-op; [`Runner::rerun_failed`]
//!   re-executes only the failed subgraph.

pub mod context;
pub mod dag;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod observe;
pub mod registry;
pub mod retry;
pub mod run;
pub mod runner;
pub mod scheduler;
pub mod store;

pub use context::ExecutionContext;
pub use dag::{Dag, DagBuilder, Task, TaskHandler, TaskName};
pub use errors::{DagError, ExecutionError, StoreError, TransitionError, TriggerError};
pub use observe::{NoopObserver, TransitionEvent, TransitionObserver};
pub use registry::DagRegistry;
pub use retry::RetryPolicy;
pub use run::{ErrorDetail, ErrorKind, InstanceState, Run, RunId, RunState, TaskInstance};
pub use runner::{Runner, RunnerBuilder};
pub use scheduler::{AttemptOutcome, CancelHandle, Command, SchedulerCore, SchedulerEvent};
pub use store::{MemoryStore, StateStore};
