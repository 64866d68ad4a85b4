// tests/failure_modes.rs

//! Retry, permanent failure, upstream-failure propagation, timeouts, and
//! targeted re-runs, end to end.

mod common;
use common::{counting_task, failing_task, flaky_task, init_tracing, ok_task};

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::time::{timeout, Duration};

use dagrun::{
    DagBuilder, DagRegistry, ErrorKind, ExecutionError, InstanceState, RetryPolicy, RunState,
    RunnerBuilder, Task, TriggerError,
};

fn registry_with(dag: dagrun::Dag) -> DagRegistry {
    let mut registry = DagRegistry::new();
    registry.register(dag).unwrap();
    registry
}

#[tokio::test]
async fn permanent_failure_fails_run_and_skips_dependents() {
    init_tracing();

    let dag = DagBuilder::new("ab")
        .add_task(
            failing_task("a").with_retry(RetryPolicy::fixed(3, Duration::from_millis(5))),
        )
        .add_task(ok_task("b"))
        .add_edge("a", "b")
        .build()
        .unwrap();
    let runner = RunnerBuilder::new(registry_with(dag)).build();

    let run_id = timeout(Duration::from_secs(5), runner.trigger_run("ab", "t1"))
        .await
        .expect("run did not finish in time")
        .unwrap();

    let run = runner.run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.state(), RunState::Failed);

    let a = run.instance("a").unwrap();
    assert_eq!(a.state(), InstanceState::Failed);
    assert_eq!(a.attempts(), 3, "exactly max_attempts executions");
    let detail = a.error().unwrap();
    assert_eq!(detail.kind, ErrorKind::Execution);
    assert_eq!(detail.attempt, 3);

    let b = run.instance("b").unwrap();
    assert_eq!(b.state(), InstanceState::UpstreamFailed);
    assert_eq!(b.attempts(), 0, "skipped task never ran");

    let failed: Vec<&str> = run.failed_instances().iter().map(|i| i.task()).collect();
    assert_eq!(failed, vec!["a", "b"]);
}

#[tokio::test]
async fn flaky_task_succeeds_within_retry_budget() {
    init_tracing();

    let executions = Arc::new(AtomicU32::new(0));
    let dag = DagBuilder::new("flaky")
        .add_task(
            flaky_task("x", 2, Arc::clone(&executions))
                .with_retry(RetryPolicy::fixed(3, Duration::from_millis(5))),
        )
        .build()
        .unwrap();
    let runner = RunnerBuilder::new(registry_with(dag)).build();

    let run_id = timeout(Duration::from_secs(5), runner.trigger_run("flaky", "t1"))
        .await
        .expect("run did not finish in time")
        .unwrap();

    let run = runner.run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.state(), RunState::Succeeded);

    let x = run.instance("x").unwrap();
    assert_eq!(x.attempts(), 3);
    assert_eq!(executions.load(Ordering::SeqCst), 3);
    assert_eq!(x.result(), Some(&json!({ "task": "x", "attempt": 3 })));
    assert!(x.error().is_none(), "success clears earlier error detail");
}

#[tokio::test]
async fn timeout_is_a_retryable_failure() {
    init_tracing();

    let dag = DagBuilder::new("slow")
        .add_task(
            Task::from_fn("sleepy", |_ctx| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(json!(null))
            })
            .with_timeout(Duration::from_millis(50))
            .with_retry(RetryPolicy::fixed(2, Duration::from_millis(5))),
        )
        .build()
        .unwrap();
    let runner = RunnerBuilder::new(registry_with(dag)).build();

    let run_id = timeout(Duration::from_secs(5), runner.trigger_run("slow", "t1"))
        .await
        .expect("run did not finish in time")
        .unwrap();

    let run = runner.run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.state(), RunState::Failed);

    let sleepy = run.instance("sleepy").unwrap();
    assert_eq!(sleepy.state(), InstanceState::Failed);
    assert_eq!(sleepy.attempts(), 2, "timeout was retried once");
    assert_eq!(sleepy.error().unwrap().kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn task_panic_is_contained_and_reported() {
    init_tracing();

    let dag = DagBuilder::new("panicky")
        .add_task(Task::from_fn("boom", |_ctx| async {
            panic!("task body blew up")
        }))
        .build()
        .unwrap();
    let runner = RunnerBuilder::new(registry_with(dag)).build();

    let run_id = timeout(Duration::from_secs(5), runner.trigger_run("panicky", "t1"))
        .await
        .expect("run did not finish in time")
        .unwrap();

    let run = runner.run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.state(), RunState::Failed);
    let boom = run.instance("boom").unwrap();
    assert_eq!(boom.error().unwrap().kind, ErrorKind::Execution);
    assert!(boom.error().unwrap().message.contains("panicked"));
}

#[tokio::test]
async fn rerun_failed_reexecutes_only_the_failed_subgraph() {
    init_tracing();

    let extract_runs = Arc::new(AtomicU32::new(0));
    let load_runs = Arc::new(AtomicU32::new(0));
    let load_should_fail = Arc::new(AtomicBool::new(true));

    let load = {
        let load_runs = Arc::clone(&load_runs);
        let load_should_fail = Arc::clone(&load_should_fail);
        Task::from_fn("load", move |ctx| {
            let load_runs = Arc::clone(&load_runs);
            let load_should_fail = Arc::clone(&load_should_fail);
            async move {
                load_runs.fetch_add(1, Ordering::SeqCst);
                if load_should_fail.load(Ordering::SeqCst) {
                    Err(ExecutionError::msg("database unavailable"))
                } else {
                    // Upstream payload survives across the re-run even
                    // though extract does not re-execute.
                    ctx.upstream_result("extract")
                        .cloned()
                        .ok_or_else(|| ExecutionError::msg("missing extract payload"))
                }
            }
        })
    };

    let dag = DagBuilder::new("etl")
        .add_task(counting_task("extract", Arc::clone(&extract_runs)))
        .add_task(load)
        .add_edge("extract", "load")
        .build()
        .unwrap();
    let runner = RunnerBuilder::new(registry_with(dag)).build();

    let run_id = runner.trigger_run("etl", "t1").await.unwrap();
    let run = runner.run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.state(), RunState::Failed);
    assert_eq!(extract_runs.load(Ordering::SeqCst), 1);
    assert_eq!(load_runs.load(Ordering::SeqCst), 1);

    // Fix the downstream system, then re-run only the failed subset.
    load_should_fail.store(false, Ordering::SeqCst);
    let rerun_id = runner.rerun_failed("etl", "t1").await.unwrap();
    assert_eq!(rerun_id, run_id);

    let run = runner.run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.state(), RunState::Succeeded);
    assert_eq!(extract_runs.load(Ordering::SeqCst), 1, "extract not re-run");
    assert_eq!(load_runs.load(Ordering::SeqCst), 2);
    assert_eq!(
        run.instance("load").unwrap().result(),
        Some(&json!("extract"))
    );
}

#[tokio::test]
async fn rerun_of_fully_succeeded_run_is_a_noop() {
    init_tracing();

    let counter = Arc::new(AtomicU32::new(0));
    let dag = DagBuilder::new("done")
        .add_task(counting_task("a", Arc::clone(&counter)))
        .build()
        .unwrap();
    let runner = RunnerBuilder::new(registry_with(dag)).build();

    runner.trigger_run("done", "t1").await.unwrap();
    runner.rerun_failed("done", "t1").await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rerun_of_unknown_run_is_rejected() {
    init_tracing();

    let dag = DagBuilder::new("empty_history")
        .add_task(ok_task("a"))
        .build()
        .unwrap();
    let runner = RunnerBuilder::new(registry_with(dag)).build();

    let err = runner
        .rerun_failed("empty_history", "never-triggered")
        .await
        .unwrap_err();
    assert!(matches!(err, TriggerError::UnknownRun(_)));
}
