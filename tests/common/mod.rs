// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};

use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use dagrun::{ExecutionError, Task};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing**
///   tests (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g. `DAGRUN_LOG=debug cargo test`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env("DAGRUN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Task that succeeds immediately, returning its own name as payload.
pub fn ok_task(name: &str) -> Task {
    let payload = json!(name);
    Task::from_fn(name, move |_ctx| {
        let payload = payload.clone();
        async move { Ok(payload) }
    })
}

/// Task that always fails.
pub fn failing_task(name: &str) -> Task {
    let message = format!("{name} exploded");
    Task::from_fn(name, move |_ctx| {
        let message = message.clone();
        async move { Err(ExecutionError::msg(message)) }
    })
}

/// Task that records its name into `log` each time it runs, then succeeds.
pub fn recording_task(name: &str, log: Arc<Mutex<Vec<String>>>) -> Task {
    Task::from_fn(name, move |ctx| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(ctx.task.clone());
            Ok(json!(ctx.task))
        }
    })
}

/// Task that fails its first `fail_times` executions, then succeeds.
/// `counter` observes the total number of executions.
pub fn flaky_task(name: &str, fail_times: u32, counter: Arc<AtomicU32>) -> Task {
    Task::from_fn(name, move |ctx| {
        let counter = Arc::clone(&counter);
        async move {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= fail_times {
                Err(ExecutionError::msg(format!(
                    "{} flaked on attempt {attempt}",
                    ctx.task
                )))
            } else {
                Ok(json!({ "task": ctx.task, "attempt": attempt }))
            }
        }
    })
}

/// Task that counts its executions and always succeeds.
pub fn counting_task(name: &str, counter: Arc<AtomicU32>) -> Task {
    Task::from_fn(name, move |ctx| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!(ctx.task))
        }
    })
}
