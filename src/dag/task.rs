// src/dag/task.rs

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::dag::TaskName;
use crate::errors::ExecutionError;
use crate::retry::RetryPolicy;

/// The task contract: an async callable taking an execution context and
/// returning success-with-payload or failure-with-error.
///
/// No other requirement is imposed on task bodies; the scheduler stays
/// domain-agnostic. Implementations must be `Send + Sync` because attempts
/// run on the executor's worker tasks.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, ctx: ExecutionContext) -> Result<Value, ExecutionError>;
}

/// Adapter so plain async closures can be used as handlers.
struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send + 'static,
{
    async fn execute(&self, ctx: ExecutionContext) -> Result<Value, ExecutionError> {
        (self.f)(ctx).await
    }
}

/// The smallest unit of work in a DAG.
///
/// Created at DAG-build time and immutable thereafter; dependency edges
/// live on the [`crate::dag::DagBuilder`], not on the task itself.
#[derive(Clone)]
pub struct Task {
    name: TaskName,
    handler: Arc<dyn TaskHandler>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
}

impl Task {
    /// Create a task from a name and a boxed handler.
    pub fn new(name: impl Into<TaskName>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            retry: RetryPolicy::default(),
            timeout: None,
        }
    }

    /// Create a task from a name and an async closure.
    pub fn from_fn<F, Fut>(name: impl Into<TaskName>, f: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ExecutionError>> + Send + 'static,
    {
        Self::new(name, Arc::new(FnHandler { f }))
    }

    /// Attach a retry policy (default: no retries).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attach a per-attempt timeout. A timed-out attempt is reported as a
    /// failure eligible for retry.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn handler(&self) -> Arc<dyn TaskHandler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
