//! Handler trait for implementing job work.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::Job;

/// Shared error type returned by job handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Trait for implementing the work behind a job type.
///
/// One handler is registered per job type; the queue invokes it with the job
/// payload and a read-only snapshot of the job record (useful for reading
/// `id` or `attempts`). Handlers must not assume they run exactly once: a
/// failed or timed-out attempt is retried with backoff up to the job's
/// `max_attempts`.
///
/// # Example
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use fable_queue::{HandlerError, Job, JobHandler};
/// use serde_json::Value;
///
/// struct StoryTextHandler;
///
/// #[async_trait]
/// impl JobHandler for StoryTextHandler {
///     async fn run(&self, payload: Value, job: &Job) -> Result<Value, HandlerError> {
///         // Call the text generation endpoint, persist the draft, ...
///         let _ = (payload, job);
///         Ok(Value::String("story text".into()))
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute one attempt of a job.
    ///
    /// The returned value is recorded as the job's `result`. An `Err` counts
    /// as a failed attempt and is retried until `max_attempts` is reached.
    async fn run(&self, payload: Value, job: &Job) -> Result<Value, HandlerError>;
}

/// Adapter so plain async closures can be registered as handlers.
///
/// # Example
///
/// ```rust,no_run
/// use fable_queue::FnHandler;
/// use serde_json::Value;
///
/// let handler = FnHandler::new(|payload: Value| async move { Ok(payload) });
/// ```
pub struct FnHandler<F> {
    func: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn run(&self, payload: Value, _job: &Job) -> Result<Value, HandlerError> {
        (self.func)(payload).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
