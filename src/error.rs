//! Error types for the job queue crate.

use thiserror::Error;

/// Errors that can occur when constructing or shutting down a queue.
///
/// Per-job failures (handler errors, timeouts, missing handlers) are not
/// represented here: they are recorded on the [`Job`](crate::Job) itself and
/// surfaced through [`Queue::get_job`](crate::Queue::get_job).
#[derive(Debug, Error)]
pub enum QueueError {
    /// Queue requires a non-empty name.
    #[error("Invalid configuration: queue name must not be empty")]
    EmptyName,

    /// Queue requires at least one concurrency slot.
    #[error("Invalid configuration: concurrency must be greater than 0")]
    ConcurrencyMustBePositive,

    /// The scheduler task panicked.
    #[error("Scheduler panicked: {reason}")]
    SchedulerPanicked { reason: String },
}
