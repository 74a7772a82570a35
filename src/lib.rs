//! An in-process job queue with priority ordering, bounded concurrency, and
//! exponential retry backoff.
//!
//! This crate sequences the asynchronous work behind storybook generation:
//! AI text generation, illustration rendering, narration synthesis, and
//! delivery notifications. Application code registers one handler per job
//! type, enqueues JSON payloads, and polls job status; the queue takes care
//! of priority dispatch, retries, timeouts, and retention cleanup.
//!
//! # Architecture
//!
//! ```text
//! enqueue(type, payload) ──► waiting ──► processing ──► completed
//!                               ▲            │
//!                               └── backoff ─┴────────► failed
//! ```
//!
//! Each [`Queue`] owns a single scheduler task. Waiting jobs are dispatched
//! in descending priority order (FIFO among equal priorities) while fewer
//! than `concurrency` jobs are processing. A failed attempt is re-inserted
//! with a `2^attempts`-second delay until `max_attempts` is exhausted.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use fable_queue::{FnHandler, JobOptions, Queue, QueueConfig};
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fable_queue::QueueError> {
//!     let queue = Queue::new(QueueConfig::new("story").with_concurrency(2))?;
//!
//!     queue.register_handler(
//!         "story.generate_text",
//!         FnHandler::new(|payload: Value| async move {
//!             // Call the text generation endpoint, persist the draft...
//!             Ok(payload)
//!         }),
//!     );
//!
//!     let job = queue.enqueue(
//!         "story.generate_text",
//!         json!({"story_id": "abc", "theme": "dragons"}),
//!         JobOptions::new().with_priority(5),
//!     );
//!
//!     // Poll for progress; handler failures never propagate here.
//!     let _status = queue.get_job(&job.id);
//!
//!     queue.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod error;
mod handler;
mod job;
mod pipeline;
mod queue;

pub use error::QueueError;
pub use handler::{FnHandler, HandlerError, JobHandler};
pub use job::{Job, JobOptions, JobStatus};
pub use pipeline::{job_types, GenerationPipeline};
pub use queue::{Queue, QueueConfig, QueueStats};

// Re-export async_trait for convenience when implementing JobHandler
pub use async_trait::async_trait;
