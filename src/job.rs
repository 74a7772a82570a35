//! Job records tracked by the queue.
//!
//! A [`Job`] is a unit of deferred work: an opaque JSON payload tagged with a
//! type string that selects a registered handler. The queue mutates the
//! record as it moves through its lifecycle; handlers only ever see a
//! read-only snapshot.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a job.
///
/// A job is in exactly one status at any time, and the queue keeps it in the
/// internal set matching that status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be dispatched (possibly delayed for retry backoff).
    Waiting,
    /// A handler is currently running this job.
    Processing,
    /// The handler returned successfully.
    Completed,
    /// All attempts are exhausted, or the job type had no handler.
    Failed,
}

impl JobStatus {
    /// Returns true for states the job can never leave.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Waiting => "waiting",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Per-job settings supplied at enqueue time.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use fable_queue::JobOptions;
///
/// let opts = JobOptions::new()
///     .with_priority(5)
///     .with_max_attempts(5)
///     .with_delay(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Higher priority jobs are dispatched first among due waiting jobs.
    pub priority: i32,
    /// Ceiling on handler invocations before the job fails terminally.
    pub max_attempts: u32,
    /// Delay before the job first becomes eligible to run.
    pub delay: Duration,
}

impl Default for JobOptions {
    /// Priority 0, 3 attempts, no initial delay.
    fn default() -> Self {
        Self {
            priority: 0,
            max_attempts: 3,
            delay: Duration::ZERO,
        }
    }
}

impl JobOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A unit of deferred work tracked by a queue.
///
/// Jobs are created by [`Queue::enqueue`](crate::Queue::enqueue) and owned by
/// the queue; callers and handlers receive snapshots. Wall-clock timestamps
/// use `chrono` so job records serialize cleanly for status endpoints;
/// scheduling itself runs on the tokio clock and is not part of this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique id: queue name, enqueue timestamp, random suffix.
    pub id: String,
    /// Tag selecting the registered handler.
    pub job_type: String,
    /// Opaque work data; the queue never inspects or validates it.
    pub payload: serde_json::Value,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Higher runs first among due waiting jobs.
    pub priority: i32,
    /// Handler invocations so far.
    pub attempts: u32,
    /// Ceiling on handler invocations.
    pub max_attempts: u32,
    /// Current scheduling delay: the initial delay at enqueue time, then the
    /// retry backoff after each failure.
    pub delay: Duration,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the most recent attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job completed successfully.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the job failed terminally.
    pub failed_at: Option<DateTime<Utc>>,
    /// Handler result on success.
    pub result: Option<serde_json::Value>,
    /// Error message on terminal failure (also set while retrying).
    pub error: Option<String>,
    /// Debug representation of the error, when one is available.
    pub error_trace: Option<String>,
}

impl Job {
    /// Create a new waiting job for the given queue.
    pub(crate) fn new(
        queue_name: &str,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Self {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}-{}-{}", queue_name, now.timestamp_millis(), &suffix[..8]),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Waiting,
            priority: options.priority,
            attempts: 0,
            max_attempts: options.max_attempts,
            delay: options.delay,
            created_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            result: None,
            error: None,
            error_trace: None,
        }
    }

    /// Mark the start of an attempt.
    pub(crate) fn start_attempt(&mut self) {
        self.status = JobStatus::Processing;
        self.attempts += 1;
        self.started_at = Some(Utc::now());
    }

    /// Record a successful result.
    pub(crate) fn complete(&mut self, result: serde_json::Value) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    /// Record a terminal failure.
    pub(crate) fn fail(&mut self, error: impl Into<String>, trace: Option<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.error_trace = trace;
        self.failed_at = Some(Utc::now());
    }

    /// Put the job back in the waiting state with a retry backoff delay.
    pub(crate) fn schedule_retry(
        &mut self,
        backoff: Duration,
        error: impl Into<String>,
        trace: Option<String>,
    ) {
        self.status = JobStatus::Waiting;
        self.delay = backoff;
        self.error = Some(error.into());
        self.error_trace = trace;
    }

    /// Whether more attempts are allowed after a failure.
    #[inline]
    pub(crate) fn retries_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_default_has_sensible_values() {
        let opts = JobOptions::default();
        assert_eq!(opts.priority, 0);
        assert_eq!(opts.max_attempts, 3);
        assert_eq!(opts.delay, Duration::ZERO);
    }

    #[test]
    fn options_builder_chain() {
        let opts = JobOptions::new()
            .with_priority(7)
            .with_max_attempts(5)
            .with_delay(Duration::from_secs(2));
        assert_eq!(opts.priority, 7);
        assert_eq!(opts.max_attempts, 5);
        assert_eq!(opts.delay, Duration::from_secs(2));
    }

    #[test]
    fn options_max_attempts_floor_is_one() {
        let opts = JobOptions::new().with_max_attempts(0);
        assert_eq!(opts.max_attempts, 1);
    }

    #[test]
    fn new_job_is_waiting_with_zero_attempts() {
        let job = Job::new("story", "story.generate_text", json!({"title": "x"}), JobOptions::default());
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempts, 0);
        assert!(job.started_at.is_none());
        assert!(job.result.is_none());
        assert!(job.id.starts_with("story-"));
    }

    #[test]
    fn job_ids_are_unique() {
        let a = Job::new("q", "t", json!(null), JobOptions::default());
        let b = Job::new("q", "t", json!(null), JobOptions::default());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn lifecycle_transitions_set_timestamps() {
        let mut job = Job::new("q", "t", json!(null), JobOptions::default());

        job.start_attempt();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
        assert!(job.started_at.is_some());

        job.complete(json!("done"));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!("done")));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn retry_returns_job_to_waiting_with_backoff() {
        let mut job = Job::new("q", "t", json!(null), JobOptions::default());
        job.start_attempt();
        job.schedule_retry(Duration::from_secs(2), "boom", None);

        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.delay, Duration::from_secs(2));
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.retries_remaining());
    }

    #[test]
    fn fail_is_terminal() {
        let mut job = Job::new("q", "t", json!(null), JobOptions::new().with_max_attempts(1));
        job.start_attempt();
        job.fail("boom", Some("trace".into()));

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.status.is_terminal());
        assert!(job.failed_at.is_some());
        assert!(!job.retries_remaining());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&JobStatus::Waiting).unwrap(), "\"waiting\"");
        assert_eq!(serde_json::to_string(&JobStatus::Failed).unwrap(), "\"failed\"");
        assert_eq!(JobStatus::Processing.to_string(), "processing");
    }
}
