//! Priority job queue with bounded concurrency and retry backoff.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::QueueError;
use crate::handler::JobHandler;
use crate::job::{Job, JobOptions};

/// Configuration for a named queue.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use fable_queue::QueueConfig;
///
/// let config = QueueConfig::new("illustration")
///     .with_concurrency(2)
///     .with_job_timeout(Some(Duration::from_secs(120)));
/// ```
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Queue identifier, used in generated job ids and log context.
    pub name: String,

    /// Max number of jobs processed simultaneously.
    pub concurrency: usize,

    /// Wall-clock limit for a single handler attempt.
    ///
    /// A handler that exceeds the limit is aborted and the attempt counts as
    /// a retryable failure, so a hung handler cannot occupy a concurrency
    /// slot indefinitely. `None` disables the limit.
    pub job_timeout: Option<Duration>,

    /// Optional ceiling on the exponential retry backoff.
    pub max_backoff: Option<Duration>,

    /// Age past which terminal jobs are eligible for removal.
    pub retention: Duration,

    /// When set, a background sweep removes terminal jobs older than
    /// `retention` on this interval. When `None`, cleanup is manual via
    /// [`Queue::cleanup`].
    pub sweep_interval: Option<Duration>,
}

impl QueueConfig {
    /// Returns a configuration with sensible defaults.
    ///
    /// - `concurrency`: 1
    /// - `job_timeout`: 5 minutes
    /// - `max_backoff`: uncapped
    /// - `retention`: 24 hours
    /// - `sweep_interval`: disabled
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrency: 1,
            job_timeout: Some(Duration::from_secs(300)),
            max_backoff: None,
            retention: Duration::from_secs(24 * 60 * 60),
            sweep_interval: None,
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_job_timeout(mut self, job_timeout: Option<Duration>) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    #[must_use]
    pub fn with_max_backoff(mut self, max_backoff: Option<Duration>) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, sweep_interval: Option<Duration>) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }
}

/// Point-in-time counts for a queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub name: String,
    pub waiting: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub concurrency: usize,
}

/// A waiting job plus its scheduling metadata.
///
/// `due_at` lives on the tokio clock, not on the job record, so tests under
/// virtual time behave the same as production. `seq` is a monotonic counter
/// giving FIFO order among equal priorities; retried jobs get a fresh value
/// and so queue behind equal-priority peers.
struct WaitingEntry {
    job: Job,
    due_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct QueueState {
    waiting: Vec<WaitingEntry>,
    processing: HashMap<String, Job>,
    completed: HashMap<String, Job>,
    failed: HashMap<String, Job>,
    next_seq: u64,
}

struct Inner {
    config: QueueConfig,
    state: Mutex<QueueState>,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    wake: Notify,
}

impl Inner {
    /// Lock the shared state. Poisoning means a panic inside a critical
    /// section, which violates the scheduler's transition invariants; treat
    /// it as a programming-error assertion.
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("queue state poisoned")
    }

    fn backoff_for(&self, attempts: u32) -> Duration {
        let mut backoff = Duration::from_secs(2u64.saturating_pow(attempts));
        if let Some(cap) = self.config.max_backoff {
            backoff = backoff.min(cap);
        }
        backoff
    }

    /// Apply the outcome of a finished attempt: complete, retry, or fail.
    fn finish_job(&self, job_id: &str, outcome: JobOutcome, elapsed: Duration) {
        let mut state = self.lock_state();
        let Some(mut job) = state.processing.remove(job_id) else {
            // Should be unreachable: only the scheduler moves jobs out of
            // the processing set.
            error!(
                queue = %self.config.name,
                job_id = %job_id,
                "Finished job missing from processing set"
            );
            return;
        };

        match outcome {
            Ok(result) => {
                job.complete(result);
                info!(
                    queue = %self.config.name,
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Job completed"
                );
                state.completed.insert(job.id.clone(), job);
            }
            Err((message, trace)) => {
                if job.retries_remaining() {
                    let backoff = self.backoff_for(job.attempts);
                    warn!(
                        queue = %self.config.name,
                        job_id = %job.id,
                        job_type = %job.job_type,
                        attempt = job.attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %message,
                        "Job attempt failed; retry scheduled"
                    );
                    job.schedule_retry(backoff, message, trace);
                    let due_at = Instant::now() + backoff;
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    state.waiting.push(WaitingEntry { job, due_at, seq });
                } else {
                    error!(
                        queue = %self.config.name,
                        job_id = %job.id,
                        job_type = %job.job_type,
                        attempts = job.attempts,
                        error = %message,
                        "Job failed permanently"
                    );
                    job.fail(message, trace);
                    state.failed.insert(job.id.clone(), job);
                }
            }
        }
    }

    /// Remove terminal jobs older than `max_age`. Waiting and processing
    /// jobs are never touched.
    fn cleanup(&self, max_age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = chrono::Utc::now() - age;

        let mut state = self.lock_state();
        let before = state.completed.len() + state.failed.len();
        state
            .completed
            .retain(|_, job| !matches!(job.completed_at, Some(at) if at < cutoff));
        state
            .failed
            .retain(|_, job| !matches!(job.failed_at, Some(at) if at < cutoff));
        before - (state.completed.len() + state.failed.len())
    }
}

/// Attempt outcome: handler result, or an error message with optional trace.
type JobOutcome = Result<serde_json::Value, (String, Option<String>)>;

/// An in-process job queue with priority ordering, bounded concurrency, and
/// exponential retry backoff.
///
/// Each queue owns four job sets (waiting, processing, completed, failed)
/// and a single background scheduler task that dispatches due waiting jobs
/// in descending priority order, FIFO among ties, while the processing set
/// is below `concurrency`.
///
/// `Queue` is a cheap handle; clones share the same state. Construct queues
/// explicitly at application start and pass them by reference to the code
/// that enqueues work — handlers must be registered before jobs of their
/// type are enqueued, since a job dispatched without a handler fails
/// terminally.
///
/// # Example
///
/// ```rust,no_run
/// use fable_queue::{FnHandler, JobOptions, Queue, QueueConfig};
/// use serde_json::{json, Value};
///
/// # async fn example() -> Result<(), fable_queue::QueueError> {
/// let queue = Queue::new(QueueConfig::new("story").with_concurrency(2))?;
///
/// queue.register_handler(
///     "story.generate_text",
///     FnHandler::new(|payload: Value| async move {
///         // Call the text generation endpoint here.
///         Ok(payload)
///     }),
/// );
///
/// let job = queue.enqueue(
///     "story.generate_text",
///     json!({"story_id": "abc", "theme": "dragons"}),
///     JobOptions::new().with_priority(5),
/// );
/// println!("enqueued {}", job.id);
///
/// queue.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Queue {
    inner: Arc<Inner>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Queue {
    /// Create a queue and spawn its scheduler task.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::EmptyName`] or
    /// [`QueueError::ConcurrencyMustBePositive`] on invalid configuration.
    #[must_use = "queue must be stored to keep the scheduler running"]
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        if config.name.is_empty() {
            return Err(QueueError::EmptyName);
        }
        if config.concurrency == 0 {
            return Err(QueueError::ConcurrencyMustBePositive);
        }

        let sweep = config.sweep_interval.map(|every| (every, config.retention));

        let inner = Arc::new(Inner {
            config,
            state: Mutex::new(QueueState::default()),
            handlers: RwLock::new(HashMap::new()),
            wake: Notify::new(),
        });

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(run_scheduler(
            inner.clone(),
            shutdown_tx.subscribe(),
        )));

        if let Some((every, retention)) = sweep {
            tasks.push(tokio::spawn(run_sweeper(
                inner.clone(),
                every,
                retention,
                shutdown_tx.subscribe(),
            )));
        }

        Ok(Self {
            inner,
            shutdown_tx,
            tasks: Arc::new(Mutex::new(tasks)),
        })
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Associate a handler with a job type. Last registration wins.
    pub fn register_handler(&self, job_type: impl Into<String>, handler: impl JobHandler + 'static) {
        let job_type = job_type.into();
        debug!(
            queue = %self.inner.config.name,
            job_type = %job_type,
            "Handler registered"
        );
        self.inner
            .handlers
            .write()
            .expect("handler registry poisoned")
            .insert(job_type, Arc::new(handler));
    }

    /// Enqueue a job and wake the scheduler.
    ///
    /// Never blocks on execution: the returned [`Job`] is a snapshot taken
    /// at enqueue time; poll [`Queue::get_job`] for progress. The payload is
    /// passed through to the handler unvalidated.
    pub fn enqueue(
        &self,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Job {
        let job = Job::new(&self.inner.config.name, job_type, payload, options);
        let snapshot = job.clone();
        let due_at = Instant::now() + job.delay;

        {
            let mut state = self.inner.lock_state();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiting.push(WaitingEntry { job, due_at, seq });
        }

        debug!(
            queue = %self.inner.config.name,
            job_id = %snapshot.id,
            job_type = %snapshot.job_type,
            priority = snapshot.priority,
            delay_ms = snapshot.delay.as_millis() as u64,
            "Job enqueued"
        );
        self.inner.wake.notify_one();
        snapshot
    }

    /// Look up a job snapshot by id across all four sets.
    pub fn get_job(&self, id: &str) -> Option<Job> {
        let state = self.inner.lock_state();
        state
            .processing
            .get(id)
            .or_else(|| state.completed.get(id))
            .or_else(|| state.failed.get(id))
            .cloned()
            .or_else(|| {
                state
                    .waiting
                    .iter()
                    .find(|entry| entry.job.id == id)
                    .map(|entry| entry.job.clone())
            })
    }

    /// Point-in-time counts. No side effects.
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.lock_state();
        QueueStats {
            name: self.inner.config.name.clone(),
            waiting: state.waiting.len(),
            processing: state.processing.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
            concurrency: self.inner.config.concurrency,
        }
    }

    /// Remove completed/failed jobs older than `max_age`; returns the count
    /// removed. Waiting and processing jobs are never removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let removed = self.inner.cleanup(max_age);
        if removed > 0 {
            info!(
                queue = %self.inner.config.name,
                removed = removed,
                "Cleanup removed terminal jobs"
            );
        }
        removed
    }

    /// Gracefully shut down the queue.
    ///
    /// Signals the scheduler to stop admitting jobs and waits for in-flight
    /// handlers to finish.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SchedulerPanicked`] if a background task
    /// panicked.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        let _ = self.shutdown_tx.send(());

        let tasks = {
            let mut guard = self.tasks.lock().expect("task list poisoned");
            std::mem::take(&mut *guard)
        };
        for handle in tasks {
            handle.await.map_err(|e| QueueError::SchedulerPanicked {
                reason: e.to_string(),
            })?;
        }

        info!(queue = %self.inner.config.name, "Queue shut down");
        Ok(())
    }
}

/// Single-flight scheduler loop.
///
/// Dispatches due waiting jobs, then parks until the earliest due time, a
/// wakeup (enqueue or attempt completion), or shutdown. On shutdown the
/// in-flight attempts are drained before the task exits.
async fn run_scheduler(inner: Arc<Inner>, mut shutdown_rx: broadcast::Receiver<()>) {
    debug!(queue = %inner.config.name, "Scheduler starting");
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        let next_due = dispatch_ready(&inner, &mut in_flight);

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = inner.wake.notified() => {}
            _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)),
                if next_due.is_some() => {}
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(queue = %inner.config.name, error = %e, "Job task panicked");
                }
            }
        }
    }

    debug!(queue = %inner.config.name, "Scheduler draining in-flight jobs");
    while in_flight.join_next().await.is_some() {}
    debug!(queue = %inner.config.name, "Scheduler shut down");
}

/// Dispatch ready jobs up to the concurrency limit.
///
/// Returns the earliest due time among still-waiting jobs, if any, so the
/// scheduler knows how long it may park.
fn dispatch_ready(inner: &Arc<Inner>, in_flight: &mut JoinSet<()>) -> Option<Instant> {
    loop {
        let now = Instant::now();
        let mut state = inner.lock_state();

        if state.processing.len() >= inner.config.concurrency {
            // A completion wakeup will bring us back here.
            return None;
        }

        // Highest priority among due jobs, FIFO on ties.
        let mut best: Option<(usize, i32, u64)> = None;
        for (idx, entry) in state.waiting.iter().enumerate() {
            if entry.due_at > now {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, priority, seq)) => {
                    entry.job.priority > priority
                        || (entry.job.priority == priority && entry.seq < seq)
                }
            };
            if better {
                best = Some((idx, entry.job.priority, entry.seq));
            }
        }

        let Some((idx, _, _)) = best else {
            return state.waiting.iter().map(|entry| entry.due_at).min();
        };

        let mut job = state.waiting.swap_remove(idx).job;

        let handler = inner
            .handlers
            .read()
            .expect("handler registry poisoned")
            .get(&job.job_type)
            .cloned();

        let Some(handler) = handler else {
            // Not retryable: no amount of backoff produces a handler.
            job.start_attempt();
            warn!(
                queue = %inner.config.name,
                job_id = %job.id,
                job_type = %job.job_type,
                "No handler registered; job failed"
            );
            job.fail(
                format!("no handler registered for job type '{}'", job.job_type),
                None,
            );
            state.failed.insert(job.id.clone(), job);
            continue;
        };

        job.start_attempt();
        let snapshot = job.clone();
        state.processing.insert(job.id.clone(), job);
        drop(state);

        debug!(
            queue = %inner.config.name,
            job_id = %snapshot.id,
            job_type = %snapshot.job_type,
            attempt = snapshot.attempts,
            "Job started"
        );
        in_flight.spawn(run_attempt(inner.clone(), handler, snapshot));
    }
}

/// Run one handler attempt and record its outcome.
///
/// The handler future runs on its own task so a panic surfaces as a
/// `JoinError` instead of taking down the scheduler, and so a timed-out
/// attempt can be aborted.
async fn run_attempt(inner: Arc<Inner>, handler: Arc<dyn JobHandler>, job: Job) {
    let started = Instant::now();
    let job_id = job.id.clone();
    let payload = job.payload.clone();

    let mut handle = tokio::spawn(async move { handler.run(payload, &job).await });

    let outcome: JobOutcome = match inner.config.job_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => flatten_attempt(joined),
            Err(_) => {
                handle.abort();
                Err((
                    format!("handler timed out after {}ms", limit.as_millis()),
                    None,
                ))
            }
        },
        None => flatten_attempt(handle.await),
    };

    inner.finish_job(&job_id, outcome, started.elapsed());
    inner.wake.notify_one();
}

fn flatten_attempt(
    joined: Result<Result<serde_json::Value, crate::HandlerError>, tokio::task::JoinError>,
) -> JobOutcome {
    match joined {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err((e.to_string(), Some(format!("{e:?}")))),
        Err(e) if e.is_panic() => Err((format!("handler panicked: {e}"), None)),
        Err(e) => Err((format!("handler task cancelled: {e}"), None)),
    }
}

/// Periodic retention sweep for terminal jobs.
async fn run_sweeper(
    inner: Arc<Inner>,
    every: Duration,
    retention: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let removed = inner.cleanup(retention);
                if removed > 0 {
                    info!(
                        queue = %inner.config.name,
                        removed = removed,
                        "Retention sweep removed terminal jobs"
                    );
                }
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
