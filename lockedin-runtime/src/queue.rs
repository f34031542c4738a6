//! In-process job queue and worker pool
//!
//! At-least-once delivery with:
//! - a fixed number of worker tasks per queue
//! - optional sliding-window rate limiting of job starts
//! - retry with exponential delay (`base × 2^(attempts_made − 1)`)
//! - a stall timeout per attempt, counted as a retryable failure
//! - handler panics caught and retried like any other failure
//! - dedup by idempotency key until the job is terminal
//! - a bounded dead set for exhausted jobs
//!
//! Non-retryable failures ([`PipelineError::is_retryable`]) are dropped with
//! a log rather than dead-lettered.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::limiter::{LimiterConfig, SlidingWindowLimiter};

/// Queue tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Worker tasks
    pub concurrency: usize,
    /// Total attempts per job, first run included
    pub attempts: u32,
    /// Delay before the first retry; doubles per attempt
    pub retry_base_secs: u64,
    pub limiter: Option<LimiterConfig>,
    /// Upper bound on one attempt
    pub stall_timeout_secs: u64,
    /// Exhausted jobs kept for inspection; oldest evicted first
    pub dead_letter_capacity: usize,
}

impl QueueConfig {
    /// Defaults for the verification queue
    pub fn verification() -> Self {
        Self {
            concurrency: 5,
            attempts: 3,
            retry_base_secs: 5,
            limiter: Some(LimiterConfig::new(10, 60)),
            stall_timeout_secs: 60,
            dead_letter_capacity: 5000,
        }
    }

    /// Defaults for the refresh queue
    pub fn refresh() -> Self {
        Self {
            concurrency: 3,
            attempts: 5,
            retry_base_secs: 10,
            limiter: Some(LimiterConfig::new(5, 60)),
            stall_timeout_secs: 60,
            dead_letter_capacity: 2000,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_retry_base(mut self, secs: u64) -> Self {
        self.retry_base_secs = secs;
        self
    }

    pub fn with_limiter(mut self, limiter: Option<LimiterConfig>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_stall_timeout(mut self, secs: u64) -> Self {
        self.stall_timeout_secs = secs;
        self
    }

    pub fn with_dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_letter_capacity = capacity;
        self
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs.max(1))
    }

    /// Delay before the next attempt, given attempts already made
    pub fn retry_delay(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(31);
        Duration::from_secs(self.retry_base_secs).saturating_mul(1u32 << exponent)
    }
}

/// Queue-level failures
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue '{0}' is closed")]
    Closed(String),

    #[error("job '{0}' is not in the dead set")]
    NotDead(String),
}

/// A unit of work
#[derive(Debug, Clone)]
pub struct Job<P> {
    /// Idempotency key, or a generated id
    pub id: String,
    pub payload: P,
    /// Attempts finished before the current one
    pub attempts_made: u32,
}

/// A job that ran out of attempts
#[derive(Debug, Clone)]
pub struct DeadJob<P> {
    pub job: Job<P>,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Result of [`JobQueue::add`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    Added(String),
    /// A job with this key is already waiting, running or scheduled for retry
    Duplicate(String),
}

impl Enqueued {
    pub fn is_added(&self) -> bool {
        matches!(self, Enqueued::Added(_))
    }

    pub fn id(&self) -> &str {
        match self {
            Enqueued::Added(id) | Enqueued::Duplicate(id) => id,
        }
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub dead: usize,
    pub completed: u64,
    pub retried: u64,
    /// Non-retryable failures, dropped
    pub discarded: u64,
    /// Jobs moved to the dead set
    pub exhausted: u64,
}

/// Processes one job attempt
#[async_trait]
pub trait JobHandler<P>: Send + Sync {
    async fn handle(&self, job: &Job<P>) -> Result<(), PipelineError>;
}

struct QueueState<P> {
    waiting: VecDeque<Job<P>>,
    delayed: Vec<(Instant, Job<P>)>,
    keys: HashSet<String>,
    dead: VecDeque<DeadJob<P>>,
    stats: QueueStats,
    closed: bool,
}

impl<P> QueueState<P> {
    fn new() -> Self {
        Self {
            waiting: VecDeque::new(),
            delayed: Vec::new(),
            keys: HashSet::new(),
            dead: VecDeque::new(),
            stats: QueueStats::default(),
            closed: false,
        }
    }

    fn promote_due(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].0 <= now {
                let (_, job) = self.delayed.swap_remove(i);
                self.waiting.push_back(job);
            } else {
                i += 1;
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.delayed.is_empty() && self.stats.active == 0
    }
}

/// Named job queue with its worker pool
pub struct JobQueue<P> {
    name: String,
    config: QueueConfig,
    limiter: Option<SlidingWindowLimiter>,
    state: Mutex<QueueState<P>>,
    wake: Notify,
    idle: Notify,
}

impl<P> JobQueue<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        let limiter = config.limiter.as_ref().map(SlidingWindowLimiter::from_config);
        Self {
            name: name.into(),
            config,
            limiter,
            state: Mutex::new(QueueState::new()),
            wake: Notify::new(),
            idle: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue a payload. With a key, a second add while the first job is
    /// still live returns [`Enqueued::Duplicate`].
    pub fn add(&self, payload: P, key: Option<String>) -> Result<Enqueued, QueueError> {
        let id = key.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(QueueError::Closed(self.name.clone()));
            }
            if !state.keys.insert(id.clone()) {
                debug!("[{}] Duplicate job {}", self.name, id);
                return Ok(Enqueued::Duplicate(id));
            }
            state.waiting.push_back(Job {
                id: id.clone(),
                payload,
                attempts_made: 0,
            });
        }

        self.wake.notify_one();
        debug!("[{}] Enqueued job {}", self.name, id);
        Ok(Enqueued::Added(id))
    }

    /// Spawn the worker pool
    pub fn start(self: &Arc<Self>, handler: Arc<dyn JobHandler<P>>) -> Vec<JoinHandle<()>> {
        let workers = self.config.concurrency.max(1);
        info!("[{}] Starting {} workers", self.name, workers);

        (0..workers)
            .map(|worker| {
                let queue = Arc::clone(self);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move { queue.run_worker(worker, handler).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker: usize, handler: Arc<dyn JobHandler<P>>) {
        while let Some(job) = self.next_job().await {
            if let Some(limiter) = &self.limiter {
                limiter.acquire().await;
            }

            debug!(
                "[{}] Worker {} running {} (attempt {})",
                self.name,
                worker,
                job.id,
                job.attempts_made + 1
            );

            let stall = self.config.stall_timeout();
            let attempt = AssertUnwindSafe(handler.handle(&job)).catch_unwind();
            let result = match tokio::time::timeout(stall, attempt).await {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => Err(PipelineError::Panicked(panic_message(panic.as_ref()))),
                Err(_) => Err(PipelineError::Stalled(stall)),
            };

            self.finish(job, result);
        }

        debug!("[{}] Worker {} stopped", self.name, worker);
    }

    /// Wait for the next runnable job; `None` once the queue is closed
    async fn next_job(&self) -> Option<Job<P>> {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                state.promote_due(Instant::now());
                if let Some(job) = state.waiting.pop_front() {
                    state.stats.active += 1;
                    return Some(job);
                }
                state.delayed.iter().map(|(at, _)| *at).min()
            };

            match next_due {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    fn finish(&self, mut job: Job<P>, result: Result<(), PipelineError>) {
        let mut rescheduled = false;
        let idle = {
            let mut state = self.state.lock();
            state.stats.active = state.stats.active.saturating_sub(1);

            match result {
                Ok(()) => {
                    state.keys.remove(&job.id);
                    state.stats.completed += 1;
                    debug!("[{}] Job {} completed", self.name, job.id);
                }
                Err(e) => {
                    job.attempts_made += 1;

                    if !e.is_retryable() {
                        warn!("[{}] Job {} dropped: {}", self.name, job.id, e);
                        state.keys.remove(&job.id);
                        state.stats.discarded += 1;
                    } else if job.attempts_made < self.config.attempts {
                        let delay = self.config.retry_delay(job.attempts_made);
                        warn!(
                            "[{}] Job {} failed (attempt {}), retrying in {:?}: {}",
                            self.name, job.id, job.attempts_made, delay, e
                        );
                        state.stats.retried += 1;
                        state.delayed.push((Instant::now() + delay, job));
                        rescheduled = true;
                    } else {
                        error!(
                            "[{}] Job {} failed after {} attempts: {}",
                            self.name, job.id, job.attempts_made, e
                        );
                        state.keys.remove(&job.id);
                        state.stats.exhausted += 1;
                        if self.config.dead_letter_capacity > 0 {
                            if state.dead.len() >= self.config.dead_letter_capacity {
                                state.dead.pop_front();
                            }
                            state.dead.push_back(DeadJob {
                                job,
                                error: e.to_string(),
                                failed_at: Utc::now(),
                            });
                        }
                    }
                }
            }

            state.is_idle()
        };

        if rescheduled {
            self.wake.notify_one();
        }
        if idle {
            self.idle.notify_waiters();
        }
    }

    /// Wait until nothing is waiting, scheduled or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting jobs; workers exit after their current job
    pub fn close(&self) {
        let abandoned = {
            let mut state = self.state.lock();
            state.closed = true;
            state.waiting.len() + state.delayed.len()
        };
        if abandoned > 0 {
            warn!("[{}] Closing with {} unstarted jobs", self.name, abandoned);
        }
        self.wake.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            waiting: state.waiting.len(),
            delayed: state.delayed.len(),
            dead: state.dead.len(),
            ..state.stats.clone()
        }
    }

    /// Snapshot of the dead set, oldest first
    pub fn dead_jobs(&self) -> Vec<DeadJob<P>> {
        self.state.lock().dead.iter().cloned().collect()
    }

    /// Move a dead job back to the queue with a fresh attempt budget
    pub fn requeue_dead(&self, id: &str) -> Result<Enqueued, QueueError> {
        let payload = {
            let mut state = self.state.lock();
            let index = state
                .dead
                .iter()
                .position(|d| d.job.id == id)
                .ok_or_else(|| QueueError::NotDead(id.to_string()))?;
            state.dead.remove(index).map(|d| d.job.payload)
        };

        match payload {
            Some(payload) => self.add(payload, Some(id.to_string())),
            None => Err(QueueError::NotDead(id.to_string())),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
