//! Gate coordinator
//!
//! Wires the two job streams to their pipelines:
//! - `verification` queue → [`VerificationPipeline`] (score and decide)
//! - `refresh-data` queue → [`RefreshPipeline`] (keep provider values warm)
//!
//! The gate owns the worker tasks and a housekeeping task that sweeps
//! expired cache entries. Callers enqueue work, run backfills and edit
//! weights through it, then call [`Gate::shutdown`] to drain.

use anyhow::Context;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use lockedin_core::{ApplicationStatus, Provider, WeightPatch, WeightRow};
use lockedin_providers::ProviderRegistry;

use crate::backoff::BackoffStore;
use crate::cache::SharedCache;
use crate::clock::SharedClock;
use crate::config::GateConfig;
use crate::error::PipelineError;
use crate::queue::{DeadJob, Enqueued, JobQueue, QueueError, QueueStats};
use crate::refresh::{CachedSignal, RefreshJob, RefreshOutcome, RefreshPipeline, SignalCache};
use crate::store::SharedStore;
use crate::verification::{VerificationJob, VerificationOutcome, VerificationPipeline};
use crate::weights_cache::WeightCache;

pub const VERIFICATION_QUEUE: &str = "verification";
pub const REFRESH_QUEUE: &str = "refresh-data";

/// How often expired cache entries are swept
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared clients the gate is built on
#[derive(Clone)]
pub struct GateDeps {
    pub store: SharedStore,
    pub cache: SharedCache,
    pub clock: SharedClock,
    pub registry: Arc<ProviderRegistry>,
}

/// Result of a backfill run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Applications found in the requested status
    pub matched: usize,
    pub enqueued: usize,
    /// Applications that already had a live verification job
    pub duplicates: usize,
}

/// Counters for both queues
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateStats {
    pub verification: QueueStats,
    pub refresh: QueueStats,
}

/// The admission gate
pub struct Gate {
    config: GateConfig,
    store: SharedStore,
    cache: SharedCache,
    weights: Arc<WeightCache>,
    signals: Arc<SignalCache>,
    verification: Arc<VerificationPipeline>,
    refresh: Arc<RefreshPipeline>,
    verification_queue: Arc<JobQueue<VerificationJob>>,
    refresh_queue: Arc<JobQueue<RefreshJob>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Gate {
    /// Build the gate; workers are not running until [`start`](Self::start)
    pub fn new(config: GateConfig, deps: GateDeps) -> Result<Self, anyhow::Error> {
        config.validate().context("refusing to start with invalid configuration")?;

        let weights = Arc::new(WeightCache::new(
            deps.store.clone(),
            deps.cache.clone(),
            config.weights_cache.ttl(),
        ));
        let signals = Arc::new(SignalCache::new(
            deps.cache.clone(),
            config.signal_cache.ttl(),
        ));
        let backoff = Arc::new(BackoffStore::new(
            deps.cache.clone(),
            deps.clock.clone(),
            config.backoff.clone(),
        ));

        let mut verification = VerificationPipeline::new(
            deps.store.clone(),
            weights.clone(),
            deps.registry.clone(),
            config.scoring,
        );
        if config.fallback_to_cached_signals {
            info!("Falling back to refreshed signals when a live fetch fails");
            verification = verification.with_cached_fallback(signals.clone());
        }

        let refresh = RefreshPipeline::new(
            deps.store.clone(),
            deps.registry,
            signals.clone(),
            backoff,
            deps.clock,
        );

        let verification_queue = Arc::new(JobQueue::new(
            VERIFICATION_QUEUE,
            config.verification_queue.clone(),
        ));
        let refresh_queue = Arc::new(JobQueue::new(REFRESH_QUEUE, config.refresh_queue.clone()));

        Ok(Self {
            config,
            store: deps.store,
            cache: deps.cache,
            weights,
            signals,
            verification: Arc::new(verification),
            refresh: Arc::new(refresh),
            verification_queue,
            refresh_queue,
            workers: Mutex::new(Vec::new()),
            sweeper: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Spawn the worker pools. Calling it twice is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Gate already started");
            return;
        }

        let mut handles = self.verification_queue.start(self.verification.clone());
        handles.extend(self.refresh_queue.start(self.refresh.clone()));

        info!(
            "Gate started: {} verification workers, {} refresh workers",
            self.config.verification_queue.concurrency, self.config.refresh_queue.concurrency
        );
        self.workers.lock().extend(handles);
        *self.sweeper.lock() = Some(spawn_cache_sweeper(self.cache.clone()));
    }

    /// Queue a verification; at most one live job per application
    pub fn enqueue_verification(&self, application_id: &str) -> Result<Enqueued, QueueError> {
        let job = VerificationJob::new(application_id);
        let key = job.idempotency_key();
        self.verification_queue.add(job, Some(key))
    }

    /// Queue a refresh. Refreshes are not deduplicated; repeated requests
    /// for a failing pair are absorbed by its backoff state.
    pub fn enqueue_refresh(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Enqueued, QueueError> {
        self.refresh_queue.add(RefreshJob::new(user_id, provider), None)
    }

    /// Re-score every application in `status` (under review by default)
    pub async fn backfill(
        &self,
        status: Option<ApplicationStatus>,
    ) -> Result<BackfillReport, anyhow::Error> {
        let status = status.unwrap_or(ApplicationStatus::UnderReview);
        let ids = self
            .store
            .application_ids_with_status(status)
            .await
            .with_context(|| format!("failed to list {} applications", status))?;

        let mut report = BackfillReport {
            matched: ids.len(),
            ..Default::default()
        };
        for id in &ids {
            match self.enqueue_verification(id)? {
                Enqueued::Added(_) => report.enqueued += 1,
                Enqueued::Duplicate(_) => report.duplicates += 1,
            }
        }

        info!(
            "Backfill of {} applications: {} enqueued, {} already queued",
            status, report.enqueued, report.duplicates
        );
        Ok(report)
    }

    /// Score an application inline, bypassing the queue
    pub async fn verify_now(&self, application_id: &str) -> Result<VerificationOutcome, PipelineError> {
        self.verification.verify(application_id).await
    }

    /// Refresh one signal inline, bypassing the queue
    pub async fn refresh_now(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<RefreshOutcome, PipelineError> {
        self.refresh.refresh(user_id, provider).await
    }

    /// Last refreshed value for a user and provider
    pub async fn cached_signal(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<CachedSignal>, PipelineError> {
        Ok(self.signals.get(user_id, provider).await?)
    }

    pub async fn list_weights(&self) -> Result<Vec<WeightRow>, PipelineError> {
        self.weights.list_rows().await
    }

    /// Edit a weight row; the cached weights are dropped before this returns
    pub async fn update_weight(
        &self,
        key: &str,
        patch: &WeightPatch,
    ) -> Result<WeightRow, PipelineError> {
        self.weights.update_weight(key, patch).await
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            verification: self.verification_queue.stats(),
            refresh: self.refresh_queue.stats(),
        }
    }

    pub fn dead_verifications(&self) -> Vec<DeadJob<VerificationJob>> {
        self.verification_queue.dead_jobs()
    }

    pub fn dead_refreshes(&self) -> Vec<DeadJob<RefreshJob>> {
        self.refresh_queue.dead_jobs()
    }

    /// Give a dead verification a fresh attempt budget
    pub fn retry_dead_verification(&self, job_id: &str) -> Result<Enqueued, QueueError> {
        self.verification_queue.requeue_dead(job_id)
    }

    pub fn retry_dead_refresh(&self, job_id: &str) -> Result<Enqueued, QueueError> {
        self.refresh_queue.requeue_dead(job_id)
    }

    /// Wait until both queues have nothing waiting, scheduled or running
    pub async fn wait_idle(&self) {
        tokio::join!(
            self.verification_queue.wait_idle(),
            self.refresh_queue.wait_idle()
        );
    }

    /// Stop accepting jobs and wait for workers to finish their current job
    pub async fn shutdown(&self) {
        self.verification_queue.close();
        self.refresh_queue.close();
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }

        let handles = std::mem::take(&mut *self.workers.lock());
        debug!("Waiting for {} workers", handles.len());
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("Worker ended abnormally: {}", e);
            }
        }

        let stats = self.stats();
        info!(
            "Gate stopped: {} verifications completed, {} refreshes completed",
            stats.verification.completed, stats.refresh.completed
        );
    }
}

fn spawn_cache_sweeper(cache: SharedCache) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(CACHE_SWEEP_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            match cache.purge_expired().await {
                Ok(0) => {}
                Ok(swept) => debug!("Swept {} expired cache entries", swept),
                Err(e) => warn!("Cache sweep failed: {}", e),
            }
        }
    })
}
