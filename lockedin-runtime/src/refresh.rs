//! Refresh pipeline
//!
//! Keeps one provider's raw value for one user warm in the signal cache.
//! Never touches application or user status. Failures feed the backoff
//! store and go back to the queue; a throttled pair is a successful no-op.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use lockedin_core::{Provider, SignalInput};
use lockedin_providers::ProviderRegistry;

use crate::backoff::BackoffStore;
use crate::cache::{get_json, set_json, CacheError, SharedCache};
use crate::clock::SharedClock;
use crate::error::PipelineError;
use crate::queue::{Job, JobHandler};
use crate::store::SharedStore;

/// Refresh queue payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshJob {
    pub user_id: String,
    pub provider: Provider,
}

impl RefreshJob {
    pub fn new(user_id: impl Into<String>, provider: Provider) -> Self {
        Self {
            user_id: user_id.into(),
            provider,
        }
    }
}

/// Signal value as kept in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSignal {
    pub key: String,
    pub raw_value: f64,
    pub fetched_at: DateTime<Utc>,
}

impl CachedSignal {
    pub fn to_input(&self) -> SignalInput {
        SignalInput::new(self.key.clone(), self.raw_value)
    }
}

/// Cache key for a refreshed signal
pub fn signal_key(provider: Provider, user_id: &str) -> String {
    format!("signal:{}:{}", provider, user_id)
}

/// Last known provider values per user
pub struct SignalCache {
    cache: SharedCache,
    ttl: Duration,
}

impl SignalCache {
    pub fn new(cache: SharedCache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub async fn get(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<CachedSignal>, CacheError> {
        get_json(self.cache.as_ref(), &signal_key(provider, user_id)).await
    }

    pub async fn put(
        &self,
        user_id: &str,
        provider: Provider,
        signal: &CachedSignal,
    ) -> Result<(), CacheError> {
        set_json(self.cache.as_ref(), &signal_key(provider, user_id), signal, self.ttl).await
    }
}

/// What a refresh run did
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Refreshed(CachedSignal),
    /// The pair is backing off; nothing was fetched
    Throttled,
    /// The user has no handle for this provider
    NoHandle,
}

/// Refreshes one (user, provider) signal
pub struct RefreshPipeline {
    store: SharedStore,
    registry: Arc<ProviderRegistry>,
    signals: Arc<SignalCache>,
    backoff: Arc<BackoffStore>,
    clock: SharedClock,
}

impl RefreshPipeline {
    pub fn new(
        store: SharedStore,
        registry: Arc<ProviderRegistry>,
        signals: Arc<SignalCache>,
        backoff: Arc<BackoffStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            registry,
            signals,
            backoff,
            clock,
        }
    }

    pub async fn refresh(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<RefreshOutcome, PipelineError> {
        if !self.backoff.should_attempt(user_id, provider).await? {
            debug!("Backoff active for {}:{}, skipping", provider, user_id);
            return Ok(RefreshOutcome::Throttled);
        }

        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("user", user_id))?;

        let Some(handle) = user.handle_for(provider) else {
            debug!("User {} has no {} handle", user_id, provider);
            return Ok(RefreshOutcome::NoHandle);
        };

        let signal = match self
            .registry
            .fetch(provider, handle, user.credential_for(provider))
            .await
        {
            Ok(signal) => signal,
            Err(e) => {
                match self.backoff.record_failure(user_id, provider).await {
                    Ok(state) => warn!(
                        "Refresh {}:{} failed (backoff attempt {}): {}",
                        provider, user_id, state.attempts, e
                    ),
                    Err(cache_err) => warn!(
                        "Refresh {}:{} failed and backoff was not recorded: {}",
                        provider, user_id, cache_err
                    ),
                }
                return Err(e.into());
            }
        };

        let cached = CachedSignal {
            key: signal.key,
            raw_value: signal.raw_value,
            fetched_at: self.clock.now(),
        };
        self.signals.put(user_id, provider, &cached).await?;
        self.backoff.record_success(user_id, provider).await?;

        info!("Refreshed {} data for {}: {}", provider, user_id, cached.raw_value);
        Ok(RefreshOutcome::Refreshed(cached))
    }
}

#[async_trait]
impl JobHandler<RefreshJob> for RefreshPipeline {
    async fn handle(&self, job: &Job<RefreshJob>) -> Result<(), PipelineError> {
        self.refresh(&job.payload.user_id, job.payload.provider)
            .await
            .map(|_| ())
    }
}
