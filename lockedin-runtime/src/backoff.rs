//! Per-(user, provider) exponential backoff
//!
//! Independent of the queue's own retry counter: a provider that keeps
//! failing for one user is throttled across jobs, not just within one.
//!
//! - first failure waits `initial`, each further failure doubles, capped at `max`
//! - state expires on its own after twice the current delay
//! - a success clears it

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use lockedin_core::Provider;

use crate::cache::{get_json, CacheError, CacheUpdate, SharedCache};
use crate::clock::{deadline_after, SharedClock};

/// Attempts beyond this no longer grow the counter
pub const MAX_TRACKED_ATTEMPTS: u32 = 32;

/// Backoff timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 30,
            max_delay_secs: 3600,
        }
    }
}

impl BackoffConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    /// Delay after the given number of consecutive failures
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.initial_delay()
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay())
    }
}

/// Persisted throttle state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffState {
    pub attempts: u32,
    pub next_retry_at: DateTime<Utc>,
}

/// Cache key for one (user, provider) pair
pub fn backoff_key(provider: Provider, user_id: &str) -> String {
    format!("refresh:backoff:{}:{}", provider, user_id)
}

/// Backoff bookkeeping on top of the shared cache
pub struct BackoffStore {
    cache: SharedCache,
    clock: SharedClock,
    config: BackoffConfig,
}

impl BackoffStore {
    pub fn new(cache: SharedCache, clock: SharedClock, config: BackoffConfig) -> Self {
        Self {
            cache,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Current state, if the pair is being throttled
    pub async fn state(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<BackoffState>, CacheError> {
        let key = backoff_key(provider, user_id);
        match get_json::<BackoffState>(self.cache.as_ref(), &key).await {
            Ok(state) => Ok(state),
            Err(CacheError::Corrupt { reason, .. }) => {
                warn!("Ignoring corrupt backoff state {}: {}", key, reason);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a fetch may be attempted now
    pub async fn should_attempt(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<bool, CacheError> {
        Ok(match self.state(user_id, provider).await? {
            Some(state) => self.clock.now() >= state.next_retry_at,
            None => true,
        })
    }

    /// Count a failure and push the next allowed attempt out
    pub async fn record_failure(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<BackoffState, CacheError> {
        let key = backoff_key(provider, user_id);
        let now = self.clock.now();
        let config = self.config.clone();
        let written: Arc<Mutex<Option<BackoffState>>> = Arc::new(Mutex::new(None));
        let slot = written.clone();

        self.cache
            .update(
                &key,
                Box::new(move |current| {
                    let previous = current
                        .and_then(|raw| serde_json::from_str::<BackoffState>(raw).ok())
                        .map(|s| s.attempts)
                        .unwrap_or(0);
                    let attempts = (previous + 1).min(MAX_TRACKED_ATTEMPTS);
                    let delay = config.delay_for(attempts);
                    let state = BackoffState {
                        attempts,
                        next_retry_at: deadline_after(now, delay),
                    };

                    match serde_json::to_string(&state) {
                        Ok(value) => {
                            *slot.lock() = Some(state);
                            CacheUpdate::Set {
                                value,
                                ttl: delay.saturating_mul(2),
                            }
                        }
                        Err(_) => CacheUpdate::Keep,
                    }
                }),
            )
            .await?;

        let state = written.lock().take().ok_or_else(|| CacheError::Encode {
            key: key.clone(),
            reason: "backoff state could not be serialized".to_string(),
        })?;

        debug!(
            "Backoff {}: attempt {} next retry at {}",
            key, state.attempts, state.next_retry_at
        );
        Ok(state)
    }

    /// Clear throttling after a successful fetch
    pub async fn record_success(&self, user_id: &str, provider: Provider) -> Result<(), CacheError> {
        self.cache.delete(&backoff_key(provider, user_id)).await
    }
}
