//! Read-through cache of scoring weights
//!
//! Weights change rarely and are read on every verification, so they sit in
//! the shared cache under [`WEIGHTS_CACHE_KEY`] for a short TTL. Rows are
//! validated on the way in; a bad row fails the load and nothing is cached.
//! Concurrent misses may reload redundantly, which is harmless.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use lockedin_core::{validate_rows, WeightConfig, WeightPatch, WeightRow};

use crate::cache::{get_json, set_json, CacheError, SharedCache};
use crate::error::PipelineError;
use crate::store::SharedStore;

/// Cache key holding the validated weight list
pub const WEIGHTS_CACHE_KEY: &str = "scoring:weights";

/// TTL settings for a cached value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlConfig {
    pub ttl_secs: u64,
}

impl TtlConfig {
    pub fn new(ttl_secs: u64) -> Self {
        Self { ttl_secs }
    }

    /// Weights cache default: five minutes
    pub fn weights() -> Self {
        Self::new(300)
    }

    /// Refreshed signal default: one day
    pub fn signals() -> Self {
        Self::new(24 * 60 * 60)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Weight configuration in front of the store
pub struct WeightCache {
    store: SharedStore,
    cache: SharedCache,
    ttl: Duration,
}

impl WeightCache {
    pub fn new(store: SharedStore, cache: SharedCache, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    /// Current weights, from the cache when warm
    pub async fn get_weights(&self) -> Result<Vec<WeightConfig>, PipelineError> {
        match get_json::<Vec<WeightConfig>>(self.cache.as_ref(), WEIGHTS_CACHE_KEY).await {
            Ok(Some(weights)) => return Ok(weights),
            Ok(None) => {}
            Err(CacheError::Corrupt { reason, .. }) => {
                warn!("Discarding corrupt cached weights: {}", reason);
            }
            Err(e) => {
                // Cache trouble should not stop scoring while the store is up
                warn!("Weights cache read failed, loading from store: {}", e);
            }
        }

        let rows = self
            .store
            .load_weight_rows()
            .await
            .map_err(|e| PipelineError::Config(format!("failed to load weights: {}", e)))?;
        let weights = validate_rows(&rows)?;

        if let Err(e) = set_json(self.cache.as_ref(), WEIGHTS_CACHE_KEY, &weights, self.ttl).await {
            warn!("Failed to cache weights: {}", e);
        }

        debug!("Loaded {} weight rows from store", weights.len());
        Ok(weights)
    }

    /// Drop the cached weights so the next read goes to the store
    pub async fn invalidate(&self) -> Result<(), CacheError> {
        self.cache.delete(WEIGHTS_CACHE_KEY).await
    }

    /// Stored rows, descriptions included
    pub async fn list_rows(&self) -> Result<Vec<WeightRow>, PipelineError> {
        self.store
            .load_weight_rows()
            .await
            .map_err(|e| PipelineError::Config(format!("failed to load weights: {}", e)))
    }

    /// Apply an administrative edit and invalidate before returning
    pub async fn update_weight(
        &self,
        key: &str,
        patch: &WeightPatch,
    ) -> Result<WeightRow, PipelineError> {
        let rows = self.list_rows().await?;
        let current = rows
            .iter()
            .find(|r| r.key == key)
            .ok_or_else(|| PipelineError::not_found("weight", key))?;

        let updated = patch.apply(current)?;
        self.store.update_weight_row(updated.clone()).await?;
        self.invalidate().await?;

        info!(
            "Weight '{}' updated: weight={} threshold={} minimum={}",
            updated.key, updated.weight, updated.threshold, updated.minimum
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryCache};
    use crate::clock::ManualClock;
    use crate::store::{AdmissionStore, MemoryStore};
    use lockedin_core::default_weight_rows;
    use std::sync::Arc;

    struct Fixture {
        weights: WeightCache,
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let store = Arc::new(MemoryStore::with_weights(default_weight_rows()));
        let weights = WeightCache::new(store.clone(), cache.clone(), TtlConfig::weights().ttl());
        Fixture {
            weights,
            store,
            cache,
            clock,
        }
    }

    fn github_row(weight: f64) -> WeightRow {
        WeightRow {
            key: "github_contributions".to_string(),
            weight,
            threshold: 1000.0,
            minimum: 100.0,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_miss_loads_and_caches() {
        let f = fixture();

        let weights = f.weights.get_weights().await.unwrap();
        assert_eq!(weights.len(), 4);
        assert!(f.cache.get(WEIGHTS_CACHE_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hit_serves_stale_until_ttl() {
        let f = fixture();
        f.weights.get_weights().await.unwrap();

        // Direct store edit bypasses invalidation
        f.store.put_weight_row(github_row(0.9));
        let cached = f.weights.get_weights().await.unwrap();
        assert_eq!(cached[0].weight, 0.35);

        f.clock.advance(Duration::from_secs(300));
        let fresh = f.weights.get_weights().await.unwrap();
        assert_eq!(fresh[0].weight, 0.9);
    }

    #[tokio::test]
    async fn test_update_invalidates() {
        let f = fixture();
        f.weights.get_weights().await.unwrap();

        let patch = WeightPatch {
            weight: Some(0.5),
            ..Default::default()
        };
        let row = f.weights.update_weight("github_contributions", &patch).await.unwrap();
        assert_eq!(row.weight, 0.5);
        assert_eq!(row.threshold, 1000.0);

        assert!(f.cache.get(WEIGHTS_CACHE_KEY).await.unwrap().is_none());
        let weights = f.weights.get_weights().await.unwrap();
        assert_eq!(weights[0].weight, 0.5);
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_and_unknown() {
        let f = fixture();

        let bad = WeightPatch {
            weight: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(
            f.weights.update_weight("github_contributions", &bad).await,
            Err(PipelineError::Config(_))
        ));
        assert_eq!(f.store.load_weight_rows().await.unwrap()[0].weight, 0.35);

        let ok = WeightPatch {
            weight: Some(0.1),
            ..Default::default()
        };
        assert!(matches!(
            f.weights.update_weight("stackoverflow", &ok).await,
            Err(PipelineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_row_fails_load_and_caches_nothing() {
        let f = fixture();
        f.store.put_weight_row(github_row(f64::NAN));

        assert!(matches!(
            f.weights.get_weights().await,
            Err(PipelineError::Config(_))
        ));
        assert!(f.cache.get(WEIGHTS_CACHE_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_a_miss() {
        let f = fixture();
        f.cache
            .set(WEIGHTS_CACHE_KEY, "[{\"key\":1}]".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let weights = f.weights.get_weights().await.unwrap();
        assert_eq!(weights.len(), 4);
    }

    #[tokio::test]
    async fn test_cached_out_of_range_weight_is_revalidated() {
        let f = fixture();
        let tampered = r#"[{"key":"github_contributions","weight":7.0,"threshold":1000.0,"minimum":100.0}]"#;
        f.cache
            .set(WEIGHTS_CACHE_KEY, tampered.to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let weights = f.weights.get_weights().await.unwrap();
        assert_eq!(weights[0].weight, 0.35);
    }
}
