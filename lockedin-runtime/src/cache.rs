//! TTL key-value cache
//!
//! The pipelines only need a handful of operations from the cache:
//! - `get` / `set` with a TTL / `delete`
//! - an atomic read-modify-write (`update`) used by the backoff store
//! - `purge_expired`, run periodically by the gate
//!
//! [`MemoryCache`] implements them on a `DashMap`, whose entry lock makes
//! `update` atomic per key. Values are JSON strings so any shared cache
//! (Redis and friends) can stand in behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::clock::{deadline_after, SharedClock, SystemClock};

/// Cache failures
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cached value under '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("failed to encode value for '{key}': {reason}")]
    Encode { key: String, reason: String },
}

/// Result of an atomic update closure
#[derive(Debug, Clone, PartialEq)]
pub enum CacheUpdate {
    /// Store a new value
    Set { value: String, ttl: Duration },
    /// Remove the key
    Delete,
    /// Leave the entry untouched
    Keep,
}

/// Closure run under the key's lock; receives the live value, if any
pub type UpdateFn = Box<dyn FnOnce(Option<&str>) -> CacheUpdate + Send>;

/// Key-value cache with per-entry TTLs
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Atomic read-modify-write of one key
    async fn update(&self, key: &str, apply: UpdateFn) -> Result<(), CacheError>;

    /// Drop expired entries, returning how many went. Stores that expire
    /// keys on their own leave the default.
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

/// Thread-safe reference to a cache
pub type SharedCache = Arc<dyn CacheStore>;

/// Read and decode a JSON value
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheStore,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match cache.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| CacheError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Encode and store a JSON value
pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let raw = serde_json::to_string(value).map_err(|e| CacheError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    cache.set(key, raw, ttl).await
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-process cache
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    clock: SharedClock,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryCache {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of stored entries, expired ones included until touched
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_for(&self, value: String, ttl: Duration) -> CacheEntry {
        CacheEntry {
            value,
            expires_at: deadline_after(self.clock.now(), ttl),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let entry = self.entry_for(value, ttl);
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn update(&self, key: &str, apply: UpdateFn) -> Result<(), CacheError> {
        let now = self.clock.now();

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let live = occupied.get().expires_at > now;
                let current = live.then(|| occupied.get().value.as_str());
                match apply(current) {
                    CacheUpdate::Set { value, ttl } => {
                        occupied.insert(self.entry_for(value, ttl));
                    }
                    CacheUpdate::Delete => {
                        occupied.remove();
                    }
                    CacheUpdate::Keep if !live => {
                        occupied.remove();
                    }
                    CacheUpdate::Keep => {}
                }
            }
            Entry::Vacant(vacant) => {
                if let CacheUpdate::Set { value, ttl } = apply(None) {
                    vacant.insert(self.entry_for(value, ttl));
                }
            }
        }

        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        Ok(before.saturating_sub(self.entries.len()))
    }
}
