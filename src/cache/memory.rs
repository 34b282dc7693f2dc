//! In-process TTL backend on top of moka.

use super::{BackendError, CacheBackend};
use crate::config::CacheSettings;
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct StoredValue {
    payload: Arc<str>,
    stored_at: Instant,
    ttl: Duration,
}

impl StoredValue {
    fn remaining(&self) -> Option<Duration> {
        self.ttl.checked_sub(self.stored_at.elapsed()).filter(|left| !left.is_zero())
    }
}

/// Each entry expires after the TTL it was written with. Overwrites restart the clock.
struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded in-memory [`CacheBackend`].
///
/// Useful for single-process deployments and tests. Entries are dropped once their
/// TTL passes or when `max_entries` forces an eviction.
#[derive(Clone)]
pub struct MemoryCacheBackend {
    cache: Cache<String, StoredValue>,
}

impl std::fmt::Debug for MemoryCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheBackend")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl MemoryCacheBackend {
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_entries).expire_after(PerEntryTtl).build();
        Self { cache }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.max_entries)
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    async fn live(&self, key: &str) -> Option<StoredValue> {
        // moka expires lazily on its own clock; recheck against the write time.
        self.cache.get(key).await.filter(|stored| stored.remaining().is_some())
    }
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.live(key).await.map(|stored| stored.payload.to_string()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), BackendError> {
        let stored = StoredValue { payload: Arc::from(value), stored_at: Instant::now(), ttl };
        self.cache.insert(key.to_string(), stored).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, BackendError> {
        let matching: Vec<Arc<String>> =
            self.cache.iter().map(|(key, _)| key).filter(|key| key.starts_with(prefix)).collect();

        let mut removed = 0;
        for key in matching {
            if self.cache.remove(key.as_str()).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, BackendError> {
        Ok(self.live(key).await.and_then(|stored| stored.remaining()))
    }
}
