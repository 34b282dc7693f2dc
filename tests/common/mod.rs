#![allow(dead_code)]

use async_trait::async_trait;
use offerguard::cache::{BackendError, CacheBackend, MemoryCacheBackend};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Delegates to a memory backend until switched off, then fails every call.
#[derive(Debug, Default)]
pub struct FlakyBackend {
    inner: MemoryCacheBackend,
    down: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(BackendError::Connection("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), BackendError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, BackendError> {
        self.check()?;
        self.inner.delete_prefix(prefix).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, BackendError> {
        self.check()?;
        self.inner.ttl(key).await
    }
}

/// Counts producer invocations.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
