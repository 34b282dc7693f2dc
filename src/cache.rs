//! Cache-aside storage for computed results.
//!
//! [`ResultCache`] sits in front of a [`CacheBackend`] and never lets a backend fault
//! reach the caller: a failed read is a miss, a failed write is a logged no-op. Keys
//! are passed through untouched, so invalidating `"best-offer:123"` removes exactly
//! the entry written under `"best-offer:123"`.
//!
//! ```rust
//! use offerguard::cache::{CacheKey, MemoryCacheBackend, ResultCache};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = ResultCache::new(Arc::new(MemoryCacheBackend::default()));
//! let key = CacheKey::best_offer("123");
//! cache.put(&key, &serde_json::json!({"rank": 1}), Duration::from_secs(60)).await;
//! let hit: Option<serde_json::Value> = cache.get(&key).await;
//! assert_eq!(hit, Some(serde_json::json!({"rank": 1})));
//! assert!(cache.invalidate(&key).await);
//! assert_eq!(cache.get::<serde_json::Value>(&key).await, None);
//! # }
//! ```

use crate::telemetry::{box_sink, emit_best_effort, BoxSink, CacheEvent, GuardEvent, NullSink};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::BoxError;

pub mod memory;
pub use memory::MemoryCacheBackend;

/// Errors a backend may report. [`ResultCache`] absorbs all of them.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    /// The backend could not be reached.
    #[error("cache backend connection failed: {0}")]
    Connection(String),
    /// The backend rejected or failed a command.
    #[error("cache backend {operation} failed: {message}")]
    Command { operation: &'static str, message: String },
    /// A stored payload could not be encoded or decoded.
    #[error("cache payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Plain key/value operations a durable store must offer.
///
/// Values are opaque strings; implementations must apply `ttl` at write time and must
/// never return an entry whose TTL has elapsed.
#[async_trait]
pub trait CacheBackend: Send + Sync + fmt::Debug {
    /// Fetch a live value.
    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Store `value` under `key`, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), BackendError>;

    /// Remove one key. Returns whether something was removed.
    async fn delete(&self, key: &str) -> Result<bool, BackendError>;

    /// Remove every key starting with `prefix`. O(matching keys); maintenance only.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, BackendError>;

    /// Time left before `key` expires, or `None` if it is absent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, BackendError>;
}

/// Backend that stores nothing. Every read is a miss.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCacheBackend;

#[async_trait]
impl CacheBackend for NoopCacheBackend {
    async fn get(&self, _key: &str) -> Result<Option<String>, BackendError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), BackendError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool, BackendError> {
        Ok(false)
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<u64, BackendError> {
        Ok(0)
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, BackendError> {
        Ok(None)
    }
}

/// Namespace for one kind of computed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultKind(&'static str);

impl ResultKind {
    /// Best offer computed for one casino.
    pub const BEST_OFFER: ResultKind = ResultKind("best-offer");
    /// Casinos discovered for one region or query.
    pub const CASINO_DISCOVERY: ResultKind = ResultKind("casino-discovery");

    /// A custom kind. Must not contain `:`.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// The `"<kind>:"` prefix matching every key of this kind.
    pub fn prefix(&self) -> String {
        format!("{}:", self.0)
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A fully namespaced cache key, `"<kind>:<entity_id>"`.
///
/// Derived from the entity identity only, so a write path that knows the entity id
/// can always rebuild the exact key it has to invalidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(kind: ResultKind, entity_id: impl fmt::Display) -> Self {
        Self(format!("{}:{}", kind.as_str(), entity_id))
    }

    /// `"best-offer:<casino_id>"`
    pub fn best_offer(casino_id: impl fmt::Display) -> Self {
        Self::new(ResultKind::BEST_OFFER, casino_id)
    }

    /// `"casino-discovery:<scope>"`
    pub fn casino_discovery(scope: impl fmt::Display) -> Self {
        Self::new(ResultKind::CASINO_DISCOVERY, scope)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for CacheKey {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Fail-soft cache-aside front end over a [`CacheBackend`].
#[derive(Clone)]
pub struct ResultCache {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    sink: BoxSink,
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("backend", &self.backend)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl ResultCache {
    /// One hour.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend, default_ttl: Self::DEFAULT_TTL, sink: box_sink(NullSink) }
    }

    /// TTL used by callers that do not pick one.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Report cache events to `sink`.
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: tower::Service<GuardEvent, Response = ()> + Clone + Send + Sync + 'static,
        S::Error: Into<BoxError>,
        S::Future: Send + 'static,
    {
        self.sink = box_sink(sink);
        self
    }

    pub(crate) fn with_boxed_sink(mut self, sink: BoxSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Read and decode `key`. Backend faults and undecodable payloads read as a miss.
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let started = Instant::now();
        let raw = match self.backend.get(key).await {
            Ok(raw) => raw,
            Err(error) => {
                self.absorb(key, "get", started, &error).await;
                return None;
            }
        };

        let Some(raw) = raw else {
            tracing::debug!(key, "cache miss");
            self.emit(CacheEvent::Miss { key: key.to_string() }).await;
            return None;
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                tracing::debug!(key, "cache hit");
                self.emit(CacheEvent::Hit { key: key.to_string() }).await;
                Some(value)
            }
            Err(error) => {
                self.absorb(key, "decode", started, &BackendError::Codec(error)).await;
                None
            }
        }
    }

    /// Encode and store `value` for `ttl`. Best-effort; returns whether it was stored.
    ///
    /// A zero `ttl` stores nothing.
    pub async fn put<T>(&self, key: &str, value: &T, ttl: Duration) -> bool
    where
        T: Serialize + ?Sized,
    {
        if ttl.is_zero() {
            tracing::debug!(key, "zero ttl, not caching");
            return false;
        }

        let started = Instant::now();
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(error) => {
                self.absorb(key, "encode", started, &BackendError::Codec(error)).await;
                return false;
            }
        };

        match self.backend.set(key, payload, ttl).await {
            Ok(()) => {
                tracing::debug!(key, ttl_secs = ttl.as_secs(), "cached result");
                self.emit(CacheEvent::Stored { key: key.to_string(), ttl }).await;
                true
            }
            Err(error) => {
                self.absorb(key, "set", started, &error).await;
                false
            }
        }
    }

    /// Remove one entry. Idempotent; returns whether an entry was removed.
    pub async fn invalidate(&self, key: &str) -> bool {
        let started = Instant::now();
        match self.backend.delete(key).await {
            Ok(removed) => {
                tracing::info!(key, removed, "invalidated cached result");
                let event = CacheEvent::Invalidated { key: key.to_string(), removed: u64::from(removed) };
                self.emit(event).await;
                removed
            }
            Err(error) => {
                self.absorb(key, "delete", started, &error).await;
                false
            }
        }
    }

    /// Remove every entry under `prefix`, e.g. [`ResultKind::prefix`].
    ///
    /// Cost grows with the number of matching keys; keep it off the request path.
    pub async fn invalidate_all(&self, prefix: &str) -> u64 {
        let started = Instant::now();
        match self.backend.delete_prefix(prefix).await {
            Ok(removed) => {
                tracing::info!(
                    prefix,
                    removed,
                    elapsed_ms = millis(started.elapsed()),
                    "invalidated cached results by prefix"
                );
                self.emit(CacheEvent::Invalidated { key: prefix.to_string(), removed }).await;
                removed
            }
            Err(error) => {
                self.absorb(prefix, "delete_prefix", started, &error).await;
                0
            }
        }
    }

    /// Whole seconds before `key` expires, rounded up.
    pub async fn ttl_remaining(&self, key: &str) -> Option<u64> {
        let started = Instant::now();
        match self.backend.ttl(key).await {
            Ok(remaining) => {
                remaining.map(|d| d.as_secs().saturating_add(u64::from(d.subsec_nanos() != 0)))
            }
            Err(error) => {
                self.absorb(key, "ttl", started, &error).await;
                None
            }
        }
    }

    async fn absorb(
        &self,
        key: &str,
        operation: &'static str,
        started: Instant,
        error: &BackendError,
    ) {
        let elapsed = started.elapsed();
        tracing::warn!(
            key,
            operation,
            elapsed_ms = millis(elapsed),
            error = %error,
            "cache backend failure absorbed"
        );
        self.emit(CacheEvent::BackendFailure { key: key.to_string(), operation, elapsed }).await;
    }

    async fn emit(&self, event: CacheEvent) {
        emit_best_effort(self.sink.clone(), GuardEvent::Cache(event)).await;
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemorySink;

    #[derive(Debug)]
    struct Unreachable;

    #[async_trait]
    impl CacheBackend for Unreachable {
        async fn get(&self, _key: &str) -> Result<Option<String>, BackendError> {
            Err(BackendError::Connection("refused".into()))
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), BackendError> {
            Err(BackendError::Connection("refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<bool, BackendError> {
            Err(BackendError::Connection("refused".into()))
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<u64, BackendError> {
            Err(BackendError::Command { operation: "scan", message: "busy".into() })
        }
        async fn ttl(&self, _key: &str) -> Result<Option<Duration>, BackendError> {
            Err(BackendError::Connection("refused".into()))
        }
    }

    #[test]
    fn keys_are_namespaced_by_kind() {
        assert_eq!(CacheKey::best_offer(123).as_str(), "best-offer:123");
        assert_eq!(CacheKey::casino_discovery("eu").as_str(), "casino-discovery:eu");
        assert_ne!(CacheKey::best_offer("x"), CacheKey::casino_discovery("x"));
        assert!(CacheKey::best_offer("x").starts_with(&ResultKind::BEST_OFFER.prefix()));
        assert_eq!(String::from(CacheKey::new(ResultKind::new("report"), 7)), "report:7");
    }

    #[tokio::test]
    async fn noop_backend_always_misses() {
        let cache = ResultCache::new(Arc::new(NoopCacheBackend));
        assert!(cache.put("best-offer:1", &1u32, Duration::from_secs(60)).await);
        assert_eq!(cache.get::<u32>("best-offer:1").await, None);
        assert!(!cache.invalidate("best-offer:1").await);
        assert_eq!(cache.ttl_remaining("best-offer:1").await, None);
    }

    #[tokio::test]
    async fn backend_failures_are_absorbed_and_reported() {
        let sink = MemorySink::new();
        let cache = ResultCache::new(Arc::new(Unreachable)).with_sink(sink.clone());

        assert_eq!(cache.get::<u32>("best-offer:1").await, None);
        assert!(!cache.put("best-offer:1", &1u32, Duration::from_secs(60)).await);
        assert!(!cache.invalidate("best-offer:1").await);
        assert_eq!(cache.invalidate_all("best-offer:").await, 0);
        assert_eq!(cache.ttl_remaining("best-offer:1").await, None);

        let operations: Vec<_> = sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                GuardEvent::Cache(CacheEvent::BackendFailure { operation, .. }) => Some(operation),
                _ => None,
            })
            .collect();
        assert_eq!(operations, ["get", "set", "delete", "delete_prefix", "ttl"]);
    }

    #[tokio::test]
    async fn undecodable_payload_reads_as_miss() {
        let backend = Arc::new(MemoryCacheBackend::new(16));
        backend.set("best-offer:1", "not json".into(), Duration::from_secs(60)).await.unwrap();
        let cache = ResultCache::new(backend);
        assert_eq!(cache.get::<u32>("best-offer:1").await, None);
    }

    #[tokio::test]
    async fn zero_ttl_is_not_stored() {
        let cache = ResultCache::new(Arc::new(MemoryCacheBackend::new(16)));
        assert!(!cache.put("best-offer:1", &1u32, Duration::ZERO).await);
        assert_eq!(cache.get::<u32>("best-offer:1").await, None);
    }

    #[tokio::test]
    async fn events_follow_the_cache_aside_flow() {
        let sink = MemorySink::new();
        let cache =
            ResultCache::new(Arc::new(MemoryCacheBackend::new(16))).with_sink(sink.clone());
        let key = CacheKey::best_offer(9);

        assert_eq!(cache.get::<u32>(&key).await, None);
        cache.put(&key, &5u32, Duration::from_secs(60)).await;
        assert_eq!(cache.get::<u32>(&key).await, Some(5));

        assert_eq!(
            sink.events(),
            vec![
                GuardEvent::Cache(CacheEvent::Miss { key: "best-offer:9".into() }),
                GuardEvent::Cache(CacheEvent::Stored {
                    key: "best-offer:9".into(),
                    ttl: Duration::from_secs(60)
                }),
                GuardEvent::Cache(CacheEvent::Hit { key: "best-offer:9".into() }),
            ]
        );
    }

    #[tokio::test]
    async fn unbounded_ttl_reports_saturated_seconds() {
        let cache = ResultCache::new(Arc::new(MemoryCacheBackend::new(8)));
        assert!(cache.put("best-offer:1", &1u32, Duration::MAX).await);
        assert_eq!(cache.get::<u32>("best-offer:1").await, Some(1));
        let left = cache.ttl_remaining("best-offer:1").await.unwrap();
        assert!(left > 0);
    }

    #[tokio::test]
    async fn absorbed_failures_are_logged() {
        use std::sync::Mutex;
        use tracing_subscriber::fmt::writer::BoxMakeWriter;
        use tracing_subscriber::fmt::MakeWriter;

        #[derive(Clone)]
        struct SharedWriter(Arc<Mutex<Vec<u8>>>);

        impl<'a> MakeWriter<'a> for SharedWriter {
            type Writer = SharedGuard;
            fn make_writer(&'a self) -> Self::Writer {
                SharedGuard(self.0.clone())
            }
        }

        struct SharedGuard(Arc<Mutex<Vec<u8>>>);
        impl std::io::Write for SharedGuard {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let cache = ResultCache::new(Arc::new(Unreachable));
        assert_eq!(cache.get::<u32>("best-offer:9").await, None);

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("cache backend failure absorbed"));
        assert!(logs.contains("best-offer:9"));
    }
}
