//! Cache-aside orchestration around an expensive producer.
//!
//! [`CachedComputation::get_or_compute`] returns a fresh cached value when there is one
//! and otherwise runs the producer, stores a successful result and hands it back.
//! Failures are passed through and never cached.
//!
//! Concurrent misses for the same key each run the producer unless
//! [`coalesce_misses`](CachedComputation::coalesce_misses) is turned on, in which case
//! later callers wait for the first one and read its result from the cache.

use crate::cache::ResultCache;
use crate::telemetry::{box_sink, emit_best_effort, BoxSink, ComputeOutcome, GuardEvent, NullSink};
use crate::timeout::TimeoutPolicy;
use crate::GuardError;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tower::BoxError;

/// A value plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Computed<T> {
    pub value: T,
    /// `true` when served from the cache without running the producer.
    pub cached: bool,
}

impl<T> Computed<T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

type InFlight = DashMap<String, Arc<Mutex<()>>>;

/// Runs producers behind a [`ResultCache`].
#[derive(Clone)]
pub struct CachedComputation {
    cache: ResultCache,
    timeout: Option<TimeoutPolicy>,
    in_flight: Option<Arc<InFlight>>,
    sink: BoxSink,
}

impl fmt::Debug for CachedComputation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedComputation")
            .field("cache", &self.cache)
            .field("timeout", &self.timeout)
            .field("coalesce_misses", &self.in_flight.is_some())
            .finish_non_exhaustive()
    }
}

impl CachedComputation {
    pub fn new(cache: ResultCache) -> Self {
        Self { cache, timeout: None, in_flight: None, sink: box_sink(NullSink) }
    }

    /// Fail producers that run longer than `policy` with [`GuardError::Timeout`].
    pub fn with_timeout(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout = Some(policy);
        self
    }

    /// Make concurrent misses for one key wait for a single producer run.
    ///
    /// Waiting callers pay the first producer's latency. If that producer fails, the
    /// next waiter runs its own producer.
    pub fn coalesce_misses(mut self, enabled: bool) -> Self {
        self.in_flight = enabled.then(|| Arc::new(DashMap::new()));
        self
    }

    /// Report producer outcomes and cache activity to `sink`.
    pub fn with_sink<S>(self, sink: S) -> Self
    where
        S: tower::Service<GuardEvent, Response = ()> + Clone + Send + Sync + 'static,
        S::Error: Into<BoxError>,
        S::Future: Send + 'static,
    {
        self.with_boxed_sink(box_sink(sink))
    }

    pub(crate) fn with_boxed_sink(mut self, sink: BoxSink) -> Self {
        self.cache = self.cache.with_boxed_sink(sink.clone());
        self.sink = sink;
        self
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn timeout(&self) -> Option<&TimeoutPolicy> {
        self.timeout.as_ref()
    }

    /// Return the cached value for `key`, or run `producer` and cache its result for `ttl`.
    ///
    /// The producer is not called on a hit. A producer error comes back as
    /// [`GuardError::Inner`] and leaves the cache untouched.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<Computed<T>, GuardError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.cache.get::<T>(key).await {
            return Ok(Computed { value, cached: true });
        }

        let _slot = match &self.in_flight {
            Some(in_flight) => {
                let slot = InFlightSlot::acquire(in_flight, key).await;
                // Whoever held the slot before us may have filled the cache.
                if let Some(value) = self.cache.get::<T>(key).await {
                    return Ok(Computed { value, cached: true });
                }
                Some(slot)
            }
            None => None,
        };

        let value = self.produce(key, producer).await?;
        self.cache.put(key, &value, ttl).await;
        Ok(Computed { value, cached: false })
    }

    /// Like [`get_or_compute`](Self::get_or_compute) with the cache's default TTL.
    pub async fn get_or_compute_default<T, E, F, Fut>(
        &self,
        key: &str,
        producer: F,
    ) -> Result<Computed<T>, GuardError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_compute(key, self.cache.default_ttl(), producer).await
    }

    /// Run `producer` under the configured deadline without touching the cache.
    pub async fn compute<T, E, F, Fut>(&self, key: &str, producer: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.produce(key, producer).await
    }

    async fn produce<T, E, F, Fut>(&self, key: &str, producer: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let result = match &self.timeout {
            Some(policy) => policy.run(producer()).await,
            None => producer().await.map_err(GuardError::Inner),
        };
        let duration = started.elapsed();
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

        let outcome = match &result {
            Ok(_) => {
                tracing::debug!(key, duration_ms, "producer succeeded");
                ComputeOutcome::Success { key: key.to_string(), duration }
            }
            Err(GuardError::Timeout { timeout, .. }) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(key, duration_ms, timeout_ms, "producer timed out");
                ComputeOutcome::TimedOut { key: key.to_string(), timeout: *timeout }
            }
            Err(_) => {
                tracing::warn!(key, duration_ms, "producer failed, nothing cached");
                ComputeOutcome::Failure { key: key.to_string(), duration }
            }
        };
        emit_best_effort(self.sink.clone(), GuardEvent::Compute(outcome)).await;

        result
    }
}

/// Exclusive right to compute one key. Released on drop, including cancellation.
struct InFlightSlot<'a> {
    in_flight: &'a InFlight,
    key: &'a str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<'a> InFlightSlot<'a> {
    async fn acquire(in_flight: &'a InFlight, key: &'a str) -> InFlightSlot<'a> {
        let lock = in_flight.entry(key.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        Self { in_flight, key, guard: Some(guard) }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own handle left means nobody is waiting on this key.
        self.in_flight.remove_if(self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
