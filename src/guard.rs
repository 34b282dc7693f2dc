//! The request-path facade.
//!
//! A [`Guard`] is built once at startup and shared by reference (it is cheap to clone)
//! with every handler that fronts a costly operation. It checks admission first and
//! only then touches the cache or the producer.
//!
//! ```rust
//! use offerguard::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let guard = Guard::from_config(&GuardConfig::default(), Arc::new(MemoryCacheBackend::default()))?;
//! let key = CacheKey::best_offer("casino-42");
//!
//! let first = guard
//!     .run("203.0.113.5", OperationClass::Research, &key, Duration::from_secs(3600), || async {
//!         Ok::<_, std::io::Error>(serde_json::json!({"rank": 1}))
//!     })
//!     .await?;
//! assert!(!first.value.cached);
//! assert_eq!(first.decision.remaining, 1);
//! # Ok(())
//! # }
//! ```

use crate::admission::{AdmissionGuard, OperationClass, Rejection, TierSet};
use crate::cache::{CacheBackend, ResultCache};
use crate::clock::{Clock, SystemClock};
use crate::computation::{CachedComputation, Computed};
use crate::config::{ConfigError, GuardConfig};
use crate::rate_limit::AdmissionDecision;
use crate::telemetry::{box_sink, emit_best_effort, AdmissionEvent, BoxSink, GuardEvent, NullSink};
use crate::timeout::TimeoutPolicy;
use crate::GuardError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower::BoxError;

/// A result that made it through admission, with the decision that let it in.
///
/// `decision.headers()` gives the informational `x-ratelimit-*` headers for the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted<T> {
    pub decision: AdmissionDecision,
    pub value: T,
}

/// Admission control in front of a cached computation.
#[derive(Clone)]
pub struct Guard {
    admission: Arc<AdmissionGuard>,
    computation: CachedComputation,
    sink: BoxSink,
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("admission", &self.admission)
            .field("computation", &self.computation)
            .finish_non_exhaustive()
    }
}

impl Guard {
    pub fn new(admission: AdmissionGuard, computation: CachedComputation) -> Self {
        Self { admission: Arc::new(admission), computation, sink: box_sink(NullSink) }
    }

    /// Build every component from `config` over `backend`, on the system clock.
    pub fn from_config(
        config: &GuardConfig,
        backend: Arc<dyn CacheBackend>,
    ) -> Result<Self, ConfigError> {
        Self::from_config_with_clock(config, backend, Arc::new(SystemClock))
    }

    /// Like [`from_config`](Self::from_config) with an explicit clock for the tiers.
    pub fn from_config_with_clock(
        config: &GuardConfig,
        backend: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let tiers: TierSet = config.tiers.build(clock.clone())?;
        let admission = AdmissionGuard::new(tiers)
            .with_extractor(config.identifier_extractor()?)
            .with_clock(clock);

        let cache = ResultCache::new(backend).with_default_ttl(config.cache.default_ttl());
        let mut computation =
            CachedComputation::new(cache).coalesce_misses(config.cache.coalesce_misses);
        if let Some(deadline) = config.compute_timeout()? {
            computation =
                computation.with_timeout(TimeoutPolicy::new(deadline).map_err(ConfigError::Timeout)?);
        }

        tracing::debug!(
            coalesce_misses = config.cache.coalesce_misses,
            default_ttl_secs = config.cache.default_ttl_secs,
            compute_timeout_ms = config.compute_timeout_ms,
            "guard configured"
        );
        Ok(Self::new(admission, computation))
    }

    /// Report admission, cache and compute events to `sink`.
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: tower::Service<GuardEvent, Response = ()> + Clone + Send + Sync + 'static,
        S::Error: Into<BoxError>,
        S::Future: Send + 'static,
    {
        let sink = box_sink(sink);
        self.computation = self.computation.with_boxed_sink(sink.clone());
        self.sink = sink;
        self
    }

    pub fn admission(&self) -> &AdmissionGuard {
        &self.admission
    }

    pub fn computation(&self) -> &CachedComputation {
        &self.computation
    }

    pub fn cache(&self) -> &ResultCache {
        self.computation.cache()
    }

    /// Check `identifier` against `class` and report the decision.
    pub async fn admit(
        &self,
        identifier: &str,
        class: OperationClass,
    ) -> Result<AdmissionDecision, Rejection> {
        let admitted = self.admission.admit(identifier, class);
        let event = match &admitted {
            Ok(decision) => AdmissionEvent::Allowed {
                operation: class,
                remaining: decision.remaining,
                limit: decision.limit,
            },
            Err(rejection) => AdmissionEvent::Denied {
                operation: class,
                limit: rejection.limit,
                retry_after_secs: rejection.retry_after_secs,
            },
        };
        emit_best_effort(self.sink.clone(), GuardEvent::Admission(event)).await;
        admitted
    }

    /// Admit, then serve `key` from the cache or compute and cache it for `ttl`.
    ///
    /// A denied request never reaches the cache or `producer`.
    pub async fn run<T, E, F, Fut>(
        &self,
        identifier: &str,
        class: OperationClass,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<Admitted<Computed<T>>, GuardError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let decision = self.admit(identifier, class).await.map_err(GuardError::RateLimited)?;
        let value = self.computation.get_or_compute(key, ttl, producer).await?;
        Ok(Admitted { decision, value })
    }

    /// Admit, then run `producer` without caching (e.g. chat replies).
    pub async fn run_uncached<T, E, F, Fut>(
        &self,
        identifier: &str,
        class: OperationClass,
        producer: F,
    ) -> Result<Admitted<T>, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let decision = self.admit(identifier, class).await.map_err(GuardError::RateLimited)?;
        let value = self.computation.compute(class.as_str(), producer).await?;
        Ok(Admitted { decision, value })
    }

    /// Drop the cached result for `key`. Call after mutating the entity it depends on.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.cache().invalidate(key).await
    }

    /// Drop every cached result under `prefix`. Maintenance only.
    pub async fn invalidate_all(&self, prefix: &str) -> u64 {
        self.cache().invalidate_all(prefix).await
    }
}
