//! Convenient re-exports for common offerguard types.
pub use crate::{
    admission::{AdmissionGuard, IdentifierExtractor, OperationClass, Rejection, TierSet},
    cache::{CacheBackend, CacheKey, MemoryCacheBackend, NoopCacheBackend, ResultCache, ResultKind},
    computation::{CachedComputation, Computed},
    config::GuardConfig,
    guard::{Admitted, Guard},
    rate_limit::{AdmissionDecision, AdmissionLayer, FixedWindowLimiter, RateLimitPolicy, RateLimiter},
    telemetry::{GuardEvent, LogSink, MemorySink, NullSink},
    timeout::TimeoutPolicy,
    GuardError,
};
