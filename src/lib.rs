#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # offerguard
//!
//! Admission control and cache-aside result caching for expensive, rate-limited,
//! non-idempotent calls such as AI research runs.
//!
//! ## Features
//!
//! - **Fixed-window rate limiting** per client identifier, one independent tier per
//!   operation class (chat, api, research, bulk)
//! - **Identifier extraction** from forwarded-for style headers with an `"unknown"` fallback
//! - **Structured rejections** carrying `retry-after` and `x-ratelimit-*` headers
//! - **Fail-soft result cache** keyed by `"<kind>:<entity_id>"` with exact invalidation
//! - **Cached computation** that never runs the producer on a hit and never caches failures
//! - **Tower middleware** for admitting `http::Request`s
//!
//! ## Quick Start
//!
//! ```rust
//! use offerguard::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let guard = Guard::from_config(&GuardConfig::default(), Arc::new(MemoryCacheBackend::default()))?;
//! let key = CacheKey::best_offer("casino-42");
//!
//! let offer = guard
//!     .run("203.0.113.5", OperationClass::Research, &key, guard.cache().default_ttl(), || async {
//!         // The expensive call goes here.
//!         Ok::<_, std::io::Error>(serde_json::json!({"rank": 1}))
//!     })
//!     .await?;
//! println!("cached: {}", offer.value.cached);
//!
//! // After the casino's offers change:
//! guard.invalidate(&key).await;
//! # Ok(())
//! # }
//! ```
//!
//! Rate-limit state lives in the process. Running several independent processes gives
//! an effective limit of `max_requests × process count` per tier.

pub mod admission;
pub mod cache;
pub mod clock;
pub mod computation;
pub mod config;
pub mod error;
pub mod guard;
pub mod prelude;
pub mod rate_limit;
pub mod telemetry;
pub mod timeout;

// Re-exports
pub use admission::{AdmissionGuard, IdentifierExtractor, OperationClass, Rejection, TierSet};
pub use cache::{
    BackendError, CacheBackend, CacheKey, MemoryCacheBackend, NoopCacheBackend, ResultCache,
    ResultKind,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use computation::{CachedComputation, Computed};
pub use config::{CacheSettings, ConfigError, GuardConfig, TierConfig, TierConfigs};
pub use error::{GuardError, PolicyError};
pub use guard::{Admitted, Guard};
pub use rate_limit::{
    AdmissionDecision, AdmissionLayer, AdmissionService, FixedWindowLimiter, RateLimitPolicy,
    RateLimiter,
};
pub use timeout::TimeoutPolicy;
