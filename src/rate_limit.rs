//! Rate limiting primitives.
//!
//! This module provides the building blocks for per-identifier admission:
//! - [`RateLimiter`]: The core trait a tier implements.
//! - [`AdmissionDecision`]: The result of a check (allowed or not, plus header data).
//! - [`RateLimitPolicy`]: The validated `(window, max_requests, max_tracked_identifiers)` triple.
//!
//! # Architecture
//!
//! - **Logic**: [`FixedWindowLimiter`](strategies::FixedWindowLimiter) (in `strategies`) does
//!   the counting.
//! - **Storage**: [`BucketStore`](store::BucketStore) (in `store`) holds the per-identifier
//!   buckets, so the in-memory default can be swapped for a shared store without touching
//!   the algorithm.
//! - **Middleware**: [`AdmissionLayer`] wraps a tower service and asks the
//!   [`AdmissionGuard`](crate::admission::AdmissionGuard) before every call.
//!
//! State lives in the process. Running N independent processes without a shared
//! `BucketStore` gives an effective limit of `max_requests × N`.

use crate::error::PolicyError;
use http::header::{HeaderName, HeaderValue};
use std::time::Duration;

pub mod middleware;
pub mod store;
pub mod strategies;
pub use middleware::{AdmissionLayer, AdmissionService};
pub use store::{Bucket, BucketStore, InMemoryBucketStore};
pub use strategies::FixedWindowLimiter;

/// Header carrying the tier's request limit.
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
/// Header carrying the remaining admissions in the current window.
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
/// Header carrying the window end in epoch seconds.
pub const HEADER_RESET: &str = "x-ratelimit-reset";

/// The decision returned by a rate limiter. Derived on every check, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The tier's `max_requests`.
    pub limit: u32,
    /// Admissions left in the current window. Always 0 when denied.
    pub remaining: u32,
    /// End of the current window, epoch millis.
    pub reset_at_millis: u64,
}

impl AdmissionDecision {
    pub(crate) fn allowed(limit: u32, remaining: u32, reset_at_millis: u64) -> Self {
        Self { allowed: true, limit, remaining, reset_at_millis }
    }

    pub(crate) fn denied(limit: u32, reset_at_millis: u64) -> Self {
        Self { allowed: false, limit, remaining: 0, reset_at_millis }
    }

    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Time left until the window resets, measured from `now_millis`.
    pub fn retry_after(&self, now_millis: u64) -> Duration {
        Duration::from_millis(self.reset_at_millis.saturating_sub(now_millis))
    }

    /// Whole seconds to wait before retrying, rounded up.
    ///
    /// A denied request is never told to wait 0 seconds: the window only resets once
    /// `now > reset_at`, so at least one more tick has to pass.
    pub fn retry_after_secs(&self, now_millis: u64) -> u64 {
        let millis = self.reset_at_millis.saturating_sub(now_millis);
        let secs = millis / 1000 + u64::from(millis % 1000 != 0);
        if self.allowed {
            secs
        } else {
            secs.max(1)
        }
    }

    /// Informational rate-limit headers (`x-ratelimit-*`).
    pub fn headers(&self) -> Vec<(HeaderName, HeaderValue)> {
        vec![
            (HeaderName::from_static(HEADER_LIMIT), HeaderValue::from(self.limit)),
            (HeaderName::from_static(HEADER_REMAINING), HeaderValue::from(self.remaining)),
            (HeaderName::from_static(HEADER_RESET), HeaderValue::from(self.reset_at_millis / 1000)),
        ]
    }
}

/// Validated configuration for one tier. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    window: Duration,
    max_requests: u32,
    max_tracked_identifiers: usize,
}

impl RateLimitPolicy {
    /// Default number of identifiers a store may hold before a sweep is attempted.
    pub const DEFAULT_MAX_TRACKED: usize = 10_000;

    /// Create a policy with validation.
    ///
    /// # Examples
    /// ```
    /// use offerguard::rate_limit::RateLimitPolicy;
    /// use std::time::Duration;
    /// let research = RateLimitPolicy::new(Duration::from_secs(60), 2, 10_000).unwrap();
    /// assert_eq!(research.max_requests(), 2);
    /// ```
    pub fn new(
        window: Duration,
        max_requests: u32,
        max_tracked_identifiers: usize,
    ) -> Result<Self, PolicyError> {
        if window.as_millis() == 0 {
            return Err(PolicyError::ZeroWindow(window));
        }
        if max_requests == 0 {
            return Err(PolicyError::ZeroMaxRequests);
        }
        if max_tracked_identifiers == 0 {
            return Err(PolicyError::ZeroTrackedIdentifiers);
        }
        Ok(Self { window, max_requests, max_tracked_identifiers })
    }

    /// Skips validation; only for the built-in presets.
    pub(crate) const fn from_parts(
        window: Duration,
        max_requests: u32,
        max_tracked_identifiers: usize,
    ) -> Self {
        Self { window, max_requests, max_tracked_identifiers }
    }

    /// Shorthand for `new(window, max_requests, DEFAULT_MAX_TRACKED)`.
    pub fn per_window(window: Duration, max_requests: u32) -> Result<Self, PolicyError> {
        Self::new(window, max_requests, Self::DEFAULT_MAX_TRACKED)
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Window length in millis, saturating.
    pub fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }

    /// Admissions granted per identifier per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Store size above which expired buckets are swept.
    pub fn max_tracked_identifiers(&self) -> usize {
        self.max_tracked_identifiers
    }
}

/// Core interface for a rate-limit tier.
///
/// `check` never suspends and never fails; a denial is a normal outcome.
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// Count one request for `identifier` and report whether it is admitted.
    fn check(&self, identifier: &str) -> AdmissionDecision;

    /// The policy this tier enforces.
    fn policy(&self) -> &RateLimitPolicy;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_rejects_zero_values() {
        assert_eq!(
            RateLimitPolicy::new(Duration::ZERO, 1, 1),
            Err(PolicyError::ZeroWindow(Duration::ZERO))
        );
        assert_eq!(
            RateLimitPolicy::new(Duration::from_secs(1), 0, 1),
            Err(PolicyError::ZeroMaxRequests)
        );
        assert_eq!(
            RateLimitPolicy::new(Duration::from_secs(1), 1, 0),
            Err(PolicyError::ZeroTrackedIdentifiers)
        );
    }

    #[test]
    fn sub_millisecond_window_is_rejected() {
        assert!(RateLimitPolicy::new(Duration::from_micros(10), 1, 1).is_err());
    }

    #[test]
    fn retry_after_rounds_up() {
        let d = AdmissionDecision::denied(5, 10_001);
        assert_eq!(d.retry_after_secs(0), 11);
        assert_eq!(d.retry_after_secs(9_000), 2);
        assert_eq!(d.retry_after(9_000), Duration::from_millis(1_001));
    }

    #[test]
    fn denied_retry_after_is_at_least_one_second() {
        let d = AdmissionDecision::denied(5, 10_000);
        assert_eq!(d.retry_after_secs(10_000), 1);
        assert_eq!(d.retry_after_secs(20_000), 1);
    }

    #[test]
    fn headers_expose_limit_remaining_reset() {
        let d = AdmissionDecision::allowed(5, 3, 120_500);
        let headers = d.headers();
        assert_eq!(headers[0].0.as_str(), HEADER_LIMIT);
        assert_eq!(headers[0].1, "5");
        assert_eq!(headers[1].1, "3");
        assert_eq!(headers[2].1, "120");
    }
}
