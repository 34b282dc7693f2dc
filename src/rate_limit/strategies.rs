use crate::clock::{Clock, SystemClock};
use crate::rate_limit::store::{Bucket, BucketStore, InMemoryBucketStore};
use crate::rate_limit::{AdmissionDecision, RateLimitPolicy, RateLimiter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A fixed-window counter.
///
/// Each identifier gets a bucket whose window starts at its first request. Up to
/// `max_requests` admissions are granted until `now > window_end`, after which the
/// bucket is replaced. Bursts straddling a window boundary can see up to
/// `2 × max_requests` admissions in one `window` span.
///
/// Once the store holds more than `max_tracked_identifiers` buckets, expired ones are
/// swept at most once per `window`.
#[derive(Debug)]
pub struct FixedWindowLimiter<S = InMemoryBucketStore> {
    store: S,
    policy: RateLimitPolicy,
    clock: Arc<dyn Clock>,
    next_sweep_millis: AtomicU64,
}

impl FixedWindowLimiter<InMemoryBucketStore> {
    /// Create a limiter backed by a fresh in-memory store and the system clock.
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::with_store(policy, InMemoryBucketStore::new())
    }
}

impl<S> FixedWindowLimiter<S>
where
    S: BucketStore,
{
    /// Create a limiter over an explicit store.
    pub fn with_store(policy: RateLimitPolicy, store: S) -> Self {
        Self {
            store,
            policy,
            clock: Arc::new(SystemClock),
            next_sweep_millis: AtomicU64::new(0),
        }
    }

    /// Override the clock (useful for deterministic tests).
    ///
    /// # Example
    /// ```
    /// use offerguard::clock::ManualClock;
    /// use offerguard::rate_limit::{FixedWindowLimiter, RateLimitPolicy, RateLimiter};
    /// use std::time::Duration;
    ///
    /// let clock = ManualClock::new(0);
    /// let policy = RateLimitPolicy::per_window(Duration::from_secs(60), 1).unwrap();
    /// let limiter = FixedWindowLimiter::new(policy).with_clock(clock.clone());
    /// assert!(limiter.check("10.0.0.1").allowed);
    /// assert!(!limiter.check("10.0.0.1").allowed);
    /// clock.advance(Duration::from_millis(60_001));
    /// assert!(limiter.check("10.0.0.1").allowed);
    /// ```
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Share an existing clock handle.
    pub fn with_shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether this caller gets to sweep at `now`. One winner per window.
    fn claim_sweep(&self, now: u64, window: u64) -> bool {
        let due = self.next_sweep_millis.load(Ordering::Relaxed);
        now >= due
            && self
                .next_sweep_millis
                .compare_exchange(
                    due,
                    now.saturating_add(window),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
    }
}

impl<S> RateLimiter for FixedWindowLimiter<S>
where
    S: BucketStore,
{
    fn check(&self, identifier: &str) -> AdmissionDecision {
        let now = self.clock.now_millis();
        let window = self.policy.window_millis();
        let max = self.policy.max_requests();
        let mut decision = AdmissionDecision::denied(max, now.saturating_add(window));

        self.store.update(identifier, &mut |slot| {
            if !matches!(slot, Some(b) if !b.is_expired(now)) {
                *slot = Some(Bucket::fresh(now, window));
            }
            let Some(bucket) = slot.as_mut() else {
                return;
            };
            if bucket.count >= max {
                decision = AdmissionDecision::denied(max, bucket.window_end_millis);
            } else {
                bucket.count += 1;
                decision =
                    AdmissionDecision::allowed(max, max - bucket.count, bucket.window_end_millis);
            }
        });

        if self.store.len() > self.policy.max_tracked_identifiers()
            && self.claim_sweep(now, window)
        {
            let swept = self.store.sweep(now);
            tracing::debug!(
                swept,
                remaining = self.store.len(),
                threshold = self.policy.max_tracked_identifiers(),
                "swept expired rate limit buckets"
            );
        }

        decision
    }

    fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }
}
