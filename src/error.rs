//! Error types for admission control and cached computation
use crate::admission::Rejection;
use std::fmt;
use std::time::Duration;

/// The only error type that crosses the guard boundary.
///
/// Cache backend faults never show up here; they are absorbed and logged by
/// [`ResultCache`](crate::cache::ResultCache).
#[derive(Debug, Clone)]
pub enum GuardError<E> {
    /// The admission guard denied the request; nothing downstream ran.
    RateLimited(Rejection),
    /// The producer did not finish before the configured deadline.
    Timeout { elapsed: Duration, timeout: Duration },
    /// The producer failed. Passed through untouched and never cached.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for GuardError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited(rejection) => write!(
                f,
                "rate limited on {} tier (limit {}, retry after {}s)",
                rejection.operation, rejection.limit, rejection.retry_after_secs
            ),
            Self::Timeout { elapsed, timeout } => {
                write!(f, "upstream timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for GuardError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> GuardError<E> {
    /// Check if this error is an admission denial
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
    /// Check if this error is due to timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Borrow the rejection if this is a denial.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::RateLimited(r) => Some(r),
            _ => None,
        }
    }
    /// Access timeout details as (elapsed, limit).
    pub fn timeout_details(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::Timeout { elapsed, timeout } => Some((*elapsed, *timeout)),
            _ => None,
        }
    }
    /// Map the inner error, leaving the other variants as they are.
    pub fn map_inner<F, E2>(self, f: F) -> GuardError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::RateLimited(r) => GuardError::RateLimited(r),
            Self::Timeout { elapsed, timeout } => GuardError::Timeout { elapsed, timeout },
            Self::Inner(e) => GuardError::Inner(f(e)),
        }
    }
}

/// Errors produced when validating policies at construction time.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Window length must be > 0.
    #[error("window must be > 0 (got {0:?})")]
    ZeroWindow(Duration),
    /// At least one request per window must be admitted.
    #[error("max_requests must be > 0")]
    ZeroMaxRequests,
    /// The sweep threshold must be > 0.
    #[error("max_tracked_identifiers must be > 0")]
    ZeroTrackedIdentifiers,
    /// Timeouts must be non-zero and finite.
    #[error("timeout must be non-zero and finite (got {0:?})")]
    InvalidTimeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::OperationClass;
    use std::error::Error;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct DummyError(&'static str);
    impl fmt::Display for DummyError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl std::error::Error for DummyError {}

    fn rejection() -> Rejection {
        Rejection {
            operation: OperationClass::Research,
            limit: 2,
            remaining: 0,
            reset_at_millis: 60_000,
            retry_after_secs: 42,
        }
    }

    #[test]
    fn rate_limited_display_mentions_tier_and_wait() {
        let err: GuardError<DummyError> = GuardError::RateLimited(rejection());
        let msg = err.to_string();
        assert!(msg.contains("research"));
        assert!(msg.contains("42s"));
        assert!(err.is_rate_limited());
        assert_eq!(err.rejection().map(|r| r.limit), Some(2));
    }

    #[test]
    fn timeout_display_and_details() {
        let err: GuardError<DummyError> = GuardError::Timeout {
            elapsed: Duration::from_millis(5100),
            timeout: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("timed out"));
        assert!(err.is_timeout());
        assert_eq!(
            err.timeout_details(),
            Some((Duration::from_millis(5100), Duration::from_secs(5)))
        );
        assert!(err.source().is_none());
    }

    #[test]
    fn inner_is_transparent() {
        let err = GuardError::Inner(DummyError("model overloaded"));
        assert_eq!(err.to_string(), "model overloaded");
        assert!(err.source().is_some());
        assert_eq!(err.as_inner(), Some(&DummyError("model overloaded")));
        assert_eq!(err.into_inner(), Some(DummyError("model overloaded")));
    }

    #[test]
    fn map_inner_only_touches_inner() {
        let err: GuardError<DummyError> = GuardError::Inner(DummyError("x"));
        let mapped = err.map_inner(|e| e.0.len());
        assert_eq!(mapped.into_inner(), Some(1));

        let limited: GuardError<DummyError> = GuardError::RateLimited(rejection());
        assert!(limited.map_inner(|e| e.0.len()).is_rate_limited());
    }

    #[test]
    fn policy_error_messages() {
        assert!(PolicyError::ZeroMaxRequests.to_string().contains("max_requests"));
        assert!(PolicyError::ZeroWindow(Duration::ZERO).to_string().contains("window"));
    }
}
