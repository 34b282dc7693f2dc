use crate::admission::OperationClass;
use std::fmt;
use std::time::Duration;

/// Events emitted by the admission guard, the result cache and cached computations.
///
/// Events describe what happened; they never carry result payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    /// Admission decisions
    Admission(AdmissionEvent),
    /// Result cache activity
    Cache(CacheEvent),
    /// Producer outcomes
    Compute(ComputeOutcome),
}

/// Events emitted when a request passes through the admission guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// The request may proceed.
    Allowed {
        /// Tier that admitted the request
        operation: OperationClass,
        /// Admissions left in the window
        remaining: u32,
        /// The tier's limit
        limit: u32,
    },
    /// The request was rejected and nothing downstream ran.
    Denied {
        /// Tier that denied the request
        operation: OperationClass,
        /// The tier's limit
        limit: u32,
        /// Seconds until the window resets
        retry_after_secs: u64,
    },
}

/// Events emitted by [`ResultCache`](crate::cache::ResultCache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A fresh entry was served.
    Hit { key: String },
    /// No entry (or an unreadable one) was found.
    Miss { key: String },
    /// A result was written.
    Stored { key: String, ttl: Duration },
    /// Entries were removed. `removed` is 1 or 0 for single-key invalidation.
    Invalidated { key: String, removed: u64 },
    /// The backend failed and the fault was absorbed.
    BackendFailure {
        key: String,
        /// Backend operation: `get`, `set`, `delete`, `delete_prefix`, `ttl`
        operation: &'static str,
        /// How long the failing call took
        elapsed: Duration,
    },
}

/// Producer outcomes observed by [`CachedComputation`](crate::computation::CachedComputation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeOutcome {
    /// The producer returned a value.
    Success { key: String, duration: Duration },
    /// The producer failed; nothing was cached.
    Failure { key: String, duration: Duration },
    /// The producer exceeded its deadline.
    TimedOut { key: String, timeout: Duration },
}

impl fmt::Display for GuardEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardEvent::Admission(event) => write!(f, "Admission::{}", event),
            GuardEvent::Cache(event) => write!(f, "Cache::{}", event),
            GuardEvent::Compute(event) => write!(f, "Compute::{}", event),
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Allowed { operation, remaining, limit } => {
                write!(f, "Allowed({}, remaining={}/{})", operation, remaining, limit)
            }
            AdmissionEvent::Denied { operation, limit, retry_after_secs } => {
                write!(f, "Denied({}, limit={}, retry_after={}s)", operation, limit, retry_after_secs)
            }
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEvent::Hit { key } => write!(f, "Hit({})", key),
            CacheEvent::Miss { key } => write!(f, "Miss({})", key),
            CacheEvent::Stored { key, ttl } => write!(f, "Stored({}, ttl={:?})", key, ttl),
            CacheEvent::Invalidated { key, removed } => {
                write!(f, "Invalidated({}, removed={})", key, removed)
            }
            CacheEvent::BackendFailure { key, operation, elapsed } => {
                write!(f, "BackendFailure({}, op={}, elapsed={:?})", key, operation, elapsed)
            }
        }
    }
}

impl fmt::Display for ComputeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeOutcome::Success { key, duration } => {
                write!(f, "Success({}, duration={:?})", key, duration)
            }
            ComputeOutcome::Failure { key, duration } => {
                write!(f, "Failure({}, duration={:?})", key, duration)
            }
            ComputeOutcome::TimedOut { key, timeout } => {
                write!(f, "TimedOut({}, timeout={:?})", key, timeout)
            }
        }
    }
}

impl From<AdmissionEvent> for GuardEvent {
    fn from(event: AdmissionEvent) -> Self {
        GuardEvent::Admission(event)
    }
}

impl From<CacheEvent> for GuardEvent {
    fn from(event: CacheEvent) -> Self {
        GuardEvent::Cache(event)
    }
}

impl From<ComputeOutcome> for GuardEvent {
    fn from(event: ComputeOutcome) -> Self {
        GuardEvent::Compute(event)
    }
}
