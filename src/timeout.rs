//! Producer deadline

use crate::error::PolicyError;
use crate::GuardError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Bounds how long a single producer call may run.
///
/// The producer future is dropped when the deadline passes, which cancels it if the
/// collaborator supports cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    duration: Duration,
}

impl TimeoutPolicy {
    /// Create a timeout policy. Zero and `Duration::MAX` are rejected.
    pub fn new(duration: Duration) -> Result<Self, PolicyError> {
        if duration.is_zero() || duration == Duration::MAX {
            return Err(PolicyError::InvalidTimeout(duration));
        }
        Ok(Self { duration })
    }

    /// Inspect the configured timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Await `fut`, failing with [`GuardError::Timeout`] once the deadline passes.
    pub async fn run<T, E, Fut>(&self, fut: Fut) -> Result<T, GuardError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();

        match tokio::time::timeout(self.duration, fut).await {
            Ok(result) => result.map_err(GuardError::Inner),
            Err(_) => {
                let elapsed = start.elapsed();
                Err(GuardError::Timeout { elapsed, timeout: self.duration })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[test]
    fn rejects_zero_and_unbounded() {
        assert_eq!(
            TimeoutPolicy::new(Duration::ZERO),
            Err(PolicyError::InvalidTimeout(Duration::ZERO))
        );
        assert!(TimeoutPolicy::new(Duration::MAX).is_err());
        assert_eq!(TimeoutPolicy::new(Duration::from_secs(1)).unwrap().duration(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn completes_before_timeout() {
        let timeout = TimeoutPolicy::new(Duration::from_millis(100)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = timeout
            .run(async move {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, TestError>(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_long_operation() {
        let timeout_duration = Duration::from_millis(50);
        let timeout = TimeoutPolicy::new(timeout_duration).unwrap();

        let result = timeout
            .run(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<(), TestError>(())
            })
            .await;

        match result.unwrap_err() {
            GuardError::Timeout { elapsed, timeout } => {
                assert_eq!(timeout, timeout_duration);
                assert!(elapsed >= timeout_duration, "elapsed should be at least the timeout");
            }
            e => panic!("expected Timeout error, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn propagates_operation_errors() {
        let timeout = TimeoutPolicy::new(Duration::from_secs(1)).unwrap();

        let result =
            timeout.run(async { Err::<(), _>(TestError("model overloaded".to_string())) }).await;

        match result.unwrap_err() {
            GuardError::Inner(e) => assert_eq!(e.0, "model overloaded"),
            e => panic!("expected Inner error, got {:?}", e),
        }
    }
}
