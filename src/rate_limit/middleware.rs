use crate::admission::{AdmissionGuard, OperationClass};
use crate::GuardError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that admits `http::Request`s through an [`AdmissionGuard`] tier.
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    guard: Arc<AdmissionGuard>,
    operation: OperationClass,
}

impl AdmissionLayer {
    /// Create a layer checking every request against `operation`'s tier.
    pub fn new(guard: Arc<AdmissionGuard>, operation: OperationClass) -> Self {
        Self { guard, operation }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService { inner: service, guard: self.guard.clone(), operation: self.operation }
    }
}

/// Middleware service that enforces admission before calling the inner service.
///
/// The inner service is never called for a denied request.
#[derive(Clone, Debug)]
pub struct AdmissionService<S> {
    inner: S,
    guard: Arc<AdmissionGuard>,
    operation: OperationClass,
}

impl<S, B> Service<http::Request<B>> for AdmissionService<S>
where
    S: Service<http::Request<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = GuardError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GuardError::Inner)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        // The decision happens synchronously so a denied request never reaches `inner`.
        let admitted = self.guard.admit_headers(req.headers(), self.operation);

        // Take the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match admitted {
                Ok(_) => inner.call(req).await.map_err(GuardError::Inner),
                Err(rejection) => Err(GuardError::RateLimited(rejection)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::TierSet;
    use crate::clock::ManualClock;
    use crate::config::TierConfigs;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::{service_fn, ServiceBuilder, ServiceExt};

    fn guard() -> Arc<AdmissionGuard> {
        let clock: Arc<dyn crate::clock::Clock> = Arc::new(ManualClock::new(0));
        let tiers: TierSet = TierConfigs::default().build(clock.clone()).unwrap();
        Arc::new(AdmissionGuard::new(tiers).with_clock(clock))
    }

    fn request(ip: &str) -> http::Request<()> {
        http::Request::builder().header("x-forwarded-for", ip).body(()).unwrap()
    }

    #[tokio::test]
    async fn denied_requests_never_reach_inner_service() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let svc = ServiceBuilder::new()
            .layer(AdmissionLayer::new(guard(), OperationClass::Research))
            .service(service_fn(move |_req: http::Request<()>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>("computed")
                }
            }));

        assert_eq!(svc.clone().oneshot(request("203.0.113.5")).await.unwrap(), "computed");
        assert_eq!(svc.clone().oneshot(request("203.0.113.5")).await.unwrap(), "computed");
        let err = svc.clone().oneshot(request("203.0.113.5")).await.unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(err.rejection().map(|r| r.remaining), Some(0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Another client still has its full allowance.
        assert!(svc.oneshot(request("198.51.100.1")).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn inner_errors_are_wrapped() {
        let svc = AdmissionLayer::new(guard(), OperationClass::Api).layer(service_fn(
            |_req: http::Request<()>| async { Err::<(), _>(std::io::Error::other("boom")) },
        ));
        let err = svc.oneshot(request("10.0.0.1")).await.unwrap_err();
        assert!(err.is_inner());
        assert_eq!(err.to_string(), "boom");
    }
}
