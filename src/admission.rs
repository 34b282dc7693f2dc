//! Admission control in front of costly operations.
//!
//! [`AdmissionGuard`] owns one [`RateLimiter`] per [`OperationClass`] and the logic that
//! turns a request's network-origin headers into a rate-limit identifier. A single
//! identifier is checked against exactly one tier per call; tiers never share state
//! and are never aggregated.
//!
//! ```rust
//! use offerguard::admission::{AdmissionGuard, OperationClass};
//!
//! let guard = AdmissionGuard::default();
//! match guard.admit("203.0.113.5", OperationClass::Research) {
//!     Ok(decision) => assert_eq!(decision.remaining, 1),
//!     Err(rejection) => panic!("unexpected: {rejection:?}"),
//! }
//! ```

use crate::clock::{Clock, SystemClock};
use crate::config::TierConfigs;
use crate::rate_limit::{AdmissionDecision, RateLimiter};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifier used when no origin header yields a usable value.
///
/// Every such client shares one bucket per tier. Misconfigured proxies therefore
/// get throttled as a group; that is accepted rather than papered over.
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

/// Class of operation, each mapped to its own tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    /// Conversational requests.
    Chat,
    /// General API traffic.
    Api,
    /// AI research calls (best-offer computation, casino discovery). Strict.
    Research,
    /// Bulk and maintenance jobs.
    Bulk,
}

impl OperationClass {
    /// Every class, in tier order.
    pub const ALL: [OperationClass; 4] =
        [OperationClass::Chat, OperationClass::Api, OperationClass::Research, OperationClass::Bulk];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Chat => "chat",
            OperationClass::Api => "api",
            OperationClass::Research => "research",
            OperationClass::Bulk => "bulk",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One limiter per operation class.
#[derive(Debug, Clone)]
pub struct TierSet {
    chat: Arc<dyn RateLimiter>,
    api: Arc<dyn RateLimiter>,
    research: Arc<dyn RateLimiter>,
    bulk: Arc<dyn RateLimiter>,
}

impl TierSet {
    pub fn new(
        chat: Arc<dyn RateLimiter>,
        api: Arc<dyn RateLimiter>,
        research: Arc<dyn RateLimiter>,
        bulk: Arc<dyn RateLimiter>,
    ) -> Self {
        Self { chat, api, research, bulk }
    }

    /// Replace the limiter for one class.
    pub fn with_tier(mut self, class: OperationClass, limiter: Arc<dyn RateLimiter>) -> Self {
        match class {
            OperationClass::Chat => self.chat = limiter,
            OperationClass::Api => self.api = limiter,
            OperationClass::Research => self.research = limiter,
            OperationClass::Bulk => self.bulk = limiter,
        }
        self
    }

    /// The limiter serving `class`.
    pub fn tier(&self, class: OperationClass) -> &Arc<dyn RateLimiter> {
        match class {
            OperationClass::Chat => &self.chat,
            OperationClass::Api => &self.api,
            OperationClass::Research => &self.research,
            OperationClass::Bulk => &self.bulk,
        }
    }
}

impl Default for TierSet {
    fn default() -> Self {
        TierConfigs::presets(Arc::new(SystemClock))
    }
}

/// Priority-ordered search of origin headers for a client identifier.
///
/// Default order: `x-forwarded-for` (first entry), `cf-connecting-ip` (trusted proxy),
/// `x-real-ip` (direct connection), then [`UNKNOWN_IDENTIFIER`].
#[derive(Debug, Clone)]
pub struct IdentifierExtractor {
    headers: Vec<HeaderName>,
}

impl IdentifierExtractor {
    /// Default header search order.
    pub const DEFAULT_HEADERS: [&'static str; 3] =
        ["x-forwarded-for", "cf-connecting-ip", "x-real-ip"];

    /// Search `headers` in the given order.
    pub fn new(headers: impl IntoIterator<Item = HeaderName>) -> Self {
        Self { headers: headers.into_iter().collect() }
    }

    /// Parse header names, failing on the first invalid one.
    pub fn from_names<I, S>(names: I) -> Result<Self, http::header::InvalidHeaderName>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let headers = names
            .into_iter()
            .map(|n| HeaderName::from_bytes(n.as_ref().trim().as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { headers })
    }

    /// Header names in search order.
    pub fn headers(&self) -> &[HeaderName] {
        &self.headers
    }

    /// Pick the identifier for a request.
    ///
    /// Comma-separated values (forwarded chains) contribute their first entry only.
    /// Empty or non-ASCII values are skipped.
    pub fn extract(&self, headers: &HeaderMap) -> String {
        self.headers
            .iter()
            .filter_map(|name| headers.get(name))
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(',').next())
            .map(str::trim)
            .find(|candidate| !candidate.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_IDENTIFIER.to_string())
    }
}

impl Default for IdentifierExtractor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_HEADERS.into_iter().map(HeaderName::from_static))
    }
}

/// Structured denial handed back to request-handling code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    /// Tier that denied the request.
    pub operation: OperationClass,
    /// The tier's `max_requests`.
    pub limit: u32,
    /// Always 0.
    pub remaining: u32,
    /// Window end, epoch millis.
    #[serde(rename = "resetAt")]
    pub reset_at_millis: u64,
    /// Whole seconds until the window resets, rounded up.
    #[serde(rename = "retryAfter")]
    pub retry_after_secs: u64,
}

impl Rejection {
    /// Build a rejection from a denied decision observed at `now_millis`.
    pub fn from_decision(
        operation: OperationClass,
        decision: &AdmissionDecision,
        now_millis: u64,
    ) -> Self {
        Self {
            operation,
            limit: decision.limit,
            remaining: 0,
            reset_at_millis: decision.reset_at_millis,
            retry_after_secs: decision.retry_after_secs(now_millis),
        }
    }

    /// Always `429 Too Many Requests`.
    pub fn status(&self) -> StatusCode {
        StatusCode::TOO_MANY_REQUESTS
    }

    /// Human readable hint for UIs.
    pub fn message(&self) -> String {
        format!("Too many requests. Please wait {} seconds.", self.retry_after_secs)
    }

    /// `x-ratelimit-*` headers plus `retry-after`.
    pub fn headers(&self) -> Vec<(HeaderName, HeaderValue)> {
        let decision = AdmissionDecision {
            allowed: false,
            limit: self.limit,
            remaining: 0,
            reset_at_millis: self.reset_at_millis,
        };
        let mut headers = decision.headers();
        headers.push((RETRY_AFTER, HeaderValue::from(self.retry_after_secs)));
        headers
    }

    /// Stable JSON body: `error`, `message`, `operation`, `limit`, `remaining`,
    /// `resetAt`, `retryAfter`.
    pub fn body(&self) -> serde_json::Value {
        let body =
            RejectionBody { error: "rate_limited", message: self.message(), rejection: self };
        // String keys and plain scalars only, so this cannot fail.
        serde_json::to_value(body).unwrap_or_default()
    }

    /// Full 429 response with headers and JSON body.
    pub fn to_response(&self) -> Response<String> {
        let mut response = Response::new(self.body().to_string());
        *response.status_mut() = self.status();
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.extend(self.headers());
        response
    }
}

#[derive(Serialize)]
struct RejectionBody<'a> {
    error: &'static str,
    message: String,
    #[serde(flatten)]
    rejection: &'a Rejection,
}

/// Maps an operation class to its tier and decides.
#[derive(Debug, Clone)]
pub struct AdmissionGuard {
    tiers: TierSet,
    extractor: IdentifierExtractor,
    clock: Arc<dyn Clock>,
}

impl AdmissionGuard {
    pub fn new(tiers: TierSet) -> Self {
        Self { tiers, extractor: IdentifierExtractor::default(), clock: Arc::new(SystemClock) }
    }

    /// Override identifier extraction.
    pub fn with_extractor(mut self, extractor: IdentifierExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Clock used to turn reset timestamps into retry-after hints. Should be the same
    /// clock the tiers use.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The configured tiers.
    pub fn tiers(&self) -> &TierSet {
        &self.tiers
    }

    /// The identifier extractor.
    pub fn extractor(&self) -> &IdentifierExtractor {
        &self.extractor
    }

    /// Identifier for a request's headers.
    pub fn identify(&self, headers: &HeaderMap) -> String {
        self.extractor.extract(headers)
    }

    /// Check `identifier` against the tier for `class`.
    pub fn decide(&self, identifier: &str, class: OperationClass) -> AdmissionDecision {
        let decision = self.tiers.tier(class).check(identifier);
        if decision.allowed {
            tracing::debug!(
                identifier,
                operation = %class,
                remaining = decision.remaining,
                limit = decision.limit,
                "admitted"
            );
        } else {
            tracing::info!(
                identifier,
                operation = %class,
                limit = decision.limit,
                reset_at = decision.reset_at_millis,
                "rate limited"
            );
        }
        decision
    }

    /// Like [`decide`](Self::decide) but turns a denial into a [`Rejection`].
    pub fn admit(
        &self,
        identifier: &str,
        class: OperationClass,
    ) -> Result<AdmissionDecision, Rejection> {
        let decision = self.decide(identifier, class);
        if decision.allowed {
            Ok(decision)
        } else {
            Err(Rejection::from_decision(class, &decision, self.clock.now_millis()))
        }
    }

    /// Extract the identifier from `headers` and [`admit`](Self::admit) it.
    pub fn admit_headers(
        &self,
        headers: &HeaderMap,
        class: OperationClass,
    ) -> Result<AdmissionDecision, Rejection> {
        let identifier = self.identify(headers);
        self.admit(&identifier, class)
    }
}

impl Default for AdmissionGuard {
    fn default() -> Self {
        Self::new(TierSet::default())
    }
}
