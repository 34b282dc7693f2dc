//! Configuration loading.
//!
//! Everything is optional; an empty TOML document yields the production defaults.
//!
//! ```toml
//! compute_timeout_ms = 45000
//! identifier_headers = ["x-forwarded-for", "cf-connecting-ip", "x-real-ip"]
//!
//! [tiers.research]
//! window_ms = 60000
//! max_requests = 2
//!
//! [cache]
//! default_ttl_secs = 3600
//! coalesce_misses = false
//! ```

use crate::admission::{IdentifierExtractor, TierSet};
use crate::clock::Clock;
use crate::error::PolicyError;
use crate::rate_limit::{FixedWindowLimiter, RateLimitPolicy, RateLimiter};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Errors raised while loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid {tier} tier: {source}")]
    Policy {
        tier: &'static str,
        #[source]
        source: PolicyError,
    },
    #[error("invalid compute timeout: {0}")]
    Timeout(PolicyError),
    #[error("invalid identifier header: {0}")]
    Header(#[from] http::header::InvalidHeaderName),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub tiers: TierConfigs,
    #[serde(default)]
    pub cache: CacheSettings,
    /// Deadline for a single producer call. None means the caller's own deadline applies.
    #[serde(default)]
    pub compute_timeout_ms: Option<u64>,
    /// Origin headers searched for the client identifier, highest priority first.
    #[serde(default = "default_identifier_headers")]
    pub identifier_headers: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            tiers: TierConfigs::default(),
            cache: CacheSettings::default(),
            compute_timeout_ms: None,
            identifier_headers: default_identifier_headers(),
        }
    }
}

fn default_identifier_headers() -> Vec<String> {
    IdentifierExtractor::DEFAULT_HEADERS.iter().map(|h| h.to_string()).collect()
}

impl GuardConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Check every tier, the timeout and the header list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tiers.policies()?;
        self.compute_timeout()?;
        self.identifier_extractor()?;
        Ok(())
    }

    /// Producer deadline, if configured.
    pub fn compute_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        match self.compute_timeout_ms {
            None => Ok(None),
            Some(0) => Err(ConfigError::Timeout(PolicyError::InvalidTimeout(Duration::ZERO))),
            Some(ms) => Ok(Some(Duration::from_millis(ms))),
        }
    }

    /// Build the identifier extractor from `identifier_headers`.
    pub fn identifier_extractor(&self) -> Result<IdentifierExtractor, ConfigError> {
        Ok(IdentifierExtractor::from_names(&self.identifier_headers)?)
    }
}

/// Settings for one rate-limit tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TierConfig {
    pub window_ms: u64,
    pub max_requests: u32,
    #[serde(default = "default_max_tracked")]
    pub max_tracked_identifiers: usize,
}

fn default_max_tracked() -> usize {
    RateLimitPolicy::DEFAULT_MAX_TRACKED
}

impl TierConfig {
    const fn preset(window_ms: u64, max_requests: u32) -> Self {
        Self { window_ms, max_requests, max_tracked_identifiers: RateLimitPolicy::DEFAULT_MAX_TRACKED }
    }

    fn preset_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::from_parts(
            Duration::from_millis(self.window_ms),
            self.max_requests,
            self.max_tracked_identifiers,
        )
    }

    /// Validate into a policy.
    pub fn policy(&self) -> Result<RateLimitPolicy, PolicyError> {
        RateLimitPolicy::new(
            Duration::from_millis(self.window_ms),
            self.max_requests,
            self.max_tracked_identifiers,
        )
    }
}

/// Per-class tier settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TierConfigs {
    #[serde(default = "TierConfigs::chat_preset")]
    pub chat: TierConfig,
    #[serde(default = "TierConfigs::api_preset")]
    pub api: TierConfig,
    #[serde(default = "TierConfigs::research_preset")]
    pub research: TierConfig,
    #[serde(default = "TierConfigs::bulk_preset")]
    pub bulk: TierConfig,
}

impl TierConfigs {
    /// 20 requests per minute.
    pub const CHAT: TierConfig = TierConfig::preset(60_000, 20);
    /// 100 requests per minute.
    pub const API: TierConfig = TierConfig::preset(60_000, 100);
    /// 2 requests per minute; every admission can cost a full AI research run.
    pub const RESEARCH: TierConfig = TierConfig::preset(60_000, 2);
    /// 10 requests per hour.
    pub const BULK: TierConfig = TierConfig::preset(3_600_000, 10);

    fn chat_preset() -> TierConfig {
        Self::CHAT
    }
    fn api_preset() -> TierConfig {
        Self::API
    }
    fn research_preset() -> TierConfig {
        Self::RESEARCH
    }
    fn bulk_preset() -> TierConfig {
        Self::BULK
    }

    /// Validate all four tiers, in `OperationClass::ALL` order.
    pub fn policies(&self) -> Result<[RateLimitPolicy; 4], ConfigError> {
        let validate = |tier: &'static str, cfg: &TierConfig| {
            cfg.policy().map_err(|source| ConfigError::Policy { tier, source })
        };
        Ok([
            validate("chat", &self.chat)?,
            validate("api", &self.api)?,
            validate("research", &self.research)?,
            validate("bulk", &self.bulk)?,
        ])
    }

    /// Validate and build in-memory fixed-window tiers sharing `clock`.
    pub fn build(&self, clock: Arc<dyn Clock>) -> Result<TierSet, ConfigError> {
        Ok(Self::tier_set(self.policies()?, &clock))
    }

    /// Tiers built from the four presets.
    pub(crate) fn presets(clock: Arc<dyn Clock>) -> TierSet {
        let policies =
            [Self::CHAT, Self::API, Self::RESEARCH, Self::BULK].map(|cfg| cfg.preset_policy());
        Self::tier_set(policies, &clock)
    }

    fn tier_set(policies: [RateLimitPolicy; 4], clock: &Arc<dyn Clock>) -> TierSet {
        let [chat, api, research, bulk] = policies.map(|policy| -> Arc<dyn RateLimiter> {
            Arc::new(FixedWindowLimiter::new(policy).with_shared_clock(clock.clone()))
        });
        TierSet::new(chat, api, research, bulk)
    }
}

impl Default for TierConfigs {
    fn default() -> Self {
        Self { chat: Self::CHAT, api: Self::API, research: Self::RESEARCH, bulk: Self::BULK }
    }
}

/// Result cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CacheSettings {
    /// TTL applied when a caller does not pass one (default: 1 hour).
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Capacity of the in-memory backend (default: 10,000).
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    /// Make concurrent misses for one key wait for a single producer (default: off).
    #[serde(default)]
    pub coalesce_misses: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            coalesce_misses: false,
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_entries() -> u64 {
    10_000
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}
