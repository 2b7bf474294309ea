//! Serde-loadable orchestrator configuration.
//!
//! Every field has a default, so a config file only needs the values it changes:
//!
//! ```json
//! {
//!   "base_url": "https://dashboard.example.com/",
//!   "scheduler": { "max_concurrent": 1, "min_interval_ms": 1000 },
//!   "breaker": { "failure_threshold": 3, "cooldown_ms": 30000 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerConfig;
use crate::core::FetchError;
use crate::core::client::constants::DEFAULT_TIMEOUT;
use crate::core::client::retry::{Backoff, RetryConfig};
use crate::scheduler::{Priority, SchedulerConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub default_ttl_ms: u64,
    pub max_entries: Option<usize>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_ms: 30_000,
            max_entries: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub max_concurrent: usize,
    pub min_interval_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let d = SchedulerConfig::default();
        Self {
            max_concurrent: d.max_concurrent,
            min_interval_ms: millis(d.min_interval),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let d = BreakerConfig::default();
        Self {
            failure_threshold: d.failure_threshold,
            cooldown_ms: millis(d.cooldown),
        }
    }
}

/// Retry settings; the general backoff is always exponential, the 429 backoff linear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub enabled: bool,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    pub rate_limit_delay_ms: u64,
    pub rate_limit_max_delay_ms: u64,
    pub respect_retry_after: bool,
    pub max_retry_after_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 500,
            factor: 2.0,
            max_delay_ms: 8_000,
            jitter: true,
            rate_limit_delay_ms: 1_000,
            rate_limit_max_delay_ms: 10_000,
            respect_retry_after: true,
            max_retry_after_ms: 30_000,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(s: &RetrySettings) -> Self {
        Self {
            enabled: s.enabled,
            max_retries: s.max_retries,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(s.base_delay_ms),
                factor: s.factor,
                max: Duration::from_millis(s.max_delay_ms),
                jitter: s.jitter,
            },
            rate_limit_backoff: Backoff::Linear {
                base: Duration::from_millis(s.rate_limit_delay_ms),
                max: Duration::from_millis(s.rate_limit_max_delay_ms),
            },
            respect_retry_after: s.respect_retry_after,
            max_retry_after: Duration::from_millis(s.max_retry_after_ms),
        }
    }
}

/// Defaults applied to calls that do not override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSettings {
    pub timeout_ms: u64,
    pub priority: Priority,
    /// Header carrying the 1-based attempt number, if any.
    pub attempt_header: Option<String>,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            timeout_ms: millis(DEFAULT_TIMEOUT),
            priority: Priority::Normal,
            attempt_header: None,
        }
    }
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Base URL that relative endpoints are resolved against.
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub cache: CacheSettings,
    pub scheduler: SchedulerSettings,
    pub breaker: BreakerSettings,
    pub retry: RetrySettings,
    pub request: RequestSettings,
}

impl OrchestratorConfig {
    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] if the JSON is malformed or a value is out of range.
    pub fn from_json_str(s: &str) -> Result<Self, FetchError> {
        let cfg: Self = serde_json::from_str(s).map_err(|e| FetchError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] if the file cannot be read or is invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FetchError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FetchError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.scheduler.max_concurrent == 0 {
            return Err(FetchError::Config(
                "scheduler.max_concurrent must be at least 1".into(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(FetchError::Config(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.cache.max_entries == Some(0) {
            return Err(FetchError::Config(
                "cache.max_entries must be at least 1 when set".into(),
            ));
        }
        if self.request.timeout_ms == 0 {
            return Err(FetchError::Config("request.timeout_ms must be positive".into()));
        }
        if !self.retry.factor.is_finite() || self.retry.factor < 1.0 {
            return Err(FetchError::Config("retry.factor must be >= 1.0".into()));
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from(&self.retry)
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            cooldown: Duration::from_millis(self.breaker.cooldown_ms),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.scheduler.max_concurrent,
            min_interval: Duration::from_millis(self.scheduler.min_interval_ms),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
