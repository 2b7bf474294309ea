//! Public orchestrator surface + builder.
//! Internals are split into `retry` (policy + cache mode) and `constants` (UA + defaults).

pub(crate) mod constants;
pub mod retry;

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;

use crate::breaker::{BreakerConfig, BreakerRegistry, BreakerSnapshot, Outcome};
use crate::cache::TtlCache;
use crate::coalesce::Coalescer;
use crate::core::config::OrchestratorConfig;
use crate::core::envelope::ApiEnvelope;
use crate::core::fingerprint::{Fingerprint, bucket_of};
use crate::core::net::Attempt;
use crate::core::FetchError;
use crate::scheduler::{Priority, Scheduler};
use constants::USER_AGENT;
pub use retry::{Backoff, CacheMode, FailureKind, RetryConfig, RetryDecision, RetryReason};

/// A decoded JSON response body, shared between the cache and every coalesced caller.
pub type Payload = Arc<Value>;

/// The HTTP side of a request: method, JSON body and extra headers.
///
/// Only the method, URL and body take part in the request [`Fingerprint`]; headers do not.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::get()
    }
}

impl RequestOptions {
    /// A plain `GET`.
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            body: None,
            headers: Vec::new(),
        }
    }

    /// A `POST` with a JSON body.
    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a request header. Invalid names or values surface as [`FetchError::Config`]
    /// when the request is sent.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Per-call orchestration settings. Unset fields fall back to the orchestrator's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchConfig {
    /// Cache lifetime of a successful result.
    pub ttl: Option<Duration>,
    /// Scheduling tier.
    pub priority: Option<Priority>,
    /// Per-attempt deadline.
    pub timeout: Option<Duration>,
    /// Overrides the retry policy's attempt cap.
    pub max_retries: Option<u32>,
    pub cache_mode: CacheMode,
}

impl FetchConfig {
    #[must_use]
    pub const fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    #[must_use]
    pub const fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }
}

/// Counters describing what the orchestrator is holding right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorStats {
    /// Cached entries, including expired ones not yet evicted.
    pub cached_entries: usize,
    /// Coalesced operations in flight.
    pub in_flight: usize,
    /// Attempts waiting in the scheduler queue.
    pub queued: usize,
    /// Attempts currently executing.
    pub running: usize,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: Option<Url>,
    cache: Mutex<TtlCache<Payload>>,
    breakers: Arc<BreakerRegistry>,
    coalescer: Coalescer<Payload, FetchError>,
    scheduler: Scheduler,
    retry: RetryConfig,
    default_timeout: Duration,
    default_priority: Priority,
    attempt_header: Option<Arc<str>>,
}

/// The single sanctioned fetch path.
///
/// Owns the cache, breaker registry, in-flight coalescer and scheduler; clones share
/// them. Construct one at startup and hand clones to consumers.
///
/// # Example
///
/// ```no_run
/// # use dashfetch::{FetchConfig, Orchestrator, Priority, RequestOptions};
/// # use std::time::Duration;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let orchestrator = Orchestrator::builder()
///     .base_url("https://dashboard.example.com/".parse()?)
///     .max_concurrent(2)
///     .min_interval(Duration::from_millis(300))
///     .build()?;
///
/// let metrics = orchestrator
///     .fetch_data(
///         "/api/orchestrator/token-metrics",
///         RequestOptions::get(),
///         FetchConfig::default()
///             .ttl(Duration::from_secs(30))
///             .priority(Priority::Critical),
///     )
///     .await?;
/// println!("{metrics}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create a new builder.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Fetches `endpoint`, going through cache, breaker, coalescer and scheduler.
    ///
    /// Relative endpoints are resolved against the configured base URL.
    ///
    /// # Errors
    ///
    /// [`FetchError::CircuitOpen`] when the endpoint's breaker is open,
    /// [`FetchError::Timeout`], [`FetchError::Http`] or [`FetchError::Network`] once
    /// retries are exhausted (or immediately for non-retryable statuses),
    /// [`FetchError::Cancelled`] when the queued attempt was cancelled,
    /// [`FetchError::Url`] for unresolvable endpoints and [`FetchError::Decode`] for
    /// non-JSON bodies.
    #[tracing::instrument(level = "debug", skip(self, options, config), fields(method = %options.method))]
    pub async fn fetch_data(
        &self,
        endpoint: &str,
        options: RequestOptions,
        config: FetchConfig,
    ) -> Result<Payload, FetchError> {
        let url = self.resolve(endpoint)?;
        let fingerprint = Fingerprint::new(&url, &options.method, options.body.as_ref());

        if config.cache_mode == CacheMode::Use {
            let hit = self.inner.cache.lock().await.get(fingerprint.key());
            if let Some(payload) = hit {
                tracing::trace!(key = fingerprint.key(), "cache hit");
                return Ok(payload);
            }
        }

        self.inner.breakers.check(fingerprint.bucket())?;

        let key = fingerprint.key().to_string();
        let this = self.clone();
        self.inner
            .coalescer
            .join(&key, move || this.run_operation(fingerprint, url, options, config))
            .await
    }

    /// `GET` with default settings.
    ///
    /// # Errors
    ///
    /// See [`fetch_data`](Self::fetch_data).
    pub async fn get(&self, endpoint: &str) -> Result<Payload, FetchError> {
        self.fetch_data(endpoint, RequestOptions::get(), FetchConfig::default())
            .await
    }

    /// Fetches and deserializes the payload into `T`.
    ///
    /// # Errors
    ///
    /// See [`fetch_data`](Self::fetch_data); additionally [`FetchError::Decode`] when the
    /// payload does not match `T`.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
        config: FetchConfig,
    ) -> Result<T, FetchError> {
        let payload = self.fetch_data(endpoint, options, config).await?;
        Ok(T::deserialize(payload.as_ref())?)
    }

    /// Fetches a `{ success, data, error }` envelope and returns its data.
    ///
    /// # Errors
    ///
    /// See [`fetch_json`](Self::fetch_json); additionally [`FetchError::Api`] when the
    /// backend reports `success: false`.
    pub async fn fetch_envelope<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
        config: FetchConfig,
    ) -> Result<T, FetchError> {
        self.fetch_json::<ApiEnvelope<T>>(endpoint, options, config)
            .await?
            .into_data()
    }

    /// Cancels queued (not yet started) attempts whose fingerprint contains `pattern`.
    /// Returns how many were removed.
    pub fn cancel(&self, pattern: &str) -> usize {
        self.inner.scheduler.cancel(pattern)
    }

    /// Drops cached entries whose fingerprint contains `pattern`.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        self.inner.cache.lock().await.invalidate_matching(pattern)
    }

    pub async fn clear_cache(&self) {
        self.inner.cache.lock().await.clear();
    }

    /// Evicts expired cache entries eagerly. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        self.inner.cache.lock().await.purge_expired()
    }

    /// The circuit breaker state for `endpoint`'s bucket.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Url`] if the endpoint cannot be resolved.
    pub fn breaker_status(&self, endpoint: &str) -> Result<BreakerSnapshot, FetchError> {
        let url = self.resolve(endpoint)?;
        Ok(self.inner.breakers.snapshot(&bucket_of(&url)))
    }

    /// Forgets the breaker state for `endpoint`'s bucket.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Url`] if the endpoint cannot be resolved.
    pub fn reset_breaker(&self, endpoint: &str) -> Result<(), FetchError> {
        let url = self.resolve(endpoint)?;
        self.inner.breakers.reset(&bucket_of(&url));
        Ok(())
    }

    pub async fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            cached_entries: self.inner.cache.lock().await.len(),
            in_flight: self.inner.coalescer.len(),
            queued: self.inner.scheduler.queued(),
            running: self.inner.scheduler.running(),
        }
    }

    fn resolve(&self, endpoint: &str) -> Result<Url, FetchError> {
        match Url::parse(endpoint) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.inner.base_url {
                Some(base) => Ok(base.join(endpoint)?),
                None => Err(FetchError::Url(url::ParseError::RelativeUrlWithoutBase)),
            },
            Err(e) => Err(e.into()),
        }
    }

    // One coalesced operation: breaker permit, then attempts through the scheduler with
    // backoff sleeps in between, then cache write-through and breaker report.
    async fn run_operation(
        self,
        fingerprint: Fingerprint,
        url: Url,
        options: RequestOptions,
        config: FetchConfig,
    ) -> Result<Payload, FetchError> {
        let inner = &self.inner;
        let permit = inner.breakers.try_acquire(fingerprint.bucket())?;

        let retry = match config.max_retries {
            Some(n) if n != inner.retry.max_retries => Cow::Owned(RetryConfig {
                max_retries: n,
                ..inner.retry.clone()
            }),
            _ => Cow::Borrowed(&inner.retry),
        };
        let priority = config.priority.unwrap_or(inner.default_priority);
        let call = Attempt {
            http: inner.http.clone(),
            url,
            options: Arc::new(options),
            timeout: config.timeout.unwrap_or(inner.default_timeout),
            attempt_header: inner.attempt_header.clone(),
        };

        let mut attempt: u32 = 1;
        loop {
            let this_call = call.clone();
            let result = inner
                .scheduler
                .enqueue(fingerprint.key(), priority, attempt, move || {
                    this_call.run(attempt)
                })
                .await
                .and_then(std::convert::identity);

            let err = match result {
                Ok(payload) => {
                    permit.settle(Outcome::Success);
                    if config.cache_mode != CacheMode::Bypass {
                        inner.cache.lock().await.insert(
                            fingerprint.key(),
                            Arc::clone(&payload),
                            config.ttl,
                        );
                    }
                    return Ok(payload);
                }
                Err(err) => err,
            };

            let Some(kind) = err.failure_kind() else {
                permit.settle(Outcome::Neutral);
                return Err(err);
            };

            let decision = retry.decide_with_hint(attempt, kind, err.retry_after());

            if !decision.should_retry {
                tracing::debug!(
                    key = fingerprint.key(),
                    attempt,
                    reason = ?decision.reason,
                    error = %err,
                    "request failed"
                );
                permit.settle(breaker_outcome(kind));
                return Err(err);
            }

            tracing::warn!(
                key = fingerprint.key(),
                attempt,
                delay_ms = u64::try_from(decision.delay.as_millis()).unwrap_or(u64::MAX),
                reason = ?decision.reason,
                error = %err,
                "attempt failed, retrying"
            );
            tokio::time::sleep(decision.delay).await;
            attempt += 1;
        }
    }
}

fn breaker_outcome(kind: FailureKind) -> Outcome {
    match kind {
        FailureKind::RateLimited => Outcome::Throttled,
        // The endpoint answered; the request itself was wrong.
        FailureKind::Client(_) => Outcome::Success,
        FailureKind::Timeout | FailureKind::Network | FailureKind::Server(_) => Outcome::Failure,
    }
}

/* ----------------------- Builder ----------------------- */

#[derive(Default)]
pub struct OrchestratorBuilder {
    config: Option<OrchestratorConfig>,
    http: Option<Client>,
    user_agent: Option<String>,
    base_url: Option<Url>,
    connect_timeout: Option<Duration>,
    timeout: Option<Duration>,
    cache_ttl: Option<Duration>,
    cache_capacity: Option<usize>,
    retry: Option<RetryConfig>,
    breaker: Option<BreakerConfig>,
    max_concurrent: Option<usize>,
    min_interval: Option<Duration>,
    default_priority: Option<Priority>,
    attempt_header: Option<String>,
}

impl OrchestratorBuilder {
    /// Start from a loaded configuration. Individual setters still override it.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a preconfigured HTTP client (proxies, TLS roots, ...).
    /// `user_agent` and `connect_timeout` are ignored when this is set.
    pub fn http_client(mut self, client: Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Override the User-Agent.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Base URL that relative endpoints are joined onto.
    pub fn base_url(mut self, url: Url) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Set a connect timeout. Default: none.
    pub fn connect_timeout(mut self, dur: Duration) -> Self {
        self.connect_timeout = Some(dur);
        self
    }

    /// Default per-attempt deadline. Default: 10s.
    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = Some(dur);
        self
    }

    /// Default cache TTL. Default: 30s. Zero disables caching.
    pub fn cache_ttl(mut self, dur: Duration) -> Self {
        self.cache_ttl = Some(dur);
        self
    }

    /// Bound the number of cached entries.
    pub fn cache_capacity(mut self, entries: usize) -> Self {
        self.cache_capacity = Some(entries);
        self
    }

    pub fn retry_config(mut self, cfg: RetryConfig) -> Self {
        self.retry = Some(cfg);
        self
    }

    pub fn breaker_config(mut self, cfg: BreakerConfig) -> Self {
        self.breaker = Some(cfg);
        self
    }

    /// Maximum simultaneous network attempts. Default: 2.
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = Some(n);
        self
    }

    /// Minimum time between attempt starts. Default: 300ms.
    pub fn min_interval(mut self, dur: Duration) -> Self {
        self.min_interval = Some(dur);
        self
    }

    /// Priority for calls that do not set one. Default: [`Priority::Normal`].
    pub fn default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = Some(priority);
        self
    }

    /// Send the 1-based attempt number in this header on every request.
    pub fn attempt_header(mut self, name: impl Into<String>) -> Self {
        self.attempt_header = Some(name.into());
        self
    }

    /// Builds the orchestrator. Does not need a running Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] for out-of-range settings or if the HTTP client
    /// cannot be built, and [`FetchError::Url`] for an invalid configured base URL.
    pub fn build(self) -> Result<Orchestrator, FetchError> {
        let cfg = self.config.unwrap_or_default();
        cfg.validate()?;

        let base_url = match self.base_url {
            Some(u) => Some(u),
            None => cfg.base_url.as_deref().map(Url::parse).transpose()?,
        };

        let http = match self.http {
            Some(client) => client,
            None => {
                let ua = self
                    .user_agent
                    .as_deref()
                    .or(cfg.user_agent.as_deref())
                    .unwrap_or(USER_AGENT);
                let mut httpb = Client::builder().user_agent(ua);
                if let Some(ct) = self
                    .connect_timeout
                    .or(cfg.connect_timeout_ms.map(Duration::from_millis))
                {
                    httpb = httpb.connect_timeout(ct);
                }
                httpb
                    .build()
                    .map_err(|e| FetchError::Config(e.to_string()))?
            }
        };

        let mut scheduler = cfg.scheduler_config();
        if let Some(n) = self.max_concurrent {
            scheduler.max_concurrent = n;
        }
        if let Some(d) = self.min_interval {
            scheduler.min_interval = d;
        }
        if scheduler.max_concurrent == 0 {
            return Err(FetchError::Config("max_concurrent must be at least 1".into()));
        }

        let breaker = self.breaker.unwrap_or_else(|| cfg.breaker_config());
        if breaker.failure_threshold == 0 {
            return Err(FetchError::Config(
                "failure_threshold must be at least 1".into(),
            ));
        }

        let mut cache = TtlCache::new(
            self.cache_ttl
                .unwrap_or(Duration::from_millis(cfg.cache.default_ttl_ms)),
        );
        match self.cache_capacity.or(cfg.cache.max_entries) {
            Some(0) => {
                return Err(FetchError::Config("cache capacity must be at least 1".into()));
            }
            Some(n) => cache = cache.with_capacity_limit(n),
            None => {}
        }

        let default_timeout = self
            .timeout
            .unwrap_or(Duration::from_millis(cfg.request.timeout_ms));
        if default_timeout.is_zero() {
            return Err(FetchError::Config("timeout must be positive".into()));
        }

        let attempt_header = self
            .attempt_header
            .or(cfg.request.attempt_header.clone())
            .map(Arc::from);

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                http,
                base_url,
                cache: Mutex::new(cache),
                breakers: Arc::new(BreakerRegistry::new(breaker)),
                coalescer: Coalescer::new(),
                scheduler: Scheduler::new(scheduler),
                retry: self.retry.unwrap_or_else(|| cfg.retry_config()),
                default_timeout,
                default_priority: self.default_priority.unwrap_or(cfg.request.priority),
                attempt_header,
            }),
        })
    }
}
