use std::time::Duration;

use rand::Rng;

/// Specifies the backoff strategy for retrying failed requests.
#[derive(Clone, Debug, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed(Duration),
    /// Grows the delay by `base` per attempt: `base * attempt`, capped at `max`.
    Linear {
        /// The delay after the first failed attempt.
        base: Duration,
        /// The maximum duration to wait between retries.
        max: Duration,
    },
    /// Uses an exponential delay between retries.
    /// The delay is calculated as `base * (factor ^ (attempt - 1))`.
    /// With jitter it lands somewhere in `[delay, min(delay * factor, max))`, so
    /// successive delays never shrink.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to spread the delay upward, short of the next step.
        jitter: bool,
    },
}

impl Backoff {
    /// The delay to wait after the given (1-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::Fixed(d) => *d,
            Self::Linear { base, max } => base.saturating_mul(attempt).min(*max),
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exp = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let cap = max.as_secs_f64();
                let mut secs = (base.as_secs_f64() * factor.powi(exp)).min(cap);
                let next = (secs * factor).min(cap);
                if *jitter && next > secs {
                    secs = rand::thread_rng().gen_range(secs..next);
                }
                Duration::try_from_secs_f64(secs.min(cap)).unwrap_or(*max)
            }
        }
    }
}

/// Why a network attempt failed, as far as retrying is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// HTTP 429: the server is throttling us.
    RateLimited,
    /// The attempt exceeded its deadline.
    Timeout,
    /// The connection failed.
    Network,
    /// HTTP 5xx.
    Server(u16),
    /// Any other non-success status (4xx except 429).
    Client(u16),
}

impl FailureKind {
    /// Maps a non-success HTTP status code to a failure kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            500..=599 => Self::Server(status),
            _ => Self::Client(status),
        }
    }

    /// Client errors are never retried; everything else is transient.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Client(_))
    }
}

/// Why the policy decided the way it did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryReason {
    /// Throttled by the server; back off and try again.
    RateLimited,
    /// Timeout, connection failure or 5xx; back off and try again.
    Transient,
    /// The failure cannot be fixed by retrying.
    NotRetryable,
    /// The attempt cap was reached.
    Exhausted,
    /// Retries are turned off.
    Disabled,
}

/// The outcome of consulting the retry policy after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether another attempt should be made.
    pub should_retry: bool,
    /// How long to wait before the next attempt. Zero when not retrying.
    pub delay: Duration,
    /// The reason for the decision.
    pub reason: RetryReason,
}

impl RetryDecision {
    const fn stop(reason: RetryReason) -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
            reason,
        }
    }
}

/// Configuration for the automatic retry mechanism.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Enables or disables the retry mechanism.
    pub enabled: bool,
    /// The maximum number of retries to attempt. The total number of attempts will be `max_retries + 1`.
    pub max_retries: u32,
    /// The backoff strategy for timeouts, connection errors and 5xx responses.
    pub backoff: Backoff,
    /// The backoff strategy for 429 responses.
    pub rate_limit_backoff: Backoff,
    /// Whether a server-provided `Retry-After` replaces the computed delay on 429/503.
    pub respect_retry_after: bool,
    /// Upper bound applied to server-provided `Retry-After` hints.
    pub max_retry_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(500),
                factor: 2.0,
                max: Duration::from_secs(8),
                jitter: true,
            },
            rate_limit_backoff: Backoff::Linear {
                base: Duration::from_secs(1),
                max: Duration::from_secs(10),
            },
            respect_retry_after: true,
            max_retry_after: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Decides whether the given (1-based) failed attempt should be retried.
    pub fn decide(&self, attempt: u32, kind: FailureKind) -> RetryDecision {
        self.decide_with_hint(attempt, kind, None)
    }

    /// Like [`decide`](Self::decide), honoring a server `Retry-After` hint.
    pub fn decide_with_hint(
        &self,
        attempt: u32,
        kind: FailureKind,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::stop(RetryReason::NotRetryable);
        }
        if !self.enabled {
            return RetryDecision::stop(RetryReason::Disabled);
        }
        if attempt > self.max_retries {
            return RetryDecision::stop(RetryReason::Exhausted);
        }

        let (backoff, reason) = match kind {
            FailureKind::RateLimited => (&self.rate_limit_backoff, RetryReason::RateLimited),
            _ => (&self.backoff, RetryReason::Transient),
        };

        let mut delay = backoff.delay(attempt);
        if self.respect_retry_after
            && matches!(kind, FailureKind::RateLimited | FailureKind::Server(503))
            && let Some(hint) = retry_after
        {
            delay = hint.min(self.max_retry_after);
        }

        RetryDecision {
            should_retry: true,
            delay,
            reason,
        }
    }
}

/// Defines the behavior of the in-memory cache for an API call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Read from the cache if a non-expired entry is present; otherwise, fetch from the network
    /// and write the response to the cache. (Default)
    #[default]
    Use,
    /// Always fetch from the network, bypassing any cached entry, and write the new response to the cache.
    Refresh,
    /// Always fetch from the network and do not read from or write to the cache.
    Bypass,
}
