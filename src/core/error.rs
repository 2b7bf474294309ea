use std::time::Duration;

use thiserror::Error;

use crate::core::client::retry::FailureKind;

/// The primary error type for all fallible operations in this crate.
///
/// Errors are `Clone` because a single coalesced network operation settles every
/// caller that joined it with the same result.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The endpoint's circuit breaker is open; no network attempt was made.
    #[error("circuit open for {bucket}")]
    CircuitOpen {
        /// The endpoint bucket (origin + path) whose breaker rejected the call.
        bucket: String,
        /// Time left before the breaker allows a probe, if known.
        retry_after: Option<Duration>,
    },

    /// A single attempt exceeded its deadline and retries were exhausted.
    #[error("request to {url} timed out after {after:?}")]
    Timeout {
        /// The URL that timed out.
        url: String,
        /// The per-attempt deadline that was exceeded.
        after: Duration,
    },

    /// The server returned a non-success HTTP status code.
    #[error("unexpected response status: {status} at {url}")]
    Http {
        /// The HTTP status code.
        status: u16,
        /// The URL that returned the error.
        url: String,
        /// The server's `Retry-After` hint, when it sent one in seconds.
        retry_after: Option<Duration>,
    },

    /// The connection failed before a response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The request was removed from the queue before it started.
    #[error("request cancelled before execution")]
    Cancelled,

    /// A provided endpoint could not be parsed or resolved.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// A successful response body was not valid JSON or did not match the requested shape.
    #[error("response decoding failed: {0}")]
    Decode(String),

    /// The backend answered with `{ "success": false }`.
    #[error("backend reported failure: {0}")]
    Api(String),

    /// The orchestrator configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl FetchError {
    /// The HTTP status code, for `Http` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classifies this error for the retry policy.
    ///
    /// Returns `None` for errors that never reached the network outcome stage
    /// (open circuit, cancellation, decoding, configuration).
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Timeout { .. } => Some(FailureKind::Timeout),
            Self::Network(_) => Some(FailureKind::Network),
            Self::Http { status, .. } => Some(FailureKind::from_status(*status)),
            _ => None,
        }
    }

    /// Whether the retry policy would consider this error transient.
    pub fn is_retryable(&self) -> bool {
        self.failure_kind().is_some_and(FailureKind::is_retryable)
    }

    pub(crate) fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(err: &reqwest::Error, url: &url::Url, after: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
                after,
            }
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::Config(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
