//! Per-endpoint circuit breakers.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: endpoint assumed down, requests fail fast
//! - Half-Open: one probe request tests whether the endpoint recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: cool-down elapsed (evaluated lazily on access)
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails (cool-down restarts)
//! ```
//!
//! Buckets are endpoint origin + path, created on the first observed failure and kept for
//! the life of the registry. HTTP 429 is back-pressure, not ill health: throttled
//! outcomes are counted separately and never open a breaker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::core::{FetchError, lock};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Thresholds shared by every bucket in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed breaker.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before allowing a probe.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// How a guarded operation ended, from the breaker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The endpoint answered.
    Success,
    /// Timeout, connection failure or 5xx after retries.
    Failure,
    /// The endpoint kept answering 429.
    Throttled,
    /// Nothing was learned about the endpoint's health.
    Neutral,
}

#[derive(Debug, Clone)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    throttled: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            throttled: 0,
            last_failure_at: None,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    fn refresh(&mut self, now: Instant, cooldown: Duration, bucket: &str) {
        if self.state == CircuitState::Open
            && self
                .opened_at
                .is_some_and(|at| now.saturating_duration_since(at) >= cooldown)
        {
            self.state = CircuitState::HalfOpen;
            self.probe_in_flight = false;
            tracing::info!(bucket, "circuit half-open, allowing a probe");
        }
    }

    fn remaining_cooldown(&self, now: Instant, cooldown: Duration) -> Option<Duration> {
        self.opened_at
            .map(|at| cooldown.saturating_sub(now.saturating_duration_since(at)))
    }
}

/// A point-in-time view of one bucket's breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Operations that ended throttled (429) since the last success.
    pub throttled: u32,
    pub last_failure_at: Option<Instant>,
    pub opened_at: Option<Instant>,
}

/// Registry of breakers, one per endpoint bucket.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    buckets: Mutex<HashMap<String, BreakerState>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Fails fast if the bucket's breaker is open and still cooling down.
    ///
    /// Does not claim the half-open probe; callers that go on to start a network
    /// operation must [`try_acquire`](Self::try_acquire) a permit.
    pub fn check(&self, bucket: &str) -> Result<(), FetchError> {
        let now = Instant::now();
        let mut buckets = lock(&self.buckets);
        let Some(st) = buckets.get_mut(bucket) else {
            return Ok(());
        };
        st.refresh(now, self.config.cooldown, bucket);
        if st.state == CircuitState::Open {
            return Err(FetchError::CircuitOpen {
                bucket: bucket.to_string(),
                retry_after: st.remaining_cooldown(now, self.config.cooldown),
            });
        }
        Ok(())
    }

    /// Claims permission to start a network operation against `bucket`.
    ///
    /// In the half-open state only one permit (the probe) is handed out until it settles.
    pub fn try_acquire(self: &Arc<Self>, bucket: &str) -> Result<BreakerPermit, FetchError> {
        let now = Instant::now();
        let mut buckets = lock(&self.buckets);
        let probe = match buckets.get_mut(bucket) {
            None => false,
            Some(st) => {
                st.refresh(now, self.config.cooldown, bucket);
                match st.state {
                    CircuitState::Closed => false,
                    CircuitState::Open => {
                        return Err(FetchError::CircuitOpen {
                            bucket: bucket.to_string(),
                            retry_after: st.remaining_cooldown(now, self.config.cooldown),
                        });
                    }
                    CircuitState::HalfOpen if st.probe_in_flight => {
                        return Err(FetchError::CircuitOpen {
                            bucket: bucket.to_string(),
                            retry_after: None,
                        });
                    }
                    CircuitState::HalfOpen => {
                        st.probe_in_flight = true;
                        true
                    }
                }
            }
        };
        Ok(BreakerPermit {
            registry: Arc::clone(self),
            bucket: bucket.to_string(),
            probe,
            settled: false,
        })
    }

    /// Records the outcome of an operation against `bucket`.
    pub fn record(&self, bucket: &str, outcome: Outcome) {
        self.record_inner(bucket, outcome, false);
    }

    fn record_inner(&self, bucket: &str, outcome: Outcome, probe: bool) {
        let now = Instant::now();
        let mut buckets = lock(&self.buckets);

        let st = match outcome {
            Outcome::Failure | Outcome::Throttled => buckets
                .entry(bucket.to_string())
                .or_insert_with(BreakerState::new),
            Outcome::Success | Outcome::Neutral => match buckets.get_mut(bucket) {
                Some(st) => st,
                None => return,
            },
        };
        st.refresh(now, self.config.cooldown, bucket);
        if probe {
            st.probe_in_flight = false;
        }

        match outcome {
            Outcome::Failure => {
                st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                st.last_failure_at = Some(now);
                match st.state {
                    CircuitState::HalfOpen => {
                        st.state = CircuitState::Open;
                        st.opened_at = Some(now);
                        tracing::warn!(bucket, "probe failed, circuit re-opened");
                    }
                    CircuitState::Closed
                        if st.consecutive_failures >= self.config.failure_threshold =>
                    {
                        st.state = CircuitState::Open;
                        st.opened_at = Some(now);
                        tracing::warn!(
                            bucket,
                            failures = st.consecutive_failures,
                            cooldown_ms = u64::try_from(self.config.cooldown.as_millis()).unwrap_or(u64::MAX),
                            "circuit opened"
                        );
                    }
                    _ => {}
                }
            }
            Outcome::Success => {
                if st.state != CircuitState::Closed {
                    tracing::info!(bucket, "circuit closed");
                }
                st.state = CircuitState::Closed;
                st.consecutive_failures = 0;
                st.throttled = 0;
                st.opened_at = None;
                st.probe_in_flight = false;
            }
            Outcome::Throttled => {
                st.throttled = st.throttled.saturating_add(1);
            }
            Outcome::Neutral => {}
        }
    }

    /// A snapshot of the bucket's breaker. Unknown buckets report a fresh closed breaker.
    pub fn snapshot(&self, bucket: &str) -> BreakerSnapshot {
        let now = Instant::now();
        let mut buckets = lock(&self.buckets);
        let st = match buckets.get_mut(bucket) {
            Some(st) => {
                st.refresh(now, self.config.cooldown, bucket);
                st.clone()
            }
            None => BreakerState::new(),
        };
        BreakerSnapshot {
            state: st.state,
            consecutive_failures: st.consecutive_failures,
            throttled: st.throttled,
            last_failure_at: st.last_failure_at,
            opened_at: st.opened_at,
        }
    }

    /// Forgets everything about one bucket.
    pub fn reset(&self, bucket: &str) {
        lock(&self.buckets).remove(bucket);
    }

    pub fn reset_all(&self) {
        lock(&self.buckets).clear();
    }
}

/// Permission to run one operation against a bucket.
///
/// Settle it with the operation's [`Outcome`]; a permit dropped unsettled counts as
/// [`Outcome::Neutral`] and releases a half-open probe slot.
#[derive(Debug)]
pub struct BreakerPermit {
    registry: Arc<BreakerRegistry>,
    bucket: String,
    probe: bool,
    settled: bool,
}

impl BreakerPermit {
    /// Whether this permit is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.registry.record_inner(&self.bucket, outcome, self.probe);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.registry
                .record_inner(&self.bucket, Outcome::Neutral, self.probe);
        }
    }
}
