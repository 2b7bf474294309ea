//! dashfetch: resilient request orchestration for dashboard data fetches.
//!
//! Every fetch goes through one [`Orchestrator`], which layers:
//! - a TTL response cache ([`cache`]),
//! - per-endpoint circuit breakers ([`breaker`]),
//! - in-flight deduplication ([`coalesce`]),
//! - a priority queue with bounded concurrency and start pacing ([`scheduler`]),
//! - retries with backoff for transient failures ([`RetryConfig`]).
//!
//! [`PollBuilder`] drives periodic refreshes on top of the same path.

pub mod breaker;
pub mod cache;
pub mod coalesce;
pub mod core;
pub mod poll;
pub mod scheduler;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerSnapshot, CircuitState, Outcome};
pub use cache::TtlCache;
pub use coalesce::Coalescer;
pub use crate::core::client::{Backoff, FailureKind, RetryConfig, RetryDecision, RetryReason};
pub use crate::core::{
    ApiEnvelope, CacheMode, FetchConfig, FetchError, Fingerprint, Orchestrator,
    OrchestratorBuilder, OrchestratorConfig, OrchestratorStats, Payload, RequestOptions,
};
pub use poll::{PollBuilder, PollConfig, PollHandle, PollUpdate};
pub use scheduler::{Priority, QueuedRequest, Scheduler, SchedulerConfig};

#[cfg(feature = "tracing-subscriber")]
pub use crate::core::logging::init_tracing;
