//! Core components of the `dashfetch` orchestrator.
//!
//! This module contains the foundational building blocks of the library, including:
//! - The main [`Orchestrator`] and its builder.
//! - The primary [`FetchError`] type.
//! - Request identity ([`Fingerprint`]) and per-call options.
//! - File/string configuration and the backend response envelope.

/// The orchestrator client, builder, per-call options and retry policy.
pub mod client;
/// Serde-loadable configuration.
pub mod config;
/// The backend's `{ success, data, error }` response envelope.
pub mod envelope;
/// The primary error type (`FetchError`) for the crate.
pub mod error;
/// Request fingerprints.
pub mod fingerprint;
#[cfg(feature = "tracing-subscriber")]
pub mod logging;
pub(crate) mod net;

use std::sync::{Mutex, MutexGuard, PoisonError};

// convenient re-exports so most code can just `use crate::core::Orchestrator`
pub use client::{
    CacheMode, FetchConfig, Orchestrator, OrchestratorBuilder, OrchestratorStats, Payload,
    RequestOptions,
};
pub use config::OrchestratorConfig;
pub use envelope::ApiEnvelope;
pub use error::FetchError;
pub use fingerprint::Fingerprint;

/// Locks a mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate leaves its map in a consistent state, so a
/// poisoned lock carries no torn data.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
