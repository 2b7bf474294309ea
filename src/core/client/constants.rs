//! Centralized defaults for the orchestrator.

use std::time::Duration;

/// User agent sent when none is configured.
pub(crate) const USER_AGENT: &str = concat!("dashfetch/", env!("CARGO_PKG_VERSION"));

/// Per-attempt deadline when neither the call nor the builder sets one.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
