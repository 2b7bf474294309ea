//! Periodic polling on top of [`Orchestrator::fetch_data`].
//!
//! Dashboards refresh the same widgets on timers. Each poller is an explicit task that
//! calls the orchestrator on a fixed cadence; overlapping pollers for the same endpoint
//! are absorbed by the cache and the in-flight coalescer.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};

use crate::core::{FetchConfig, FetchError, Orchestrator, Payload, RequestOptions};

/* ---------------- Public API ---------------- */

/// One poll result for one endpoint.
#[derive(Debug, Clone)]
pub struct PollUpdate {
    pub endpoint: String,
    pub result: Result<Payload, FetchError>,
    /// When this update was produced client-side.
    pub fetched_at: DateTime<Utc>,
}

/// Configure polling behavior.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Poll cadence. Default: 1s.
    pub interval: Duration,
    /// Only emit a successful update when the payload changed since the previous update.
    /// Errors are always emitted, and the first success after an error is too. Default: true.
    pub diff_only: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            diff_only: true,
        }
    }
}

/// A handle for a running poll task.
#[derive(Debug)]
pub struct PollHandle {
    join: JoinHandle<()>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl PollHandle {
    /// Politely ask the poller to stop and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.join.await;
    }

    /// Immediately abort the background task (no more messages will be sent).
    pub fn abort(self) {
        self.join.abort();
    }
}

/// Builder to start a polling task for one or more endpoints.
#[derive(Debug)]
pub struct PollBuilder {
    orchestrator: Orchestrator,
    endpoints: Vec<String>,
    options: RequestOptions,
    fetch: FetchConfig,
    cfg: PollConfig,
}

impl PollBuilder {
    /// Start from an existing orchestrator (cloned internally).
    pub fn new(orchestrator: &Orchestrator) -> Self {
        Self {
            orchestrator: orchestrator.clone(),
            endpoints: Vec::new(),
            options: RequestOptions::get(),
            fetch: FetchConfig::default(),
            cfg: PollConfig::default(),
        }
    }

    /// Poll these endpoints (replaces).
    #[must_use]
    pub fn endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Add a single endpoint.
    #[must_use]
    pub fn add_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// Request options used for every endpoint.
    #[must_use]
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Per-call settings (TTL, priority, ...) used for every poll.
    #[must_use]
    pub fn fetch_config(mut self, config: FetchConfig) -> Self {
        self.fetch = config;
        self
    }

    /// Poll interval.
    #[must_use]
    pub fn interval(mut self, dur: Duration) -> Self {
        self.cfg.interval = dur;
        self
    }

    /// Emit only on payload changes (default true).
    #[must_use]
    pub fn diff_only(mut self, yes: bool) -> Self {
        self.cfg.diff_only = yes;
        self
    }

    /// Start the poller. Returns a handle and a receiver of updates.
    ///
    /// Drop the receiver to stop at the next tick, or call `handle.stop().await` /
    /// `handle.abort()`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] if no endpoint was given or the interval is zero.
    pub fn start(self) -> Result<(PollHandle, mpsc::Receiver<PollUpdate>), FetchError> {
        if self.endpoints.is_empty() {
            return Err(FetchError::Config("poll: at least one endpoint required".into()));
        }
        if self.cfg.interval.is_zero() {
            return Err(FetchError::Config("poll: interval must be positive".into()));
        }

        let (tx, rx) = mpsc::channel::<PollUpdate>(1024);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let Self {
            orchestrator,
            endpoints,
            options,
            fetch,
            cfg,
        } = self;

        let join = tokio::spawn(async move {
            let mut ticker = interval(cfg.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // last successful payload per endpoint (for diff_only)
            let mut last: HashMap<String, Payload> = HashMap::new();

            loop {
                select! {
                    _ = ticker.tick() => {
                        for endpoint in &endpoints {
                            let result = orchestrator
                                .fetch_data(endpoint, options.clone(), fetch.clone())
                                .await;
                            if cfg.diff_only
                                && let Ok(payload) = &result
                            {
                                let prev = last.insert(endpoint.clone(), payload.clone());
                                if prev.is_some_and(|p| p == *payload) {
                                    continue; // unchanged; skip
                                }
                            }
                            if let Err(e) = &result {
                                tracing::debug!(endpoint = %endpoint, error = %e, "poll fetch failed");
                                // the next success is news even if it matches the old payload
                                last.remove(endpoint);
                            }
                            let update = PollUpdate {
                                endpoint: endpoint.clone(),
                                result,
                                fetched_at: Utc::now(),
                            };
                            if tx.send(update).await.is_err() {
                                return;
                            }
                        }
                    }
                    _ = &mut stop_rx => {
                        break;
                    }
                }
            }
        });

        Ok((
            PollHandle {
                join,
                stop_tx: Some(stop_tx),
            },
            rx,
        ))
    }
}
