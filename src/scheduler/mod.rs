//! Priority-ordered, paced request queue.
//!
//! # Invariants
//! - At most `max_concurrent` requests execute at once.
//! - Consecutive executions *start* at least `min_interval` apart, across all priorities.
//! - Higher priority is dequeued first; FIFO within a priority.
//! - [`Scheduler::cancel`] only removes queued requests. Running ones are never interrupted.
//!
//! A single dispatcher task, spawned on the first enqueue, pops requests and spawns
//! them. If it is gone (its runtime shut down), the next enqueue spawns a new one on
//! the caller's runtime. It picks the next request only after the pacing delay has passed, so a
//! high-priority request enqueued during the wait still goes first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::core::{FetchError, lock};

/// Coarse ordering class for queued work.
///
/// Dashboard tiers, lowest to highest: auxiliary widgets, RPC/node calls, core stats,
/// AI/orchestrator calls.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of requests executing simultaneously.
    pub max_concurrent: usize,
    /// Minimum time between the starts of two consecutive executions.
    pub min_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            min_interval: Duration::from_millis(300),
        }
    }
}

type Execute = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A request waiting for a concurrency slot.
pub struct QueuedRequest {
    fingerprint: String,
    priority: Priority,
    enqueued_at: Instant,
    attempt: u32,
    seq: u64,
    execute: Execute,
}

impl QueuedRequest {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// 1-based attempt number of the orchestrated operation this request belongs to.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("fingerprint", &self.fingerprint)
            .field("priority", &self.priority)
            .field("attempt", &self.attempt)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    // Max-heap: higher priority first, then lower sequence number (earlier enqueue).
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct SchedulerShared {
    config: SchedulerConfig,
    queue: Mutex<BinaryHeap<QueuedRequest>>,
    notify: Notify,
    slots: Arc<Semaphore>,
    seq: AtomicU64,
    running: Arc<AtomicUsize>,
}

/// Bounded-concurrency, priority-ordered, minimum-interval request queue.
///
/// Dropping the scheduler stops its dispatcher; requests still queued then resolve to
/// [`FetchError::Cancelled`].
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("queued", &self.queued())
            .field("running", &self.running())
            .finish()
    }
}

impl Scheduler {
    /// Creates a scheduler. `max_concurrent` below 1 is raised to 1.
    pub fn new(mut config: SchedulerConfig) -> Self {
        config.max_concurrent = config.max_concurrent.max(1);
        let slots = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            shared: Arc::new(SchedulerShared {
                config,
                queue: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                slots,
                seq: AtomicU64::new(0),
                running: Arc::new(AtomicUsize::new(0)),
            }),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Queues `task` and resolves to its output once it has run.
    ///
    /// Resolves to [`FetchError::Cancelled`] if the request is cancelled (or the
    /// scheduler dropped) before it starts.
    pub async fn enqueue<T, F, Fut>(
        &self,
        fingerprint: impl Into<String>,
        priority: Priority,
        attempt: u32,
        task: F,
    ) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<T>();
        let execute: Execute = Box::new(move || {
            async move {
                if tx.is_closed() {
                    return;
                }
                let out = task().await;
                let _ = tx.send(out);
            }
            .boxed()
        });

        let request = QueuedRequest {
            fingerprint: fingerprint.into(),
            priority,
            enqueued_at: Instant::now(),
            attempt,
            seq: self.shared.seq.fetch_add(1, AtomicOrdering::Relaxed),
            execute,
        };
        tracing::trace!(
            fingerprint = %request.fingerprint,
            ?priority,
            attempt,
            "request queued"
        );
        lock(&self.shared.queue).push(request);
        self.ensure_dispatcher();
        self.shared.notify.notify_one();

        rx.await.map_err(|_| FetchError::Cancelled)
    }

    /// Removes every queued request whose fingerprint contains `pattern`.
    /// Their callers receive [`FetchError::Cancelled`]. Returns how many were removed.
    pub fn cancel(&self, pattern: &str) -> usize {
        self.cancel_where(|fp| fp.contains(pattern))
    }

    /// Removes every queued request whose fingerprint satisfies `pred`.
    pub fn cancel_where(&self, pred: impl Fn(&str) -> bool) -> usize {
        let cancelled: Vec<QueuedRequest> = {
            let mut queue = lock(&self.shared.queue);
            let (cancelled, kept): (Vec<_>, Vec<_>) =
                queue.drain().partition(|r| pred(&r.fingerprint));
            queue.extend(kept);
            cancelled
        };
        for r in &cancelled {
            tracing::debug!(fingerprint = %r.fingerprint, attempt = r.attempt, "queued request cancelled");
        }
        // Dropping the requests drops their result senders.
        cancelled.len()
    }

    /// Number of requests waiting for a slot.
    pub fn queued(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    /// Number of requests currently executing.
    pub fn running(&self) -> usize {
        self.shared.running.load(AtomicOrdering::Relaxed)
    }

    fn ensure_dispatcher(&self) {
        let mut dispatcher = lock(&self.dispatcher);
        if dispatcher.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        if dispatcher.is_some() {
            tracing::debug!("dispatcher gone, respawning");
        }
        let shared = Arc::clone(&self.shared);
        *dispatcher = Some(tokio::spawn(dispatch(shared)));
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.dispatcher).take() {
            handle.abort();
        }
        lock(&self.shared.queue).clear();
    }
}

async fn dispatch(shared: Arc<SchedulerShared>) {
    let min_interval = shared.config.min_interval;
    let mut last_start: Option<Instant> = None;

    loop {
        let Ok(permit) = Arc::clone(&shared.slots).acquire_owned().await else {
            return;
        };

        loop {
            let empty = lock(&shared.queue).is_empty();
            if !empty {
                break;
            }
            shared.notify.notified().await;
        }

        if let Some(last) = last_start
            && !min_interval.is_zero()
        {
            sleep_until(last + min_interval).await;
        }

        let next = lock(&shared.queue).pop();
        let Some(request) = next else {
            // Everything queued was cancelled while we waited.
            continue;
        };

        let now = Instant::now();
        last_start = Some(now);
        tracing::trace!(
            fingerprint = %request.fingerprint,
            priority = ?request.priority,
            waited_ms = u64::try_from(now.saturating_duration_since(request.enqueued_at).as_millis())
                .unwrap_or(u64::MAX),
            "request started"
        );

        let run = (request.execute)();
        let running = RunningGuard::new(Arc::clone(&shared.running));
        tokio::spawn(async move {
            run.await;
            drop(running);
            drop(permit);
        });
    }
}

// Counts an executing request; also released when the task is dropped unfinished.
struct RunningGuard(Arc<AtomicUsize>);

impl RunningGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, AtomicOrdering::Relaxed);
        Self(counter)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, AtomicOrdering::Relaxed);
    }
}
