//! In-flight request coalescing.
//!
//! At most one operation runs per key. Callers that arrive while it is pending await the
//! same shared result. The operation is driven on its own task, so it settles (and its
//! registry entry is removed) even if every caller stops waiting; removal happens on
//! success and failure alike, after which the next caller starts a fresh operation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::core::lock;

type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct InFlightEntry<T, E> {
    id: u64,
    future: SharedResult<T, E>,
    subscribers: usize,
}

struct Registry<T, E> {
    entries: HashMap<String, InFlightEntry<T, E>>,
    next_id: u64,
}

/// Removes a registry entry when the operation it belongs to finishes or is dropped.
struct Deregister<T, E> {
    registry: Weak<Mutex<Registry<T, E>>>,
    key: String,
    id: u64,
}

impl<T, E> Drop for Deregister<T, E> {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let removed = {
            let mut reg = lock(&registry);
            match reg.entries.get(&self.key) {
                Some(entry) if entry.id == self.id => reg.entries.remove(&self.key),
                _ => None,
            }
        };
        drop(removed);
    }
}

/// Shares one pending operation among all concurrent callers for the same key.
pub struct Coalescer<T, E> {
    registry: Arc<Mutex<Registry<T, E>>>,
}

impl<T, E> Clone for Coalescer<T, E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T, E> Default for Coalescer<T, E> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                entries: HashMap::new(),
                next_id: 0,
            })),
        }
    }
}

impl<T, E> std::fmt::Debug for Coalescer<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coalescer")
            .field("in_flight", &lock(&self.registry).entries.len())
            .finish()
    }
}

impl<T, E> Coalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the operation registered under `key`, or starts one with `factory`.
    ///
    /// `factory` is called at most once, under the registry lock, so it must only
    /// construct the future and not call back into this coalescer.
    pub async fn join<F, Fut>(&self, key: &str, factory: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (shared, leader) = {
            let mut reg = lock(&self.registry);
            if let Some(entry) = reg.entries.get_mut(key) {
                entry.subscribers += 1;
                tracing::trace!(key, subscribers = entry.subscribers, "joined in-flight request");
                (entry.future.clone(), false)
            } else {
                let id = reg.next_id;
                reg.next_id = reg.next_id.wrapping_add(1);
                let guard = Deregister {
                    registry: Arc::downgrade(&self.registry),
                    key: key.to_string(),
                    id,
                };
                let fut = factory();
                let shared = async move {
                    let _guard = guard;
                    fut.await
                }
                .boxed()
                .shared();
                reg.entries.insert(
                    key.to_string(),
                    InFlightEntry {
                        id,
                        future: shared.clone(),
                        subscribers: 1,
                    },
                );
                (shared, true)
            }
        };

        if leader {
            tokio::spawn(shared.clone().map(|_| ()));
        }
        shared.await
    }

    /// Number of operations currently in flight.
    pub fn len(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        lock(&self.registry).entries.contains_key(key)
    }

    /// How many callers have joined the pending operation for `key`.
    pub fn subscribers(&self, key: &str) -> Option<usize> {
        lock(&self.registry).entries.get(key).map(|e| e.subscribers)
    }
}
