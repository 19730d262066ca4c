//! Deduplicating, rate-limited work queue of resource keys.
//!
//! The queue tracks three sets: `queued` (ordered, waiting for a worker),
//! `processing` (checked out by exactly one worker) and `dirty` (processing
//! keys that were added again and must be requeued on `done`). A key is
//! never in `queued` and `processing` at the same time, which is what gives
//! at most one in-flight reconcile per key.
//!
//! [`WorkQueue::get`] is the only operation that waits. Everything else takes
//! a short lock and returns.

pub mod rate_limit;

pub use rate_limit::{ExponentialBackoff, RetryPolicy};

use crate::key::ResourceKey;
use crate::lock;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, UpDownCounter};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<ResourceKey>,
    queued: HashSet<ResourceKey>,
    processing: HashSet<ResourceKey>,
    dirty: HashSet<ResourceKey>,
    shutting_down: bool,
}

impl QueueState {
    /// Push onto `queued` unless already there. Returns whether it was pushed.
    fn enqueue(&mut self, key: ResourceKey) -> bool {
        if self.queued.insert(key.clone()) {
            self.queue.push_back(key);
            true
        } else {
            false
        }
    }
}

struct QueueMetrics {
    adds: Counter<u64>,
    retries: Counter<u64>,
    depth: UpDownCounter<i64>,
    attrs: [KeyValue; 1],
}

/// The work queue shared by event producers and worker loops.
pub struct WorkQueue {
    name: String,
    state: Mutex<QueueState>,
    available: Notify,
    backoff: ExponentialBackoff,
    metrics: QueueMetrics,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>, backoff: ExponentialBackoff) -> Arc<Self> {
        let name = name.into();
        let metrics = QueueMetrics {
            adds: metrics::queue_adds(),
            retries: metrics::queue_retries(),
            depth: metrics::queue_depth(),
            attrs: [KeyValue::new("queue", name.clone())],
        };
        Arc::new(Self {
            name,
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            backoff,
            metrics,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backoff(&self) -> &ExponentialBackoff {
        &self.backoff
    }

    /// Mark `key` as needing processing.
    ///
    /// No-op if already queued or shut down; if a worker currently holds the
    /// key it is flagged dirty and requeued when that worker calls `done`.
    pub fn add(&self, key: ResourceKey) {
        let mut state = lock(&self.state);
        if state.shutting_down {
            trace!(queue = %self.name, %key, "add after shutdown ignored");
            return;
        }
        if state.processing.contains(&key) {
            debug!(queue = %self.name, %key, "key in flight, marking dirty");
            state.dirty.insert(key);
            return;
        }
        if state.enqueue(key) {
            self.metrics.adds.add(1, &self.metrics.attrs);
            self.metrics.depth.add(1, &self.metrics.attrs);
            drop(state);
            self.available.notify_one();
        }
    }

    /// Add `key` once `delay` has elapsed, without blocking the caller.
    ///
    /// Must be called from within a Tokio runtime when `delay` is non-zero.
    pub fn add_after(self: &Arc<Self>, key: ResourceKey, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        // A pending timer must not keep a dropped queue alive.
        let queue = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(queue) = queue.upgrade() {
                queue.add(key);
            }
        });
    }

    /// Requeue `key` after its next backoff delay. Returns the delay used,
    /// or `None` if the queue is shutting down and nothing was recorded.
    pub fn add_after_failure(self: &Arc<Self>, key: ResourceKey) -> Option<Duration> {
        if self.is_shutting_down() {
            trace!(queue = %self.name, %key, "requeue after shutdown ignored");
            return None;
        }
        let delay = self.backoff.when(&key);
        self.metrics.retries.add(1, &self.metrics.attrs);
        debug!(
            queue = %self.name,
            %key,
            delay_ms = delay.as_millis() as u64,
            requeues = self.backoff.num_requeues(&key),
            "requeue after failure"
        );
        self.add_after(key, delay);
        Some(delay)
    }

    /// Wait for the next key and check it out for processing.
    ///
    /// Returns `None` once the queue has been shut down; after that it never
    /// hands out a key again.
    pub async fn get(&self) -> Option<ResourceKey> {
        loop {
            // Register interest before inspecting state so a concurrent
            // add or shutdown between the check and the await is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = lock(&self.state);
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    self.metrics.depth.add(-1, &self.metrics.attrs);
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release a key previously returned by `get`.
    ///
    /// If the key was added while in flight it goes straight back onto the
    /// queue.
    pub fn done(&self, key: &ResourceKey) {
        let mut state = lock(&self.state);
        if !state.processing.remove(key) {
            trace!(queue = %self.name, %key, "done called for key not in flight");
        }
        if !state.dirty.remove(key) || state.shutting_down {
            return;
        }
        if state.enqueue(key.clone()) {
            self.metrics.depth.add(1, &self.metrics.attrs);
            drop(state);
            self.available.notify_one();
        }
    }

    /// Reset backoff bookkeeping for `key`. Queue membership is untouched.
    pub fn forget(&self, key: &ResourceKey) {
        self.backoff.forget(key);
    }

    /// Failures recorded for `key` since its last `forget`.
    pub fn num_requeues(&self, key: &ResourceKey) -> u32 {
        self.backoff.num_requeues(key)
    }

    /// Stop handing out work and wake every waiting worker.
    pub fn shut_down(&self) {
        {
            let mut state = lock(&self.state);
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            let discarded = state.queue.len();
            state.queue.clear();
            state.queued.clear();
            state.dirty.clear();
            self.metrics
                .depth
                .add(-(discarded as i64), &self.metrics.attrs);
            debug!(queue = %self.name, discarded, "work queue shutting down");
        }
        self.available.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        lock(&self.state).shutting_down
    }

    /// Keys waiting to be picked up.
    pub fn len(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently checked out by workers.
    pub fn in_flight(&self) -> usize {
        lock(&self.state).processing.len()
    }

    pub fn is_processing(&self, key: &ResourceKey) -> bool {
        lock(&self.state).processing.contains(key)
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("WorkQueue")
            .field("name", &self.name)
            .field("queued", &state.queue.len())
            .field("processing", &state.processing.len())
            .field("dirty", &state.dirty.len())
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}
