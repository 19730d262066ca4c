//! Worker loop: dequeue a key, resolve it through the cache, reconcile,
//! then forget or requeue.

use crate::cache::Store;
use crate::error::{Error, Result};
use crate::key::ResourceKey;
use crate::model::Resource;
use crate::queue::{RetryPolicy, WorkQueue};
use crate::reconciler::Reconciler;
use crate::sink::ErrorSink;
use crate::telemetry::metrics;
use crate::telemetry::reconcile::{record_outcome, start_reconcile_span};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, Span, debug, warn};

/// How a successful pass over a key ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Reconciled,
    /// The key was gone from the cache; cleanup ran instead.
    Deleted,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Reconciled => "success",
            Outcome::Deleted => "deleted",
        }
    }
}

/// Releases a checked-out key when dropped, whatever path the worker took.
struct InFlight<'a> {
    queue: &'a WorkQueue,
    key: ResourceKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.done(&self.key);
    }
}

pub(crate) struct Worker<T, R> {
    pub(crate) id: usize,
    pub(crate) queue: Arc<WorkQueue>,
    pub(crate) store: Arc<Store<T>>,
    pub(crate) reconciler: Arc<R>,
    pub(crate) sink: Arc<dyn ErrorSink>,
    pub(crate) retry: RetryPolicy,
}

impl<T: Resource, R: Reconciler<T>> Worker<T, R> {
    /// Process keys until the queue shuts down.
    pub(crate) async fn run(self) {
        debug!(worker = self.id, "worker started");
        while self.process_next_item().await {}
        debug!(worker = self.id, "worker stopped");
    }

    /// Handle one key. Returns `false` once the queue has shut down.
    pub(crate) async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        let _in_flight = InFlight {
            queue: &self.queue,
            key: key.clone(),
        };

        if let Err(e) = key.split() {
            self.sink.report(&e);
            self.queue.forget(&key);
            self.count_result("dropped");
            return true;
        }

        let span = start_reconcile_span(T::KIND, &key, self.id);
        let started = Instant::now();
        let result = self.sync(&key, &span).instrument(span.clone()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        metrics::reconcile_duration_ms()
            .record(elapsed_ms as f64, &[KeyValue::new("kind", T::KIND)]);

        match result {
            Ok(outcome) => {
                self.queue.forget(&key);
                record_outcome(&span, outcome.as_str(), elapsed_ms);
                self.count_result(outcome.as_str());
            }
            Err(e) => {
                self.sink.report(&e);
                let result = self.requeue(key);
                record_outcome(&span, result, elapsed_ms);
                self.count_result(result);
            }
        }
        true
    }

    /// Look the key up and run the reconciler on its own task, so a panic
    /// becomes an ordinary failed attempt instead of killing this worker.
    async fn sync(&self, key: &ResourceKey, span: &Span) -> Result<Outcome> {
        let reconciler = Arc::clone(&self.reconciler);
        let (outcome, task) = match self.store.get(key) {
            Some(obj) => (
                Outcome::Reconciled,
                tokio::spawn(async move { reconciler.reconcile(obj).await }.instrument(span.clone())),
            ),
            None => {
                debug!(%key, "not in cache, treating as deleted");
                let key = key.clone();
                (
                    Outcome::Deleted,
                    tokio::spawn(async move { reconciler.cleanup(&key).await }.instrument(span.clone())),
                )
            }
        };

        match task.await {
            Ok(result) => result.map(|()| outcome),
            Err(join) if join.is_panic() => Err(Error::ReconcilePanicked(key.to_string())),
            Err(join) => Err(Error::Other(format!("reconcile task for {key} failed: {join}"))),
        }
    }

    /// Requeue a failed key, or drop it once the retry policy says so.
    /// Returns the result label for the attempt.
    fn requeue(&self, key: ResourceKey) -> &'static str {
        let requeues = self.queue.num_requeues(&key);
        if !self.retry.should_retry(requeues) {
            self.sink.report(&Error::RetriesExhausted {
                key: key.to_string(),
                attempts: requeues,
            });
            self.queue.forget(&key);
            return "dropped";
        }

        match self.queue.add_after_failure(key.clone()) {
            Some(delay) => warn!(
                worker = self.id,
                %key,
                attempt = requeues.saturating_add(1),
                delay_ms = delay.as_millis() as u64,
                "reconcile failed, requeued"
            ),
            None => debug!(worker = self.id, %key, "reconcile failed during shutdown, not requeued"),
        }
        "error"
    }

    fn count_result(&self, result: &'static str) {
        metrics::reconcile_results().add(
            1,
            &[KeyValue::new("kind", T::KIND), KeyValue::new("result", result)],
        );
    }
}
