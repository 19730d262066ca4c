//! Controller: wires the cache, event router, work queue and workers for
//! one resource kind, and owns their lifecycle.
//!
//! Startup order is fixed: start the watch, wait for the initial listing to
//! land in the cache, and only then start workers. Shutdown stops the queue
//! from handing out new keys and waits for in-flight reconciles to finish.

mod worker;

use crate::cache::{HasSynced, Lister, Store, wait_for_cache_sync};
use crate::error::Result;
use crate::informer::Informer;
use crate::model::Resource;
use crate::queue::{ExponentialBackoff, RetryPolicy, WorkQueue};
use crate::reconciler::Reconciler;
use crate::router::EventRouter;
use crate::sink::ErrorSink;
use crate::source::WatchSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info};
use worker::Worker;

/// Tunables for one controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Name used for the work queue and in logs.
    pub name: String,
    /// Number of concurrent worker loops.
    pub workers: usize,
    /// How often cached objects are replayed through the event router.
    /// Zero disables resync.
    pub resync_period: Duration,
    /// How long to wait for the initial listing before giving up.
    pub sync_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub retry: RetryPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: "alerts".to_string(),
            workers: 1,
            resync_period: Duration::from_secs(30),
            sync_timeout: Duration::from_secs(60),
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(60),
            retry: RetryPolicy::unbounded(),
        }
    }
}

/// Reconciliation controller for resources of kind `T`.
pub struct Controller<T, R> {
    config: ControllerConfig,
    queue: Arc<WorkQueue>,
    store: Arc<Store<T>>,
    reconciler: Arc<R>,
    sink: Arc<dyn ErrorSink>,
    shutdown: Arc<Notify>,
}

impl<T, R> Clone for Controller<T, R> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            queue: Arc::clone(&self.queue),
            store: Arc::clone(&self.store),
            reconciler: Arc::clone(&self.reconciler),
            sink: Arc::clone(&self.sink),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<T: Resource, R: Reconciler<T>> Controller<T, R> {
    pub fn new(config: ControllerConfig, reconciler: Arc<R>, sink: Arc<dyn ErrorSink>) -> Self {
        let backoff = ExponentialBackoff::new(config.backoff_base, config.backoff_max);
        Self {
            queue: WorkQueue::new(config.name.clone(), backoff),
            store: Arc::new(Store::new()),
            config,
            reconciler,
            sink,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<Store<T>> {
        &self.store
    }

    pub fn lister(&self) -> Lister<T> {
        self.store.lister()
    }

    /// Signal the controller to stop. Safe to call before `run` starts.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run until [`Controller::shutdown`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SyncTimeout`] if the initial listing does not
    /// complete within the configured timeout. Nothing after startup is
    /// fatal.
    pub async fn run<S: WatchSource<T>>(&self, source: S) -> Result<()> {
        let mut informer = Informer::new(Arc::clone(&self.store), Arc::clone(&self.sink))
            .with_resync(self.config.resync_period);
        informer.add_event_handler(Arc::new(EventRouter::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.sink),
        )));

        let informer_task = tokio::spawn(async move { informer.run(source).await });

        info!(controller = %self.config.name, kind = T::KIND, "waiting for cache sync");
        let caches: [&dyn HasSynced; 1] = [&*self.store];
        let synced = tokio::select! {
            synced = wait_for_cache_sync(self.config.sync_timeout, &caches) => Some(synced),
            _ = self.shutdown.notified() => None,
        };
        match synced {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                informer_task.abort();
                self.queue.shut_down();
                return Err(e);
            }
            None => {
                info!(controller = %self.config.name, "shutdown requested before cache sync");
                informer_task.abort();
                self.queue.shut_down();
                return Ok(());
            }
        }

        let workers: Vec<_> = (0..self.config.workers.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: Arc::clone(&self.queue),
                    store: Arc::clone(&self.store),
                    reconciler: Arc::clone(&self.reconciler),
                    sink: Arc::clone(&self.sink),
                    retry: self.config.retry,
                };
                tokio::spawn(worker.run())
            })
            .collect();
        info!(
            controller = %self.config.name,
            workers = workers.len(),
            cached = self.store.len(),
            "controller started"
        );

        self.shutdown.notified().await;
        info!(controller = %self.config.name, "controller shutting down");

        // Stop dispatch; workers finish what they hold and exit.
        self.queue.shut_down();
        for handle in workers {
            if let Err(e) = handle.await {
                error!(controller = %self.config.name, "worker task failed: {e}");
            }
        }
        informer_task.abort();

        info!(controller = %self.config.name, "controller stopped");
        Ok(())
    }
}
