//! Informer: keeps a [`Store`] in step with a [`WatchSource`] and fans
//! change notifications out to event handlers.
//!
//! The store is always updated before handlers run, so anything a handler
//! enqueues will find at least that state when it is processed.

use crate::cache::Store;
use crate::error::Result;
use crate::key::{DeleteNotice, ResourceKey, key_for};
use crate::model::Resource;
use crate::sink::ErrorSink;
use crate::source::{WatchEvent, WatchSource};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

/// Receives add/update/delete notifications. Implementations must be cheap
/// and must not block; they run on the informer's task.
pub trait EventHandler<T>: Send + Sync {
    fn on_add(&self, obj: &Arc<T>);
    fn on_update(&self, old: &Arc<T>, new: &Arc<T>);
    fn on_delete(&self, notice: &DeleteNotice<T>);
}

pub struct Informer<T> {
    store: Arc<Store<T>>,
    handlers: Vec<Arc<dyn EventHandler<T>>>,
    resync_period: Option<Duration>,
    sink: Arc<dyn ErrorSink>,
}

impl<T: Resource> Informer<T> {
    pub fn new(store: Arc<Store<T>>, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            store,
            handlers: Vec::new(),
            resync_period: None,
            sink,
        }
    }

    /// Replay every cached object as an update this often.
    pub fn with_resync(mut self, period: Duration) -> Self {
        self.resync_period = (!period.is_zero()).then_some(period);
        self
    }

    pub fn add_event_handler(&mut self, handler: Arc<dyn EventHandler<T>>) {
        self.handlers.push(handler);
    }

    pub fn store(&self) -> &Arc<Store<T>> {
        &self.store
    }

    /// List, mark the store synced, then follow the watch until it ends.
    ///
    /// A failing initial list is reported and retried; the store stays
    /// unsynced until one succeeds.
    pub async fn run<S: WatchSource<T>>(&self, mut source: S) -> Result<()> {
        let initial = loop {
            match source.list().await {
                Ok(items) => break items,
                Err(e) => {
                    self.sink.report(&e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        };
        info!(kind = T::KIND, count = initial.len(), "initial listing received");
        self.replace(initial);
        self.store.mark_synced();

        let mut resync = self.resync_period.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                event = source.next_event() => match event {
                    Some(Ok(event)) => self.handle(event),
                    Some(Err(e)) => self.sink.report(&e),
                    None => {
                        info!(kind = T::KIND, "watch stream closed");
                        return Ok(());
                    }
                },
                _ = tick(&mut resync) => self.resync(),
            }
        }
    }

    /// Apply one event to the store and dispatch it.
    pub fn handle(&self, event: WatchEvent<T>) {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                self.count_event("upsert");
                self.upsert(obj);
            }
            WatchEvent::Deleted(obj) => {
                self.count_event("delete");
                let key = match key_for(&obj) {
                    Ok(key) => key,
                    Err(e) => {
                        self.sink.report(&e);
                        return;
                    }
                };
                self.store.remove(&key);
                self.dispatch_delete(&DeleteNotice::Object(Arc::new(obj)));
            }
            WatchEvent::Relisted(items) => {
                self.count_event("relist");
                self.replace(items);
            }
        }
    }

    fn upsert(&self, obj: T) {
        let key = match key_for(&obj) {
            Ok(key) => key,
            Err(e) => {
                self.sink.report(&e);
                return;
            }
        };
        self.upsert_keyed(key, Arc::new(obj));
    }

    fn upsert_keyed(&self, key: ResourceKey, obj: Arc<T>) {
        match self.store.upsert(key, Arc::clone(&obj)) {
            Some(old) => self.dispatch_update(&old, &obj),
            None => self.dispatch_add(&obj),
        }
    }

    /// Make the store match `items` exactly. Cached keys missing from the
    /// listing are deleted and announced as tombstones.
    fn replace(&self, items: Vec<T>) {
        let mut incoming = HashMap::with_capacity(items.len());
        for obj in items {
            match key_for(&obj) {
                Ok(key) => {
                    incoming.insert(key, Arc::new(obj));
                }
                Err(e) => self.sink.report(&e),
            }
        }

        for key in self.store.keys() {
            if incoming.contains_key(&key) {
                continue;
            }
            let last_known = self.store.remove(&key);
            debug!(kind = T::KIND, %key, "missing from relist, deleting");
            self.dispatch_delete(&DeleteNotice::Tombstone { key, last_known });
        }

        for (key, obj) in incoming {
            self.upsert_keyed(key, obj);
        }
    }

    fn resync(&self) {
        let items = self.store.list();
        debug!(kind = T::KIND, count = items.len(), "resync");
        self.count_event("resync");
        for obj in &items {
            self.dispatch_update(obj, obj);
        }
    }

    fn dispatch_add(&self, obj: &Arc<T>) {
        for handler in &self.handlers {
            handler.on_add(obj);
        }
    }

    fn dispatch_update(&self, old: &Arc<T>, new: &Arc<T>) {
        for handler in &self.handlers {
            handler.on_update(old, new);
        }
    }

    fn dispatch_delete(&self, notice: &DeleteNotice<T>) {
        for handler in &self.handlers {
            handler.on_delete(notice);
        }
    }

    fn count_event(&self, event: &'static str) {
        metrics::events_received().add(
            1,
            &[KeyValue::new("kind", T::KIND), KeyValue::new("event", event)],
        );
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
