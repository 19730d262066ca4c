//! Event router: turns watch notifications into queue keys.

use crate::informer::EventHandler;
use crate::key::{DeleteNotice, deletion_key_for, key_for};
use crate::model::Resource;
use crate::queue::WorkQueue;
use crate::sink::ErrorSink;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// Enqueues the key of every added, changed or deleted resource.
///
/// Updates whose old and new snapshots compare equal are dropped; that is
/// what absorbs periodic resync replays. Objects without a usable identity
/// are reported to the sink and ignored.
pub struct EventRouter<T> {
    queue: Arc<WorkQueue>,
    sink: Arc<dyn ErrorSink>,
    _kind: PhantomData<fn(T)>,
}

impl<T: Resource> EventRouter<T> {
    pub fn new(queue: Arc<WorkQueue>, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            queue,
            sink,
            _kind: PhantomData,
        }
    }

    fn enqueue(&self, obj: &T) {
        match key_for(obj) {
            Ok(key) => self.queue.add(key),
            Err(e) => self.sink.report(&e),
        }
    }
}

impl<T: Resource> EventHandler<T> for EventRouter<T> {
    fn on_add(&self, obj: &Arc<T>) {
        self.enqueue(obj);
    }

    fn on_update(&self, old: &Arc<T>, new: &Arc<T>) {
        if Arc::ptr_eq(old, new) || old.as_ref() == new.as_ref() {
            trace!(kind = T::KIND, name = %new.meta().name, "update without changes, skipping");
            return;
        }
        self.enqueue(new);
    }

    fn on_delete(&self, notice: &DeleteNotice<T>) {
        match deletion_key_for(notice) {
            Ok(key) => self.queue.add(key),
            Err(e) => self.sink.report(&e),
        }
    }
}
