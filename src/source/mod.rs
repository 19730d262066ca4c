//! Watch transports: where resource state comes from.
//!
//! The controller does not talk to any particular API. It consumes a
//! [`WatchSource`] that can produce a full listing and then a stream of
//! change events, and builds its cache and queue on top of that.

pub mod directory;

pub use directory::DirectorySource;

use crate::error::Result;
use std::future::Future;
use tokio::sync::mpsc;

/// A single change notification from a source.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    /// Final observed state of a deleted object.
    Deleted(T),
    /// The source re-listed everything. Objects missing from the list have
    /// been deleted at some unknown point.
    Relisted(Vec<T>),
}

/// A listable, watchable collection of resources.
pub trait WatchSource<T>: Send + 'static {
    /// Full listing of current state. Called once before any `next_event`.
    fn list(&mut self) -> impl Future<Output = Result<Vec<T>>> + Send;

    /// Next change. `None` means the stream has ended for good; `Some(Err)`
    /// is a transient failure the caller reports and moves past.
    ///
    /// Must be cancel-safe: the informer races it against its resync timer.
    fn next_event(&mut self) -> impl Future<Output = Option<Result<WatchEvent<T>>>> + Send;
}

/// In-process source fed through a channel.
pub struct ChannelSource<T> {
    initial: Option<Vec<T>>,
    events: mpsc::Receiver<WatchEvent<T>>,
}

impl<T: Send + 'static> ChannelSource<T> {
    /// Create a source whose listing is `initial`, plus the sender used to
    /// push subsequent events. Dropping every sender ends the watch.
    pub fn new(initial: Vec<T>) -> (Self, mpsc::Sender<WatchEvent<T>>) {
        let (tx, rx) = mpsc::channel(256);
        let source = Self {
            initial: Some(initial),
            events: rx,
        };
        (source, tx)
    }
}

impl<T: Send + 'static> WatchSource<T> for ChannelSource<T> {
    async fn list(&mut self) -> Result<Vec<T>> {
        Ok(self.initial.take().unwrap_or_default())
    }

    async fn next_event(&mut self) -> Option<Result<WatchEvent<T>>> {
        self.events.recv().await.map(Ok)
    }
}
