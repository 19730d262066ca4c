//! # pager-controller
//!
//! Level-triggered reconciliation controller for Alert resources.
//!
//! Provides a watch-fed local cache, a deduplicating rate-limited work
//! queue, and worker loops that drive each resource through a pluggable
//! [`Reconciler`] with retry on failure, plus OpenTelemetry observability.

pub mod alert;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod informer;
pub mod key;
pub mod model;
pub mod queue;
pub mod reconciler;
pub mod router;
pub mod sink;
pub mod source;
pub mod telemetry;

pub use controller::{Controller, ControllerConfig};
pub use error::{Error, Result};
pub use key::ResourceKey;
pub use queue::WorkQueue;
pub use reconciler::Reconciler;

// Guarded collections are only mutated by single calls, so poisoning is ignored.
pub(crate) fn lock<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
