//! The pluggable reconcile step.

use crate::error::Result;
use crate::key::ResourceKey;
use crate::model::Resource;
use std::future::Future;
use std::sync::Arc;

/// Drives one resource toward its desired state.
///
/// Implementations must be idempotent: the same key may be reconciled many
/// times, with the same or older state, on any worker task. The controller
/// guarantees only that one key is never reconciled twice concurrently.
pub trait Reconciler<T: Resource>: Send + Sync + 'static {
    /// Reconcile the current cached state of a resource.
    fn reconcile(&self, obj: Arc<T>) -> impl Future<Output = Result<()>> + Send;

    /// Called instead of `reconcile` when the key no longer exists in the
    /// cache. Errors are retried like reconcile errors.
    fn cleanup(&self, key: &ResourceKey) -> impl Future<Output = Result<()>> + Send {
        let _ = key;
        async { Ok(()) }
    }
}
