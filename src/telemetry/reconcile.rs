//! Reconcile span helpers.
//!
//! Every key a worker processes runs inside one `reconcile` span; the
//! outcome field is declared empty and filled in by [`record_outcome`].

use crate::key::ResourceKey;
use tracing::Span;

/// Start a span for one reconcile of `key`.
pub fn start_reconcile_span(kind: &str, key: &ResourceKey, worker: usize) -> Span {
    tracing::info_span!(
        "reconcile",
        "resource.kind" = kind,
        "resource.key" = %key,
        "worker.id" = worker,
        "reconcile.outcome" = tracing::field::Empty,
    )
}

/// Record how the reconcile ended on the span and emit an event in it.
pub fn record_outcome(span: &Span, outcome: &str, duration_ms: u64) {
    span.record("reconcile.outcome", outcome);
    span.in_scope(|| {
        tracing::debug!(outcome, duration_ms, "reconcile finished");
    });
}
