//! Metric instrument factories for pager-controller.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a provider installed these are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};

fn meter() -> Meter {
    opentelemetry::global::meter("pager-controller")
}

/// Counter: keys newly added to a work queue (dedup hits are not counted).
/// Labels: `queue`.
pub fn queue_adds() -> Counter<u64> {
    meter()
        .u64_counter("pager.queue.adds")
        .with_description("Keys added to the work queue")
        .build()
}

/// Counter: keys requeued after a failed reconcile.
/// Labels: `queue`.
pub fn queue_retries() -> Counter<u64> {
    meter()
        .u64_counter("pager.queue.retries")
        .with_description("Keys requeued with backoff after a failure")
        .build()
}

/// Up/down counter: keys waiting in a work queue.
/// Labels: `queue`.
pub fn queue_depth() -> UpDownCounter<i64> {
    meter()
        .i64_up_down_counter("pager.queue.depth")
        .with_description("Keys waiting to be processed")
        .build()
}

/// Counter: finished reconciles.
/// Labels: `kind`, `result` ("success" | "deleted" | "error" | "dropped").
pub fn reconcile_results() -> Counter<u64> {
    meter()
        .u64_counter("pager.reconcile.results")
        .with_description("Number of finished reconciles by result")
        .build()
}

/// Histogram: reconcile duration in milliseconds.
/// Labels: `kind`.
pub fn reconcile_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("pager.reconcile.duration_ms")
        .with_description("Reconcile duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: watch events applied by an informer.
/// Labels: `kind`, `event` ("upsert" | "delete" | "relist" | "resync").
pub fn events_received() -> Counter<u64> {
    meter()
        .u64_counter("pager.events.received")
        .with_description("Watch events applied to the cache")
        .build()
}

/// Counter: errors surfaced through the error sink.
/// Labels: `kind`.
pub fn errors() -> Counter<u64> {
    meter()
        .u64_counter("pager.errors")
        .with_description("Errors handled by the controller")
        .build()
}
