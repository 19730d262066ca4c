//! Error observation.
//!
//! Errors the controller handles internally (dropped events, failed
//! reconciles) are surfaced here and nowhere else. A sink only observes:
//! it never blocks and never changes what the controller does next.

use crate::error::Error;
use crate::lock;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Mutex;
use tracing::{error, warn};

pub trait ErrorSink: Send + Sync {
    fn report(&self, err: &Error);
}

/// Default sink: structured log line plus an error counter.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, err: &Error) {
        metrics::errors().add(1, &[KeyValue::new("kind", err.kind())]);
        match err {
            Error::NotFound(_) => warn!(kind = err.kind(), "{err}"),
            _ => error!(kind = err.kind(), "{err}"),
        }
    }
}

/// Sink that keeps every reported error's kind and message. For tests and
/// embedders that want to inspect what went wrong.
#[derive(Debug, Default)]
pub struct CollectingSink {
    seen: Mutex<Vec<(&'static str, String)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(kind, message)` pairs in report order.
    pub fn errors(&self) -> Vec<(&'static str, String)> {
        lock(&self.seen).clone()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        lock(&self.seen).iter().filter(|(k, _)| *k == kind).count()
    }
}

impl ErrorSink for CollectingSink {
    fn report(&self, err: &Error) {
        lock(&self.seen).push((err.kind(), err.to_string()));
    }
}
