//! Error types for pager-controller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed object: {0}")]
    MalformedObject(String),

    #[error("malformed key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("reconcile failed: {0}")]
    Reconcile(String),

    #[error("reconciler panicked while handling {0}")]
    ReconcilePanicked(String),

    #[error("giving up on {key} after {attempts} retries")]
    RetriesExhausted { key: String, attempts: u32 },

    #[error("timed out after {0:?} waiting for caches to sync")]
    SyncTimeout(std::time::Duration),

    #[error("watch source error: {0}")]
    Source(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad manifest {path}: {reason}")]
    Manifest { path: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Short, stable label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedObject(_) => "malformed_object",
            Error::MalformedKey { .. } => "malformed_key",
            Error::NotFound(_) => "not_found",
            Error::Reconcile(_) => "reconcile",
            Error::ReconcilePanicked(_) => "reconcile_panicked",
            Error::RetriesExhausted { .. } => "retries_exhausted",
            Error::SyncTimeout(_) => "sync_timeout",
            Error::Source(_) => "source",
            Error::Config(_) => "config",
            Error::Manifest { .. } => "manifest",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
