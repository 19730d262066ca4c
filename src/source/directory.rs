//! Directory-backed source: one manifest file per resource.
//!
//! Every `*.toml` or `*.json` file in the directory is a resource. The
//! directory is re-listed on a fixed poll interval and each listing is
//! published as [`WatchEvent::Relisted`]; the informer works out what was
//! added, changed or removed.

use super::{WatchEvent, WatchSource};
use crate::error::{Error, Result};
use crate::key::key_for;
use crate::model::Resource;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub struct DirectorySource<T> {
    dir: PathBuf,
    poll_interval: Duration,
    next_poll: Instant,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Resource + DeserializeOwned> DirectorySource<T> {
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            poll_interval,
            next_poll: Instant::now() + poll_interval,
            _kind: PhantomData,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read every manifest in the directory.
    ///
    /// Unreadable or unparseable files are logged and skipped so that one bad
    /// file does not hide the rest. Failing to read the directory itself is
    /// an error.
    pub async fn load(&self) -> Result<Vec<T>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            Error::Source(format!("cannot read manifest dir {}: {e}", self.dir.display()))
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if manifest_format(&path).is_some() {
                paths.push(path);
            }
        }
        // Stable order so duplicate identities resolve the same way every poll.
        paths.sort();

        let mut seen = HashSet::new();
        let mut objects = Vec::with_capacity(paths.len());
        for path in paths {
            let obj = match load_manifest::<T>(&path).await {
                Ok(obj) => obj,
                Err(e) => {
                    warn!(path = %path.display(), "skipping manifest: {e}");
                    continue;
                }
            };
            if let Ok(key) = key_for(&obj) {
                if !seen.insert(key.clone()) {
                    warn!(path = %path.display(), %key, "duplicate resource identity, skipping");
                    continue;
                }
            }
            objects.push(obj);
        }

        debug!(dir = %self.dir.display(), kind = T::KIND, count = objects.len(), "loaded manifests");
        Ok(objects)
    }
}

impl<T: Resource + DeserializeOwned> WatchSource<T> for DirectorySource<T> {
    async fn list(&mut self) -> Result<Vec<T>> {
        self.next_poll = Instant::now() + self.poll_interval;
        self.load().await
    }

    async fn next_event(&mut self) -> Option<Result<WatchEvent<T>>> {
        // Sleeping until a fixed deadline keeps this cancel-safe: a dropped
        // call does not push the next poll further out.
        tokio::time::sleep_until(self.next_poll).await;
        let listing = self.load().await;
        self.next_poll = Instant::now() + self.poll_interval;
        Some(listing.map(WatchEvent::Relisted))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

fn manifest_format(path: &Path) -> Option<Format> {
    match path.extension()?.to_str()? {
        "toml" => Some(Format::Toml),
        "json" => Some(Format::Json),
        _ => None,
    }
}

/// Parse one manifest file.
pub async fn load_manifest<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bad = |reason: String| Error::Manifest {
        path: path.display().to_string(),
        reason,
    };
    let format = manifest_format(path).ok_or_else(|| bad("unknown extension".to_string()))?;
    let content = tokio::fs::read_to_string(path).await?;
    match format {
        Format::Toml => toml::from_str(&content).map_err(|e| bad(e.to_string())),
        Format::Json => serde_json::from_str(&content).map_err(|e| bad(e.to_string())),
    }
}
