//! Resource keys: the single token used for queueing and cache lookups.
//!
//! A key is `"<namespace>/<name>"`, or just `"<name>"` for cluster-scoped
//! resources. Live objects and their deletion tombstones always produce the
//! same key so that every event for one resource lands on one queue slot.

use crate::error::{Error, Result};
use crate::model::Resource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stable identity of a resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Build a key from its parts. Does not validate; see [`ResourceKey::parse`].
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        match namespace {
            Some(ns) if !ns.is_empty() => Self(format!("{ns}/{name}")),
            _ => Self(name.to_string()),
        }
    }

    /// Parse and validate a raw key string.
    pub fn parse(raw: &str) -> Result<Self> {
        let key = Self(raw.to_string());
        key.split()?;
        Ok(key)
    }

    /// Split into `(namespace, name)`.
    pub fn split(&self) -> Result<(Option<&str>, &str)> {
        let malformed = |reason: &str| Error::MalformedKey {
            key: self.0.clone(),
            reason: reason.to_string(),
        };

        let mut parts = self.0.split('/');
        let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => (None, name),
            (Some(ns), Some(name), None) => {
                if ns.is_empty() {
                    return Err(malformed("empty namespace"));
                }
                (Some(ns), name)
            }
            _ => return Err(malformed("unexpected number of '/' separators")),
        };

        if name.is_empty() {
            return Err(malformed("empty name"));
        }
        Ok((namespace, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the key for a live object.
pub fn key_for<T: Resource>(obj: &T) -> Result<ResourceKey> {
    let meta = obj.meta();
    if meta.name.is_empty() {
        return Err(Error::MalformedObject(format!(
            "{} has no name (namespace {:?})",
            T::KIND,
            meta.namespace
        )));
    }
    if meta.name.contains('/') || meta.namespace.as_deref().is_some_and(|ns| ns.contains('/')) {
        return Err(Error::MalformedObject(format!(
            "{} identity {:?}/{:?} contains '/'",
            T::KIND,
            meta.namespace,
            meta.name
        )));
    }
    Ok(ResourceKey::new(meta.namespace.as_deref(), &meta.name))
}

// ---------------------------------------------------------------------------
// Deletion notices
// ---------------------------------------------------------------------------

/// What a delete notification carries.
#[derive(Debug, Clone)]
pub enum DeleteNotice<T> {
    /// The final observed state of the deleted object.
    Object(Arc<T>),
    /// The object vanished while we were not watching. Only the key is
    /// trustworthy; `last_known` may be stale.
    Tombstone {
        key: ResourceKey,
        last_known: Option<Arc<T>>,
    },
}

impl<T: Resource> DeleteNotice<T> {
    /// Best-known final state, if any.
    pub fn object(&self) -> Option<&Arc<T>> {
        match self {
            DeleteNotice::Object(obj) => Some(obj),
            DeleteNotice::Tombstone { last_known, .. } => last_known.as_ref(),
        }
    }
}

/// Derive the key for a deletion, unwrapping tombstones.
pub fn deletion_key_for<T: Resource>(notice: &DeleteNotice<T>) -> Result<ResourceKey> {
    match notice {
        DeleteNotice::Object(obj) => key_for(obj.as_ref()),
        DeleteNotice::Tombstone { key, .. } => ResourceKey::parse(key.as_str()),
    }
}
