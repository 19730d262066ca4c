//! Resource data model.
//!
//! A resource is anything the controller watches. It has identity
//! (namespace + name) carried in [`ObjectMeta`] and a body the reconciler
//! interprets. The controller core only ever looks at the metadata and at
//! structural equality between two snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Identity and bookkeeping fields shared by every watched resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Namespace scope. `None` for cluster-scoped resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Name, unique within the namespace.
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,

    /// Opaque version string bumped by the source on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A watchable resource.
///
/// `PartialEq` is the structural comparison the event router uses to drop
/// no-op updates, so it must cover every field that matters to reconcile.
pub trait Resource: Clone + PartialEq + Debug + Send + Sync + 'static {
    /// Kind name used in logs, spans and metrics.
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
}

// ---------------------------------------------------------------------------
// Alert
// ---------------------------------------------------------------------------

/// Alert resource: something that should page someone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub metadata: ObjectMeta,
    pub spec: AlertSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSpec {
    /// Human-readable message to deliver.
    pub message: String,

    #[serde(default)]
    pub severity: Severity,
}

/// How loudly an alert should page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

impl Alert {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: AlertSpec {
                message: message.into(),
                severity: Severity::default(),
            },
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.spec.severity = severity;
        self
    }
}

impl Resource for Alert {
    const KIND: &'static str = "Alert";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}
