//! Alert reconciler.
//!
//! Paging is not wired up yet: reconciling an alert only records that it
//! happened, which is enough to observe the controller doing its job.

use crate::error::Result;
use crate::key::{ResourceKey, key_for};
use crate::lock;
use crate::model::{Alert, Severity};
use crate::reconciler::Reconciler;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::info;

/// One recorded reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertRecord {
    pub key: ResourceKey,
    pub severity: Option<Severity>,
    pub message: Option<String>,
    /// `true` when the alert had already been deleted.
    pub deleted: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct AlertReconciler {
    history: Mutex<Vec<AlertRecord>>,
}

impl AlertReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, oldest first.
    pub fn history(&self) -> Vec<AlertRecord> {
        lock(&self.history).clone()
    }

    fn record(&self, record: AlertRecord) {
        lock(&self.history).push(record);
    }
}

impl Reconciler<Alert> for AlertReconciler {
    async fn reconcile(&self, alert: Arc<Alert>) -> Result<()> {
        let key = key_for(alert.as_ref())?;
        info!(
            %key,
            severity = %alert.spec.severity,
            message = %alert.spec.message,
            "got alert"
        );
        self.record(AlertRecord {
            key,
            severity: Some(alert.spec.severity),
            message: Some(alert.spec.message.clone()),
            deleted: false,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn cleanup(&self, key: &ResourceKey) -> Result<()> {
        info!(%key, "alert deleted");
        self.record(AlertRecord {
            key: key.clone(),
            severity: None,
            message: None,
            deleted: true,
            at: Utc::now(),
        });
        Ok(())
    }
}
