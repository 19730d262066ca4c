//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on missing or malformed values.
//! Command-line flags in the binary override individual fields afterwards.

use crate::controller::ControllerConfig;
use crate::error::{Error, Result};
use crate::queue::RetryPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory of alert manifests to watch.
    pub manifest_dir: PathBuf,
    pub workers: usize,
    pub resync_period: Duration,
    pub poll_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// `None` retries failed keys forever.
    pub max_retries: Option<u32>,
    pub sync_timeout: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let manifest_dir = var("PAGER_MANIFEST_DIR").map(PathBuf::from).ok_or_else(|| {
            Error::Config("required environment variable PAGER_MANIFEST_DIR is not set".to_string())
        })?;

        let config = Self {
            manifest_dir,
            workers: parse_or(var("PAGER_WORKERS"), "PAGER_WORKERS", 1)?,
            resync_period: Duration::from_secs(parse_or(var("PAGER_RESYNC_SECS"), "PAGER_RESYNC_SECS", 30)?),
            poll_interval: Duration::from_secs(parse_or(var("PAGER_POLL_SECS"), "PAGER_POLL_SECS", 5)?),
            backoff_base: Duration::from_millis(parse_or(
                var("PAGER_BACKOFF_BASE_MS"),
                "PAGER_BACKOFF_BASE_MS",
                5_000,
            )?),
            backoff_max: Duration::from_millis(parse_or(
                var("PAGER_BACKOFF_MAX_MS"),
                "PAGER_BACKOFF_MAX_MS",
                60_000,
            )?),
            max_retries: var("PAGER_MAX_RETRIES")
                .map(|v| parse(&v, "PAGER_MAX_RETRIES"))
                .transpose()?,
            sync_timeout: Duration::from_secs(parse_or(
                var("PAGER_SYNC_TIMEOUT_SECS"),
                "PAGER_SYNC_TIMEOUT_SECS",
                60,
            )?),
            otel_endpoint: var("OTEL_ENDPOINT"),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints. Call again after applying overrides.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".to_string()));
        }
        if self.backoff_base.is_zero() {
            return Err(Error::Config("backoff base must be positive".to_string()));
        }
        if self.backoff_max < self.backoff_base {
            return Err(Error::Config(format!(
                "backoff max {:?} is below backoff base {:?}",
                self.backoff_max, self.backoff_base
            )));
        }
        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            name: "alerts".to_string(),
            workers: self.workers,
            resync_period: self.resync_period,
            sync_timeout: self.sync_timeout,
            backoff_base: self.backoff_base,
            backoff_max: self.backoff_max,
            retry: RetryPolicy {
                max_retries: self.max_retries,
            },
        }
    }
}

fn parse<T: FromStr>(raw: &str, name: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid value {raw:?} for {name}: {e}")))
}

fn parse_or<T: FromStr>(raw: Option<String>, name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.map_or(Ok(default), |v| parse(&v, name))
}
