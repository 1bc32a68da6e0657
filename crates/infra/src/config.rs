//! Environment-driven configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::jobs::{JobSettings, RetryPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    /// Unset: in-memory cache and queue.
    pub redis_url: Option<String>,
    pub storage_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub mirror_ttl: Duration,
    pub download_ttl: Duration,
    pub retention_days: u32,
    pub queue_batch_size: usize,
    pub queue_poll_interval: Duration,
    /// Deliveries before a job is dead-lettered.
    pub queue_max_attempts: u32,
    pub report_row_limit: u32,
    pub stats_window_days: u32,
    pub cleanup_interval: Duration,
}

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_raw = get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let bind_addr = bind_raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            key: "BIND_ADDR",
            value: bind_raw.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite://safework.db?mode=rwc".to_string()),
            redis_url: get("REDIS_URL"),
            storage_dir: PathBuf::from(get("STORAGE_DIR").unwrap_or_else(|| "./artifacts".to_string())),
            bind_addr,
            mirror_ttl: Duration::from_secs(u64::from(number(&get, "MIRROR_TTL_DAYS", 30)?) * DAY),
            download_ttl: Duration::from_secs(u64::from(number(&get, "DOWNLOAD_TTL_HOURS", 24)?) * HOUR),
            retention_days: number(&get, "RETENTION_DAYS", 30)?,
            queue_batch_size: number(&get, "QUEUE_BATCH_SIZE", 10)? as usize,
            queue_poll_interval: Duration::from_millis(u64::from(number(&get, "QUEUE_POLL_MS", 500)?)),
            queue_max_attempts: number(&get, "QUEUE_MAX_ATTEMPTS", 5)?,
            report_row_limit: number(&get, "REPORT_ROW_LIMIT", 50)?,
            stats_window_days: number(&get, "STATS_WINDOW_DAYS", 7)?,
            cleanup_interval: Duration::from_secs(u64::from(number(&get, "CLEANUP_INTERVAL_HOURS", 24)?) * HOUR),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.queue_max_attempts)
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            download_ttl: self.download_ttl,
            retention: chrono::Duration::days(i64::from(self.retention_days)),
            report_row_limit: self.report_row_limit,
            ..JobSettings::default()
        }
    }
}

/// Positive integer with a default. Values outside `u32` are rejected, not truncated.
fn number(get: &impl Fn(&str) -> Option<String>, key: &'static str, default: u32) -> Result<u32, ConfigError> {
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    let invalid = |reason: String| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason,
    };
    let parsed = raw.parse::<u64>().map_err(|e| invalid(e.to_string()))?;
    let n = u32::try_from(parsed).map_err(|_| invalid(format!("must not exceed {}", u32::MAX)))?;
    if n == 0 {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(n)
}
