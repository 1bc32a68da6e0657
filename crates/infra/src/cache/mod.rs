//! Key-value cache store with per-entry expiry.
//!
//! Never authoritative: callers treat a miss as "unknown", not "absent".

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use in_memory::InMemoryKvStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisKvStore;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache value could not be (de)serialized: {0}")]
    Serialization(String),
}

#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Store `value` under `key`; `ttl = None` keeps it until deleted.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Expired entries are never returned.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), CacheError> {
    let raw = serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
    store.put(key, raw, ttl).await
}

pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>, CacheError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| CacheError::Serialization(e.to_string())),
        None => Ok(None),
    }
}

/// Key conventions shared by the submission service and job handlers.
pub mod keys {
    use chrono::{DateTime, Utc};

    use safework_core::SubmissionId;

    pub fn mirror(id: SubmissionId) -> String {
        format!("survey:{id}")
    }

    pub fn download(filename: &str) -> String {
        format!("download:{filename}")
    }

    pub fn notification(at: DateTime<Utc>, unique: &str) -> String {
        format!("notification:{}:{unique}", at.timestamp_millis())
    }

    pub fn analysis(form_type: &str, analysis_type: &str, at: DateTime<Utc>) -> String {
        format!("analysis:{form_type}:{analysis_type}:{}", at.timestamp_millis())
    }
}
