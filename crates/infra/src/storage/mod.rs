//! Object storage for generated artifacts (exports, reports).
//!
//! Writes are atomic from the caller's perspective: an object is either
//! fully visible with its metadata or not visible at all.

pub mod in_memory;
pub mod local;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use in_memory::InMemoryObjectStore;
pub use local::LocalObjectStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid object key: {0:?}")]
    InvalidKey(String),

    #[error("corrupt object metadata for {key}: {message}")]
    Metadata { key: String, message: String },

    #[error("storage error: {0}")]
    Backend(String),
}

/// Descriptor of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
    /// Caller metadata (filename, form type, category, generated-at, requester).
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub info: ObjectInfo,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<ObjectInfo, StorageError>;

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError>;

    /// `true` when an object was removed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Objects whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError>;

    async fn ping(&self) -> Result<(), StorageError>;
}

/// Keys are relative `/`-separated paths of `[A-Za-z0-9._-]` segments.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = || StorageError::InvalidKey(key.to_string());
    if key.is_empty() || key.starts_with('/') || key.ends_with('/') {
        return Err(invalid());
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid());
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(invalid());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_validated() {
        assert!(validate_key("exports/001/20260301T090000Z.csv").is_ok());
        assert!(validate_key("reports/all/x.md").is_ok());
        for bad in ["", "/abs", "a//b", "../etc/passwd", "a/./b", "dir/", "a b", "a\\b"] {
            assert!(validate_key(bad).is_err(), "{bad:?} accepted");
        }
    }
}
