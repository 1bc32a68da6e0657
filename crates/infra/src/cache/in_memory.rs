use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use safework_core::{SharedClock, SystemClock};

use super::{CacheError, KvStore};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process cache. Expiry is evaluated lazily against the injected clock.
pub struct InMemoryKvStore {
    clock: SharedClock,
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .map(|e| e.values().filter(|v| v.expires_at.is_none_or(|t| t > now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .map(|e| {
                e.iter()
                    .filter(|(k, v)| k.starts_with(prefix) && v.expires_at.is_none_or(|t| t > now))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> CacheError {
    CacheError::Backend("cache lock poisoned".to_string())
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl).map_err(|e| CacheError::Backend(e.to_string()))?;
                Some(self.clock.now() + ttl)
            }
            None => None,
        };
        self.entries
            .lock()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        match entries.get(key) {
            Some(entry) if entry.expires_at.is_some_and(|t| t <= now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.entries.lock().map(|_| ()).map_err(|_| poisoned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use safework_core::ManualClock;

    use super::*;
    use crate::cache::{get_json, put_json};

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()))
    }

    #[tokio::test]
    async fn entries_expire_with_the_clock() {
        let clock = clock();
        let store = InMemoryKvStore::with_clock(clock.clone());

        store
            .put("download:a.csv", "exports/001/x.csv".into(), Some(Duration::from_secs(24 * 3600)))
            .await
            .unwrap();

        clock.advance(chrono::Duration::hours(23));
        assert!(store.get("download:a.csv").await.unwrap().is_some());

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(store.get("download:a.csv").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn entries_without_ttl_persist() {
        let clock = clock();
        let store = InMemoryKvStore::with_clock(clock.clone());
        store.put("k", "v".into(), None).await.unwrap();
        clock.advance(chrono::Duration::days(365));
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        let store = InMemoryKvStore::new();
        put_json(&store, "j", &serde_json::json!({"a": 1}), None).await.unwrap();
        let v: serde_json::Value = get_json(&store, "j").await.unwrap().unwrap();
        assert_eq!(v["a"], 1);
        assert_eq!(store.keys_with_prefix("j"), vec!["j".to_string()]);
    }
}
