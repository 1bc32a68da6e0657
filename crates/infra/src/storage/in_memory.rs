use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use safework_core::{SharedClock, SystemClock};

use super::{ObjectInfo, ObjectStore, StorageError, StoredObject, validate_key};

/// In-memory object store (tests, local development).
pub struct InMemoryObjectStore {
    clock: SharedClock,
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    /// `uploaded_at` is taken from `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            clock,
            objects: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<ObjectInfo, StorageError> {
        validate_key(key)?;
        let info = ObjectInfo {
            key: key.to_string(),
            size: body.len() as u64,
            content_type: content_type.to_string(),
            uploaded_at: self.clock.now(),
            metadata,
        };
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                info: info.clone(),
                body,
            },
        );
        Ok(info)
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        validate_key(key)?;
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        Ok(self.objects.write().await.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let mut infos: Vec<ObjectInfo> = self
            .objects
            .read()
            .await
            .values()
            .filter(|o| o.info.key.starts_with(prefix))
            .map(|o| o.info.clone())
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(infos)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use safework_core::ManualClock;

    use super::*;

    #[tokio::test]
    async fn put_list_delete() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        let store = InMemoryObjectStore::with_clock(clock.clone());

        store
            .put("exports/001/a.csv", b"x".to_vec(), "text/csv", BTreeMap::new())
            .await
            .unwrap();
        clock.advance(Duration::days(1));
        store
            .put("reports/all/b.md", b"yy".to_vec(), "text/markdown", BTreeMap::new())
            .await
            .unwrap();

        let exports = store.list("exports/").await.unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].size, 1);
        assert_eq!(exports[0].uploaded_at, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());

        assert!(store.delete("exports/001/a.csv").await.unwrap());
        assert!(!store.delete("exports/001/a.csv").await.unwrap());
        assert_eq!(store.list("").await.unwrap().len(), 1);
    }
}
