//! Filesystem-backed object store.
//!
//! Layout: `{root}/{key}.meta.json` is the commit record: the [`ObjectInfo`] plus
//! the name of the blob holding the body. Every `put` writes a fresh blob next
//! to it, then renames the new sidecar into place, then removes the previous
//! blob. A reader always sees a body and metadata from the same `put`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use safework_core::{SharedClock, SystemClock};

use super::{ObjectInfo, ObjectStore, StorageError, StoredObject, validate_key};

const META_SUFFIX: &str = ".meta.json";
const BLOB_SUFFIX: &str = ".blob";
const READ_ATTEMPTS: usize = 3;

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    #[serde(flatten)]
    info: ObjectInfo,
    /// Body file name, in the same directory as the sidecar.
    blob: String,
}

pub struct LocalObjectStore {
    root: PathBuf,
    clock: SharedClock,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_clock(root, SystemClock::shared())
    }

    pub fn with_clock(root: impl Into<PathBuf>, clock: SharedClock) -> Self {
        Self {
            root: root.into(),
            clock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{META_SUFFIX}"))
    }

    /// Sibling of the key's sidecar.
    fn blob_path(&self, key: &str, blob: &str) -> PathBuf {
        let meta = self.meta_path(key);
        match meta.parent() {
            Some(dir) => dir.join(blob),
            None => self.root.join(blob),
        }
    }

    async fn read_sidecar(&self, key: &str) -> Result<Option<Sidecar>, StorageError> {
        match tokio::fs::read(self.meta_path(key)).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| StorageError::Metadata {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_info(&self, key: &str) -> Result<Option<ObjectInfo>, StorageError> {
        Ok(self.read_sidecar(key).await?.map(|s| s.info))
    }
}

fn blob_name(key: &str) -> String {
    let leaf = key.rsplit('/').next().unwrap_or(key);
    format!(".{leaf}.{}{BLOB_SUFFIX}", Uuid::now_v7())
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;
    tokio::fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.tmp-{}", Uuid::now_v7()));
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<ObjectInfo, StorageError> {
        validate_key(key)?;
        if key.ends_with(META_SUFFIX) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let info = ObjectInfo {
            key: key.to_string(),
            size: body.len() as u64,
            content_type: content_type.to_string(),
            uploaded_at: self.clock.now(),
            metadata,
        };
        let sidecar = Sidecar {
            info,
            blob: blob_name(key),
        };
        let meta = serde_json::to_vec_pretty(&sidecar).map_err(|e| StorageError::Metadata {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        let previous = self.read_sidecar(key).await.ok().flatten();
        let blob_path = self.blob_path(key, &sidecar.blob);
        write_atomic(&blob_path, &body).await?;
        if let Err(e) = write_atomic(&self.meta_path(key), &meta).await {
            let _ = tokio::fs::remove_file(&blob_path).await;
            return Err(e);
        }
        if let Some(previous) = previous.filter(|p| p.blob != sidecar.blob) {
            if let Err(e) = remove_if_exists(&self.blob_path(key, &previous.blob)).await {
                warn!(key, error = %e, "failed to remove superseded blob");
            }
        }
        debug!(key, size = sidecar.info.size, "object stored");
        Ok(sidecar.info)
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        validate_key(key)?;
        // A concurrent overwrite can remove the blob between the two reads;
        // the next pass sees the sidecar that replaced it.
        for _ in 0..READ_ATTEMPTS {
            let Some(sidecar) = self.read_sidecar(key).await? else {
                return Ok(None);
            };
            match tokio::fs::read(self.blob_path(key, &sidecar.blob)).await {
                Ok(body) => {
                    return Ok(Some(StoredObject {
                        info: sidecar.info,
                        body,
                    }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        let Some(sidecar) = self.read_sidecar(key).await? else {
            return Ok(false);
        };
        // Sidecar first: the object disappears from listings before its body goes.
        let removed = remove_if_exists(&self.meta_path(key)).await?;
        remove_if_exists(&self.blob_path(key, &sidecar.blob)).await?;
        Ok(removed)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let mut infos = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let rel = rel.to_string_lossy().replace('\\', "/");
                let Some(key) = rel.strip_suffix(META_SUFFIX) else {
                    continue;
                };
                if !key.starts_with(prefix) {
                    continue;
                }
                match self.read_info(key).await {
                    Ok(Some(info)) => infos.push(info),
                    Ok(None) => {}
                    Err(e) => warn!(key, error = %e, "skipping object with unreadable metadata"),
                }
            }
        }

        infos.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(infos)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;
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
    async fn put_get_list_delete_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()));
        let store = LocalObjectStore::with_clock(dir.path(), clock.clone());

        let mut meta = BTreeMap::new();
        meta.insert("filename".to_string(), "safework_001.csv".to_string());
        store
            .put("exports/001/a.csv", b"id,name\n1,x\n".to_vec(), "text/csv", meta)
            .await
            .unwrap();
        clock.advance(Duration::days(3));
        store
            .put("reports/all/r.md", b"# r".to_vec(), "text/markdown", BTreeMap::new())
            .await
            .unwrap();

        let got = store.get("exports/001/a.csv").await.unwrap().unwrap();
        assert_eq!(got.body, b"id,name\n1,x\n");
        assert_eq!(got.info.metadata["filename"], "safework_001.csv");

        let exports = store.list("exports/").await.unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].key, "exports/001/a.csv");
        assert_eq!(store.list("").await.unwrap().len(), 2);

        assert!(store.delete("exports/001/a.csv").await.unwrap());
        assert!(store.get("exports/001/a.csv").await.unwrap().is_none());
        assert!(store.list("exports/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overwrite_replaces_whole_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.put("exports/x.json", b"[1,2,3]".to_vec(), "application/json", BTreeMap::new()).await.unwrap();
        store.put("exports/x.json", b"[]".to_vec(), "application/json", BTreeMap::new()).await.unwrap();

        let got = store.get("exports/x.json").await.unwrap().unwrap();
        assert_eq!(got.body, b"[]");
        assert_eq!(got.info.size, 2);
        assert_eq!(store.list("exports/").await.unwrap().len(), 1);

        // Only the live blob and its sidecar remain.
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir.path().join("exports")).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names.len(), 2, "{names:?}");
        assert!(names.iter().any(|n| n == "x.json.meta.json"));
        assert!(names.iter().any(|n| n.starts_with(".x.json.") && n.ends_with(BLOB_SUFFIX)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn readers_never_see_body_and_metadata_from_different_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path()));
        let version = |n: usize| {
            let mut meta = BTreeMap::new();
            meta.insert("version".to_string(), n.to_string());
            (vec![b'a' + (n % 26) as u8; 10 + n], meta)
        };
        let (body, meta) = version(0);
        store.put("exports/v.csv", body, "text/csv", meta).await.unwrap();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for n in 1..60 {
                    let (body, meta) = version(n);
                    store.put("exports/v.csv", body, "text/csv", meta).await.unwrap();
                }
            })
        };
        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    if let Some(obj) = store.get("exports/v.csv").await.unwrap() {
                        let n: usize = obj.info.metadata["version"].parse().unwrap();
                        assert_eq!(obj.body, version(n).0);
                        assert_eq!(obj.info.size, obj.body.len() as u64);
                    }
                    tokio::task::yield_now().await;
                }
            })
        };
        writer.await.unwrap();
        reader.await.unwrap();

        let last = store.get("exports/v.csv").await.unwrap().unwrap();
        assert_eq!(last.info.metadata["version"], "59");
    }

    #[tokio::test]
    async fn blob_without_committed_sidecar_is_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store.put("exports/y.csv", b"old".to_vec(), "text/csv", BTreeMap::new()).await.unwrap();
        // A put interrupted after writing its blob.
        tokio::fs::write(dir.path().join("exports").join(blob_name("exports/y.csv")), b"newer body")
            .await
            .unwrap();

        let got = store.get("exports/y.csv").await.unwrap().unwrap();
        assert_eq!(got.body, b"old");
        assert_eq!(got.info.size, 3);
        assert_eq!(store.list("exports/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let err = store
            .put("../escape.txt", b"x".to_vec(), "text/plain", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
