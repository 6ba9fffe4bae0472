//! File-backed credential store.

use crate::error::StoreResult;
use crate::store::CredentialStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

type Document = BTreeMap<String, String>;

/// Credential store persisted as a flat JSON object.
///
/// Every mutation rewrites the whole document to a temp file in the same
/// directory and renames it over the target, so a crash mid-write leaves
/// either the old document or the new one. Mutations are serialized through
/// an async lock to avoid lost updates between concurrent writers.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    seq: AtomicU32,
}

impl FileStore {
    /// Create a store backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            seq: AtomicU32::new(0),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> StoreResult<Document> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(Document::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Document::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, doc: &Document) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Unique temp name per write: a shorter document must never inherit
        // trailing bytes from a longer one left by a racing writer.
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);

        let json = serde_json::to_string_pretty(doc)?;
        let written = match tokio::fs::write(&tmp_path, json).await {
            Ok(()) => tokio::fs::rename(&tmp_path, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(path = %self.path.display(), keys = doc.len(), "Credential file written");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.load().await?.remove(key))
    }

    async fn multi_get(&self, keys: &[&str]) -> StoreResult<Vec<(String, Option<String>)>> {
        let doc = self.load().await?;
        Ok(keys
            .iter()
            .map(|key| (key.to_string(), doc.get(*key).cloned()))
            .collect())
    }

    async fn multi_set(&self, entries: &[(&str, &str)]) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load().await?;
        for (key, value) in entries {
            doc.insert((*key).to_string(), (*value).to_string());
        }
        self.save(&doc).await
    }

    async fn multi_remove(&self, keys: &[&str]) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load().await?;
        let before = doc.len();
        for key in keys {
            doc.remove(*key);
        }
        if doc.len() == before {
            return Ok(());
        }
        self.save(&doc).await
    }

    async fn clear(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::keys;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("credentials.json"));
        assert!(store.get(keys::TOKEN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_values_survive_a_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        let store = FileStore::new(&path);
        store
            .multi_set(&[(keys::TOKEN, "at-1"), (keys::REFRESH_TOKEN, "rt-1")])
            .await
            .unwrap();
        drop(store);

        let reopened = FileStore::new(&path);
        let values = reopened
            .multi_get(&[keys::TOKEN, keys::REFRESH_TOKEN])
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![
                (keys::TOKEN.to_string(), Some("at-1".to_string())),
                (keys::REFRESH_TOKEN.to_string(), Some("rt-1".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("credentials.json"));
        store.set(keys::USER_ID, "driver-7").await.unwrap();
        store.set(keys::TOKEN, "at-1").await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["credentials.json".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_replace_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), "x").unwrap();

        let store = FileStore::new(&path);
        let doc = Document::from([(keys::TOKEN.to_string(), "at-1".to_string())]);
        let err = store.save(&doc).await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["credentials.json".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_lose_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FileStore::new(dir.path().join("credentials.json")));

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("k{i}");
                store.set(&key, "v").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for i in 0..8 {
            let key = format!("k{i}");
            assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("v"));
        }
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileStore::new(&path);
        store
            .multi_set(&[(keys::TOKEN, "at-1"), ("locale", "en")])
            .await
            .unwrap();

        store.multi_remove(&keys::AUTH_KEYS).await.unwrap();
        assert!(store.get(keys::TOKEN).await.unwrap().is_none());
        assert_eq!(store.get("locale").await.unwrap().as_deref(), Some("en"));

        store.clear().await.unwrap();
        assert!(!path.exists());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileStore::new(&path);
        let err = store.get(keys::TOKEN).await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
