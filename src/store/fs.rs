use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info};

use super::{DurableStore, StoreError};

/// File-backed store: one JSON document per key under a base directory.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// reader never observes a partially written checkpoint.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}.json"))
    }

    async fn ensure_directory(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.directory).await?;
        Ok(())
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.entry_path(key);
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(key = %key, file = ?path, "no stored entry for key");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.ensure_directory().await?;

        let path = self.entry_path(key);
        let temp_path = self.directory.join(format!("{key}.json.tmp"));
        let serialized = serde_json::to_string_pretty(&value)?;

        fs::write(&temp_path, serialized).await?;
        fs::rename(&temp_path, &path).await?;

        info!(key = %key, file = ?path, "stored entry written");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(fs::try_exists(self.entry_path(key)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        store
            .set("linking_cr1", json!({"currentState": "channel_response_received"}))
            .await
            .unwrap();

        assert!(store.exists("linking_cr1").await.unwrap());
        let loaded = store.get("linking_cr1").await.unwrap().unwrap();
        assert_eq!(loaded["currentState"], "channel_response_received");
    }

    #[tokio::test]
    async fn absent_key_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        assert_eq!(store.get("missing").await.unwrap(), None);
        assert!(!store.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn rewrite_leaves_single_readable_value() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        store.set("k", json!({"n": 1})).await.unwrap();
        store.set("k", json!({"n": 2})).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(json!({"n": 2})));
        // The temp file must not linger after the rename.
        assert!(!fs::try_exists(dir.path().join("k.json.tmp")).await.unwrap());
    }
}
