//! A JSON array of definitions on disk.
//!
//! The file is read once at open. Every write rewrites the whole file
//! through a temporary sibling and a rename, so a crash mid-write leaves
//! the previous file intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::memory::MemoryStore;
use super::EndpointStore;
use crate::endpoint::EndpointDefinition;
use crate::error::LivemockError;

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Loads `path`, or starts empty when it does not exist yet.
    pub async fn open(path: &Path) -> Result<Self, LivemockError> {
        let records = match tokio::fs::read_to_string(path).await {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_json::from_str::<Vec<EndpointDefinition>>(&content).map_err(|e| {
                LivemockError::DefinitionsParse {
                    path: path.display().to_string(),
                    source: e,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(store_error(e)),
        };
        tracing::info!(path = %path.display(), records = records.len(), "opened JSON endpoint store");
        Ok(Self {
            path: path.to_path_buf(),
            inner: MemoryStore::from_records(records),
        })
    }

    async fn persist(&self) -> Result<(), LivemockError> {
        let json = serde_json::to_vec_pretty(&self.inner.all()).map_err(store_error)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json).await.map_err(store_error)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(store_error)
    }
}

fn store_error(e: impl std::error::Error + Send + Sync + 'static) -> LivemockError {
    LivemockError::Store {
        backend: "json",
        source: Box::new(e),
    }
}

#[async_trait]
impl EndpointStore for JsonFileStore {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn list(&self) -> Result<Vec<EndpointDefinition>, LivemockError> {
        self.inner.list().await
    }

    async fn get(&self, id: u64) -> Result<Option<EndpointDefinition>, LivemockError> {
        self.inner.get(id).await
    }

    async fn put(&self, def: EndpointDefinition) -> Result<EndpointDefinition, LivemockError> {
        let stored = self.inner.put_sync(def);
        self.persist().await?;
        Ok(stored)
    }

    async fn delete(&self, id: u64) -> Result<bool, LivemockError> {
        let deleted = self.inner.delete_sync(id);
        if deleted {
            self.persist().await?;
        }
        Ok(deleted)
    }

    async fn is_empty(&self) -> Result<bool, LivemockError> {
        self.inner.is_empty().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("livemock-{}-{name}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn writes_survive_reopen() {
        let path = temp_path("reopen");
        let store = JsonFileStore::open(&path).await.unwrap();
        assert!(store.is_empty().await.unwrap());
        store.put(EndpointDefinition::new("GET", "/a", r#"{"a":1}"#)).await.unwrap();
        store.put(EndpointDefinition::new("GET", "/b", "{}")).await.unwrap();
        store.delete(2).await.unwrap();

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let live = reopened.list().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].body, r#"{"a":1}"#);
        assert!(!reopened.is_empty().await.unwrap());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn malformed_file_is_a_parse_error() {
        let path = temp_path("bad");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFileStore::open(&path).await.unwrap_err();
        assert!(matches!(err, LivemockError::DefinitionsParse { .. }));
        let _ = std::fs::remove_file(&path);
    }
}
