//! Endpoint definition storage.
//!
//! Defines the [`EndpointStore`] trait and its backends: an in-memory
//! map, a JSON file rewritten on every change, and SQLite (feature
//! `sqlite`). [`open`] picks a backend from the store path's extension.

pub mod json_file;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;

use crate::endpoint::EndpointDefinition;
use crate::error::LivemockError;

// async_trait is required because stores are held as Box<dyn EndpointStore>.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Every definition that is not soft-deleted, ordered by id.
    async fn list(&self) -> Result<Vec<EndpointDefinition>, LivemockError>;

    async fn get(&self, id: u64) -> Result<Option<EndpointDefinition>, LivemockError>;

    /// Inserts or updates. An `id` of `0` gets a fresh id; an empty `body`
    /// keeps the stored one. Returns the stored record.
    async fn put(&self, def: EndpointDefinition) -> Result<EndpointDefinition, LivemockError>;

    /// Soft-deletes by setting `deletedAt`. Returns whether a live record existed.
    async fn delete(&self, id: u64) -> Result<bool, LivemockError>;

    async fn find_by_path(&self, path: &str) -> Result<Option<EndpointDefinition>, LivemockError> {
        Ok(self.list().await?.into_iter().find(|d| d.path == path))
    }

    /// Whether no record was ever stored, deleted ones included.
    async fn is_empty(&self) -> Result<bool, LivemockError>;
}

/// Merges an incoming definition with the stored one before a write.
pub(crate) fn merge(existing: Option<&EndpointDefinition>, mut def: EndpointDefinition) -> EndpointDefinition {
    let now = Utc::now();
    match existing {
        Some(stored) => {
            if def.body.is_empty() {
                def.body.clone_from(&stored.body);
            }
            if def.file_content.is_empty() && def.mime_type == stored.mime_type {
                def.file_content.clone_from(&stored.file_content);
            }
            def.created_at = stored.created_at.or(Some(now));
        }
        None => def.created_at = def.created_at.or(Some(now)),
    }
    def.updated_at = Some(now);
    def.deleted_at = None;
    def
}

/// Opens the store for `path`: `.json` selects the JSON file store,
/// `.db`/`.sqlite` the SQLite store, and no path an in-memory store.
pub async fn open(path: Option<&Path>) -> Result<Box<dyn EndpointStore>, LivemockError> {
    let Some(path) = path else {
        return Ok(Box::new(memory::MemoryStore::new()));
    };
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "json" => Ok(Box::new(json_file::JsonFileStore::open(path).await?)),
        #[cfg(feature = "sqlite")]
        "db" | "sqlite" | "sqlite3" => Ok(Box::new(sqlite::SqliteStore::open(path).await?)),
        other => Err(LivemockError::UnsupportedFormat(other.to_string())),
    }
}
