//! SQLite-backed [`EndpointStore`].
//!
//! One row per definition in `livemock_endpoint`, auto-created on first
//! connection. Timestamps are stored as RFC 3339 text.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use super::{merge, EndpointStore};
use crate::endpoint::EndpointDefinition;
use crate::error::LivemockError;

const COLUMNS: &str =
    "id, method, path, mime_type, filename, file_content, body, created_at, updated_at, deleted_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

fn db_error(e: sqlx::Error) -> LivemockError {
    LivemockError::Store {
        backend: "sqlite",
        source: Box::new(e),
    }
}

fn to_text(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

fn from_text(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn from_row(row: &SqliteRow) -> Result<EndpointDefinition, sqlx::Error> {
    let id: i64 = row.try_get("id")?;
    Ok(EndpointDefinition {
        id: u64::try_from(id).unwrap_or_default(),
        method: row.try_get("method")?,
        path: row.try_get("path")?,
        mime_type: row.try_get("mime_type")?,
        filename: row.try_get("filename")?,
        file_content: row.try_get("file_content")?,
        body: row.try_get("body")?,
        created_at: from_text(row.try_get("created_at")?),
        updated_at: from_text(row.try_get("updated_at")?),
        deleted_at: from_text(row.try_get("deleted_at")?),
    })
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self, LivemockError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.map_err(db_error)?;
        Self::with_pool(pool).await
    }

    /// Uses an existing pool, creating the table if needed.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, LivemockError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS livemock_endpoint (\
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                method TEXT NOT NULL DEFAULT 'ANY', \
                path TEXT NOT NULL, \
                mime_type TEXT NOT NULL DEFAULT '', \
                filename TEXT NOT NULL DEFAULT '', \
                file_content BLOB NOT NULL DEFAULT x'', \
                body TEXT NOT NULL DEFAULT '', \
                created_at TEXT, \
                updated_at TEXT, \
                deleted_at TEXT\
            )",
        )
        .execute(&pool)
        .await
        .map_err(db_error)?;
        Ok(Self { pool })
    }

    async fn fetch(&self, id: u64) -> Result<Option<EndpointDefinition>, LivemockError> {
        let id = i64::try_from(id).unwrap_or(i64::MAX);
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM livemock_endpoint WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(from_row).transpose().map_err(db_error)
    }
}

#[async_trait]
impl EndpointStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn list(&self) -> Result<Vec<EndpointDefinition>, LivemockError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM livemock_endpoint WHERE deleted_at IS NULL ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(from_row).collect::<Result<_, _>>().map_err(db_error)
    }

    async fn get(&self, id: u64) -> Result<Option<EndpointDefinition>, LivemockError> {
        Ok(self.fetch(id).await?.filter(|d| !d.is_deleted()))
    }

    async fn put(&self, def: EndpointDefinition) -> Result<EndpointDefinition, LivemockError> {
        let existing = if def.id == 0 { None } else { self.fetch(def.id).await? };
        let mut merged = merge(existing.as_ref(), def);

        let id = if merged.id == 0 {
            None
        } else {
            Some(i64::try_from(merged.id).unwrap_or(i64::MAX))
        };
        let row = sqlx::query(
            "INSERT INTO livemock_endpoint \
                (id, method, path, mime_type, filename, file_content, body, created_at, updated_at, deleted_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL) \
             ON CONFLICT(id) DO UPDATE SET \
                method = excluded.method, path = excluded.path, mime_type = excluded.mime_type, \
                filename = excluded.filename, file_content = excluded.file_content, body = excluded.body, \
                created_at = excluded.created_at, updated_at = excluded.updated_at, deleted_at = NULL \
             RETURNING id",
        )
        .bind(id)
        .bind(&merged.method)
        .bind(&merged.path)
        .bind(&merged.mime_type)
        .bind(&merged.filename)
        .bind(&merged.file_content)
        .bind(&merged.body)
        .bind(to_text(merged.created_at))
        .bind(to_text(merged.updated_at))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        let id: i64 = row.try_get("id").map_err(db_error)?;
        merged.id = u64::try_from(id).unwrap_or_default();
        Ok(merged)
    }

    async fn delete(&self, id: u64) -> Result<bool, LivemockError> {
        let id = i64::try_from(id).unwrap_or(i64::MAX);
        let result = sqlx::query(
            "UPDATE livemock_endpoint SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_empty(&self) -> Result<bool, LivemockError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM livemock_endpoint")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(count == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteStore::with_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let store = store().await;
        assert!(store.is_empty().await.unwrap());

        let mut file = EndpointDefinition::new("GET", "/f", "");
        file.mime_type = "image/png".into();
        file.file_content = vec![0x89, 0x50, 0x4e, 0x47];
        let stored = store.put(file).await.unwrap();
        assert_eq!(stored.id, 1);

        let fetched = store.get(1).await.unwrap().unwrap();
        assert_eq!(fetched.file_content, vec![0x89, 0x50, 0x4e, 0x47]);
        assert!(fetched.created_at.is_some());

        let mut update = EndpointDefinition::new("POST", "/f", "");
        update.id = 1;
        update.mime_type = "image/png".into();
        let updated = store.put(update).await.unwrap();
        assert_eq!(updated.method, "POST");
        assert_eq!(store.get(1).await.unwrap().unwrap().file_content.len(), 4);

        assert!(store.delete(1).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
        assert!(!store.is_empty().await.unwrap());
    }
}
