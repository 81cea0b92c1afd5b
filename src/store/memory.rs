use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{merge, EndpointStore};
use crate::endpoint::EndpointDefinition;
use crate::error::LivemockError;

/// Definitions held in process memory, soft-deleted ones included.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<u64, EndpointDefinition>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from existing records, e.g. a loaded file.
    #[must_use]
    pub fn from_records(records: Vec<EndpointDefinition>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|d| (d.id, d)).collect()),
        }
    }

    /// Every record, soft-deleted ones included.
    #[must_use]
    pub fn all(&self) -> Vec<EndpointDefinition> {
        self.records.read().values().cloned().collect()
    }

    pub(crate) fn put_sync(&self, mut def: EndpointDefinition) -> EndpointDefinition {
        let mut records = self.records.write();
        if def.id == 0 {
            def.id = records.keys().next_back().map_or(1, |max| max + 1);
        }
        let merged = merge(records.get(&def.id), def);
        records.insert(merged.id, merged.clone());
        merged
    }

    pub(crate) fn delete_sync(&self, id: u64) -> bool {
        let mut records = self.records.write();
        match records.get_mut(&id) {
            Some(def) if !def.is_deleted() => {
                def.deleted_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl EndpointStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list(&self) -> Result<Vec<EndpointDefinition>, LivemockError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|d| !d.is_deleted())
            .cloned()
            .collect())
    }

    async fn get(&self, id: u64) -> Result<Option<EndpointDefinition>, LivemockError> {
        Ok(self
            .records
            .read()
            .get(&id)
            .filter(|d| !d.is_deleted())
            .cloned())
    }

    async fn put(&self, def: EndpointDefinition) -> Result<EndpointDefinition, LivemockError> {
        Ok(self.put_sync(def))
    }

    async fn delete(&self, id: u64) -> Result<bool, LivemockError> {
        Ok(self.delete_sync(id))
    }

    async fn is_empty(&self) -> Result<bool, LivemockError> {
        Ok(self.records.read().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn crud() {
        let store = MemoryStore::new();
        assert!(store.is_empty().await.unwrap());

        let a = store.put(EndpointDefinition::new("GET", "/a", "{}")).await.unwrap();
        let b = store.put(EndpointDefinition::new("GET", "/b", "{}")).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(store.find_by_path("/b").await.unwrap().map(|d| d.id), Some(2));

        assert!(store.delete(1).await.unwrap());
        assert!(!store.delete(1).await.unwrap());
        assert!(store.get(1).await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(!store.is_empty().await.unwrap());

        let c = store.put(EndpointDefinition::new("GET", "/c", "{}")).await.unwrap();
        assert_eq!(c.id, 3, "ids are not reused after deletion");
    }
}
