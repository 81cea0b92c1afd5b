//! Administrative operations on endpoint definitions.
//!
//! Every store access goes through one async mutex. Writes are checked
//! against the route table before they reach the store, and the table is
//! resynchronized after each successful write.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::endpoint::validation::validate;
use crate::endpoint::EndpointDefinition;
use crate::error::LivemockError;
use crate::routing::{self, RouteSnapshot, RouteTable};
use crate::store::EndpointStore;

pub struct EndpointService {
    store: Mutex<Box<dyn EndpointStore>>,
    routes: Arc<RouteTable>,
}

impl std::fmt::Debug for EndpointService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointService").finish_non_exhaustive()
    }
}

impl EndpointService {
    #[must_use]
    pub fn new(store: Box<dyn EndpointStore>, routes: Arc<RouteTable>) -> Self {
        Self {
            store: Mutex::new(store),
            routes,
        }
    }

    #[must_use]
    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub async fn store_name(&self) -> &'static str {
        self.store.lock().await.name()
    }

    pub async fn list(&self) -> Result<Vec<EndpointDefinition>, LivemockError> {
        self.store.lock().await.list().await
    }

    pub async fn get(&self, id: u64) -> Result<EndpointDefinition, LivemockError> {
        self.store
            .lock()
            .await
            .get(id)
            .await?
            .ok_or(LivemockError::EndpointNotFound(id))
    }

    /// Creates or updates a definition.
    ///
    /// A definition without an id replaces the live record with the same
    /// method and path, if any. The candidate set must synchronize cleanly
    /// before anything is written.
    pub async fn save(&self, mut def: EndpointDefinition) -> Result<EndpointDefinition, LivemockError> {
        def.method = def.method();
        let errors = validate(&def);
        if !errors.is_empty() {
            return Err(LivemockError::InvalidDefinition { errors });
        }

        let store = self.store.lock().await;
        let mut current = store.list().await?;

        if def.id == 0 {
            if let Some(existing) = current
                .iter()
                .find(|d| d.path == def.path && d.method() == def.method)
            {
                def.id = existing.id;
            }
        } else if store.get(def.id).await?.is_none() {
            return Err(LivemockError::EndpointNotFound(def.id));
        }

        let mut candidate = def.clone();
        if candidate.body.is_empty() {
            if let Some(stored) = current.iter().find(|d| d.id == candidate.id) {
                candidate.body.clone_from(&stored.body);
            }
        }
        current.retain(|d| candidate.id == 0 || d.id != candidate.id);
        current.push(candidate);
        routing::validate(&current)?;

        let saved = store.put(def).await?;
        tracing::info!(id = saved.id, endpoint = %saved.label(), store = store.name(), "endpoint saved");
        self.resync(&**store).await?;
        Ok(saved)
    }

    pub async fn delete(&self, id: u64) -> Result<(), LivemockError> {
        let store = self.store.lock().await;
        if !store.delete(id).await? {
            return Err(LivemockError::EndpointNotFound(id));
        }
        tracing::info!(id, store = store.name(), "endpoint deleted");
        self.resync(&**store).await?;
        Ok(())
    }

    /// Writes `seed` into an empty store, then synchronizes once.
    pub async fn bootstrap(
        &self,
        seed: Vec<EndpointDefinition>,
    ) -> Result<Arc<RouteSnapshot>, LivemockError> {
        let store = self.store.lock().await;
        if !seed.is_empty() && store.is_empty().await? {
            for def in seed {
                store.put(def).await?;
            }
            tracing::info!(store = store.name(), "seeded demo endpoints");
        }
        self.resync(&**store).await
    }

    async fn resync(&self, store: &dyn EndpointStore) -> Result<Arc<RouteSnapshot>, LivemockError> {
        let definitions = store.list().await?;
        self.routes.synchronize(&definitions)
    }
}

/// Endpoints installed on first start. The proxy demo targets `port`.
#[must_use]
pub fn demo_endpoints(port: u16) -> Vec<EndpointDefinition> {
    vec![
        EndpointDefinition::new(
            "GET",
            "/api/demo",
            r#"{
  "name": "livemock",
  "today@now": "yyyy-MM-dd",
  "time": "@now HH:mm:ss",
  "items": [1, 2, 3]
}"#,
        ),
        EndpointDefinition::new(
            "POST",
            "/dynamic/demo",
            r#"{
  "_dynamic": [
    {"condition": "json_name == 'bingoo'", "response": {"name": "bingoo", "matched": true}},
    {"condition": "json_age >= 18", "response": {"adult": true}, "status": 202}
  ],
  "matched": false
}"#,
        ),
        EndpointDefinition::new(
            "GET",
            "/proxy/demo",
            &format!(r#"{{"_proxy": "http://127.0.0.1:{port}/api/demo"}}"#),
        ),
        EndpointDefinition::new("ANY", "/echo/:id", r#"{"_echo": "json"}"#),
        EndpointDefinition::new(
            "ANY",
            "/mockbin",
            r#"{
  "status": 201,
  "headers": {"X-Mock": "livemock"},
  "cookies": [{"name": "session", "value": "demo", "httpOnly": true}],
  "payload": {"created": true, "at": "@now yyyy-MM-dd HH:mm:ss"}
}"#,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn service() -> EndpointService {
        EndpointService::new(Box::new(MemoryStore::new()), Arc::new(RouteTable::new()))
    }

    #[tokio::test]
    async fn bootstrap_seeds_only_empty_stores() {
        let svc = service();
        let snapshot = svc.bootstrap(demo_endpoints(5003)).await.unwrap();
        assert_eq!(snapshot.len(), demo_endpoints(5003).len());
        assert!(snapshot.lookup("GET", "/echo/1").is_some());

        let again = svc.bootstrap(demo_endpoints(5003)).await.unwrap();
        assert_eq!(again.version(), snapshot.version());
        assert_eq!(svc.list().await.unwrap().len(), demo_endpoints(5003).len());
    }

    #[tokio::test]
    async fn conflicting_save_changes_nothing() {
        let svc = service();
        svc.bootstrap(Vec::new()).await.unwrap();
        svc.save(EndpointDefinition::new("GET", "/a/:id", "{}")).await.unwrap();
        let before = svc.routes().snapshot();

        let err = svc
            .save(EndpointDefinition::new("GET", "/a/:x", "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, LivemockError::RouteConflict { .. }));
        assert_eq!(svc.list().await.unwrap().len(), 1);
        assert_eq!(svc.routes().snapshot().version(), before.version());
    }

    #[tokio::test]
    async fn save_by_path_updates_in_place() {
        let svc = service();
        let first = svc.save(EndpointDefinition::new("GET", "/a", r#"{"v":1}"#)).await.unwrap();
        let second = svc.save(EndpointDefinition::new("get", "/a", r#"{"v":2}"#)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(svc.get(first.id).await.unwrap().body, r#"{"v":2}"#);
    }

    #[tokio::test]
    async fn invalid_definitions_are_rejected() {
        let svc = service();
        let err = svc
            .save(EndpointDefinition::new("FETCH", "no-slash", "{"))
            .await
            .unwrap_err();
        let LivemockError::InvalidDefinition { errors } = err else {
            panic!("expected validation errors");
        };
        assert!(errors.iter().any(|e| e.field == "path"));
        assert!(errors.iter().any(|e| e.field == "method"));
    }

    #[tokio::test]
    async fn delete_resyncs() {
        let svc = service();
        let saved = svc.save(EndpointDefinition::new("GET", "/gone", "{}")).await.unwrap();
        assert!(svc.routes().snapshot().lookup("GET", "/gone").is_some());
        svc.delete(saved.id).await.unwrap();
        assert!(svc.routes().snapshot().lookup("GET", "/gone").is_none());
        assert!(matches!(
            svc.delete(saved.id).await,
            Err(LivemockError::EndpointNotFound(_))
        ));
    }
}
