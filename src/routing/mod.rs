//! The live route table.
//!
//! A [`RouteTable`] holds the current [`RouteSnapshot`] behind a mutex
//! that is only held to copy or replace the `Arc`. [`RouteTable::synchronize`]
//! rebuilds the snapshot from the full definition set in three steps:
//!
//! - **Validate**: insert every active user definition into scratch
//!   tries; any conflict aborts and the current snapshot stays installed.
//! - **Build**: compile each definition and route `/_internal/<name>`
//!   definitions to the built-in diagnostics.
//! - **Swap**: replace the snapshot pointer.
//!
//! Requests clone the `Arc` and dispatch without holding the lock, so a
//! resync never affects requests already in flight.

pub mod diagnostics;
pub mod dispatch;
pub mod trie;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::endpoint::definition::INTERNAL_PREFIX;
use crate::endpoint::{compile, CompiledEndpoint, EndpointDefinition};
use crate::error::LivemockError;
use crate::proxy::pool::PoolRegistry;
use crate::proxy::ProxyHandler;

use self::diagnostics::Diagnostic;
use self::trie::RouteTrie;

pub const ANY_METHOD: &str = "ANY";

#[derive(Debug, Clone)]
pub enum RouteTarget {
    Endpoint(Arc<CompiledEndpoint>),
    Diagnostic(Diagnostic),
}

#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub method: String,
    pub pattern: String,
    pub target: RouteTarget,
}

impl RouteEntry {
    #[must_use]
    pub fn handler_name(&self) -> &'static str {
        match &self.target {
            RouteTarget::Endpoint(endpoint) => endpoint.kind.name(),
            RouteTarget::Diagnostic(_) => "internal",
        }
    }
}

#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub entry: &'a RouteEntry,
    pub params: Vec<(String, String)>,
}

/// An immutable compiled routing table.
#[derive(Debug)]
pub struct RouteSnapshot {
    version: String,
    entries: Vec<RouteEntry>,
    tries: BTreeMap<String, RouteTrie>,
    built_at: DateTime<Utc>,
}

impl RouteSnapshot {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: version_hash(std::iter::empty()),
            entries: Vec::new(),
            tries: BTreeMap::new(),
            built_at: Utc::now(),
        }
    }

    /// SHA-256 over the active definitions; equal sets give equal versions.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn short_version(&self) -> &str {
        self.version.get(..12).unwrap_or(&self.version)
    }

    #[must_use]
    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Looks up the method's routes first, then `ANY` routes.
    #[must_use]
    pub fn lookup(&self, method: &str, path: &str) -> Option<RouteMatch<'_>> {
        [method, ANY_METHOD]
            .iter()
            .filter_map(|m| self.tries.get(*m))
            .find_map(|trie| trie.lookup(path))
            .and_then(|(idx, params)| {
                self.entries.get(idx).map(|entry| RouteMatch { entry, params })
            })
    }
}

fn active(definitions: &[EndpointDefinition]) -> impl Iterator<Item = &EndpointDefinition> {
    definitions.iter().filter(|d| !d.is_deleted())
}

fn insert(
    tries: &mut BTreeMap<String, RouteTrie>,
    method: &str,
    path: &str,
    value: usize,
) -> Result<(), LivemockError> {
    tries
        .entry(method.to_string())
        .or_default()
        .insert(path, value)
        .map_err(|reason| LivemockError::RouteConflict {
            method: method.to_string(),
            path: path.to_string(),
            reason,
        })
}

/// Checks that the active user definitions form a conflict-free table.
pub fn validate(definitions: &[EndpointDefinition]) -> Result<(), LivemockError> {
    let mut scratch = BTreeMap::new();
    for def in active(definitions).filter(|d| !d.is_internal()) {
        insert(&mut scratch, &def.method(), &def.path, 0)?;
    }
    Ok(())
}

fn version_hash<'a>(definitions: impl Iterator<Item = &'a EndpointDefinition>) -> String {
    let mut keyed: Vec<String> = definitions
        .map(|d| {
            format!(
                "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
                d.id,
                d.method(),
                d.path,
                d.mime_type,
                d.filename,
                d.body,
                d.file_content.len()
            )
        })
        .collect();
    keyed.sort_unstable();
    let mut hasher = Sha256::new();
    for key in &keyed {
        hasher.update(key.as_bytes());
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

/// The current snapshot plus the proxy pools its endpoints use.
#[derive(Debug)]
pub struct RouteTable {
    current: Mutex<Arc<RouteSnapshot>>,
    pools: Mutex<PoolRegistry>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Arc::new(RouteSnapshot::empty())),
            pools: Mutex::new(PoolRegistry::default()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        Arc::clone(&self.current.lock())
    }

    /// Validate, build and swap. On error the installed snapshot is unchanged.
    pub fn synchronize(
        &self,
        definitions: &[EndpointDefinition],
    ) -> Result<Arc<RouteSnapshot>, LivemockError> {
        if let Err(e) = validate(definitions) {
            tracing::error!(error = %e, "route synchronization rejected");
            return Err(e);
        }

        let snapshot = {
            let mut pools = self.pools.lock();
            let snapshot = build(definitions, &mut pools);
            let used: Vec<_> = snapshot
                .entries
                .iter()
                .filter_map(|entry| match &entry.target {
                    RouteTarget::Endpoint(endpoint) => match &endpoint.kind {
                        crate::endpoint::HandlerKind::Proxy(ProxyHandler { pool, .. }) => {
                            Some(Arc::clone(pool))
                        }
                        _ => None,
                    },
                    RouteTarget::Diagnostic(_) => None,
                })
                .collect();
            pools.retain_used(&used);
            Arc::new(snapshot)
        };

        let previous = std::mem::replace(&mut *self.current.lock(), Arc::clone(&snapshot));
        tracing::info!(
            routes = snapshot.len(),
            version = %snapshot.short_version(),
            changed = previous.version != snapshot.version,
            "route table synchronized"
        );
        Ok(snapshot)
    }
}

fn build(definitions: &[EndpointDefinition], pools: &mut PoolRegistry) -> RouteSnapshot {
    let mut entries = Vec::new();
    let mut tries = BTreeMap::new();

    for def in active(definitions).filter(|d| !d.is_internal()) {
        let method = def.method();
        let idx = entries.len();
        if let Err(e) = insert(&mut tries, &method, &def.path, idx) {
            tracing::warn!(error = %e, "skipping endpoint");
            continue;
        }
        entries.push(RouteEntry {
            method,
            pattern: def.path.clone(),
            target: RouteTarget::Endpoint(Arc::new(compile(Arc::new(def.clone()), pools))),
        });
    }

    for def in active(definitions).filter(|d| d.is_internal()) {
        let name = def.path.trim_start_matches(INTERNAL_PREFIX);
        let Some(diagnostic) = Diagnostic::from_name(name) else {
            tracing::warn!(path = %def.path, "unknown internal handler, skipping");
            continue;
        };
        let method = def.method();
        let idx = entries.len();
        if let Err(e) = insert(&mut tries, &method, &def.path, idx) {
            tracing::warn!(error = %e, "skipping internal endpoint");
            continue;
        }
        entries.push(RouteEntry {
            method,
            pattern: def.path.clone(),
            target: RouteTarget::Diagnostic(diagnostic),
        });
    }

    RouteSnapshot {
        version: version_hash(active(definitions)),
        entries,
        tries,
        built_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConflictReason;

    fn def(id: u64, method: &str, path: &str, body: &str) -> EndpointDefinition {
        EndpointDefinition {
            id,
            ..EndpointDefinition::new(method, path, body)
        }
    }

    fn endpoint_id(snapshot: &RouteSnapshot, method: &str, path: &str) -> Option<u64> {
        snapshot
            .lookup(method, path)
            .and_then(|m| match &m.entry.target {
                RouteTarget::Endpoint(e) => Some(e.definition.id),
                RouteTarget::Diagnostic(_) => None,
            })
    }

    #[test]
    fn conflicting_resync_keeps_previous_snapshot() {
        let table = RouteTable::new();
        let first = vec![def(1, "GET", "/a/:id", "{}")];
        table.synchronize(&first).unwrap();

        let mut second = first.clone();
        second.push(def(2, "GET", "/a/:x", "{}"));
        let err = table.synchronize(&second).unwrap_err();
        assert!(matches!(
            err,
            LivemockError::RouteConflict {
                reason: ConflictReason::Wildcard,
                ..
            }
        ));
        assert_eq!(endpoint_id(&table.snapshot(), "GET", "/a/1"), Some(1));
    }

    #[test]
    fn duplicates_are_rejected_and_deleted_ignored() {
        let mut defs = vec![def(1, "GET", "/a", "{}"), def(2, "get", "/a", "{}")];
        assert!(validate(&defs).is_err());
        defs[0].deleted_at = Some(Utc::now());
        assert!(validate(&defs).is_ok());
    }

    #[test]
    fn method_then_any() {
        let table = RouteTable::new();
        let snapshot = table
            .synchronize(&[def(1, "ANY", "/x", "{}"), def(2, "POST", "/x", "{}")])
            .unwrap();
        assert_eq!(endpoint_id(&snapshot, "POST", "/x"), Some(2));
        assert_eq!(endpoint_id(&snapshot, "GET", "/x"), Some(1));
        assert!(snapshot.lookup("GET", "/y").is_none());
    }

    #[test]
    fn resync_is_idempotent() {
        let table = RouteTable::new();
        let defs = vec![def(1, "GET", "/a", "{}"), def(2, "ANY", "/echo/:id", r#"{"_echo":"json"}"#)];
        let before = table.synchronize(&defs).unwrap();
        let after = table.synchronize(&defs).unwrap();
        assert_eq!(before.version(), after.version());
        assert_eq!(before.len(), after.len());
        assert_eq!(
            endpoint_id(&after, "GET", "/echo/9"),
            endpoint_id(&before, "GET", "/echo/9")
        );
        let params = after.lookup("GET", "/echo/9").unwrap().params;
        assert_eq!(params, vec![("id".to_string(), "9".to_string())]);
    }

    #[test]
    fn internal_paths_route_to_diagnostics() {
        let table = RouteTable::new();
        let snapshot = table
            .synchronize(&[
                def(1, "GET", "/_internal/time", ""),
                def(2, "GET", "/_internal/bogus", ""),
            ])
            .unwrap();
        let matched = snapshot.lookup("GET", "/_internal/time").unwrap();
        assert!(matches!(
            matched.entry.target,
            RouteTarget::Diagnostic(Diagnostic::Time)
        ));
        assert!(snapshot.lookup("GET", "/_internal/bogus").is_none());
    }
}
