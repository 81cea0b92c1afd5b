//! Round-robin backend pools with TCP liveness checks.
//!
//! A pool is built once from an endpoint's `_proxy` address list and
//! never resized. [`BackendPool::next_peer`] rotates through live
//! backends; when none is alive it still returns the next backend in
//! sequence so the request is attempted rather than refused.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use url::Url;

use crate::error::LivemockError;

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(20);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub struct Backend {
    url: Url,
    /// `host:port` with the scheme's default port filled in.
    host: String,
    alive: RwLock<bool>,
}

impl Backend {
    /// Parses `scheme://host[:port][/path]`.
    pub fn parse(address: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(address.trim())?;
        let host_name = url.host_str().ok_or(url::ParseError::EmptyHost)?;
        let port = url
            .port_or_known_default()
            .unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
        let host = if host_name.contains(':') {
            format!("[{host_name}]:{port}")
        } else {
            format!("{host_name}:{port}")
        };
        Ok(Self {
            url,
            host,
            alive: RwLock::new(true),
        })
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        *self.alive.read()
    }

    pub fn set_alive(&self, alive: bool) {
        *self.alive.write() = alive;
    }
}

#[derive(Debug)]
pub struct BackendPool {
    name: String,
    backends: Vec<Backend>,
    current: AtomicUsize,
}

impl BackendPool {
    /// Builds a pool from comma-separated addresses. Unparsable entries are
    /// logged and skipped.
    #[must_use]
    pub fn new(name: &str, addresses: &[String]) -> Self {
        let backends = addresses
            .iter()
            .flat_map(|a| a.split(','))
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .filter_map(|address| match Backend::parse(address) {
                Ok(backend) => {
                    tracing::debug!(pool = %name, backend = %backend.host, "configured backend");
                    Some(backend)
                }
                Err(e) => {
                    tracing::warn!(pool = %name, address = %address, error = %e, "invalid backend address, skipping");
                    None
                }
            })
            .collect();
        Self {
            name: name.to_string(),
            backends,
            current: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn check_backends(&self) -> Result<(), LivemockError> {
        if self.backends.is_empty() {
            return Err(LivemockError::BackendUnavailable {
                endpoint: self.name.clone(),
                hint: "provide one or more http(s) backend addresses in _proxy".into(),
            });
        }
        Ok(())
    }

    /// The next live backend in rotation, or the next backend in sequence
    /// when every backend is down. `None` only for an empty pool.
    #[must_use]
    pub fn next_peer(&self) -> Option<&Backend> {
        let total = self.backends.len();
        match total {
            0 => return None,
            1 => return self.backends.first(),
            _ => {}
        }

        let next = self.current.fetch_add(1, Ordering::Relaxed).wrapping_add(1) % total;
        for i in next..next + total {
            let idx = i % total;
            if self.backends[idx].is_alive() {
                if i != next {
                    self.current.store(idx, Ordering::Relaxed);
                }
                return Some(&self.backends[idx]);
            }
        }
        self.backends.get(next)
    }

    /// Probes every backend once and records state changes.
    pub async fn health_check(&self) {
        for backend in &self.backends {
            let alive = is_address_alive(&backend.host).await;
            if alive != backend.is_alive() {
                backend.set_alive(alive);
                tracing::warn!(pool = %self.name, backend = %backend.host, alive, "backend state changed");
            }
        }
    }

    /// Runs [`health_check`](Self::health_check) now and then every
    /// `interval` for as long as the pool is alive. Needs a Tokio runtime;
    /// without one no checks run and every backend stays alive.
    pub fn spawn_health_check(self: &Arc<Self>, interval: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(pool) = weak.upgrade() else {
                    break;
                };
                pool.health_check().await;
            }
        });
    }
}

/// Pools keyed by their address list, reused across route table rebuilds
/// so a resync does not restart health checks for unchanged endpoints.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: HashMap<String, Arc<BackendPool>>,
}

impl PoolRegistry {
    /// Returns the pool for `addresses`, creating it (and its health check)
    /// on first use.
    pub fn get_or_create(&mut self, name: &str, addresses: &[String]) -> Arc<BackendPool> {
        let key = addresses.join(",");
        Arc::clone(self.pools.entry(key).or_insert_with(|| {
            let pool = Arc::new(BackendPool::new(name, addresses));
            if !pool.backends().is_empty() {
                pool.spawn_health_check(HEALTH_CHECK_INTERVAL);
            }
            pool
        }))
    }

    /// Keeps only the pools in `used`. Dropped pools stop their health checks.
    pub fn retain_used(&mut self, used: &[Arc<BackendPool>]) {
        self.pools
            .retain(|_, pool| used.iter().any(|u| Arc::ptr_eq(u, pool)));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

async fn is_address_alive(host: &str) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, tokio::net::TcpStream::connect(host)).await,
        Ok(Ok(_))
    )
}
