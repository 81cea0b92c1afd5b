//! Axum server setup, shared application state, and graceful shutdown.
//!
//! Contains [`AppState`] (the `Arc`-shared state holding the route table,
//! endpoint service, handler collaborators, stats, and uptime),
//! [`build_router`] for constructing the Axum router with middleware
//! layers, [`build_http_client`] for the connection-pooled hyper client,
//! and [`shutdown_signal`] for SIGTERM / Ctrl+C handling.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::broadcast::Broadcaster;
use crate::endpoint::Services;
use crate::health::health_handler;
use crate::proxy::tee::TeePool;
use crate::routing::diagnostics::Counters;
use crate::routing::{dispatch, RouteTable};
use crate::service::EndpointService;
use crate::store::EndpointStore;
use crate::template::TemplateEngine;

/// Prefix of the built-in admin and health routes.
pub const ADMIN_PREFIX: &str = "/livemock";

#[derive(Debug)]
pub struct Stats {
    pub served: AtomicU64,
    pub unserved: AtomicU64,
    pub diagnostics: AtomicU64,
    pub proxy_failures: AtomicU64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            served: AtomicU64::new(0),
            unserved: AtomicU64::new(0),
            diagnostics: AtomicU64::new(0),
            proxy_failures: AtomicU64::new(0),
        }
    }
}

/// Runtime options gathered from the command line.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    /// URL prefix of every user endpoint; empty or `/` for none.
    pub context_path: String,
    /// `user:pass` guarding the admin API.
    pub admin_auth: Option<(String, String)>,
    pub proxy_timeout: Duration,
    pub max_body: usize,
    pub tee_workers: usize,
    pub broadcast_per_minute: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5003,
            context_path: String::new(),
            admin_auth: None,
            proxy_timeout: Duration::from_millis(30_000),
            max_body: 10 * 1024 * 1024,
            tee_workers: 20,
            broadcast_per_minute: 60,
        }
    }
}

pub type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;
pub type HttpClient = Client<HttpsConnector, http_body_util::Full<bytes::Bytes>>;

pub struct AppState {
    pub service: EndpointService,
    pub routes: Arc<RouteTable>,
    pub services: Services,
    pub counters: Counters,
    pub broadcaster: Broadcaster,
    pub options: ServerOptions,
    pub start_time: Instant,
    pub stats: Stats,
}

impl AppState {
    #[must_use]
    pub fn new(store: Box<dyn EndpointStore>, options: ServerOptions) -> Self {
        let routes = Arc::new(RouteTable::new());
        let client = build_http_client();
        let services = Services {
            engine: TemplateEngine::new(),
            tee: TeePool::new(client.clone(), options.tee_workers, options.proxy_timeout),
            client,
            proxy_timeout: options.proxy_timeout,
        };
        Self {
            service: EndpointService::new(store, Arc::clone(&routes)),
            routes,
            services,
            counters: Counters::default(),
            broadcaster: Broadcaster::new(options.broadcast_per_minute),
            options,
            start_time: Instant::now(),
            stats: Stats::new(),
        }
    }
}

#[must_use]
pub fn build_http_client() -> HttpClient {
    // When multiple rustls crypto providers are compiled in, rustls cannot
    // auto-detect which one to use. Explicitly install `ring` as the default provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .build(https)
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let max_body = state.options.max_body;
    Router::new()
        .route(&format!("{ADMIN_PREFIX}/health"), get(health_handler))
        .nest(&format!("{ADMIN_PREFIX}/api"), admin::router(Arc::clone(&state)))
        .fallback(dispatch::dispatch_handler)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(max_body)),
        )
        .with_state(state)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
