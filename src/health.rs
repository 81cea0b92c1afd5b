//! `GET /livemock/health` endpoint handler.
//!
//! Returns a [`HealthResponse`] JSON payload containing the server
//! version, uptime, store backend, the installed route snapshot, and
//! cumulative request statistics.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::server::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub store: String,
    pub routes: RoutesHealth,
    pub stats: StatsResponse,
}

#[derive(Serialize, Deserialize)]
pub struct RoutesHealth {
    pub version: String,
    pub count: usize,
    pub built_ago_seconds: u64,
}

#[derive(Serialize, Deserialize)]
pub struct StatsResponse {
    pub served: u64,
    pub unserved: u64,
    pub diagnostics: u64,
    pub proxy_failures: u64,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.routes.snapshot();
    let built_ago = (Utc::now() - snapshot.built_at()).num_seconds().max(0);

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        store: state.service.store_name().await.to_string(),
        routes: RoutesHealth {
            version: snapshot.short_version().to_string(),
            count: snapshot.len(),
            built_ago_seconds: u64::try_from(built_ago).unwrap_or_default(),
        },
        stats: StatsResponse {
            served: state.stats.served.load(Ordering::Relaxed),
            unserved: state.stats.unserved.load(Ordering::Relaxed),
            diagnostics: state.stats.diagnostics.load(Ordering::Relaxed),
            proxy_failures: state.stats.proxy_failures.load(Ordering::Relaxed),
        },
    })
}
