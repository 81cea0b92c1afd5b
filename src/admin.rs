//! Admin API for endpoint definitions, mounted under `/livemock/api`.
//!
//! | Method | Path | |
//! |--------|------|---|
//! | `GET` | `/endpoints` | list live definitions |
//! | `GET` | `/endpoints/{id}` | one definition |
//! | `POST` | `/endpoints` | create or update |
//! | `DELETE` | `/endpoints/{id}` | soft delete |
//! | `GET` | `/endpoints/{id}/download` | stored file bytes |
//! | `GET` | `/routes` | the installed route snapshot |
//!
//! Optionally guarded by HTTP Basic auth (`--basic-auth user:pass`).

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, WWW_AUTHENTICATE};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::endpoint::auth::basic_credentials;
use crate::endpoint::EndpointDefinition;
use crate::error::LivemockError;
use crate::server::AppState;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/endpoints", get(list_endpoints).post(save_endpoint))
        .route("/endpoints/{id}", get(get_endpoint).delete(delete_endpoint))
        .route("/endpoints/{id}/download", get(download_endpoint))
        .route("/routes", get(list_routes))
        .layer(middleware::from_fn_with_state(state, require_basic_auth))
}

async fn require_basic_auth(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if let Some((user, pass)) = &state.options.admin_auth {
        let authorized = basic_credentials(req.headers())
            .is_some_and(|(u, p)| u == *user && p == *pass);
        if !authorized {
            tracing::warn!(path = %req.uri().path(), "admin request rejected");
            return (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, "Basic realm=\"livemock\"")],
            )
                .into_response();
        }
    }
    next.run(req).await
}

async fn list_endpoints(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<EndpointDefinition>>, LivemockError> {
    Ok(Json(state.service.list().await?))
}

async fn get_endpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<EndpointDefinition>, LivemockError> {
    Ok(Json(state.service.get(id).await?))
}

async fn save_endpoint(
    State(state): State<Arc<AppState>>,
    Json(def): Json<EndpointDefinition>,
) -> Result<Json<EndpointDefinition>, LivemockError> {
    Ok(Json(state.service.save(def).await?))
}

async fn delete_endpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, LivemockError> {
    state.service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn download_endpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Response, LivemockError> {
    let def = state.service.get(id).await?;
    let filename = if def.filename.is_empty() {
        format!("endpoint-{id}")
    } else {
        def.filename.replace('"', "")
    };
    let content_type = if def.mime_type.is_empty() {
        "application/octet-stream".to_string()
    } else {
        def.mime_type.clone()
    };
    let body = if def.file_content.is_empty() {
        def.body.into_bytes()
    } else {
        def.file_content
    };
    Ok((
        [
            (CONTENT_TYPE, content_type),
            (CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    pub method: String,
    pub pattern: String,
    pub handler: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutesResponse {
    pub version: String,
    pub built_at: DateTime<Utc>,
    pub routes: Vec<RouteInfo>,
}

async fn list_routes(State(state): State<Arc<AppState>>) -> Json<RoutesResponse> {
    let snapshot = state.routes.snapshot();
    Json(RoutesResponse {
        version: snapshot.version().to_string(),
        built_at: snapshot.built_at(),
        routes: snapshot
            .entries()
            .iter()
            .map(|entry| RouteInfo {
                method: entry.method.clone(),
                pattern: entry.pattern.clone(),
                handler: entry.handler_name().to_string(),
            })
            .collect(),
    })
}
