//! The fallback handler serving user endpoints.
//!
//! Every request outside the admin prefix lands here. The path (minus
//! the context path) is looked up in the current snapshot; unmatched
//! paths fall through to the diagnostics and finally to 404.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, Version};
use axum::response::{IntoResponse, Response};

use super::diagnostics::{self, Diagnostic};
use super::RouteTarget;
use crate::broadcast::RequestSummary;
use crate::endpoint::{EndpointResponse, HandlerKind, RequestContext};
use crate::server::AppState;

/// `path` relative to `context_path`, or `None` when outside it.
#[must_use]
pub fn strip_context_path<'a>(context_path: &str, path: &'a str) -> Option<&'a str> {
    let prefix = context_path.trim_end_matches('/');
    if prefix.is_empty() {
        return Some(path);
    }
    match path.strip_prefix(prefix)? {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

pub async fn dispatch_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut req = RequestContext::new(method, uri, headers, body, addr);
    req.version = version;
    let correlation_id = req.correlation_id.clone();

    let raw_path = req.path().to_string();
    let local_path = strip_context_path(&state.options.context_path, &raw_path);

    // Clone the snapshot Arc and release the lock before running handlers
    let snapshot = state.routes.snapshot();
    let matched = local_path.and_then(|path| snapshot.lookup(req.method.as_str(), path));

    let mut response = if let Some(matched) = matched {
        let entry = matched.entry;
        let req = req.with_route(&entry.pattern, matched.params);
        let response = match &entry.target {
            RouteTarget::Endpoint(endpoint) => {
                let response = endpoint.handle(&req, &state.services).await;
                if matches!(endpoint.kind, HandlerKind::Proxy(_))
                    && response.status == StatusCode::BAD_GATEWAY
                {
                    state.stats.proxy_failures.fetch_add(1, Ordering::Relaxed);
                }
                response
            }
            RouteTarget::Diagnostic(d) => diagnostics::respond(*d, &req, &state.counters),
        };
        state.stats.served.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            correlation_id = %correlation_id,
            method = %req.method,
            path = %raw_path,
            pattern = %entry.pattern,
            handler = entry.handler_name(),
            status = response.status.as_u16(),
            "request served"
        );
        state
            .broadcaster
            .publish(RequestSummary::new(&req, &response));
        response
    } else if let Some(diagnostic) = Diagnostic::for_path(local_path.unwrap_or(&raw_path)) {
        state.stats.diagnostics.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            correlation_id = %correlation_id,
            path = %raw_path,
            diagnostic = diagnostic.name(),
            "diagnostic route"
        );
        diagnostics::respond(diagnostic, &req, &state.counters)
    } else {
        state.stats.unserved.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            correlation_id = %correlation_id,
            method = %req.method,
            path = %raw_path,
            "no route matched"
        );
        EndpointResponse::new(StatusCode::NOT_FOUND)
    };

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers.insert("x-correlation-id", value);
    }
    response.into_response()
}
