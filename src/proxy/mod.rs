//! Reverse proxying for `_proxy` endpoints.
//!
//! [`ProxyHandler`] picks a backend from its [`pool::BackendPool`],
//! optionally duplicates the request through the shared [`tee::TeePool`],
//! and forwards it with [`forward`]. Submodules handle backend selection
//! and liveness ([`pool`]), header construction ([`headers`]), and
//! request duplication ([`tee`]).

pub mod headers;
pub mod pool;
pub mod tee;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::header::LOCATION;
use axum::http::{HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use url::Url;

use crate::endpoint::{EndpointResponse, RequestContext};
use crate::error::LivemockError;
use crate::server::HttpClient;

use self::headers::{build_forwarded_headers, strip_response_hop_by_hop};
use self::pool::{Backend, BackendPool};
use self::tee::{TeePool, TeeTargets};

pub const PROXIED_HEADER: &str = "proxied";

/// A compiled `_proxy` endpoint.
#[derive(Debug, Clone)]
pub struct ProxyHandler {
    pub pool: Arc<BackendPool>,
    pub tee: TeeTargets,
}

impl ProxyHandler {
    pub async fn handle(
        &self,
        client: &HttpClient,
        tee: &TeePool,
        req: &RequestContext,
        timeout: Duration,
    ) -> Result<EndpointResponse, LivemockError> {
        let backend = self
            .pool
            .next_peer()
            .ok_or_else(|| LivemockError::BackendUnavailable {
                endpoint: self.pool.name().to_string(),
                hint: "the backend pool is empty".into(),
            })?;

        if !self.tee.is_empty() {
            tee.submit(&self.tee, req).await;
        }

        forward(client, backend, req, timeout).await
    }
}

/// Sends `req` to `backend` and buffers the response.
///
/// The backend URL's path replaces the request path, with a `*name` tail
/// parameter appended; the query string is kept. Relative `Location`
/// headers on 301/302 are rewritten under the path the client used.
#[allow(clippy::cast_possible_truncation)]
pub async fn forward(
    client: &HttpClient,
    backend: &Backend,
    req: &RequestContext,
    timeout: Duration,
) -> Result<EndpointResponse, LivemockError> {
    let mut target = backend.url().clone();
    let target_path = join_path(target.path(), tail_param(req).unwrap_or(""));
    target.set_path(&target_path);
    target.set_query(req.uri.query());

    let forwarded = build_forwarded_headers(
        &req.headers,
        &req.client_ip(),
        &target,
        &req.correlation_id,
    );

    let mut builder = hyper::Request::builder()
        .method(req.method.clone())
        .uri(target.as_str());
    for (key, value) in &forwarded {
        builder = builder.header(key, value);
    }
    let request = builder
        .body(Full::new(req.body.clone()))
        .map_err(|e| LivemockError::HttpRequest { source: Box::new(e) })?;

    let start = Instant::now();
    let response = match tokio::time::timeout(timeout, client.request(request)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            tracing::warn!(
                correlation_id = %req.correlation_id,
                backend = %backend.host(),
                error = %e,
                "proxy request failed"
            );
            return Err(LivemockError::HttpRequest { source: Box::new(e) });
        }
        Err(elapsed) => {
            tracing::warn!(
                correlation_id = %req.correlation_id,
                backend = %backend.host(),
                timeout_ms = timeout.as_millis() as u64,
                "proxy request timed out"
            );
            return Err(LivemockError::HttpRequest { source: Box::new(elapsed) });
        }
    };

    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| LivemockError::HttpRequest { source: Box::new(e) })?
        .to_bytes();

    tracing::info!(
        correlation_id = %req.correlation_id,
        backend = %backend.host(),
        status = parts.status.as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "proxied"
    );

    let mut headers = parts.headers;
    strip_response_hop_by_hop(&mut headers);
    if matches!(parts.status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND) {
        rewrite_location(&mut headers, req.path(), &target);
    }
    headers.insert(PROXIED_HEADER, HeaderValue::from_static("livemock"));

    Ok(EndpointResponse {
        status: parts.status,
        headers,
        body,
    })
}

/// The value of the route's trailing `*name` parameter.
fn tail_param(req: &RequestContext) -> Option<&str> {
    let last = req.pattern.rsplit('/').next()?;
    let name = last.strip_prefix('*')?;
    req.param(name)
}

fn join_path(base: &str, tail: &str) -> String {
    let tail = tail.trim_start_matches('/');
    if tail.is_empty() {
        return base.to_string();
    }
    format!("{}/{tail}", base.trim_end_matches('/'))
}

/// Rewrites a backend-relative `Location` so it stays under the path the
/// client called. Absolute `http(s)://` locations pass through.
fn rewrite_location(headers: &mut axum::http::HeaderMap, original_path: &str, target: &Url) {
    let Some(location) = headers.get(LOCATION).and_then(|v| v.to_str().ok()) else {
        return;
    };
    let lower = location.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return;
    }
    let Ok(resolved) = target.join(location) else {
        return;
    };
    // `//host/path` points somewhere else entirely.
    if resolved.host_str() != target.host_str()
        || resolved.port_or_known_default() != target.port_or_known_default()
    {
        return;
    }

    let mut rewritten = format!("{}{}", mount_prefix(original_path, target.path()), resolved.path());
    if let Some(query) = resolved.query() {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    if let Some(fragment) = resolved.fragment() {
        rewritten.push('#');
        rewritten.push_str(fragment);
    }
    if let Ok(value) = HeaderValue::from_str(&rewritten) {
        headers.insert(LOCATION, value);
    }
}

/// `original_path` without the trailing segments it shares with
/// `target_path`.
fn mount_prefix<'a>(original_path: &'a str, target_path: &str) -> &'a str {
    let mut prefix = original_path.trim_end_matches('/');
    let mut target = target_path.trim_end_matches('/');
    while let (Some((head, last)), Some((target_head, target_last))) =
        (prefix.rsplit_once('/'), target.rsplit_once('/'))
    {
        if last.is_empty() || last != target_last {
            break;
        }
        prefix = head;
        target = target_head;
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::request::test_support::request;
    use axum::http::HeaderMap;

    #[test]
    fn tail_parameter_is_appended() {
        let req = request("GET", "/p/a/b", "")
            .with_route("/p/*rest", vec![("rest".into(), "a/b".into())]);
        assert_eq!(tail_param(&req), Some("a/b"));
        assert_eq!(join_path("/api/", "a/b"), "/api/a/b");
        assert_eq!(join_path("/api", ""), "/api");

        let plain = request("GET", "/p/1", "").with_route("/p/:id", vec![("id".into(), "1".into())]);
        assert_eq!(tail_param(&plain), None);
    }

    fn relocated(location: &str, original_path: &str, target: &str) -> String {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, location.parse().unwrap());
        rewrite_location(&mut headers, original_path, &Url::parse(target).unwrap());
        headers[LOCATION].to_str().unwrap().to_string()
    }

    #[test]
    fn relative_redirects_keep_the_mount_prefix() {
        assert_eq!(relocated("/login", "/mock/app/home", "http://b/app/home"), "/mock/login");
        assert_eq!(relocated("/login", "/proxy/demo", "http://b/api/demo"), "/proxy/login");
        assert_eq!(relocated("/login?next=1", "/p/users", "http://b/upstream/users"), "/p/login?next=1");
    }

    #[test]
    fn bare_relative_redirects_resolve_against_the_backend_path() {
        assert_eq!(relocated("login", "/mock/app/home", "http://b/app/home"), "/mock/app/login");
        assert_eq!(relocated("../x", "/proxy/demo", "http://b/api/demo"), "/proxy/x");
    }

    #[test]
    fn absolute_redirects_pass_through() {
        assert_eq!(
            relocated("http://other/login", "/mock/app/home", "http://b/app/home"),
            "http://other/login"
        );
        assert_eq!(
            relocated("HTTPS://other/login", "/proxy/demo", "http://b/api/demo"),
            "HTTPS://other/login"
        );
        assert_eq!(relocated("//other/login", "/proxy/demo", "http://b/api/demo"), "//other/login");
    }

    #[test]
    fn shared_trailing_segments_are_dropped_from_the_prefix() {
        assert_eq!(mount_prefix("/proxy/demo", "/api/demo"), "/proxy");
        assert_eq!(mount_prefix("/mock/app/home/", "/app/home"), "/mock");
        assert_eq!(mount_prefix("/same", "/same"), "");
        assert_eq!(mount_prefix("/p", "/upstream"), "/p");
    }
}
