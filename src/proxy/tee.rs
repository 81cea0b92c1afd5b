//! Fire-and-forget duplication of proxied requests (`_tee`).
//!
//! Duplicates run on detached tasks gated by a shared semaphore. When
//! every permit is taken, [`TeePool::submit`] waits for one before
//! returning, so a saturated pool slows the primary request down rather
//! than dropping duplicates. Duplicate responses are drained and
//! discarded; failures are logged only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, HeaderValue, Method};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tokio::sync::Semaphore;
use url::Url;

use super::headers::strip_request_hop_by_hop;
use crate::endpoint::RequestContext;
use crate::server::HttpClient;

/// Parsed `_tee` addresses. A missing scheme defaults to `http`.
#[derive(Debug, Clone, Default)]
pub struct TeeTargets {
    targets: Vec<Url>,
}

impl TeeTargets {
    #[must_use]
    pub fn parse(addresses: &[String]) -> Self {
        let targets = addresses
            .iter()
            .filter_map(|address| {
                let candidate = if address.contains("://") {
                    address.clone()
                } else {
                    format!("http://{address}")
                };
                match Url::parse(&candidate) {
                    Ok(url) => Some(url),
                    Err(e) => {
                        tracing::warn!(address = %address, error = %e, "invalid tee address, skipping");
                        None
                    }
                }
            })
            .collect();
        Self { targets }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[must_use]
    pub fn urls(&self) -> &[Url] {
        &self.targets
    }
}

/// The bounded worker pool shared by every tee endpoint.
#[derive(Clone)]
pub struct TeePool {
    client: HttpClient,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl TeePool {
    #[must_use]
    pub fn new(client: HttpClient, workers: usize, timeout: Duration) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
        }
    }

    /// Queues one duplicate of `req` per target.
    pub async fn submit(&self, targets: &TeeTargets, req: &RequestContext) {
        let headers = duplicate_headers(&req.headers, &req.remote_addr.ip().to_string());
        for target in targets.urls() {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                return;
            };
            let url = duplicate_url(target, req.uri.query());
            let task = send(
                self.client.clone(),
                req.method.clone(),
                url,
                headers.clone(),
                req.body.clone(),
                self.timeout,
            );
            let correlation_id = req.correlation_id.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let start = Instant::now();
                let result = task.await;
                #[allow(clippy::cast_possible_truncation)]
                let latency_ms = start.elapsed().as_millis() as u64;
                match result {
                    Ok((url, status)) => tracing::info!(
                        correlation_id = %correlation_id,
                        target = %url,
                        status,
                        latency_ms,
                        "tee target responded"
                    ),
                    Err((url, err)) => tracing::warn!(
                        correlation_id = %correlation_id,
                        target = %url,
                        error = %err,
                        latency_ms,
                        "tee target failed"
                    ),
                }
            });
        }
    }

    #[must_use]
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }
}

async fn send(
    client: HttpClient,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
    timeout: Duration,
) -> Result<(String, u16), (String, String)> {
    let mut builder = hyper::Request::builder().method(method).uri(url.as_str());
    for (key, value) in &headers {
        builder = builder.header(key, value);
    }
    let request = builder
        .body(Full::new(body))
        .map_err(|e| (url.clone(), e.to_string()))?;

    match tokio::time::timeout(timeout, client.request(request)).await {
        Ok(Ok(response)) => {
            let status = response.status().as_u16();
            if let Err(e) = response.into_body().collect().await {
                return Err((url, format!("body read error: {e}")));
            }
            Ok((url, status))
        }
        Ok(Err(e)) => Err((url, e.to_string())),
        Err(_) => Err((url, "request timed out".into())),
    }
}

/// The target's scheme, host and path with the request's query.
fn duplicate_url(target: &Url, query: Option<&str>) -> String {
    let mut url = target.clone();
    url.set_query(query);
    url.to_string()
}

fn duplicate_headers(original: &HeaderMap, remote_ip: &str) -> HeaderMap {
    let mut headers = original.clone();
    strip_request_hop_by_hop(&mut headers);
    headers.remove("host");

    for (name, extension) in [
        ("x-forwarded-for", remote_ip.to_string()),
        ("forwarded", format!("for={remote_ip}")),
    ] {
        let value = original
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| extension.clone(), |existing| format!("{existing}, {extension}"));
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_default_to_http() {
        let targets = TeeTargets::parse(&["127.0.0.1:9000/copy".into(), "https://b".into()]);
        let urls: Vec<&str> = targets.urls().iter().map(Url::as_str).collect();
        assert_eq!(urls, vec!["http://127.0.0.1:9000/copy", "https://b/"]);
    }

    #[test]
    fn duplicate_url_keeps_query() {
        let target = Url::parse("http://t:1/copy").unwrap();
        assert_eq!(duplicate_url(&target, Some("a=1")), "http://t:1/copy?a=1");
        assert_eq!(duplicate_url(&target, None), "http://t:1/copy");
    }

    #[test]
    fn forwarded_headers_are_extended() {
        let mut original = HeaderMap::new();
        original.insert("x-forwarded-for", "1.1.1.1".parse().unwrap());
        original.insert("connection", "keep-alive".parse().unwrap());
        let headers = duplicate_headers(&original, "10.0.0.9");
        assert_eq!(headers["x-forwarded-for"], "1.1.1.1, 10.0.0.9");
        assert_eq!(headers["forwarded"], "for=10.0.0.9");
        assert!(headers.get("connection").is_none());
    }
}
