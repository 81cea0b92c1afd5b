//! Served-request summaries for live viewers.
//!
//! Summaries go to a `tokio::sync::broadcast` channel through a token
//! bucket. When no token is available, or nobody is subscribed, the
//! summary is dropped.

use std::num::NonZeroU32;

use chrono::{DateTime, Local};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::endpoint::{EndpointResponse, RequestContext};

const CHANNEL_CAPACITY: usize = 64;
/// Bodies larger than this are truncated in summaries.
const MAX_BODY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    pub time: DateTime<Local>,
    pub method: String,
    pub host: String,
    pub path: String,
    pub query: Map<String, Value>,
    pub headers: Map<String, Value>,
    pub request_body: String,
    pub status: u16,
    pub response_headers: Map<String, Value>,
    pub response_size: usize,
    pub response_body: String,
    pub router: String,
    pub remote_addr: String,
}

impl RequestSummary {
    #[must_use]
    pub fn new(req: &RequestContext, resp: &EndpointResponse) -> Self {
        let mut response_headers = Map::new();
        for (name, value) in &resp.headers {
            if let Ok(v) = value.to_str() {
                response_headers.insert(name.as_str().to_string(), Value::String(v.to_string()));
            }
        }
        Self {
            time: req.received_at,
            method: req.method.to_string(),
            host: req.host(),
            path: req.path().to_string(),
            query: req.query_object(),
            headers: req.headers_object(),
            request_body: truncate(&req.body),
            status: resp.status.as_u16(),
            response_headers,
            response_size: resp.body.len(),
            response_body: truncate(&resp.body),
            router: req.pattern.clone(),
            remote_addr: req.remote_addr.to_string(),
        }
    }
}

fn truncate(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_BODY {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    format!("{}...", String::from_utf8_lossy(&bytes[..MAX_BODY - 3]))
}

pub struct Broadcaster {
    sender: broadcast::Sender<RequestSummary>,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("subscribers", &self.sender.receiver_count())
            .field("throttled", &self.limiter.is_some())
            .finish()
    }
}

impl Broadcaster {
    /// `per_minute == 0` disables publishing.
    #[must_use]
    pub fn new(per_minute: u32) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let limiter = NonZeroU32::new(per_minute).map(|n| RateLimiter::direct(Quota::per_minute(n)));
        Self { sender, limiter }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RequestSummary> {
        self.sender.subscribe()
    }

    /// Publishes if a token is available. Returns whether it was sent.
    pub fn publish(&self, summary: RequestSummary) -> bool {
        let Some(limiter) = &self.limiter else {
            return false;
        };
        if self.sender.receiver_count() == 0 || limiter.check().is_err() {
            return false;
        }
        self.sender.send(summary).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::request::test_support::request;
    use axum::http::StatusCode;

    fn summary() -> RequestSummary {
        let req = request("POST", "/a?x=1", "hello");
        let resp = EndpointResponse::text(StatusCode::OK, "world");
        RequestSummary::new(&req, &resp)
    }

    #[test]
    fn summary_fields() {
        let s = summary();
        assert_eq!(s.method, "POST");
        assert_eq!(s.request_body, "hello");
        assert_eq!(s.response_size, 5);
        assert_eq!(s.query["x"], "1");
    }

    #[test]
    fn throttled_publishing_drops_excess() {
        let broadcaster = Broadcaster::new(2);
        assert!(!broadcaster.publish(summary()), "no subscribers");

        let mut rx = broadcaster.subscribe();
        let sent = (0..5).filter(|_| broadcaster.publish(summary())).count();
        assert_eq!(sent, 2);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn disabled_broadcaster_never_sends() {
        let broadcaster = Broadcaster::new(0);
        let _rx = broadcaster.subscribe();
        assert!(!broadcaster.publish(summary()));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let long = vec![b'a'; MAX_BODY * 2];
        assert_eq!(truncate(&long).len(), MAX_BODY);
    }
}
