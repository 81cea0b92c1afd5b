//! Request echo: a JSON snapshot or a raw HTTP dump of the inbound request.

use axum::http::StatusCode;
use chrono::Local;
use serde_json::{Map, Value};

use super::request::{EndpointResponse, RequestContext};

pub(crate) const ECHO_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMode {
    Json,
    Dump,
}

impl EchoMode {
    /// `json` (any case) selects JSON; every other mode dumps the request.
    #[must_use]
    pub fn parse(mode: &str) -> Self {
        if mode.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Dump
        }
    }

    #[must_use]
    pub fn respond(self, req: &RequestContext) -> EndpointResponse {
        match self {
            Self::Json => {
                let snapshot = Value::Object(snapshot(req));
                let pretty = serde_json::to_vec_pretty(&snapshot).unwrap_or_default();
                EndpointResponse::new(StatusCode::OK)
                    .with_body(pretty, crate::json::JSON_CONTENT_TYPE)
            }
            Self::Dump => EndpointResponse::text(StatusCode::OK, dump(req)),
        }
    }
}

/// The JSON echo document.
#[must_use]
pub fn snapshot(req: &RequestContext) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert(
        "timeGo".into(),
        Value::String(req.received_at.format(ECHO_TIME_FORMAT).to_string()),
    );
    m.insert("proto".into(), Value::String(format!("{:?}", req.version)));
    m.insert("host".into(), Value::String(req.host()));
    m.insert("requestUri".into(), Value::String(request_uri(req)));
    m.insert("remoteAddr".into(), Value::String(req.remote_addr.to_string()));
    m.insert("method".into(), Value::String(req.method.to_string()));
    m.insert("url".into(), Value::String(req.uri.to_string()));
    m.insert("headers".into(), Value::Object(req.headers_object()));

    if !req.pattern.is_empty() {
        m.insert("router".into(), Value::String(req.pattern.clone()));
    }
    if !req.params.is_empty() {
        m.insert("routerParams".into(), Value::Object(req.params_object()));
    }
    let query = grouped_query(req);
    if !query.is_empty() {
        m.insert("query".into(), Value::Object(query));
    }
    if req.header("connection").is_some_and(|c| c.eq_ignore_ascii_case("close")) {
        m.insert("connection".into(), Value::String("close".into()));
    }
    m.insert("server".into(), server_info());

    if !req.body.is_empty() && req.query_value("body").as_deref() != Some("no") {
        let payload = req.json().cloned().unwrap_or_else(|| {
            Value::String(String::from_utf8_lossy(&req.body).into_owned())
        });
        m.insert("payload".into(), payload);
    }

    m.insert(
        "timeTo".into(),
        Value::String(Local::now().format(ECHO_TIME_FORMAT).to_string()),
    );
    m
}

/// The request as it appeared on the wire, HTTP/1.1 style.
#[must_use]
pub fn dump(req: &RequestContext) -> String {
    let mut out = format!("{} {} {:?}\r\n", req.method, request_uri(req), req.version);
    if req.headers.get("host").is_none() {
        out.push_str(&format!("Host: {}\r\n", req.host()));
    }
    for (name, value) in &req.headers {
        out.push_str(&format!(
            "{}: {}\r\n",
            name,
            String::from_utf8_lossy(value.as_bytes())
        ));
    }
    out.push_str("\r\n");
    out.push_str(&String::from_utf8_lossy(&req.body));
    out
}

fn request_uri(req: &RequestContext) -> String {
    req.uri
        .path_and_query()
        .map_or_else(|| req.uri.path().to_string(), ToString::to_string)
}

/// Single values as strings, repeated keys as arrays.
fn grouped_query(req: &RequestContext) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in req.query() {
        match map.get_mut(&k) {
            None => {
                map.insert(k, Value::String(v));
            }
            Some(Value::Array(items)) => items.push(Value::String(v)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(v)]);
            }
        }
    }
    map
}

fn server_info() -> Value {
    let hostname = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .unwrap_or_default();
    serde_json::json!({ "hostname": hostname, "pid": std::process::id() })
}
