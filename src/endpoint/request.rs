use std::net::SocketAddr;
use std::sync::OnceLock;

use axum::body::Body;
use axum::http::header::{HeaderName, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, Version};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, Local};
use serde_json::{Map, Value};

use crate::json::JSON_CONTENT_TYPE;

/// One inbound request as seen by compiled handlers.
#[derive(Debug)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub remote_addr: SocketAddr,
    pub correlation_id: String,
    pub received_at: DateTime<Local>,
    /// The matched route pattern, e.g. `/echo/:id`.
    pub pattern: String,
    /// Path parameters in pattern order.
    pub params: Vec<(String, String)>,
    json: OnceLock<Option<Value>>,
}

impl RequestContext {
    #[must_use]
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        remote_addr: SocketAddr,
    ) -> Self {
        let correlation_id = headers
            .get("x-correlation-id")
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers,
            body,
            remote_addr,
            correlation_id,
            received_at: Local::now(),
            pattern: String::new(),
            params: Vec::new(),
            json: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn with_route(mut self, pattern: &str, params: Vec<(String, String)>) -> Self {
        self.pattern = pattern.to_string();
        self.params = params;
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Decoded query pairs in request order.
    #[must_use]
    pub fn query(&self) -> Vec<(String, String)> {
        self.uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First value of a query parameter.
    #[must_use]
    pub fn query_value(&self, name: &str) -> Option<String> {
        self.query().into_iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The request body parsed as JSON, once per request.
    pub fn json(&self) -> Option<&Value> {
        self.json
            .get_or_init(|| serde_json::from_slice(&self.body).ok())
            .as_ref()
    }

    /// Client address, honoring `X-Real-IP` and `X-Forwarded-For`.
    #[must_use]
    pub fn client_ip(&self) -> String {
        self.header("x-real-ip")
            .or_else(|| {
                self.header("x-forwarded-for")
                    .and_then(|xff| xff.split(',').next())
            })
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map_or_else(|| self.remote_addr.ip().to_string(), String::from)
    }

    #[must_use]
    pub fn host(&self) -> String {
        self.header("host")
            .map(String::from)
            .or_else(|| self.uri.host().map(String::from))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn query_object(&self) -> Map<String, Value> {
        pairs_to_object(self.query())
    }

    #[must_use]
    pub fn params_object(&self) -> Map<String, Value> {
        pairs_to_object(self.params.clone())
    }

    #[must_use]
    pub fn headers_object(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for name in self.headers.keys() {
            let values: Vec<&str> = self
                .headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect();
            map.insert(name.as_str().to_string(), Value::String(values.join(", ")));
        }
        map
    }
}

fn pairs_to_object(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.entry(k).or_insert(Value::String(v));
    }
    map
}

/// A fully buffered handler response.
#[derive(Debug, Clone)]
pub struct EndpointResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl EndpointResponse {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn json(status: StatusCode, value: &Value) -> Self {
        Self::new(status).with_body(
            serde_json::to_vec(value).unwrap_or_default(),
            JSON_CONTENT_TYPE,
        )
    }

    #[must_use]
    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        Self::new(status).with_body(text.into(), crate::json::TEXT_CONTENT_TYPE)
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>, content_type: &str) -> Self {
        self.body = body.into();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            self.headers.insert(CONTENT_TYPE, value);
        }
        self
    }

    /// Sets a header, skipping names or values that are not valid HTTP.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        match (name.parse::<HeaderName>(), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "invalid response header, skipping"),
        }
    }

    pub fn append_header(&mut self, name: HeaderName, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.append(name, value);
        }
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

impl IntoResponse for EndpointResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A request from 127.0.0.1 with the given method, URI and body.
    pub fn request(method: &str, uri: &str, body: &str) -> RequestContext {
        RequestContext::new(
            method.parse().unwrap(),
            uri.parse().unwrap(),
            HeaderMap::new(),
            Bytes::from(body.to_string()),
            "127.0.0.1:40000".parse().unwrap(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::request;
    use super::*;

    #[test]
    fn query_and_params() {
        let req = request("GET", "/echo/42?x=1&y=a%20b&x=2", "")
            .with_route("/echo/:id", vec![("id".into(), "42".into())]);
        assert_eq!(req.query_value("x").as_deref(), Some("1"));
        assert_eq!(req.query_value("y").as_deref(), Some("a b"));
        assert_eq!(req.param("id"), Some("42"));
        assert_eq!(Value::Object(req.query_object())["x"], "1");
    }

    #[test]
    fn client_ip_prefers_forwarding_headers() {
        let mut req = request("GET", "/", "");
        assert_eq!(req.client_ip(), "127.0.0.1");
        req.headers
            .insert("x-forwarded-for", "10.1.1.1, 10.2.2.2".parse().unwrap());
        assert_eq!(req.client_ip(), "10.1.1.1");
    }

    #[test]
    fn json_body_is_parsed_lazily() {
        let req = request("POST", "/", r#"{"name":"bingoo"}"#);
        assert_eq!(req.json().and_then(|v| v.get("name")), Some(&Value::from("bingoo")));
        assert!(request("POST", "/", "nope").json().is_none());
    }

    #[test]
    fn response_headers() {
        let resp = EndpointResponse::text(StatusCode::OK, "hi").with_header("x-a", "1");
        assert_eq!(resp.content_type(), Some("text/plain; charset=utf-8"));
        assert_eq!(resp.headers["x-a"], "1");
        let resp = resp.with_header("bad header", "1");
        assert!(resp.headers.get("bad header").is_none());
    }
}
