//! Mockbin-style bodies: a declarative description of the response.

use std::collections::BTreeMap;

use axum::http::header::{CONNECTION, LOCATION, SET_COOKIE};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::helpers::ThinkTime;
use super::request::{EndpointResponse, RequestContext};
use crate::json::{detect_content_type, to_text};
use crate::template::TemplateEngine;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MockbinCookie {
    pub name: String,
    pub value: String,
    pub max_age: i64,
    pub path: String,
    pub domain: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: String,
}

impl MockbinCookie {
    /// The `Set-Cookie` header value. `path` defaults to `/`.
    #[must_use]
    pub fn header_value(&self) -> String {
        let mut cookie = format!("{}={}", self.name, self.value);
        let path = if self.path.is_empty() { "/" } else { &self.path };
        cookie.push_str(&format!("; Path={path}"));
        if !self.domain.is_empty() {
            cookie.push_str(&format!("; Domain={}", self.domain));
        }
        if self.max_age > 0 {
            cookie.push_str(&format!("; Max-Age={}", self.max_age));
        } else if self.max_age < 0 {
            cookie.push_str("; Max-Age=0");
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        if let Some(mode) = same_site(&self.same_site) {
            cookie.push_str(&format!("; SameSite={mode}"));
        }
        cookie
    }
}

/// Unrecognized values leave the attribute off (the browser default).
fn same_site(value: &str) -> Option<&'static str> {
    match value.to_ascii_lowercase().as_str() {
        "lax" => Some("Lax"),
        "strict" => Some("Strict"),
        "none" => Some("None"),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Mockbin {
    pub status: u16,
    pub method: String,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    pub headers: BTreeMap<String, Value>,
    pub cookies: Vec<MockbinCookie>,
    pub close: bool,
    pub content_type: String,
    pub payload: Value,
    pub sleep: String,
}

impl Mockbin {
    /// Parses a body as mockbin when at least one mockbin field is set.
    #[must_use]
    pub fn detect(body: &Map<String, Value>) -> Option<Self> {
        let mockbin: Self = serde_json::from_value(Value::Object(body.clone())).ok()?;
        let signals = [
            mockbin.status >= 100,
            !mockbin.method.is_empty(),
            !mockbin.redirect_url.is_empty(),
            !mockbin.content_type.is_empty(),
            !mockbin.payload.is_null(),
            !mockbin.headers.is_empty(),
            !mockbin.cookies.is_empty(),
        ];
        signals.contains(&true).then_some(mockbin)
    }

    fn allows(&self, method: &str) -> bool {
        let allowed = self.method.to_uppercase();
        allowed.is_empty() || allowed.contains("ANY") || allowed.contains(method)
    }

    fn redirect_status(&self) -> StatusCode {
        match self.status {
            301 | 302 | 303 | 307 | 308 => {
                StatusCode::from_u16(self.status).unwrap_or(StatusCode::FOUND)
            }
            _ => StatusCode::FOUND,
        }
    }

    pub async fn respond(&self, req: &RequestContext, engine: &TemplateEngine) -> EndpointResponse {
        if !self.allows(req.method.as_str()) {
            return EndpointResponse::new(StatusCode::METHOD_NOT_ALLOWED);
        }

        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = EndpointResponse::new(status);
        for (name, value) in &self.headers {
            response.set_header(name, &to_text(value));
        }
        for cookie in &self.cookies {
            response.append_header(SET_COOKIE, &cookie.header_value());
        }
        if self.close {
            response.append_header(CONNECTION, "close");
        }

        if !self.redirect_url.is_empty() {
            response.status = self.redirect_status();
            response.append_header(LOCATION, &self.redirect_url);
            return response;
        }

        if let Some(think) = ThinkTime::parse(&self.sleep) {
            think.sleep().await;
        }

        let payload = match &self.payload {
            Value::Null => Vec::new(),
            Value::String(text) => engine.render_text(text).await,
            template => serde_json::to_vec(&engine.render(template).await).unwrap_or_default(),
        };
        let content_type = if self.content_type.is_empty() {
            detect_content_type(&payload).to_string()
        } else {
            self.content_type.clone()
        };
        response.with_body(payload, &content_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::request::test_support::request;
    use serde_json::json;

    fn mockbin(value: Value) -> Mockbin {
        Mockbin::detect(value.as_object().unwrap()).unwrap()
    }

    #[test]
    fn detection_needs_a_mockbin_field() {
        assert!(Mockbin::detect(json!({"name": "x"}).as_object().unwrap()).is_none());
        assert!(Mockbin::detect(json!({"status": 42}).as_object().unwrap()).is_none());
        assert!(Mockbin::detect(json!({"status": "ok"}).as_object().unwrap()).is_none());
        assert!(Mockbin::detect(json!({"payload": {"a": 1}}).as_object().unwrap()).is_some());
    }

    #[tokio::test]
    async fn redirect_skips_body() {
        let m = mockbin(json!({"status": 302, "redirectURL": "http://example.com", "payload": "@now"}));
        let resp = m.respond(&request("GET", "/", ""), &TemplateEngine::new()).await;
        assert_eq!(resp.status, StatusCode::FOUND);
        assert_eq!(resp.headers[LOCATION], "http://example.com");
        assert!(resp.body.is_empty());

        let m = mockbin(json!({"status": 200, "redirectURL": "/x"}));
        let resp = m.respond(&request("GET", "/", ""), &TemplateEngine::new()).await;
        assert_eq!(resp.status, StatusCode::FOUND);
    }

    #[tokio::test]
    async fn method_restriction() {
        let m = mockbin(json!({"method": "POST,PUT", "payload": "ok"}));
        let engine = TemplateEngine::new();
        let resp = m.respond(&request("GET", "/", ""), &engine).await;
        assert_eq!(resp.status, StatusCode::METHOD_NOT_ALLOWED);
        let resp = m.respond(&request("PUT", "/", ""), &engine).await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(&resp.body[..], b"ok");
    }

    #[tokio::test]
    async fn headers_cookies_and_content_type() {
        let m = mockbin(json!({
            "status": 201,
            "headers": {"X-Mock": "yes"},
            "cookies": [{"name": "sid", "value": "1", "httpOnly": true, "sameSite": "strict"}],
            "close": true,
            "payload": {"ok": true}
        }));
        let resp = m.respond(&request("GET", "/", ""), &TemplateEngine::new()).await;
        assert_eq!(resp.status, StatusCode::CREATED);
        assert_eq!(resp.headers["x-mock"], "yes");
        assert_eq!(resp.headers[SET_COOKIE], "sid=1; Path=/; HttpOnly; SameSite=Strict");
        assert_eq!(resp.headers[CONNECTION], "close");
        assert_eq!(resp.content_type(), Some("application/json; charset=utf-8"));
        assert_eq!(&resp.body[..], br#"{"ok":true}"#);
    }

    #[test]
    fn cookie_same_site_defaults_off() {
        let cookie = MockbinCookie {
            name: "a".into(),
            value: "b".into(),
            max_age: -1,
            domain: "example.com".into(),
            secure: true,
            same_site: "weird".into(),
            ..MockbinCookie::default()
        };
        assert_eq!(
            cookie.header_value(),
            "a=b; Path=/; Domain=example.com; Max-Age=0; Secure"
        );
    }
}
