//! Per-endpoint authorization from an `_auth` object.
//!
//! ```json
//! "_auth": {
//!   "basicAuth": "user:pass",
//!   "bearerToken": "token",
//!   "apiKey": {"key": "x-api-key", "value": "123", "header": true, "queryParams": false}
//! }
//! ```
//!
//! Only the first configured scheme is checked, in the order above.

use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;

use super::request::{EndpointResponse, RequestContext};

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiKey {
    pub key: String,
    pub value: String,
    pub header: bool,
    pub query_params: bool,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthPolicy {
    pub basic_auth: String,
    pub bearer_token: String,
    pub api_key: Option<ApiKey>,
}

impl AuthPolicy {
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// `None` when the request may proceed, otherwise the 401 to send.
    #[must_use]
    pub fn check(&self, req: &RequestContext) -> Option<EndpointResponse> {
        if !self.basic_auth.is_empty() {
            let expected = format!("Basic {}", STANDARD.encode(&self.basic_auth));
            if req.header(AUTHORIZATION.as_str()) == Some(expected.as_str()) {
                return None;
            }
            return Some(EndpointResponse::new(StatusCode::UNAUTHORIZED).with_header(
                WWW_AUTHENTICATE.as_str(),
                "Basic realm=\"Authorization Required\"",
            ));
        }

        let authorized = if !self.bearer_token.is_empty() {
            req.header(AUTHORIZATION.as_str()) == Some(format!("Bearer {}", self.bearer_token).as_str())
        } else if let Some(api_key) = &self.api_key {
            api_key.allows(req)
        } else {
            true
        };

        (!authorized).then(|| EndpointResponse::new(StatusCode::UNAUTHORIZED))
    }
}

impl ApiKey {
    fn allows(&self, req: &RequestContext) -> bool {
        if self.key.is_empty() {
            return true;
        }
        let provided = if self.header {
            req.header(&self.key).map(String::from)
        } else if self.query_params {
            req.query_value(&self.key)
        } else {
            req.header(&self.key)
                .filter(|v| !v.is_empty())
                .map(String::from)
                .or_else(|| req.query_value(&self.key))
        };
        provided.unwrap_or_default() == self.value
    }
}

/// Decodes `Authorization: Basic` credentials.
#[must_use]
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}
