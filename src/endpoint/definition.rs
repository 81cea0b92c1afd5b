use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Path prefix of definitions routed to the built-in diagnostic handlers.
pub const INTERNAL_PREFIX: &str = "/_internal/";

/// A persisted mock endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDefinition {
    /// `0` until the store assigns one.
    #[serde(default)]
    pub id: u64,
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub file_content: Vec<u8>,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

fn default_method() -> String {
    "ANY".into()
}

impl EndpointDefinition {
    #[must_use]
    pub fn new(method: &str, path: &str, body: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            body: body.to_string(),
            ..Self::default()
        }
    }

    /// Upper-cased method, `ANY` when empty.
    #[must_use]
    pub fn method(&self) -> String {
        let method = self.method.trim();
        if method.is_empty() {
            "ANY".into()
        } else {
            method.to_uppercase()
        }
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.path.starts_with(INTERNAL_PREFIX)
    }

    /// Served from stored bytes rather than the body.
    #[must_use]
    pub fn is_file(&self) -> bool {
        !self.mime_type.trim().is_empty()
    }

    /// The body as a JSON object, if it is one.
    #[must_use]
    pub fn body_object(&self) -> Option<Map<String, Value>> {
        match serde_json::from_str(&self.body) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    /// `METHOD path`, used in logs and error messages.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method(), self.path)
    }
}

/// Stores `fileContent` as a base64 string in JSON.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_camel_case_with_defaults() {
        let def: EndpointDefinition = serde_json::from_value(json!({
            "path": "/files/a",
            "mimeType": "text/plain",
            "fileContent": "aGVsbG8=",
        }))
        .unwrap();
        assert_eq!(def.id, 0);
        assert_eq!(def.method(), "ANY");
        assert_eq!(def.file_content, b"hello");
        assert!(def.is_file());
    }

    #[test]
    fn serializes_without_empty_optionals() {
        let def = EndpointDefinition::new("get", "/a", "{}");
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value, json!({"id": 0, "path": "/a", "method": "get", "body": "{}"}));
        assert_eq!(def.label(), "GET /a");
    }

    #[test]
    fn internal_and_body_object() {
        let def = EndpointDefinition::new("GET", "/_internal/time", r#"{"a":1}"#);
        assert!(def.is_internal());
        assert_eq!(def.body_object().unwrap()["a"], 1);
        assert!(EndpointDefinition::new("GET", "/a", "text").body_object().is_none());
    }
}
