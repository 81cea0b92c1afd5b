//! Field-level validation of endpoint definitions.
//!
//! [`validate`] checks what can be decided from one definition alone:
//! path and method shape, body JSON syntax, dynamic rule conditions and
//! proxy addresses. Route collisions between definitions are detected by
//! the route table's trial synchronization.

use serde_json::Value;
use url::Url;

use super::definition::EndpointDefinition;
use crate::error::ValidationError;
use crate::expr::Expression;

pub const VALID_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "CONNECT", "TRACE", "ANY",
];

pub fn validate_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("path cannot be empty".into());
    }
    if !path.starts_with('/') {
        return Err(format!("path must start with '/' (did you mean '/{path}'?)"));
    }
    Ok(())
}

pub fn validate_method(method: &str) -> Result<(), String> {
    let upper = method.trim().to_uppercase();
    if upper.is_empty() || VALID_METHODS.contains(&upper.as_str()) {
        Ok(())
    } else {
        Err(format!("'{method}' is not a valid HTTP method"))
    }
}

/// Validate a proxy or tee address. A missing scheme is allowed for tee targets.
pub fn validate_address(address: &str, require_scheme: bool) -> Result<(), String> {
    let candidate = if require_scheme || address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    };
    match Url::parse(&candidate) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some() => {
            Ok(())
        }
        Ok(parsed) => Err(format!(
            "unsupported address '{address}' (scheme '{}')",
            parsed.scheme()
        )),
        Err(_) => Err(format!("'{address}' is not a valid address")),
    }
}

pub fn validate(def: &EndpointDefinition) -> Vec<ValidationError> {
    let endpoint = if def.path.is_empty() {
        format!("#{}", def.id)
    } else {
        def.label()
    };
    let mut errors = Vec::new();
    let mut push = |field: &str, message: String, suggestion: Option<&str>| {
        errors.push(ValidationError {
            endpoint: endpoint.clone(),
            field: field.into(),
            message,
            suggestion: suggestion.map(String::from),
        });
    };

    if let Err(msg) = validate_path(&def.path) {
        push("path", msg, None);
    }
    if let Err(msg) = validate_method(&def.method) {
        push(
            "method",
            msg,
            Some("valid methods: GET, POST, PUT, DELETE, PATCH, HEAD, OPTIONS, ANY"),
        );
    }
    if def.is_file() {
        return errors;
    }

    let trimmed = def.body.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return errors;
    }
    let body = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return errors,
        Err(e) => {
            push(
                "body",
                format!("invalid JSON: {e}"),
                Some("bodies that start with '{' must be valid JSON"),
            );
            return errors;
        }
    };

    match body.get("_dynamic") {
        None => {}
        Some(Value::Array(rules)) => {
            for (i, rule) in rules.iter().enumerate() {
                let condition = rule.get("condition").and_then(Value::as_str).unwrap_or("");
                if condition.trim().is_empty() {
                    push(
                        &format!("body._dynamic[{i}].condition"),
                        "condition cannot be empty".into(),
                        None,
                    );
                } else if let Err(e) = Expression::compile(condition) {
                    push(&format!("body._dynamic[{i}].condition"), e.to_string(), None);
                }
            }
        }
        Some(_) => push("body._dynamic", "must be an array of rules".into(), None),
    }

    for (key, require_scheme) in [("_proxy", true), ("_tee", false)] {
        let Some(value) = body.get(key) else { continue };
        let addresses = addresses(value);
        if addresses.is_empty() {
            push(&format!("body.{key}"), "no address configured".into(), None);
        }
        for address in addresses {
            if let Err(msg) = validate_address(&address, require_scheme) {
                push(&format!("body.{key}"), msg, Some("e.g. http://127.0.0.1:8080"));
            }
        }
    }

    errors
}

/// Addresses from a comma-separated string or a list of strings.
#[must_use]
pub fn addresses(value: &Value) -> Vec<String> {
    let raw: Vec<&str> = match value {
        Value::String(s) => s.split(',').collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .flat_map(|s| s.split(','))
            .collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
