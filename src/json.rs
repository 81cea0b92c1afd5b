//! Small JSON helpers shared by the handlers.

use serde_json::Value;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Looks up a dotted path (`user.tags.0`); numeric segments index arrays.
#[must_use]
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// `application/json` when the bytes parse as a JSON object or array.
#[must_use]
pub fn detect_content_type(body: &[u8]) -> &'static str {
    let trimmed = body.trim_ascii_start();
    if matches!(trimmed.first(), Some(b'{' | b'['))
        && serde_json::from_slice::<Value>(trimmed).is_ok()
    {
        JSON_CONTENT_TYPE
    } else {
        TEXT_CONTENT_TYPE
    }
}

/// A value as response text: strings unquoted, everything else as JSON.
#[must_use]
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
