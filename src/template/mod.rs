//! JSON response templates with embedded directives.
//!
//! [`TemplateEngine::render`] walks a template object in key order.
//! A directive is triggered either by a value (`"@now yyyy-MM-dd"`) or
//! by a key suffix (`"today@now=>yyyy-MM-dd": true`, `"total@val-eval":
//! "a + b"`). Each directive returns a [`DirectiveOutput`] that sets,
//! raw-injects, or deletes the key. Directives share a per-render
//! [`RenderContext`] so that one can open a resource or compute a value
//! that a later one reuses.
//!
//! Directive failures are logged and the key is left as written.

mod context;
mod data;
pub mod datefmt;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
mod db;
#[cfg(feature = "redis")]
mod redis;
mod time;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub use context::{Clock, FixedClock, RenderContext, SystemClock, Var};
pub use time::{StepLabel, TimeStepper};

use crate::expr::ExprError;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DirectiveError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("context variable '{0}' is not set")]
    MissingVar(String),

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// The parameter a directive receives.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveParam {
    /// Text after the directive name, from `"@name text"` or `"key@name=>text"`.
    Text(String),
    /// The JSON value of a `"key@name"` entry.
    Json(Value),
}

impl DirectiveParam {
    /// The parameter as plain text; JSON strings are unquoted.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(s) | Self::Json(Value::String(s)) => s.trim().to_string(),
            Self::Json(Value::Null) => String::new(),
            Self::Json(other) => other.to_string(),
        }
    }

    /// Deserializes the parameter; text is parsed as JSON first.
    pub fn parse<T: DeserializeOwned>(self) -> Result<T, DirectiveError> {
        let value = match self {
            Self::Text(s) => serde_json::from_str(&s)
                .map_err(|e| DirectiveError::InvalidParam(format!("expected JSON: {e}")))?,
            Self::Json(Value::String(s)) => {
                serde_json::from_str(&s).unwrap_or(Value::String(s))
            }
            Self::Json(v) => v,
        };
        serde_json::from_value(value).map_err(|e| DirectiveError::InvalidParam(e.to_string()))
    }
}

/// How a directive's result is applied to the output document.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveOutput {
    Set(Value),
    SetRaw(String),
    Delete,
}

#[async_trait]
pub trait Directive: Send + Sync {
    async fn evaluate(
        &self,
        ctx: &mut RenderContext,
        key: &str,
        param: DirectiveParam,
    ) -> Result<DirectiveOutput, DirectiveError>;
}

pub type DirectiveFactory = fn() -> Arc<dyn Directive>;

/// Named directives, frozen once built.
#[derive(Clone, Default)]
pub struct DirectiveRegistry {
    directives: BTreeMap<&'static str, Arc<dyn Directive>>,
}

impl DirectiveRegistry {
    #[must_use]
    pub fn builder() -> DirectiveRegistryBuilder {
        DirectiveRegistryBuilder::default()
    }

    /// The registry with every built-in directive.
    #[must_use]
    pub fn with_builtins() -> Self {
        let builder = Self::builder()
            .register("now", || Arc::new(time::Now))
            .register("date", || Arc::new(time::Now))
            .register("time", || Arc::new(time::TimeAnchor))
            .register("time-stepper", || Arc::new(time::TimeStepperDirective))
            .register("val-eval", || Arc::new(data::ValEval))
            .register("merge-json", || Arc::new(data::MergeJson))
            .register("group-json", || Arc::new(data::GroupJson));

        #[cfg(any(feature = "sqlite", feature = "postgres"))]
        let builder = builder
            .register("db-instance", || Arc::new(db::DbInstance::default()))
            .register("db-query", || Arc::new(db::DbQuery));

        #[cfg(feature = "redis")]
        let builder = builder
            .register("redis-instance", || Arc::new(redis::RedisInstance))
            .register("redis", || Arc::new(redis::RedisGet));

        builder.build()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.directives.keys().copied()
    }

    /// Matches the longest directive name at the start of `text`.
    ///
    /// The name must be followed by the end of input, `=>`, or a
    /// character that cannot continue a name. Returns the directive and
    /// the remaining text.
    fn match_prefix<'t>(&self, text: &'t str) -> Option<(&'static str, &Arc<dyn Directive>, &'t str)> {
        self.directives
            .iter()
            .rev()
            .filter(|(name, _)| text.starts_with(**name))
            .find(|(name, _)| {
                text[name.len()..]
                    .chars()
                    .next()
                    .map_or(true, |c| !(c.is_alphanumeric() || c == '-' || c == '_'))
            })
            .map(|(name, directive)| (*name, directive, &text[name.len()..]))
    }
}

#[derive(Default)]
pub struct DirectiveRegistryBuilder {
    directives: BTreeMap<&'static str, Arc<dyn Directive>>,
}

impl DirectiveRegistryBuilder {
    #[must_use]
    pub fn register(mut self, name: &'static str, factory: DirectiveFactory) -> Self {
        self.directives.insert(name, factory());
        self
    }

    #[must_use]
    pub fn build(self) -> DirectiveRegistry {
        DirectiveRegistry {
            directives: self.directives,
        }
    }
}

/// A located directive inside one template entry.
struct Invocation<'a> {
    name: &'static str,
    directive: &'a Arc<dyn Directive>,
    out_key: String,
    param: DirectiveParam,
}

#[derive(Clone)]
pub struct TemplateEngine {
    registry: Arc<DirectiveRegistry>,
    clock: Arc<dyn Clock>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("directives", &self.registry.names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl TemplateEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(DirectiveRegistry::with_builtins(), Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_registry(registry: DirectiveRegistry, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: Arc::new(registry),
            clock,
        }
    }

    #[must_use]
    pub fn with_clock(&self, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            clock,
        }
    }

    /// Renders a template. Non-object templates are returned as is.
    pub async fn render(&self, template: &Value) -> Value {
        let Value::Object(map) = template else {
            return template.clone();
        };
        let mut ctx = RenderContext::new(self.clock.now());
        let rendered = self.render_object(&mut ctx, map).await;
        ctx.close().await;
        Value::Object(rendered)
    }

    /// Renders raw body text: JSON objects go through the engine, anything else is returned verbatim.
    pub async fn render_text(&self, raw: &str) -> Vec<u8> {
        match serde_json::from_str::<Value>(raw) {
            Ok(template @ Value::Object(_)) => {
                serde_json::to_vec(&self.render(&template).await).unwrap_or_else(|_| raw.into())
            }
            _ => raw.as_bytes().to_vec(),
        }
    }

    fn render_object<'a>(
        &'a self,
        ctx: &'a mut RenderContext,
        map: &'a Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Map<String, Value>> + Send + 'a>> {
        Box::pin(async move {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                if key.starts_with('#') || key.starts_with("//") {
                    continue;
                }

                if let Some(invocation) = self.locate(key, value) {
                    let Invocation {
                        name,
                        directive,
                        out_key,
                        param,
                    } = invocation;
                    match directive.evaluate(ctx, &out_key, param).await {
                        Ok(DirectiveOutput::Set(v)) => {
                            out.insert(out_key, v);
                        }
                        Ok(DirectiveOutput::SetRaw(raw)) => {
                            let v = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                            out.insert(out_key, v);
                        }
                        Ok(DirectiveOutput::Delete) => {}
                        Err(e) => {
                            tracing::warn!(
                                key = %key,
                                directive = name,
                                error = %e,
                                "directive failed, leaving key unchanged"
                            );
                            out.insert(key.clone(), value.clone());
                        }
                    }
                    continue;
                }

                let rendered = match value {
                    Value::Object(inner) => Value::Object(self.render_object(ctx, inner).await),
                    other => other.clone(),
                };
                out.insert(key.clone(), rendered);
            }
            out
        })
    }

    fn locate<'a>(&'a self, key: &str, value: &Value) -> Option<Invocation<'a>> {
        if let Some(text) = value.as_str().and_then(|s| s.strip_prefix('@')) {
            if let Some((name, directive, rest)) = self.registry.match_prefix(text) {
                let rest = rest.strip_prefix("=>").unwrap_or(rest);
                let rest = rest
                    .strip_prefix([' ', ':', '|'])
                    .unwrap_or(rest);
                return Some(Invocation {
                    name,
                    directive,
                    out_key: key.to_string(),
                    param: DirectiveParam::Text(rest.trim().to_string()),
                });
            }
        }

        for (at, _) in key.match_indices('@') {
            let Some((name, directive, rest)) = self.registry.match_prefix(&key[at + 1..]) else {
                continue;
            };
            let param = if rest.is_empty() {
                DirectiveParam::Json(value.clone())
            } else if let Some(arg) = rest.strip_prefix("=>") {
                DirectiveParam::Text(arg.trim().to_string())
            } else {
                continue;
            };
            return Some(Invocation {
                name,
                directive,
                out_key: key[..at].to_string(),
                param,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use serde_json::json;

    fn engine() -> TemplateEngine {
        let clock = FixedClock(Local.with_ymd_and_hms(2024, 7, 4, 9, 15, 30).unwrap());
        TemplateEngine::new().with_clock(Arc::new(clock))
    }

    #[tokio::test]
    async fn key_form_with_inline_format() {
        let out = engine().render(&json!({"x@now=>yyyy-MM-dd": true})).await;
        assert_eq!(out, json!({"x": "2024-07-04"}));
    }

    #[tokio::test]
    async fn value_form_keeps_key() {
        let out = engine()
            .render(&json!({"a": "@now HH:mm", "b": "@date=>yyyy"}))
            .await;
        assert_eq!(out, json!({"a": "09:15", "b": "2024"}));
    }

    #[tokio::test]
    async fn non_directives_pass_through_in_order() {
        let out = engine()
            .render(&json!({"z": 1, "email": "me@nowhere.org", "a": {"b": "@nowhere"}, "list": [1, 2]}))
            .await;
        assert_eq!(
            serde_json::to_string(&out).unwrap(),
            r#"{"z":1,"email":"me@nowhere.org","a":{"b":"@nowhere"},"list":[1,2]}"#
        );
    }

    #[tokio::test]
    async fn comment_keys_are_removed() {
        let out = engine()
            .render(&json!({"# note": "x", "// other": 1, "keep": true}))
            .await;
        assert_eq!(out, json!({"keep": true}));
    }

    #[tokio::test]
    async fn nested_objects_are_rendered() {
        let out = engine()
            .render(&json!({"meta": {"day@now=>dd": 1}}))
            .await;
        assert_eq!(out, json!({"meta": {"day": "04"}}));
    }

    #[tokio::test]
    async fn failing_directive_leaves_key_unchanged() {
        let out = engine()
            .render(&json!({"t@time": {"value": "someday"}, "ok": 1}))
            .await;
        assert_eq!(out, json!({"t@time": {"value": "someday"}, "ok": 1}));
    }

    #[tokio::test]
    async fn longest_name_wins() {
        let out = engine()
            .render(&json!({
                "s@time-stepper": {"step": "1h", "startOffset": "-1h", "fmt": "HH"},
                "t@time": {"value": "dayStart", "unit": "HH"},
                "v@val-eval": "t"
            }))
            .await;
        assert_eq!(out, json!({"v": "00"}));
    }

    #[tokio::test]
    async fn later_directives_see_earlier_results() {
        let out = engine()
            .render(&json!({
                "a@val-eval": "2 * 21",
                "b@val-eval": "a + 1"
            }))
            .await;
        assert_eq!(out, json!({"a": 42, "b": 43}));
    }

    #[tokio::test]
    async fn render_text_passes_non_json_through() {
        assert_eq!(engine().render_text("plain text").await, b"plain text".to_vec());
        let rendered = engine().render_text(r#"{"y@now=>yyyy": 1}"#).await;
        assert_eq!(rendered, br#"{"y":"2024"}"#.to_vec());
    }

    #[test]
    fn param_text_unquotes_strings() {
        assert_eq!(DirectiveParam::Json(json!(" a + b ")).text(), "a + b");
        assert_eq!(DirectiveParam::Json(json!(3)).text(), "3");
        assert_eq!(DirectiveParam::Text("x".into()).text(), "x");
    }
}
