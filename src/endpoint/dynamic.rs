//! Conditional responses from a `_dynamic` rule list.
//!
//! Each rule's condition is compiled once. For every free variable of the
//! condition a [`VariableResolver`] is built from its name prefix:
//!
//! | Prefix | Source |
//! |--------|--------|
//! | `json_` | dotted path into the JSON request body |
//! | `query_` | query string parameter |
//! | `router_` | path parameter |
//! | `header_` | request header |
//! | other | the endpoint body's own value under that key, resolved again as a variable name |
//!
//! Resolvers run against the live request on every evaluation.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::request::{EndpointResponse, RequestContext};
use crate::expr::{Bindings, Expression};
use crate::json::{detect_content_type, lookup_path};
use crate::template::TemplateEngine;

/// How many times a body-indirect name may point at another name.
const MAX_INDIRECTION: usize = 4;

/// Extracts one variable's value from a request.
pub trait VariableResolver: Send + Sync + std::fmt::Debug {
    fn resolve(&self, req: &RequestContext) -> Value;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestResolver {
    Json(String),
    Query(String),
    Router(String),
    Header(String),
    /// A name that resolved to nothing; always binds `null`.
    Unbound,
    /// A literal taken from the endpoint body.
    Literal(Value),
}

impl RequestResolver {
    /// Builds the resolver for a variable, following body indirection.
    #[must_use]
    pub fn for_variable(name: &str, body: &Map<String, Value>) -> Self {
        Self::build(name, body, 0)
    }

    fn build(name: &str, body: &Map<String, Value>, depth: usize) -> Self {
        if let Some(path) = name.strip_prefix("json_") {
            return Self::Json(path.to_string());
        }
        if let Some(key) = name.strip_prefix("query_") {
            return Self::Query(key.to_string());
        }
        if let Some(key) = name.strip_prefix("router_") {
            return Self::Router(key.to_string());
        }
        if let Some(key) = name.strip_prefix("header_") {
            return Self::Header(key.to_string());
        }
        match lookup_path(&Value::Object(body.clone()), name) {
            Some(Value::String(next)) if !next.is_empty() && depth < MAX_INDIRECTION => {
                Self::build(next, body, depth + 1)
            }
            Some(Value::String(_)) | Some(Value::Null) | None => Self::Unbound,
            Some(other) => Self::Literal(other.clone()),
        }
    }
}

impl VariableResolver for RequestResolver {
    fn resolve(&self, req: &RequestContext) -> Value {
        let text = |v: Option<String>| v.map_or(Value::Null, Value::String);
        match self {
            Self::Json(path) => req
                .json()
                .and_then(|body| lookup_path(body, path))
                .cloned()
                .unwrap_or(Value::Null),
            Self::Query(key) => text(req.query_value(key)),
            Self::Router(key) => text(req.param(key).map(String::from)),
            Self::Header(key) => text(req.header(key).map(String::from)),
            Self::Unbound => Value::Null,
            Self::Literal(v) => v.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(default)]
    condition: String,
    #[serde(default)]
    response: Value,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, Value>,
}

/// One compiled branch of a `_dynamic` list.
#[derive(Debug, Clone)]
pub struct DynamicRule {
    pub condition: Expression,
    pub response: Value,
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub resolvers: BTreeMap<String, Arc<dyn VariableResolver>>,
}

impl DynamicRule {
    /// Binds every condition variable from the request.
    #[must_use]
    pub fn bindings(&self, req: &RequestContext) -> Bindings {
        self.resolvers
            .iter()
            .map(|(name, resolver)| (name.clone(), resolver.resolve(req)))
            .collect()
    }

    /// Whether the condition holds. Evaluation failures count as no match.
    #[must_use]
    pub fn matches(&self, req: &RequestContext) -> bool {
        match self.condition.evaluate_bool(&self.bindings(req)) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!(
                    correlation_id = %req.correlation_id,
                    condition = %self.condition,
                    error = %e,
                    "dynamic rule evaluation failed, treating as no match"
                );
                false
            }
        }
    }

    pub async fn respond(&self, engine: &TemplateEngine) -> EndpointResponse {
        let mut content_type = None;
        let mut response = EndpointResponse::new(self.status);
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.clone());
            } else {
                response.set_header(name, value);
            }
        }

        let payload = match &self.response {
            Value::String(s) => engine.render_text(s).await,
            Value::Null => Vec::new(),
            template => serde_json::to_vec(&engine.render(template).await).unwrap_or_default(),
        };
        let content_type =
            content_type.unwrap_or_else(|| detect_content_type(&payload).to_string());
        response.with_body(payload, &content_type)
    }
}

/// Compiles the rules of a `_dynamic` value.
///
/// Rules whose condition does not parse are logged and skipped.
#[must_use]
pub fn compile_rules(label: &str, rules: &Value, body: &Map<String, Value>) -> Vec<DynamicRule> {
    let Value::Array(items) = rules else {
        tracing::warn!(endpoint = %label, "_dynamic is not an array, ignoring");
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let raw: RawRule = match serde_json::from_value(item.clone()) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(endpoint = %label, rule = i, error = %e, "invalid dynamic rule");
                    return None;
                }
            };
            let condition = match Expression::compile(&raw.condition) {
                Ok(expr) => expr,
                Err(e) => {
                    tracing::warn!(endpoint = %label, rule = i, error = %e, "dynamic rule condition does not parse");
                    return None;
                }
            };
            let resolvers = condition
                .vars()
                .iter()
                .map(|name| {
                    let resolver: Arc<dyn VariableResolver> =
                        Arc::new(RequestResolver::for_variable(name, body));
                    (name.clone(), resolver)
                })
                .collect();
            let status = if raw.status == 0 {
                StatusCode::OK
            } else {
                StatusCode::from_u16(raw.status).unwrap_or(StatusCode::OK)
            };
            let headers = raw
                .headers
                .into_iter()
                .map(|(k, v)| (k, crate::json::to_text(&v)))
                .collect();
            Some(DynamicRule {
                condition,
                response: raw.response,
                status,
                headers,
                resolvers,
            })
        })
        .collect()
}

/// The first rule whose condition holds; later rules are not evaluated.
#[must_use]
pub fn first_match<'r>(rules: &'r [DynamicRule], req: &RequestContext) -> Option<&'r DynamicRule> {
    rules.iter().find(|rule| rule.matches(req))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::endpoint::request::test_support::request;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Counting(AtomicUsize);

    impl VariableResolver for Counting {
        fn resolve(&self, _req: &RequestContext) -> Value {
            self.0.fetch_add(1, Ordering::SeqCst);
            Value::Bool(true)
        }
    }

    fn rules(value: Value) -> Vec<DynamicRule> {
        compile_rules("test", &value, &Map::new())
    }

    #[test]
    fn resolver_prefixes() {
        let body = Map::new();
        assert_eq!(
            RequestResolver::for_variable("json_user.name", &body),
            RequestResolver::Json("user.name".into())
        );
        assert_eq!(
            RequestResolver::for_variable("query_page", &body),
            RequestResolver::Query("page".into())
        );
        assert_eq!(
            RequestResolver::for_variable("router_id", &body),
            RequestResolver::Router("id".into())
        );
        assert_eq!(
            RequestResolver::for_variable("header_x-token", &body),
            RequestResolver::Header("x-token".into())
        );
        assert_eq!(RequestResolver::for_variable("other", &body), RequestResolver::Unbound);
    }

    #[test]
    fn indirect_resolution_through_body() {
        let body = json!({"who": "alias", "alias": "query_name", "loop": "loop", "n": 3});
        let body = body.as_object().unwrap();
        assert_eq!(
            RequestResolver::for_variable("who", body),
            RequestResolver::Query("name".into())
        );
        assert_eq!(RequestResolver::for_variable("loop", body), RequestResolver::Unbound);
        assert_eq!(RequestResolver::for_variable("n", body), RequestResolver::Literal(json!(3)));
    }

    #[test]
    fn resolvers_cover_exactly_condition_variables() {
        let compiled = rules(json!([{"condition": "json_a == 1 && query_b != 'x'"}]));
        let names: Vec<&String> = compiled[0].resolvers.keys().collect();
        assert_eq!(names, vec!["json_a", "query_b"]);
    }

    #[test]
    fn first_true_rule_wins_and_later_rules_are_not_resolved() {
        let mut compiled = rules(json!([
            {"condition": "r1 == false", "response": {"n": 1}},
            {"condition": "r2", "response": {"n": 2}},
            {"condition": "r3", "response": {"n": 3}}
        ]));
        let counters: Vec<Arc<Counting>> = (0..3).map(|_| Arc::new(Counting::default())).collect();
        for (rule, counter) in compiled.iter_mut().zip(&counters) {
            let name = rule.condition.vars().iter().next().unwrap().clone();
            rule.resolvers.insert(name, counter.clone() as Arc<dyn VariableResolver>);
        }

        let req = request("GET", "/", "");
        let matched = first_match(&compiled, &req).unwrap();
        assert_eq!(matched.response, json!({"n": 2}));
        assert_eq!(counters[0].0.load(Ordering::SeqCst), 1);
        assert_eq!(counters[1].0.load(Ordering::SeqCst), 1);
        assert_eq!(counters[2].0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn evaluation_errors_do_not_match() {
        let compiled = rules(json!([{"condition": "json_n > 1"}]));
        let req = request("POST", "/", r#"{"n":"abc"}"#);
        assert!(first_match(&compiled, &req).is_none());
    }

    #[test]
    fn unparsable_rules_are_skipped() {
        let compiled = rules(json!([{"condition": "=="}, {"condition": "true"}]));
        assert_eq!(compiled.len(), 1);
    }

    #[tokio::test]
    async fn response_uses_status_headers_and_detected_type() {
        let compiled = rules(json!([{
            "condition": "json_name == 'bingoo'",
            "response": {"name": "bingoo"},
            "status": 201,
            "headers": {"X-Rule": "1"}
        }]));
        let req = request("POST", "/", r#"{"name":"bingoo"}"#);
        let rule = first_match(&compiled, &req).unwrap();
        let resp = rule.respond(&TemplateEngine::new()).await;
        assert_eq!(resp.status, StatusCode::CREATED);
        assert_eq!(resp.headers["x-rule"], "1");
        assert_eq!(resp.content_type(), Some("application/json; charset=utf-8"));
        assert_eq!(&resp.body[..], br#"{"name":"bingoo"}"#);
    }
}
