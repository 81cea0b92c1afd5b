//! Endpoint definitions and their compiled request handlers.
//!
//! [`compile`] turns a stored [`EndpointDefinition`] into a
//! [`CompiledEndpoint`] once per route table build. The handler kind is
//! chosen by the first matching rule:
//!
//! 1. a non-empty `mimeType` serves the stored file,
//! 2. `_proxy` with an `http(s)` address reverse-proxies (with optional `_tee`),
//! 3. `_direct` renders its template on every request,
//! 4. a mockbin-shaped body replays the configured response,
//! 5. `_echo` reflects the request,
//! 6. otherwise `_dynamic` rules are tried in order before rendering the body.
//!
//! Compilation never fails; anything unrecognised ends up in the default
//! dynamic handler.

pub mod auth;
pub mod definition;
pub mod dynamic;
pub mod echo;
pub mod helpers;
pub mod mockbin;
pub mod request;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, EXPIRES, PRAGMA};
use axum::http::StatusCode;
use serde_json::{Map, Value};

pub use definition::EndpointDefinition;
pub use request::{EndpointResponse, RequestContext};

use self::auth::AuthPolicy;
use self::dynamic::DynamicRule;
use self::echo::EchoMode;
use self::helpers::{requested_sleep, Helper};
use self::mockbin::Mockbin;
use crate::error::LivemockError;
use crate::json::{detect_content_type, JSON_CONTENT_TYPE};
use crate::proxy::pool::PoolRegistry;
use crate::proxy::tee::{TeePool, TeeTargets};
use crate::proxy::ProxyHandler;
use crate::server::HttpClient;
use crate::template::TemplateEngine;

/// Body keys consumed by the handler itself and never rendered.
pub const RESERVED_KEYS: &[&str] = &["_auth", "_hl", "_dynamic"];

/// Shared collaborators handed to every compiled handler.
#[derive(Clone)]
pub struct Services {
    pub engine: TemplateEngine,
    pub client: HttpClient,
    pub tee: TeePool,
    pub proxy_timeout: Duration,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("proxy_timeout", &self.proxy_timeout)
            .finish_non_exhaustive()
    }
}

/// The fallback body of a default handler.
#[derive(Debug, Clone)]
pub enum BodyTemplate {
    Json(Value),
    Raw(String),
}

#[derive(Debug, Clone)]
pub enum HandlerKind {
    Download,
    Proxy(ProxyHandler),
    /// A `_proxy` endpoint whose pool could not be built.
    Unavailable(String),
    Direct(Value),
    Mockbin(Box<Mockbin>),
    Echo(EchoMode),
    Dynamic {
        rules: Vec<DynamicRule>,
        body: BodyTemplate,
    },
}

impl HandlerKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Proxy(_) => "proxy",
            Self::Unavailable(_) => "unavailable",
            Self::Direct(_) => "direct",
            Self::Mockbin(_) => "mockbin",
            Self::Echo(_) => "echo",
            Self::Dynamic { .. } => "dynamic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledEndpoint {
    pub definition: Arc<EndpointDefinition>,
    pub kind: HandlerKind,
    pub auth: Option<AuthPolicy>,
}

/// Compiles a definition. Proxy pools come from (and are added to) `pools`.
#[must_use]
pub fn compile(definition: Arc<EndpointDefinition>, pools: &mut PoolRegistry) -> CompiledEndpoint {
    let body = definition.body_object();
    let auth = body
        .as_ref()
        .and_then(|b| b.get("_auth"))
        .and_then(AuthPolicy::from_value);
    let kind = detect(&definition, body.as_ref(), pools);
    tracing::debug!(endpoint = %definition.label(), kind = kind.name(), "compiled endpoint");
    CompiledEndpoint {
        definition,
        kind,
        auth,
    }
}

fn detect(
    definition: &EndpointDefinition,
    body: Option<&Map<String, Value>>,
    pools: &mut PoolRegistry,
) -> HandlerKind {
    if definition.is_file() {
        return HandlerKind::Download;
    }
    let Some(body) = body else {
        return HandlerKind::Dynamic {
            rules: Vec::new(),
            body: BodyTemplate::Raw(definition.body.clone()),
        };
    };
    let label = definition.label();

    if let Some(proxy) = body.get("_proxy") {
        let addresses = validation::addresses(proxy);
        if addresses.first().is_some_and(|a| a.starts_with("http")) {
            let pool = pools.get_or_create(&label, &addresses);
            return match pool.check_backends() {
                Ok(()) => HandlerKind::Proxy(ProxyHandler {
                    pool,
                    tee: body
                        .get("_tee")
                        .map(|t| TeeTargets::parse(&validation::addresses(t)))
                        .unwrap_or_default(),
                }),
                Err(e) => {
                    tracing::warn!(endpoint = %label, error = %e, "proxy endpoint has no usable backend");
                    HandlerKind::Unavailable(e.to_string())
                }
            };
        }
    }

    if let Some(template) = body.get("_direct") {
        return HandlerKind::Direct(template.clone());
    }

    if let Some(mockbin) = Mockbin::detect(body) {
        return HandlerKind::Mockbin(Box::new(mockbin));
    }

    if let Some(mode) = body.get("_echo") {
        return HandlerKind::Echo(EchoMode::parse(&crate::json::to_text(mode)));
    }

    let rules = body
        .get("_dynamic")
        .map(|rules| dynamic::compile_rules(&label, rules, body))
        .unwrap_or_default();
    let mut fallback = body.clone();
    for key in RESERVED_KEYS {
        fallback.remove(*key);
    }
    HandlerKind::Dynamic {
        rules,
        body: BodyTemplate::Json(Value::Object(fallback)),
    }
}

impl CompiledEndpoint {
    /// Runs the endpoint for one request.
    ///
    /// Authorization is checked first, then `_hl` helpers and the
    /// `_sleep` delay apply to every handler kind.
    pub async fn handle(&self, req: &RequestContext, services: &Services) -> EndpointResponse {
        if let Some(rejection) = self.auth.as_ref().and_then(|auth| auth.check(req)) {
            tracing::info!(
                correlation_id = %req.correlation_id,
                endpoint = %self.definition.label(),
                "unauthorized"
            );
            return rejection;
        }

        if let Some((helper, use_json)) = Helper::from_request(req) {
            return helper.respond(req, &self.definition.body, use_json);
        }

        if let Some(delay) = requested_sleep(req) {
            delay.sleep().await;
        }

        match &self.kind {
            HandlerKind::Download => download(&self.definition, req),
            HandlerKind::Proxy(proxy) => proxy
                .handle(&services.client, &services.tee, req, services.proxy_timeout)
                .await
                .unwrap_or_else(|e| error_response(&e)),
            HandlerKind::Unavailable(reason) => EndpointResponse::json(
                StatusCode::BAD_GATEWAY,
                &serde_json::json!({ "error": reason }),
            ),
            HandlerKind::Direct(template) => render(&services.engine, template).await,
            HandlerKind::Mockbin(mockbin) => mockbin.respond(req, &services.engine).await,
            HandlerKind::Echo(mode) => mode.respond(req),
            HandlerKind::Dynamic { rules, body } => {
                if let Some(rule) = dynamic::first_match(rules, req) {
                    return rule.respond(&services.engine).await;
                }
                match body {
                    BodyTemplate::Json(template) => render(&services.engine, template).await,
                    BodyTemplate::Raw(raw) => {
                        let bytes = services.engine.render_text(raw).await;
                        let content_type = detect_content_type(&bytes);
                        EndpointResponse::new(StatusCode::OK).with_body(bytes, content_type)
                    }
                }
            }
        }
    }
}

async fn render(engine: &TemplateEngine, template: &Value) -> EndpointResponse {
    let bytes = match template {
        Value::String(raw) => engine.render_text(raw).await,
        other => serde_json::to_vec(&engine.render(other).await).unwrap_or_default(),
    };
    let content_type = detect_content_type(&bytes);
    EndpointResponse::new(StatusCode::OK).with_body(bytes, content_type)
}

fn error_response(e: &LivemockError) -> EndpointResponse {
    EndpointResponse::json(e.status_code(), &serde_json::json!({ "error": e.to_string() }))
}

/// Serves stored file content, as an attachment when `_dl` is present.
fn download(definition: &EndpointDefinition, req: &RequestContext) -> EndpointResponse {
    let filename = if definition.filename.is_empty() {
        definition
            .path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    } else {
        definition.filename.clone()
    };
    let disposition_name = filename.replace('"', "");

    if req.query_value("_dl").is_some() {
        return EndpointResponse::new(StatusCode::OK)
            .with_body(definition.file_content.clone(), "application/octet-stream")
            .with_header(
                CONTENT_DISPOSITION.as_str(),
                &format!("attachment; filename=\"{disposition_name}\""),
            )
            .with_header("content-description", "File Transfer")
            .with_header("content-transfer-encoding", "binary")
            .with_header(EXPIRES.as_str(), "0")
            .with_header(CACHE_CONTROL.as_str(), "must-revalidate")
            .with_header(PRAGMA.as_str(), "public");
    }

    let content_type = match definition.mime_type.trim() {
        "" => JSON_CONTENT_TYPE,
        mime => mime,
    };
    EndpointResponse::new(StatusCode::OK)
        .with_body(definition.file_content.clone(), content_type)
        .with_header(
            CONTENT_DISPOSITION.as_str(),
            &format!("inline; filename=\"{disposition_name}\""),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::request::test_support::request;
    use crate::server::build_http_client;
    use serde_json::json;

    fn services() -> Services {
        let client = build_http_client();
        Services {
            engine: TemplateEngine::new(),
            tee: TeePool::new(client.clone(), 2, Duration::from_secs(1)),
            client,
            proxy_timeout: Duration::from_secs(1),
        }
    }

    fn compiled(body: &str) -> CompiledEndpoint {
        let def = EndpointDefinition::new("GET", "/t", body);
        compile(Arc::new(def), &mut PoolRegistry::default())
    }

    #[tokio::test]
    async fn detection_order() {
        let kinds = [
            (r#"{"_proxy":"http://127.0.0.1:1","_direct":{}}"#, "proxy"),
            (r#"{"_proxy":"ftp://x","_direct":{"a":1}}"#, "direct"),
            (r#"{"_direct":{"a":1},"status":201}"#, "direct"),
            (r#"{"status":201,"_echo":"json"}"#, "mockbin"),
            (r#"{"_echo":"json"}"#, "echo"),
            (r#"{"_dynamic":[]}"#, "dynamic"),
            ("plain text", "dynamic"),
        ];
        for (body, expected) in kinds {
            assert_eq!(compiled(body).kind.name(), expected, "{body}");
        }
    }

    #[tokio::test]
    async fn file_endpoints_download() {
        let mut def = EndpointDefinition::new("GET", "/files/report.csv", "");
        def.mime_type = "text/csv".into();
        def.file_content = b"a,b\n1,2\n".to_vec();
        let endpoint = compile(Arc::new(def), &mut PoolRegistry::default());
        assert_eq!(endpoint.kind.name(), "download");

        let inline = endpoint.handle(&request("GET", "/files/report.csv", ""), &services()).await;
        assert_eq!(inline.content_type(), Some("text/csv"));
        assert_eq!(&inline.body[..], b"a,b\n1,2\n");

        let attachment = endpoint
            .handle(&request("GET", "/files/report.csv?_dl", ""), &services())
            .await;
        assert_eq!(
            attachment.headers[CONTENT_DISPOSITION],
            "attachment; filename=\"report.csv\""
        );
        assert_eq!(attachment.content_type(), Some("application/octet-stream"));
    }

    #[tokio::test]
    async fn empty_proxy_pool_reports_failure() {
        let endpoint = compiled(r#"{"_proxy":"http://","a":1}"#);
        assert_eq!(endpoint.kind.name(), "unavailable");
        let resp = endpoint.handle(&request("GET", "/t", ""), &services()).await;
        assert_eq!(resp.status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn dynamic_falls_back_to_stripped_body() {
        let endpoint = compiled(
            r#"{"_dynamic":[{"condition":"query_a == '1'","response":{"hit":true}}],"_hl":"x","name":"demo"}"#,
        );
        let svc = services();

        let hit = endpoint.handle(&request("GET", "/t?a=1", ""), &svc).await;
        assert_eq!(serde_json::from_slice::<Value>(&hit.body).unwrap(), json!({"hit": true}));

        let miss = endpoint.handle(&request("GET", "/t?a=2", ""), &svc).await;
        assert_eq!(
            serde_json::from_slice::<Value>(&miss.body).unwrap(),
            json!({"name": "demo"})
        );
    }

    #[tokio::test]
    async fn auth_runs_before_the_handler() {
        let endpoint = compiled(r#"{"_auth":{"bearerToken":"t"},"_echo":"json"}"#);
        let svc = services();
        let rejected = endpoint.handle(&request("GET", "/t", ""), &svc).await;
        assert_eq!(rejected.status, StatusCode::UNAUTHORIZED);

        let mut req = request("GET", "/t", "");
        req.headers.insert("authorization", "Bearer t".parse().unwrap());
        assert_eq!(endpoint.handle(&req, &svc).await.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn helpers_short_circuit() {
        let endpoint = compiled(r#"{"a":1}"#);
        let resp = endpoint.handle(&request("GET", "/t?_hl=conf", ""), &services()).await;
        assert_eq!(&resp.body[..], br#"{"a":1}"#);
    }
}
