//! End-to-end routing: endpoint kinds served through the live route table.

use std::net::SocketAddr;
use std::sync::Arc;

use livemock::endpoint::EndpointDefinition;
use livemock::server::{self, AppState, ServerOptions};
use livemock::store::memory::MemoryStore;
use serde_json::{json, Value};

async fn start(seed: Vec<EndpointDefinition>) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
    let state = Arc::new(AppState::new(
        Box::new(MemoryStore::new()),
        ServerOptions::default(),
    ));
    state.service.bootstrap(seed).await.unwrap();
    let router = server::build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .unwrap();
    });

    (addr, shutdown_tx)
}

#[tokio::test]
async fn echo_reports_route_and_params() {
    let (addr, shutdown) = start(vec![EndpointDefinition::new(
        "ANY",
        "/echo/:id",
        r#"{"_echo":"json"}"#,
    )])
    .await;

    let body: Value = reqwest::get(format!("http://{addr}/echo/42?x=1"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["router"], "/echo/:id");
    assert_eq!(body["routerParams"], json!({"id": "42"}));
    assert_eq!(body["query"], json!({"x": "1"}));

    let _ = shutdown.send(());
}

#[tokio::test]
async fn dynamic_rule_matches_request_body() {
    let (addr, shutdown) = start(vec![EndpointDefinition::new(
        "POST",
        "/who",
        r#"{"_dynamic":[{"condition":"json_name == 'bingoo'","response":{"name":"bingoo"}}],"fallback":true}"#,
    )])
    .await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/who"))
        .json(&json!({"name": "bingoo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({"name": "bingoo"}));

    let resp = client
        .post(format!("http://{addr}/who"))
        .json(&json!({"name": "other"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.json::<Value>().await.unwrap(), json!({"fallback": true}));

    let _ = shutdown.send(());
}

#[tokio::test]
async fn conflicting_registration_keeps_first_route() {
    let (addr, shutdown) = start(Vec::new()).await;
    let client = reqwest::Client::new();
    let api = format!("http://{addr}/livemock/api/endpoints");

    let resp = client
        .post(&api)
        .json(&json!({"method": "GET", "path": "/a/:id", "body": r#"{"first": true}"#}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(&api)
        .json(&json!({"method": "GET", "path": "/a/:x", "body": r#"{"second": true}"#}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let body: Value = client
        .get(format!("http://{addr}/a/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"first": true}));

    let listed: Vec<Value> = client.get(&api).send().await.unwrap().json().await.unwrap();
    assert_eq!(listed.len(), 1);

    let _ = shutdown.send(());
}

#[tokio::test]
async fn mockbin_redirect_skips_body() {
    let (addr, shutdown) = start(vec![EndpointDefinition::new(
        "GET",
        "/go",
        r#"{"status":302,"redirectURL":"http://example.com"}"#,
    )])
    .await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let resp = client.get(format!("http://{addr}/go")).send().await.unwrap();
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers()["location"], "http://example.com");
    assert!(resp.bytes().await.unwrap().is_empty());

    let _ = shutdown.send(());
}

#[tokio::test]
async fn method_routes_win_over_any() {
    let (addr, shutdown) = start(vec![
        EndpointDefinition::new("ANY", "/m", r#"{"via": "any"}"#),
        EndpointDefinition::new("POST", "/m", r#"{"via": "post"}"#),
    ])
    .await;
    let client = reqwest::Client::new();

    let post: Value = client
        .post(format!("http://{addr}/m"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(post["via"], "post");

    let get: Value = client
        .get(format!("http://{addr}/m"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(get["via"], "any");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn internal_definitions_mount_diagnostics() {
    let (addr, shutdown) = start(vec![EndpointDefinition::new(
        "GET",
        "/_internal/counter",
        "",
    )])
    .await;

    let body: Value = reqwest::get(format!("http://{addr}/_internal/counter?key=k&add=4"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"key": "k", "value": 4}));

    let _ = shutdown.send(());
}
