//! Integration tests for `_proxy` endpoints, tee mirroring, and backend failure.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use livemock::endpoint::EndpointDefinition;
use livemock::server::{self, AppState, ServerOptions};
use livemock::store::memory::MemoryStore;
use serde_json::Value;

async fn start(
    seed: Vec<EndpointDefinition>,
) -> (SocketAddr, Arc<AppState>, tokio::sync::oneshot::Sender<()>) {
    let options = ServerOptions {
        proxy_timeout: Duration::from_secs(5),
        ..ServerOptions::default()
    };
    let state = Arc::new(AppState::new(Box::new(MemoryStore::new()), options));
    state.service.bootstrap(seed).await.unwrap();
    let router = server::build_router(Arc::clone(&state));

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

    (addr, state, shutdown_tx)
}

/// A livemock instance standing in for an upstream service.
async fn start_backend() -> (SocketAddr, Arc<AppState>, tokio::sync::oneshot::Sender<()>) {
    start(vec![
        EndpointDefinition::new("ANY", "/upstream/*rest", r#"{"_echo":"json"}"#),
        EndpointDefinition::new("ANY", "/sink", r#"{"_direct": {"mirrored": true}}"#),
    ])
    .await
}

#[tokio::test]
async fn proxy_forwards_tail_and_query() {
    let (backend, _backend_state, backend_shutdown) = start_backend().await;
    let (addr, _state, shutdown) = start(vec![EndpointDefinition::new(
        "ANY",
        "/p/*rest",
        &format!(r#"{{"_proxy": "http://{backend}/upstream"}}"#),
    )])
    .await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/p/users/7?verbose=1"))
        .body(r#"{"hello":"world"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["proxied"], "livemock");

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["router"], "/upstream/*rest");
    assert_eq!(body["routerParams"]["rest"], "users/7");
    assert_eq!(body["query"]["verbose"], "1");
    assert_eq!(body["method"], "POST");

    let _ = shutdown.send(());
    let _ = backend_shutdown.send(());
}

#[tokio::test]
async fn tee_mirrors_requests_in_the_background() {
    let (backend, backend_state, backend_shutdown) = start_backend().await;
    let (addr, _state, shutdown) = start(vec![EndpointDefinition::new(
        "GET",
        "/t/*rest",
        &format!(r#"{{"_proxy": "http://{backend}/upstream", "_tee": "{backend}/sink"}}"#),
    )])
    .await;

    let resp = reqwest::get(format!("http://{addr}/t/x")).await.unwrap();
    assert_eq!(resp.status(), 200);

    // The proxied call is one request; the mirrored copy makes two.
    let mut served = 0;
    for _ in 0..50 {
        served = backend_state.stats.served.load(Ordering::Relaxed);
        if served >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(served, 2);

    let _ = shutdown.send(());
    let _ = backend_shutdown.send(());
}

#[tokio::test]
async fn unreachable_backend_returns_bad_gateway() {
    // Bind then drop to get a port nothing listens on.
    let dead = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let (addr, state, shutdown) = start(vec![EndpointDefinition::new(
        "GET",
        "/down",
        &format!(r#"{{"_proxy": "http://{dead}"}}"#),
    )])
    .await;

    let resp = reqwest::get(format!("http://{addr}/down")).await.unwrap();
    assert_eq!(resp.status(), 502);
    assert_eq!(state.stats.proxy_failures.load(Ordering::Relaxed), 1);

    let _ = shutdown.send(());
}
