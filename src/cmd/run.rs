//! `livemock run`: start the mock server.
//!
//! Opens the definition store, seeds the demo endpoints into an empty
//! store, installs the first route snapshot, and serves until SIGTERM or
//! Ctrl+C.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::cli::RunArgs;
use crate::error::LivemockError;
use crate::logging;
use crate::server::{self, AppState};
use crate::service::demo_endpoints;
use crate::store;

pub async fn execute(args: RunArgs) -> Result<(), LivemockError> {
    let log_format = logging::resolve_format(args.pretty, args.json);
    logging::init(&args.log_level, log_format);

    let options = args.server_options();
    let addr: SocketAddr = format!("{}:{}", options.host, options.port).parse()?;

    let store = store::open(args.store.as_deref()).await?;
    let store_name = store.name();
    let state = Arc::new(AppState::new(store, options));

    let seed = if args.no_seed {
        Vec::new()
    } else {
        demo_endpoints(addr.port())
    };
    let snapshot = state.service.bootstrap(seed).await?;

    let router = server::build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        store = store_name,
        endpoints = snapshot.len(),
        version = snapshot.short_version(),
        context_path = %state.options.context_path,
        "livemock started"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(server::shutdown_signal())
    .await?;

    tracing::info!("livemock stopped");
    Ok(())
}
