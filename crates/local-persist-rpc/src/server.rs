//! HTTP server implementation using Axum.

use crate::handler::{
    handle_activate, handle_capabilities, handle_create, handle_get, handle_health, handle_list,
    handle_mount, handle_path, handle_remove, handle_unmount,
};
use axum::{
    routing::{get, post},
    Router,
};
use local_persist::Driver;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Upper bound on in-flight plugin requests.
const MAX_CONCURRENT_REQUESTS: usize = 64;

/// Application state shared across handlers.
pub struct AppState {
    pub driver: Driver,
}

/// Build the plugin router.
pub fn router(driver: Driver) -> Router {
    let state = Arc::new(AppState { driver });

    Router::new()
        .route("/health", get(handle_health))
        .route("/Plugin.Activate", post(handle_activate))
        .route("/VolumeDriver.Create", post(handle_create))
        .route("/VolumeDriver.Remove", post(handle_remove))
        .route("/VolumeDriver.Get", post(handle_get))
        .route("/VolumeDriver.List", post(handle_list))
        .route("/VolumeDriver.Mount", post(handle_mount))
        .route("/VolumeDriver.Unmount", post(handle_unmount))
        .route("/VolumeDriver.Path", post(handle_path))
        .route("/VolumeDriver.Capabilities", post(handle_capabilities))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the plugin HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(driver: Driver, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let app = router(driver);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}
