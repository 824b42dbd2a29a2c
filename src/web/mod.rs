// src/web/mod.rs

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;

use crate::archive::ArchiveCatalog;
use crate::config::HttpConfig;
use crate::engine::CaptureEngine;

pub mod auth;
pub mod handlers;

#[derive(Clone)]
pub struct AppState {
    pub engine: CaptureEngine,
    pub catalog: Arc<ArchiveCatalog>,
    pub http: Arc<HttpConfig>,
}

pub fn router(state: AppState) -> Router {
    let archive = ServeDir::new(state.catalog.root());

    Router::new()
        .route("/event", post(handlers::post_event))
        .route("/api/days", get(handlers::get_days))
        .route("/api/recordings", get(handlers::get_recordings))
        .route("/api/status", get(handlers::get_status))
        .nest_service("/recording", archive)
        .with_state(state)
}

pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("[http] listening on {}", addr);
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
