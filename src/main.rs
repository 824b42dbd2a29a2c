// src/main.rs

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use cctv_recorder::archive::ArchiveCatalog;
use cctv_recorder::config::{self, Config};
use cctv_recorder::engine::CaptureEngine;
use cctv_recorder::viewer::spawn_viewer;
use cctv_recorder::web::{self, AppState};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // ------------------------------------------------------------
    // Config
    // ------------------------------------------------------------
    let cfg_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".into());

    let cfg: Config = config::load(&cfg_path)?;
    info!("[cctv] loaded {}", cfg_path);

    // ------------------------------------------------------------
    // Graceful shutdown
    // ------------------------------------------------------------
    let shutdown = CancellationToken::new();
    {
        let s = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("[cctv] shutdown requested");
            s.cancel();
        })?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(cfg, shutdown))
}

async fn run(cfg: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr: SocketAddr = cfg
        .http
        .bind
        .parse()
        .with_context(|| format!("invalid http.bind '{}'", cfg.http.bind))?;

    // ------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------
    let engine = CaptureEngine::new(&cfg);
    engine
        .start_recording()
        .await
        .context("could not start recording")?;
    info!(
        "[cctv] buffering {:?} of footage in {}",
        cfg.capture.buffer_horizon(),
        engine.working_dir().display()
    );

    // ------------------------------------------------------------
    // Viewer
    // ------------------------------------------------------------
    let viewer = cfg
        .viewer
        .enabled
        .then(|| spawn_viewer(&cfg.viewer, &cfg.capture.stream_url, shutdown.clone()));

    // ------------------------------------------------------------
    // HTTP
    // ------------------------------------------------------------
    let state = AppState {
        engine: engine.clone(),
        catalog: Arc::new(ArchiveCatalog::new(
            cfg.archive.root_dir.clone(),
            cfg.archive.extension.clone(),
        )),
        http: Arc::new(cfg.http.clone()),
    };

    info!("[cctv] running – Ctrl+C to stop");
    if let Err(e) = web::serve(state, addr, shutdown.clone()).await {
        error!("[http] server failed: {:#}", e);
        shutdown.cancel();
    }

    // ------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------
    info!("[cctv] shutting down…");
    engine.stop_recording().await;
    if let Some(viewer) = viewer {
        if let Err(e) = viewer.await {
            error!("[viewer] task failed: {}", e);
        }
    }
    info!("[cctv] shutdown complete");

    Ok(())
}
