use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tower::ServiceExt;

use cctv_recorder::archive::{ArchivalWindow, ArchiveCatalog, StabilityGatedCopier};
use cctv_recorder::capture::{CaptureCommand, RestartPolicy, SegmentEventSource};
use cctv_recorder::config::HttpConfig;
use cctv_recorder::engine::CaptureEngine;
use cctv_recorder::web::{AppState, router};

fn state(dir: &Path, http: HttpConfig) -> AppState {
    let source = SegmentEventSource::new(
        CaptureCommand::new("ffmpeg", dir.join("work")),
        RestartPolicy::Never,
    );
    let engine = CaptureEngine::with_parts(
        source,
        ArchivalWindow::new(Duration::from_secs(30)),
        StabilityGatedCopier::new(Duration::from_millis(10)),
        dir.join("archive"),
        "mp4",
    );
    AppState {
        engine,
        catalog: Arc::new(ArchiveCatalog::new(dir.join("archive"), "mp4")),
        http: Arc::new(http),
    }
}

fn protected() -> HttpConfig {
    HttpConfig {
        username: "cam".into(),
        password: "s3cret".into(),
        allowed_origin: Some("http://viewer.local".into()),
        ..HttpConfig::default()
    }
}

fn seed_archive(dir: &Path) {
    let day = dir.join("archive/2024.03.09");
    std::fs::create_dir_all(&day).unwrap();
    std::fs::write(day.join("07.04.59.mp4"), b"clip one").unwrap();
    std::fs::write(day.join("07.05.59.mp4"), b"clip two").unwrap();
    std::fs::write(day.join("13.00.01.mp4"), b"clip three").unwrap();
    std::fs::create_dir_all(dir.join("archive/2024.04.01")).unwrap();
}

async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
    let request = Request::get(uri).body(Body::empty()).unwrap();
    let (status, body) = send(state, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_event(state: AppState, headers: &[(header::HeaderName, String)]) -> (StatusCode, Value) {
    let mut request = Request::post("/event");
    for (name, value) in headers {
        request = request.header(name, value);
    }
    let (status, body) = send(state, request.body(Body::empty()).unwrap()).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn event_without_configured_credentials_triggers() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path(), HttpConfig::default());

    let (status, body) = post_event(state.clone(), &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert!(body["triggered_at"].as_str().is_some());

    let engine_status = state.engine.status();
    assert_eq!(engine_status.triggers, 1);
    assert!(engine_status.window_open);
}

#[tokio::test]
async fn event_requires_basic_auth() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path(), protected());

    let (status, body) = post_event(state.clone(), &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authorization header missing.");

    let wrong = format!("Basic {}", STANDARD.encode("cam:nope"));
    let (status, body) = post_event(state.clone(), &[(header::AUTHORIZATION, wrong)]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Wrong credentials.");
    assert_eq!(state.engine.status().triggers, 0);

    let right = format!("Basic {}", STANDARD.encode("cam:s3cret"));
    let (status, _) = post_event(state.clone(), &[(header::AUTHORIZATION, right)]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.engine.status().triggers, 1);
}

#[tokio::test]
async fn event_from_allowed_origin_skips_auth() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path(), protected());

    let origin = (header::ORIGIN, "http://viewer.local".to_string());
    let (status, _) = post_event(state.clone(), &[origin]).await;
    assert_eq!(status, StatusCode::OK);

    let other = (header::ORIGIN, "http://elsewhere".to_string());
    let (status, _) = post_event(state.clone(), &[other]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(state.engine.status().triggers, 1);
}

#[tokio::test]
async fn recordings_are_grouped_by_hour() {
    let dir = tempfile::tempdir().unwrap();
    seed_archive(dir.path());
    let state = state(dir.path(), HttpConfig::default());

    let (status, body) = get_json(state.clone(), "/api/recordings?date=2024.03.09").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["date"], "2024.03.09");
    assert_eq!(
        body["recordings"]["07"],
        serde_json::json!(["07.04.59.mp4", "07.05.59.mp4"])
    );
    assert_eq!(body["recordings"]["13"], serde_json::json!(["13.00.01.mp4"]));

    let (status, body) = get_json(state.clone(), "/api/recordings").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Date is missing.");

    let (status, body) = get_json(state, "/api/recordings?date=yesterday").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Wrong date.");
}

#[tokio::test]
async fn days_can_be_filtered_by_month() {
    let dir = tempfile::tempdir().unwrap();
    seed_archive(dir.path());
    let state = state(dir.path(), HttpConfig::default());

    let (status, body) = get_json(state.clone(), "/api/days").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!(["2024.03.09", "2024.04.01"]));

    let (_, body) = get_json(state.clone(), "/api/days?month=2024.04").await;
    assert_eq!(body, serde_json::json!(["2024.04.01"]));

    let (status, _) = get_json(state, "/api/days?month=april").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn archived_files_are_served() {
    let dir = tempfile::tempdir().unwrap();
    seed_archive(dir.path());
    let state = state(dir.path(), HttpConfig::default());

    let request = Request::get("/recording/2024.03.09/07.05.59.mp4")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(state.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"clip two");

    let request = Request::get("/recording/2024.03.09/missing.mp4")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(state, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_reports_engine_counters() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path(), HttpConfig::default());

    let (status, body) = get_json(state, "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recording"], false);
    assert_eq!(body["window_open"], false);
    assert_eq!(body["triggers"], 0);
    assert_eq!(body["in_flight"], 0);
}

#[tokio::test]
async fn catalog_without_archive_root_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path(), HttpConfig::default());

    let (status, body) = get_json(state.clone(), "/api/days").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));

    let (status, body) = get_json(state, "/api/recordings?date=2024.03.09").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recordings"], serde_json::json!({}));
}
