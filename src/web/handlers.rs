// src/web/handlers.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Datelike;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::archive::ArchiveCatalog;
use crate::core::{DAY_FORMAT, format_event_time, parse_day};
use crate::engine::EngineStatus;
use crate::web::AppState;
use crate::web::auth::{AuthOutcome, check_trigger_auth};

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub ok: bool,
    pub triggered_at: String,
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    /// `YYYY.MM`
    pub month: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordingsQuery {
    /// `YYYY.MM.DD`
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecordingsResponse {
    pub date: String,
    pub recordings: BTreeMap<String, Vec<String>>,
}

/// Directory walks block; keep them off the async workers.
async fn read_catalog<T, F>(catalog: &Arc<ArchiveCatalog>, read: F) -> std::io::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&ArchiveCatalog) -> std::io::Result<T> + Send + 'static,
{
    let catalog = catalog.clone();
    tokio::task::spawn_blocking(move || read(&catalog))
        .await
        .map_err(std::io::Error::other)?
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

pub async fn post_event(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match check_trigger_auth(&state.http, &headers) {
        AuthOutcome::Allowed { caller } => {
            let triggered_at = format_event_time(&state.engine.trigger_save());
            info!(
                "[http] [{}] new event from {}",
                triggered_at,
                caller.as_deref().unwrap_or("-")
            );
            Json(TriggerResponse {
                ok: true,
                triggered_at,
            })
            .into_response()
        }
        AuthOutcome::MissingHeader => {
            warn!("[http] event rejected: authorization header missing");
            json_error(StatusCode::UNAUTHORIZED, "Authorization header missing.")
        }
        AuthOutcome::WrongCredentials { username } => {
            warn!(
                "[http] event rejected: wrong credentials for {}",
                username.as_deref().unwrap_or("-")
            );
            json_error(StatusCode::UNAUTHORIZED, "Wrong credentials.")
        }
    }
}

pub async fn get_days(State(state): State<AppState>, Query(query): Query<DaysQuery>) -> Response {
    let days = match query.month.as_deref() {
        Some(month) => {
            let Some(first) = parse_day(&format!("{}.01", month)) else {
                return json_error(StatusCode::BAD_REQUEST, "Wrong month.");
            };
            let (year, month) = (first.year(), first.month());
            read_catalog(&state.catalog, move |c| c.days_in_month(year, month)).await
        }
        None => read_catalog(&state.catalog, |c| c.days()).await,
    };

    match days {
        Ok(days) => {
            let names: Vec<String> = days
                .iter()
                .map(|d| d.format(DAY_FORMAT).to_string())
                .collect();
            Json(names).into_response()
        }
        Err(e) => {
            error!("[http] listing archive days failed: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Archive unavailable.")
        }
    }
}

pub async fn get_recordings(
    State(state): State<AppState>,
    Query(query): Query<RecordingsQuery>,
) -> Response {
    let Some(date) = query.date else {
        return json_error(StatusCode::BAD_REQUEST, "Date is missing.");
    };
    let Some(day) = parse_day(&date) else {
        return json_error(StatusCode::BAD_REQUEST, "Wrong date.");
    };

    match read_catalog(&state.catalog, move |c| c.recordings(day)).await {
        Ok(recordings) => Json(RecordingsResponse {
            date: day.format(DAY_FORMAT).to_string(),
            recordings,
        })
        .into_response(),
        Err(e) => {
            error!("[http] listing recordings of {} failed: {}", date, e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Archive unavailable.")
        }
    }
}

pub async fn get_status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.status())
}
