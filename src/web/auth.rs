// src/web/auth.rs

use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, ORIGIN};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::config::HttpConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Who sent the trigger: a user name, the trusted origin, or nobody.
    Allowed { caller: Option<String> },
    MissingHeader,
    WrongCredentials { username: Option<String> },
}

/// Basic auth for trigger callers. Skipped when no credentials are
/// configured or when the request comes from the allowed origin.
pub fn check_trigger_auth(cfg: &HttpConfig, headers: &HeaderMap) -> AuthOutcome {
    let origin = headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if !cfg.auth_enabled() {
        return AuthOutcome::Allowed { caller: origin };
    }
    if origin.is_some() && origin == cfg.allowed_origin {
        return AuthOutcome::Allowed { caller: origin };
    }

    let Some(header) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return AuthOutcome::MissingHeader;
    };

    match decode_basic(header) {
        Some((username, password)) if username == cfg.username && password == cfg.password => {
            AuthOutcome::Allowed {
                caller: Some(username),
            }
        }
        Some((username, _)) => AuthOutcome::WrongCredentials {
            username: Some(username),
        },
        None => AuthOutcome::WrongCredentials { username: None },
    }
}

fn decode_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}
