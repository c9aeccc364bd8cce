//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness, no I/O
//! - GET /readyz   -> checks the database and that the media root is writable

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Runs `SELECT 1` against SQLite and a write/read/delete round trip under the
/// media root. 200 when both pass, 503 otherwise, with per-check detail.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.shares.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };

    let probe = state
        .shares
        .media_root
        .join(format!(".readyz-{}", Uuid::new_v4()));
    let disk = match fs::write(&probe, b"readyz").await {
        Ok(()) => {
            let check = match fs::read(&probe).await {
                Ok(bytes) if bytes == b"readyz" => CheckStatus::ok(),
                Ok(_) => CheckStatus::failed("file content mismatch".into()),
                Err(e) => CheckStatus::failed(format!("could not read probe file: {}", e)),
            };
            if let Err(e) = fs::remove_file(&probe).await {
                tracing::warn!(path = %probe.display(), error = %e, "could not remove readiness probe");
            }
            check
        }
        Err(e) => CheckStatus::failed(format!("could not write probe file: {}", e)),
    };

    let ready = sqlite.ok && disk.ok;
    let checks = HashMap::from([("sqlite", sqlite), ("disk", disk)]);
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
