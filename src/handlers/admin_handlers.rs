//! Operator endpoints. Both require the admin bearer key.

use crate::{
    errors::AppError,
    models::job::Job,
    services::{auth::Access, share_service::Stats},
    state::AppState,
};
use axum::{Json, extract::State};

/// `GET /shares/stats`: totals across every share.
pub async fn stats(
    State(state): State<AppState>,
    access: Access,
) -> Result<Json<Stats>, AppError> {
    Ok(Json(state.shares.stats(&access).await?))
}

/// `GET /jobs`: queued, running and parked jobs.
pub async fn pending_jobs(
    State(state): State<AppState>,
    access: Access,
) -> Result<Json<Vec<Job>>, AppError> {
    access.require_admin()?;
    Ok(Json(state.jobs.list().await?))
}
