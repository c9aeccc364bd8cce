//! Share-level endpoints.
//!
//! - `GET    /shares`           list visible shares
//! - `POST   /shares`           open a temporary share
//! - `GET    /share/{id}`       fetch one share with its files
//! - `POST   /share/{id}`       close (finalize) a share
//! - `PUT    /share/{id}`       admin update
//! - `DELETE /share/{id}`       admin delete
//! - `GET    /share/{id}/stats` attachment count and size

use crate::{
    errors::AppError,
    handlers::{parse_body, parse_id},
    models::share::{OpenShareRequest, Share, UpdateShareRequest},
    services::{auth::Access, share_service::ShareStats},
    state::AppState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};

pub async fn list_shares(
    State(state): State<AppState>,
    access: Access,
) -> Result<Json<Vec<Share>>, AppError> {
    Ok(Json(state.shares.list_shares(&access).await?))
}

pub async fn open_share(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Share>, AppError> {
    let req: OpenShareRequest = parse_body(&body)?;
    Ok(Json(state.shares.open_share(req).await?))
}

pub async fn get_share(
    State(state): State<AppState>,
    Path(id): Path<String>,
    access: Access,
) -> Result<Json<Share>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.shares.get_share(id, &access).await?))
}

pub async fn close_share(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Share>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.shares.close_share(id).await?))
}

pub async fn update_share(
    State(state): State<AppState>,
    Path(id): Path<String>,
    access: Access,
    body: Bytes,
) -> Result<Json<Share>, AppError> {
    access.require_admin()?;
    let id = parse_id(&id)?;
    let req: UpdateShareRequest = parse_body(&body)?;
    Ok(Json(state.shares.update_share(id, &access, req).await?))
}

pub async fn delete_share(
    State(state): State<AppState>,
    Path(id): Path<String>,
    access: Access,
) -> Result<StatusCode, AppError> {
    access.require_admin()?;
    let id = parse_id(&id)?;
    state.shares.delete_share(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn share_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
    access: Access,
) -> Result<Json<ShareStats>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.shares.share_stats(id, &access).await?))
}
