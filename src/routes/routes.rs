//! Defines every route of the share API.
//!
//! ## Structure
//! - **Collection endpoints**
//!   - `GET  /shares`         list visible shares
//!   - `POST /shares`         open a temporary share
//!   - `GET  /shares/stats`   admin totals
//!
//! - **Share endpoints**
//!   - `GET    /share/{id}`         share metadata and files
//!   - `POST   /share/{id}`         close (finalize) the share
//!   - `PUT    /share/{id}`         admin update
//!   - `DELETE /share/{id}`         admin delete
//!   - `POST   /share/{id}/attachments`        multipart upload
//!   - `GET    /share/{id}/attachment/{att}`   download one file
//!   - `DELETE /share/{id}/attachment/{att}`   admin delete of one file
//!   - `GET    /share/{id}/zip`     all files as one archive
//!   - `GET    /share/{id}/stats`   per-share counters
//!
//! - **Operations**: `GET /jobs`, `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        admin_handlers::{pending_jobs, stats},
        attachment_handlers::{
            delete_attachment, download_attachment, download_zip, upload_attachment,
        },
        health_handlers::{healthz, readyz},
        share_handlers::{
            close_share, delete_share, get_share, list_shares, open_share, share_stats,
            update_share,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. The caller attaches state and middleware.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/shares", get(list_shares).post(open_share))
        .route("/shares/stats", get(stats))
        .route(
            "/share/{id}",
            get(get_share)
                .post(close_share)
                .put(update_share)
                .delete(delete_share),
        )
        .route("/share/{id}/attachments", post(upload_attachment))
        .route(
            "/share/{id}/attachment/{att}",
            get(download_attachment).delete(delete_attachment),
        )
        .route("/share/{id}/zip", get(download_zip))
        .route("/share/{id}/stats", get(share_stats))
        .route("/jobs", get(pending_jobs))
}
