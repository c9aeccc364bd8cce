//! Shared state handed to every handler.

use axum::{extract::FromRequestParts, http::request::Parts};
use std::{convert::Infallible, sync::Arc};

use crate::services::{auth::Access, job_queue::SqliteJobQueue, share_service::ShareService};

#[derive(Clone)]
pub struct AppState {
    pub shares: ShareService,
    pub jobs: SqliteJobQueue,
    pub admin_key: Arc<str>,
}

impl FromRequestParts<AppState> for Access {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Access::from_headers(&parts.headers, &state.admin_key))
    }
}
