//! HTTP handlers. Each one parses the request, derives the caller's
//! [`Access`](crate::services::auth::Access) and delegates to the share engine.

pub mod admin_handlers;
pub mod attachment_handlers;
pub mod health_handlers;
pub mod share_handlers;

use crate::errors::AppError;
use uuid::Uuid;

/// Parse a UUID path segment.
pub(crate) fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw)
        .map_err(|err| AppError::bad_request("invalid URL param").with_detail(err))
}

/// Decode a JSON request body into `T`.
pub(crate) fn parse_body<'a, T: serde::Deserialize<'a>>(body: &'a [u8]) -> Result<T, AppError> {
    serde_json::from_slice(body)
        .map_err(|err| AppError::bad_request("Can't parse body").with_detail(err))
}
