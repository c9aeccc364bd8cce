use crate::services::{job_queue::JobError, share_service::ShareError};
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Challenge sent with every 401 so clients prompt for the share password.
const BASIC_CHALLENGE: &str = r#"Basic realm="Please enter the password""#;

/// HTTP-facing error: a status, a short message and the underlying cause.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub detail: Option<String>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl fmt::Display) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{} - {}", self.message, detail),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "{}", self);
        } else {
            tracing::debug!(status = self.status.as_u16(), "{}", self);
        }

        let body = Json(json!({
            "error": self.message,
            "detail": self.detail,
            "status": self.status.as_u16()
        }));

        let mut response = (self.status, body).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(BASIC_CHALLENGE),
            );
        }
        response
    }
}

impl From<ShareError> for AppError {
    fn from(err: ShareError) -> Self {
        let (status, message) = match &err {
            ShareError::Validation(_) => (StatusCode::BAD_REQUEST, "Invalid request"),
            ShareError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ShareError::Forbidden(_) => (StatusCode::FORBIDDEN, "Forbidden"),
            ShareError::TooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "File too large"),
            ShareError::ShareNotFound(_) | ShareError::AttachmentNotFound(_) => {
                (StatusCode::NOT_FOUND, "Record not found")
            }
            ShareError::AttachmentMismatch => {
                (StatusCode::NOT_FOUND, "Share doesn't match attachment")
            }
            ShareError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Storage failure"),
            ShareError::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Can't access database")
            }
            ShareError::PasswordHash(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Can't process password")
            }
        };
        AppError::new(status, message).with_detail(err)
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        AppError::internal("Can't access job queue").with_detail(err)
    }
}
