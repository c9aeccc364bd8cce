//! Attachment endpoints: upload, download, delete and zip bundling.
//! Bodies are streamed in both directions so files are never buffered whole.

use crate::{
    errors::AppError,
    handlers::parse_id,
    models::attachment::Attachment,
    services::{
        auth::Access,
        bundle::{BundleEntry, zip_stream},
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use std::io;
use tokio_util::io::ReaderStream;

/// Multipart form field carrying the file.
const FILE_FIELD: &str = "file";

/// `POST /share/{id}/attachments`: multipart upload of the `file` field.
pub async fn upload_attachment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    access: Access,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Attachment>, AppError> {
    let id = parse_id(&id)?;
    let mut multipart = multipart.map_err(|err| {
        AppError::bad_request("Request does not contain a valid body").with_detail(err)
    })?;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        AppError::new(err.status(), "Request does not contain a valid body").with_detail(err)
    })? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or(FILE_FIELD).to_string();
        let stream = field.map(|chunk| chunk.map_err(body_error));
        let attachment = state
            .shares
            .upload_attachment(id, &access, &filename, stream)
            .await?;
        return Ok(Json(attachment));
    }

    Err(AppError::bad_request(
        "Request does not contain a valid body (no `file` part)",
    ))
}

/// `GET /share/{id}/attachment/{att}`: stream one file.
pub async fn download_attachment(
    State(state): State<AppState>,
    Path((id, att)): Path<(String, String)>,
    access: Access,
) -> Result<Response, AppError> {
    let (id, att) = (parse_id(&id)?, parse_id(&att)?);
    let (meta, file, len) = state.shares.open_attachment(id, att, &access).await?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    set_disposition(headers, &meta.filename);
    Ok(response)
}

/// `DELETE /share/{id}/attachment/{att}`: admin only.
pub async fn delete_attachment(
    State(state): State<AppState>,
    Path((id, att)): Path<(String, String)>,
    access: Access,
) -> Result<StatusCode, AppError> {
    access.require_admin()?;
    let (id, att) = (parse_id(&id)?, parse_id(&att)?);
    state.shares.delete_attachment(id, att, &access).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /share/{id}/zip`: every attachment in one deflate archive.
pub async fn download_zip(
    State(state): State<AppState>,
    Path(id): Path<String>,
    access: Access,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let (share, entries) = state.shares.bundle_entries(id, &access).await?;
    let entries = entries
        .into_iter()
        .map(|(name, path)| BundleEntry { name, path })
        .collect();

    let mut response = Response::new(Body::from_stream(zip_stream(entries)));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    let base = share.name.clone().unwrap_or_else(|| share.dir_name());
    set_disposition(headers, &format!("{}.zip", base));
    Ok(response)
}

/// Carry the size-limit case through as `FileTooLarge` so it surfaces as 413.
fn body_error(err: MultipartError) -> io::Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        io::Error::new(io::ErrorKind::FileTooLarge, err)
    } else {
        io::Error::other(err)
    }
}

/// `Content-Disposition: attachment` with an ASCII fallback plus the
/// RFC 5987 encoded original name.
fn set_disposition(headers: &mut HeaderMap, filename: &str) {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        percent_encode(filename)
    );
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}
