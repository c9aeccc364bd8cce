//! Represents one uploaded file belonging to a share.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A single uploaded file.
///
/// The row stores metadata only; the bytes live at
/// `<media>/{temp|data}/<share_id>/<id>` depending on the owning share's state.
#[derive(Serialize, Clone, FromRow, Debug, PartialEq)]
pub struct Attachment {
    pub id: Uuid,

    /// Owning share. Implied by the request path, so not serialized.
    #[serde(skip_serializing)]
    pub share_id: Uuid,

    /// Filename as supplied by the uploader.
    pub filename: String,

    /// Number of bytes stored on disk.
    pub filesize: i64,

    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}
