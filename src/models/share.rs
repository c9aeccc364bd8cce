//! Represents a share: a named bundle of files awaiting or having completed delivery.

use super::attachment::Attachment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::FromRow;
use std::convert::Infallible;
use uuid::Uuid;

/// Separator used to store recipient addresses in a single column.
const EMAIL_SEPARATOR: char = ';';

/// A share and, when loaded, its attachments.
///
/// A share starts out temporary (open for uploads, invisible to recipients)
/// and becomes permanent once closed. The temporary flag decides which blob
/// root (`temp/` or `data/`) backs the share.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct Share {
    pub id: Uuid,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// When set, the share is deleted at this time after being closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_limit: Option<i64>,

    pub is_public: bool,

    /// Argon2 PHC string. Never leaves the server.
    #[serde(rename = "is_protected", serialize_with = "serialize_is_set")]
    pub password: Option<String>,

    #[sqlx(try_from = "String")]
    pub emails: EmailList,

    pub is_temporary: bool,

    #[sqlx(skip)]
    #[serde(rename = "files", skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

impl Share {
    /// Directory name shared by both blob roots.
    pub fn dir_name(&self) -> String {
        self.id.to_string()
    }
}

fn serialize_is_set<S: Serializer>(value: &Option<String>, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_bool(value.is_some())
}

/// Recipient addresses, persisted as a `;`-joined string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmailList(pub Vec<String>);

impl EmailList {
    pub fn to_column(&self) -> String {
        self.0.join(&EMAIL_SEPARATOR.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl From<Vec<String>> for EmailList {
    fn from(addresses: Vec<String>) -> Self {
        Self(
            addresses
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
        )
    }
}

impl TryFrom<String> for EmailList {
    type Error = Infallible;

    fn try_from(column: String) -> Result<Self, Self::Error> {
        Ok(column
            .split(EMAIL_SEPARATOR)
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into())
    }
}

impl Serialize for EmailList {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(ser)
    }
}

impl<'de> Deserialize<'de> for EmailList {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        Vec::<String>::deserialize(de).map(Into::into)
    }
}

/// Body of `POST /shares`.
///
/// Unknown fields (including any `files` list or `is_temporary` flag) are
/// ignored: a freshly opened share never carries attachments and is always
/// temporary.
#[derive(Deserialize, Debug, Default)]
pub struct OpenShareRequest {
    pub id: Option<Uuid>,
    pub name: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub download_limit: Option<i64>,
    #[serde(default)]
    pub is_public: bool,
    pub password: Option<String>,
    #[serde(default)]
    pub emails: EmailList,
}

/// Body of `PUT /share/{id}`.
///
/// For nullable fields an absent key leaves the value unchanged while an
/// explicit `null` clears it.
#[derive(Deserialize, Debug, Default)]
pub struct UpdateShareRequest {
    #[serde(default, deserialize_with = "double_option")]
    pub name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub expires: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub download_limit: Option<Option<i64>>,
    pub is_public: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub password: Option<Option<String>>,
    pub emails: Option<EmailList>,
}

fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}
