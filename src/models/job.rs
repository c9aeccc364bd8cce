//! Background jobs persisted in the `jobs` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Kinds of work the background worker knows how to run.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    #[serde(rename = "share:delete")]
    DeleteShare,
    #[serde(rename = "email:share")]
    ShareEmail,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::DeleteShare => "share:delete",
            JobKind::ShareEmail => "email:share",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "share:delete" => Ok(JobKind::DeleteShare),
            "email:share" => Ok(JobKind::ShareEmail),
            other => Err(format!("unknown job kind `{}`", other)),
        }
    }
}

impl TryFrom<String> for JobKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A queued unit of work.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct Job {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub kind: JobKind,
    pub share_id: Uuid,
    /// Earliest time the worker may run this job.
    pub run_at: DateTime<Utc>,
    /// `pending`, `running` or `failed`.
    pub status: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}
