//! ShareService: the share lifecycle engine.
//!
//! Metadata lives in SQLite, file bytes under two roots below `media_root`:
//!
//! ```text
//! media_root/temp/<share>/<attachment>   share still open for uploads
//! media_root/data/<share>/<attachment>   share closed (finalized)
//! ```
//!
//! `is_temporary` is the single source of truth for which root backs a share.
//! Every operation that touches a share's directory takes that share's lock:
//! uploads and downloads share it, close and delete take it exclusively, so a
//! directory is never moved underneath a writer and the move happens at most
//! once.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut};
use serde::Serialize;
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::RwLock,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    auth::{self, Access},
    job_queue::JobQueue,
};
use crate::models::{
    attachment::Attachment,
    job::JobKind,
    share::{OpenShareRequest, Share, UpdateShareRequest},
};

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("{0}")]
    Validation(String),
    #[error("missing or invalid credentials")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("upload exceeds the size limit: {0}")]
    TooLarge(String),
    #[error("share `{0}` not found")]
    ShareNotFound(Uuid),
    #[error("attachment `{0}` not found")]
    AttachmentNotFound(Uuid),
    #[error("attachment does not belong to this share")]
    AttachmentMismatch,
    #[error(transparent)]
    Storage(#[from] io::Error),
    #[error(transparent)]
    Persistence(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

pub type ShareResult<T> = Result<T, ShareError>;

/// Which of the two blob trees holds a share's files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobRoot {
    Temp,
    Data,
}

impl BlobRoot {
    pub fn of(share: &Share) -> Self {
        if share.is_temporary {
            BlobRoot::Temp
        } else {
            BlobRoot::Data
        }
    }

    fn dir_name(self) -> &'static str {
        match self {
            BlobRoot::Temp => "temp",
            BlobRoot::Data => "data",
        }
    }
}

/// Aggregate counters for `GET /shares/stats`.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Stats {
    pub shares: i64,
    pub temporary_shares: i64,
    pub finalized_shares: i64,
    pub public_shares: i64,
    pub attachments: i64,
    pub total_bytes: i64,
}

/// Per-share counters for `GET /share/{id}/stats`.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ShareStats {
    pub id: Uuid,
    pub attachments: i64,
    pub total_bytes: i64,
}

/// Per-share reader/writer locks, created on demand.
#[derive(Default)]
struct ShareLocks {
    inner: Mutex<HashMap<Uuid, Arc<RwLock<()>>>>,
}

impl ShareLocks {
    fn get(&self, id: Uuid) -> Arc<RwLock<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        // drop locks nobody is holding or waiting on
        map.retain(|key, lock| *key == id || Arc::strong_count(lock) > 1);
        map.entry(id).or_default().clone()
    }
}

#[derive(Clone)]
pub struct ShareService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Directory holding the `temp/` and `data/` trees.
    pub media_root: PathBuf,

    jobs: Arc<dyn JobQueue>,
    locks: Arc<ShareLocks>,
}

const SHARE_COLUMNS: &str = "id, created_at, name, expires, download_limit, is_public, \
                             password, emails, is_temporary";
const ATTACHMENT_COLUMNS: &str = "id, share_id, filename, filesize, created_at";

impl ShareService {
    pub fn new(db: Arc<SqlitePool>, media_root: impl Into<PathBuf>, jobs: Arc<dyn JobQueue>) -> Self {
        Self {
            db,
            media_root: media_root.into(),
            jobs,
            locks: Arc::default(),
        }
    }

    pub fn root_dir(&self, root: BlobRoot) -> PathBuf {
        self.media_root.join(root.dir_name())
    }

    pub fn share_dir(&self, share_id: Uuid, root: BlobRoot) -> PathBuf {
        self.root_dir(root).join(share_id.to_string())
    }

    pub fn blob_path(&self, share_id: Uuid, attachment_id: Uuid, root: BlobRoot) -> PathBuf {
        self.share_dir(share_id, root).join(attachment_id.to_string())
    }

    /// Create both blob roots if missing.
    pub async fn ensure_roots(&self) -> ShareResult<()> {
        fs::create_dir_all(self.root_dir(BlobRoot::Temp)).await?;
        fs::create_dir_all(self.root_dir(BlobRoot::Data)).await?;
        Ok(())
    }

    async fn fetch_share(&self, id: Uuid) -> ShareResult<Share> {
        sqlx::query_as::<_, Share>(&format!("SELECT {SHARE_COLUMNS} FROM shares WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or(ShareError::ShareNotFound(id))
    }

    async fn fetch_attachments(&self, share_id: Uuid) -> ShareResult<Vec<Attachment>> {
        let attachments = sqlx::query_as::<_, Attachment>(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE share_id = ? ORDER BY created_at ASC"
        ))
        .bind(share_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(attachments)
    }

    async fn fetch_attachment(&self, id: Uuid) -> ShareResult<Attachment> {
        sqlx::query_as::<_, Attachment>(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(ShareError::AttachmentNotFound(id))
    }

    /// Load a share with its attachments, without any authorization.
    pub async fn load_share(&self, id: Uuid) -> ShareResult<Share> {
        let mut share = self.fetch_share(id).await?;
        share.attachments = Some(self.fetch_attachments(id).await?);
        Ok(share)
    }

    /// Open a new temporary share and provision its `temp/` directory.
    ///
    /// The row insert and the directory creation succeed or fail together.
    pub async fn open_share(&self, req: OpenShareRequest) -> ShareResult<Share> {
        let password = match req.password.as_deref() {
            Some("") => return Err(ShareError::Validation("password must not be empty".into())),
            Some(plain) => Some(auth::hash_password(plain).await?),
            None => None,
        };

        let share = Share {
            id: req.id.unwrap_or_else(Uuid::new_v4),
            created_at: Utc::now(),
            name: req.name,
            expires: req.expires,
            download_limit: req.download_limit,
            is_public: req.is_public,
            password,
            emails: req.emails,
            is_temporary: true,
            attachments: None,
        };

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO shares (id, created_at, name, expires, download_limit, is_public,
                                 password, emails, is_temporary)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(share.id)
        .bind(share.created_at)
        .bind(&share.name)
        .bind(share.expires)
        .bind(share.download_limit)
        .bind(share.is_public)
        .bind(&share.password)
        .bind(share.emails.to_column())
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ShareError::Validation(format!("share `{}` already exists", share.id))
            } else {
                ShareError::Persistence(err)
            }
        })?;

        // dropping `tx` on error rolls the insert back
        let dir = self.share_dir(share.id, BlobRoot::Temp);
        fs::create_dir_all(&dir).await?;

        if let Err(err) = tx.commit().await {
            remove_dir_quietly(&dir).await;
            return Err(err.into());
        }

        info!(share = %share.id, "share opened");
        Ok(share)
    }

    /// Store one uploaded file in a share.
    ///
    /// Only temporary shares accept uploads unless the caller is the admin, in
    /// which case finalized shares receive the file under `data/`. The file is
    /// streamed to disk before the row is inserted, and removed again when
    /// either step fails, so no row ever points at a partial file.
    pub async fn upload_attachment<S>(
        &self,
        share_id: Uuid,
        access: &Access,
        filename: &str,
        body: S,
    ) -> ShareResult<Attachment>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let filename = sanitize_filename(filename)?;

        let lock = self.locks.get(share_id);
        let _guard = lock.read().await;

        let share = self.fetch_share(share_id).await?;
        if !share.is_temporary && !access.is_admin {
            return Err(ShareError::Forbidden("can't upload to finalized shares".into()));
        }
        let root = BlobRoot::of(&share);

        let mut attachment = Attachment {
            id: Uuid::new_v4(),
            share_id,
            filename,
            filesize: 0,
            created_at: Utc::now(),
        };

        // stream to disk before touching the database
        let path = self.blob_path(share_id, attachment.id, root);
        attachment.filesize = match write_blob(&path, body).await {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&path).await;
                return Err(err);
            }
        };

        let inserted = sqlx::query(
            "INSERT INTO attachments (id, share_id, filename, filesize, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(attachment.id)
        .bind(share_id)
        .bind(&attachment.filename)
        .bind(attachment.filesize)
        .bind(attachment.created_at)
        .execute(&*self.db)
        .await;
        if let Err(err) = inserted {
            let _ = fs::remove_file(&path).await;
            return Err(err.into());
        }

        debug!(
            share = %share_id,
            attachment = %attachment.id,
            bytes = attachment.filesize,
            "attachment stored"
        );
        Ok(attachment)
    }

    /// Finalize a share: move `temp/<id>` to `data/<id>`, then persist the flag.
    ///
    /// Closing a finalized share is a no-op. After a successful transition the
    /// notification job and, when `expires` is set, the expiry job are queued;
    /// failing to queue them does not undo the close.
    pub async fn close_share(&self, share_id: Uuid) -> ShareResult<Share> {
        let lock = self.locks.get(share_id);
        let _guard = lock.write().await;

        let mut share = self.fetch_share(share_id).await?;
        if !share.is_temporary {
            debug!(share = %share_id, "share already closed");
            return Ok(share);
        }

        let from = self.share_dir(share_id, BlobRoot::Temp);
        let to = self.share_dir(share_id, BlobRoot::Data);
        fs::create_dir_all(self.root_dir(BlobRoot::Data)).await?;
        if fs::try_exists(&to).await? {
            return Err(ShareError::Storage(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            )));
        }
        fs::rename(&from, &to).await?;

        let persisted = sqlx::query(
            "UPDATE shares SET is_temporary = 0 WHERE id = ? AND is_temporary = 1",
        )
        .bind(share_id)
        .execute(&*self.db)
        .await;

        let outcome = match persisted {
            Ok(result) if result.rows_affected() == 1 => Ok(()),
            Ok(_) => Err(ShareError::ShareNotFound(share_id)),
            Err(err) => Err(ShareError::Persistence(err)),
        };
        if let Err(err) = outcome {
            if let Err(undo) = fs::rename(&to, &from).await {
                warn!(share = %share_id, error = %undo, "failed to move share back to temp");
            }
            return Err(err);
        }
        share.is_temporary = false;
        info!(share = %share_id, "share closed");

        if let Err(err) = self.jobs.enqueue(JobKind::ShareEmail, share_id, None).await {
            warn!(share = %share_id, error = %err, "can't queue notification");
        }
        if let Some(expires) = share.expires {
            if let Err(err) = self
                .jobs
                .enqueue(JobKind::DeleteShare, share_id, Some(expires))
                .await
            {
                warn!(share = %share_id, error = %err, "can't queue expiry");
            }
        }

        Ok(share)
    }

    /// Delete a share, its attachments (by cascade) and its active directory.
    pub async fn delete_share(&self, share_id: Uuid) -> ShareResult<()> {
        let lock = self.locks.get(share_id);
        let _guard = lock.write().await;

        let share = self.fetch_share(share_id).await?;

        let mut tx = self.db.begin().await?;
        let result = sqlx::query("DELETE FROM shares WHERE id = ?")
            .bind(share_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ShareError::ShareNotFound(share_id));
        }

        let dir = self.share_dir(share_id, BlobRoot::of(&share));
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("share directory {} already missing", dir.display());
            }
            Err(err) => return Err(err.into()),
        }
        tx.commit().await?;

        info!(share = %share_id, "share deleted");
        Ok(())
    }

    /// Shares visible to the caller: everything for the admin, otherwise only
    /// public, finalized shares.
    pub async fn list_shares(&self, access: &Access) -> ShareResult<Vec<Share>> {
        let filter = if access.is_admin {
            ""
        } else {
            " WHERE is_public = 1 AND is_temporary = 0"
        };
        let shares = sqlx::query_as::<_, Share>(&format!(
            "SELECT {SHARE_COLUMNS} FROM shares{filter} ORDER BY created_at DESC"
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(shares)
    }

    /// Fetch one share with its attachments.
    pub async fn get_share(&self, share_id: Uuid, access: &Access) -> ShareResult<Share> {
        let share = self.load_share(share_id).await?;
        access.authorize_read(&share).await?;
        Ok(share)
    }

    /// Admin update of the mutable share fields.
    pub async fn update_share(
        &self,
        share_id: Uuid,
        access: &Access,
        req: UpdateShareRequest,
    ) -> ShareResult<Share> {
        access.require_admin()?;

        let mut share = self.fetch_share(share_id).await?;
        if let Some(name) = req.name {
            share.name = name;
        }
        if let Some(expires) = req.expires {
            share.expires = expires;
        }
        if let Some(limit) = req.download_limit {
            share.download_limit = limit;
        }
        if let Some(is_public) = req.is_public {
            share.is_public = is_public;
        }
        if let Some(emails) = req.emails {
            share.emails = emails;
        }
        match req.password {
            Some(Some(plain)) if plain.is_empty() => {
                return Err(ShareError::Validation("password must not be empty".into()));
            }
            Some(Some(plain)) => share.password = Some(auth::hash_password(&plain).await?),
            Some(None) => share.password = None,
            None => {}
        }

        let result = sqlx::query(
            "UPDATE shares SET name = ?, expires = ?, download_limit = ?, is_public = ?,
                               password = ?, emails = ?
             WHERE id = ?",
        )
        .bind(&share.name)
        .bind(share.expires)
        .bind(share.download_limit)
        .bind(share.is_public)
        .bind(&share.password)
        .bind(share.emails.to_column())
        .bind(share_id)
        .execute(&*self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ShareError::ShareNotFound(share_id));
        }

        share.attachments = Some(self.fetch_attachments(share_id).await?);
        Ok(share)
    }

    /// Resolve an attachment for download and open its bytes.
    ///
    /// The attachment must belong to `share_id`; otherwise it is reported as
    /// missing so ids cannot be probed across shares.
    pub async fn open_attachment(
        &self,
        share_id: Uuid,
        attachment_id: Uuid,
        access: &Access,
    ) -> ShareResult<(Attachment, File, u64)> {
        let attachment = self.fetch_attachment(attachment_id).await?;
        if attachment.share_id != share_id {
            return Err(ShareError::AttachmentMismatch);
        }

        let lock = self.locks.get(share_id);
        let _guard = lock.read().await;

        let share = self.fetch_share(share_id).await?;
        access.authorize_read(&share).await?;

        let path = self.blob_path(share_id, attachment_id, BlobRoot::of(&share));
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ShareError::AttachmentNotFound(attachment_id)
            } else {
                ShareError::Storage(err)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((attachment, file, len))
    }

    /// Resolve a share and the on-disk paths of its attachments for bundling.
    pub async fn bundle_entries(
        &self,
        share_id: Uuid,
        access: &Access,
    ) -> ShareResult<(Share, Vec<(String, PathBuf)>)> {
        let lock = self.locks.get(share_id);
        let _guard = lock.read().await;

        let share = self.get_share(share_id, access).await?;
        let root = BlobRoot::of(&share);
        let entries = share
            .attachments
            .iter()
            .flatten()
            .map(|att| {
                (
                    att.filename.clone(),
                    self.blob_path(share_id, att.id, root),
                )
            })
            .collect();
        Ok((share, entries))
    }

    /// Admin removal of a single attachment and its bytes.
    pub async fn delete_attachment(
        &self,
        share_id: Uuid,
        attachment_id: Uuid,
        access: &Access,
    ) -> ShareResult<()> {
        access.require_admin()?;

        let attachment = self.fetch_attachment(attachment_id).await?;
        if attachment.share_id != share_id {
            return Err(ShareError::AttachmentMismatch);
        }

        let lock = self.locks.get(share_id);
        let _guard = lock.write().await;

        let share = self.fetch_share(share_id).await?;
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM attachments WHERE id = ?")
            .bind(attachment_id)
            .execute(&mut *tx)
            .await?;

        let path = self.blob_path(share_id, attachment_id, BlobRoot::of(&share));
        match fs::remove_file(&path).await {
            Ok(()) => debug!("removed physical file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", path.display());
            }
            Err(err) => return Err(err.into()),
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn stats(&self, access: &Access) -> ShareResult<Stats> {
        access.require_admin()?;

        let (shares, temporary_shares, public_shares): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*),
                    COALESCE(SUM(is_temporary), 0),
                    COALESCE(SUM(CASE WHEN is_public = 1 AND is_temporary = 0 THEN 1 ELSE 0 END), 0)
             FROM shares",
        )
        .fetch_one(&*self.db)
        .await?;
        let (attachments, total_bytes): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(filesize), 0) FROM attachments")
                .fetch_one(&*self.db)
                .await?;

        Ok(Stats {
            shares,
            temporary_shares,
            finalized_shares: shares - temporary_shares,
            public_shares,
            attachments,
            total_bytes,
        })
    }

    pub async fn share_stats(&self, share_id: Uuid, access: &Access) -> ShareResult<ShareStats> {
        let share = self.fetch_share(share_id).await?;
        access.authorize_read(&share).await?;

        let (attachments, total_bytes): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(filesize), 0) FROM attachments WHERE share_id = ?",
        )
        .bind(share_id)
        .fetch_one(&*self.db)
        .await?;

        Ok(ShareStats {
            id: share_id,
            attachments,
            total_bytes,
        })
    }

    /// Delete temporary shares created before `cutoff`. Returns how many went.
    pub async fn purge_stale_temporary(&self, cutoff: DateTime<Utc>) -> ShareResult<usize> {
        let stale: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM shares WHERE is_temporary = 1 AND created_at < ?",
        )
        .bind(cutoff)
        .fetch_all(&*self.db)
        .await?;

        let mut purged = 0;
        for id in stale {
            match self.delete_share(id).await {
                Ok(()) => purged += 1,
                // closed or deleted since the query
                Err(ShareError::ShareNotFound(_)) => {}
                Err(err) => warn!(share = %id, error = %err, "failed to purge temporary share"),
            }
        }
        Ok(purged)
    }
}

async fn write_blob<S>(path: &Path, body: S) -> ShareResult<i64>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut file = File::create(path).await?;
    let mut written: i64 = 0;
    pin_mut!(body);
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| match err.kind() {
            ErrorKind::FileTooLarge => ShareError::TooLarge(err.to_string()),
            _ => ShareError::Validation(format!("upload body interrupted: {}", err)),
        })?;
        file.write_all(&chunk).await?;
        written += chunk.len() as i64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

async fn remove_dir_quietly(dir: &Path) {
    if let Err(err) = fs::remove_dir_all(dir).await {
        if err.kind() != ErrorKind::NotFound {
            warn!("failed to remove {} after rollback: {}", dir.display(), err);
        }
    }
}

/// Keep only the final path component of an uploaded filename.
fn sanitize_filename(raw: &str) -> ShareResult<String> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." || name.bytes().any(|b| b.is_ascii_control()) {
        return Err(ShareError::Validation(format!("invalid filename `{}`", raw)));
    }
    Ok(name.to_string())
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::share::EmailList,
        services::job_queue::testing::RecordingQueue,
        test_support::{TestEnv, body_stream},
    };
    use chrono::Duration;

    fn open_req() -> OpenShareRequest {
        OpenShareRequest {
            name: Some("X".into()),
            ..Default::default()
        }
    }

    async fn closed_share(env: &TestEnv, req: OpenShareRequest) -> Share {
        let share = env.service.open_share(req).await.unwrap();
        env.service.close_share(share.id).await.unwrap()
    }

    #[tokio::test]
    async fn open_share_is_temporary_with_temp_dir() {
        let env = TestEnv::new().await;
        let share = env.service.open_share(open_req()).await.unwrap();

        assert!(share.is_temporary);
        assert!(env.service.share_dir(share.id, BlobRoot::Temp).is_dir());
        assert!(!env.service.share_dir(share.id, BlobRoot::Data).exists());
    }

    #[tokio::test]
    async fn open_share_hashes_password_and_keeps_supplied_id() {
        let env = TestEnv::new().await;
        let id = Uuid::new_v4();
        let share = env
            .service
            .open_share(OpenShareRequest {
                id: Some(id),
                password: Some("secret".into()),
                emails: EmailList::from(vec!["a@example.com".to_string()]),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(share.id, id);
        let stored = env.service.load_share(id).await.unwrap();
        let hash = stored.password.unwrap();
        assert_ne!(hash, "secret");
        assert!(auth::verify_password("secret", &hash).await);
        assert_eq!(stored.emails.0, vec!["a@example.com".to_string()]);
    }

    #[tokio::test]
    async fn open_share_rejects_duplicate_id_and_empty_password() {
        let env = TestEnv::new().await;
        let id = Uuid::new_v4();
        let req = || OpenShareRequest {
            id: Some(id),
            ..Default::default()
        };
        env.service.open_share(req()).await.unwrap();
        assert!(matches!(
            env.service.open_share(req()).await,
            Err(ShareError::Validation(_))
        ));
        assert!(matches!(
            env.service
                .open_share(OpenShareRequest {
                    password: Some(String::new()),
                    ..Default::default()
                })
                .await,
            Err(ShareError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn open_share_rolls_back_when_directory_cannot_be_created() {
        let env = TestEnv::new().await;
        // a plain file where the temp root should be makes mkdir fail
        std::fs::remove_dir_all(env.service.root_dir(BlobRoot::Temp)).unwrap();
        std::fs::write(env.service.root_dir(BlobRoot::Temp), b"blocker").unwrap();

        let result = env.service.open_share(open_req()).await;
        assert!(matches!(result, Err(ShareError::Storage(_))));
        assert!(env.service.list_shares(&Access::admin()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_writes_bytes_under_temp() {
        let env = TestEnv::new().await;
        let share = env.service.open_share(open_req()).await.unwrap();

        let att = env
            .service
            .upload_attachment(share.id, &Access::default(), "notes.txt", body_stream(b"hello"))
            .await
            .unwrap();

        assert_eq!(att.filesize, 5);
        assert_eq!(att.filename, "notes.txt");
        let path = env.service.blob_path(share.id, att.id, BlobRoot::Temp);
        assert_eq!(std::fs::read(path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn upload_strips_directories_from_filename() {
        let env = TestEnv::new().await;
        let share = env.service.open_share(open_req()).await.unwrap();
        let att = env
            .service
            .upload_attachment(share.id, &Access::default(), "../../etc/passwd", body_stream(b"x"))
            .await
            .unwrap();
        assert_eq!(att.filename, "passwd");
    }

    #[tokio::test]
    async fn upload_to_unknown_share_is_not_found() {
        let env = TestEnv::new().await;
        let result = env
            .service
            .upload_attachment(Uuid::new_v4(), &Access::default(), "a", body_stream(b"x"))
            .await;
        assert!(matches!(result, Err(ShareError::ShareNotFound(_))));
    }

    #[tokio::test]
    async fn upload_to_finalized_share_is_forbidden_except_for_admin() {
        let env = TestEnv::new().await;
        let share = closed_share(&env, open_req()).await;

        let result = env
            .service
            .upload_attachment(share.id, &Access::default(), "late.txt", body_stream(b"x"))
            .await;
        assert!(matches!(result, Err(ShareError::Forbidden(_))));

        let att = env
            .service
            .upload_attachment(share.id, &Access::admin(), "late.txt", body_stream(b"admin"))
            .await
            .unwrap();
        let path = env.service.blob_path(share.id, att.id, BlobRoot::Data);
        assert_eq!(std::fs::read(path).unwrap(), b"admin");
    }

    #[tokio::test]
    async fn failed_upload_leaves_no_row_or_file() {
        let env = TestEnv::new().await;
        let share = env.service.open_share(open_req()).await.unwrap();

        let broken = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"part")),
            Err(io::Error::other("connection reset")),
        ]);
        let result = env
            .service
            .upload_attachment(share.id, &Access::default(), "a.bin", broken)
            .await;
        assert!(matches!(result, Err(ShareError::Validation(_))));

        let loaded = env.service.load_share(share.id).await.unwrap();
        assert!(loaded.attachments.unwrap().is_empty());
        let dir = env.service.share_dir(share.id, BlobRoot::Temp);
        assert_eq!(std::fs::read_dir(dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn oversized_upload_is_too_large_and_leaves_nothing() {
        let env = TestEnv::new().await;
        let share = env.service.open_share(open_req()).await.unwrap();

        let capped = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"first chunk")),
            Err(io::Error::new(ErrorKind::FileTooLarge, "length limit exceeded")),
        ]);
        let result = env
            .service
            .upload_attachment(share.id, &Access::default(), "big.iso", capped)
            .await;
        assert!(matches!(result, Err(ShareError::TooLarge(_))));

        let loaded = env.service.load_share(share.id).await.unwrap();
        assert!(loaded.attachments.unwrap().is_empty());
        let dir = env.service.share_dir(share.id, BlobRoot::Temp);
        assert_eq!(std::fs::read_dir(dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn slow_upload_does_not_block_other_writers() {
        // the test pool has a single connection, so holding it while the
        // body trickles in would stall every other query
        let env = TestEnv::new().await;
        let share = env.service.open_share(open_req()).await.unwrap();

        let (started_tx, started) = tokio::sync::oneshot::channel::<()>();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let body = futures::stream::once(async move {
            let _ = started_tx.send(());
            Ok::<_, io::Error>(Bytes::from_static(b"head-"))
        })
        .chain(futures::stream::once(async move {
            let _ = gate.await;
            Ok::<_, io::Error>(Bytes::from_static(b"tail"))
        }));
        let service = env.service.clone();
        let upload = tokio::spawn(async move {
            service
                .upload_attachment(share.id, &Access::default(), "slow.bin", body)
                .await
        });
        started.await.unwrap();

        let other = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            env.service.open_share(OpenShareRequest::default()),
        )
        .await
        .expect("open_share blocked by an in-flight upload")
        .unwrap();
        assert!(other.is_temporary);

        release.send(()).unwrap();
        let att = upload.await.unwrap().unwrap();
        assert_eq!(att.filesize, 9);
        let loaded = env.service.load_share(share.id).await.unwrap();
        let stored = loaded.attachments.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, att.id);
        assert_eq!(stored[0].filesize, 9);
    }

    #[tokio::test]
    async fn close_moves_directory_and_schedules_jobs() {
        let queue = Arc::new(RecordingQueue::default());
        let env = TestEnv::with_queue(queue.clone()).await;
        let expires = Utc::now() + Duration::days(7);
        let share = env
            .service
            .open_share(OpenShareRequest {
                expires: Some(expires),
                ..open_req()
            })
            .await
            .unwrap();
        let att = env
            .service
            .upload_attachment(share.id, &Access::default(), "a.txt", body_stream(b"abc"))
            .await
            .unwrap();

        let closed = env.service.close_share(share.id).await.unwrap();

        assert!(!closed.is_temporary);
        assert!(!env.service.share_dir(share.id, BlobRoot::Temp).exists());
        assert!(env.service.blob_path(share.id, att.id, BlobRoot::Data).is_file());
        assert!(!env.service.load_share(share.id).await.unwrap().is_temporary);
        assert_eq!(
            queue.recorded(),
            vec![
                (JobKind::ShareEmail, share.id, None),
                (JobKind::DeleteShare, share.id, Some(expires)),
            ]
        );
    }

    #[tokio::test]
    async fn closing_twice_is_a_no_op() {
        let queue = Arc::new(RecordingQueue::default());
        let env = TestEnv::with_queue(queue.clone()).await;
        let share = closed_share(&env, open_req()).await;
        assert_eq!(queue.recorded().len(), 1);

        let again = env.service.close_share(share.id).await.unwrap();
        assert!(!again.is_temporary);
        assert_eq!(queue.recorded().len(), 1);
        assert!(env.service.share_dir(share.id, BlobRoot::Data).is_dir());
    }

    #[tokio::test]
    async fn concurrent_closes_move_once() {
        let queue = Arc::new(RecordingQueue::default());
        let env = TestEnv::with_queue(queue.clone()).await;
        let share = env.service.open_share(open_req()).await.unwrap();

        let (a, b) = tokio::join!(
            env.service.close_share(share.id),
            env.service.close_share(share.id)
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(queue.recorded().len(), 1);
    }

    #[tokio::test]
    async fn close_unknown_share_is_not_found() {
        let env = TestEnv::new().await;
        assert!(matches!(
            env.service.close_share(Uuid::new_v4()).await,
            Err(ShareError::ShareNotFound(_))
        ));
    }

    #[tokio::test]
    async fn close_keeps_share_temporary_when_move_fails() {
        let env = TestEnv::new().await;
        let share = env.service.open_share(open_req()).await.unwrap();
        std::fs::remove_dir_all(env.service.share_dir(share.id, BlobRoot::Temp)).unwrap();

        let result = env.service.close_share(share.id).await;
        assert!(matches!(result, Err(ShareError::Storage(_))));
        assert!(env.service.load_share(share.id).await.unwrap().is_temporary);
    }

    #[tokio::test]
    async fn delete_cascades_and_removes_directory() {
        let env = TestEnv::new().await;
        let share = env.service.open_share(open_req()).await.unwrap();
        let att = env
            .service
            .upload_attachment(share.id, &Access::default(), "a.txt", body_stream(b"abc"))
            .await
            .unwrap();
        env.service.close_share(share.id).await.unwrap();

        env.service.delete_share(share.id).await.unwrap();

        assert!(!env.service.share_dir(share.id, BlobRoot::Data).exists());
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attachments")
            .fetch_one(&*env.service.db)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
        assert!(matches!(
            env.service
                .open_attachment(share.id, att.id, &Access::admin())
                .await,
            Err(ShareError::AttachmentNotFound(_))
        ));
        assert!(matches!(
            env.service.delete_share(share.id).await,
            Err(ShareError::ShareNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_temporary_share_removes_temp_dir() {
        let env = TestEnv::new().await;
        let share = env.service.open_share(open_req()).await.unwrap();
        env.service.delete_share(share.id).await.unwrap();
        assert!(!env.service.share_dir(share.id, BlobRoot::Temp).exists());
    }

    #[tokio::test]
    async fn listing_hides_private_and_temporary_shares_from_non_admins() {
        let env = TestEnv::new().await;
        let public = closed_share(
            &env,
            OpenShareRequest {
                is_public: true,
                ..open_req()
            },
        )
        .await;
        closed_share(&env, open_req()).await;
        env.service
            .open_share(OpenShareRequest {
                is_public: true,
                ..open_req()
            })
            .await
            .unwrap();

        let visible = env.service.list_shares(&Access::default()).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, public.id);
        assert!(visible.iter().all(|s| s.is_public && !s.is_temporary));

        let all = env.service.list_shares(&Access::admin()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn fetching_temporary_share_requires_admin() {
        let env = TestEnv::new().await;
        let share = env.service.open_share(open_req()).await.unwrap();

        assert!(matches!(
            env.service.get_share(share.id, &Access::default()).await,
            Err(ShareError::Forbidden(_))
        ));
        let fetched = env.service.get_share(share.id, &Access::admin()).await.unwrap();
        assert_eq!(fetched.id, share.id);
    }

    #[tokio::test]
    async fn password_protected_share_needs_basic_credentials() {
        let env = TestEnv::new().await;
        let share = closed_share(
            &env,
            OpenShareRequest {
                password: Some("secret".into()),
                ..open_req()
            },
        )
        .await;
        let id = share.id.to_string();

        assert!(matches!(
            env.service.get_share(share.id, &Access::default()).await,
            Err(ShareError::Unauthorized)
        ));
        assert!(matches!(
            env.service
                .get_share(share.id, &Access::basic(Uuid::new_v4().to_string(), "secret"))
                .await,
            Err(ShareError::Unauthorized)
        ));
        assert!(matches!(
            env.service.get_share(share.id, &Access::basic(&id, "nope")).await,
            Err(ShareError::Unauthorized)
        ));
        assert!(env
            .service
            .get_share(share.id, &Access::basic(&id, "secret"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn attachment_from_other_share_is_not_found() {
        let env = TestEnv::new().await;
        let first = env.service.open_share(open_req()).await.unwrap();
        let att = env
            .service
            .upload_attachment(first.id, &Access::default(), "a.txt", body_stream(b"abc"))
            .await
            .unwrap();
        env.service.close_share(first.id).await.unwrap();
        let second = closed_share(&env, open_req()).await;

        assert!(matches!(
            env.service
                .open_attachment(second.id, att.id, &Access::default())
                .await,
            Err(ShareError::AttachmentMismatch)
        ));
    }

    #[tokio::test]
    async fn update_share_applies_partial_changes() {
        let env = TestEnv::new().await;
        let share = closed_share(
            &env,
            OpenShareRequest {
                password: Some("old".into()),
                download_limit: Some(3),
                ..open_req()
            },
        )
        .await;

        let req: UpdateShareRequest = serde_json::from_str(
            r#"{"name": "renamed", "download_limit": null, "password": "new", "is_public": true}"#,
        )
        .unwrap();
        assert!(matches!(
            env.service
                .update_share(share.id, &Access::default(), Default::default())
                .await,
            Err(ShareError::Unauthorized)
        ));
        let updated = env
            .service
            .update_share(share.id, &Access::admin(), req)
            .await
            .unwrap();

        assert_eq!(updated.name.as_deref(), Some("renamed"));
        assert_eq!(updated.download_limit, None);
        assert!(updated.is_public);
        assert!(!updated.is_temporary);
        let stored = env.service.load_share(share.id).await.unwrap();
        assert!(auth::verify_password("new", stored.password.as_deref().unwrap()).await);
    }

    #[tokio::test]
    async fn delete_attachment_removes_row_and_file() {
        let env = TestEnv::new().await;
        let share = env.service.open_share(open_req()).await.unwrap();
        let att = env
            .service
            .upload_attachment(share.id, &Access::default(), "a.txt", body_stream(b"abc"))
            .await
            .unwrap();

        assert!(matches!(
            env.service
                .delete_attachment(share.id, att.id, &Access::default())
                .await,
            Err(ShareError::Unauthorized)
        ));
        env.service
            .delete_attachment(share.id, att.id, &Access::admin())
            .await
            .unwrap();

        assert!(!env.service.blob_path(share.id, att.id, BlobRoot::Temp).exists());
        let loaded = env.service.load_share(share.id).await.unwrap();
        assert!(loaded.attachments.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stats_count_shares_and_bytes() {
        let env = TestEnv::new().await;
        let share = env
            .service
            .open_share(OpenShareRequest {
                is_public: true,
                ..open_req()
            })
            .await
            .unwrap();
        env.service
            .upload_attachment(share.id, &Access::default(), "a", body_stream(b"1234"))
            .await
            .unwrap();
        env.service.close_share(share.id).await.unwrap();
        env.service.open_share(open_req()).await.unwrap();

        let stats = env.service.stats(&Access::admin()).await.unwrap();
        assert_eq!(
            stats,
            Stats {
                shares: 2,
                temporary_shares: 1,
                finalized_shares: 1,
                public_shares: 1,
                attachments: 1,
                total_bytes: 4,
            }
        );
        let per_share = env
            .service
            .share_stats(share.id, &Access::default())
            .await
            .unwrap();
        assert_eq!(per_share.attachments, 1);
        assert_eq!(per_share.total_bytes, 4);
    }

    #[tokio::test]
    async fn purge_removes_only_old_temporary_shares() {
        let env = TestEnv::new().await;
        let open = env.service.open_share(open_req()).await.unwrap();
        let closed = closed_share(&env, open_req()).await;

        let purged = env
            .service
            .purge_stale_temporary(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(purged, 1);
        assert!(matches!(
            env.service.load_share(open.id).await,
            Err(ShareError::ShareNotFound(_))
        ));
        assert!(env.service.load_share(closed.id).await.is_ok());
    }

    #[test]
    fn filenames_are_reduced_to_their_last_component() {
        assert_eq!(sanitize_filename("a/b/c.txt").unwrap(), "c.txt");
        assert_eq!(sanitize_filename("C:\\docs\\report.pdf").unwrap(), "report.pdf");
        assert!(sanitize_filename("dir/").is_err());
        assert!(sanitize_filename("..").is_err());
    }
}
