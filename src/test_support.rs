//! Fixtures shared by the unit and router tests.

use bytes::Bytes;
use futures::Stream;
use std::{io, sync::Arc};
use tempfile::TempDir;

use crate::{
    db,
    services::{
        job_queue::{JobQueue, SqliteJobQueue, testing::RecordingQueue},
        share_service::ShareService,
    },
    state::AppState,
};

pub const ADMIN_KEY: &str = "testkey123";

/// A share service over an in-memory database and a throwaway media root.
pub struct TestEnv {
    pub service: ShareService,
    pub jobs: SqliteJobQueue,
    _media: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_queue(Arc::new(RecordingQueue::default())).await
    }

    pub async fn with_queue(queue: Arc<dyn JobQueue>) -> Self {
        let pool = Arc::new(db::memory_pool().await.expect("in-memory database"));
        Self::build(pool, Some(queue)).await
    }

    /// Jobs go to the `jobs` table of the same database.
    pub async fn with_sqlite_queue() -> Self {
        let pool = Arc::new(db::memory_pool().await.expect("in-memory database"));
        Self::build(pool, None).await
    }

    async fn build(pool: Arc<sqlx::SqlitePool>, queue: Option<Arc<dyn JobQueue>>) -> Self {
        let media = tempfile::tempdir().expect("tempdir");
        let jobs = SqliteJobQueue::new(pool.clone());
        let queue = queue.unwrap_or_else(|| Arc::new(jobs.clone()));
        let service = ShareService::new(pool, media.path(), queue);
        service.ensure_roots().await.expect("blob roots");
        Self {
            service,
            jobs,
            _media: media,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            shares: self.service.clone(),
            jobs: self.jobs.clone(),
            admin_key: Arc::from(ADMIN_KEY),
        }
    }
}

pub fn body_stream(bytes: &'static [u8]) -> impl Stream<Item = io::Result<Bytes>> {
    futures::stream::iter(vec![Ok(Bytes::from_static(bytes))])
}
