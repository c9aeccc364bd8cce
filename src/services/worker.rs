//! Background worker: runs due jobs and purges abandoned temporary shares.

use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::{
    job_queue::SqliteJobQueue,
    notifier::Notifier,
    share_service::{ShareError, ShareService},
};
use crate::models::job::{Job, JobKind};

/// Jobs handled per poll.
const BATCH_SIZE: i64 = 16;

pub struct JobWorker {
    queue: SqliteJobQueue,
    shares: ShareService,
    notifier: Arc<dyn Notifier>,
    poll_interval: Duration,
    temp_share_ttl: Option<Duration>,
}

impl JobWorker {
    pub fn new(
        queue: SqliteJobQueue,
        shares: ShareService,
        notifier: Arc<dyn Notifier>,
        poll_interval: Duration,
        temp_share_ttl: Option<Duration>,
    ) -> Self {
        Self {
            queue,
            shares,
            notifier,
            poll_interval,
            temp_share_ttl,
        }
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Job worker started"
        );

        match self.queue.requeue_stalled().await {
            Ok(0) => {}
            Ok(n) => info!(requeued = n, "Job worker: requeued interrupted jobs"),
            Err(e) => warn!(error = %e, "Job worker: failed to requeue interrupted jobs"),
        }

        loop {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Job worker stopped");
    }

    /// One polling round.
    pub async fn tick(&self) {
        match self.queue.due(Utc::now(), BATCH_SIZE).await {
            Ok(jobs) => {
                for job in jobs {
                    self.process(job).await;
                }
            }
            Err(e) => warn!(error = %e, "Job worker: failed to fetch due jobs"),
        }

        if let Some(ttl) = self.temp_share_ttl {
            let Ok(ttl) = chrono::Duration::from_std(ttl) else {
                return;
            };
            match self.shares.purge_stale_temporary(Utc::now() - ttl).await {
                Ok(0) => trace!("Purge: no stale temporary shares"),
                Ok(n) => info!(purged = n, "Purge: removed stale temporary shares"),
                Err(e) => warn!(error = %e, "Purge: failed to remove stale temporary shares"),
            }
        }
    }

    async fn process(&self, job: Job) {
        match self.queue.claim(job.id).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(job = %job.id, error = %e, "Job worker: failed to claim job");
                return;
            }
        }

        let result = match job.kind {
            JobKind::DeleteShare => self.delete_share(&job).await,
            JobKind::ShareEmail => self.send_share_email(&job).await,
        };

        let bookkeeping = match result {
            Ok(()) => {
                debug!(job = %job.id, kind = %job.kind, share = %job.share_id, "job done");
                self.queue.complete(job.id).await
            }
            Err(reason) => {
                warn!(job = %job.id, kind = %job.kind, error = %reason, "job failed");
                self.queue.fail(&job, &reason).await
            }
        };
        if let Err(e) = bookkeeping {
            warn!(job = %job.id, error = %e, "Job worker: failed to update job");
        }
    }

    async fn delete_share(&self, job: &Job) -> Result<(), String> {
        match self.shares.delete_share(job.share_id).await {
            Ok(()) => Ok(()),
            // an admin or an earlier run got there first
            Err(ShareError::ShareNotFound(_)) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn send_share_email(&self, job: &Job) -> Result<(), String> {
        let share = match self.shares.load_share(job.share_id).await {
            Ok(share) => share,
            Err(ShareError::ShareNotFound(_)) => return Ok(()),
            Err(e) => return Err(e.to_string()),
        };
        if share.is_temporary {
            return Err("share is not finalized".into());
        }
        if share.emails.is_empty() {
            return Ok(());
        }
        self.notifier
            .notify_share(&share)
            .await
            .map_err(|e| e.to_string())
    }
}
