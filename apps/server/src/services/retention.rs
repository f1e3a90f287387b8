//! Retention worker: purges soft-deleted records past the retention
//! window.

use chrono::{Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;

use crate::db::BillStore;
use crate::services::uploads::remove_staging_dir;
use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionStats {
    pub eligible: u64,
    pub deleted: u64,
    pub failed: u64,
}

pub struct RetentionWorker {
    store: Arc<dyn BillStore>,
    uploads_dir: PathBuf,
    retention_days: i64,
    interval: std::time::Duration,
}

impl RetentionWorker {
    pub fn new(
        store: Arc<dyn BillStore>,
        uploads_dir: impl Into<PathBuf>,
        retention_days: i64,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            store,
            uploads_dir: uploads_dir.into(),
            retention_days,
            interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            retention_days = self.retention_days,
            interval_seconds = self.interval.as_secs(),
            "retention worker started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once().await {
                Ok(stats) if stats.eligible > 0 => {
                    tracing::info!(
                        eligible = stats.eligible,
                        deleted = stats.deleted,
                        failed = stats.failed,
                        "retention sweep complete"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "retention sweep failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("retention worker stopped");
    }

    /// One idempotent sweep: hard-delete everything soft-deleted at least
    /// `retention_days` ago. Per-record failures are counted and skipped.
    pub async fn run_once(&self) -> Result<RetentionStats> {
        let cutoff = Utc::now() - Duration::days(self.retention_days.max(0));
        let expired = self.store.expired_soft_deleted(cutoff).await?;

        let mut stats = RetentionStats {
            eligible: expired.len() as u64,
            ..Default::default()
        };
        for upload_id in expired {
            match self.store.hard_delete_upload(&upload_id).await {
                Ok(true) => {
                    remove_staging_dir(&self.uploads_dir.join(&upload_id)).await;
                    tracing::info!(upload_id = %upload_id, "retention purged upload");
                    stats.deleted += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(upload_id = %upload_id, error = %e, "retention purge failed");
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }
}
