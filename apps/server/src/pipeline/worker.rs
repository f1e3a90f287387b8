//! Single-flight upload worker.
//!
//! One loop per process: reconcile the queue on an interval, claim the next
//! pending job, run OCR, extraction, and verification, and always clean up
//! the staging directory. Any step failing marks the job FAILED; the loop
//! itself never dies.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};

use crate::db::BillStore;
use crate::models::UploadRecord;
use crate::pipeline::extract::extract_bill;
use crate::pipeline::ocr::OcrEngine;
use crate::services::uploads::remove_staging_dir;
use crate::services::verification::VerificationService;
use crate::Result;

pub struct UploadWorker {
    store: Arc<dyn BillStore>,
    ocr: Arc<dyn OcrEngine>,
    verification: Arc<VerificationService>,
    uploads_dir: PathBuf,
    reconcile_interval: Duration,
    wake: Arc<Notify>,
}

impl UploadWorker {
    pub fn new(
        store: Arc<dyn BillStore>,
        ocr: Arc<dyn OcrEngine>,
        verification: Arc<VerificationService>,
        uploads_dir: impl Into<PathBuf>,
        reconcile_interval: Duration,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            ocr,
            verification,
            uploads_dir: uploads_dir.into(),
            reconcile_interval,
            wake,
        }
    }

    /// Run until the shutdown signal flips. Claims one job at a time; idle
    /// sleep is interrupted by the wake event from new enqueues.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("upload worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.store.reconcile_queue_state().await {
                // Lease management errors are absorbed; the loop continues.
                tracing::error!(error = %e, "queue reconciliation failed");
            }

            match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(error = %e, "claim failed, backing off");
                }
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.reconcile_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("upload worker stopped");
    }

    /// Claim and process at most one job. Returns whether a job was
    /// claimed. Exposed for deterministic tests.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(record) = self.store.claim_next_pending_job().await? else {
            return Ok(false);
        };
        self.process_claimed(&record).await;
        Ok(true)
    }

    async fn process_claimed(&self, record: &UploadRecord) {
        let upload_id = record.upload_id.as_str();
        let staging_dir = self.uploads_dir.join(upload_id);
        let pdf_path = staging_dir.join("original.pdf");
        tracing::info!(upload_id, "processing bill");

        let outcome = self.process_bill(record, &pdf_path).await;
        if let Err(e) = outcome {
            let _ = self.store.mark_failed(upload_id, &e.to_string()).await;
        }

        // Staged PDF and derived page images go away on success and
        // failure alike.
        remove_staging_dir(&staging_dir).await;
    }

    async fn process_bill(&self, record: &UploadRecord, pdf_path: &std::path::Path) -> Result<()> {
        let upload_id = record.upload_id.as_str();

        let pages = self.ocr.extract_text(pdf_path).await?;
        let bill = extract_bill(&pages)?;
        for warning in &bill.extraction_warnings {
            tracing::warn!(upload_id, warning = %warning, "extraction warning");
        }

        self.store.complete_bill(upload_id, bill).await?;

        if let Err(e) = self.verification.verify_and_store(upload_id).await {
            // Extraction stands even when verification fails; the failure
            // lives in the verification sub-state.
            tracing::warn!(upload_id, error = %e, "verification failed");
        }
        Ok(())
    }
}
