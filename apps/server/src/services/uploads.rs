//! Upload acceptance and record-facing operations.
//!
//! The acceptance path is synchronous to the caller: validate, compute the
//! ingestion request id, insert (or find) the record, stage the PDF bytes,
//! enqueue, and wake the worker. Everything heavy happens later in the
//! worker loop.

use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Notify;

use beleg_catalog::text::slugify;
use beleg_catalog::{CatalogService, HospitalSummary};

use crate::db::BillStore;
use crate::models::{
    BillCategory, LineItemEdit, ListFilter, NewUpload, ProcessingStage, UploadRecord,
    UploadStatus, VerificationStatus,
};
use crate::services::verification::apply_edits;
use crate::{Error, Result};

static UPLOAD_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{32}$").unwrap());
static EMPLOYEE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{8}$").unwrap());

/// Accept canonical UUIDs and 32-char hex ids.
pub fn validate_upload_id(upload_id: &str) -> Result<()> {
    if UPLOAD_ID_RE.is_match(upload_id) || uuid::Uuid::parse_str(upload_id).is_ok() {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("malformed upload id: {upload_id}")))
    }
}

#[derive(Debug, Clone)]
pub struct SubmitUpload {
    pub bytes: Vec<u8>,
    pub employee_id: String,
    pub hospital_name: String,
    pub original_filename: String,
    pub client_request_id: Option<String>,
    /// ISO date (`YYYY-MM-DD`).
    pub invoice_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadAccepted {
    pub upload_id: String,
    pub employee_id: String,
    pub hospital_name: String,
    pub status: UploadStatus,
    pub queue_position: Option<i32>,
    pub original_filename: String,
    pub file_size_bytes: i64,
    pub page_count: Option<u32>,
    /// True when this request matched an already-ingested upload.
    pub existing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub upload_id: String,
    pub status: UploadStatus,
    pub verification_status: VerificationStatus,
    pub processing_stage: ProcessingStage,
    pub queue_position: Option<i32>,
    pub page_count: Option<u32>,
    pub error_message: Option<String>,
    pub updated_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteAudit {
    pub upload_id: String,
    pub permanent: bool,
    pub deleted_at: chrono::DateTime<Utc>,
}

pub struct UploadService {
    store: Arc<dyn BillStore>,
    catalog: Arc<CatalogService>,
    uploads_dir: PathBuf,
    wake: Arc<Notify>,
}

impl UploadService {
    pub fn new(
        store: Arc<dyn BillStore>,
        catalog: Arc<CatalogService>,
        uploads_dir: impl Into<PathBuf>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            catalog,
            uploads_dir: uploads_dir.into(),
            wake,
        }
    }

    /// Private staging directory for one upload.
    pub fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.uploads_dir.join(upload_id)
    }

    pub fn staged_pdf_path(&self, upload_id: &str) -> PathBuf {
        self.upload_dir(upload_id).join("original.pdf")
    }

    fn validate(&self, submit: &SubmitUpload) -> Result<Option<NaiveDate>> {
        if !submit
            .original_filename
            .to_lowercase()
            .ends_with(".pdf")
        {
            return Err(Error::InvalidInput(
                "invalid file type, only PDF files are accepted".into(),
            ));
        }
        if submit.bytes.is_empty() {
            return Err(Error::InvalidInput("uploaded PDF is empty".into()));
        }
        if submit.hospital_name.trim().is_empty() {
            return Err(Error::InvalidInput("hospital_name is required".into()));
        }
        if !EMPLOYEE_ID_RE.is_match(submit.employee_id.trim()) {
            return Err(Error::InvalidInput(
                "employee_id must contain exactly 8 digits".into(),
            ));
        }
        // Unknown hospitals are rejected up front so the worker never
        // claims a job it cannot verify.
        let catalog = self.catalog.snapshot();
        if catalog.indices_for(submit.hospital_name.trim()).is_err() {
            return Err(Error::InvalidInput(format!(
                "no tie-up rate sheet for hospital: {}",
                submit.hospital_name.trim()
            )));
        }

        submit
            .invoice_date
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
                    Error::InvalidInput("invoice_date must be in YYYY-MM-DD format".into())
                })
            })
            .transpose()
    }

    fn ingestion_request_id(&self, submit: &SubmitUpload) -> String {
        if let Some(client_id) = submit
            .client_request_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return client_id.to_string();
        }
        let mut hasher = Sha256::new();
        hasher.update(submit.employee_id.trim().as_bytes());
        hasher.update(b"::");
        hasher.update(slugify(&submit.hospital_name).as_bytes());
        hasher.update(b"::");
        hasher.update(submit.original_filename.trim().to_lowercase().as_bytes());
        hasher.update(b"::");
        hasher.update(&submit.bytes);
        format!("{:x}", hasher.finalize())
    }

    async fn stage_pdf(&self, upload_id: &str, bytes: &[u8]) -> Result<PathBuf> {
        let dir = self.upload_dir(upload_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Internal(format!("creating staging dir: {e}")))?;
        let path = dir.join("original.pdf");
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::Internal(format!("staging PDF: {e}")))?;
        Ok(path)
    }

    /// Accept one upload. Idempotent under `client_request_id` retries:
    /// the same request returns the same `upload_id` and never creates a
    /// second record.
    pub async fn submit_upload(&self, submit: SubmitUpload) -> Result<UploadAccepted> {
        let invoice_date = self.validate(&submit)?;
        let ingestion_request_id = self.ingestion_request_id(&submit);
        let upload_id = uuid::Uuid::new_v4().simple().to_string();

        let outcome = self
            .store
            .create_upload_record(NewUpload {
                upload_id,
                ingestion_request_id: Some(ingestion_request_id),
                employee_id: submit.employee_id.trim().to_string(),
                hospital_name: submit.hospital_name.trim().to_string(),
                original_filename: submit.original_filename.trim().to_string(),
                file_size_bytes: submit.bytes.len() as i64,
                invoice_date,
            })
            .await?;

        let record = outcome.record;
        let needs_enqueue = outcome.created || record.status == UploadStatus::Failed;

        if needs_enqueue {
            self.stage_pdf(&record.upload_id, &submit.bytes).await?;
            let position = self.store.enqueue_upload_job(&record.upload_id).await?;
            self.wake.notify_one();
            tracing::info!(
                upload_id = %record.upload_id,
                queue_position = position,
                existing = !outcome.created,
                "upload accepted"
            );
            return Ok(UploadAccepted {
                upload_id: record.upload_id.clone(),
                employee_id: record.employee_id,
                hospital_name: record.hospital_name,
                status: UploadStatus::Pending,
                queue_position: Some(position),
                original_filename: record.original_filename,
                file_size_bytes: record.file_size_bytes,
                page_count: record.extracted_bill.as_ref().map(|b| b.page_count),
                existing: !outcome.created,
            });
        }

        tracing::info!(
            upload_id = %record.upload_id,
            status = %record.status,
            "duplicate upload request, returning existing record"
        );
        Ok(UploadAccepted {
            upload_id: record.upload_id.clone(),
            employee_id: record.employee_id,
            hospital_name: record.hospital_name,
            status: record.status,
            queue_position: record.queue_position,
            original_filename: record.original_filename,
            file_size_bytes: record.file_size_bytes,
            page_count: record.extracted_bill.as_ref().map(|b| b.page_count),
            existing: true,
        })
    }

    async fn require_record(&self, upload_id: &str) -> Result<UploadRecord> {
        validate_upload_id(upload_id)?;
        self.store
            .get_upload(upload_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("upload {upload_id}")))
    }

    pub async fn get_status(&self, upload_id: &str) -> Result<StatusSnapshot> {
        let record = self.require_record(upload_id).await?;
        Ok(StatusSnapshot {
            upload_id: record.upload_id.clone(),
            status: record.status,
            verification_status: record.verification_status,
            processing_stage: record.processing_stage(),
            queue_position: record.queue_position,
            page_count: record.extracted_bill.as_ref().map(|b| b.page_count),
            error_message: record.error_message,
            updated_at: record.updated_at,
        })
    }

    pub async fn list_bills(&self, filter: &ListFilter) -> Result<Vec<UploadRecord>> {
        self.store.list_bills(filter).await
    }

    /// Full record including extracted bill, verification result, and the
    /// rendered text. `NotReady` until extraction has completed.
    pub async fn get_bill_details(&self, upload_id: &str) -> Result<UploadRecord> {
        let record = self.require_record(upload_id).await?;
        if record.extracted_bill.is_none() {
            return Err(Error::NotReady(format!(
                "upload {upload_id} is {}",
                record.status
            )));
        }
        Ok(record)
    }

    /// Persist manual line-item edits and return the recomputed item view.
    /// The stored bill is never mutated.
    pub async fn patch_line_items(
        &self,
        upload_id: &str,
        edits: Vec<LineItemEdit>,
    ) -> Result<Vec<BillCategory>> {
        let record = self.require_record(upload_id).await?;
        let bill = record.extracted_bill.as_ref().ok_or_else(|| {
            Error::NotReady(format!("upload {upload_id} has no extracted bill"))
        })?;

        for edit in &edits {
            let category = bill
                .categories
                .iter()
                .find(|c| c.category_name == edit.category_name)
                .ok_or_else(|| {
                    Error::InvalidInput(format!("invalid edit: unknown category '{}'", edit.category_name))
                })?;
            if edit.item_index >= category.items.len() {
                return Err(Error::InvalidInput(format!(
                    "invalid edit: item index {} out of range for '{}'",
                    edit.item_index, edit.category_name
                )));
            }
            if edit.qty.map_or(false, |v| v < 0.0)
                || edit.rate.map_or(false, |v| v < 0.0)
                || edit.tieup_rate.map_or(false, |v| v < 0.0)
            {
                return Err(Error::InvalidInput("invalid edit: negative value".into()));
            }
        }

        self.store.save_line_item_edits(upload_id, &edits).await?;
        Ok(apply_edits(bill, &edits))
    }

    /// Soft delete, or physical removal (plus staged-file cleanup) when
    /// `permanent` is set.
    pub async fn delete_bill(
        &self,
        upload_id: &str,
        permanent: bool,
        deleted_by: Option<&str>,
    ) -> Result<DeleteAudit> {
        validate_upload_id(upload_id)?;
        if permanent {
            match self.store.soft_delete_upload(upload_id, deleted_by).await {
                Ok(_) | Err(Error::AlreadyDeleted(_)) => {}
                Err(e) => return Err(e),
            }
            self.store.hard_delete_upload(upload_id).await?;
            remove_staging_dir(&self.upload_dir(upload_id)).await;
            tracing::info!(upload_id, "upload permanently deleted");
        } else {
            self.store.soft_delete_upload(upload_id, deleted_by).await?;
            tracing::info!(upload_id, "upload soft-deleted");
        }
        Ok(DeleteAudit {
            upload_id: upload_id.to_string(),
            permanent,
            deleted_at: Utc::now(),
        })
    }

    pub async fn restore_bill(&self, upload_id: &str) -> Result<UploadRecord> {
        validate_upload_id(upload_id)?;
        let record = self.store.restore_upload(upload_id).await?;
        tracing::info!(upload_id, "upload restored");
        Ok(record)
    }

    pub fn list_hospitals(&self) -> Vec<HospitalSummary> {
        self.catalog.snapshot().summaries()
    }

    pub async fn reload_catalog(&self) -> Result<Vec<HospitalSummary>> {
        let catalog = self.catalog.reload().await?;
        Ok(catalog.summaries())
    }
}

/// Best-effort staging cleanup; failures are logged, never raised.
pub async fn remove_staging_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "failed to clean staging dir"),
    }
}
