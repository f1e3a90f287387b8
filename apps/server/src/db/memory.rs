//! In-memory `BillStore` for deterministic tests and offline CLI runs.
//!
//! Mirrors the Postgres implementation's transition semantics without a
//! database. Not durable; a process restart loses the queue, which is
//! exactly why production uses the Postgres store.

use async_trait::async_trait;
use beleg_verifier::VerificationResult;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::db::{
    filter_artifact_rows, BillStore, QueueTimings, ReconcileStats, STALE_RECOVERY_MESSAGE,
};
use crate::models::{
    CreateOutcome, ExtractedBill, LineItemEdit, ListFilter, ListScope, NewUpload, UploadRecord,
    UploadStatus, VerificationStatus,
};
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    records: HashMap<String, UploadRecord>,
    /// Insertion order for stable FIFO tie-breaking.
    sequence: HashMap<String, u64>,
    next_seq: u64,
}

pub struct InMemoryBillStore {
    inner: Mutex<Inner>,
    timings: QueueTimings,
}

impl InMemoryBillStore {
    pub fn new(timings: QueueTimings) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            timings,
        }
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        f(&mut self.inner.lock().expect("store lock poisoned"))
    }

    /// Test hook: expire the lease on a PROCESSING record, simulating a
    /// worker that died mid-job.
    pub fn force_expire_lease(&self, upload_id: &str) {
        self.with_inner(|inner| {
            if let Some(record) = inner.records.get_mut(upload_id) {
                record.queue_lease_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
            }
        });
    }

    /// Test hook: age a PROCESSING record past the stale threshold and drop
    /// its lease.
    pub fn force_stale(&self, upload_id: &str) {
        let stale = self.timings.stale_processing;
        self.with_inner(|inner| {
            if let Some(record) = inner.records.get_mut(upload_id) {
                record.queue_lease_expires_at = None;
                record.processing_started_at =
                    Some(Utc::now() - stale - chrono::Duration::seconds(1));
            }
        });
    }

    fn renumber(inner: &mut Inner) {
        let mut pending: Vec<(String, Option<i32>, u64)> = inner
            .records
            .values()
            .filter(|r| r.status == UploadStatus::Pending && !r.is_deleted)
            .map(|r| {
                (
                    r.upload_id.clone(),
                    r.queue_position,
                    inner.sequence.get(&r.upload_id).copied().unwrap_or(u64::MAX),
                )
            })
            .collect();
        pending.sort_by_key(|(_, pos, seq)| (pos.map_or(i64::MAX, i64::from), *seq));
        for (index, (upload_id, _, _)) in pending.into_iter().enumerate() {
            if let Some(record) = inner.records.get_mut(&upload_id) {
                record.queue_position = Some(index as i32 + 1);
            }
        }
    }
}

fn blank_record(new: &NewUpload, now: DateTime<Utc>) -> UploadRecord {
    UploadRecord {
        upload_id: new.upload_id.clone(),
        ingestion_request_id: new.ingestion_request_id.clone(),
        employee_id: new.employee_id.clone(),
        hospital_name: new.hospital_name.clone(),
        original_filename: new.original_filename.clone(),
        file_size_bytes: new.file_size_bytes,
        invoice_date: new.invoice_date,
        status: UploadStatus::Pending,
        verification_status: VerificationStatus::None,
        queue_position: None,
        queue_lease_expires_at: None,
        processing_started_at: None,
        completed_at: None,
        processing_time_seconds: None,
        error_message: None,
        verification_error: None,
        is_deleted: false,
        deleted_at: None,
        deleted_by: None,
        created_at: now,
        updated_at: now,
        extracted_bill: None,
        verification_result: None,
        verification_result_text: None,
        line_item_edits: Vec::new(),
    }
}

#[async_trait]
impl BillStore for InMemoryBillStore {
    async fn create_upload_record(&self, new: NewUpload) -> Result<CreateOutcome> {
        self.with_inner(|inner| {
            if let Some(request_id) = &new.ingestion_request_id {
                let existing = inner
                    .records
                    .values()
                    .find(|r| r.ingestion_request_id.as_deref() == Some(request_id))
                    .cloned();
                if let Some(record) = existing {
                    return Ok(CreateOutcome {
                        record,
                        created: false,
                    });
                }
            }
            if let Some(record) = inner.records.get(&new.upload_id) {
                return Ok(CreateOutcome {
                    record: record.clone(),
                    created: false,
                });
            }

            let record = blank_record(&new, Utc::now());
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.sequence.insert(new.upload_id.clone(), seq);
            inner.records.insert(new.upload_id.clone(), record.clone());
            Ok(CreateOutcome {
                record,
                created: true,
            })
        })
    }

    async fn get_upload(&self, upload_id: &str) -> Result<Option<UploadRecord>> {
        Ok(self.with_inner(|inner| inner.records.get(upload_id).cloned()))
    }

    async fn get_by_request_id(&self, request_id: &str) -> Result<Option<UploadRecord>> {
        Ok(self.with_inner(|inner| {
            inner
                .records
                .values()
                .find(|r| r.ingestion_request_id.as_deref() == Some(request_id))
                .cloned()
        }))
    }

    async fn enqueue_upload_job(&self, upload_id: &str) -> Result<i32> {
        self.with_inner(|inner| {
            let max_position = inner
                .records
                .values()
                .filter(|r| r.status == UploadStatus::Pending && !r.is_deleted)
                .filter_map(|r| r.queue_position)
                .max()
                .unwrap_or(0);
            let record = inner
                .records
                .get_mut(upload_id)
                .filter(|r| !r.is_deleted)
                .ok_or_else(|| Error::NotFound(format!("upload {upload_id}")))?;
            record.status = UploadStatus::Pending;
            record.queue_position = Some(max_position + 1);
            record.queue_lease_expires_at = None;
            record.error_message = None;
            record.updated_at = Utc::now();
            Ok(max_position + 1)
        })
    }

    async fn claim_next_pending_job(&self) -> Result<Option<UploadRecord>> {
        let lease_ttl = self.timings.lease_ttl;
        Ok(self.with_inner(|inner| {
            let now = Utc::now();
            let mut eligible: Vec<(String, Option<i32>, u64)> = inner
                .records
                .values()
                .filter(|r| {
                    r.status == UploadStatus::Pending
                        && !r.is_deleted
                        && r.queue_lease_expires_at.map_or(true, |lease| lease <= now)
                })
                .map(|r| {
                    (
                        r.upload_id.clone(),
                        r.queue_position,
                        inner.sequence.get(&r.upload_id).copied().unwrap_or(u64::MAX),
                    )
                })
                .collect();
            eligible.sort_by_key(|(_, pos, seq)| (pos.map_or(i64::MAX, i64::from), *seq));

            let (upload_id, _, _) = eligible.into_iter().next()?;
            let record = inner.records.get_mut(&upload_id)?;
            record.status = UploadStatus::Processing;
            record.queue_lease_expires_at = Some(now + lease_ttl);
            record.processing_started_at = Some(now);
            record.queue_position = None;
            record.updated_at = now;
            let claimed = record.clone();
            Self::renumber(inner);
            Some(claimed)
        }))
    }

    async fn mark_processing(&self, upload_id: &str) -> Result<bool> {
        Ok(self.with_inner(|inner| {
            match inner.records.get_mut(upload_id) {
                Some(record)
                    if matches!(record.status, UploadStatus::Pending | UploadStatus::Failed) =>
                {
                    record.status = UploadStatus::Processing;
                    record.processing_started_at = Some(Utc::now());
                    record.queue_position = None;
                    record.updated_at = Utc::now();
                    true
                }
                _ => false,
            }
        }))
    }

    async fn complete_bill(&self, upload_id: &str, mut bill: ExtractedBill) -> Result<()> {
        filter_artifact_rows(&mut bill);
        self.with_inner(|inner| {
            let record = inner
                .records
                .get_mut(upload_id)
                .ok_or_else(|| Error::NotFound(format!("upload {upload_id}")))?;
            if !matches!(
                record.status,
                UploadStatus::Processing | UploadStatus::Completed
            ) {
                return Err(Error::NotReady(format!(
                    "complete_bill on {upload_id} in state {}",
                    record.status
                )));
            }
            let now = Utc::now();
            record.status = UploadStatus::Completed;
            record.extracted_bill = Some(bill);
            record.completed_at = Some(now);
            record.queue_lease_expires_at = None;
            record.error_message = None;
            record.processing_time_seconds = Some(
                (now - record.processing_started_at.unwrap_or(record.created_at))
                    .num_milliseconds() as f64
                    / 1000.0,
            );
            record.updated_at = now;
            Ok(())
        })
    }

    async fn mark_failed(&self, upload_id: &str, error: &str) -> Result<()> {
        self.with_inner(|inner| {
            if let Some(record) = inner.records.get_mut(upload_id) {
                let now = Utc::now();
                record.status = UploadStatus::Failed;
                record.error_message = Some(error.chars().take(2000).collect());
                record.queue_lease_expires_at = None;
                record.queue_position = None;
                record.completed_at = Some(now);
                record.updated_at = now;
            }
        });
        Ok(())
    }

    async fn mark_verification_processing(&self, upload_id: &str) -> Result<bool> {
        Ok(self.with_inner(|inner| {
            match inner.records.get_mut(upload_id) {
                Some(record)
                    if !matches!(
                        record.verification_status,
                        VerificationStatus::Processing | VerificationStatus::Completed
                    ) =>
                {
                    record.verification_status = VerificationStatus::Processing;
                    record.updated_at = Utc::now();
                    true
                }
                _ => false,
            }
        }))
    }

    async fn save_verification_result(
        &self,
        upload_id: &str,
        result: &VerificationResult,
        rendered_text: &str,
    ) -> Result<()> {
        self.with_inner(|inner| {
            let record = inner
                .records
                .get_mut(upload_id)
                .ok_or_else(|| Error::NotFound(format!("upload {upload_id}")))?;
            let now = Utc::now();
            record.verification_status = VerificationStatus::Completed;
            record.verification_result = Some(result.clone());
            record.verification_result_text = Some(rendered_text.to_string());
            record.verification_error = None;
            record.completed_at = Some(now);
            record.processing_time_seconds = Some(
                (now - record.processing_started_at.unwrap_or(record.created_at))
                    .num_milliseconds() as f64
                    / 1000.0,
            );
            record.updated_at = now;
            Ok(())
        })
    }

    async fn mark_verification_failed(&self, upload_id: &str, error: &str) -> Result<()> {
        self.with_inner(|inner| {
            if let Some(record) = inner.records.get_mut(upload_id) {
                record.verification_status = VerificationStatus::Failed;
                record.verification_error = Some(error.to_string());
                record.updated_at = Utc::now();
            }
        });
        Ok(())
    }

    async fn save_line_item_edits(&self, upload_id: &str, edits: &[LineItemEdit]) -> Result<()> {
        self.with_inner(|inner| {
            let record = inner
                .records
                .get_mut(upload_id)
                .filter(|r| !r.is_deleted)
                .ok_or_else(|| Error::NotFound(format!("upload {upload_id}")))?;
            record.line_item_edits = edits.to_vec();
            record.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn list_bills(&self, filter: &ListFilter) -> Result<Vec<UploadRecord>> {
        Ok(self.with_inner(|inner| {
            let mut records: Vec<UploadRecord> = inner
                .records
                .values()
                .filter(|r| match filter.scope {
                    ListScope::Active => !r.is_deleted,
                    ListScope::Deleted => r.is_deleted,
                    ListScope::All => true,
                })
                .filter(|r| filter.status.map_or(true, |s| r.status == s))
                .filter(|r| {
                    filter
                        .hospital_name
                        .as_ref()
                        .map_or(true, |h| r.hospital_name.eq_ignore_ascii_case(h))
                })
                .filter(|r| filter.updated_after.map_or(true, |t| r.updated_at >= t))
                .filter(|r| filter.updated_before.map_or(true, |t| r.updated_at <= t))
                .cloned()
                .collect();
            records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            records.truncate(filter.effective_limit());
            records
        }))
    }

    async fn soft_delete_upload(
        &self,
        upload_id: &str,
        deleted_by: Option<&str>,
    ) -> Result<UploadRecord> {
        self.with_inner(|inner| {
            let record = inner
                .records
                .get_mut(upload_id)
                .ok_or_else(|| Error::NotFound(format!("upload {upload_id}")))?;
            if record.is_deleted {
                return Err(Error::AlreadyDeleted(format!("upload {upload_id}")));
            }
            record.is_deleted = true;
            record.deleted_at = Some(Utc::now());
            record.deleted_by = deleted_by.map(str::to_string);
            record.queue_position = None;
            record.updated_at = Utc::now();
            let deleted = record.clone();
            Self::renumber(inner);
            Ok(deleted)
        })
    }

    async fn restore_upload(&self, upload_id: &str) -> Result<UploadRecord> {
        self.with_inner(|inner| {
            let record = inner
                .records
                .get_mut(upload_id)
                .ok_or_else(|| Error::NotFound(format!("upload {upload_id}")))?;
            if !record.is_deleted {
                return Err(Error::NotDeleted(format!("upload {upload_id}")));
            }
            record.is_deleted = false;
            record.deleted_at = None;
            record.deleted_by = None;
            record.updated_at = Utc::now();
            let restored = record.clone();
            Self::renumber(inner);
            Ok(restored)
        })
    }

    async fn hard_delete_upload(&self, upload_id: &str) -> Result<bool> {
        Ok(self.with_inner(|inner| {
            inner.sequence.remove(upload_id);
            inner.records.remove(upload_id).is_some()
        }))
    }

    async fn recompute_pending_queue_positions(&self) -> Result<()> {
        self.with_inner(|inner| Self::renumber(inner));
        Ok(())
    }

    async fn reconcile_queue_state(&self) -> Result<ReconcileStats> {
        let stale = self.timings.stale_processing;
        Ok(self.with_inner(|inner| {
            let now = Utc::now();
            let mut stats = ReconcileStats::default();
            for record in inner.records.values_mut() {
                if record.status != UploadStatus::Processing {
                    continue;
                }
                match record.queue_lease_expires_at {
                    Some(lease) if lease <= now => {
                        record.status = UploadStatus::Pending;
                        record.queue_lease_expires_at = None;
                        record.updated_at = now;
                        stats.reverted_to_pending += 1;
                    }
                    None => {
                        let started = record.processing_started_at.unwrap_or(record.created_at);
                        if started <= now - stale {
                            record.status = UploadStatus::Failed;
                            record.error_message = Some(STALE_RECOVERY_MESSAGE.to_string());
                            record.completed_at = Some(now);
                            record.updated_at = now;
                            stats.failed_stale += 1;
                        }
                    }
                    _ => {}
                }
            }
            Self::renumber(inner);
            if stats.reverted_to_pending > 0 || stats.failed_stale > 0 {
                tracing::warn!(
                    reverted = stats.reverted_to_pending,
                    failed_stale = stats.failed_stale,
                    "reconciled queue state"
                );
            }
            stats
        }))
    }

    async fn expired_soft_deleted(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(self.with_inner(|inner| {
            inner
                .records
                .values()
                .filter(|r| r.is_deleted && r.deleted_at.map_or(false, |t| t <= cutoff))
                .map(|r| r.upload_id.clone())
                .collect()
        }))
    }
}
