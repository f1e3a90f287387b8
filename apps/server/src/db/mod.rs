//! State store: one document per upload, with the job queue embedded in the
//! record lifecycle.

mod memory;
mod postgres;

pub use memory::InMemoryBillStore;
pub use postgres::{create_db_pool, PostgresBillStore};

use async_trait::async_trait;
use beleg_verifier::VerificationResult;
use chrono::{DateTime, Duration, Utc};

use crate::models::{
    CreateOutcome, ExtractedBill, LineItemEdit, ListFilter, NewUpload, UploadRecord,
};
use crate::Result;

/// Queue timing knobs shared by store implementations.
#[derive(Debug, Clone, Copy)]
pub struct QueueTimings {
    /// How long a claim holds a job before reconciliation may return it to
    /// the queue.
    pub lease_ttl: Duration,
    /// PROCESSING records older than this with no live lease are demoted to
    /// FAILED.
    pub stale_processing: Duration,
}

impl Default for QueueTimings {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::seconds(600),
            stale_processing: Duration::seconds(3600),
        }
    }
}

/// Outcome of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Expired leases returned to the queue.
    pub reverted_to_pending: u64,
    /// Stale PROCESSING records demoted to FAILED.
    pub failed_stale: u64,
}

/// Persistence contract for upload records.
///
/// All lifecycle transitions are atomic compare-and-set updates; the claim
/// is the mutual-exclusion primitive for the queue. Implementations:
/// [`PostgresBillStore`] for production, [`InMemoryBillStore`] for
/// deterministic tests and offline CLI runs.
#[async_trait]
pub trait BillStore: Send + Sync {
    /// Exactly-once insert. A duplicate `ingestion_request_id` returns the
    /// existing record with `created: false` instead of inserting.
    async fn create_upload_record(&self, new: NewUpload) -> Result<CreateOutcome>;

    async fn get_upload(&self, upload_id: &str) -> Result<Option<UploadRecord>>;

    async fn get_by_request_id(&self, request_id: &str) -> Result<Option<UploadRecord>>;

    /// Set `status=PENDING` and assign the next queue position. Returns the
    /// assigned position.
    async fn enqueue_upload_job(&self, upload_id: &str) -> Result<i32>;

    /// Atomically claim the PENDING record with the lowest queue position
    /// that has no live lease. At most one claimer succeeds per record.
    async fn claim_next_pending_job(&self) -> Result<Option<UploadRecord>>;

    /// Idempotent PENDING/FAILED -> PROCESSING transition for direct
    /// callers. Returns false when the record was already PROCESSING or in
    /// another state.
    async fn mark_processing(&self, upload_id: &str) -> Result<bool>;

    /// Transition to COMPLETED and persist the extracted bill. Residual
    /// artifacts are filtered (and logged), never rejected.
    async fn complete_bill(&self, upload_id: &str, bill: ExtractedBill) -> Result<()>;

    /// Transition to FAILED and clear the lease.
    async fn mark_failed(&self, upload_id: &str, error: &str) -> Result<()>;

    async fn mark_verification_processing(&self, upload_id: &str) -> Result<bool>;

    async fn save_verification_result(
        &self,
        upload_id: &str,
        result: &VerificationResult,
        rendered_text: &str,
    ) -> Result<()>;

    async fn mark_verification_failed(&self, upload_id: &str, error: &str) -> Result<()>;

    /// Replace the edits array; the extracted bill itself is immutable.
    async fn save_line_item_edits(&self, upload_id: &str, edits: &[LineItemEdit]) -> Result<()>;

    async fn list_bills(&self, filter: &ListFilter) -> Result<Vec<UploadRecord>>;

    async fn soft_delete_upload(
        &self,
        upload_id: &str,
        deleted_by: Option<&str>,
    ) -> Result<UploadRecord>;

    async fn restore_upload(&self, upload_id: &str) -> Result<UploadRecord>;

    /// Physically remove the record. Returns false when nothing matched.
    async fn hard_delete_upload(&self, upload_id: &str) -> Result<bool>;

    /// Renumber PENDING records so the queue view is contiguous from 1.
    async fn recompute_pending_queue_positions(&self) -> Result<()>;

    /// Return expired leases to the queue, demote stale PROCESSING records
    /// to FAILED, renumber.
    async fn reconcile_queue_state(&self) -> Result<ReconcileStats>;

    /// Soft-deleted records whose `deleted_at` is at or before the cutoff.
    async fn expired_soft_deleted(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;
}

/// Error message recorded when a stale PROCESSING record is demoted.
pub const STALE_RECOVERY_MESSAGE: &str = "recovered stale processing job after lease loss";

/// Drop artifact rows (and then-empty categories) before persistence.
/// Returns the number of rows removed.
pub(crate) fn filter_artifact_rows(bill: &mut ExtractedBill) -> usize {
    let mut removed = 0;
    for category in &mut bill.categories {
        let before = category.items.len();
        category.items.retain(|item| {
            let drop = beleg_verifier::artifact::is_artifact(
                &category.category_name,
                &item.item_name,
                item.amount,
                item.amount,
            );
            if drop {
                tracing::warn!(
                    category = %category.category_name,
                    item = %item.item_name,
                    "filtered artifact row before persistence"
                );
            }
            !drop
        });
        removed += before - category.items.len();
    }
    bill.categories.retain(|c| !c.items.is_empty());
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BillCategory, ItemRow};

    fn row(name: &str, amount: f64) -> ItemRow {
        ItemRow {
            item_name: name.into(),
            amount,
            quantity: None,
            rate: None,
            page: None,
        }
    }

    #[test]
    fn artifact_rows_and_empty_categories_removed() {
        let mut bill = ExtractedBill {
            categories: vec![
                BillCategory {
                    category_name: "Hospital - ".into(),
                    items: vec![row("UNKNOWN", 0.0)],
                },
                BillCategory {
                    category_name: "Consultation".into(),
                    items: vec![row("Consultation", 1500.0)],
                },
            ],
            ..Default::default()
        };

        assert_eq!(filter_artifact_rows(&mut bill), 1);
        assert_eq!(bill.categories.len(), 1);
        assert_eq!(bill.categories[0].category_name, "Consultation");
    }
}
