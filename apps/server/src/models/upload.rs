//! Upload record and extracted-bill models.
//!
//! One document per submitted PDF. The extracted bill and verification
//! result are stored as JSON documents inside the record; everything the
//! queue and lifecycle machinery touches is a scalar column.

use beleg_verifier::VerificationResult;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Upload lifecycle. Transitions only advance:
/// `PENDING -> PROCESSING -> COMPLETED | FAILED`, with
/// `PROCESSING -> PENDING` reserved for lease-expiry reconciliation and
/// `FAILED -> PROCESSING` for explicit retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "PENDING",
            UploadStatus::Processing => "PROCESSING",
            UploadStatus::Completed => "COMPLETED",
            UploadStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(UploadStatus::Pending),
            "PROCESSING" => Ok(UploadStatus::Processing),
            "COMPLETED" => Ok(UploadStatus::Completed),
            "FAILED" => Ok(UploadStatus::Failed),
            other => Err(format!("unknown upload status: {other}")),
        }
    }
}

/// Verification sub-state, independent of the upload lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    None,
    Processing,
    Completed,
    Failed,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::None => "NONE",
            VerificationStatus::Processing => "PROCESSING",
            VerificationStatus::Completed => "COMPLETED",
            VerificationStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(VerificationStatus::None),
            "PROCESSING" => Ok(VerificationStatus::Processing),
            "COMPLETED" => Ok(VerificationStatus::Completed),
            "FAILED" => Ok(VerificationStatus::Failed),
            other => Err(format!("unknown verification status: {other}")),
        }
    }
}

/// One extracted bill line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRow {
    pub item_name: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Ordered category block; bill order is preserved end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillCategory {
    pub category_name: String,
    pub items: Vec<ItemRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub label: String,
    pub amount: f64,
}

/// Structured bill produced by extraction; set only on COMPLETED records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedBill {
    #[serde(default)]
    pub patient: JsonValue,
    #[serde(default)]
    pub header: JsonValue,
    #[serde(default)]
    pub categories: Vec<BillCategory>,
    #[serde(default)]
    pub payments: Vec<Payment>,
    #[serde(default)]
    pub grand_total: f64,
    #[serde(default)]
    pub page_count: u32,
    #[serde(default)]
    pub extraction_warnings: Vec<String>,
}

impl ExtractedBill {
    pub fn item_count(&self) -> usize {
        self.categories.iter().map(|c| c.items.len()).sum()
    }
}

/// Manual correction to one extracted line; never mutates the bill itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemEdit {
    pub category_name: String,
    pub item_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tieup_rate: Option<f64>,
}

/// Insert payload for a new upload record.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub upload_id: String,
    pub ingestion_request_id: Option<String>,
    pub employee_id: String,
    pub hospital_name: String,
    pub original_filename: String,
    pub file_size_bytes: i64,
    pub invoice_date: Option<NaiveDate>,
}

/// Result of a create: the effective record plus whether an insert
/// actually happened (false for idempotent duplicates).
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub record: UploadRecord,
    pub created: bool,
}

/// The one-per-upload document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub upload_id: String,
    pub ingestion_request_id: Option<String>,
    pub employee_id: String,
    pub hospital_name: String,
    pub original_filename: String,
    pub file_size_bytes: i64,
    pub invoice_date: Option<NaiveDate>,

    pub status: UploadStatus,
    pub verification_status: VerificationStatus,
    pub queue_position: Option<i32>,
    pub queue_lease_expires_at: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub verification_error: Option<String>,

    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub extracted_bill: Option<ExtractedBill>,
    pub verification_result: Option<VerificationResult>,
    pub verification_result_text: Option<String>,
    #[serde(default)]
    pub line_item_edits: Vec<LineItemEdit>,
}

/// Human-readable stage derived from the two lifecycle enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Queued,
    Extracting,
    Verifying,
    Completed,
    Failed,
}

impl UploadRecord {
    pub fn processing_stage(&self) -> ProcessingStage {
        match (self.status, self.verification_status) {
            (UploadStatus::Pending, _) => ProcessingStage::Queued,
            (UploadStatus::Processing, _) => ProcessingStage::Extracting,
            (UploadStatus::Failed, _) => ProcessingStage::Failed,
            (UploadStatus::Completed, VerificationStatus::Completed) => ProcessingStage::Completed,
            (UploadStatus::Completed, VerificationStatus::Failed) => ProcessingStage::Failed,
            (UploadStatus::Completed, _) => ProcessingStage::Verifying,
        }
    }
}

/// Listing scope with respect to soft deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListScope {
    #[default]
    Active,
    Deleted,
    All,
}

/// Filters for `list_bills`; results are most-recent `updated_at` first.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub scope: ListScope,
    pub status: Option<UploadStatus>,
    pub hospital_name: Option<String>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ListFilter {
    /// Listings are capped at 500 rows.
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(50).min(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Processing,
            UploadStatus::Completed,
            UploadStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<UploadStatus>().unwrap(), status);
        }
        assert!("uploaded".parse::<UploadStatus>().is_err());
    }

    #[test]
    fn list_filter_caps_limit() {
        let filter = ListFilter {
            limit: Some(9999),
            ..Default::default()
        };
        assert_eq!(filter.effective_limit(), 500);
        assert_eq!(ListFilter::default().effective_limit(), 50);
    }
}
