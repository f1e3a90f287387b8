//! PostgreSQL-backed `BillStore` implementation.
//!
//! The atomic claim uses `FOR UPDATE SKIP LOCKED` so at most one claimer
//! wins a record, which is what makes running multiple worker processes
//! safe.

use async_trait::async_trait;
use beleg_verifier::VerificationResult;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::config::DatabaseConfig;
use crate::db::{
    filter_artifact_rows, BillStore, QueueTimings, ReconcileStats, STALE_RECOVERY_MESSAGE,
};
use crate::models::{
    CreateOutcome, ExtractedBill, LineItemEdit, ListFilter, ListScope, NewUpload, UploadRecord,
    UploadStatus,
};
use crate::{Error, Result};

const RECORD_COLUMNS: &str = "upload_id, ingestion_request_id, employee_id, hospital_name, \
     original_filename, file_size_bytes, invoice_date, status, verification_status, \
     queue_position, queue_lease_expires_at, processing_started_at, completed_at, \
     processing_time_seconds, error_message, verification_error, is_deleted, deleted_at, \
     deleted_by, created_at, updated_at, extracted_bill, verification_result, \
     verification_result_text, line_item_edits";

/// Create the connection pool with statement and lock timeouts applied per
/// connection.
pub async fn create_db_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let statement_timeout = config.statement_timeout_seconds;
    let lock_timeout = config.lock_timeout_seconds;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .min_connections(config.pool_min_size)
        .max_connections(config.pool_max_size)
        .acquire_timeout(std::time::Duration::from_secs(config.pool_timeout_seconds))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                sqlx::query(&format!("SET statement_timeout = '{}s'", statement_timeout))
                    .execute(&mut *conn)
                    .await?;
                sqlx::query(&format!("SET lock_timeout = '{}s'", lock_timeout))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&config.url)
        .await?;

    tracing::info!(
        min = config.pool_min_size,
        max = config.pool_max_size,
        "database pool created"
    );
    Ok(pool)
}

pub struct PostgresBillStore {
    pool: PgPool,
    timings: QueueTimings,
}

impl PostgresBillStore {
    pub fn new(pool: PgPool, timings: QueueTimings) -> Self {
        Self { pool, timings }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("migration failed: {e}")))
    }

    async fn fetch(&self, upload_id: &str) -> Result<Option<UploadRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM uploads WHERE upload_id = $1"
        ))
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| record_from_row(&r)).transpose()
    }
}

#[async_trait]
impl BillStore for PostgresBillStore {
    async fn create_upload_record(&self, new: NewUpload) -> Result<CreateOutcome> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO uploads (upload_id, ingestion_request_id, employee_id, hospital_name, \
             original_filename, file_size_bytes, invoice_date, status, verification_status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING', 'NONE') \
             ON CONFLICT DO NOTHING \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(&new.upload_id)
        .bind(&new.ingestion_request_id)
        .bind(&new.employee_id)
        .bind(&new.hospital_name)
        .bind(&new.original_filename)
        .bind(new.file_size_bytes)
        .bind(new.invoice_date)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(CreateOutcome {
                record: record_from_row(&row)?,
                created: true,
            });
        }

        // Conflict: the ingestion request (or id) already has a record.
        let existing = match &new.ingestion_request_id {
            Some(request_id) => self.get_by_request_id(request_id).await?,
            None => None,
        };
        let existing = match existing {
            Some(record) => Some(record),
            None => self.fetch(&new.upload_id).await?,
        };
        existing
            .map(|record| CreateOutcome {
                record,
                created: false,
            })
            .ok_or_else(|| {
                Error::Internal("insert conflicted but no existing record found".into())
            })
    }

    async fn get_upload(&self, upload_id: &str) -> Result<Option<UploadRecord>> {
        self.fetch(upload_id).await
    }

    async fn get_by_request_id(&self, request_id: &str) -> Result<Option<UploadRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM uploads WHERE ingestion_request_id = $1"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| record_from_row(&r)).transpose()
    }

    async fn enqueue_upload_job(&self, upload_id: &str) -> Result<i32> {
        let position: Option<i32> = sqlx::query_scalar(
            "UPDATE uploads \
             SET status = 'PENDING', \
                 queue_position = (SELECT COALESCE(MAX(queue_position), 0) + 1 \
                                   FROM uploads WHERE status = 'PENDING' AND is_deleted = FALSE), \
                 queue_lease_expires_at = NULL, \
                 error_message = NULL, \
                 updated_at = now() \
             WHERE upload_id = $1 AND is_deleted = FALSE \
             RETURNING queue_position",
        )
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await?;

        let position =
            position.ok_or_else(|| Error::NotFound(format!("upload {upload_id}")))?;
        tracing::info!(upload_id, queue_position = position, "upload enqueued");
        Ok(position)
    }

    async fn claim_next_pending_job(&self) -> Result<Option<UploadRecord>> {
        let row = sqlx::query(&format!(
            "UPDATE uploads \
             SET status = 'PROCESSING', \
                 queue_lease_expires_at = now() + make_interval(secs => $1), \
                 processing_started_at = now(), \
                 queue_position = NULL, \
                 updated_at = now() \
             WHERE upload_id = ( \
                 SELECT upload_id FROM uploads \
                 WHERE status = 'PENDING' \
                   AND is_deleted = FALSE \
                   AND (queue_lease_expires_at IS NULL OR queue_lease_expires_at <= now()) \
                 ORDER BY queue_position ASC NULLS LAST, created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(self.timings.lease_ttl.num_seconds() as f64)
        .fetch_optional(&self.pool)
        .await?;

        let record = row.map(|r| record_from_row(&r)).transpose()?;
        if let Some(record) = &record {
            tracing::info!(upload_id = %record.upload_id, "claimed pending job");
            self.recompute_pending_queue_positions().await?;
        }
        Ok(record)
    }

    async fn mark_processing(&self, upload_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE uploads \
             SET status = 'PROCESSING', \
                 processing_started_at = now(), \
                 queue_position = NULL, \
                 updated_at = now() \
             WHERE upload_id = $1 AND status IN ('PENDING', 'FAILED')",
        )
        .bind(upload_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_bill(&self, upload_id: &str, mut bill: ExtractedBill) -> Result<()> {
        let removed = filter_artifact_rows(&mut bill);
        if removed > 0 {
            tracing::info!(upload_id, removed, "filtered artifact rows from bill");
        }

        let bill_json = serde_json::to_value(&bill)
            .map_err(|e| Error::Internal(format!("bill serialization failed: {e}")))?;

        let result = sqlx::query(
            "UPDATE uploads \
             SET status = 'COMPLETED', \
                 extracted_bill = $2, \
                 completed_at = now(), \
                 queue_lease_expires_at = NULL, \
                 error_message = NULL, \
                 processing_time_seconds = EXTRACT(EPOCH FROM (now() - COALESCE(processing_started_at, created_at))), \
                 updated_at = now() \
             WHERE upload_id = $1 AND status IN ('PROCESSING', 'COMPLETED')",
        )
        .bind(upload_id)
        .bind(&bill_json)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.fetch(upload_id).await? {
                Some(record) => Err(Error::NotReady(format!(
                    "complete_bill on {upload_id} in state {}",
                    record.status
                ))),
                None => Err(Error::NotFound(format!("upload {upload_id}"))),
            };
        }
        tracing::info!(upload_id, items = bill.item_count(), "bill completed");
        Ok(())
    }

    async fn mark_failed(&self, upload_id: &str, error: &str) -> Result<()> {
        let message: String = error.chars().take(2000).collect();
        sqlx::query(
            "UPDATE uploads \
             SET status = 'FAILED', \
                 error_message = $2, \
                 queue_lease_expires_at = NULL, \
                 queue_position = NULL, \
                 completed_at = now(), \
                 updated_at = now() \
             WHERE upload_id = $1",
        )
        .bind(upload_id)
        .bind(&message)
        .execute(&self.pool)
        .await?;
        tracing::error!(upload_id, error = %message, "upload failed");
        Ok(())
    }

    async fn mark_verification_processing(&self, upload_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE uploads \
             SET verification_status = 'PROCESSING', updated_at = now() \
             WHERE upload_id = $1 AND verification_status NOT IN ('PROCESSING', 'COMPLETED')",
        )
        .bind(upload_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn save_verification_result(
        &self,
        upload_id: &str,
        result: &VerificationResult,
        rendered_text: &str,
    ) -> Result<()> {
        let result_json = serde_json::to_value(result)
            .map_err(|e| Error::Internal(format!("result serialization failed: {e}")))?;

        let updated = sqlx::query(
            "UPDATE uploads \
             SET verification_status = 'COMPLETED', \
                 verification_result = $2, \
                 verification_result_text = $3, \
                 verification_error = NULL, \
                 completed_at = now(), \
                 processing_time_seconds = EXTRACT(EPOCH FROM (now() - COALESCE(processing_started_at, created_at))), \
                 updated_at = now() \
             WHERE upload_id = $1",
        )
        .bind(upload_id)
        .bind(&result_json)
        .bind(rendered_text)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("upload {upload_id}")));
        }
        Ok(())
    }

    async fn mark_verification_failed(&self, upload_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE uploads \
             SET verification_status = 'FAILED', verification_error = $2, updated_at = now() \
             WHERE upload_id = $1",
        )
        .bind(upload_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_line_item_edits(&self, upload_id: &str, edits: &[LineItemEdit]) -> Result<()> {
        let edits_json = serde_json::to_value(edits)
            .map_err(|e| Error::Internal(format!("edit serialization failed: {e}")))?;
        let result = sqlx::query(
            "UPDATE uploads SET line_item_edits = $2, updated_at = now() \
             WHERE upload_id = $1 AND is_deleted = FALSE",
        )
        .bind(upload_id)
        .bind(&edits_json)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("upload {upload_id}")));
        }
        Ok(())
    }

    async fn list_bills(&self, filter: &ListFilter) -> Result<Vec<UploadRecord>> {
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {RECORD_COLUMNS} FROM uploads WHERE 1 = 1"
        ));
        match filter.scope {
            ListScope::Active => {
                builder.push(" AND is_deleted = FALSE");
            }
            ListScope::Deleted => {
                builder.push(" AND is_deleted = TRUE");
            }
            ListScope::All => {}
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status.as_str());
        }
        if let Some(hospital) = &filter.hospital_name {
            builder.push(" AND lower(hospital_name) = lower(");
            builder.push_bind(hospital);
            builder.push(")");
        }
        if let Some(after) = filter.updated_after {
            builder.push(" AND updated_at >= ");
            builder.push_bind(after);
        }
        if let Some(before) = filter.updated_before {
            builder.push(" AND updated_at <= ");
            builder.push_bind(before);
        }
        builder.push(" ORDER BY updated_at DESC LIMIT ");
        builder.push_bind(filter.effective_limit() as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn soft_delete_upload(
        &self,
        upload_id: &str,
        deleted_by: Option<&str>,
    ) -> Result<UploadRecord> {
        let row = sqlx::query(&format!(
            "UPDATE uploads \
             SET is_deleted = TRUE, deleted_at = now(), deleted_by = $2, \
                 queue_position = NULL, updated_at = now() \
             WHERE upload_id = $1 AND is_deleted = FALSE \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(upload_id)
        .bind(deleted_by)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                self.recompute_pending_queue_positions().await?;
                record_from_row(&row)
            }
            None => match self.fetch(upload_id).await? {
                Some(_) => Err(Error::AlreadyDeleted(format!("upload {upload_id}"))),
                None => Err(Error::NotFound(format!("upload {upload_id}"))),
            },
        }
    }

    async fn restore_upload(&self, upload_id: &str) -> Result<UploadRecord> {
        let row = sqlx::query(&format!(
            "UPDATE uploads \
             SET is_deleted = FALSE, deleted_at = NULL, deleted_by = NULL, updated_at = now() \
             WHERE upload_id = $1 AND is_deleted = TRUE \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                self.recompute_pending_queue_positions().await?;
                record_from_row(&row)
            }
            None => match self.fetch(upload_id).await? {
                Some(_) => Err(Error::NotDeleted(format!("upload {upload_id}"))),
                None => Err(Error::NotFound(format!("upload {upload_id}"))),
            },
        }
    }

    async fn hard_delete_upload(&self, upload_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM uploads WHERE upload_id = $1")
            .bind(upload_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn recompute_pending_queue_positions(&self) -> Result<()> {
        sqlx::query(
            "WITH ranked AS ( \
                 SELECT upload_id, \
                        ROW_NUMBER() OVER (ORDER BY queue_position ASC NULLS LAST, created_at ASC) AS pos \
                 FROM uploads WHERE status = 'PENDING' AND is_deleted = FALSE \
             ) \
             UPDATE uploads u \
             SET queue_position = ranked.pos::int \
             FROM ranked \
             WHERE u.upload_id = ranked.upload_id \
               AND u.queue_position IS DISTINCT FROM ranked.pos::int",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reconcile_queue_state(&self) -> Result<ReconcileStats> {
        let reverted = sqlx::query(
            "UPDATE uploads \
             SET status = 'PENDING', queue_lease_expires_at = NULL, updated_at = now() \
             WHERE status = 'PROCESSING' \
               AND queue_lease_expires_at IS NOT NULL \
               AND queue_lease_expires_at <= now()",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        let failed_stale = sqlx::query(
            "UPDATE uploads \
             SET status = 'FAILED', error_message = $1, completed_at = now(), updated_at = now() \
             WHERE status = 'PROCESSING' \
               AND queue_lease_expires_at IS NULL \
               AND processing_started_at <= now() - make_interval(secs => $2)",
        )
        .bind(STALE_RECOVERY_MESSAGE)
        .bind(self.timings.stale_processing.num_seconds() as f64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        self.recompute_pending_queue_positions().await?;

        if reverted > 0 || failed_stale > 0 {
            tracing::warn!(reverted, failed_stale, "reconciled queue state");
        }
        Ok(ReconcileStats {
            reverted_to_pending: reverted,
            failed_stale,
        })
    }

    async fn expired_soft_deleted(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT upload_id FROM uploads \
             WHERE is_deleted = TRUE AND deleted_at IS NOT NULL AND deleted_at <= $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

fn record_from_row(row: &PgRow) -> Result<UploadRecord> {
    let status: String = row.try_get("status")?;
    let verification_status: String = row.try_get("verification_status")?;
    let extracted_bill: Option<JsonValue> = row.try_get("extracted_bill")?;
    let verification_result: Option<JsonValue> = row.try_get("verification_result")?;
    let line_item_edits: JsonValue = row.try_get("line_item_edits")?;

    Ok(UploadRecord {
        upload_id: row.try_get("upload_id")?,
        ingestion_request_id: row.try_get("ingestion_request_id")?,
        employee_id: row.try_get("employee_id")?,
        hospital_name: row.try_get("hospital_name")?,
        original_filename: row.try_get("original_filename")?,
        file_size_bytes: row.try_get("file_size_bytes")?,
        invoice_date: row.try_get("invoice_date")?,
        status: status
            .parse::<UploadStatus>()
            .map_err(Error::Internal)?,
        verification_status: verification_status
            .parse()
            .map_err(Error::Internal)?,
        queue_position: row.try_get("queue_position")?,
        queue_lease_expires_at: row.try_get("queue_lease_expires_at")?,
        processing_started_at: row.try_get("processing_started_at")?,
        completed_at: row.try_get("completed_at")?,
        processing_time_seconds: row.try_get("processing_time_seconds")?,
        error_message: row.try_get("error_message")?,
        verification_error: row.try_get("verification_error")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
        deleted_by: row.try_get("deleted_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        extracted_bill: extracted_bill
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| Error::Internal(format!("corrupt extracted_bill: {e}")))?,
        verification_result: verification_result
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| Error::Internal(format!("corrupt verification_result: {e}")))?,
        verification_result_text: row.try_get("verification_result_text")?,
        line_item_edits: serde_json::from_value(line_item_edits)
            .map_err(|e| Error::Internal(format!("corrupt line_item_edits: {e}")))?,
    })
}
