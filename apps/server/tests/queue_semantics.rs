//! Queue lifecycle semantics: FIFO claims, idempotent submits, lease
//! recovery, stale demotion, and soft-delete interaction.

#[allow(unused)]
mod support;

use beleg::db::{BillStore, STALE_RECOVERY_MESSAGE};
use beleg::models::{ExtractedBill, UploadStatus};
use beleg::Error;
use support::*;

#[tokio::test]
async fn claims_follow_queue_position_fifo() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let first = ctx.state.uploads.submit_upload(submit(1)).await?;
    let second = ctx.state.uploads.submit_upload(submit(2)).await?;
    assert_eq!(first.queue_position, Some(1));
    assert_eq!(second.queue_position, Some(2));

    let claimed = ctx.store.claim_next_pending_job().await?.unwrap();
    assert_eq!(claimed.upload_id, first.upload_id);
    assert_eq!(claimed.status, UploadStatus::Processing);
    assert!(claimed.queue_lease_expires_at.is_some());
    assert!(claimed.processing_started_at.is_some());

    // The remaining job is renumbered to the front of the queue.
    let remaining = ctx.store.get_upload(&second.upload_id).await?.unwrap();
    assert_eq!(remaining.status, UploadStatus::Pending);
    assert_eq!(remaining.queue_position, Some(1));
    Ok(())
}

#[tokio::test]
async fn duplicate_client_request_id_is_idempotent() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let mut payload = submit(3);
    payload.client_request_id = Some("req-abc-001".into());

    let first = ctx.state.uploads.submit_upload(payload.clone()).await?;
    let second = ctx.state.uploads.submit_upload(payload).await?;

    assert_eq!(first.upload_id, second.upload_id);
    assert!(!first.existing);
    assert!(second.existing);
    // Queue position was assigned once; the duplicate did not re-enqueue.
    assert_eq!(second.queue_position, Some(1));

    let listed = ctx
        .state
        .uploads
        .list_bills(&Default::default())
        .await?;
    assert_eq!(listed.len(), 1);
    Ok(())
}

#[tokio::test]
async fn identical_bytes_without_client_id_also_dedupe() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let first = ctx.state.uploads.submit_upload(submit(4)).await?;
    let second = ctx.state.uploads.submit_upload(submit(4)).await?;
    assert_eq!(first.upload_id, second.upload_id);
    assert!(second.existing);
    Ok(())
}

#[tokio::test]
async fn mark_processing_is_idempotent() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let accepted = ctx.state.uploads.submit_upload(submit(5)).await?;

    assert!(ctx.store.mark_processing(&accepted.upload_id).await?);
    let after_first = ctx.store.get_upload(&accepted.upload_id).await?.unwrap();
    let started_at = after_first.processing_started_at.unwrap();

    // Second call is a no-op: still PROCESSING, started_at unchanged.
    assert!(!ctx.store.mark_processing(&accepted.upload_id).await?);
    let after_second = ctx.store.get_upload(&accepted.upload_id).await?.unwrap();
    assert_eq!(after_second.status, UploadStatus::Processing);
    assert_eq!(after_second.processing_started_at, Some(started_at));
    Ok(())
}

#[tokio::test]
async fn expired_lease_returns_job_to_queue_and_completion_is_idempotent() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let accepted = ctx.state.uploads.submit_upload(submit(6)).await?;

    // First worker claims, then dies: the lease expires.
    let claimed = ctx.store.claim_next_pending_job().await?.unwrap();
    assert_eq!(claimed.upload_id, accepted.upload_id);
    ctx.store.force_expire_lease(&accepted.upload_id);

    let stats = ctx.store.reconcile_queue_state().await?;
    assert_eq!(stats.reverted_to_pending, 1);
    let record = ctx.store.get_upload(&accepted.upload_id).await?.unwrap();
    assert_eq!(record.status, UploadStatus::Pending);
    assert_eq!(record.queue_position, Some(1));

    // A second worker claims and completes; completing again is harmless.
    let reclaimed = ctx.store.claim_next_pending_job().await?.unwrap();
    assert_eq!(reclaimed.upload_id, accepted.upload_id);
    ctx.store
        .complete_bill(&accepted.upload_id, ExtractedBill::default())
        .await?;
    ctx.store
        .complete_bill(&accepted.upload_id, ExtractedBill::default())
        .await?;
    let record = ctx.store.get_upload(&accepted.upload_id).await?.unwrap();
    assert_eq!(record.status, UploadStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn stale_processing_without_lease_is_demoted_to_failed() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let accepted = ctx.state.uploads.submit_upload(submit(7)).await?;

    assert!(ctx.store.mark_processing(&accepted.upload_id).await?);
    ctx.store.force_stale(&accepted.upload_id);

    let stats = ctx.store.reconcile_queue_state().await?;
    assert_eq!(stats.failed_stale, 1);
    let record = ctx.store.get_upload(&accepted.upload_id).await?.unwrap();
    assert_eq!(record.status, UploadStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some(STALE_RECOVERY_MESSAGE));
    assert!(record.completed_at.is_some());
    Ok(())
}

#[tokio::test]
async fn soft_deleted_pending_jobs_are_skipped_at_claim() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let first = ctx.state.uploads.submit_upload(submit(8)).await?;
    let second = ctx.state.uploads.submit_upload(submit(9)).await?;

    ctx.state
        .uploads
        .delete_bill(&first.upload_id, false, Some("tester"))
        .await?;

    let claimed = ctx.store.claim_next_pending_job().await?.unwrap();
    assert_eq!(claimed.upload_id, second.upload_id);
    assert!(ctx.store.claim_next_pending_job().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn restore_renumbers_the_queue() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let first = ctx.state.uploads.submit_upload(submit(10)).await?;
    let second = ctx.state.uploads.submit_upload(submit(11)).await?;

    ctx.state
        .uploads
        .delete_bill(&first.upload_id, false, None)
        .await?;
    let remaining = ctx.store.get_upload(&second.upload_id).await?.unwrap();
    assert_eq!(remaining.queue_position, Some(1));

    let restored = ctx.state.uploads.restore_bill(&first.upload_id).await?;
    assert!(!restored.is_deleted);
    let positions: Vec<Option<i32>> = vec![
        ctx.store
            .get_upload(&first.upload_id)
            .await?
            .unwrap()
            .queue_position,
        ctx.store
            .get_upload(&second.upload_id)
            .await?
            .unwrap()
            .queue_position,
    ];
    let mut sorted: Vec<i32> = positions.into_iter().flatten().collect();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![1, 2]);
    Ok(())
}

#[tokio::test]
async fn delete_and_restore_lifecycle_errors() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let accepted = ctx.state.uploads.submit_upload(submit(12)).await?;

    assert!(matches!(
        ctx.state.uploads.restore_bill(&accepted.upload_id).await,
        Err(Error::NotDeleted(_))
    ));

    ctx.state
        .uploads
        .delete_bill(&accepted.upload_id, false, None)
        .await?;
    assert!(matches!(
        ctx.state
            .uploads
            .delete_bill(&accepted.upload_id, false, None)
            .await,
        Err(Error::AlreadyDeleted(_))
    ));

    // Permanent delete removes the record entirely.
    ctx.state
        .uploads
        .delete_bill(&accepted.upload_id, true, None)
        .await?;
    assert!(ctx.store.get_upload(&accepted.upload_id).await?.is_none());
    assert!(matches!(
        ctx.state.uploads.get_status(&accepted.upload_id).await,
        Err(Error::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn retention_purges_expired_soft_deletes() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let accepted = ctx.state.uploads.submit_upload(submit(13)).await?;
    ctx.state
        .uploads
        .delete_bill(&accepted.upload_id, false, None)
        .await?;

    // retention_days defaults to 30; a worker with zero retention purges
    // immediately.
    let worker = beleg::services::RetentionWorker::new(
        ctx.state.store.clone(),
        &ctx.state.config.pipeline.uploads_dir,
        0,
        std::time::Duration::from_secs(3600),
    );
    let stats = worker.run_once().await?;
    assert_eq!(stats.eligible, 1);
    assert_eq!(stats.deleted, 1);
    assert!(ctx.store.get_upload(&accepted.upload_id).await?.is_none());

    // Idempotent per tick.
    let stats = worker.run_once().await?;
    assert_eq!(stats.eligible, 0);
    Ok(())
}
