//! End-to-end pipeline: submit, worker processing, verification, edits,
//! and failure handling.

#[allow(unused)]
mod support;

use beleg::models::{LineItemEdit, ProcessingStage, UploadStatus, VerificationStatus};
use beleg::Error;
use beleg_verifier::ItemStatus;
use support::*;

#[tokio::test]
async fn worker_processes_upload_end_to_end() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let accepted = ctx.state.uploads.submit_upload(submit(1)).await?;
    assert_eq!(accepted.status, UploadStatus::Pending);

    let staging = ctx.state.uploads.upload_dir(&accepted.upload_id);
    assert!(staging.join("original.pdf").exists());

    let worker = ctx.state.upload_worker();
    assert!(worker.process_next().await?);
    assert!(!worker.process_next().await?);

    let record = ctx
        .state
        .uploads
        .get_bill_details(&accepted.upload_id)
        .await?;
    assert_eq!(record.status, UploadStatus::Completed);
    assert_eq!(record.verification_status, VerificationStatus::Completed);
    assert_eq!(record.processing_stage(), ProcessingStage::Completed);
    assert!(record.processing_time_seconds.is_some());

    let bill = record.extracted_bill.as_ref().unwrap();
    assert_eq!(bill.categories.len(), 2);
    assert_eq!(bill.grand_total, 12270.0);

    let result = record.verification_result.as_ref().unwrap();
    assert_eq!(result.summary.green, 1);
    assert_eq!(result.summary.red, 1);
    assert_eq!(result.totals.extra, 2270.0);
    assert!(result.financials_balanced);

    let rendered = record.verification_result_text.as_ref().unwrap();
    assert!(rendered.contains("Overall Summary"));
    assert!(rendered.contains("Financial Summary"));
    assert!(rendered.contains("Category: CONSULTATION"));
    assert!(rendered.contains("Decision: red"));

    // Staged files are cleaned up after processing.
    assert!(!staging.exists());
    Ok(())
}

#[tokio::test]
async fn status_snapshot_tracks_stages() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let accepted = ctx.state.uploads.submit_upload(submit(2)).await?;

    let snapshot = ctx.state.uploads.get_status(&accepted.upload_id).await?;
    assert_eq!(snapshot.status, UploadStatus::Pending);
    assert_eq!(snapshot.processing_stage, ProcessingStage::Queued);
    assert_eq!(snapshot.queue_position, Some(1));

    ctx.state.upload_worker().process_next().await?;
    let snapshot = ctx.state.uploads.get_status(&accepted.upload_id).await?;
    assert_eq!(snapshot.status, UploadStatus::Completed);
    assert_eq!(snapshot.processing_stage, ProcessingStage::Completed);
    assert_eq!(snapshot.page_count, Some(1));
    Ok(())
}

#[tokio::test]
async fn submit_rejects_invalid_input() {
    let ctx = test_state().await;

    let mut bad_employee = submit(3);
    bad_employee.employee_id = "1234".into();
    assert!(matches!(
        ctx.state.uploads.submit_upload(bad_employee).await,
        Err(Error::InvalidInput(_))
    ));

    let mut empty = submit(4);
    empty.bytes.clear();
    assert!(matches!(
        ctx.state.uploads.submit_upload(empty).await,
        Err(Error::InvalidInput(_))
    ));

    let mut unknown_hospital = submit(5);
    unknown_hospital.hospital_name = "Nowhere Clinic".into();
    assert!(matches!(
        ctx.state.uploads.submit_upload(unknown_hospital).await,
        Err(Error::InvalidInput(_))
    ));

    let mut not_pdf = submit(6);
    not_pdf.original_filename = "bill.docx".into();
    assert!(matches!(
        ctx.state.uploads.submit_upload(not_pdf).await,
        Err(Error::InvalidInput(_))
    ));

    let mut bad_date = submit(7);
    bad_date.invoice_date = Some("15/01/2026".into());
    assert!(matches!(
        ctx.state.uploads.submit_upload(bad_date).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn lookup_validates_upload_ids() {
    let ctx = test_state().await;
    assert!(matches!(
        ctx.state.uploads.get_status("not-an-id").await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        ctx.state
            .uploads
            .get_status("00000000000000000000000000000000")
            .await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn details_not_ready_before_completion() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let accepted = ctx.state.uploads.submit_upload(submit(8)).await?;
    assert!(matches!(
        ctx.state.uploads.get_bill_details(&accepted.upload_id).await,
        Err(Error::NotReady(_))
    ));
    Ok(())
}

#[tokio::test]
async fn line_item_edits_recompute_and_reverify() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let accepted = ctx.state.uploads.submit_upload(submit(9)).await?;
    ctx.state.upload_worker().process_next().await?;

    // Out-of-range and unknown-category edits are rejected.
    assert!(matches!(
        ctx.state
            .uploads
            .patch_line_items(
                &accepted.upload_id,
                vec![LineItemEdit {
                    category_name: "RADIOLOGY".into(),
                    item_index: 5,
                    qty: None,
                    rate: None,
                    tieup_rate: None,
                }],
            )
            .await,
        Err(Error::InvalidInput(_))
    ));

    // Override the tie-up rate for the MRI row, then re-verify: the row
    // flips from RED to GREEN under the raised allowance.
    let edited = ctx
        .state
        .uploads
        .patch_line_items(
            &accepted.upload_id,
            vec![LineItemEdit {
                category_name: "RADIOLOGY".into(),
                item_index: 0,
                qty: None,
                rate: None,
                tieup_rate: Some(11000.0),
            }],
        )
        .await?;
    assert_eq!(edited.len(), 2);

    let result = ctx
        .state
        .verification
        .verify_and_store(&accepted.upload_id)
        .await?;
    let mri = result
        .items()
        .find(|i| i.bill_item.contains("MRI"))
        .unwrap();
    assert_eq!(mri.status, ItemStatus::Green);
    assert_eq!(mri.allowed_amount, 11000.0);
    assert_eq!(result.summary.red, 0);
    Ok(())
}

#[tokio::test]
async fn qty_rate_edit_recomputes_amount() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let accepted = ctx.state.uploads.submit_upload(submit(10)).await?;
    ctx.state.upload_worker().process_next().await?;

    let edited = ctx
        .state
        .uploads
        .patch_line_items(
            &accepted.upload_id,
            vec![LineItemEdit {
                category_name: "CONSULTATION".into(),
                item_index: 0,
                qty: Some(2.0),
                rate: Some(750.0),
                tieup_rate: None,
            }],
        )
        .await?;
    assert_eq!(edited[0].items[0].amount, 1500.0);

    // The stored bill itself is untouched.
    let record = ctx
        .state
        .uploads
        .get_bill_details(&accepted.upload_id)
        .await?;
    assert!(record.extracted_bill.as_ref().unwrap().categories[0].items[0]
        .quantity
        .is_none());
    assert_eq!(record.line_item_edits.len(), 1);
    Ok(())
}

#[tokio::test]
async fn fully_failed_ocr_marks_upload_failed() -> anyhow::Result<()> {
    let ctx = test_state_with_ocr(vec![page(1, ""), page(2, "  ")]).await;
    let accepted = ctx.state.uploads.submit_upload(submit(11)).await?;
    let staging = ctx.state.uploads.upload_dir(&accepted.upload_id);

    ctx.state.upload_worker().process_next().await?;

    let snapshot = ctx.state.uploads.get_status(&accepted.upload_id).await?;
    assert_eq!(snapshot.status, UploadStatus::Failed);
    assert!(snapshot.error_message.unwrap().contains("no text"));
    // Cleanup runs on failure too.
    assert!(!staging.exists());
    Ok(())
}

#[tokio::test]
async fn partial_ocr_failure_is_absorbed_as_warning() -> anyhow::Result<()> {
    let ctx = test_state_with_ocr(vec![page(1, SAMPLE_BILL_TEXT), page(2, "")]).await;
    let accepted = ctx.state.uploads.submit_upload(submit(12)).await?;
    ctx.state.upload_worker().process_next().await?;

    let record = ctx
        .state
        .uploads
        .get_bill_details(&accepted.upload_id)
        .await?;
    assert_eq!(record.status, UploadStatus::Completed);
    let bill = record.extracted_bill.as_ref().unwrap();
    assert_eq!(bill.page_count, 2);
    assert_eq!(bill.extraction_warnings.len(), 1);
    assert!(bill.extraction_warnings[0].contains("page 2"));
    Ok(())
}

#[tokio::test]
async fn failed_upload_can_be_resubmitted() -> anyhow::Result<()> {
    let ctx = test_state_with_ocr(vec![page(1, "")]).await;
    let payload = submit(13);
    let accepted = ctx.state.uploads.submit_upload(payload.clone()).await?;
    ctx.state.upload_worker().process_next().await?;
    assert_eq!(
        ctx.state
            .uploads
            .get_status(&accepted.upload_id)
            .await?
            .status,
        UploadStatus::Failed
    );

    // Same bytes again: the FAILED record is re-enqueued, not duplicated.
    let retried = ctx.state.uploads.submit_upload(payload).await?;
    assert_eq!(retried.upload_id, accepted.upload_id);
    assert!(retried.existing);
    assert_eq!(retried.status, UploadStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn hospitals_listing_and_catalog_reload() -> anyhow::Result<()> {
    let ctx = test_state().await;
    let hospitals = ctx.state.uploads.list_hospitals();
    assert_eq!(hospitals.len(), 1);
    assert_eq!(hospitals[0].hospital_name, "Apollo Hospital");
    assert_eq!(hospitals[0].slug, "apollo_hospital");
    assert_eq!(hospitals[0].category_count, 2);
    assert_eq!(hospitals[0].item_count, 2);

    let reloaded = ctx.state.uploads.reload_catalog().await?;
    assert_eq!(reloaded.len(), 1);
    Ok(())
}
