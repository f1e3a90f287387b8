//! End-to-end verification scenarios against a stub embedding backend.

#[allow(unused)]
mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beleg_verifier::{
    BillInput, BillVerifier, CategoryInput, ChatBackend, FailureReason, InputItem, ItemStatus,
    MatchArbiter, MatchWeights, MatchingThresholds, SemanticMatcher,
};
use support::{apollo_catalog, TokenBackend};

fn verifier() -> BillVerifier {
    BillVerifier::new(
        SemanticMatcher::new(Arc::new(TokenBackend), MatchWeights::default(), 3),
        MatchingThresholds::default(),
    )
}

fn item(name: &str, amount: f64) -> InputItem {
    InputItem {
        item_name: name.into(),
        amount,
        quantity: None,
        rate: None,
        tieup_rate: None,
        page: None,
    }
}

fn bill(hospital: &str, category: &str, items: Vec<InputItem>) -> BillInput {
    BillInput {
        hospital_name: hospital.into(),
        categories: vec![CategoryInput {
            category_name: category.into(),
            items,
        }],
    }
}

/// Chat backend that always returns the same reply.
struct CannedChat(String);

#[async_trait]
impl ChatBackend for CannedChat {
    async fn generate(
        &self,
        _model: &str,
        _prompt: &str,
        _max_tokens: u32,
        _timeout: Duration,
    ) -> Result<String, String> {
        Ok(self.0.clone())
    }
}

fn arbiter_with_reply(reply: &str) -> Arc<MatchArbiter> {
    Arc::new(MatchArbiter::new(
        Arc::new(CannedChat(reply.into())),
        "primary",
        "secondary",
        0.7,
        128,
        Duration::from_secs(5),
    ))
}

#[tokio::test]
async fn consultation_with_doctor_suffix_is_green() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let catalog = apollo_catalog(dir.path(), cache.path()).await.snapshot();

    let input = bill(
        "Apollo Hospital",
        "Consultation",
        vec![item("1. CONSULTATION - FIRST VISIT | Dr. A. Kumar", 1500.0)],
    );
    let result = verifier().verify_bill(&input, &catalog).await?;

    assert_eq!(result.matched_hospital.as_deref(), Some("Apollo Hospital"));
    let row = &result.categories[0].items[0];
    assert_eq!(row.status, ItemStatus::Green);
    assert_eq!(row.matched_item.as_deref(), Some("Consultation"));
    assert_eq!(row.allowed_amount, 1500.0);
    assert_eq!(row.extra_amount, 0.0);
    assert!(!row.arbitrated);

    assert_eq!(result.summary.green, 1);
    assert_eq!(result.totals.bill, 1500.0);
    assert_eq!(result.totals.allowed, 1500.0);
    assert!(result.financials_balanced);
    Ok(())
}

#[tokio::test]
async fn over_billed_mri_is_red_with_extra() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let catalog = apollo_catalog(dir.path(), cache.path()).await.snapshot();

    let input = bill(
        "Apollo Hospital",
        "Radiology",
        vec![item("MRI BRAIN | Dr. X", 10770.0)],
    );
    let result = verifier().verify_bill(&input, &catalog).await?;

    let row = &result.categories[0].items[0];
    assert_eq!(row.status, ItemStatus::Red);
    assert_eq!(row.matched_item.as_deref(), Some("MRI Brain"));
    assert_eq!(row.allowed_amount, 8500.0);
    assert_eq!(row.extra_amount, 2270.0);

    assert_eq!(result.totals.extra, 2270.0);
    assert!(result.financials_balanced);
    Ok(())
}

#[tokio::test]
async fn registration_fee_is_admin_charge() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let catalog = apollo_catalog(dir.path(), cache.path()).await.snapshot();

    let input = bill(
        "Apollo Hospital",
        "Consultation",
        vec![item("Registration Fee", 200.0)],
    );
    let result = verifier().verify_bill(&input, &catalog).await?;

    let row = &result.categories[0].items[0];
    assert_eq!(row.status, ItemStatus::AllowedNotComparable);
    assert_eq!(row.failure_reason, Some(FailureReason::AdminCharge));
    assert_eq!(result.totals.unclassified, 200.0);
    assert!(result.financials_balanced);
    Ok(())
}

#[tokio::test]
async fn unknown_treatment_is_not_in_tieup() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let catalog = apollo_catalog(dir.path(), cache.path()).await.snapshot();

    let input = bill(
        "Apollo Hospital",
        "Radiology",
        vec![item("Experimental Treatment Z", 10000.0)],
    );
    let result = verifier().verify_bill(&input, &catalog).await?;

    let row = &result.categories[0].items[0];
    assert_eq!(row.status, ItemStatus::Unclassified);
    assert_eq!(row.failure_reason, Some(FailureReason::NotInTieup));
    assert!(row.best_candidate.is_none());
    assert_eq!(result.totals.unclassified, 10000.0);
    assert!(result.financials_balanced);
    Ok(())
}

#[tokio::test]
async fn unknown_hospital_unclassifies_everything() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let catalog = apollo_catalog(dir.path(), cache.path()).await.snapshot();

    let input = bill(
        "City General Clinic",
        "Consultation",
        vec![
            item("Consultation", 1500.0),
            item("MRI Brain", 8500.0),
        ],
    );
    let result = verifier().verify_bill(&input, &catalog).await?;

    assert!(result.matched_hospital.is_none());
    for row in result.items() {
        assert_eq!(row.status, ItemStatus::Unclassified);
        assert_eq!(row.failure_reason, Some(FailureReason::HospitalNotMatched));
    }
    assert_eq!(result.totals.unclassified, 10000.0);
    assert!(result.financials_balanced);
    Ok(())
}

#[tokio::test]
async fn borderline_item_accepted_by_arbiter() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let catalog = apollo_catalog(dir.path(), cache.path()).await.snapshot();

    let input = bill(
        "Apollo Hospital",
        "Procedures",
        vec![item("Dialysis Unit Four Hours", 3000.0)],
    );

    let approving = verifier().with_arbiter(arbiter_with_reply(
        r#"{"match": true, "confidence": 0.9, "normalized_name": "dialysis session"}"#,
    ));
    let result = approving.verify_bill(&input, &catalog).await?;
    let row = &result.categories[0].items[0];
    assert_eq!(row.status, ItemStatus::Green);
    assert_eq!(row.matched_item.as_deref(), Some("Dialysis Session"));
    assert!(row.arbitrated);

    let rejecting = verifier().with_arbiter(arbiter_with_reply(
        r#"{"match": false, "confidence": 0.95}"#,
    ));
    let result = rejecting.verify_bill(&input, &catalog).await?;
    let row = &result.categories[0].items[0];
    assert_eq!(row.status, ItemStatus::Unclassified);
    assert_eq!(row.failure_reason, Some(FailureReason::LowSimilarity));
    assert!(row.arbitrated);
    assert!(row.best_candidate.is_some());
    Ok(())
}

#[tokio::test]
async fn bundle_only_candidate_is_mismatch() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let catalog = apollo_catalog(dir.path(), cache.path()).await.snapshot();

    // No arbiter configured: the borderline bundle candidate falls through
    // to failure classification.
    let input = bill(
        "Apollo Hospital",
        "Procedures",
        vec![item("Knee Replacement Revision Surgery Bilateral", 160000.0)],
    );
    let result = verifier().verify_bill(&input, &catalog).await?;

    let row = &result.categories[0].items[0];
    assert_eq!(row.status, ItemStatus::Mismatch);
    assert_eq!(row.failure_reason, Some(FailureReason::PackageOnly));
    assert!(row.best_candidate.is_some());
    assert_eq!(result.summary.mismatch, 1);
    Ok(())
}

#[tokio::test]
async fn header_artifact_is_ignored() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let catalog = apollo_catalog(dir.path(), cache.path()).await.snapshot();

    let input = bill(
        "Apollo Hospital",
        "Hospital - ",
        vec![item("UNKNOWN", 0.0), item("Registration Fee", 200.0)],
    );
    let result = verifier().verify_bill(&input, &catalog).await?;

    assert_eq!(result.categories[0].items[0].status, ItemStatus::IgnoredArtifact);
    assert_eq!(result.summary.ignored_artifact, 1);
    // The non-artifact sibling is still classified.
    assert_eq!(
        result.categories[0].items[1].status,
        ItemStatus::AllowedNotComparable
    );
    assert_eq!(result.summary.total(), 2);
    assert!(result.financials_balanced);
    Ok(())
}

#[tokio::test]
async fn unit_item_scales_allowance_by_quantity() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let catalog = apollo_catalog(dir.path(), cache.path()).await.snapshot();

    let mut row = item("Paracetamol 500mg Tab 10'S", 100.0);
    row.quantity = Some(10.0);
    let input = bill("Apollo Hospital", "Pharmacy", vec![row]);
    let result = verifier().verify_bill(&input, &catalog).await?;

    let row = &result.categories[0].items[0];
    assert_eq!(row.status, ItemStatus::Green);
    assert_eq!(row.allowed_amount, 100.0);
    assert!(result.financials_balanced);
    Ok(())
}

#[tokio::test]
async fn weak_category_falls_back_to_union_search() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let catalog = apollo_catalog(dir.path(), cache.path()).await.snapshot();

    // Category name shares nothing with the catalog's categories, but the
    // item exists under Radiology; the union search still finds it.
    let input = bill(
        "Apollo Hospital",
        "Imaging Investigations",
        vec![item("MRI Brain", 8000.0)],
    );
    let result = verifier().verify_bill(&input, &catalog).await?;

    assert!(result.categories[0].searched_union);
    let row = &result.categories[0].items[0];
    assert_eq!(row.status, ItemStatus::Green);
    assert_eq!(row.matched_item.as_deref(), Some("MRI Brain"));
    Ok(())
}
