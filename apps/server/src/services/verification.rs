//! Verification service: bridges stored bills and the verification engine.

use std::sync::Arc;

use beleg_catalog::CatalogService;
use beleg_verifier::{BillInput, BillVerifier, CategoryInput, InputItem, VerificationResult};

use crate::db::BillStore;
use crate::models::{BillCategory, ExtractedBill, LineItemEdit, UploadRecord};
use crate::services::render::{render_final_text, validate_result};
use crate::{Error, Result};

/// Apply manual edits to the extracted categories without mutating the
/// stored bill. A qty/rate edit recomputes the row amount.
pub fn apply_edits(bill: &ExtractedBill, edits: &[LineItemEdit]) -> Vec<BillCategory> {
    let mut categories = bill.categories.clone();
    for edit in edits {
        let Some(category) = categories
            .iter_mut()
            .find(|c| c.category_name == edit.category_name)
        else {
            tracing::warn!(category = %edit.category_name, "edit references unknown category");
            continue;
        };
        let Some(item) = category.items.get_mut(edit.item_index) else {
            tracing::warn!(
                category = %edit.category_name,
                index = edit.item_index,
                "edit references out-of-range item"
            );
            continue;
        };
        if let Some(qty) = edit.qty {
            item.quantity = Some(qty);
        }
        if let Some(rate) = edit.rate {
            item.rate = Some(rate);
        }
        if let (Some(quantity), Some(rate)) = (item.quantity, item.rate) {
            item.amount = quantity * rate;
        }
    }
    categories
}

/// Build verifier input from a completed record, folding in line-item
/// edits (including tie-up rate overrides).
pub fn bill_input_from_record(record: &UploadRecord) -> Result<BillInput> {
    let bill = record
        .extracted_bill
        .as_ref()
        .ok_or_else(|| Error::NotReady(format!("upload {} has no extracted bill", record.upload_id)))?;

    let categories = apply_edits(bill, &record.line_item_edits)
        .into_iter()
        .map(|category| {
            let tieup_override = |index: usize| {
                record
                    .line_item_edits
                    .iter()
                    .find(|e| e.category_name == category.category_name && e.item_index == index)
                    .and_then(|e| e.tieup_rate)
            };
            CategoryInput {
                items: category
                    .items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| InputItem {
                        item_name: item.item_name.clone(),
                        amount: item.amount,
                        quantity: item.quantity,
                        rate: item.rate,
                        tieup_rate: tieup_override(index),
                        page: item.page,
                    })
                    .collect(),
                category_name: category.category_name,
            }
        })
        .collect();

    Ok(BillInput {
        hospital_name: record.hospital_name.clone(),
        categories,
    })
}

pub struct VerificationService {
    store: Arc<dyn BillStore>,
    catalog: Arc<CatalogService>,
    verifier: BillVerifier,
}

impl VerificationService {
    pub fn new(
        store: Arc<dyn BillStore>,
        catalog: Arc<CatalogService>,
        verifier: BillVerifier,
    ) -> Self {
        Self {
            store,
            catalog,
            verifier,
        }
    }

    /// Run verification for a completed upload and persist the outcome.
    /// Records the failure sub-state instead of leaving the dashboard
    /// polling forever.
    pub async fn verify_and_store(&self, upload_id: &str) -> Result<VerificationResult> {
        let record = self
            .store
            .get_upload(upload_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("upload {upload_id}")))?;
        let input = bill_input_from_record(&record)?;

        self.store.mark_verification_processing(upload_id).await?;
        match self.run(&input).await {
            Ok((result, rendered)) => {
                self.store
                    .save_verification_result(upload_id, &result, &rendered)
                    .await?;
                tracing::info!(
                    upload_id,
                    green = result.summary.green,
                    red = result.summary.red,
                    balanced = result.financials_balanced,
                    "verification completed"
                );
                Ok(result)
            }
            Err(e) => {
                self.store
                    .mark_verification_failed(upload_id, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    async fn run(&self, input: &BillInput) -> Result<(VerificationResult, String)> {
        let catalog = self.catalog.snapshot();
        let result = self.verifier.verify_bill(input, &catalog).await?;
        // Diagnostic-only: violations are logged, the result still stands.
        let _ = validate_result(input, &result);
        let rendered = render_final_text(&result);
        Ok((result, rendered))
    }
}
