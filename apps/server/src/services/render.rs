//! Verification output rendering and result validation.
//!
//! The text rendering is a stable, parser-oriented contract (v1): the
//! dashboard splits on the `Overall Summary` / `Financial Summary` /
//! `Category:` / per-item labels. Artifacts are excluded from the final
//! view and visible in the debug view.

use beleg_verifier::{
    BillInput, CategoryResult, FailureReason, ItemResult, ItemStatus, VerificationResult,
};

/// Diagnostic-only findings. Logged and surfaced, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    CompletenessViolation(String),
    CounterViolation(String),
    ReconciliationImbalance,
}

fn money(amount: f64) -> String {
    format!("{amount:.2}")
}

fn money_or_na(amount: f64, not_comparable: bool) -> String {
    if not_comparable {
        "N/A".to_string()
    } else {
        money(amount)
    }
}

fn decision(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Green => "green",
        ItemStatus::Red => "red",
        ItemStatus::Unclassified => "unclassified",
        ItemStatus::AllowedNotComparable => "allowed_not_comparable",
        ItemStatus::Mismatch => "mismatch",
        ItemStatus::IgnoredArtifact => "ignored_artifact",
    }
}

fn reason(item: &ItemResult) -> String {
    match item.failure_reason {
        Some(FailureReason::NotInTieup) => "NOT_IN_TIEUP".into(),
        Some(FailureReason::LowSimilarity) => "LOW_SIMILARITY".into(),
        Some(FailureReason::PackageOnly) => "PACKAGE_ONLY".into(),
        Some(FailureReason::AdminCharge) => "ADMIN_CHARGE".into(),
        Some(FailureReason::HospitalNotMatched) => "HOSPITAL_NOT_MATCHED".into(),
        None if item.status == ItemStatus::Green => "Match within allowed limit".into(),
        None => "N/A".into(),
    }
}

fn push_item(lines: &mut Vec<String>, item: &ItemResult) {
    let not_comparable = matches!(
        item.status,
        ItemStatus::Unclassified | ItemStatus::Mismatch | ItemStatus::AllowedNotComparable
    );
    let best_match = item
        .matched_item
        .clone()
        .or_else(|| item.best_candidate.as_ref().map(|c| c.tie_up_name.clone()))
        .unwrap_or_else(|| "N/A".into());
    let similarity = item
        .similarity
        .or(item.best_candidate.as_ref().map(|c| c.semantic))
        .map(|s| format!("{:.2}%", s * 100.0))
        .unwrap_or_else(|| "N/A".into());

    lines.push(format!("Bill Item: {}", item.bill_item));
    lines.push(format!("Best Match: {best_match}"));
    lines.push(format!("Similarity: {similarity}"));
    lines.push(format!(
        "Allowed: {}",
        money_or_na(item.allowed_amount, not_comparable)
    ));
    lines.push(format!("Billed: {}", money(item.bill_amount)));
    lines.push(format!(
        "Extra: {}",
        money_or_na(item.extra_amount, not_comparable)
    ));
    lines.push(format!("Decision: {}", decision(item.status)));
    lines.push(format!("Reason: {}", reason(item)));
    lines.push(String::new());
}

fn push_summary(lines: &mut Vec<String>, result: &VerificationResult) {
    let s = &result.summary;
    lines.push("Overall Summary".into());
    lines.push(format!(
        "Total Items: {}",
        s.green + s.red + s.unclassified + s.mismatch + s.allowed_not_comparable
    ));
    lines.push(format!("GREEN: {}", s.green));
    lines.push(format!("RED: {}", s.red));
    lines.push(format!("UNCLASSIFIED: {}", s.unclassified));
    lines.push(format!("MISMATCH: {}", s.mismatch));
    lines.push(format!(
        "ALLOWED_NOT_COMPARABLE: {}",
        s.allowed_not_comparable
    ));
    lines.push(String::new());

    lines.push("Financial Summary".into());
    lines.push(format!("Total Bill Amount: {}", money(result.totals.bill)));
    lines.push(format!(
        "Total Allowed Amount: {}",
        money(result.totals.allowed)
    ));
    lines.push(format!("Total Extra Amount: {}", money(result.totals.extra)));
    lines.push(format!(
        "Total Unclassified Amount: {}",
        money(result.totals.unclassified)
    ));
    lines.push(String::new());
}

fn render_categories(
    lines: &mut Vec<String>,
    categories: &[CategoryResult],
    include_artifacts: bool,
) {
    for category in categories {
        let visible: Vec<&ItemResult> = category
            .items
            .iter()
            .filter(|i| include_artifacts || i.status != ItemStatus::IgnoredArtifact)
            .collect();
        if visible.is_empty() {
            continue;
        }
        lines.push(format!("Category: {}", category.category));
        for item in visible {
            push_item(lines, item);
        }
    }
}

/// Stable v1 rendering for the dashboard. Artifacts are excluded.
pub fn render_final_text(result: &VerificationResult) -> String {
    let mut lines = Vec::new();
    push_summary(&mut lines, result);
    render_categories(&mut lines, &result.categories, false);
    lines.join("\n").trim_end().to_string()
}

/// Debug rendering: artifacts included, plus per-item candidate lists with
/// full score breakdowns.
pub fn render_debug_text(result: &VerificationResult) -> String {
    let mut lines = Vec::new();
    push_summary(&mut lines, result);
    if !result.financials_balanced {
        lines.push("WARNING: financials not balanced".into());
        lines.push(String::new());
    }
    for category in &result.categories {
        lines.push(format!(
            "Category: {} (matched: {}, similarity: {})",
            category.category,
            category.matched_category.as_deref().unwrap_or("N/A"),
            category
                .category_similarity
                .map(|s| format!("{s:.3}"))
                .unwrap_or_else(|| "N/A".into()),
        ));
        if category.searched_union {
            lines.push("  [searched hospital-wide item union]".into());
        }
        for item in &category.items {
            push_item(&mut lines, item);
            for candidate in &item.candidates {
                lines.push(format!(
                    "  candidate: {} semantic={:.3} token={:.3} containment={:.3} hybrid={:.3}",
                    candidate.tie_up_name,
                    candidate.semantic,
                    candidate.token_overlap,
                    candidate.containment,
                    candidate.hybrid,
                ));
            }
            if !item.candidates.is_empty() {
                lines.push(String::new());
            }
        }
    }
    lines.join("\n").trim_end().to_string()
}

/// Validate a result against its input: completeness (every non-artifact
/// input item appears exactly once), counter reconciliation, and the
/// financial balance flag.
pub fn validate_result(input: &BillInput, result: &VerificationResult) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    // Completeness: category-by-category in order, comparing original item
    // text multisets with artifacts excluded on both sides.
    if input.categories.len() != result.categories.len() {
        issues.push(ValidationIssue::CompletenessViolation(format!(
            "input has {} categories, output has {}",
            input.categories.len(),
            result.categories.len()
        )));
    } else {
        for (input_category, output_category) in
            input.categories.iter().zip(result.categories.iter())
        {
            let mut expected: Vec<&str> = input_category
                .items
                .iter()
                .filter(|item| {
                    !beleg_verifier::artifact::is_artifact(
                        &input_category.category_name,
                        &item.item_name,
                        item.amount,
                        item.amount,
                    )
                })
                .map(|item| item.item_name.as_str())
                .collect();
            let mut actual: Vec<&str> = output_category
                .items
                .iter()
                .filter(|item| item.status != ItemStatus::IgnoredArtifact)
                .map(|item| item.bill_item.as_str())
                .collect();
            expected.sort_unstable();
            actual.sort_unstable();
            if expected != actual {
                issues.push(ValidationIssue::CompletenessViolation(format!(
                    "category '{}': expected {} items, found {}",
                    input_category.category_name,
                    expected.len(),
                    actual.len()
                )));
            }
        }
    }

    let item_total: usize = result.categories.iter().map(|c| c.items.len()).sum();
    if result.summary.total() as usize != item_total {
        issues.push(ValidationIssue::CounterViolation(format!(
            "summary counts {} items, result holds {}",
            result.summary.total(),
            item_total
        )));
    }

    if !result.financials_balanced {
        issues.push(ValidationIssue::ReconciliationImbalance);
    }

    for issue in &issues {
        tracing::error!(?issue, "verification result validation issue");
    }
    issues
}
