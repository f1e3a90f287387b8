//! Bill verification orchestration.
//!
//! Hospital match, then per-category match, then per-item match with the
//! hybrid matcher and optional LLM arbitration, then financial aggregation.
//! The output preserves input order and cardinality: every input item
//! appears exactly once.

use std::sync::Arc;

use beleg_catalog::text::normalize_text;
use beleg_catalog::{Catalog, ItemKind, ItemRef, TieUpItem, VectorIndex};

use crate::arbiter::MatchArbiter;
use crate::artifact::{is_admin_charge, is_artifact};
use crate::matcher::{ScoredCandidate, SemanticMatcher};
use crate::price::classify_price;
use crate::result::{
    BillInput, CandidateInfo, CategoryResult, FailureReason, FinancialTotals, InputItem,
    ItemResult, ItemStatus, SummaryCounts, VerificationResult, BALANCE_TOLERANCE,
};
use crate::Result;

/// Decision thresholds. The defaults are the tuned production values;
/// every call site reads this struct, nothing hard-codes a cutoff.
#[derive(Debug, Clone, Copy)]
pub struct MatchingThresholds {
    /// Below-or-at this hospital similarity, nothing is comparable.
    pub hospital: f32,
    /// At or above: trust the matched category's item index.
    pub category_strong: f32,
    /// Between weak and strong: use the category but log a soft warning.
    pub category_weak: f32,
    pub hybrid_accept: f32,
    pub semantic_autoaccept: f32,
    pub token_overlap_accept: f32,
    pub containment_accept: f32,
    /// Lower bound of the arbiter band `[low, autoaccept)`.
    pub llm_band_low: f32,
    /// Below this best-candidate similarity the item is simply not in the
    /// tie-up.
    pub not_in_tieup_below: f32,
    pub arbiter_min_confidence: f32,
}

impl Default for MatchingThresholds {
    fn default() -> Self {
        Self {
            hospital: 0.50,
            category_strong: 0.70,
            category_weak: 0.50,
            hybrid_accept: 0.60,
            semantic_autoaccept: 0.85,
            token_overlap_accept: 0.50,
            containment_accept: 0.70,
            llm_band_low: 0.70,
            not_in_tieup_below: 0.50,
            arbiter_min_confidence: 0.70,
        }
    }
}

/// Where item candidates are searched and how hits map back to tie-up
/// items.
struct ItemScope<'a> {
    index: &'a VectorIndex,
    /// `None` for a per-category index (hit id == item id).
    union_refs: Option<&'a [ItemRef]>,
    category_id: usize,
}

impl ItemScope<'_> {
    fn resolve(&self, hit_id: usize) -> ItemRef {
        match self.union_refs {
            Some(refs) => refs[hit_id],
            None => ItemRef {
                category_id: self.category_id,
                item_id: hit_id,
            },
        }
    }
}

pub struct BillVerifier {
    matcher: SemanticMatcher,
    arbiter: Option<Arc<MatchArbiter>>,
    thresholds: MatchingThresholds,
}

impl BillVerifier {
    pub fn new(matcher: SemanticMatcher, thresholds: MatchingThresholds) -> Self {
        Self {
            matcher,
            arbiter: None,
            thresholds,
        }
    }

    pub fn with_arbiter(mut self, arbiter: Arc<MatchArbiter>) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    /// Verify one extracted bill against a catalog snapshot.
    pub async fn verify_bill(
        &self,
        input: &BillInput,
        catalog: &Catalog,
    ) -> Result<VerificationResult> {
        let hospital_query = normalize_text(&input.hospital_name);
        let hospital_vec = self.matcher.embed_one(&hospital_query).await?;
        let hospital_hit = catalog.hospital_index().search(&hospital_vec, 1).pop();

        let (hospital_id, hospital_similarity) = match hospital_hit {
            Some(hit) if hit.score > self.thresholds.hospital => (Some(hit.id), hit.score),
            Some(hit) => (None, hit.score),
            None => (None, 0.0),
        };

        let mut categories = Vec::with_capacity(input.categories.len());
        match hospital_id {
            Some(hospital_id) => {
                for category in &input.categories {
                    categories
                        .push(self.verify_category(catalog, hospital_id, category).await?);
                }
            }
            None => {
                tracing::warn!(
                    hospital = %input.hospital_name,
                    similarity = hospital_similarity,
                    "hospital below match threshold; all items unclassified"
                );
                for category in &input.categories {
                    let items = category
                        .items
                        .iter()
                        .map(|item| {
                            if is_artifact(
                                &category.category_name,
                                &item.item_name,
                                item.amount,
                                item.amount,
                            ) {
                                ignored_artifact_result(item)
                            } else {
                                unmatched_result(
                                    item,
                                    ItemStatus::Unclassified,
                                    FailureReason::HospitalNotMatched,
                                )
                            }
                        })
                        .collect();
                    categories.push(CategoryResult {
                        category: category.category_name.clone(),
                        matched_category: None,
                        category_similarity: None,
                        searched_union: false,
                        items,
                    });
                }
            }
        }

        let matched_hospital =
            hospital_id.map(|id| catalog.hospital(id).hospital_name.clone());
        Ok(self.aggregate(input, matched_hospital, hospital_similarity, categories))
    }

    async fn verify_category(
        &self,
        catalog: &Catalog,
        hospital_id: usize,
        category: &crate::result::CategoryInput,
    ) -> Result<CategoryResult> {
        let indices = catalog.indices_by_id(hospital_id);
        let category_query = normalize_text(&category.category_name);
        let category_hit = if indices.category_index.is_empty() {
            None
        } else {
            let vec = self.matcher.embed_one(&category_query).await?;
            indices.category_index.search(&vec, 1).pop()
        };

        let (matched_category, category_similarity, scope) = match category_hit {
            Some(hit) if hit.score >= self.thresholds.category_strong => (
                Some(indices.category_index.raw_text(hit.id).to_string()),
                Some(hit.score),
                ItemScope {
                    index: &indices.item_indices[hit.id],
                    union_refs: None,
                    category_id: hit.id,
                },
            ),
            Some(hit) if hit.score >= self.thresholds.category_weak => {
                tracing::warn!(
                    category = %category.category_name,
                    matched = indices.category_index.raw_text(hit.id),
                    similarity = hit.score,
                    "category match below strong threshold; proceeding"
                );
                (
                    Some(indices.category_index.raw_text(hit.id).to_string()),
                    Some(hit.score),
                    ItemScope {
                        index: &indices.item_indices[hit.id],
                        union_refs: None,
                        category_id: hit.id,
                    },
                )
            }
            Some(hit) => (
                // Too weak to trust: keep the guess for diagnostics, search
                // the hospital-wide union.
                Some(indices.category_index.raw_text(hit.id).to_string()),
                Some(hit.score),
                ItemScope {
                    index: &indices.union_index,
                    union_refs: Some(&indices.union_refs),
                    category_id: 0,
                },
            ),
            None => (
                None,
                None,
                ItemScope {
                    index: &indices.union_index,
                    union_refs: Some(&indices.union_refs),
                    category_id: 0,
                },
            ),
        };
        let searched_union = scope.union_refs.is_some();

        let mut items = Vec::with_capacity(category.items.len());
        for item in &category.items {
            items.push(
                self.verify_item(catalog, hospital_id, &category.category_name, &scope, item)
                    .await?,
            );
        }

        Ok(CategoryResult {
            category: category.category_name.clone(),
            matched_category,
            category_similarity,
            searched_union,
            items,
        })
    }

    async fn verify_item(
        &self,
        catalog: &Catalog,
        hospital_id: usize,
        category_name: &str,
        scope: &ItemScope<'_>,
        item: &InputItem,
    ) -> Result<ItemResult> {
        if is_artifact(category_name, &item.item_name, item.amount, item.amount) {
            return Ok(ignored_artifact_result(item));
        }

        let normalized = normalize_text(&item.item_name);
        let candidates = self.matcher.top_k(&normalized, scope.index).await?;
        let candidate_infos: Vec<CandidateInfo> =
            candidates.iter().map(candidate_info).collect();
        let best = candidates.first();

        let t = &self.thresholds;
        let mut accepted = best.map_or(false, |b| auto_accepts(t, b));

        let mut arbitrated = false;
        if !accepted {
            if let (Some(best), Some(arbiter)) = (best, &self.arbiter) {
                if in_arbiter_band(t, best) {
                    let verdict = arbiter.judge(&normalized, &best.normalized).await;
                    arbitrated = true;
                    accepted = verdict.matched && verdict.confidence >= t.arbiter_min_confidence;
                    tracing::debug!(
                        item = %normalized,
                        candidate = %best.normalized,
                        matched = verdict.matched,
                        confidence = verdict.confidence,
                        "arbiter verdict"
                    );
                }
            }
        }

        if accepted {
            let best = best.expect("accepted implies a candidate");
            let tie_up = catalog.tie_up_item(hospital_id, scope.resolve(best.id));
            let effective = effective_tie_up(tie_up, item);
            let outcome = classify_price(&effective, item.amount, item.quantity);
            return Ok(ItemResult {
                bill_item: item.item_name.clone(),
                status: outcome.status,
                bill_amount: item.amount,
                allowed_amount: outcome.allowed,
                extra_amount: outcome.extra,
                matched_item: Some(best.tie_up_name.clone()),
                similarity: Some(best.semantic),
                failure_reason: None,
                best_candidate: Some(candidate_info(best)),
                candidates: candidate_infos,
                arbitrated,
            });
        }

        // Failure classification, most specific first.
        let (status, reason, keep_best) = if is_admin_charge(&normalized) {
            (
                ItemStatus::AllowedNotComparable,
                FailureReason::AdminCharge,
                false,
            )
        } else {
            match best {
                Some(b) if b.semantic < t.not_in_tieup_below => {
                    (ItemStatus::Unclassified, FailureReason::NotInTieup, false)
                }
                Some(b)
                    if catalog
                        .tie_up_item(hospital_id, scope.resolve(b.id))
                        .kind
                        == ItemKind::Bundle =>
                {
                    (ItemStatus::Mismatch, FailureReason::PackageOnly, true)
                }
                Some(_) => (ItemStatus::Unclassified, FailureReason::LowSimilarity, true),
                None => (ItemStatus::Unclassified, FailureReason::NotInTieup, false),
            }
        };

        Ok(ItemResult {
            bill_item: item.item_name.clone(),
            status,
            bill_amount: item.amount,
            allowed_amount: 0.0,
            extra_amount: 0.0,
            matched_item: None,
            similarity: None,
            failure_reason: Some(reason),
            best_candidate: if keep_best {
                best.map(candidate_info)
            } else {
                None
            },
            candidates: candidate_infos,
            arbitrated,
        })
    }

    fn aggregate(
        &self,
        input: &BillInput,
        matched_hospital: Option<String>,
        hospital_similarity: f32,
        categories: Vec<CategoryResult>,
    ) -> VerificationResult {
        let mut summary = SummaryCounts::default();
        let mut totals = FinancialTotals::default();

        for item in categories.iter().flat_map(|c| c.items.iter()) {
            summary.record(item.status);
            totals.bill += item.bill_amount;
            match item.status {
                ItemStatus::Green | ItemStatus::Red => {
                    totals.allowed += item.allowed_amount;
                    totals.extra += item.extra_amount;
                }
                ItemStatus::Unclassified
                | ItemStatus::Mismatch
                | ItemStatus::AllowedNotComparable => {
                    totals.unclassified += item.bill_amount;
                }
                ItemStatus::IgnoredArtifact => {}
            }
        }

        let financials_balanced =
            (totals.bill - (totals.allowed + totals.extra + totals.unclassified)).abs()
                <= BALANCE_TOLERANCE;
        if !financials_balanced {
            tracing::error!(
                hospital = %input.hospital_name,
                bill = totals.bill,
                allowed = totals.allowed,
                extra = totals.extra,
                unclassified = totals.unclassified,
                "financial reconciliation imbalance"
            );
        }

        VerificationResult {
            hospital_name: input.hospital_name.clone(),
            matched_hospital,
            hospital_similarity,
            categories,
            summary,
            totals,
            financials_balanced,
        }
    }
}

/// Apply a manual tie-up rate override from line-item edits.
fn effective_tie_up(tie_up: &TieUpItem, item: &InputItem) -> TieUpItem {
    match item.tieup_rate {
        Some(rate) => TieUpItem {
            rate,
            ..tie_up.clone()
        },
        None => tie_up.clone(),
    }
}

fn candidate_info(candidate: &ScoredCandidate) -> CandidateInfo {
    CandidateInfo {
        tie_up_name: candidate.tie_up_name.clone(),
        semantic: candidate.semantic,
        token_overlap: candidate.token_overlap,
        containment: candidate.containment,
        hybrid: candidate.hybrid,
    }
}

fn ignored_artifact_result(item: &InputItem) -> ItemResult {
    ItemResult {
        bill_item: item.item_name.clone(),
        status: ItemStatus::IgnoredArtifact,
        bill_amount: item.amount,
        allowed_amount: 0.0,
        extra_amount: 0.0,
        matched_item: None,
        similarity: None,
        failure_reason: None,
        best_candidate: None,
        candidates: Vec::new(),
        arbitrated: false,
    }
}

/// Automatic acceptance: strong semantic similarity, or a good hybrid score
/// backed by token evidence.
fn auto_accepts(t: &MatchingThresholds, b: &ScoredCandidate) -> bool {
    b.semantic >= t.semantic_autoaccept
        || (b.hybrid >= t.hybrid_accept
            && (b.token_overlap >= t.token_overlap_accept
                || b.containment >= t.containment_accept))
}

/// Borderline band `[llm_band_low, semantic_autoaccept)` handled by the
/// arbiter.
fn in_arbiter_band(t: &MatchingThresholds, b: &ScoredCandidate) -> bool {
    b.semantic >= t.llm_band_low && b.semantic < t.semantic_autoaccept
}

fn unmatched_result(item: &InputItem, status: ItemStatus, reason: FailureReason) -> ItemResult {
    ItemResult {
        bill_item: item.item_name.clone(),
        status,
        bill_amount: item.amount,
        allowed_amount: 0.0,
        extra_amount: 0.0,
        matched_item: None,
        similarity: None,
        failure_reason: Some(reason),
        best_candidate: None,
        candidates: Vec::new(),
        arbitrated: false,
    }
}
