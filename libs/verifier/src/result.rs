//! Input and output types for bill verification.

use serde::{Deserialize, Serialize};

/// One free-text bill row with an amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputItem {
    pub item_name: String,
    /// Final billed amount for the row, rupees.
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    /// Manual override of the matched tie-up rate, from line-item edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tieup_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryInput {
    pub category_name: String,
    pub items: Vec<InputItem>,
}

/// Verifier input: the asserted hospital plus extracted categories in bill
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillInput {
    pub hospital_name: String,
    pub categories: Vec<CategoryInput>,
}

impl BillInput {
    pub fn item_count(&self) -> usize {
        self.categories.iter().map(|c| c.items.len()).sum()
    }
}

/// Per-item verification status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Green,
    Red,
    Unclassified,
    AllowedNotComparable,
    Mismatch,
    IgnoredArtifact,
}

/// Why a non-GREEN/RED item could not be priced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    NotInTieup,
    LowSimilarity,
    PackageOnly,
    AdminCharge,
    HospitalNotMatched,
}

/// Scored tie-up candidate, kept for diagnostics and the debug view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateInfo {
    pub tie_up_name: String,
    pub semantic: f32,
    pub token_overlap: f32,
    pub containment: f32,
    pub hybrid: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    /// Original bill text, verbatim.
    pub bill_item: String,
    pub status: ItemStatus,
    pub bill_amount: f64,
    pub allowed_amount: f64,
    pub extra_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_item: Option<String>,
    /// Semantic similarity of the accepted match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_candidate: Option<CandidateInfo>,
    /// Full top-K candidate list for the debug view.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<CandidateInfo>,
    /// True when the LLM arbiter decided this item.
    #[serde(default)]
    pub arbitrated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryResult {
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_similarity: Option<f32>,
    /// True when the category match was too weak and items were searched
    /// across the hospital-wide union index.
    #[serde(default)]
    pub searched_union: bool,
    pub items: Vec<ItemResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryCounts {
    pub green: u32,
    pub red: u32,
    pub unclassified: u32,
    pub allowed_not_comparable: u32,
    pub mismatch: u32,
    pub ignored_artifact: u32,
}

impl SummaryCounts {
    pub fn total(&self) -> u32 {
        self.green
            + self.red
            + self.unclassified
            + self.allowed_not_comparable
            + self.mismatch
            + self.ignored_artifact
    }

    pub fn record(&mut self, status: ItemStatus) {
        match status {
            ItemStatus::Green => self.green += 1,
            ItemStatus::Red => self.red += 1,
            ItemStatus::Unclassified => self.unclassified += 1,
            ItemStatus::AllowedNotComparable => self.allowed_not_comparable += 1,
            ItemStatus::Mismatch => self.mismatch += 1,
            ItemStatus::IgnoredArtifact => self.ignored_artifact += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FinancialTotals {
    pub bill: f64,
    pub allowed: f64,
    pub extra: f64,
    pub unclassified: f64,
}

/// Reconciliation tolerance, rupees.
pub const BALANCE_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Hospital name asserted by the caller.
    pub hospital_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_hospital: Option<String>,
    pub hospital_similarity: f32,
    pub categories: Vec<CategoryResult>,
    pub summary: SummaryCounts,
    pub totals: FinancialTotals,
    pub financials_balanced: bool,
}

impl VerificationResult {
    pub fn items(&self) -> impl Iterator<Item = &ItemResult> {
        self.categories.iter().flat_map(|c| c.items.iter())
    }
}
