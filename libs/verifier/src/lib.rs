//! Semantic bill verification engine.
//!
//! Matches free-text bill items against a hospital's tie-up rate catalog
//! using a layered strategy: embedding similarity, token overlap, and
//! containment combined into a hybrid score, with an LLM arbiter consulted
//! for the borderline band. Accepted matches are priced and classified;
//! everything else is categorized with an explicit failure reason, and the
//! bill's financial totals are reconciled against strict invariants.

pub mod arbiter;
pub mod artifact;
pub mod matcher;
pub mod price;
pub mod result;
pub mod verify;

pub use arbiter::{ArbiterVerdict, ChatBackend, HttpChatBackend, MatchArbiter};
pub use matcher::{MatchWeights, ScoredCandidate, SemanticMatcher};
pub use price::{classify_price, PriceOutcome};
pub use result::{
    BillInput, CandidateInfo, CategoryInput, CategoryResult, FailureReason, FinancialTotals,
    InputItem, ItemResult, ItemStatus, SummaryCounts, VerificationResult,
};
pub use verify::{BillVerifier, MatchingThresholds};

/// Verifier error taxonomy. Matching itself never fails per item; these
/// cover the collaborators the engine depends on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Catalog(#[from] beleg_catalog::Error),

    #[error("chat backend error: {0}")]
    Chat(String),
}

pub type Result<T> = std::result::Result<T, Error>;
