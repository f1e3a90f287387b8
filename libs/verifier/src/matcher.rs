//! Hybrid semantic matcher.
//!
//! Scores a query against a vector index with a weighted blend of cosine
//! similarity, content-token Jaccard, and candidate containment. When the
//! query carries a medical core (`nicorandil 5mg` inside a longer pharmacy
//! row), both variants are scored and the better one wins per candidate.
//!
//! The matcher is pure: it neither persists nor logs. Acceptance thresholds
//! live with the caller.

use std::collections::BTreeSet;
use std::sync::Arc;

use beleg_catalog::text::{content_tokens, medical_core};
use beleg_catalog::{EmbeddingBackend, VectorIndex};

use crate::Result;

#[derive(Debug, Clone, Copy)]
pub struct MatchWeights {
    pub semantic: f32,
    pub token_overlap: f32,
    pub containment: f32,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            token_overlap: 0.3,
            containment: 0.1,
        }
    }
}

/// One tie-up candidate with its score breakdown. `id` addresses the entry
/// inside the index that was searched.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub id: usize,
    pub tie_up_name: String,
    pub normalized: String,
    pub semantic: f32,
    pub token_overlap: f32,
    pub containment: f32,
    pub hybrid: f32,
}

pub struct SemanticMatcher {
    backend: Arc<dyn EmbeddingBackend>,
    weights: MatchWeights,
    top_k: usize,
}

impl SemanticMatcher {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, weights: MatchWeights, top_k: usize) -> Self {
        Self {
            backend,
            weights,
            top_k: top_k.max(1),
        }
    }

    /// Embed a single normalized text.
    pub async fn embed_one(&self, normalized: &str) -> Result<Vec<f32>> {
        let mut vectors = self.backend.embed(&[normalized.to_string()]).await?;
        Ok(vectors.pop().unwrap_or_default())
    }

    /// Top-K candidates for a normalized query, sorted by hybrid score
    /// descending.
    pub async fn top_k(&self, normalized: &str, index: &VectorIndex) -> Result<Vec<ScoredCandidate>> {
        if index.is_empty() {
            return Ok(Vec::new());
        }

        let mut variants = vec![normalized.to_string()];
        if let Some(core) = medical_core(normalized) {
            variants.push(core);
        }
        let vectors = self.backend.embed(&variants).await?;

        let mut best: Vec<Option<ScoredCandidate>> = vec![None; index.len()];
        for (variant, vector) in variants.iter().zip(vectors.iter()) {
            let query_tokens = content_tokens(variant);
            for hit in index.search(vector, index.len()) {
                let candidate_tokens = content_tokens(index.normalized_text(hit.id));
                let token_overlap = jaccard(&query_tokens, &candidate_tokens);
                let containment = containment(&query_tokens, &candidate_tokens);
                let hybrid = self.weights.semantic * hit.score
                    + self.weights.token_overlap * token_overlap
                    + self.weights.containment * containment;

                let replace = match &best[hit.id] {
                    Some(existing) => hybrid > existing.hybrid,
                    None => true,
                };
                if replace {
                    best[hit.id] = Some(ScoredCandidate {
                        id: hit.id,
                        tie_up_name: index.raw_text(hit.id).to_string(),
                        normalized: index.normalized_text(hit.id).to_string(),
                        semantic: hit.score,
                        token_overlap,
                        containment,
                        hybrid,
                    });
                }
            }
        }

        let mut candidates: Vec<ScoredCandidate> = best.into_iter().flatten().collect();
        candidates.sort_by(|a, b| b.hybrid.total_cmp(&a.hybrid));
        candidates.truncate(self.top_k);
        Ok(candidates)
    }
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    intersection / union
}

/// `|query intersect candidate| / |candidate|`; zero when the candidate
/// has no content tokens.
fn containment(query: &BTreeSet<String>, candidate: &BTreeSet<String>) -> f32 {
    if candidate.is_empty() {
        return 0.0;
    }
    query.intersection(candidate).count() as f32 / candidate.len() as f32
}
