//! Hospital rate-sheet catalog.
//!
//! Loads per-hospital tie-up rate sheets from a directory of JSON files and
//! builds three layers of vector indices (hospital, category, item) for the
//! bill verifier. Embeddings are fetched from an OpenAI-compatible backend,
//! L2-normalized so cosine similarity reduces to a dot product, and cached
//! on disk keyed by `sha256(model_id, text)` so restarts do not re-embed an
//! unchanged catalog.

pub mod cache;
pub mod embedding;
pub mod index;
pub mod rate_sheet;
pub mod text;

pub use cache::EmbeddingCache;
pub use embedding::{EmbeddingBackend, HttpEmbeddingBackend};
pub use index::{
    Catalog, CatalogLoader, CatalogService, HospitalIndices, HospitalSummary, IndexHit, ItemRef,
    VectorIndex,
};
pub use rate_sheet::{ItemKind, RateCategory, RateSheet, TieUpItem};

/// Catalog error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A rate-sheet file could not be read, parsed, or failed validation.
    #[error("catalog load failed: {0}")]
    CatalogLoad(String),

    /// No hospital in the loaded catalog matches the requested name.
    #[error("hospital not found in catalog: {0}")]
    HospitalNotFound(String),

    /// The embedding backend was unreachable or returned an invalid payload.
    #[error("embedding backend error: {0}")]
    Embedding(String),

    #[error("embedding cache I/O error: {0}")]
    Cache(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
