//! Vector indices over the rate catalog.
//!
//! Three layers per the verifier's matching order: one hospital index for
//! the whole catalog, one category index per hospital, one item index per
//! category (plus a hospital-wide union used when the category match is
//! weak). All stored vectors are L2-normalized, so top-K search is a flat
//! dot-product scan.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::cache::EmbeddingCache;
use crate::embedding::EmbeddingBackend;
use crate::rate_sheet::{load_rate_sheets, RateSheet, TieUpItem};
use crate::text::{lookup_key, normalize_text, slugify};
use crate::{Error, Result};

/// One scored candidate out of a [`VectorIndex`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexHit {
    pub id: usize,
    pub score: f32,
}

/// Flat vector index: parallel arrays of original text, normalized text,
/// and unit-norm embedding.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    name: String,
    raw: Vec<String>,
    normalized: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            raw: Vec::new(),
            normalized: Vec::new(),
            vectors: Vec::new(),
        }
    }

    fn push(&mut self, raw: String, normalized: String, vector: Vec<f32>) {
        self.raw.push(raw);
        self.normalized.push(normalized);
        self.vectors.push(vector);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn raw_text(&self, id: usize) -> &str {
        &self.raw[id]
    }

    pub fn normalized_text(&self, id: usize) -> &str {
        &self.normalized[id]
    }

    /// Top-K by dot product (cosine similarity for unit-norm inputs),
    /// highest first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<IndexHit> {
        let mut hits: Vec<IndexHit> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(id, v)| IndexHit {
                id,
                score: dot(query, v),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        hits
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Position of a tie-up item inside its hospital's sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRef {
    pub category_id: usize,
    pub item_id: usize,
}

/// Per-hospital index set.
#[derive(Debug, Clone)]
pub struct HospitalIndices {
    pub hospital_id: usize,
    pub category_index: VectorIndex,
    /// Parallel to the sheet's categories.
    pub item_indices: Vec<VectorIndex>,
    /// Every item of the hospital in one index, used when the category
    /// match is too weak to trust.
    pub union_index: VectorIndex,
    /// Parallel to `union_index` entries.
    pub union_refs: Vec<ItemRef>,
}

/// Summary row for hospital listings.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HospitalSummary {
    pub hospital_name: String,
    pub slug: String,
    pub category_count: usize,
    pub item_count: usize,
}

/// Immutable snapshot of the loaded catalog plus all indices.
pub struct Catalog {
    hospitals: Vec<RateSheet>,
    hospital_index: VectorIndex,
    indices: Vec<HospitalIndices>,
    lookup: HashMap<String, usize>,
    model_id: String,
}

impl Catalog {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn hospital_count(&self) -> usize {
        self.hospitals.len()
    }

    pub fn hospital(&self, id: usize) -> &RateSheet {
        &self.hospitals[id]
    }

    pub fn hospital_index(&self) -> &VectorIndex {
        &self.hospital_index
    }

    /// Case-insensitive, whitespace-collapsed exact lookup.
    pub fn indices_for(&self, hospital_name: &str) -> Result<&HospitalIndices> {
        self.lookup
            .get(&lookup_key(hospital_name))
            .map(|&id| &self.indices[id])
            .ok_or_else(|| Error::HospitalNotFound(hospital_name.to_string()))
    }

    pub fn indices_by_id(&self, hospital_id: usize) -> &HospitalIndices {
        &self.indices[hospital_id]
    }

    pub fn tie_up_item(&self, hospital_id: usize, item: ItemRef) -> &TieUpItem {
        &self.hospitals[hospital_id].categories[item.category_id].items[item.item_id]
    }

    pub fn summaries(&self) -> Vec<HospitalSummary> {
        self.hospitals
            .iter()
            .map(|sheet| HospitalSummary {
                hospital_name: sheet.hospital_name.clone(),
                slug: slugify(&sheet.hospital_name),
                category_count: sheet.categories.len(),
                item_count: sheet.item_count(),
            })
            .collect()
    }
}

/// Loads rate sheets and builds [`Catalog`] snapshots; owns the disk cache.
pub struct CatalogLoader {
    backend: Arc<dyn EmbeddingBackend>,
    cache: EmbeddingCache,
}

impl CatalogLoader {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, cache: EmbeddingCache) -> Self {
        Self { backend, cache }
    }

    /// Embed `texts`, serving from the disk cache where possible and
    /// populating it for misses.
    async fn embed_cached(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model_id = self.backend.model_id().to_string();
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut missing: Vec<(usize, String)> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(&model_id, text).await {
                Some(v) => out.push(Some(v)),
                None => {
                    out.push(None);
                    missing.push((i, text.clone()));
                }
            }
        }

        if !missing.is_empty() {
            tracing::debug!(
                total = texts.len(),
                misses = missing.len(),
                "embedding cache misses, querying backend"
            );
            let fetch_texts: Vec<String> = missing.iter().map(|(_, t)| t.clone()).collect();
            let vectors = self.backend.embed(&fetch_texts).await?;
            for ((slot, text), vector) in missing.into_iter().zip(vectors) {
                self.cache.put(&model_id, &text, &vector).await?;
                out[slot] = Some(vector);
            }
        }

        Ok(out.into_iter().map(|v| v.expect("filled above")).collect())
    }

    async fn build_index(
        &self,
        name: impl Into<String>,
        raw_texts: Vec<String>,
    ) -> Result<VectorIndex> {
        let normalized: Vec<String> = raw_texts.iter().map(|t| normalize_text(t)).collect();
        let vectors = self.embed_cached(&normalized).await?;
        let mut index = VectorIndex::new(name);
        for ((raw, norm), vector) in raw_texts.into_iter().zip(normalized).zip(vectors) {
            index.push(raw, norm, vector);
        }
        Ok(index)
    }

    /// Load every rate sheet in `dir` and build the full index set.
    pub async fn load(&self, dir: &Path) -> Result<Catalog> {
        let sheets = load_rate_sheets(dir)?;
        tracing::info!(
            hospitals = sheets.len(),
            dir = %dir.display(),
            "building catalog indices"
        );

        let hospital_index = self
            .build_index(
                "hospitals",
                sheets.iter().map(|s| s.hospital_name.clone()).collect(),
            )
            .await?;

        let mut indices = Vec::with_capacity(sheets.len());
        let mut lookup = HashMap::new();
        for (hospital_id, sheet) in sheets.iter().enumerate() {
            lookup.insert(lookup_key(&sheet.hospital_name), hospital_id);

            let category_index = self
                .build_index(
                    format!("{}/categories", sheet.slug()),
                    sheet
                        .categories
                        .iter()
                        .map(|c| c.category_name.clone())
                        .collect(),
                )
                .await?;

            let mut item_indices = Vec::with_capacity(sheet.categories.len());
            let mut union_texts = Vec::new();
            let mut union_refs = Vec::new();
            for (category_id, category) in sheet.categories.iter().enumerate() {
                item_indices.push(
                    self.build_index(
                        format!("{}/{}", sheet.slug(), category.category_name),
                        category.items.iter().map(|i| i.item_name.clone()).collect(),
                    )
                    .await?,
                );
                for (item_id, item) in category.items.iter().enumerate() {
                    union_texts.push(item.item_name.clone());
                    union_refs.push(ItemRef {
                        category_id,
                        item_id,
                    });
                }
            }
            let union_index = self
                .build_index(format!("{}/all-items", sheet.slug()), union_texts)
                .await?;

            indices.push(HospitalIndices {
                hospital_id,
                category_index,
                item_indices,
                union_index,
                union_refs,
            });
        }

        Ok(Catalog {
            hospitals: sheets,
            hospital_index,
            indices,
            lookup,
            model_id: self.backend.model_id().to_string(),
        })
    }
}

/// Process-wide catalog handle with atomic reload.
///
/// Readers take an [`Arc`] snapshot and keep using it even while a reload
/// is in flight; the swap publishes either the complete old catalog or the
/// complete new one, never a partial state.
pub struct CatalogService {
    loader: CatalogLoader,
    dir: PathBuf,
    current: RwLock<Arc<Catalog>>,
}

impl CatalogService {
    /// Load the catalog once and wrap it for shared use.
    pub async fn open(loader: CatalogLoader, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let catalog = loader.load(&dir).await?;
        Ok(Self {
            loader,
            dir,
            current: RwLock::new(Arc::new(catalog)),
        })
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        self.current.read().expect("catalog lock poisoned").clone()
    }

    /// Rebuild from disk, then swap. On failure the previous snapshot stays
    /// in place.
    pub async fn reload(&self) -> Result<Arc<Catalog>> {
        let fresh = Arc::new(self.loader.load(&self.dir).await?);
        *self.current.write().expect("catalog lock poisoned") = fresh.clone();
        tracing::info!(hospitals = fresh.hospital_count(), "catalog reloaded");
        Ok(fresh)
    }
}
