//! Shared test support: deterministic embedding backend and catalog
//! fixtures.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use beleg_catalog::{CatalogLoader, CatalogService, EmbeddingCache, EmbeddingBackend};

const DIM: usize = 512;

/// Deterministic embedding stand-in: each token hashes to a bucket, the
/// first token carries extra weight (names usually lead with the
/// distinctive word), and the vector is L2-normalized. Similar token sets
/// produce high cosine similarity, disjoint ones produce zero.
pub struct TokenBackend;

fn bucket(token: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIM as u64) as usize
}

#[async_trait]
impl EmbeddingBackend for TokenBackend {
    async fn embed(&self, texts: &[String]) -> beleg_catalog::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIM];
                for (i, token) in text.split_whitespace().enumerate() {
                    let weight = if i == 0 { 3.0 } else { 1.0 };
                    v[bucket(token)] += weight;
                }
                beleg_catalog::embedding::l2_normalize(&mut v);
                v
            })
            .collect())
    }

    fn model_id(&self) -> &str {
        "token-stub-v1"
    }
}

pub const APOLLO_SHEET: &str = r#"{
    "hospital_name": "Apollo Hospital",
    "categories": [
        {"category_name": "Consultation", "items": [
            {"item_name": "Consultation", "rate": 1500.0, "type": "service"}
        ]},
        {"category_name": "Radiology", "items": [
            {"item_name": "MRI Brain", "rate": 8500.0, "type": "service"},
            {"item_name": "General Procedure", "rate": 2000.0, "type": "service"}
        ]},
        {"category_name": "Procedures", "items": [
            {"item_name": "Dialysis Session", "rate": 3000.0, "type": "service"},
            {"item_name": "Knee Replacement Package", "rate": 150000.0, "type": "bundle"}
        ]},
        {"category_name": "Pharmacy", "items": [
            {"item_name": "Paracetamol 500mg", "rate": 10.0, "type": "unit"}
        ]}
    ]
}"#;

/// Build a catalog service over a temp dir containing the Apollo sheet.
pub async fn apollo_catalog(dir: &Path, cache_dir: &Path) -> CatalogService {
    std::fs::write(dir.join("apollo_hospital.json"), APOLLO_SHEET).unwrap();
    let loader = CatalogLoader::new(Arc::new(TokenBackend), EmbeddingCache::new(cache_dir));
    CatalogService::open(loader, dir).await.unwrap()
}
