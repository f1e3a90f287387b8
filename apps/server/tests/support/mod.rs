//! Shared test support: deterministic embedding backend, canned OCR, and
//! in-memory state assembly.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use beleg::config::Config;
use beleg::db::{BillStore, InMemoryBillStore, QueueTimings};
use beleg::pipeline::{OcrEngine, PageText};
use beleg::services::SubmitUpload;
use beleg::state::AppState;
use beleg_catalog::EmbeddingBackend;

const DIM: usize = 512;

/// Deterministic embedding stand-in: token hash buckets with the first
/// token weighted, L2-normalized.
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

/// OCR stub returning the same canned pages for every document.
pub struct StaticOcr {
    pub pages: Vec<PageText>,
}

#[async_trait]
impl OcrEngine for StaticOcr {
    async fn extract_text(&self, _pdf_path: &Path) -> beleg::Result<Vec<PageText>> {
        Ok(self.pages.clone())
    }
}

pub fn page(page: u32, text: &str) -> PageText {
    PageText {
        page,
        text: text.to_string(),
        lines: Vec::new(),
    }
}

pub const SAMPLE_BILL_TEXT: &str = "\
Patient Name: Ramesh Kumar
Bill No: B-998

CONSULTATION
1. CONSULTATION - FIRST VISIT | Dr. A. Kumar    1500.00
RADIOLOGY
MRI BRAIN | Dr. X    10770.00
Grand Total   12270.00
";

const APOLLO_SHEET: &str = r#"{
    "hospital_name": "Apollo Hospital",
    "categories": [
        {"category_name": "Consultation", "items": [
            {"item_name": "Consultation", "rate": 1500.0, "type": "service"}
        ]},
        {"category_name": "Radiology", "items": [
            {"item_name": "MRI Brain", "rate": 8500.0, "type": "service"}
        ]}
    ]
}"#;

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<InMemoryBillStore>,
    _dirs: Vec<TempDir>,
}

/// Assemble in-memory application state with stub embedding and OCR
/// backends over a one-hospital catalog.
pub async fn test_state_with_ocr(pages: Vec<PageText>) -> TestContext {
    let tieup_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let uploads_dir = tempfile::tempdir().unwrap();
    std::fs::write(tieup_dir.path().join("apollo_hospital.json"), APOLLO_SHEET).unwrap();

    let mut config = Config::default();
    config.catalog.tieup_dir = tieup_dir.path().to_string_lossy().into_owned();
    config.catalog.embedding_cache_dir = cache_dir.path().to_string_lossy().into_owned();
    config.pipeline.uploads_dir = uploads_dir.path().to_string_lossy().into_owned();
    config.llm.enabled = false;

    let store = Arc::new(InMemoryBillStore::new(QueueTimings::default()));
    let dyn_store: Arc<dyn BillStore> = store.clone();
    let state = AppState::assemble(
        Arc::new(config),
        dyn_store,
        Arc::new(TokenBackend),
        Arc::new(StaticOcr { pages }),
    )
    .await
    .unwrap();

    TestContext {
        state,
        store,
        _dirs: vec![tieup_dir, cache_dir, uploads_dir],
    }
}

pub async fn test_state() -> TestContext {
    test_state_with_ocr(vec![page(1, SAMPLE_BILL_TEXT)]).await
}

/// A submit payload with distinct bytes per `seed` so ingestion ids do not
/// collide between tests.
pub fn submit(seed: u8) -> SubmitUpload {
    SubmitUpload {
        bytes: vec![seed; 64],
        employee_id: "12345678".into(),
        hospital_name: "Apollo Hospital".into(),
        original_filename: format!("bill_{seed}.pdf"),
        client_request_id: None,
        invoice_date: None,
    }
}
