//! OCR collaborator contract.
//!
//! The pipeline only depends on this interface: page-ordered text with
//! bounding hints, where individual pages may fail and come back empty.
//! Partial failure is absorbed into extraction warnings; only a fully
//! failed document raises [`crate::Error::OcrFailure`].

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct OcrLine {
    pub text: String,
    /// `[x0, y0, x1, y1]` in page coordinates.
    #[serde(default)]
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageText {
    pub page: u32,
    pub text: String,
    #[serde(default)]
    pub lines: Vec<OcrLine>,
}

impl PageText {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Produces page-ordered text for a staged PDF.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Dropped pages are returned with empty text, never as errors.
    async fn extract_text(&self, pdf_path: &Path) -> Result<Vec<PageText>>;
}

#[derive(Deserialize)]
struct OcrResponse {
    pages: Vec<PageText>,
}

/// Client for an OCR sidecar that accepts raw PDF bytes and returns
/// page-ordered text.
pub struct HttpOcrEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpOcrEngine {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build OCR client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn extract_text(&self, pdf_path: &Path) -> Result<Vec<PageText>> {
        let bytes = tokio::fs::read(pdf_path)
            .await
            .map_err(|e| Error::Internal(format!("reading staged PDF: {e}")))?;

        let response = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/pdf")
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::OcrFailure(format!("OCR sidecar unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::OcrFailure(format!(
                "OCR sidecar returned {}",
                response.status()
            )));
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| Error::OcrFailure(format!("invalid OCR response: {e}")))?;

        let mut pages = parsed.pages;
        pages.sort_by_key(|p| p.page);
        Ok(pages)
    }
}
