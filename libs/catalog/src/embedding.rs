//! Embedding backend abstraction and OpenAI-compatible HTTP client.
//!
//! Returned vectors are always L2-normalized so the indices can score with a
//! plain dot product.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::{Error, Result};

/// Produces L2-normalized embedding vectors for batches of texts.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed each text; the output has the same length and order as the
    /// input. Vectors are L2-normalized.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model identifier; part of the disk-cache key.
    fn model_id(&self) -> &str;
}

/// Scale a vector to unit L2 norm. Zero vectors are returned unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// HTTP client for an OpenAI-compatible `/embeddings` endpoint.
///
/// Batches requests and retries transient failures with exponential
/// backoff; a batch that still fails after the retry budget surfaces as
/// [`Error::Embedding`].
pub struct HttpEmbeddingBackend {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    max_batch_size: usize,
    max_retries: u32,
}

impl HttpEmbeddingBackend {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
        max_batch_size: usize,
        max_retries: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Embedding(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            max_batch_size: max_batch_size.max(1),
            max_retries,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.api_base);
        let body = serde_json::json!({ "model": self.model, "input": texts });

        let mut backoff = Duration::from_secs(1);
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(60));
            }

            let mut request = self.client.post(&url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    let parsed: EmbeddingResponse = response
                        .json()
                        .await
                        .map_err(|e| Error::Embedding(format!("invalid response body: {e}")))?;
                    if parsed.data.len() != texts.len() {
                        return Err(Error::Embedding(format!(
                            "backend returned {} vectors for {} texts",
                            parsed.data.len(),
                            texts.len()
                        )));
                    }
                    let mut vectors = Vec::with_capacity(parsed.data.len());
                    for datum in parsed.data {
                        let mut v = datum.embedding;
                        l2_normalize(&mut v);
                        vectors.push(v);
                    }
                    return Ok(vectors);
                }
                Ok(response) => {
                    let status = response.status();
                    last_error = format!("embedding endpoint returned {status}");
                    // 4xx other than 429 will not improve on retry.
                    if status.is_client_error() && status.as_u16() != 429 {
                        break;
                    }
                    tracing::warn!(
                        attempt = attempt + 1,
                        %status,
                        "embedding request failed, retrying"
                    );
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(attempt = attempt + 1, error = %e, "embedding request error");
                }
            }
        }
        Err(Error::Embedding(last_error))
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.max_batch_size) {
            out.extend(self.embed_batch(chunk).await?);
        }
        Ok(out)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalize_unit_norm() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}
