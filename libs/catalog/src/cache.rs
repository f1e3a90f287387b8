//! On-disk embedding cache.
//!
//! One small JSON file per entry under the cache root, keyed by
//! `sha256(model_id :: text)`. The catalog loader is the only writer; file
//! I/O runs on the blocking pool so catalog reloads do not stall the
//! runtime.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::Result;

pub struct EmbeddingCache {
    root: PathBuf,
}

impl EmbeddingCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key(model_id: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        hasher.update(b"::");
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, model_id: &str, text: &str) -> PathBuf {
        self.root.join(format!("{}.json", Self::key(model_id, text)))
    }

    /// Look up a cached vector; corrupt entries read as misses.
    pub async fn get(&self, model_id: &str, text: &str) -> Option<Vec<f32>> {
        let path = self.entry_path(model_id, text);
        tokio::task::spawn_blocking(move || {
            let raw = std::fs::read_to_string(&path).ok()?;
            serde_json::from_str(&raw).ok()
        })
        .await
        .ok()
        .flatten()
    }

    /// Persist a vector. Writes to a sibling temp file first so a crashed
    /// writer never leaves a truncated entry behind.
    pub async fn put(&self, model_id: &str, text: &str, vector: &[f32]) -> Result<()> {
        let path = self.entry_path(model_id, text);
        let payload = serde_json::to_string(vector).expect("vector serializes");
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, payload)?;
            std::fs::rename(&tmp, &path)?;
            Ok(())
        })
        .await
        .map_err(|e| crate::Error::Embedding(format!("cache task failed: {e}")))??;
        Ok(())
    }

    /// Number of entries on disk.
    pub fn len(&self) -> usize {
        std::fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path());

        assert!(cache.get("m1", "consultation").await.is_none());

        cache.put("m1", "consultation", &[0.6, 0.8]).await.unwrap();
        assert_eq!(
            cache.get("m1", "consultation").await,
            Some(vec![0.6, 0.8])
        );

        // Different model id is a different key.
        assert!(cache.get("m2", "consultation").await.is_none());
        assert_eq!(cache.len(), 1);
    }
}
