//! Shared application state and wiring.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use beleg_catalog::{
    CatalogLoader, CatalogService, EmbeddingBackend, EmbeddingCache, HttpEmbeddingBackend,
};
use beleg_verifier::{BillVerifier, ChatBackend, HttpChatBackend, MatchArbiter, SemanticMatcher};

use crate::config::Config;
use crate::db::{
    create_db_pool, BillStore, InMemoryBillStore, PostgresBillStore, QueueTimings,
};
use crate::pipeline::{HttpOcrEngine, OcrEngine, UploadWorker};
use crate::services::{RetentionWorker, UploadService, VerificationService};
use crate::{Error, Result};

/// Which store backs the record lifecycle.
#[derive(Debug, Clone, Copy)]
pub enum StoreKind {
    /// Durable queue in Postgres; the production default.
    Postgres,
    /// Process-local store for tests and offline CLI runs.
    InMemory,
}

pub struct AppStateOptions {
    pub store: StoreKind,
    pub run_migrations: bool,
}

impl Default for AppStateOptions {
    fn default() -> Self {
        Self {
            store: StoreKind::Postgres,
            run_migrations: true,
        }
    }
}

/// Process-wide state: the store, the catalog handle, and the service
/// layer the HTTP collaborator consumes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn BillStore>,
    pub catalog: Arc<CatalogService>,
    pub uploads: Arc<UploadService>,
    pub verification: Arc<VerificationService>,
    pub wake: Arc<Notify>,
    ocr: Arc<dyn OcrEngine>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        Self::new_with_options(config, AppStateOptions::default()).await
    }

    pub async fn new_with_options(config: Config, options: AppStateOptions) -> Result<Self> {
        tracing::info!("initializing application state");
        let config = Arc::new(config);

        let timings = QueueTimings {
            lease_ttl: chrono::Duration::seconds(config.pipeline.lease_ttl_seconds as i64),
            stale_processing: chrono::Duration::seconds(
                config.pipeline.stale_processing_seconds as i64,
            ),
        };
        let store: Arc<dyn BillStore> = match options.store {
            StoreKind::Postgres => {
                let pool = create_db_pool(&config.database).await?;
                let store = PostgresBillStore::new(pool, timings);
                if options.run_migrations {
                    tracing::info!("running database migrations");
                    store.run_migrations().await?;
                }
                Arc::new(store)
            }
            StoreKind::InMemory => Arc::new(InMemoryBillStore::new(timings)),
        };

        let embedding: Arc<dyn EmbeddingBackend> = Arc::new(HttpEmbeddingBackend::new(
            &config.catalog.embedding_api_base,
            config.catalog.embedding_api_key.clone(),
            &config.catalog.embedding_model,
            Duration::from_secs(config.catalog.embedding_timeout_seconds),
            config.catalog.embedding_max_batch_size,
            config.catalog.embedding_max_retries,
        )?);
        let ocr: Arc<dyn OcrEngine> = Arc::new(HttpOcrEngine::new(
            &config.ocr.endpoint,
            Duration::from_secs(config.ocr.timeout_seconds),
        )?);

        Self::assemble(config, store, embedding, ocr).await
    }

    /// Wire the state from pre-built collaborators. Tests inject stub
    /// embedding/OCR backends here.
    pub async fn assemble(
        config: Arc<Config>,
        store: Arc<dyn BillStore>,
        embedding: Arc<dyn EmbeddingBackend>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Result<Self> {
        let loader = CatalogLoader::new(
            embedding.clone(),
            EmbeddingCache::new(&config.catalog.embedding_cache_dir),
        );
        let catalog = Arc::new(CatalogService::open(loader, &config.catalog.tieup_dir).await?);
        tracing::info!(
            hospitals = catalog.snapshot().hospital_count(),
            "catalog loaded"
        );

        let matcher = SemanticMatcher::new(
            embedding,
            config.matching.weights(),
            config.matching.top_k,
        );
        let mut verifier = BillVerifier::new(
            matcher,
            config.matching.thresholds(config.llm.min_confidence),
        );
        if config.llm.enabled {
            let chat: Arc<dyn ChatBackend> = Arc::new(
                HttpChatBackend::new(&config.llm.api_base, config.llm.api_key.clone())
                    .map_err(Error::Internal)?,
            );
            verifier = verifier.with_arbiter(Arc::new(MatchArbiter::new(
                chat,
                &config.llm.primary_model,
                &config.llm.secondary_model,
                config.llm.min_confidence,
                config.llm.max_tokens,
                Duration::from_secs(config.llm.timeout_seconds),
            )));
        }

        let verification = Arc::new(VerificationService::new(
            store.clone(),
            catalog.clone(),
            verifier,
        ));
        let wake = Arc::new(Notify::new());
        let uploads = Arc::new(UploadService::new(
            store.clone(),
            catalog.clone(),
            &config.pipeline.uploads_dir,
            wake.clone(),
        ));

        tracing::info!("application state initialized");
        Ok(Self {
            config,
            store,
            catalog,
            uploads,
            verification,
            wake,
            ocr,
        })
    }

    pub fn upload_worker(&self) -> UploadWorker {
        UploadWorker::new(
            self.store.clone(),
            self.ocr.clone(),
            self.verification.clone(),
            &self.config.pipeline.uploads_dir,
            Duration::from_secs(self.config.pipeline.reconcile_interval_seconds),
            self.wake.clone(),
        )
    }

    pub fn retention_worker(&self) -> RetentionWorker {
        RetentionWorker::new(
            self.store.clone(),
            &self.config.pipeline.uploads_dir,
            self.config.retention.retention_days,
            Duration::from_secs(self.config.retention.cleanup_interval_seconds),
        )
    }
}
