//! Application state and service initialization
//!
//! This module centralizes all service initialization and dependency injection,
//! making it easier to manage the application lifecycle and test services.

use std::sync::Arc;

use crate::db::{MemoryRiskStore, PgRiskStore, RiskStore};
use crate::extractor::{ContentExtractor, ExtractorDispatcher};
use crate::model::{Config, StoreBackend};
use crate::service::{
    ArtifactStore, CandidateGenerator, ExternalCandidateStrategy, InProcessDispatcher,
    IngestionService, JobDispatcher, LlmClient, LocalArtifactStore, OpenAiCandidateModel,
    RedisJobQueue, RiskService,
};

/// Application state containing all services and shared resources
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RiskStore>,
    pub ingestion: Arc<IngestionService>,
    pub risks: RiskService,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub dispatcher: Arc<dyn JobDispatcher>,
    /// Present when jobs are queued through Redis; a worker drains it
    pub queue: Option<RedisJobQueue>,
}

impl AppState {
    /// Initialize all services and build application state
    ///
    /// This performs:
    /// 1. Store selection (PostgreSQL with schema bootstrap, or in-process)
    /// 2. Candidate strategy selection (model-backed when an API key is set)
    /// 3. Redis queue connection when ingestion runs asynchronously
    pub async fn new(config: Config) -> Result<Self, AppError> {
        let store: Arc<dyn RiskStore> = match config.store {
            StoreBackend::Postgres => {
                let pool = crate::db::create_pool()
                    .await
                    .map_err(|e| AppError::DatabaseInit(e.to_string()))?;
                crate::db::init_schema(&pool)
                    .await
                    .map_err(|e| AppError::DatabaseInit(e.to_string()))?;
                Arc::new(PgRiskStore::new(pool))
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-process store, data is lost on restart");
                Arc::new(MemoryRiskStore::new())
            }
        };

        let generator = Self::build_generator(&config)?;
        let extractor = Arc::new(ExtractorDispatcher::new(&config.extraction, None));
        let artifacts = Arc::new(LocalArtifactStore::new(config.storage.upload_dir.clone()));

        let queue = if config.ingestion_sync {
            None
        } else {
            match RedisJobQueue::new().await {
                Ok(queue) => Some(queue),
                Err(e) => {
                    tracing::warn!(error = %e, "Redis unavailable, running ingestions in-process");
                    None
                }
            }
        };

        Ok(Self::assemble(
            config, store, extractor, generator, artifacts, queue,
        ))
    }

    /// Wire services over already constructed collaborators
    pub fn assemble(
        config: Config,
        store: Arc<dyn RiskStore>,
        extractor: Arc<dyn ContentExtractor>,
        generator: CandidateGenerator,
        artifacts: Arc<dyn ArtifactStore>,
        queue: Option<RedisJobQueue>,
    ) -> Self {
        let ingestion = Arc::new(IngestionService::new(
            Arc::clone(&store),
            extractor,
            generator,
            config.pipeline.clone(),
        ));

        let dispatcher: Arc<dyn JobDispatcher> = match &queue {
            Some(queue) => Arc::new(queue.clone()),
            None => Arc::new(InProcessDispatcher::new(Arc::clone(&ingestion))),
        };

        Self {
            risks: RiskService::new(Arc::clone(&store)),
            config,
            store,
            ingestion,
            artifacts,
            dispatcher,
            queue,
        }
    }

    fn build_generator(config: &Config) -> Result<CandidateGenerator, AppError> {
        let Some(api_key) = config.generation.openai_api_key.as_deref() else {
            tracing::info!("No OPENAI_API_KEY set, using heuristic candidate generation");
            return Ok(CandidateGenerator::heuristic_only());
        };

        let client = LlmClient::new(api_key, config.generation.model.clone())
            .map_err(|_| AppError::InvalidConfig("Invalid OPENAI_API_KEY"))?;
        tracing::info!(model = %config.generation.model, "Model-backed candidate generation enabled");

        Ok(CandidateGenerator::with_external(Arc::new(
            ExternalCandidateStrategy::new(OpenAiCandidateModel::new(client)),
        )))
    }
}

/// Application-level errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AppError {
    /// Database initialization failed
    #[error("Database initialization failed: {0}")]
    DatabaseInit(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
