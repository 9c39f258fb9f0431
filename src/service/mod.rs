pub mod candidates;
pub mod citation;
pub mod dedup;
pub mod emerging;
pub mod ingestion;
pub mod llm;
pub mod queue;
pub mod risk;
pub mod scoring;
pub mod storage;

pub use candidates::{CandidateGenerator, ExternalCandidateStrategy, OpenAiCandidateModel};
pub use ingestion::{IngestionError, IngestionService, SourceMetadata};
pub use llm::LlmClient;
pub use queue::{InProcessDispatcher, JobDispatcher, RedisJobQueue};
pub use risk::{RiskService, RiskServiceError};
pub use storage::{ArtifactStore, LocalArtifactStore, StorageError};
