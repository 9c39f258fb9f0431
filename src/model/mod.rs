pub mod candidate;
pub mod config;
pub mod entities;

pub use candidate::{ExtractedRiskCandidates, RiskCandidate};
pub use config::{
    AuthConfig, Config, ExtractionConfig, GenerationConfig, PipelineConfig, StorageConfig,
    StoreBackend,
};
pub use entities::*;
