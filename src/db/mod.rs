//! Persistence for the ingestion pipeline and review workflow

pub mod memory;
pub mod models;
pub mod repository;

use std::env;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::model::{
    ApprovalStatus, AuditEvent, EmergingSignal, EvidenceSnippet, IngestionJob, RiskBundle,
    RiskRecord, RiskStatement, SourceDocument,
};
use crate::service::emerging::MentionRecord;

pub use memory::MemoryRiskStore;
pub use models::{DashboardSummary, RiskFilter};
pub use repository::PgRiskStore;

// Environment variable names
const ENV_POSTGRES_HOST: &str = "RISK_INTEL_POSTGRES_HOST";
const ENV_POSTGRES_PORT: &str = "RISK_INTEL_POSTGRES_PORT";
const ENV_POSTGRES_USER: &str = "RISK_INTEL_POSTGRES_USER";
const ENV_POSTGRES_PASSWORD: &str = "RISK_INTEL_POSTGRES_PASSWORD";
const ENV_POSTGRES_DB: &str = "RISK_INTEL_POSTGRES_DB";

// Default values
const DEFAULT_POSTGRES_HOST: &str = "127.0.0.1";
const DEFAULT_POSTGRES_PORT: &str = "5432";
const DEFAULT_POSTGRES_USER: &str = "threatintel";
const DEFAULT_POSTGRES_PASSWORD: &str = "threatintel";
const DEFAULT_POSTGRES_DB: &str = "threatintel";

/// Upper bound on rows returned by list queries
pub const MAX_LIST_ROWS: i64 = 200;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Read access plus the entry point for transactional writes
#[async_trait]
pub trait RiskStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, DbError>;

    async fn get_job(&self, id: Uuid) -> Result<IngestionJob, DbError>;

    /// Newest first, at most [`MAX_LIST_ROWS`]
    async fn list_jobs(&self) -> Result<Vec<IngestionJob>, DbError>;

    async fn get_source(&self, id: Uuid) -> Result<SourceDocument, DbError>;

    /// Earliest ingested document other than `exclude` with this content hash
    async fn find_duplicate_source(
        &self,
        content_hash: &str,
        exclude: Uuid,
    ) -> Result<Option<SourceDocument>, DbError>;

    /// Risk with its statement, score, signal, and the evidence it links or cites
    async fn get_risk(&self, id: Uuid) -> Result<RiskRecord, DbError>;

    /// Newest first; evidence is not loaded
    async fn list_risks(&self, filter: &RiskFilter) -> Result<Vec<RiskRecord>, DbError>;

    async fn dashboard_summary(&self) -> Result<DashboardSummary, DbError>;

    async fn audit_trail(&self, target_id: &str) -> Result<Vec<AuditEvent>, DbError>;

    async fn ping(&self) -> Result<(), DbError>;
}

/// A transaction; dropping it without [`UnitOfWork::commit`] discards every write
#[async_trait]
pub trait UnitOfWork: Send {
    async fn insert_source(&mut self, source: &SourceDocument) -> Result<(), DbError>;

    async fn update_source(&mut self, source: &SourceDocument) -> Result<(), DbError>;

    async fn insert_job(&mut self, job: &IngestionJob) -> Result<(), DbError>;

    async fn update_job(&mut self, job: &IngestionJob) -> Result<(), DbError>;

    async fn find_duplicate_source(
        &mut self,
        content_hash: &str,
        exclude: Uuid,
    ) -> Result<Option<SourceDocument>, DbError>;

    async fn insert_snippets(&mut self, snippets: &[EvidenceSnippet]) -> Result<(), DbError>;

    /// Joined evidence text per completed document ingested at or after `since`
    async fn recent_source_texts(
        &mut self,
        since: DateTime<Utc>,
        exclude: Uuid,
    ) -> Result<Vec<(Uuid, String)>, DbError>;

    /// Prior occurrences of a risk name created in `[since, until)`; open ended without `until`
    async fn mention_window(
        &mut self,
        name: &str,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<MentionRecord>, DbError>;

    /// Writes item, statement, score and signal, then points the cited
    /// snippets back at the item
    async fn insert_risk(&mut self, bundle: &RiskBundle) -> Result<(), DbError>;

    /// Loads a risk for modification
    async fn get_risk(&mut self, id: Uuid) -> Result<RiskRecord, DbError>;

    async fn update_risk_status(&mut self, id: Uuid, status: ApprovalStatus)
    -> Result<(), DbError>;

    async fn update_statement(&mut self, statement: &RiskStatement) -> Result<(), DbError>;

    async fn upsert_emerging(&mut self, signal: &EmergingSignal) -> Result<(), DbError>;

    async fn insert_audit(&mut self, event: &AuditEvent) -> Result<(), DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;
}

/// Create a new database connection pool
pub async fn create_pool() -> Result<PgPool, DbError> {
    let host = env::var(ENV_POSTGRES_HOST).unwrap_or_else(|_| DEFAULT_POSTGRES_HOST.to_string());
    let port = env::var(ENV_POSTGRES_PORT).unwrap_or_else(|_| DEFAULT_POSTGRES_PORT.to_string());
    let user = env::var(ENV_POSTGRES_USER).unwrap_or_else(|_| DEFAULT_POSTGRES_USER.to_string());
    let password =
        env::var(ENV_POSTGRES_PASSWORD).unwrap_or_else(|_| DEFAULT_POSTGRES_PASSWORD.to_string());
    let database = env::var(ENV_POSTGRES_DB).unwrap_or_else(|_| DEFAULT_POSTGRES_DB.to_string());

    let database_url = format!(
        "postgres://{}:{}@{}:{}/{}",
        user, password, host, port, database
    );

    tracing::debug!(host = %host, port = %port, database = %database, "Connecting to PostgreSQL");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;

    tracing::info!(host = %host, port = %port, "PostgreSQL connection established");

    Ok(pool)
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS source_documents (
        id UUID PRIMARY KEY,
        kind VARCHAR(16) NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        publisher TEXT,
        published_at TIMESTAMPTZ,
        ingested_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        content_hash VARCHAR(64),
        status VARCHAR(16) NOT NULL,
        origin TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ingestion_jobs (
        id UUID PRIMARY KEY,
        source_document_id UUID NOT NULL REFERENCES source_documents(id),
        status VARCHAR(16) NOT NULL,
        error_message TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS risk_items (
        id UUID PRIMARY KEY,
        source_document_id UUID NOT NULL REFERENCES source_documents(id),
        name TEXT NOT NULL,
        taxonomy_category TEXT NOT NULL,
        threat_actor TEXT,
        affected_sectors JSONB NOT NULL DEFAULT '[]',
        affected_assets JSONB NOT NULL DEFAULT '[]',
        status VARCHAR(16) NOT NULL,
        extraction_confidence DOUBLE PRECISION NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS evidence_snippets (
        id UUID PRIMARY KEY,
        source_document_id UUID NOT NULL REFERENCES source_documents(id),
        risk_item_id UUID REFERENCES risk_items(id),
        text TEXT NOT NULL,
        reference VARCHAR(64) NOT NULL,
        url TEXT,
        captured_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        confidence DOUBLE PRECISION NOT NULL,
        UNIQUE (source_document_id, reference)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS risk_statements (
        risk_item_id UUID PRIMARY KEY REFERENCES risk_items(id),
        business_impact TEXT NOT NULL,
        why_care TEXT NOT NULL,
        time_horizon TEXT NOT NULL,
        recommended_actions JSONB NOT NULL DEFAULT '[]',
        confidence DOUBLE PRECISION NOT NULL,
        approved_by TEXT,
        approved_at TIMESTAMPTZ,
        citation_snippet_ids JSONB NOT NULL DEFAULT '[]'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS risk_scores (
        risk_item_id UUID PRIMARY KEY REFERENCES risk_items(id),
        tef INTEGER NOT NULL CHECK (tef BETWEEN 1 AND 5),
        vulnerability INTEGER NOT NULL CHECK (vulnerability BETWEEN 1 AND 5),
        primary_loss INTEGER NOT NULL CHECK (primary_loss BETWEEN 1 AND 5),
        secondary_loss INTEGER NOT NULL CHECK (secondary_loss BETWEEN 1 AND 5),
        composite_score DOUBLE PRECISION NOT NULL,
        severity_band VARCHAR(16) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS emerging_signals (
        risk_item_id UUID PRIMARY KEY REFERENCES risk_items(id),
        trend_ratio DOUBLE PRECISION NOT NULL,
        novelty_score DOUBLE PRECISION NOT NULL,
        source_diversity INTEGER NOT NULL,
        triggered BOOLEAN NOT NULL,
        trigger_reason TEXT NOT NULL,
        evaluated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_events (
        id UUID PRIMARY KEY,
        actor TEXT NOT NULL,
        action VARCHAR(64) NOT NULL,
        target_type VARCHAR(64) NOT NULL,
        target_id TEXT NOT NULL,
        before_json JSONB,
        after_json JSONB,
        timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_source_documents_content_hash ON source_documents(content_hash)",
    "CREATE INDEX IF NOT EXISTS idx_ingestion_jobs_created_at ON ingestion_jobs(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_evidence_snippets_risk_item_id ON evidence_snippets(risk_item_id)",
    "CREATE INDEX IF NOT EXISTS idx_risk_items_name_created_at ON risk_items(name, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_risk_items_created_at ON risk_items(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_audit_events_target_id ON audit_events(target_id)",
];

/// Initialize database schema
pub async fn init_schema(pool: &PgPool) -> Result<(), DbError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    // Create indexes separately
    for statement in INDEXES {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database schema initialized");

    Ok(())
}
