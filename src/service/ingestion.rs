//! Ingestion job orchestration
//!
//! A job moves `queued -> processing -> completed | failed`. The processing
//! transition is committed on its own; everything after it (duplicate check,
//! evidence, risk bundles and the completion record) lands in a single unit
//! of work, and any error on the way is turned into a `failed` job.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use url::Url;
use uuid::Uuid;

use super::candidates::CandidateGenerator;
use super::citation::CitationLinker;
use super::dedup::{content_hash, is_near_duplicate, semantic_similarity};
use super::emerging::{EmergingInputs, MentionRecord, evaluate_emerging};
use super::scoring::{FairFactors, severity_band};
use crate::db::{DbError, RiskStore, UnitOfWork};
use crate::extractor::{ContentExtractor, ExtractedContent, ExtractionError};
use crate::model::{
    ApprovalStatus, AuditEvent, EmergingSignal, EvidenceSnippet, IngestionJob, PipelineConfig,
    ProcessingStatus, RiskBundle, RiskCandidate, RiskItem, RiskScore, RiskStatement,
    SourceDocument, SourceKind,
};

/// Actor recorded for work started by the queue worker
pub const SYSTEM_ACTOR: &str = "system";

const UNTITLED_PDF: &str = "Untitled PDF report";
const PLACEHOLDER_TEXT: &str = "generic threat activity";
const TARGET_INGESTION_JOB: &str = "IngestionJob";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum IngestionError {
    #[error("Ingestion job not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Failures inside a processing run; all of them end the job as `failed`
#[derive(Debug, thiserror::Error)]
enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("No text could be extracted from source")]
    EmptyText,

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Optional caller-supplied document metadata
#[derive(Debug, Clone, Default)]
pub struct SourceMetadata {
    pub title: Option<String>,
    pub publisher: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

pub struct IngestionService {
    store: Arc<dyn RiskStore>,
    extractor: Arc<dyn ContentExtractor>,
    generator: CandidateGenerator,
    linker: CitationLinker,
    config: PipelineConfig,
}

impl IngestionService {
    pub fn new(
        store: Arc<dyn RiskStore>,
        extractor: Arc<dyn ContentExtractor>,
        generator: CandidateGenerator,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            generator,
            linker: CitationLinker::new(config.citation_min_score),
            config,
        }
    }

    /// Register an uploaded PDF artifact for ingestion
    pub async fn create_pdf_ingestion(
        &self,
        artifact_locator: &str,
        metadata: SourceMetadata,
        actor: &str,
    ) -> Result<IngestionJob, IngestionError> {
        if artifact_locator.trim().is_empty() {
            return Err(IngestionError::InvalidInput(
                "Artifact locator must not be empty".to_string(),
            ));
        }

        let source = new_source(SourceKind::Pdf, artifact_locator, metadata);
        let after = serde_json::json!({ "source_document_id": source.id });
        self.create(source, "ingestion_created_pdf", after, actor)
            .await
    }

    /// Register a web page for ingestion
    pub async fn create_url_ingestion(
        &self,
        url: &str,
        metadata: SourceMetadata,
        actor: &str,
    ) -> Result<IngestionJob, IngestionError> {
        let parsed = Url::parse(url.trim())
            .map_err(|e| IngestionError::InvalidInput(format!("Invalid URL {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(IngestionError::InvalidInput(format!(
                "Unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let source = new_source(SourceKind::Url, parsed.as_str(), metadata);
        let after = serde_json::json!({
            "source_document_id": source.id,
            "url": parsed.as_str(),
        });
        self.create(source, "ingestion_created_url", after, actor)
            .await
    }

    async fn create(
        &self,
        source: SourceDocument,
        action: &str,
        after: serde_json::Value,
        actor: &str,
    ) -> Result<IngestionJob, IngestionError> {
        let job = IngestionJob {
            id: Uuid::new_v4(),
            source_document_id: source.id,
            status: ProcessingStatus::Queued,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        let mut uow = self.store.begin().await?;
        uow.insert_source(&source).await?;
        uow.insert_job(&job).await?;
        uow.insert_audit(
            &AuditEvent::new(actor, action, TARGET_INGESTION_JOB, job.id).with_after(after),
        )
        .await?;
        uow.commit().await?;

        tracing::info!(
            job_id = %job.id,
            source_document_id = %source.id,
            kind = %source.kind,
            "Created ingestion job"
        );
        Ok(job)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<IngestionJob, IngestionError> {
        self.store.get_job(job_id).await.map_err(|e| match e {
            DbError::NotFound(_) => IngestionError::NotFound(job_id),
            other => other.into(),
        })
    }

    pub async fn list_jobs(&self) -> Result<Vec<IngestionJob>, IngestionError> {
        Ok(self.store.list_jobs().await?)
    }

    /// Drive a job to a terminal state
    ///
    /// Processing failures are recorded on the job and returned as `Ok`;
    /// only an unknown job or a store failure while recording the outcome
    /// is an `Err`. A job that is already terminal, or still `processing`
    /// within its lease, is returned unchanged.
    pub async fn process(&self, job_id: Uuid, actor: &str) -> Result<IngestionJob, IngestionError> {
        let mut job = self.get_job(job_id).await?;
        if job.status.is_terminal() {
            tracing::info!(job_id = %job_id, status = %job.status, "Job already finished, skipping");
            return Ok(job);
        }
        if self.lease_is_held(&job) {
            tracing::info!(job_id = %job_id, "Job is being processed elsewhere, skipping");
            return Ok(job);
        }

        let mut source = self.store.get_source(job.source_document_id).await?;

        let started_at = Utc::now();
        job.status = ProcessingStatus::Processing;
        job.started_at = Some(started_at);
        source.status = ProcessingStatus::Processing;

        let mut uow = self.store.begin().await?;
        uow.update_job(&job).await?;
        uow.update_source(&source).await?;
        uow.commit().await?;

        tracing::info!(job_id = %job_id, kind = %source.kind, "Ingestion processing started");

        match self.run(job, source, actor).await {
            Ok(job) => {
                tracing::info!(
                    job_id = %job_id,
                    elapsed_ms = (Utc::now() - started_at).num_milliseconds(),
                    "Ingestion job completed"
                );
                Ok(job)
            }
            Err(e) => self.record_failure(job_id, e.to_string(), actor).await,
        }
    }

    fn lease_is_held(&self, job: &IngestionJob) -> bool {
        let lease = Duration::seconds(self.config.processing_lease_secs);
        job.status == ProcessingStatus::Processing
            && job.started_at.is_some_and(|started| Utc::now() - started < lease)
    }

    async fn run(
        &self,
        mut job: IngestionJob,
        mut source: SourceDocument,
        actor: &str,
    ) -> Result<IngestionJob, PipelineError> {
        let content = self.extractor.extract(&source).await?;
        let text = content.text.trim().to_string();
        if text.is_empty() {
            return Err(PipelineError::EmptyText);
        }

        apply_metadata(&mut source, &content);
        let hash = content_hash(&text);
        source.content_hash = Some(hash.clone());

        // checked again inside the unit of work
        let candidates = match self.store.find_duplicate_source(&hash, source.id).await? {
            Some(_) => Vec::new(),
            None => self.candidates(&text).await,
        };

        let mut uow = self.store.begin().await?;

        if let Some(original) = uow.find_duplicate_source(&hash, source.id).await? {
            return self
                .complete_duplicate(uow, job, source, original.id, actor)
                .await;
        }

        let now = Utc::now();
        let recent_start = now - Duration::days(self.config.recent_window_days);
        let baseline_start = now - Duration::days(self.config.lookback_days);

        let snippets = evidence_snippets(&source, content, self.config.max_evidence_snippets);
        let near_duplicate_of = self
            .near_duplicate_of(uow.as_mut(), source.id, &snippets, recent_start)
            .await?;
        if let Some(similar) = near_duplicate_of {
            tracing::info!(
                job_id = %job.id,
                near_duplicate_of = %similar,
                "Near-duplicate of a recent document"
            );
        }

        uow.insert_snippets(&snippets).await?;
        tracing::info!(job_id = %job.id, snippet_count = snippets.len(), "Persisted evidence");

        for candidate in &candidates {
            let bundle = self
                .build_bundle(uow.as_mut(), &source, &snippets, candidate, recent_start, baseline_start)
                .await?;
            tracing::debug!(
                risk_item_id = %bundle.item.id,
                name = %bundle.item.name,
                composite_score = bundle.score.composite_score,
                citations = bundle.statement.citation_snippet_ids.len(),
                triggered = bundle.emerging.triggered,
                "Built risk bundle"
            );
            uow.insert_risk(&bundle).await?;
        }

        let completed_at = Utc::now();
        source.status = ProcessingStatus::Completed;
        job.status = ProcessingStatus::Completed;
        job.completed_at = Some(completed_at);

        uow.update_source(&source).await?;
        uow.update_job(&job).await?;
        uow.insert_audit(
            &AuditEvent::new(actor, "ingestion_completed", TARGET_INGESTION_JOB, job.id)
                .with_after(serde_json::json!({
                    "source_document_id": source.id,
                    "risk_count": candidates.len(),
                    "near_duplicate_of": near_duplicate_of,
                })),
        )
        .await?;
        uow.commit().await?;

        tracing::info!(job_id = %job.id, risk_count = candidates.len(), "Risk items generated");
        Ok(job)
    }

    /// Most similar completed document since `since` whose evidence text
    /// meets the near-duplicate threshold; annotation only, not a gate
    async fn near_duplicate_of(
        &self,
        uow: &mut dyn UnitOfWork,
        source_id: Uuid,
        snippets: &[EvidenceSnippet],
        since: DateTime<Utc>,
    ) -> Result<Option<Uuid>, DbError> {
        let text = snippets
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let threshold = self.config.near_duplicate_threshold;

        Ok(uow
            .recent_source_texts(since, source_id)
            .await?
            .into_iter()
            .filter(|(_, other)| is_near_duplicate(&text, other, threshold))
            .map(|(id, other)| (id, semantic_similarity(&text, &other)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id))
    }

    async fn candidates(&self, text: &str) -> Vec<RiskCandidate> {
        let candidates = self.generator.generate(text).await;
        if !candidates.is_empty() {
            return candidates;
        }
        tracing::warn!("No candidates for extracted text, using placeholder text");
        self.generator.generate(PLACEHOLDER_TEXT).await
    }

    async fn build_bundle(
        &self,
        uow: &mut dyn UnitOfWork,
        source: &SourceDocument,
        snippets: &[EvidenceSnippet],
        candidate: &RiskCandidate,
        recent_start: DateTime<Utc>,
        baseline_start: DateTime<Utc>,
    ) -> Result<RiskBundle, PipelineError> {
        let item_id = Uuid::new_v4();
        let created_at = Utc::now();
        let confidence = candidate.bounded_confidence();

        let citation_snippet_ids = self.linker.cited_ids(
            &candidate.claims,
            snippets.iter().map(|s| (&s.id, s.text.as_str())),
        );

        let factors = FairFactors::derive(&candidate.name, confidence);
        let composite_score = factors.composite();

        let mut recent = uow
            .mention_window(&candidate.name, recent_start, None)
            .await?;
        let baseline = uow
            .mention_window(&candidate.name, baseline_start, Some(recent_start))
            .await?;
        recent.push(MentionRecord {
            sectors: candidate.affected_sectors.clone(),
            threat_actor: candidate.threat_actor.clone(),
            taxonomy_category: candidate.taxonomy_category.clone(),
            publisher: source.publisher.clone(),
        });
        let evaluation =
            evaluate_emerging(&EmergingInputs::from_mentions(&recent, &baseline, confidence));

        Ok(RiskBundle {
            item: RiskItem {
                id: item_id,
                source_document_id: source.id,
                name: candidate.name.clone(),
                taxonomy_category: candidate.taxonomy_category.clone(),
                threat_actor: candidate.threat_actor.clone(),
                affected_sectors: candidate.affected_sectors.clone(),
                affected_assets: candidate.affected_assets.clone(),
                status: ApprovalStatus::Draft,
                extraction_confidence: confidence,
                created_at,
            },
            statement: RiskStatement {
                risk_item_id: item_id,
                business_impact: candidate.business_impact.clone(),
                why_care: candidate.why_care.clone(),
                time_horizon: candidate.time_horizon.clone(),
                recommended_actions: candidate.recommended_actions.clone(),
                confidence,
                approved_by: None,
                approved_at: None,
                citation_snippet_ids,
            },
            score: RiskScore {
                risk_item_id: item_id,
                tef: factors.tef,
                vulnerability: factors.vulnerability,
                primary_loss: factors.primary_loss,
                secondary_loss: factors.secondary_loss,
                composite_score,
                severity_band: severity_band(composite_score),
            },
            emerging: EmergingSignal {
                risk_item_id: item_id,
                trend_ratio: evaluation.trend_ratio,
                novelty_score: evaluation.novelty_score,
                source_diversity: evaluation.source_diversity,
                triggered: evaluation.triggered,
                trigger_reason: evaluation.trigger_reason,
                evaluated_at: created_at,
            },
        })
    }

    async fn complete_duplicate(
        &self,
        mut uow: Box<dyn UnitOfWork>,
        mut job: IngestionJob,
        mut source: SourceDocument,
        original_id: Uuid,
        actor: &str,
    ) -> Result<IngestionJob, PipelineError> {
        let message = format!("Duplicate exact hash of source {}", original_id);

        source.status = ProcessingStatus::Completed;
        job.status = ProcessingStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.error_message = Some(message.clone());

        uow.update_source(&source).await?;
        uow.update_job(&job).await?;
        uow.insert_audit(
            &AuditEvent::new(actor, "ingestion_duplicate", TARGET_INGESTION_JOB, job.id)
                .with_after(serde_json::json!({
                    "source_document_id": source.id,
                    "duplicate_of": original_id,
                })),
        )
        .await?;
        uow.commit().await?;

        tracing::info!(job_id = %job.id, duplicate_of = %original_id, "{}", message);
        Ok(job)
    }

    /// Mark the job and its document failed in a fresh unit of work
    async fn record_failure(
        &self,
        job_id: Uuid,
        message: String,
        actor: &str,
    ) -> Result<IngestionJob, IngestionError> {
        tracing::error!(job_id = %job_id, error = %message, "Ingestion job failed");

        let mut job = self.get_job(job_id).await?;
        let mut source = self.store.get_source(job.source_document_id).await?;

        source.status = ProcessingStatus::Failed;
        job.status = ProcessingStatus::Failed;
        job.error_message = Some(message.clone());
        job.completed_at = Some(Utc::now());

        let mut uow = self.store.begin().await?;
        uow.update_source(&source).await?;
        uow.update_job(&job).await?;
        uow.insert_audit(
            &AuditEvent::new(actor, "ingestion_failed", TARGET_INGESTION_JOB, job.id)
                .with_after(serde_json::json!({ "error": message })),
        )
        .await?;
        uow.commit().await?;

        Ok(job)
    }
}

/// Title a document carries until extraction finds a better one
fn placeholder_title(kind: SourceKind, origin: &str) -> String {
    match kind {
        SourceKind::Url => origin.to_string(),
        SourceKind::Pdf => UNTITLED_PDF.to_string(),
    }
}

fn new_source(kind: SourceKind, origin: &str, metadata: SourceMetadata) -> SourceDocument {
    SourceDocument {
        id: Uuid::new_v4(),
        kind,
        title: metadata
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| placeholder_title(kind, origin)),
        publisher: metadata.publisher.filter(|p| !p.trim().is_empty()),
        published_at: metadata.published_at,
        ingested_at: Utc::now(),
        content_hash: None,
        status: ProcessingStatus::Queued,
        origin: Some(origin.to_string()),
    }
}

/// Caller-supplied values win over extracted ones; an extracted title
/// replaces the placeholder
fn apply_metadata(source: &mut SourceDocument, content: &ExtractedContent) {
    let placeholder = placeholder_title(source.kind, source.origin.as_deref().unwrap_or_default());
    if source.title.trim().is_empty() || source.title == placeholder {
        if let Some(title) = content.title.as_ref().filter(|t| !t.trim().is_empty()) {
            source.title = title.trim().to_string();
        } else if source.title.trim().is_empty() {
            source.title = placeholder;
        }
    }
    if source.publisher.is_none() {
        source.publisher = content.publisher.clone();
    }
    if source.published_at.is_none() {
        source.published_at = content.published_at;
    }
}

fn evidence_snippets(
    source: &SourceDocument,
    content: ExtractedContent,
    limit: usize,
) -> Vec<EvidenceSnippet> {
    let url = match source.kind {
        SourceKind::Url => source.origin.clone(),
        SourceKind::Pdf => None,
    };
    let captured_at = Utc::now();

    content
        .snippets
        .into_iter()
        .take(limit)
        .map(|draft| EvidenceSnippet {
            id: Uuid::new_v4(),
            source_document_id: source.id,
            risk_item_id: None,
            text: draft.text,
            reference: draft.reference,
            url: url.clone(),
            captured_at,
            confidence: draft.confidence,
        })
        .collect()
}
