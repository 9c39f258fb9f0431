//! PostgreSQL implementation of the risk store

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::models::{
    AuditEventRow, DashboardSummary, EmergingSignalRow, EvidenceSnippetRow, IngestionJobRow,
    MentionRow, RiskFilter, RiskItemRow, RiskScoreRow, RiskStatementRow, SourceDocumentRow,
};
use super::{DbError, MAX_LIST_ROWS, RiskStore, UnitOfWork};
use crate::model::{
    ApprovalStatus, AuditEvent, EmergingSignal, EvidenceSnippet, IngestionJob, ProcessingStatus,
    RiskBundle, RiskItem, RiskRecord, RiskStatement, SourceDocument,
};
use crate::service::emerging::MentionRecord;

/// Risk store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgRiskStore {
    pool: PgPool,
}

impl PgRiskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// A unit of work over one PostgreSQL transaction
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RiskStore for PgRiskStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, DbError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn get_job(&self, id: Uuid) -> Result<IngestionJob, DbError> {
        let mut conn = self.pool.acquire().await?;
        fetch_job(&mut conn, id).await
    }

    async fn list_jobs(&self) -> Result<Vec<IngestionJob>, DbError> {
        let rows: Vec<IngestionJobRow> = sqlx::query_as(
            r#"
            SELECT * FROM ingestion_jobs
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(MAX_LIST_ROWS)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| r.into_domain().map_err(DbError::Serialization))
            .collect()
    }

    async fn get_source(&self, id: Uuid) -> Result<SourceDocument, DbError> {
        let mut conn = self.pool.acquire().await?;
        fetch_source(&mut conn, id).await
    }

    async fn find_duplicate_source(
        &self,
        content_hash: &str,
        exclude: Uuid,
    ) -> Result<Option<SourceDocument>, DbError> {
        let mut conn = self.pool.acquire().await?;
        fetch_duplicate(&mut conn, content_hash, exclude).await
    }

    async fn get_risk(&self, id: Uuid) -> Result<RiskRecord, DbError> {
        let mut conn = self.pool.acquire().await?;
        fetch_risk_record(&mut conn, id, false).await
    }

    async fn list_risks(&self, filter: &RiskFilter) -> Result<Vec<RiskRecord>, DbError> {
        let rows: Vec<RiskItemRow> = sqlx::query_as(
            r#"
            SELECT r.* FROM risk_items r
            LEFT JOIN risk_scores s ON s.risk_item_id = r.id
            LEFT JOIN emerging_signals e ON e.risk_item_id = r.id
            WHERE ($1::text IS NULL OR r.status = $1)
              AND ($2::text IS NULL OR s.severity_band = $2)
              AND ($3::boolean IS NULL OR e.triggered = $3)
              AND ($4::text IS NULL OR r.taxonomy_category = $4)
            ORDER BY r.created_at DESC
            LIMIT $5
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.severity.map(|s| s.as_str()))
        .bind(filter.emerging)
        .bind(filter.category.as_deref())
        .bind(MAX_LIST_ROWS)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(|r| r.into_domain().map_err(DbError::Serialization))
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.pool.acquire().await?;
        attach_details(&mut conn, items).await
    }

    async fn dashboard_summary(&self) -> Result<DashboardSummary, DbError> {
        let status_counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM risk_items GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let (emerging_risks,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM emerging_signals WHERE triggered = TRUE")
                .fetch_one(&self.pool)
                .await?;

        let band_counts: Vec<(String, i64)> = sqlx::query_as(
            "SELECT severity_band, COUNT(*) FROM risk_scores GROUP BY severity_band",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = DashboardSummary {
            emerging_risks,
            severity_breakdown: DashboardSummary::empty_breakdown(),
            ..Default::default()
        };

        for (status, count) in status_counts {
            let status: ApprovalStatus = status.parse().map_err(DbError::Serialization)?;
            summary.total_risks += count;
            match status {
                ApprovalStatus::Draft => summary.draft_risks = count,
                ApprovalStatus::Approved => summary.approved_risks = count,
                ApprovalStatus::Rejected => summary.rejected_risks = count,
            }
        }

        for (band, count) in band_counts {
            summary.severity_breakdown.insert(band, count);
        }

        Ok(summary)
    }

    async fn audit_trail(&self, target_id: &str) -> Result<Vec<AuditEvent>, DbError> {
        let rows: Vec<AuditEventRow> = sqlx::query_as(
            r#"
            SELECT * FROM audit_events
            WHERE target_id = $1
            ORDER BY timestamp ASC
            "#,
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuditEvent::from).collect())
    }

    async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn insert_source(&mut self, source: &SourceDocument) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO source_documents (
                id, kind, title, publisher, published_at,
                ingested_at, content_hash, status, origin
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(source.id)
        .bind(source.kind.as_str())
        .bind(&source.title)
        .bind(&source.publisher)
        .bind(source.published_at)
        .bind(source.ingested_at)
        .bind(&source.content_hash)
        .bind(source.status.as_str())
        .bind(&source.origin)
        .execute(&mut *self.tx)
        .await?;

        tracing::debug!(id = %source.id, "Inserted source document");
        Ok(())
    }

    async fn update_source(&mut self, source: &SourceDocument) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE source_documents SET
                title = $2,
                publisher = $3,
                published_at = $4,
                content_hash = $5,
                status = $6
            WHERE id = $1
            "#,
        )
        .bind(source.id)
        .bind(&source.title)
        .bind(&source.publisher)
        .bind(source.published_at)
        .bind(&source.content_hash)
        .bind(source.status.as_str())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(source.id.to_string()));
        }
        Ok(())
    }

    async fn insert_job(&mut self, job: &IngestionJob) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_jobs (
                id, source_document_id, status, error_message,
                created_at, started_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job.id)
        .bind(job.source_document_id)
        .bind(job.status.as_str())
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&mut *self.tx)
        .await?;

        tracing::debug!(id = %job.id, "Inserted ingestion job");
        Ok(())
    }

    async fn update_job(&mut self, job: &IngestionJob) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_jobs SET
                status = $2,
                error_message = $3,
                started_at = $4,
                completed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.error_message)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(job.id.to_string()));
        }
        Ok(())
    }

    async fn find_duplicate_source(
        &mut self,
        content_hash: &str,
        exclude: Uuid,
    ) -> Result<Option<SourceDocument>, DbError> {
        fetch_duplicate(&mut self.tx, content_hash, exclude).await
    }

    async fn insert_snippets(&mut self, snippets: &[EvidenceSnippet]) -> Result<(), DbError> {
        for snippet in snippets {
            sqlx::query(
                r#"
                INSERT INTO evidence_snippets (
                    id, source_document_id, risk_item_id, text,
                    reference, url, captured_at, confidence
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(snippet.id)
            .bind(snippet.source_document_id)
            .bind(snippet.risk_item_id)
            .bind(&snippet.text)
            .bind(&snippet.reference)
            .bind(&snippet.url)
            .bind(snippet.captured_at)
            .bind(snippet.confidence)
            .execute(&mut *self.tx)
            .await?;
        }

        tracing::debug!(count = snippets.len(), "Inserted evidence snippets");
        Ok(())
    }

    async fn recent_source_texts(
        &mut self,
        since: DateTime<Utc>,
        exclude: Uuid,
    ) -> Result<Vec<(Uuid, String)>, DbError> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT d.id, string_agg(e.text, E'\n\n' ORDER BY e.captured_at, e.reference)
            FROM source_documents d
            JOIN evidence_snippets e ON e.source_document_id = d.id
            WHERE d.status = $1
              AND d.ingested_at >= $2
              AND d.id <> $3
            GROUP BY d.id
            "#,
        )
        .bind(ProcessingStatus::Completed.as_str())
        .bind(since)
        .bind(exclude)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn mention_window(
        &mut self,
        name: &str,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<MentionRecord>, DbError> {
        let rows: Vec<MentionRow> = sqlx::query_as(
            r#"
            SELECT r.affected_sectors, r.threat_actor, r.taxonomy_category, d.publisher
            FROM risk_items r
            JOIN source_documents d ON d.id = r.source_document_id
            WHERE r.name = $1
              AND r.created_at >= $2
              AND ($3::timestamptz IS NULL OR r.created_at < $3)
            "#,
        )
        .bind(name)
        .bind(since)
        .bind(until)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| MentionRecord {
                sectors: row.affected_sectors.0,
                threat_actor: row.threat_actor,
                taxonomy_category: row.taxonomy_category,
                publisher: row.publisher,
            })
            .collect())
    }

    async fn insert_risk(&mut self, bundle: &RiskBundle) -> Result<(), DbError> {
        let item = &bundle.item;
        sqlx::query(
            r#"
            INSERT INTO risk_items (
                id, source_document_id, name, taxonomy_category, threat_actor,
                affected_sectors, affected_assets, status, extraction_confidence, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(item.id)
        .bind(item.source_document_id)
        .bind(&item.name)
        .bind(&item.taxonomy_category)
        .bind(&item.threat_actor)
        .bind(Json(&item.affected_sectors))
        .bind(Json(&item.affected_assets))
        .bind(item.status.as_str())
        .bind(item.extraction_confidence)
        .bind(item.created_at)
        .execute(&mut *self.tx)
        .await?;

        insert_statement(&mut self.tx, &bundle.statement).await?;

        let score = &bundle.score;
        sqlx::query(
            r#"
            INSERT INTO risk_scores (
                risk_item_id, tef, vulnerability, primary_loss,
                secondary_loss, composite_score, severity_band
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(score.risk_item_id)
        .bind(score.tef)
        .bind(score.vulnerability)
        .bind(score.primary_loss)
        .bind(score.secondary_loss)
        .bind(score.composite_score)
        .bind(score.severity_band.as_str())
        .execute(&mut *self.tx)
        .await?;

        self.upsert_emerging(&bundle.emerging).await?;

        let cited = &bundle.statement.citation_snippet_ids;
        if !cited.is_empty() {
            sqlx::query(
                r#"
                UPDATE evidence_snippets SET risk_item_id = $1
                WHERE id = ANY($2) AND source_document_id = $3
                "#,
            )
            .bind(item.id)
            .bind(cited)
            .bind(item.source_document_id)
            .execute(&mut *self.tx)
            .await?;
        }

        tracing::debug!(id = %item.id, name = %item.name, "Inserted risk bundle");
        Ok(())
    }

    async fn get_risk(&mut self, id: Uuid) -> Result<RiskRecord, DbError> {
        fetch_risk_record(&mut self.tx, id, true).await
    }

    async fn update_risk_status(
        &mut self,
        id: Uuid,
        status: ApprovalStatus,
    ) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE risk_items SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn update_statement(&mut self, statement: &RiskStatement) -> Result<(), DbError> {
        sqlx::query("DELETE FROM risk_statements WHERE risk_item_id = $1")
            .bind(statement.risk_item_id)
            .execute(&mut *self.tx)
            .await?;
        insert_statement(&mut self.tx, statement).await
    }

    async fn upsert_emerging(&mut self, signal: &EmergingSignal) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO emerging_signals (
                risk_item_id, trend_ratio, novelty_score, source_diversity,
                triggered, trigger_reason, evaluated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (risk_item_id) DO UPDATE SET
                trend_ratio = EXCLUDED.trend_ratio,
                novelty_score = EXCLUDED.novelty_score,
                source_diversity = EXCLUDED.source_diversity,
                triggered = EXCLUDED.triggered,
                trigger_reason = EXCLUDED.trigger_reason,
                evaluated_at = EXCLUDED.evaluated_at
            "#,
        )
        .bind(signal.risk_item_id)
        .bind(signal.trend_ratio)
        .bind(signal.novelty_score)
        .bind(signal.source_diversity)
        .bind(signal.triggered)
        .bind(&signal.trigger_reason)
        .bind(signal.evaluated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_audit(&mut self, event: &AuditEvent) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (
                id, actor, action, target_type, target_id,
                before_json, after_json, timestamp
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(&event.actor)
        .bind(&event.action)
        .bind(&event.target_type)
        .bind(&event.target_id)
        .bind(&event.before)
        .bind(&event.after)
        .bind(event.timestamp)
        .execute(&mut *self.tx)
        .await?;

        tracing::debug!(action = %event.action, target_id = %event.target_id, "Recorded audit event");
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }
}

async fn fetch_job(conn: &mut PgConnection, id: Uuid) -> Result<IngestionJob, DbError> {
    let row: IngestionJobRow = sqlx::query_as("SELECT * FROM ingestion_jobs WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::NotFound(id.to_string()))?;

    row.into_domain().map_err(DbError::Serialization)
}

async fn fetch_source(conn: &mut PgConnection, id: Uuid) -> Result<SourceDocument, DbError> {
    let row: SourceDocumentRow = sqlx::query_as("SELECT * FROM source_documents WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::NotFound(id.to_string()))?;

    row.into_domain().map_err(DbError::Serialization)
}

async fn fetch_duplicate(
    conn: &mut PgConnection,
    content_hash: &str,
    exclude: Uuid,
) -> Result<Option<SourceDocument>, DbError> {
    let row: Option<SourceDocumentRow> = sqlx::query_as(
        r#"
        SELECT * FROM source_documents
        WHERE content_hash = $1 AND id <> $2
        ORDER BY ingested_at ASC
        LIMIT 1
        "#,
    )
    .bind(content_hash)
    .bind(exclude)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|r| r.into_domain().map_err(DbError::Serialization))
        .transpose()
}

async fn fetch_risk_record(
    conn: &mut PgConnection,
    id: Uuid,
    for_update: bool,
) -> Result<RiskRecord, DbError> {
    let sql = if for_update {
        "SELECT * FROM risk_items WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT * FROM risk_items WHERE id = $1"
    };

    let row: RiskItemRow = sqlx::query_as(sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::NotFound(id.to_string()))?;
    let item = row.into_domain().map_err(DbError::Serialization)?;

    let source_document_id = item.source_document_id;
    let mut records = attach_details(conn, vec![item]).await?;
    let mut record = records
        .pop()
        .ok_or_else(|| DbError::NotFound(id.to_string()))?;
    let cited: Vec<Uuid> = record
        .statement
        .as_ref()
        .map(|s| s.citation_snippet_ids.clone())
        .unwrap_or_default();

    // cited snippets resolve even when a later risk took over the back-link
    let evidence: Vec<EvidenceSnippetRow> = sqlx::query_as(
        r#"
        SELECT * FROM evidence_snippets
        WHERE risk_item_id = $1
           OR (source_document_id = $2 AND id = ANY($3))
        ORDER BY captured_at ASC, reference ASC
        "#,
    )
    .bind(id)
    .bind(source_document_id)
    .bind(&cited)
    .fetch_all(&mut *conn)
    .await?;

    record.evidence = evidence.into_iter().map(EvidenceSnippet::from).collect();
    Ok(record)
}

/// Batch-load statement, score and signal for each item, keeping item order
async fn attach_details(
    conn: &mut PgConnection,
    items: Vec<RiskItem>,
) -> Result<Vec<RiskRecord>, DbError> {
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();

    let statements: Vec<RiskStatementRow> =
        sqlx::query_as("SELECT * FROM risk_statements WHERE risk_item_id = ANY($1)")
            .bind(&ids)
            .fetch_all(&mut *conn)
            .await?;
    let scores: Vec<RiskScoreRow> =
        sqlx::query_as("SELECT * FROM risk_scores WHERE risk_item_id = ANY($1)")
            .bind(&ids)
            .fetch_all(&mut *conn)
            .await?;
    let signals: Vec<EmergingSignalRow> =
        sqlx::query_as("SELECT * FROM emerging_signals WHERE risk_item_id = ANY($1)")
            .bind(&ids)
            .fetch_all(&mut *conn)
            .await?;

    let mut statements: HashMap<Uuid, RiskStatement> = statements
        .into_iter()
        .map(|r| (r.risk_item_id, RiskStatement::from(r)))
        .collect();
    let mut scores = scores
        .into_iter()
        .map(|r| {
            let id = r.risk_item_id;
            r.into_domain().map(|s| (id, s))
        })
        .collect::<Result<HashMap<_, _>, _>>()
        .map_err(DbError::Serialization)?;
    let mut signals: HashMap<Uuid, EmergingSignal> = signals
        .into_iter()
        .map(|r| (r.risk_item_id, EmergingSignal::from(r)))
        .collect();

    Ok(items
        .into_iter()
        .map(|item| RiskRecord {
            statement: statements.remove(&item.id),
            score: scores.remove(&item.id),
            emerging: signals.remove(&item.id),
            evidence: Vec::new(),
            item,
        })
        .collect())
}

async fn insert_statement(
    conn: &mut PgConnection,
    statement: &RiskStatement,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO risk_statements (
            risk_item_id, business_impact, why_care, time_horizon,
            recommended_actions, confidence, approved_by, approved_at, citation_snippet_ids
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(statement.risk_item_id)
    .bind(&statement.business_impact)
    .bind(&statement.why_care)
    .bind(&statement.time_horizon)
    .bind(Json(&statement.recommended_actions))
    .bind(statement.confidence)
    .bind(&statement.approved_by)
    .bind(statement.approved_at)
    .bind(Json(&statement.citation_snippet_ids))
    .execute(&mut *conn)
    .await?;
    Ok(())
}
