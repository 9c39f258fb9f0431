//! Database rows and query types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::model::{
    ApprovalStatus, AuditEvent, EmergingSignal, EvidenceSnippet, IngestionJob, RiskItem,
    RiskScore, RiskStatement, SeverityBand, SourceDocument,
};

#[derive(Debug, Clone, FromRow)]
pub struct SourceDocumentRow {
    pub id: Uuid,
    pub kind: String,
    pub title: String,
    pub publisher: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    pub content_hash: Option<String>,
    pub status: String,
    pub origin: Option<String>,
}

impl SourceDocumentRow {
    pub fn into_domain(self) -> Result<SourceDocument, String> {
        Ok(SourceDocument {
            id: self.id,
            kind: self.kind.parse()?,
            title: self.title,
            publisher: self.publisher,
            published_at: self.published_at,
            ingested_at: self.ingested_at,
            content_hash: self.content_hash,
            status: self.status.parse()?,
            origin: self.origin,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct IngestionJobRow {
    pub id: Uuid,
    pub source_document_id: Uuid,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestionJobRow {
    pub fn into_domain(self) -> Result<IngestionJob, String> {
        Ok(IngestionJob {
            id: self.id,
            source_document_id: self.source_document_id,
            status: self.status.parse()?,
            error_message: self.error_message,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EvidenceSnippetRow {
    pub id: Uuid,
    pub source_document_id: Uuid,
    pub risk_item_id: Option<Uuid>,
    pub text: String,
    pub reference: String,
    pub url: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub confidence: f64,
}

impl From<EvidenceSnippetRow> for EvidenceSnippet {
    fn from(row: EvidenceSnippetRow) -> Self {
        Self {
            id: row.id,
            source_document_id: row.source_document_id,
            risk_item_id: row.risk_item_id,
            text: row.text,
            reference: row.reference,
            url: row.url,
            captured_at: row.captured_at,
            confidence: row.confidence,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RiskItemRow {
    pub id: Uuid,
    pub source_document_id: Uuid,
    pub name: String,
    pub taxonomy_category: String,
    pub threat_actor: Option<String>,
    pub affected_sectors: Json<Vec<String>>,
    pub affected_assets: Json<Vec<String>>,
    pub status: String,
    pub extraction_confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl RiskItemRow {
    pub fn into_domain(self) -> Result<RiskItem, String> {
        Ok(RiskItem {
            id: self.id,
            source_document_id: self.source_document_id,
            name: self.name,
            taxonomy_category: self.taxonomy_category,
            threat_actor: self.threat_actor,
            affected_sectors: self.affected_sectors.0,
            affected_assets: self.affected_assets.0,
            status: self.status.parse()?,
            extraction_confidence: self.extraction_confidence,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RiskStatementRow {
    pub risk_item_id: Uuid,
    pub business_impact: String,
    pub why_care: String,
    pub time_horizon: String,
    pub recommended_actions: Json<Vec<String>>,
    pub confidence: f64,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub citation_snippet_ids: Json<Vec<Uuid>>,
}

impl From<RiskStatementRow> for RiskStatement {
    fn from(row: RiskStatementRow) -> Self {
        Self {
            risk_item_id: row.risk_item_id,
            business_impact: row.business_impact,
            why_care: row.why_care,
            time_horizon: row.time_horizon,
            recommended_actions: row.recommended_actions.0,
            confidence: row.confidence,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            citation_snippet_ids: row.citation_snippet_ids.0,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RiskScoreRow {
    pub risk_item_id: Uuid,
    pub tef: i32,
    pub vulnerability: i32,
    pub primary_loss: i32,
    pub secondary_loss: i32,
    pub composite_score: f64,
    pub severity_band: String,
}

impl RiskScoreRow {
    pub fn into_domain(self) -> Result<RiskScore, String> {
        Ok(RiskScore {
            risk_item_id: self.risk_item_id,
            tef: self.tef,
            vulnerability: self.vulnerability,
            primary_loss: self.primary_loss,
            secondary_loss: self.secondary_loss,
            composite_score: self.composite_score,
            severity_band: self.severity_band.parse()?,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EmergingSignalRow {
    pub risk_item_id: Uuid,
    pub trend_ratio: f64,
    pub novelty_score: f64,
    pub source_diversity: i32,
    pub triggered: bool,
    pub trigger_reason: String,
    pub evaluated_at: DateTime<Utc>,
}

impl From<EmergingSignalRow> for EmergingSignal {
    fn from(row: EmergingSignalRow) -> Self {
        Self {
            risk_item_id: row.risk_item_id,
            trend_ratio: row.trend_ratio,
            novelty_score: row.novelty_score,
            source_diversity: row.source_diversity,
            triggered: row.triggered,
            trigger_reason: row.trigger_reason,
            evaluated_at: row.evaluated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AuditEventRow {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub before_json: Option<serde_json::Value>,
    pub after_json: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl From<AuditEventRow> for AuditEvent {
    fn from(row: AuditEventRow) -> Self {
        Self {
            id: row.id,
            actor: row.actor,
            action: row.action,
            target_type: row.target_type,
            target_id: row.target_id,
            before: row.before_json,
            after: row.after_json,
            timestamp: row.timestamp,
        }
    }
}

/// One row of the emerging-detector mention window
#[derive(Debug, Clone, FromRow)]
pub struct MentionRow {
    pub affected_sectors: Json<Vec<String>>,
    pub threat_actor: Option<String>,
    pub taxonomy_category: String,
    pub publisher: Option<String>,
}

/// Filters for listing risk items
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RiskFilter {
    /// Approval status (`draft`, `approved`, `rejected`)
    pub status: Option<ApprovalStatus>,
    /// Severity band (`Low`, `Moderate`, `High`, `Critical`)
    pub severity: Option<SeverityBand>,
    /// Only risks whose emerging signal has this triggered flag
    pub emerging: Option<bool>,
    /// Exact taxonomy category
    pub category: Option<String>,
}

/// Risk counts for the dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DashboardSummary {
    pub total_risks: i64,
    pub draft_risks: i64,
    pub approved_risks: i64,
    pub rejected_risks: i64,
    /// Risks whose emerging signal is currently triggered
    pub emerging_risks: i64,
    /// Every band is present, zero when unused
    pub severity_breakdown: BTreeMap<String, i64>,
}

impl DashboardSummary {
    pub fn empty_breakdown() -> BTreeMap<String, i64> {
        SeverityBand::ALL
            .iter()
            .map(|band| (band.as_str().to_string(), 0))
            .collect()
    }
}
