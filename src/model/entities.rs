//! Persisted entities of the ingestion-and-analysis pipeline

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Kind of source a document was ingested from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Pdf,
    Url,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Pdf => "pdf",
            SourceKind::Url => "url",
        }
    }

    /// Prefix used in evidence references (`page:3`, `dom:12`)
    pub fn evidence_prefix(&self) -> &'static str {
        match self {
            SourceKind::Pdf => "page",
            SourceKind::Url => "dom",
        }
    }
}

/// Lifecycle shared by source documents and ingestion jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Queued => "queued",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

/// Review state of a risk item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Draft,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Draft => "draft",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

/// FAIR-lite severity band; serialized with its display casing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum SeverityBand {
    Low,
    Moderate,
    High,
    Critical,
}

impl SeverityBand {
    pub const ALL: [SeverityBand; 4] = [
        SeverityBand::Low,
        SeverityBand::Moderate,
        SeverityBand::High,
        SeverityBand::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityBand::Low => "Low",
            SeverityBand::Moderate => "Moderate",
            SeverityBand::High => "High",
            SeverityBand::Critical => "Critical",
        }
    }
}

macro_rules! impl_wire_value {
    ($ty:ty, $label:literal, [$($variant:expr),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| format!("Unknown {} value: {}", $label, s))
            }
        }
    };
}

impl_wire_value!(SourceKind, "source kind", [SourceKind::Pdf, SourceKind::Url]);
impl_wire_value!(
    ProcessingStatus,
    "processing status",
    [
        ProcessingStatus::Queued,
        ProcessingStatus::Processing,
        ProcessingStatus::Completed,
        ProcessingStatus::Failed,
    ]
);
impl_wire_value!(
    ApprovalStatus,
    "approval status",
    [ApprovalStatus::Draft, ApprovalStatus::Approved, ApprovalStatus::Rejected]
);
impl_wire_value!(
    SeverityBand,
    "severity band",
    [
        SeverityBand::Low,
        SeverityBand::Moderate,
        SeverityBand::High,
        SeverityBand::Critical,
    ]
);

/// A PDF report or web page submitted for ingestion
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SourceDocument {
    pub id: Uuid,
    pub kind: SourceKind,
    /// Empty until supplied by the caller or filled from extraction
    pub title: String,
    pub publisher: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    /// Set only once extraction succeeded
    pub content_hash: Option<String>,
    pub status: ProcessingStatus,
    /// File path of the stored artifact, or the page URL
    pub origin: Option<String>,
}

/// One ingestion attempt for exactly one source document
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IngestionJob {
    pub id: Uuid,
    pub source_document_id: Uuid,
    pub status: ProcessingStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Bounded excerpt of source text, the unit of provenance
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EvidenceSnippet {
    pub id: Uuid,
    pub source_document_id: Uuid,
    /// Weak back-link set by citation linking; never implies ownership
    pub risk_item_id: Option<Uuid>,
    pub text: String,
    /// `<kind>:<index>`, unique within the document
    pub reference: String,
    pub url: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RiskItem {
    pub id: Uuid,
    pub source_document_id: Uuid,
    pub name: String,
    pub taxonomy_category: String,
    pub threat_actor: Option<String>,
    pub affected_sectors: Vec<String>,
    pub affected_assets: Vec<String>,
    pub status: ApprovalStatus,
    pub extraction_confidence: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RiskStatement {
    pub risk_item_id: Uuid,
    pub business_impact: String,
    pub why_care: String,
    pub time_horizon: String,
    pub recommended_actions: Vec<String>,
    pub confidence: f64,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub citation_snippet_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RiskScore {
    pub risk_item_id: Uuid,
    pub tef: i32,
    pub vulnerability: i32,
    pub primary_loss: i32,
    pub secondary_loss: i32,
    pub composite_score: f64,
    pub severity_band: SeverityBand,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmergingSignal {
    pub risk_item_id: Uuid,
    pub trend_ratio: f64,
    pub novelty_score: f64,
    pub source_diversity: i32,
    pub triggered: bool,
    pub trigger_reason: String,
    pub evaluated_at: DateTime<Utc>,
}

/// Append-only audit record
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        actor: &str,
        action: &str,
        target_type: &str,
        target_id: impl fmt::Display,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor: actor.to_string(),
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            before: None,
            after: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_before(mut self, before: serde_json::Value) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_after(mut self, after: serde_json::Value) -> Self {
        self.after = Some(after);
        self
    }
}

/// Rows written together for one risk candidate
#[derive(Debug, Clone)]
pub struct RiskBundle {
    pub item: RiskItem,
    pub statement: RiskStatement,
    pub score: RiskScore,
    pub emerging: EmergingSignal,
}

/// A risk item together with the rows it exclusively owns and the
/// evidence snippets currently linked back to it
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RiskRecord {
    pub item: RiskItem,
    pub statement: Option<RiskStatement>,
    pub score: Option<RiskScore>,
    pub emerging: Option<EmergingSignal>,
    pub evidence: Vec<EvidenceSnippet>,
}

impl From<RiskBundle> for RiskRecord {
    fn from(bundle: RiskBundle) -> Self {
        Self {
            item: bundle.item,
            statement: Some(bundle.statement),
            score: Some(bundle.score),
            emerging: Some(bundle.emerging),
            evidence: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_values_round_trip_through_from_str() {
        for status in [
            ProcessingStatus::Queued,
            ProcessingStatus::Processing,
            ProcessingStatus::Completed,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ProcessingStatus>(), Ok(status));
        }
        assert_eq!("Critical".parse::<SeverityBand>(), Ok(SeverityBand::Critical));
        assert!("critical".parse::<SeverityBand>().is_err());
        assert!("archived".parse::<ApprovalStatus>().is_err());
    }

    #[test]
    fn test_severity_band_serializes_with_display_casing() {
        let json = serde_json::to_string(&SeverityBand::Moderate).unwrap();
        assert_eq!(json, "\"Moderate\"");
        let json = serde_json::to_string(&ProcessingStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ProcessingStatus::Completed.is_terminal());
        assert!(ProcessingStatus::Failed.is_terminal());
        assert!(!ProcessingStatus::Queued.is_terminal());
        assert!(!ProcessingStatus::Processing.is_terminal());
    }
}
