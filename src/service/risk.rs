//! Review workflow and risk queries

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::db::{DashboardSummary, DbError, RiskFilter, RiskStore};
use crate::model::{ApprovalStatus, AuditEvent, EmergingSignal, RiskRecord};

const TARGET_RISK_ITEM: &str = "RiskItem";
const MANUAL_OVERRIDE_PREFIX: &str = "manual_override:";

pub const MIN_OVERRIDE_REASON_CHARS: usize = 5;
pub const MAX_OVERRIDE_REASON_CHARS: usize = 1000;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RiskServiceError {
    #[error("Risk not found: {0}")]
    NotFound(Uuid),

    /// Precondition failure; nothing was changed
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

pub struct RiskService {
    store: Arc<dyn RiskStore>,
}

impl RiskService {
    pub fn new(store: Arc<dyn RiskStore>) -> Self {
        Self { store }
    }

    pub async fn get_risk(&self, id: Uuid) -> Result<RiskRecord, RiskServiceError> {
        self.store.get_risk(id).await.map_err(|e| not_found(e, id))
    }

    pub async fn list_risks(&self, filter: &RiskFilter) -> Result<Vec<RiskRecord>, RiskServiceError> {
        Ok(self.store.list_risks(filter).await?)
    }

    pub async fn dashboard_summary(&self) -> Result<DashboardSummary, RiskServiceError> {
        Ok(self.store.dashboard_summary().await?)
    }

    /// Audit events recorded against one risk, oldest first
    pub async fn audit_trail(&self, id: Uuid) -> Result<Vec<AuditEvent>, RiskServiceError> {
        self.get_risk(id).await?;
        Ok(self.store.audit_trail(&id.to_string()).await?)
    }

    /// Triggered risks, highest novelty first, then highest trend ratio
    pub async fn emerging_risks(&self) -> Result<Vec<RiskRecord>, RiskServiceError> {
        let filter = RiskFilter {
            emerging: Some(true),
            ..Default::default()
        };
        let mut risks = self.store.list_risks(&filter).await?;

        let key = |r: &RiskRecord| {
            r.emerging
                .as_ref()
                .map(|e| (e.novelty_score, e.trend_ratio))
                .unwrap_or_default()
        };
        risks.sort_by(|a, b| {
            let (a_novelty, a_trend) = key(a);
            let (b_novelty, b_trend) = key(b);
            b_novelty
                .total_cmp(&a_novelty)
                .then_with(|| b_trend.total_cmp(&a_trend))
        });
        Ok(risks)
    }

    /// Approve a risk whose statement cites only evidence from its own document
    pub async fn approve(&self, id: Uuid, actor: &str) -> Result<RiskRecord, RiskServiceError> {
        let mut uow = self.store.begin().await?;
        let mut record = uow.get_risk(id).await.map_err(|e| not_found(e, id))?;

        let mut statement = record
            .statement
            .clone()
            .ok_or_else(|| validation("Risk statement is missing"))?;
        if statement.citation_snippet_ids.is_empty() {
            return Err(validation("Approval blocked: citations are required"));
        }
        let evidence_ids: HashSet<Uuid> = record.evidence.iter().map(|s| s.id).collect();
        if !statement
            .citation_snippet_ids
            .iter()
            .all(|cited| evidence_ids.contains(cited))
        {
            return Err(validation(
                "Approval blocked: citations must reference existing evidence snippets",
            ));
        }

        let before = record.item.status;
        statement.approved_by = Some(actor.to_string());
        statement.approved_at = Some(Utc::now());

        uow.update_risk_status(id, ApprovalStatus::Approved).await?;
        uow.update_statement(&statement).await?;
        uow.insert_audit(&status_change("risk_approved", actor, id, before, ApprovalStatus::Approved))
            .await?;
        uow.commit().await?;

        tracing::info!(risk_item_id = %id, actor = %actor, "Risk approved");
        record.item.status = ApprovalStatus::Approved;
        record.statement = Some(statement);
        Ok(record)
    }

    pub async fn reject(&self, id: Uuid, actor: &str) -> Result<RiskRecord, RiskServiceError> {
        let mut uow = self.store.begin().await?;
        let mut record = uow.get_risk(id).await.map_err(|e| not_found(e, id))?;
        let before = record.item.status;

        uow.update_risk_status(id, ApprovalStatus::Rejected).await?;
        uow.insert_audit(&status_change("risk_rejected", actor, id, before, ApprovalStatus::Rejected))
            .await?;
        uow.commit().await?;

        tracing::info!(risk_item_id = %id, actor = %actor, "Risk rejected");
        record.item.status = ApprovalStatus::Rejected;
        Ok(record)
    }

    /// Set the emerging flag by hand, creating the signal when absent
    pub async fn override_emerging(
        &self,
        id: Uuid,
        triggered: bool,
        reason: &str,
        actor: &str,
    ) -> Result<RiskRecord, RiskServiceError> {
        let reason = reason.trim();
        let length = reason.chars().count();
        if !(MIN_OVERRIDE_REASON_CHARS..=MAX_OVERRIDE_REASON_CHARS).contains(&length) {
            return Err(validation(&format!(
                "Override reason must be between {} and {} characters",
                MIN_OVERRIDE_REASON_CHARS, MAX_OVERRIDE_REASON_CHARS
            )));
        }

        let mut uow = self.store.begin().await?;
        let mut record = uow.get_risk(id).await.map_err(|e| not_found(e, id))?;

        let trigger_reason = format!("{}{}", MANUAL_OVERRIDE_PREFIX, reason);
        let signal = match record.emerging.take() {
            Some(existing) => EmergingSignal {
                triggered,
                trigger_reason,
                evaluated_at: Utc::now(),
                ..existing
            },
            None => EmergingSignal {
                risk_item_id: id,
                trend_ratio: 0.0,
                novelty_score: 0.0,
                source_diversity: 0,
                triggered,
                trigger_reason,
                evaluated_at: Utc::now(),
            },
        };

        uow.upsert_emerging(&signal).await?;
        uow.insert_audit(
            &AuditEvent::new(actor, "emerging_override", TARGET_RISK_ITEM, id).with_after(
                serde_json::json!({ "triggered": triggered, "reason": reason }),
            ),
        )
        .await?;
        uow.commit().await?;

        tracing::info!(risk_item_id = %id, triggered = triggered, "Emerging flag overridden");
        record.emerging = Some(signal);
        Ok(record)
    }
}

fn not_found(err: DbError, id: Uuid) -> RiskServiceError {
    match err {
        DbError::NotFound(_) => RiskServiceError::NotFound(id),
        other => other.into(),
    }
}

fn validation(message: &str) -> RiskServiceError {
    RiskServiceError::Validation(message.to_string())
}

fn status_change(
    action: &str,
    actor: &str,
    id: Uuid,
    before: ApprovalStatus,
    after: ApprovalStatus,
) -> AuditEvent {
    AuditEvent::new(actor, action, TARGET_RISK_ITEM, id)
        .with_before(serde_json::json!({ "status": before }))
        .with_after(serde_json::json!({ "status": after }))
}
