//! In-process risk store
//!
//! Units of work hold the store lock for their whole lifetime and write a
//! staged copy back on commit, so concurrent writers are serialized and an
//! abandoned unit of work leaves no trace. Reads through [`RiskStore`] must
//! not be issued while the same task holds a unit of work.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::models::{DashboardSummary, RiskFilter};
use super::{DbError, MAX_LIST_ROWS, RiskStore, UnitOfWork};
use crate::model::{
    ApprovalStatus, AuditEvent, EmergingSignal, EvidenceSnippet, IngestionJob, ProcessingStatus,
    RiskBundle, RiskItem, RiskRecord, RiskScore, RiskStatement, SourceDocument,
};
use crate::service::emerging::MentionRecord;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    sources: Vec<SourceDocument>,
    jobs: Vec<IngestionJob>,
    snippets: Vec<EvidenceSnippet>,
    items: Vec<RiskItem>,
    statements: HashMap<Uuid, RiskStatement>,
    scores: HashMap<Uuid, RiskScore>,
    signals: HashMap<Uuid, EmergingSignal>,
    audit: Vec<AuditEvent>,
}

#[derive(Clone, Default)]
pub struct MemoryRiskStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRiskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

impl MemoryState {
    fn job(&self, id: Uuid) -> Result<&IngestionJob, DbError> {
        self.jobs
            .iter()
            .find(|j| j.id == id)
            .ok_or_else(|| DbError::NotFound(id.to_string()))
    }

    fn source(&self, id: Uuid) -> Result<&SourceDocument, DbError> {
        self.sources
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| DbError::NotFound(id.to_string()))
    }

    fn duplicate_of(&self, content_hash: &str, exclude: Uuid) -> Option<SourceDocument> {
        self.sources
            .iter()
            .filter(|s| s.id != exclude && s.content_hash.as_deref() == Some(content_hash))
            .min_by_key(|s| s.ingested_at)
            .cloned()
    }

    fn record(&self, item: &RiskItem, with_evidence: bool) -> RiskRecord {
        let statement = self.statements.get(&item.id).cloned();
        let evidence = if with_evidence {
            let cited = statement
                .as_ref()
                .map(|s| s.citation_snippet_ids.as_slice())
                .unwrap_or_default();
            self.snippets
                .iter()
                .filter(|s| {
                    s.risk_item_id == Some(item.id)
                        || (s.source_document_id == item.source_document_id
                            && cited.contains(&s.id))
                })
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        RiskRecord {
            item: item.clone(),
            statement,
            score: self.scores.get(&item.id).cloned(),
            emerging: self.signals.get(&item.id).cloned(),
            evidence,
        }
    }

    fn risk(&self, id: Uuid) -> Result<RiskRecord, DbError> {
        self.items
            .iter()
            .find(|i| i.id == id)
            .map(|item| self.record(item, true))
            .ok_or_else(|| DbError::NotFound(id.to_string()))
    }

    fn matches(&self, item: &RiskItem, filter: &RiskFilter) -> bool {
        let severity = self.scores.get(&item.id).map(|s| s.severity_band);
        let triggered = self.signals.get(&item.id).map(|signal| signal.triggered);

        filter.status.is_none_or(|s| s == item.status)
            && filter.severity.is_none_or(|band| severity == Some(band))
            && filter.emerging.is_none_or(|e| triggered == Some(e))
            && filter
                .category
                .as_deref()
                .is_none_or(|c| c == item.taxonomy_category)
    }
}

#[async_trait]
impl RiskStore for MemoryRiskStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, DbError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, staged }))
    }

    async fn get_job(&self, id: Uuid) -> Result<IngestionJob, DbError> {
        self.state.lock().await.job(id).cloned()
    }

    async fn list_jobs(&self) -> Result<Vec<IngestionJob>, DbError> {
        let state = self.state.lock().await;
        let mut jobs = state.jobs.clone();
        jobs.sort_by_key(|j| Reverse(j.created_at));
        jobs.truncate(MAX_LIST_ROWS as usize);
        Ok(jobs)
    }

    async fn get_source(&self, id: Uuid) -> Result<SourceDocument, DbError> {
        self.state.lock().await.source(id).cloned()
    }

    async fn find_duplicate_source(
        &self,
        content_hash: &str,
        exclude: Uuid,
    ) -> Result<Option<SourceDocument>, DbError> {
        Ok(self.state.lock().await.duplicate_of(content_hash, exclude))
    }

    async fn get_risk(&self, id: Uuid) -> Result<RiskRecord, DbError> {
        self.state.lock().await.risk(id)
    }

    async fn list_risks(&self, filter: &RiskFilter) -> Result<Vec<RiskRecord>, DbError> {
        let state = self.state.lock().await;
        let mut items: Vec<&RiskItem> = state
            .items
            .iter()
            .filter(|item| state.matches(item, filter))
            .collect();
        items.sort_by_key(|item| Reverse(item.created_at));

        Ok(items
            .into_iter()
            .take(MAX_LIST_ROWS as usize)
            .map(|item| state.record(item, false))
            .collect())
    }

    async fn dashboard_summary(&self) -> Result<DashboardSummary, DbError> {
        let state = self.state.lock().await;
        let count_status =
            |status: ApprovalStatus| state.items.iter().filter(|i| i.status == status).count() as i64;

        let mut severity_breakdown = DashboardSummary::empty_breakdown();
        for score in state.scores.values() {
            *severity_breakdown
                .entry(score.severity_band.as_str().to_string())
                .or_insert(0) += 1;
        }

        Ok(DashboardSummary {
            total_risks: state.items.len() as i64,
            draft_risks: count_status(ApprovalStatus::Draft),
            approved_risks: count_status(ApprovalStatus::Approved),
            rejected_risks: count_status(ApprovalStatus::Rejected),
            emerging_risks: state.signals.values().filter(|s| s.triggered).count() as i64,
            severity_breakdown,
        })
    }

    async fn audit_trail(&self, target_id: &str) -> Result<Vec<AuditEvent>, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .audit
            .iter()
            .filter(|e| e.target_id == target_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn insert_source(&mut self, source: &SourceDocument) -> Result<(), DbError> {
        self.staged.sources.push(source.clone());
        Ok(())
    }

    async fn update_source(&mut self, source: &SourceDocument) -> Result<(), DbError> {
        let existing = self
            .staged
            .sources
            .iter_mut()
            .find(|s| s.id == source.id)
            .ok_or_else(|| DbError::NotFound(source.id.to_string()))?;
        *existing = source.clone();
        Ok(())
    }

    async fn insert_job(&mut self, job: &IngestionJob) -> Result<(), DbError> {
        self.staged.jobs.push(job.clone());
        Ok(())
    }

    async fn update_job(&mut self, job: &IngestionJob) -> Result<(), DbError> {
        let existing = self
            .staged
            .jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| DbError::NotFound(job.id.to_string()))?;
        *existing = job.clone();
        Ok(())
    }

    async fn find_duplicate_source(
        &mut self,
        content_hash: &str,
        exclude: Uuid,
    ) -> Result<Option<SourceDocument>, DbError> {
        Ok(self.staged.duplicate_of(content_hash, exclude))
    }

    async fn insert_snippets(&mut self, snippets: &[EvidenceSnippet]) -> Result<(), DbError> {
        self.staged.snippets.extend_from_slice(snippets);
        Ok(())
    }

    async fn recent_source_texts(
        &mut self,
        since: DateTime<Utc>,
        exclude: Uuid,
    ) -> Result<Vec<(Uuid, String)>, DbError> {
        let state = &self.staged;
        Ok(state
            .sources
            .iter()
            .filter(|s| {
                s.id != exclude && s.status == ProcessingStatus::Completed && s.ingested_at >= since
            })
            .map(|s| {
                let text = state
                    .snippets
                    .iter()
                    .filter(|e| e.source_document_id == s.id)
                    .map(|e| e.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                (s.id, text)
            })
            .collect())
    }

    async fn mention_window(
        &mut self,
        name: &str,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<MentionRecord>, DbError> {
        let state = &self.staged;
        Ok(state
            .items
            .iter()
            .filter(|i| i.name == name && i.created_at >= since)
            .filter(|i| until.is_none_or(|u| i.created_at < u))
            .map(|i| MentionRecord {
                sectors: i.affected_sectors.clone(),
                threat_actor: i.threat_actor.clone(),
                taxonomy_category: i.taxonomy_category.clone(),
                publisher: state
                    .source(i.source_document_id)
                    .ok()
                    .and_then(|s| s.publisher.clone()),
            })
            .collect())
    }

    async fn insert_risk(&mut self, bundle: &RiskBundle) -> Result<(), DbError> {
        let item = &bundle.item;
        let state = &mut self.staged;

        state.items.push(item.clone());
        state
            .statements
            .insert(item.id, bundle.statement.clone());
        state.scores.insert(item.id, bundle.score.clone());
        state.signals.insert(item.id, bundle.emerging.clone());

        let cited = &bundle.statement.citation_snippet_ids;
        for snippet in state.snippets.iter_mut() {
            if snippet.source_document_id == item.source_document_id && cited.contains(&snippet.id)
            {
                snippet.risk_item_id = Some(item.id);
            }
        }
        Ok(())
    }

    async fn get_risk(&mut self, id: Uuid) -> Result<RiskRecord, DbError> {
        self.staged.risk(id)
    }

    async fn update_risk_status(
        &mut self,
        id: Uuid,
        status: ApprovalStatus,
    ) -> Result<(), DbError> {
        let item = self
            .staged
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| DbError::NotFound(id.to_string()))?;
        item.status = status;
        Ok(())
    }

    async fn update_statement(&mut self, statement: &RiskStatement) -> Result<(), DbError> {
        self.staged
            .statements
            .insert(statement.risk_item_id, statement.clone());
        Ok(())
    }

    async fn upsert_emerging(&mut self, signal: &EmergingSignal) -> Result<(), DbError> {
        self.staged
            .signals
            .insert(signal.risk_item_id, signal.clone());
        Ok(())
    }

    async fn insert_audit(&mut self, event: &AuditEvent) -> Result<(), DbError> {
        self.staged.audit.push(event.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let MemoryUnitOfWork { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SeverityBand, SourceKind};

    fn source(hash: Option<&str>) -> SourceDocument {
        SourceDocument {
            id: Uuid::new_v4(),
            kind: SourceKind::Url,
            title: "Report".to_string(),
            publisher: Some("intel.example".to_string()),
            published_at: None,
            ingested_at: Utc::now(),
            content_hash: hash.map(String::from),
            status: ProcessingStatus::Completed,
            origin: Some("https://intel.example/report".to_string()),
        }
    }

    fn bundle(source_id: Uuid, name: &str, band: SeverityBand, cited: Vec<Uuid>) -> RiskBundle {
        let id = Uuid::new_v4();
        RiskBundle {
            item: RiskItem {
                id,
                source_document_id: source_id,
                name: name.to_string(),
                taxonomy_category: "Extortion".to_string(),
                threat_actor: None,
                affected_sectors: vec!["Healthcare".to_string()],
                affected_assets: vec![],
                status: ApprovalStatus::Draft,
                extraction_confidence: 0.7,
                created_at: Utc::now(),
            },
            statement: RiskStatement {
                risk_item_id: id,
                business_impact: "impact".to_string(),
                why_care: "why".to_string(),
                time_horizon: "0-3 months".to_string(),
                recommended_actions: vec![],
                confidence: 0.7,
                approved_by: None,
                approved_at: None,
                citation_snippet_ids: cited,
            },
            score: RiskScore {
                risk_item_id: id,
                tef: 3,
                vulnerability: 3,
                primary_loss: 3,
                secondary_loss: 3,
                composite_score: 60.0,
                severity_band: band,
            },
            emerging: EmergingSignal {
                risk_item_id: id,
                trend_ratio: 1.0,
                novelty_score: 0.0,
                source_diversity: 1,
                triggered: false,
                trigger_reason: "not triggered".to_string(),
                evaluated_at: Utc::now(),
            },
        }
    }

    fn snippet(source_id: Uuid, reference: &str) -> EvidenceSnippet {
        EvidenceSnippet {
            id: Uuid::new_v4(),
            source_document_id: source_id,
            risk_item_id: None,
            text: "text".to_string(),
            reference: reference.to_string(),
            url: None,
            captured_at: Utc::now(),
            confidence: 0.9,
        }
    }

    #[tokio::test]
    async fn test_dropped_unit_of_work_rolls_back() {
        let store = MemoryRiskStore::new();
        let doc = source(None);

        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_source(&doc).await.unwrap();
        }

        assert!(matches!(
            store.get_source(doc.id).await,
            Err(DbError::NotFound(_))
        ));

        let mut uow = store.begin().await.unwrap();
        uow.insert_source(&doc).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.get_source(doc.id).await.unwrap().id, doc.id);
    }

    #[tokio::test]
    async fn test_duplicate_lookup_prefers_earliest_and_excludes_self() {
        let store = MemoryRiskStore::new();
        let mut first = source(Some("abc"));
        first.ingested_at = Utc::now() - chrono::Duration::hours(1);
        let second = source(Some("abc"));

        let mut uow = store.begin().await.unwrap();
        uow.insert_source(&second).await.unwrap();
        uow.insert_source(&first).await.unwrap();
        uow.commit().await.unwrap();

        let found = store.find_duplicate_source("abc", second.id).await.unwrap();
        assert_eq!(found.map(|s| s.id), Some(first.id));

        let found = store.find_duplicate_source("abc", first.id).await.unwrap();
        assert_eq!(found.map(|s| s.id), Some(second.id));

        assert!(store.find_duplicate_source("zzz", first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_risk_links_cited_snippets() {
        let store = MemoryRiskStore::new();
        let doc = source(None);
        let cited = snippet(doc.id, "dom:1");
        let uncited = snippet(doc.id, "dom:2");
        let risk = bundle(doc.id, "Ransomware", SeverityBand::High, vec![cited.id]);

        let mut uow = store.begin().await.unwrap();
        uow.insert_source(&doc).await.unwrap();
        uow.insert_snippets(&[cited.clone(), uncited]).await.unwrap();
        uow.insert_risk(&risk).await.unwrap();
        uow.commit().await.unwrap();

        let record = store.get_risk(risk.item.id).await.unwrap();
        assert_eq!(record.evidence.len(), 1);
        assert_eq!(record.evidence[0].id, cited.id);
        assert_eq!(record.score.unwrap().severity_band, SeverityBand::High);
    }

    #[tokio::test]
    async fn test_shared_snippet_resolves_for_every_citing_risk() {
        let store = MemoryRiskStore::new();
        let doc = source(None);
        let other_doc = source(None);
        let shared = snippet(doc.id, "dom:1");
        let foreign = snippet(other_doc.id, "dom:1");
        let first = bundle(doc.id, "Ransomware", SeverityBand::High, vec![shared.id]);
        let second = bundle(doc.id, "Extortion", SeverityBand::Low, vec![shared.id, foreign.id]);

        let mut uow = store.begin().await.unwrap();
        uow.insert_source(&doc).await.unwrap();
        uow.insert_source(&other_doc).await.unwrap();
        uow.insert_snippets(&[shared.clone(), foreign]).await.unwrap();
        uow.insert_risk(&first).await.unwrap();
        uow.insert_risk(&second).await.unwrap();
        uow.commit().await.unwrap();

        for id in [first.item.id, second.item.id] {
            let record = store.get_risk(id).await.unwrap();
            let ids: Vec<Uuid> = record.evidence.iter().map(|s| s.id).collect();
            assert_eq!(ids, vec![shared.id]);
        }
    }

    #[tokio::test]
    async fn test_recent_source_texts_skip_unfinished_and_excluded() {
        let store = MemoryRiskStore::new();
        let done = source(Some("a"));
        let mut running = source(Some("b"));
        running.status = ProcessingStatus::Processing;
        let mut old = source(Some("c"));
        old.ingested_at = Utc::now() - chrono::Duration::days(30);
        let mut first = snippet(done.id, "dom:1");
        first.text = "alpha".to_string();
        let mut second = snippet(done.id, "dom:2");
        second.text = "beta".to_string();

        let mut uow = store.begin().await.unwrap();
        for doc in [&done, &running, &old] {
            uow.insert_source(doc).await.unwrap();
        }
        uow.insert_snippets(&[first, second, snippet(running.id, "dom:1")])
            .await
            .unwrap();

        let since = Utc::now() - chrono::Duration::days(14);
        let texts = uow.recent_source_texts(since, Uuid::new_v4()).await.unwrap();
        assert_eq!(texts, vec![(done.id, "alpha\n\nbeta".to_string())]);
        assert!(uow.recent_source_texts(since, done.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_and_summary() {
        let store = MemoryRiskStore::new();
        let doc = source(None);
        let high = bundle(doc.id, "Ransomware", SeverityBand::High, vec![]);
        let mut low = bundle(doc.id, "Phishing", SeverityBand::Low, vec![]);
        low.emerging.triggered = true;

        let mut uow = store.begin().await.unwrap();
        uow.insert_source(&doc).await.unwrap();
        uow.insert_risk(&high).await.unwrap();
        uow.insert_risk(&low).await.unwrap();
        uow.update_risk_status(low.item.id, ApprovalStatus::Approved)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let filter = RiskFilter {
            severity: Some(SeverityBand::High),
            ..Default::default()
        };
        let risks = store.list_risks(&filter).await.unwrap();
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].item.id, high.item.id);

        let filter = RiskFilter {
            emerging: Some(true),
            status: Some(ApprovalStatus::Approved),
            ..Default::default()
        };
        let risks = store.list_risks(&filter).await.unwrap();
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].item.id, low.item.id);

        let summary = store.dashboard_summary().await.unwrap();
        assert_eq!(summary.total_risks, 2);
        assert_eq!(summary.draft_risks, 1);
        assert_eq!(summary.approved_risks, 1);
        assert_eq!(summary.emerging_risks, 1);
        assert_eq!(summary.severity_breakdown.len(), 4);
        assert_eq!(summary.severity_breakdown["High"], 1);
        assert_eq!(summary.severity_breakdown["Critical"], 0);
    }

    #[tokio::test]
    async fn test_mention_window_bounds() {
        let store = MemoryRiskStore::new();
        let doc = source(None);
        let mut old = bundle(doc.id, "Ransomware", SeverityBand::High, vec![]);
        old.item.created_at = Utc::now() - chrono::Duration::days(30);
        let recent = bundle(doc.id, "Ransomware", SeverityBand::High, vec![]);
        let other = bundle(doc.id, "Phishing", SeverityBand::Low, vec![]);

        let mut uow = store.begin().await.unwrap();
        uow.insert_source(&doc).await.unwrap();
        for b in [&old, &recent, &other] {
            uow.insert_risk(b).await.unwrap();
        }

        let cutoff = Utc::now() - chrono::Duration::days(14);
        let recent_window = uow.mention_window("Ransomware", cutoff, None).await.unwrap();
        assert_eq!(recent_window.len(), 1);
        assert_eq!(recent_window[0].publisher.as_deref(), Some("intel.example"));

        let baseline = uow
            .mention_window(
                "Ransomware",
                Utc::now() - chrono::Duration::days(70),
                Some(cutoff),
            )
            .await
            .unwrap();
        assert_eq!(baseline.len(), 1);
    }
}
