pub mod auth;
pub mod dashboard;
pub mod error;
pub mod health;
pub mod ingestion;
pub mod openapi;
pub mod risk;

use actix_web::web;

/// Register every route of the service
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(ingestion::configure)
        .configure(risk::configure)
        .configure(dashboard::configure)
        .configure(health::configure)
        .configure(openapi::configure);
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use actix_web::web;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::app::AppState;
    use crate::db::MemoryRiskStore;
    use crate::extractor::ExtractorDispatcher;
    use crate::model::{
        ApprovalStatus, Config, EmergingSignal, EvidenceSnippet, ProcessingStatus, RiskBundle,
        RiskItem, RiskScore, RiskStatement, SeverityBand, SourceDocument, SourceKind,
    };
    use crate::service::{CandidateGenerator, LocalArtifactStore};

    /// Synchronous ingestion over an in-process store
    pub async fn test_state() -> web::Data<AppState> {
        let config = Config::default();
        let extractor = Arc::new(ExtractorDispatcher::new(&config.extraction, None));
        let artifacts = Arc::new(LocalArtifactStore::new(
            std::env::temp_dir().join("risk-intel-api-tests"),
        ));

        web::Data::new(AppState::assemble(
            config,
            Arc::new(MemoryRiskStore::new()),
            extractor,
            CandidateGenerator::heuristic_only(),
            artifacts,
            None,
        ))
    }

    /// Store one draft risk with an untriggered signal; `cited` links one snippet
    pub async fn seed_risk(state: &AppState, cited: bool) -> Uuid {
        let now = Utc::now();
        let source = SourceDocument {
            id: Uuid::new_v4(),
            kind: SourceKind::Url,
            title: "Quarterly threat report".to_string(),
            publisher: Some("intel.example".to_string()),
            published_at: None,
            ingested_at: now,
            content_hash: Some(format!("{:x}", Uuid::new_v4().as_u128())),
            status: ProcessingStatus::Completed,
            origin: Some("https://intel.example/q3".to_string()),
        };
        let snippet = EvidenceSnippet {
            id: Uuid::new_v4(),
            source_document_id: source.id,
            risk_item_id: None,
            text: "Ransomware crews target hospital billing systems.".to_string(),
            reference: "dom:1".to_string(),
            url: source.origin.clone(),
            captured_at: now,
            confidence: 0.9,
        };

        let id = Uuid::new_v4();
        let bundle = RiskBundle {
            item: RiskItem {
                id,
                source_document_id: source.id,
                name: "Ransomware against billing".to_string(),
                taxonomy_category: "Extortion".to_string(),
                threat_actor: None,
                affected_sectors: vec!["Healthcare".to_string()],
                affected_assets: vec!["Billing".to_string()],
                status: ApprovalStatus::Draft,
                extraction_confidence: 0.7,
                created_at: now,
            },
            statement: RiskStatement {
                risk_item_id: id,
                business_impact: "Billing outage".to_string(),
                why_care: "Revenue loss".to_string(),
                time_horizon: "0-3 months".to_string(),
                recommended_actions: vec!["Segment billing hosts".to_string()],
                confidence: 0.7,
                approved_by: None,
                approved_at: None,
                citation_snippet_ids: if cited { vec![snippet.id] } else { Vec::new() },
            },
            score: RiskScore {
                risk_item_id: id,
                tef: 3,
                vulnerability: 3,
                primary_loss: 3,
                secondary_loss: 3,
                composite_score: 60.0,
                severity_band: SeverityBand::Moderate,
            },
            emerging: EmergingSignal {
                risk_item_id: id,
                trend_ratio: 1.0,
                novelty_score: 0.0,
                source_diversity: 1,
                triggered: false,
                trigger_reason: "below thresholds".to_string(),
                evaluated_at: now,
            },
        };

        let mut uow = state.store.begin().await.unwrap();
        uow.insert_source(&source).await.unwrap();
        uow.insert_snippets(std::slice::from_ref(&snippet)).await.unwrap();
        uow.insert_risk(&bundle).await.unwrap();
        uow.commit().await.unwrap();
        id
    }
}
