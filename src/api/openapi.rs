//! OpenAPI specification endpoints

use actix_web::{HttpResponse, Responder, get};
use utoipa::OpenApi;

use super::{dashboard, error, health, ingestion, risk};
use crate::db::DashboardSummary;
use crate::model::{
    ApprovalStatus, AuditEvent, EmergingSignal, EvidenceSnippet, IngestionJob, ProcessingStatus,
    RiskItem, RiskRecord, RiskScore, RiskStatement, SeverityBand,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Threat Risk Intelligence API",
        description = "Ingest threat reports and review the risks derived from them"
    ),
    paths(
        ingestion::ingest_url,
        ingestion::ingest_pdf,
        ingestion::list_ingestions,
        ingestion::get_ingestion,
        risk::list_risks,
        risk::get_risk,
        risk::risk_audit,
        risk::approve_risk,
        risk::reject_risk,
        risk::override_emerging,
        dashboard::summary,
        dashboard::emerging,
        health::liveness,
        health::readiness,
    ),
    components(schemas(
        error::ErrorResponse,
        ingestion::UrlIngestionRequest,
        ingestion::IngestionCreateResponse,
        risk::EmergingOverrideRequest,
        health::HealthStatus,
        health::ReadinessStatus,
        health::DependencyHealth,
        DashboardSummary,
        IngestionJob,
        ProcessingStatus,
        ApprovalStatus,
        SeverityBand,
        RiskRecord,
        RiskItem,
        RiskStatement,
        RiskScore,
        EmergingSignal,
        EvidenceSnippet,
        AuditEvent,
    )),
    tags(
        (name = "ingestion", description = "Source submission and ingestion jobs"),
        (name = "risks", description = "Risk listing and review"),
        (name = "dashboard", description = "Aggregate risk views"),
        (name = "health", description = "Probes"),
    )
)]
pub struct ApiDoc;

/// Serve OpenAPI JSON specification
#[get("/openapi.json")]
pub async fn openapi_json() -> impl Responder {
    HttpResponse::Ok().json(ApiDoc::openapi())
}

/// Serve OpenAPI YAML specification
#[get("/openapi.yaml")]
pub async fn openapi_yaml() -> impl Responder {
    match ApiDoc::openapi().to_yaml() {
        Ok(yaml) => HttpResponse::Ok().content_type("text/yaml").body(yaml),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render OpenAPI YAML");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Configure OpenAPI routes
pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.service(openapi_json).service(openapi_yaml);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/v1/sources/url",
            "/v1/sources/pdf",
            "/v1/ingestions",
            "/v1/ingestions/{id}",
            "/v1/risks",
            "/v1/risks/{id}",
            "/v1/risks/{id}/audit",
            "/v1/risks/{id}/approve",
            "/v1/risks/{id}/reject",
            "/v1/risks/{id}/override-emerging",
            "/v1/dashboard/summary",
            "/v1/dashboard/emerging",
            "/health/live",
            "/health/ready",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
