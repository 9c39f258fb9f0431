//! Risk listing and review endpoints

use actix_web::{HttpResponse, get, post, web};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::auth::{CallerContext, ReviewerContext};
use super::error::{ApiError, ErrorResponse};
use crate::app::AppState;
use crate::db::RiskFilter;
use crate::model::{AuditEvent, RiskRecord};

#[derive(Debug, Deserialize, ToSchema)]
pub struct EmergingOverrideRequest {
    pub triggered: bool,
    /// 5 to 1000 characters after trimming
    pub reason: String,
}

/// List risks, newest first
#[utoipa::path(
    get,
    path = "/v1/risks",
    params(RiskFilter),
    responses(
        (status = 200, description = "Matching risks", body = Vec<RiskRecord>),
        (status = 401, description = "Missing caller headers", body = ErrorResponse)
    ),
    tag = "risks"
)]
#[get("/v1/risks")]
pub async fn list_risks(
    state: web::Data<AppState>,
    _caller: CallerContext,
    query: web::Query<RiskFilter>,
) -> Result<HttpResponse, ApiError> {
    let risks = state.risks.list_risks(&query).await?;
    Ok(HttpResponse::Ok().json(risks))
}

/// Get one risk with its statement, score, signal and evidence
#[utoipa::path(
    get,
    path = "/v1/risks/{id}",
    params(("id" = Uuid, Path, description = "Risk item ID")),
    responses(
        (status = 200, description = "Risk found", body = RiskRecord),
        (status = 404, description = "Risk not found", body = ErrorResponse)
    ),
    tag = "risks"
)]
#[get("/v1/risks/{id}")]
pub async fn get_risk(
    state: web::Data<AppState>,
    _caller: CallerContext,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let risk = state.risks.get_risk(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(risk))
}

#[utoipa::path(
    get,
    path = "/v1/risks/{id}/audit",
    params(("id" = Uuid, Path, description = "Risk item ID")),
    responses(
        (status = 200, description = "Review history", body = Vec<AuditEvent>),
        (status = 404, description = "Risk not found", body = ErrorResponse)
    ),
    tag = "risks"
)]
#[get("/v1/risks/{id}/audit")]
pub async fn risk_audit(
    state: web::Data<AppState>,
    _caller: CallerContext,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let events = state.risks.audit_trail(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(events))
}

/// Approve a draft risk; blocked unless every citation resolves
#[utoipa::path(
    post,
    path = "/v1/risks/{id}/approve",
    params(("id" = Uuid, Path, description = "Risk item ID")),
    responses(
        (status = 200, description = "Risk approved", body = RiskRecord),
        (status = 400, description = "Citation gate failed", body = ErrorResponse),
        (status = 403, description = "Reviewer role required", body = ErrorResponse),
        (status = 404, description = "Risk not found", body = ErrorResponse)
    ),
    tag = "risks"
)]
#[post("/v1/risks/{id}/approve")]
pub async fn approve_risk(
    state: web::Data<AppState>,
    ReviewerContext(reviewer): ReviewerContext,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let risk = state
        .risks
        .approve(path.into_inner(), &reviewer.username)
        .await?;
    Ok(HttpResponse::Ok().json(risk))
}

#[utoipa::path(
    post,
    path = "/v1/risks/{id}/reject",
    params(("id" = Uuid, Path, description = "Risk item ID")),
    responses(
        (status = 200, description = "Risk rejected", body = RiskRecord),
        (status = 403, description = "Reviewer role required", body = ErrorResponse),
        (status = 404, description = "Risk not found", body = ErrorResponse)
    ),
    tag = "risks"
)]
#[post("/v1/risks/{id}/reject")]
pub async fn reject_risk(
    state: web::Data<AppState>,
    ReviewerContext(reviewer): ReviewerContext,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let risk = state
        .risks
        .reject(path.into_inner(), &reviewer.username)
        .await?;
    Ok(HttpResponse::Ok().json(risk))
}

/// Force the emerging flag with a recorded reason
#[utoipa::path(
    post,
    path = "/v1/risks/{id}/override-emerging",
    params(("id" = Uuid, Path, description = "Risk item ID")),
    request_body = EmergingOverrideRequest,
    responses(
        (status = 200, description = "Signal overridden", body = RiskRecord),
        (status = 400, description = "Invalid reason", body = ErrorResponse),
        (status = 403, description = "Reviewer role required", body = ErrorResponse),
        (status = 404, description = "Risk not found", body = ErrorResponse)
    ),
    tag = "risks"
)]
#[post("/v1/risks/{id}/override-emerging")]
pub async fn override_emerging(
    state: web::Data<AppState>,
    ReviewerContext(reviewer): ReviewerContext,
    path: web::Path<Uuid>,
    body: web::Json<EmergingOverrideRequest>,
) -> Result<HttpResponse, ApiError> {
    let risk = state
        .risks
        .override_emerging(
            path.into_inner(),
            body.triggered,
            &body.reason,
            &reviewer.username,
        )
        .await?;
    Ok(HttpResponse::Ok().json(risk))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_risks)
        .service(get_risk)
        .service(risk_audit)
        .service(approve_risk)
        .service(reject_risk)
        .service(override_emerging);
}
