//! Source submission and ingestion job endpoints

use actix_web::{HttpResponse, get, post, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::auth::CallerContext;
use super::error::{ApiError, ErrorResponse};
use crate::app::AppState;
use crate::model::{IngestionJob, ProcessingStatus};
use crate::service::SourceMetadata;
use crate::service::storage::pdf_object_key;

const DEFAULT_PDF_FILENAME: &str = "upload.pdf";

#[derive(Debug, Deserialize, ToSchema)]
pub struct UrlIngestionRequest {
    /// http(s) page to ingest
    pub url: String,
    pub title: Option<String>,
    pub publisher: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Metadata for a raw PDF upload
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PdfUploadParams {
    /// Client file name, sanitised before storage
    pub filename: Option<String>,
    pub title: Option<String>,
    pub publisher: Option<String>,
    /// RFC 3339 timestamp
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IngestionCreateResponse {
    pub ingestion_id: Uuid,
    pub source_document_id: Uuid,
    pub status: ProcessingStatus,
}

impl From<IngestionJob> for IngestionCreateResponse {
    fn from(job: IngestionJob) -> Self {
        Self {
            ingestion_id: job.id,
            source_document_id: job.source_document_id,
            status: job.status,
        }
    }
}

/// Run the job inline or hand it to the dispatcher, per configuration
async fn dispatch(
    state: &AppState,
    job: IngestionJob,
    caller: &CallerContext,
) -> Result<IngestionJob, ApiError> {
    if state.config.ingestion_sync {
        return Ok(state.ingestion.process(job.id, &caller.username).await?);
    }

    state.dispatcher.submit(job.id).await?;
    Ok(job)
}

/// Store the upload and create its job; the file is removed again if the job cannot be created
async fn register_pdf(
    state: &AppState,
    filename: &str,
    bytes: &[u8],
    metadata: SourceMetadata,
    caller: &CallerContext,
) -> Result<IngestionJob, ApiError> {
    let locator = state
        .artifacts
        .save(&pdf_object_key(filename), bytes)
        .await?;

    match state
        .ingestion
        .create_pdf_ingestion(&locator, metadata, &caller.username)
        .await
    {
        Ok(job) => Ok(job),
        Err(e) => {
            if let Err(cleanup) = state.artifacts.remove(&locator).await {
                tracing::warn!(locator = %locator, error = %cleanup, "Failed to remove orphaned upload");
            }
            Err(e.into())
        }
    }
}

/// Submit a web page for ingestion
#[utoipa::path(
    post,
    path = "/v1/sources/url",
    request_body = UrlIngestionRequest,
    responses(
        (status = 200, description = "Ingestion created", body = IngestionCreateResponse),
        (status = 400, description = "Invalid URL", body = ErrorResponse),
        (status = 401, description = "Missing caller headers", body = ErrorResponse)
    ),
    tag = "ingestion"
)]
#[post("/v1/sources/url")]
pub async fn ingest_url(
    state: web::Data<AppState>,
    caller: CallerContext,
    body: web::Json<UrlIngestionRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();
    let metadata = SourceMetadata {
        title: request.title,
        publisher: request.publisher,
        published_at: request.published_at,
    };

    let job = state
        .ingestion
        .create_url_ingestion(&request.url, metadata, &caller.username)
        .await?;
    let job = dispatch(&state, job, &caller).await?;

    Ok(HttpResponse::Ok().json(IngestionCreateResponse::from(job)))
}

/// Upload a PDF report as the raw request body
#[utoipa::path(
    post,
    path = "/v1/sources/pdf",
    params(PdfUploadParams),
    request_body(content = Vec<u8>, content_type = "application/pdf"),
    responses(
        (status = 200, description = "Ingestion created", body = IngestionCreateResponse),
        (status = 400, description = "Empty upload", body = ErrorResponse),
        (status = 401, description = "Missing caller headers", body = ErrorResponse)
    ),
    tag = "ingestion"
)]
#[post("/v1/sources/pdf")]
pub async fn ingest_pdf(
    state: web::Data<AppState>,
    caller: CallerContext,
    query: web::Query<PdfUploadParams>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("PDF body must not be empty".to_string()));
    }

    let params = query.into_inner();
    let filename = params.filename.as_deref().unwrap_or(DEFAULT_PDF_FILENAME);
    let metadata = SourceMetadata {
        title: params.title,
        publisher: params.publisher,
        published_at: params.published_at,
    };
    let job = register_pdf(&state, filename, &body, metadata, &caller).await?;
    let job = dispatch(&state, job, &caller).await?;

    Ok(HttpResponse::Ok().json(IngestionCreateResponse::from(job)))
}

/// List ingestion jobs, newest first
#[utoipa::path(
    get,
    path = "/v1/ingestions",
    responses(
        (status = 200, description = "Ingestion jobs", body = Vec<IngestionJob>),
        (status = 401, description = "Missing caller headers", body = ErrorResponse)
    ),
    tag = "ingestion"
)]
#[get("/v1/ingestions")]
pub async fn list_ingestions(
    state: web::Data<AppState>,
    _caller: CallerContext,
) -> Result<HttpResponse, ApiError> {
    let jobs = state.ingestion.list_jobs().await?;
    Ok(HttpResponse::Ok().json(jobs))
}

#[utoipa::path(
    get,
    path = "/v1/ingestions/{id}",
    params(("id" = Uuid, Path, description = "Ingestion job ID")),
    responses(
        (status = 200, description = "Ingestion job", body = IngestionJob),
        (status = 404, description = "Job not found", body = ErrorResponse)
    ),
    tag = "ingestion"
)]
#[get("/v1/ingestions/{id}")]
pub async fn get_ingestion(
    state: web::Data<AppState>,
    _caller: CallerContext,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let job = state.ingestion.get_job(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(job))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(ingest_url)
        .service(ingest_pdf)
        .service(list_ingestions)
        .service(get_ingestion);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::{ROLE_HEADER, USER_HEADER};
    use crate::api::test_support::test_state;
    use crate::db::{DashboardSummary, DbError, RiskFilter, RiskStore, UnitOfWork};
    use crate::extractor::ExtractorDispatcher;
    use crate::model::{AuditEvent, Config, RiskRecord, SourceDocument};
    use crate::service::{CandidateGenerator, LocalArtifactStore};
    use actix_web::{App, test};
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Store that fails every call
    struct UnavailableStore;

    fn unavailable<T>() -> Result<T, DbError> {
        Err(DbError::Serialization("store unavailable".to_string()))
    }

    #[async_trait]
    impl RiskStore for UnavailableStore {
        async fn begin(&self) -> Result<Box<dyn UnitOfWork>, DbError> {
            unavailable()
        }

        async fn get_job(&self, _: Uuid) -> Result<IngestionJob, DbError> {
            unavailable()
        }

        async fn list_jobs(&self) -> Result<Vec<IngestionJob>, DbError> {
            unavailable()
        }

        async fn get_source(&self, _: Uuid) -> Result<SourceDocument, DbError> {
            unavailable()
        }

        async fn find_duplicate_source(
            &self,
            _: &str,
            _: Uuid,
        ) -> Result<Option<SourceDocument>, DbError> {
            unavailable()
        }

        async fn get_risk(&self, _: Uuid) -> Result<RiskRecord, DbError> {
            unavailable()
        }

        async fn list_risks(&self, _: &RiskFilter) -> Result<Vec<RiskRecord>, DbError> {
            unavailable()
        }

        async fn dashboard_summary(&self) -> Result<DashboardSummary, DbError> {
            unavailable()
        }

        async fn audit_trail(&self, _: &str) -> Result<Vec<AuditEvent>, DbError> {
            unavailable()
        }

        async fn ping(&self) -> Result<(), DbError> {
            unavailable()
        }
    }

    #[tokio::test]
    async fn test_url_ingestion_requires_caller() {
        let app = test::init_service(
            App::new()
                .app_data(test_state().await)
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/v1/sources/url")
            .set_json(serde_json::json!({ "url": "https://example.com/report" }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn test_invalid_url_is_bad_request() {
        let app = test::init_service(
            App::new()
                .app_data(test_state().await)
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/v1/sources/url")
            .insert_header((USER_HEADER, "alice"))
            .insert_header((ROLE_HEADER, "Analyst"))
            .set_json(serde_json::json!({ "url": "ftp://example.com/report" }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_empty_pdf_is_rejected_and_unknown_job_is_404() {
        let app = test::init_service(
            App::new()
                .app_data(test_state().await)
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/v1/sources/pdf?filename=report.pdf")
            .insert_header((USER_HEADER, "alice"))
            .insert_header((ROLE_HEADER, "Analyst"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = test::TestRequest::get()
            .uri(&format!("/v1/ingestions/{}", Uuid::new_v4()))
            .insert_header((USER_HEADER, "alice"))
            .insert_header((ROLE_HEADER, "Analyst"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);
    }

    #[tokio::test]
    async fn test_pdf_upload_is_removed_when_job_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let extractor = Arc::new(ExtractorDispatcher::new(&config.extraction, None));
        let state = web::Data::new(AppState::assemble(
            config,
            Arc::new(UnavailableStore),
            extractor,
            CandidateGenerator::heuristic_only(),
            Arc::new(LocalArtifactStore::new(dir.path())),
            None,
        ));
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/v1/sources/pdf?filename=report.pdf")
            .insert_header((USER_HEADER, "alice"))
            .insert_header((ROLE_HEADER, "Analyst"))
            .set_payload("%PDF-1.4")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 500);

        let stored = std::fs::read_dir(dir.path().join("pdf")).unwrap().count();
        assert_eq!(stored, 0);
    }
}
