use actix_web::{HttpResponse, get, web};

use super::auth::CallerContext;
use super::error::{ApiError, ErrorResponse};
use crate::app::AppState;
use crate::db::DashboardSummary;
use crate::model::RiskRecord;

/// Risk counts per approval status and severity band
#[utoipa::path(
    get,
    path = "/v1/dashboard/summary",
    responses(
        (status = 200, description = "Dashboard counts", body = DashboardSummary),
        (status = 401, description = "Missing caller headers", body = ErrorResponse)
    ),
    tag = "dashboard"
)]
#[get("/v1/dashboard/summary")]
pub async fn summary(
    state: web::Data<AppState>,
    _caller: CallerContext,
) -> Result<HttpResponse, ApiError> {
    let summary = state.risks.dashboard_summary().await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// Triggered emerging risks, most novel first
#[utoipa::path(
    get,
    path = "/v1/dashboard/emerging",
    responses(
        (status = 200, description = "Emerging risks", body = Vec<RiskRecord>),
        (status = 401, description = "Missing caller headers", body = ErrorResponse)
    ),
    tag = "dashboard"
)]
#[get("/v1/dashboard/emerging")]
pub async fn emerging(
    state: web::Data<AppState>,
    _caller: CallerContext,
) -> Result<HttpResponse, ApiError> {
    let risks = state.risks.emerging_risks().await?;
    Ok(HttpResponse::Ok().json(risks))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(summary).service(emerging);
}

#[cfg(test)]
mod tests {
    use super::{DashboardSummary, RiskRecord, configure};
    use crate::api::auth::{ROLE_HEADER, USER_HEADER};
    use crate::api::test_support::{seed_risk, test_state};
    use actix_web::{App, test};

    #[tokio::test]
    async fn test_summary_counts_seeded_risk() {
        let state = test_state().await;
        seed_risk(&state, true).await;
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri("/v1/dashboard/summary")
            .insert_header((USER_HEADER, "alice"))
            .insert_header((ROLE_HEADER, "Analyst"))
            .to_request();
        let summary: DashboardSummary = test::call_and_read_body_json(&app, req).await;

        assert_eq!(summary.total_risks, 1);
        assert_eq!(summary.draft_risks, 1);
        assert_eq!(summary.emerging_risks, 0);
        assert_eq!(summary.severity_breakdown.len(), 4);
        assert_eq!(summary.severity_breakdown["Moderate"], 1);
    }

    #[tokio::test]
    async fn test_emerging_list_excludes_untriggered() {
        let state = test_state().await;
        seed_risk(&state, true).await;
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri("/v1/dashboard/emerging")
            .insert_header((USER_HEADER, "alice"))
            .insert_header((ROLE_HEADER, "Analyst"))
            .to_request();
        let risks: Vec<RiskRecord> = test::call_and_read_body_json(&app, req).await;

        assert!(risks.is_empty());
    }
}
