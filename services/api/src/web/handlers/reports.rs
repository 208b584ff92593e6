//! Content reports: filing, triage, evidence, discussion and resolution.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    Extension,
};
use forum_core::domain::{
    ContentReport, EvidenceKind, Page, PageRequest, Principal, ReportActionLog, ReportCategory, ReportComment,
    ReportEvidence, ReportQuery, ReportStats, ReportStatus, ResolutionType, TargetKind, TargetRef,
};
use forum_core::services::reports::{CreateReport, ResolveReport};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::web::error::{ApiErrorResponse, HttpResult};
use crate::web::extract::{ApiJson, ApiPath, ApiQuery};
use crate::web::state::AppState;

//=========================================================================================
// Payloads
//=========================================================================================

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateReportRequest {
    #[schema(value_type = String)]
    pub target_kind: TargetKind,
    pub target_id: u64,
    /// e.g. `spam`, `harassment`, `copyright` or `other`.
    #[schema(value_type = String)]
    pub category: ReportCategory,
    pub reason: String,
    #[serde(default)]
    pub additional_info: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ReportListParams {
    #[param(value_type = Option<String>)]
    pub status: Option<ReportStatus>,
    #[param(value_type = Option<String>)]
    pub category: Option<ReportCategory>,
    pub assigned_to: Option<u64>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignReportRequest {
    /// Defaults to the caller.
    pub assignee: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolveReportRequest {
    /// `noAction`, `warning`, `contentRemoved`, `contentEdited`, `userSuspended` or `userBanned`.
    #[schema(value_type = String)]
    pub resolution: ResolutionType,
    #[serde(default)]
    pub notes: String,
    /// Replacement body, required for `contentEdited`.
    pub edited_body: Option<String>,
    /// Suspension length (default 72h); a ban without it is permanent.
    pub duration_hours: Option<u32>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RejectReportRequest {
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceRequest {
    /// `url`, `screenshot` or `text`.
    #[schema(value_type = String)]
    pub kind: EvidenceKind,
    pub content: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportCommentRequest {
    pub body: String,
    /// Internal comments are only shown to moderators.
    #[serde(default)]
    pub is_internal: bool,
}

//=========================================================================================
// Handlers
//=========================================================================================

#[utoipa::path(
    post,
    path = "/reports",
    tag = "reports",
    request_body = CreateReportRequest,
    responses(
        (status = 201, description = "Report filed"),
        (status = 409, description = "An open report on this target already exists", body = ApiErrorResponse),
        (status = 429, description = "Too many reports", body = ApiErrorResponse)
    )
)]
pub async fn create_report(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiJson(body): ApiJson<CreateReportRequest>,
) -> HttpResult<(StatusCode, Json<ContentReport>)> {
    let request = CreateReport {
        target: TargetRef {
            kind: body.target_kind,
            id: body.target_id,
        },
        category: body.category,
        reason: body.reason,
        additional_info: body.additional_info,
    };
    let report = state.forum.reports.create(&principal, request).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// Moderators see every report; members only the ones they filed.
#[utoipa::path(
    get,
    path = "/reports",
    tag = "reports",
    params(ReportListParams),
    responses((status = 200, description = "A page of reports, newest first"))
)]
pub async fn list_reports(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiQuery(params): ApiQuery<ReportListParams>,
) -> HttpResult<Json<Page<ContentReport>>> {
    let query = ReportQuery {
        status: params.status,
        category: params.category,
        assigned_to: params.assigned_to,
        reporter_id: None,
    };
    let page = PageRequest::new(params.page, params.page_size);
    Ok(Json(state.forum.reports.list(&principal, query, page).await?))
}

#[utoipa::path(
    get,
    path = "/reports/stats",
    tag = "reports",
    responses((status = 200, description = "Report counts by status and category"))
)]
pub async fn report_stats(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> HttpResult<Json<ReportStats>> {
    Ok(Json(state.forum.reports.stats(&principal).await?))
}

#[utoipa::path(
    get,
    path = "/reports/{id}",
    tag = "reports",
    params(("id" = u64, Path, description = "Report id")),
    responses((status = 200, description = "The report"), (status = 404, description = "No such report", body = ApiErrorResponse))
)]
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<ContentReport>> {
    Ok(Json(state.forum.reports.get(&principal, id).await?))
}

#[utoipa::path(
    post,
    path = "/reports/{id}/assign",
    tag = "reports",
    params(("id" = u64, Path, description = "Report id")),
    request_body = AssignReportRequest,
    responses(
        (status = 200, description = "Report is in review"),
        (status = 409, description = "Report changed concurrently", body = ApiErrorResponse)
    )
)]
pub async fn assign_report(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<AssignReportRequest>,
) -> HttpResult<Json<ContentReport>> {
    let assignee = body.assignee.unwrap_or(principal.user_id);
    Ok(Json(state.forum.reports.assign(&principal, id, assignee).await?))
}

#[utoipa::path(
    post,
    path = "/reports/{id}/resolve",
    tag = "reports",
    params(("id" = u64, Path, description = "Report id")),
    request_body = ResolveReportRequest,
    responses(
        (status = 200, description = "Report resolved and its resolution applied"),
        (status = 400, description = "Report is not open, or the resolution is incomplete", body = ApiErrorResponse)
    )
)]
pub async fn resolve_report(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<ResolveReportRequest>,
) -> HttpResult<Json<ContentReport>> {
    let request = ResolveReport {
        resolution: body.resolution,
        notes: body.notes,
        edited_body: body.edited_body,
        duration_hours: body.duration_hours,
    };
    Ok(Json(state.forum.reports.resolve(&principal, id, request).await?))
}

#[utoipa::path(
    post,
    path = "/reports/{id}/reject",
    tag = "reports",
    params(("id" = u64, Path, description = "Report id")),
    request_body = RejectReportRequest,
    responses((status = 200, description = "Report closed without action"))
)]
pub async fn reject_report(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<RejectReportRequest>,
) -> HttpResult<Json<ContentReport>> {
    Ok(Json(state.forum.reports.reject(&principal, id, body.notes).await?))
}

#[utoipa::path(
    post,
    path = "/reports/{id}/evidence",
    tag = "reports",
    params(("id" = u64, Path, description = "Report id")),
    request_body = EvidenceRequest,
    responses((status = 201, description = "Evidence attached"))
)]
pub async fn add_evidence(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<EvidenceRequest>,
) -> HttpResult<(StatusCode, Json<ReportEvidence>)> {
    let evidence = state
        .forum
        .reports
        .add_evidence(&principal, id, body.kind, body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(evidence)))
}

#[utoipa::path(
    get,
    path = "/reports/{id}/evidence",
    tag = "reports",
    params(("id" = u64, Path, description = "Report id")),
    responses((status = 200, description = "Evidence attached to the report"))
)]
pub async fn list_evidence(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<Vec<ReportEvidence>>> {
    Ok(Json(state.forum.reports.list_evidence(&principal, id).await?))
}

#[utoipa::path(
    post,
    path = "/reports/{id}/comments",
    tag = "reports",
    params(("id" = u64, Path, description = "Report id")),
    request_body = ReportCommentRequest,
    responses((status = 201, description = "Comment added"))
)]
pub async fn add_report_comment(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<ReportCommentRequest>,
) -> HttpResult<(StatusCode, Json<ReportComment>)> {
    let comment = state
        .forum
        .reports
        .add_comment(&principal, id, body.body, body.is_internal)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

#[utoipa::path(
    get,
    path = "/reports/{id}/comments",
    tag = "reports",
    params(("id" = u64, Path, description = "Report id")),
    responses((status = 200, description = "Comments visible to the caller"))
)]
pub async fn list_report_comments(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<Vec<ReportComment>>> {
    Ok(Json(state.forum.reports.list_comments(&principal, id).await?))
}

#[utoipa::path(
    get,
    path = "/reports/{id}/log",
    tag = "reports",
    params(("id" = u64, Path, description = "Report id")),
    responses((status = 200, description = "Every action taken on the report, oldest first"))
)]
pub async fn report_log(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<Vec<ReportActionLog>>> {
    Ok(Json(state.forum.reports.log(&principal, id).await?))
}
