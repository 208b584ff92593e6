//! Links between discussions and book content: topic links, templates,
//! generated topics and recommendations.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    Extension,
};
use forum_core::domain::{
    CommentContentLink, ContentDiscussionRecommendation, ContentKind, ContentLink, NewTopicTemplate, Principal, Topic,
    TopicTemplate,
};
use serde::{Deserialize, Serialize};
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
pub struct CreateLinkRequest {
    pub topic_id: u64,
    /// `book`, `chapter`, `section`, `resource`, `project` or `report`.
    #[schema(value_type = String)]
    pub content_kind: ContentKind,
    pub content_id: u64,
    /// Highlighted links need a moderator.
    #[serde(default)]
    pub highlighted: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HighlightRequest {
    pub highlighted: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateRequest {
    pub name: String,
    #[schema(value_type = String)]
    pub content_kind: ContentKind,
    /// Placeholders: `{title}`, `{summary}`, `{kind}`, `{id}`, `{tags}`.
    pub title_template: String,
    pub body_template: String,
    #[serde(default = "active")]
    pub is_active: bool,
}

fn active() -> bool {
    true
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct TemplateParams {
    /// Only templates for this content kind.
    #[param(value_type = Option<String>)]
    pub kind: Option<ContentKind>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedTopicsResponse {
    /// Topics created by this call; templates already materialised are skipped.
    pub topic_ids: Vec<u64>,
}

//=========================================================================================
// Topic Links
//=========================================================================================

#[utoipa::path(
    post,
    path = "/content-links",
    tag = "content",
    request_body = CreateLinkRequest,
    responses(
        (status = 201, description = "Link created"),
        (status = 404, description = "Unknown topic or content", body = ApiErrorResponse),
        (status = 409, description = "Topic already linked to this content", body = ApiErrorResponse)
    )
)]
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiJson(body): ApiJson<CreateLinkRequest>,
) -> HttpResult<(StatusCode, Json<ContentLink>)> {
    let link = state
        .forum
        .content_links
        .link_topic(&principal, body.topic_id, body.content_kind, body.content_id, body.highlighted)
        .await?;
    Ok((StatusCode::CREATED, Json(link)))
}

#[utoipa::path(
    delete,
    path = "/content-links/{id}",
    tag = "content",
    params(("id" = u64, Path, description = "Link id")),
    responses((status = 204, description = "Link removed"))
)]
pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<StatusCode> {
    state.forum.content_links.unlink(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/content-links/{id}/highlight",
    tag = "content",
    params(("id" = u64, Path, description = "Link id")),
    request_body = HighlightRequest,
    responses((status = 200, description = "Link updated"), (status = 403, description = "Moderators only", body = ApiErrorResponse))
)]
pub async fn highlight_link(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<HighlightRequest>,
) -> HttpResult<Json<ContentLink>> {
    Ok(Json(
        state.forum.content_links.highlight(&principal, id, body.highlighted).await?,
    ))
}

/// Live topics linked to a piece of content, highlighted links first.
#[utoipa::path(
    get,
    path = "/content/{kind}/{id}/topics",
    tag = "content",
    params(("kind" = String, Path, description = "Content kind"), ("id" = u64, Path, description = "Content id")),
    responses((status = 200, description = "Linked topics"))
)]
pub async fn topics_for_content(
    State(state): State<Arc<AppState>>,
    ApiPath((kind, id)): ApiPath<(ContentKind, u64)>,
) -> HttpResult<Json<Vec<Topic>>> {
    Ok(Json(state.forum.content_links.topics_for_content(kind, id).await?))
}

#[utoipa::path(
    get,
    path = "/content/{kind}/{id}/citations",
    tag = "content",
    params(("kind" = String, Path, description = "Content kind"), ("id" = u64, Path, description = "Content id")),
    responses((status = 200, description = "Comments citing the content"))
)]
pub async fn citations_for_content(
    State(state): State<Arc<AppState>>,
    ApiPath((kind, id)): ApiPath<(ContentKind, u64)>,
) -> HttpResult<Json<Vec<CommentContentLink>>> {
    Ok(Json(state.forum.content_links.citations_for_content(kind, id).await?))
}

#[utoipa::path(
    get,
    path = "/topics/{id}/content",
    tag = "content",
    params(("id" = u64, Path, description = "Topic id")),
    responses((status = 200, description = "Content the topic is linked to"))
)]
pub async fn content_for_topic(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<Vec<ContentLink>>> {
    Ok(Json(state.forum.content_links.content_for_topic(id).await?))
}

//=========================================================================================
// Templates, Generation and Recommendations
//=========================================================================================

#[utoipa::path(
    get,
    path = "/topic-templates",
    tag = "content",
    params(TemplateParams),
    responses((status = 200, description = "Active templates"))
)]
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<TemplateParams>,
) -> HttpResult<Json<Vec<TopicTemplate>>> {
    Ok(Json(state.forum.content_links.list_templates(params.kind).await?))
}

#[utoipa::path(
    post,
    path = "/topic-templates",
    tag = "content",
    request_body = CreateTemplateRequest,
    responses((status = 201, description = "Template created"), (status = 403, description = "Moderators only", body = ApiErrorResponse))
)]
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiJson(body): ApiJson<CreateTemplateRequest>,
) -> HttpResult<(StatusCode, Json<TopicTemplate>)> {
    let template = NewTopicTemplate {
        name: body.name,
        content_kind: body.content_kind,
        title_template: body.title_template,
        body_template: body.body_template,
        is_active: body.is_active,
    };
    let created = state.forum.content_links.create_template(&principal, template).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Materialise every active template for the content. Idempotent.
#[utoipa::path(
    post,
    path = "/content/{kind}/{id}/generate-topics",
    tag = "content",
    params(("kind" = String, Path, description = "Content kind"), ("id" = u64, Path, description = "Content id")),
    responses(
        (status = 200, description = "Topics created by this call", body = GeneratedTopicsResponse),
        (status = 404, description = "Unknown content", body = ApiErrorResponse)
    )
)]
pub async fn generate_topics(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath((kind, id)): ApiPath<(ContentKind, u64)>,
) -> HttpResult<Json<GeneratedTopicsResponse>> {
    let topic_ids = state
        .forum
        .content_links
        .generate_topics_for_content(&principal, kind, id)
        .await?;
    Ok(Json(GeneratedTopicsResponse { topic_ids }))
}

/// Recompute and store the ranked topic recommendations for the content.
#[utoipa::path(
    post,
    path = "/content/{kind}/{id}/recommendations",
    tag = "content",
    params(("kind" = String, Path, description = "Content kind"), ("id" = u64, Path, description = "Content id")),
    responses((status = 200, description = "The new recommendations, best first"))
)]
pub async fn generate_recommendations(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath((kind, id)): ApiPath<(ContentKind, u64)>,
) -> HttpResult<Json<Vec<ContentDiscussionRecommendation>>> {
    Ok(Json(
        state
            .forum
            .content_links
            .generate_recommendations(&principal, kind, id)
            .await?,
    ))
}

#[utoipa::path(
    get,
    path = "/content/{kind}/{id}/recommendations",
    tag = "content",
    params(("kind" = String, Path, description = "Content kind"), ("id" = u64, Path, description = "Content id")),
    responses((status = 200, description = "Stored recommendations, best first"))
)]
pub async fn list_recommendations(
    State(state): State<Arc<AppState>>,
    ApiPath((kind, id)): ApiPath<(ContentKind, u64)>,
) -> HttpResult<Json<Vec<ContentDiscussionRecommendation>>> {
    Ok(Json(state.forum.content_links.recommendations(kind, id).await?))
}
