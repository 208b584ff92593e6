//! Comments, threaded replies and their citations of book content.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    Extension,
};
use forum_core::domain::{Comment, CommentContentLink, ContentKind, Page, Principal, TextFormat};
use forum_core::services::discussion::{CreateComment, EditComment};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

use crate::web::error::{ApiErrorResponse, HttpResult};
use crate::web::extract::{ApiJson, ApiPath, ApiQuery, PageParams};
use crate::web::handlers::topics::DeleteParams;
use crate::web::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub body: String,
    #[serde(default)]
    #[schema(value_type = String)]
    pub format: TextFormat,
    /// Makes the comment a reply to another comment of the same topic.
    pub parent_comment_id: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EditCommentRequest {
    pub body: String,
    #[serde(default)]
    #[schema(value_type = String)]
    pub format: TextFormat,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CitationRequest {
    #[schema(value_type = String)]
    pub content_kind: ContentKind,
    pub content_id: u64,
    pub citation_text: String,
    #[serde(default)]
    pub citation_context: String,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Comments of a topic, oldest first.
#[utoipa::path(
    get,
    path = "/topics/{id}/comments",
    tag = "comments",
    params(("id" = u64, Path, description = "Topic id"), PageParams),
    responses((status = 200, description = "A page of comments"))
)]
pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(topic_id): ApiPath<u64>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> HttpResult<Json<Page<Comment>>> {
    let page = state
        .forum
        .discussion
        .list_comments(&principal, topic_id, params.request())
        .await?;
    Ok(Json(page))
}

#[utoipa::path(
    post,
    path = "/topics/{id}/comments",
    tag = "comments",
    params(("id" = u64, Path, description = "Topic id")),
    request_body = CreateCommentRequest,
    responses(
        (status = 201, description = "Comment created"),
        (status = 400, description = "Invalid input or rejected content", body = ApiErrorResponse),
        (status = 409, description = "Topic is locked", body = ApiErrorResponse),
        (status = 429, description = "Hourly comment limit reached", body = ApiErrorResponse)
    )
)]
pub async fn create_comment(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(topic_id): ApiPath<u64>,
    ApiJson(body): ApiJson<CreateCommentRequest>,
) -> HttpResult<(StatusCode, Json<Comment>)> {
    let request = CreateComment {
        body: body.body,
        format: body.format,
        parent_comment_id: body.parent_comment_id,
    };
    let comment = state.forum.discussion.create_comment(&principal, topic_id, request).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

#[utoipa::path(
    get,
    path = "/comments/{id}",
    tag = "comments",
    params(("id" = u64, Path, description = "Comment id")),
    responses((status = 200, description = "The comment"), (status = 404, description = "No such comment", body = ApiErrorResponse))
)]
pub async fn get_comment(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<Comment>> {
    Ok(Json(state.forum.discussion.get_comment(&principal, id).await?))
}

#[utoipa::path(
    patch,
    path = "/comments/{id}",
    tag = "comments",
    params(("id" = u64, Path, description = "Comment id")),
    request_body = EditCommentRequest,
    responses(
        (status = 200, description = "Comment edited"),
        (status = 403, description = "Not the author, or the edit window has passed", body = ApiErrorResponse)
    )
)]
pub async fn edit_comment(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<EditCommentRequest>,
) -> HttpResult<Json<Comment>> {
    let request = EditComment {
        body: body.body,
        format: body.format,
    };
    Ok(Json(state.forum.discussion.edit_comment(&principal, id, request).await?))
}

#[utoipa::path(
    delete,
    path = "/comments/{id}",
    tag = "comments",
    params(("id" = u64, Path, description = "Comment id"), DeleteParams),
    responses(
        (status = 204, description = "Comment soft-deleted, with its replies under the cascade policy"),
        (status = 403, description = "Not allowed to delete this comment", body = ApiErrorResponse)
    )
)]
pub async fn delete_comment(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiQuery(params): ApiQuery<DeleteParams>,
) -> HttpResult<StatusCode> {
    let deleted_ids = state.forum.discussion.delete_comment(&principal, id, params.report_id).await?;
    debug!(comment_id = id, ?deleted_ids, "Comment deleted over HTTP");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/comments/{id}/citations",
    tag = "comments",
    params(("id" = u64, Path, description = "Comment id")),
    request_body = CitationRequest,
    responses(
        (status = 201, description = "Citation recorded"),
        (status = 404, description = "Unknown comment or content", body = ApiErrorResponse)
    )
)]
pub async fn create_citation(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<CitationRequest>,
) -> HttpResult<(StatusCode, Json<CommentContentLink>)> {
    let citation = state
        .forum
        .content_links
        .cite(
            &principal,
            id,
            body.content_kind,
            body.content_id,
            body.citation_text,
            body.citation_context,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(citation)))
}

#[utoipa::path(
    get,
    path = "/comments/{id}/citations",
    tag = "comments",
    params(("id" = u64, Path, description = "Comment id")),
    responses((status = 200, description = "Citations made by the comment"))
)]
pub async fn list_citations(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<Vec<CommentContentLink>>> {
    Ok(Json(state.forum.content_links.citations_for_comment(id).await?))
}

#[utoipa::path(
    delete,
    path = "/citations/{id}",
    tag = "comments",
    params(("id" = u64, Path, description = "Citation id")),
    responses((status = 204, description = "Citation removed"))
)]
pub async fn delete_citation(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<StatusCode> {
    state.forum.content_links.remove_citation(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
