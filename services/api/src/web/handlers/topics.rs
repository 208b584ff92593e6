//! Topic lifecycle: listing, create, read, edit, delete, pin, lock, views and tags.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    Extension,
};
use forum_core::domain::{Page, PageRequest, Principal, TextFormat, Topic, TopicQuery, TopicSort};
use forum_core::services::discussion::{CreateTopic, UpdateTopic};
use forum_core::ForumError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::web::error::{ApiErrorResponse, HttpError, HttpResult};
use crate::web::extract::{ApiJson, ApiPath, ApiQuery};
use crate::web::state::AppState;

//=========================================================================================
// Payloads
//=========================================================================================

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct TopicListParams {
    pub category: Option<u64>,
    /// Comma-separated tag ids; a topic must carry all of them.
    pub tag: Option<String>,
    pub author: Option<u64>,
    pub book: Option<u64>,
    pub chapter: Option<u64>,
    pub section: Option<u64>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    /// `activity` (default), `newest`, `oldest`, `mostViewed` or `mostCommented`.
    #[param(value_type = Option<String>)]
    pub sort: Option<TopicSort>,
    /// Moderators only; ignored for everyone else.
    #[serde(default)]
    pub include_deleted: bool,
    /// Moderators only; ignored for everyone else.
    #[serde(default)]
    pub include_unapproved: bool,
}

fn parse_tag_ids(raw: Option<&str>) -> Result<Vec<u64>, HttpError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| HttpError(ForumError::validation(format!("'{part}' is not a tag id"))))
        })
        .collect()
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopicRequest {
    pub category_id: u64,
    pub title: String,
    pub body: String,
    /// `markdown` (default), `html`, `plain` or `richText`.
    #[serde(default)]
    #[schema(value_type = String)]
    pub format: TextFormat,
    #[serde(default)]
    pub tag_ids: Vec<u64>,
    pub book_id: Option<u64>,
    pub chapter_id: Option<u64>,
    pub section_id: Option<u64>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTopicRequest {
    pub title: Option<String>,
    pub body: Option<String>,
    #[schema(value_type = Option<String>)]
    pub format: Option<TextFormat>,
    pub tag_ids: Option<Vec<u64>>,
    pub category_id: Option<u64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct DeleteParams {
    /// Report that prompted the deletion, recorded in its action log.
    pub report_id: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ViewCountResponse {
    pub topic_id: u64,
    pub view_count: u64,
}

//=========================================================================================
// Handlers
//=========================================================================================

#[utoipa::path(
    get,
    path = "/topics",
    tag = "topics",
    params(TopicListParams),
    responses(
        (status = 200, description = "A page of topics"),
        (status = 400, description = "Malformed filter", body = ApiErrorResponse)
    )
)]
pub async fn list_topics(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiQuery(params): ApiQuery<TopicListParams>,
) -> HttpResult<Json<Page<Topic>>> {
    let query = TopicQuery {
        category_id: params.category,
        tag_ids: parse_tag_ids(params.tag.as_deref())?,
        author_id: params.author,
        book_id: params.book,
        chapter_id: params.chapter,
        section_id: params.section,
        sort: params.sort.unwrap_or_default(),
        include_deleted: params.include_deleted,
        include_unapproved: params.include_unapproved,
    };
    let page = PageRequest::new(params.page, params.page_size);
    Ok(Json(state.forum.discussion.list_topics(&principal, query, page).await?))
}

/// Open a topic. Content held by the filter or the category's approval rule
/// is created unpublished and queued for review.
#[utoipa::path(
    post,
    path = "/topics",
    tag = "topics",
    request_body = CreateTopicRequest,
    responses(
        (status = 201, description = "Topic created"),
        (status = 400, description = "Invalid input or rejected content", body = ApiErrorResponse),
        (status = 403, description = "Posting not allowed here", body = ApiErrorResponse),
        (status = 429, description = "Hourly topic limit reached", body = ApiErrorResponse)
    )
)]
pub async fn create_topic(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiJson(body): ApiJson<CreateTopicRequest>,
) -> HttpResult<(StatusCode, Json<Topic>)> {
    let request = CreateTopic {
        category_id: body.category_id,
        title: body.title,
        body: body.body,
        format: body.format,
        tag_ids: body.tag_ids,
        book_id: body.book_id,
        chapter_id: body.chapter_id,
        section_id: body.section_id,
    };
    let topic = state.forum.discussion.create_topic(&principal, request).await?;
    Ok((StatusCode::CREATED, Json(topic)))
}

#[utoipa::path(
    get,
    path = "/topics/{id}",
    tag = "topics",
    params(("id" = u64, Path, description = "Topic id")),
    responses(
        (status = 200, description = "The topic"),
        (status = 404, description = "No such topic, or not visible", body = ApiErrorResponse)
    )
)]
pub async fn get_topic(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<Topic>> {
    Ok(Json(state.forum.discussion.get_topic(&principal, id).await?))
}

#[utoipa::path(
    patch,
    path = "/topics/{id}",
    tag = "topics",
    params(("id" = u64, Path, description = "Topic id")),
    request_body = UpdateTopicRequest,
    responses(
        (status = 200, description = "Topic updated"),
        (status = 403, description = "Not the author, or the edit window has passed", body = ApiErrorResponse),
        (status = 409, description = "Topic is locked", body = ApiErrorResponse)
    )
)]
pub async fn update_topic(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<UpdateTopicRequest>,
) -> HttpResult<Json<Topic>> {
    let request = UpdateTopic {
        title: body.title,
        body: body.body,
        format: body.format,
        tag_ids: body.tag_ids,
        category_id: body.category_id,
    };
    Ok(Json(state.forum.discussion.update_topic(&principal, id, request).await?))
}

#[utoipa::path(
    delete,
    path = "/topics/{id}",
    tag = "topics",
    params(("id" = u64, Path, description = "Topic id"), DeleteParams),
    responses(
        (status = 204, description = "Topic soft-deleted"),
        (status = 403, description = "Not allowed to delete this topic", body = ApiErrorResponse)
    )
)]
pub async fn delete_topic(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiQuery(params): ApiQuery<DeleteParams>,
) -> HttpResult<StatusCode> {
    state.forum.discussion.delete_topic(&principal, id, params.report_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_pinned(state: &AppState, principal: &Principal, id: u64, pinned: bool) -> HttpResult<Json<Topic>> {
    Ok(Json(state.forum.discussion.pin_topic(principal, id, pinned).await?))
}

async fn set_locked(state: &AppState, principal: &Principal, id: u64, locked: bool) -> HttpResult<Json<Topic>> {
    Ok(Json(state.forum.discussion.lock_topic(principal, id, locked).await?))
}

#[utoipa::path(
    post,
    path = "/topics/{id}/pin",
    tag = "topics",
    params(("id" = u64, Path, description = "Topic id")),
    responses((status = 200, description = "Topic pinned"), (status = 403, description = "Moderators only", body = ApiErrorResponse))
)]
pub async fn pin_topic(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<Topic>> {
    set_pinned(&state, &principal, id, true).await
}

#[utoipa::path(
    post,
    path = "/topics/{id}/unpin",
    tag = "topics",
    params(("id" = u64, Path, description = "Topic id")),
    responses((status = 200, description = "Topic unpinned"), (status = 403, description = "Moderators only", body = ApiErrorResponse))
)]
pub async fn unpin_topic(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<Topic>> {
    set_pinned(&state, &principal, id, false).await
}

#[utoipa::path(
    post,
    path = "/topics/{id}/lock",
    tag = "topics",
    params(("id" = u64, Path, description = "Topic id")),
    responses((status = 200, description = "Topic locked"), (status = 403, description = "Moderators only", body = ApiErrorResponse))
)]
pub async fn lock_topic(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<Topic>> {
    set_locked(&state, &principal, id, true).await
}

#[utoipa::path(
    post,
    path = "/topics/{id}/unlock",
    tag = "topics",
    params(("id" = u64, Path, description = "Topic id")),
    responses((status = 200, description = "Topic unlocked"), (status = 403, description = "Moderators only", body = ApiErrorResponse))
)]
pub async fn unlock_topic(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<Topic>> {
    set_locked(&state, &principal, id, false).await
}

/// Count a view. Repeat views inside the dedupe window are not counted.
#[utoipa::path(
    post,
    path = "/topics/{id}/views",
    tag = "topics",
    params(("id" = u64, Path, description = "Topic id")),
    responses((status = 200, description = "Resulting view count", body = ViewCountResponse))
)]
pub async fn record_view(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<ViewCountResponse>> {
    let view_count = state.forum.discussion.record_view(&principal, id).await?;
    Ok(Json(ViewCountResponse { topic_id: id, view_count }))
}

#[utoipa::path(
    post,
    path = "/topics/{id}/tags/{tagId}",
    tag = "topics",
    params(("id" = u64, Path, description = "Topic id"), ("tagId" = u64, Path, description = "Tag id")),
    responses((status = 204, description = "Tag attached"))
)]
pub async fn attach_tag(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath((id, tag_id)): ApiPath<(u64, u64)>,
) -> HttpResult<StatusCode> {
    state.forum.discussion.attach_tag(&principal, id, tag_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/topics/{id}/tags/{tagId}",
    tag = "topics",
    params(("id" = u64, Path, description = "Topic id"), ("tagId" = u64, Path, description = "Tag id")),
    responses((status = 204, description = "Tag detached"))
)]
pub async fn detach_tag(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath((id, tag_id)): ApiPath<(u64, u64)>,
) -> HttpResult<StatusCode> {
    state.forum.discussion.detach_tag(&principal, id, tag_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_filter_accepts_a_comma_separated_list() {
        assert_eq!(parse_tag_ids(Some("3, 5,,8")).unwrap(), vec![3, 5, 8]);
        assert!(parse_tag_ids(None).unwrap().is_empty());
        assert!(parse_tag_ids(Some("3,x")).is_err());
    }
}
