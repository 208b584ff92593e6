//! The tag catalogue.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    Extension,
};
use forum_core::domain::{NewTag, Principal, Tag, TagPatch};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::web::error::{ApiErrorResponse, HttpResult};
use crate::web::extract::{ApiJson, ApiPath};
use crate::web::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTagRequest {
    pub name: String,
    pub slug: String,
    /// `#rrggbb`.
    pub color: String,
    /// System tags can only be changed by administrators.
    #[serde(default)]
    pub is_system: bool,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTagRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub color: Option<String>,
}

#[utoipa::path(get, path = "/tags", tag = "tags", responses((status = 200, description = "Every tag, by name")))]
pub async fn list_tags(State(state): State<Arc<AppState>>) -> HttpResult<Json<Vec<Tag>>> {
    Ok(Json(state.forum.discussion.list_tags().await?))
}

#[utoipa::path(
    post,
    path = "/tags",
    tag = "tags",
    request_body = CreateTagRequest,
    responses(
        (status = 201, description = "Tag created"),
        (status = 409, description = "Slug already taken", body = ApiErrorResponse)
    )
)]
pub async fn create_tag(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiJson(body): ApiJson<CreateTagRequest>,
) -> HttpResult<(StatusCode, Json<Tag>)> {
    let tag = NewTag {
        name: body.name,
        slug: body.slug,
        color: body.color,
        is_system: body.is_system,
    };
    let created = state.forum.discussion.create_tag(&principal, tag).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    patch,
    path = "/tags/{id}",
    tag = "tags",
    params(("id" = u64, Path, description = "Tag id")),
    request_body = UpdateTagRequest,
    responses((status = 200, description = "Tag updated"))
)]
pub async fn update_tag(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<UpdateTagRequest>,
) -> HttpResult<Json<Tag>> {
    let patch = TagPatch {
        name: body.name,
        slug: body.slug,
        color: body.color,
    };
    Ok(Json(state.forum.discussion.update_tag(&principal, id, patch).await?))
}

#[utoipa::path(
    delete,
    path = "/tags/{id}",
    tag = "tags",
    params(("id" = u64, Path, description = "Tag id")),
    responses((status = 204, description = "Tag deleted and detached from every topic"))
)]
pub async fn delete_tag(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<StatusCode> {
    state.forum.discussion.delete_tag(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
