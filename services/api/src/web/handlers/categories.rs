//! Category tree, per-category configuration and category moderators.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    Extension,
};
use forum_core::domain::{
    Category, CategoryConfig, CategoryModerator, CategoryPatch, DeletionPolicy, NewCategory, Principal, TrustLevel,
};
use forum_core::services::discussion::CategoryConfigInput;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::web::error::{ApiErrorResponse, HttpResult};
use crate::web::extract::{ApiJson, ApiPath};
use crate::web::state::AppState;

//=========================================================================================
// Payloads
//=========================================================================================

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCategoryRequest {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,
    pub parent_id: Option<u64>,
    #[serde(default)]
    pub sort_order: i32,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    /// New parent category.
    pub parent_id: Option<u64>,
    /// Moves the category to the root; wins over `parentId`.
    #[serde(default)]
    pub move_to_root: bool,
    pub sort_order: Option<i32>,
    pub is_active: Option<bool>,
}

impl UpdateCategoryRequest {
    fn into_patch(self) -> CategoryPatch {
        let parent_id = if self.move_to_root {
            Some(None)
        } else {
            self.parent_id.map(Some)
        };
        CategoryPatch {
            name: self.name,
            slug: self.slug,
            description: self.description,
            parent_id,
            sort_order: self.sort_order,
            is_active: self.is_active,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CategoryConfigRequest {
    #[serde(default)]
    pub is_restricted: bool,
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default)]
    pub min_account_age_hours: u32,
    /// One of `newUser`, `basic`, `member`, `regular`, `leader`.
    #[schema(value_type = String)]
    pub min_trust_level: TrustLevel,
    pub max_topics_per_hour: Option<u32>,
    pub max_comments_per_hour: Option<u32>,
    pub edit_window_minutes: Option<u32>,
    /// `detachWithTombstone` or `cascade`.
    #[schema(value_type = String)]
    pub deletion_policy: DeletionPolicy,
    #[serde(default = "enabled")]
    pub auto_moderation: bool,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddModeratorRequest {
    pub user_id: u64,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// List active categories; administrators also see archived ones.
#[utoipa::path(
    get,
    path = "/categories",
    tag = "categories",
    responses((status = 200, description = "Categories ordered by sort order"))
)]
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> HttpResult<Json<Vec<Category>>> {
    Ok(Json(state.forum.discussion.list_categories(&principal).await?))
}

/// Create a category (administrators only).
#[utoipa::path(
    post,
    path = "/categories",
    tag = "categories",
    request_body = CreateCategoryRequest,
    responses(
        (status = 201, description = "Category created"),
        (status = 400, description = "Invalid name or slug", body = ApiErrorResponse),
        (status = 403, description = "Not an administrator", body = ApiErrorResponse)
    )
)]
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiJson(body): ApiJson<CreateCategoryRequest>,
) -> HttpResult<(StatusCode, Json<Category>)> {
    let category = NewCategory {
        name: body.name,
        slug: body.slug,
        description: body.description,
        parent_id: body.parent_id,
        sort_order: body.sort_order,
    };
    let created = state.forum.discussion.create_category(&principal, category).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/categories/{id}",
    tag = "categories",
    params(("id" = u64, Path, description = "Category id")),
    responses(
        (status = 200, description = "The category"),
        (status = 404, description = "No such category", body = ApiErrorResponse)
    )
)]
pub async fn get_category(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<Category>> {
    Ok(Json(state.forum.discussion.get_category(&principal, id).await?))
}

/// Rename, re-parent, reorder or archive a category.
#[utoipa::path(
    patch,
    path = "/categories/{id}",
    tag = "categories",
    params(("id" = u64, Path, description = "Category id")),
    request_body = UpdateCategoryRequest,
    responses(
        (status = 200, description = "Category updated"),
        (status = 400, description = "Invalid fields or a parent cycle", body = ApiErrorResponse)
    )
)]
pub async fn update_category(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<UpdateCategoryRequest>,
) -> HttpResult<Json<Category>> {
    let updated = state
        .forum
        .discussion
        .update_category(&principal, id, body.into_patch())
        .await?;
    Ok(Json(updated))
}

/// The effective configuration, inherited from the nearest configured ancestor.
#[utoipa::path(
    get,
    path = "/categories/{id}/config",
    tag = "categories",
    params(("id" = u64, Path, description = "Category id")),
    responses((status = 200, description = "Effective category configuration"))
)]
pub async fn get_category_config(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<CategoryConfig>> {
    Ok(Json(state.forum.discussion.category_config(id).await?))
}

#[utoipa::path(
    put,
    path = "/categories/{id}/config",
    tag = "categories",
    params(("id" = u64, Path, description = "Category id")),
    request_body = CategoryConfigRequest,
    responses((status = 200, description = "Configuration saved"))
)]
pub async fn put_category_config(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<CategoryConfigRequest>,
) -> HttpResult<Json<CategoryConfig>> {
    let input = CategoryConfigInput {
        is_restricted: body.is_restricted,
        require_approval: body.require_approval,
        min_account_age_hours: body.min_account_age_hours,
        min_trust_level: body.min_trust_level,
        max_topics_per_hour: body.max_topics_per_hour,
        max_comments_per_hour: body.max_comments_per_hour,
        edit_window_minutes: body.edit_window_minutes,
        deletion_policy: body.deletion_policy,
        auto_moderation: body.auto_moderation,
    };
    let config = state.forum.discussion.set_category_config(&principal, id, input).await?;
    Ok(Json(config))
}

#[utoipa::path(
    get,
    path = "/categories/{id}/moderators",
    tag = "categories",
    params(("id" = u64, Path, description = "Category id")),
    responses((status = 200, description = "Moderators of the category"))
)]
pub async fn list_category_moderators(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<Vec<CategoryModerator>>> {
    Ok(Json(state.forum.discussion.list_category_moderators(id).await?))
}

#[utoipa::path(
    post,
    path = "/categories/{id}/moderators",
    tag = "categories",
    params(("id" = u64, Path, description = "Category id")),
    request_body = AddModeratorRequest,
    responses(
        (status = 201, description = "Moderator added"),
        (status = 403, description = "Missing the assign-moderators permission", body = ApiErrorResponse)
    )
)]
pub async fn add_category_moderator(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<AddModeratorRequest>,
) -> HttpResult<(StatusCode, Json<CategoryModerator>)> {
    let moderator = state
        .forum
        .discussion
        .add_category_moderator(&principal, id, body.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(moderator)))
}

#[utoipa::path(
    delete,
    path = "/categories/{id}/moderators/{userId}",
    tag = "categories",
    params(
        ("id" = u64, Path, description = "Category id"),
        ("userId" = u64, Path, description = "Moderator's user id")
    ),
    responses((status = 204, description = "Moderator removed"))
)]
pub async fn remove_category_moderator(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath((id, user_id)): ApiPath<(u64, u64)>,
) -> HttpResult<StatusCode> {
    state
        .forum
        .discussion
        .remove_category_moderator(&principal, id, user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
