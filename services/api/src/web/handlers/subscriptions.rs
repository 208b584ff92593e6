//! Subscriptions, notification preferences and digest history of the caller.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::{DateTime, Utc};
use forum_core::domain::{
    Channel, Frequency, Page, Principal, SubjectKind, Subscription, SubscriptionDigest, SubscriptionPatch,
    SubscriptionPreference, SubscriptionPreferencePatch,
};
use forum_core::services::subscriptions::SubscribeRequest;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::web::error::{ApiErrorResponse, HttpResult};
use crate::web::extract::{ApiJson, ApiPath, ApiQuery, PageParams};
use crate::web::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeBody {
    /// `topic`, `category` or `tag`.
    #[schema(value_type = String)]
    pub subject_kind: SubjectKind,
    pub subject_id: u64,
    /// `instant`, `daily` or `weekly`; defaults to the user's preference.
    #[schema(value_type = Option<String>)]
    pub frequency: Option<Frequency>,
    /// Any of `email`, `push`, `inApp`; defaults to the user's preference.
    #[schema(value_type = Option<Vec<String>>)]
    pub channels: Option<Vec<Channel>>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubscriptionBody {
    #[schema(value_type = Option<String>)]
    pub frequency: Option<Frequency>,
    pub email_enabled: Option<bool>,
    pub push_enabled: Option<bool>,
    pub in_app_enabled: Option<bool>,
    pub muted: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesBody {
    #[schema(value_type = Option<String>)]
    pub default_frequency: Option<Frequency>,
    pub email_enabled: Option<bool>,
    pub push_enabled: Option<bool>,
    pub in_app_enabled: Option<bool>,
    /// 0 = Sunday .. 6 = Saturday.
    pub digest_day: Option<u8>,
    /// 0..=23 in the user's local time.
    pub digest_hour: Option<u8>,
    pub utc_offset_minutes: Option<i32>,
    pub auto_subscribe_to_created: Option<bool>,
    pub auto_subscribe_to_replies: Option<bool>,
}

#[utoipa::path(
    post,
    path = "/subscriptions",
    tag = "subscriptions",
    request_body = SubscribeBody,
    responses(
        (status = 201, description = "Subscription created or updated in place"),
        (status = 404, description = "Unknown subject", body = ApiErrorResponse)
    )
)]
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiJson(body): ApiJson<SubscribeBody>,
) -> HttpResult<(StatusCode, Json<Subscription>)> {
    let request = SubscribeRequest {
        subject_kind: body.subject_kind,
        subject_id: body.subject_id,
        frequency: body.frequency,
        channels: body.channels,
    };
    let subscription = state.forum.subscriptions.subscribe(&principal, request).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

#[utoipa::path(
    get,
    path = "/subscriptions",
    tag = "subscriptions",
    responses((status = 200, description = "The caller's subscriptions"), (status = 401, description = "Sign in first", body = ApiErrorResponse))
)]
pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> HttpResult<Json<Vec<Subscription>>> {
    Ok(Json(state.forum.subscriptions.list(&principal).await?))
}

#[utoipa::path(
    patch,
    path = "/subscriptions/{id}",
    tag = "subscriptions",
    params(("id" = u64, Path, description = "Subscription id")),
    request_body = UpdateSubscriptionBody,
    responses((status = 200, description = "Subscription updated"), (status = 404, description = "Not one of the caller's", body = ApiErrorResponse))
)]
pub async fn update_subscription(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<UpdateSubscriptionBody>,
) -> HttpResult<Json<Subscription>> {
    let patch = SubscriptionPatch {
        frequency: body.frequency,
        email_enabled: body.email_enabled,
        push_enabled: body.push_enabled,
        in_app_enabled: body.in_app_enabled,
        muted: body.muted,
        expires_at: body.expires_at,
    };
    Ok(Json(state.forum.subscriptions.update(&principal, id, patch).await?))
}

#[utoipa::path(
    delete,
    path = "/subscriptions/{id}",
    tag = "subscriptions",
    params(("id" = u64, Path, description = "Subscription id")),
    responses((status = 204, description = "Unsubscribed"))
)]
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<StatusCode> {
    state.forum.subscriptions.unsubscribe(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/subscriptions/preferences",
    tag = "subscriptions",
    responses((status = 200, description = "Stored preferences, or the defaults"))
)]
pub async fn get_preferences(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> HttpResult<Json<SubscriptionPreference>> {
    Ok(Json(state.forum.subscriptions.preferences(&principal).await?))
}

#[utoipa::path(
    put,
    path = "/subscriptions/preferences",
    tag = "subscriptions",
    request_body = PreferencesBody,
    responses((status = 200, description = "Preferences saved"), (status = 400, description = "Day, hour or offset out of range", body = ApiErrorResponse))
)]
pub async fn put_preferences(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiJson(body): ApiJson<PreferencesBody>,
) -> HttpResult<Json<SubscriptionPreference>> {
    let patch = SubscriptionPreferencePatch {
        default_frequency: body.default_frequency,
        email_enabled: body.email_enabled,
        push_enabled: body.push_enabled,
        in_app_enabled: body.in_app_enabled,
        digest_day: body.digest_day,
        digest_hour: body.digest_hour,
        utc_offset_minutes: body.utc_offset_minutes,
        auto_subscribe_to_created: body.auto_subscribe_to_created,
        auto_subscribe_to_replies: body.auto_subscribe_to_replies,
    };
    Ok(Json(state.forum.subscriptions.update_preferences(&principal, patch).await?))
}

/// Digest history, most recent first.
#[utoipa::path(
    get,
    path = "/subscriptions/digests",
    tag = "subscriptions",
    params(PageParams),
    responses((status = 200, description = "A page of digests"))
)]
pub async fn list_digests(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> HttpResult<Json<Page<SubscriptionDigest>>> {
    Ok(Json(state.forum.subscriptions.digests(&principal, params.request()).await?))
}
