//! Moderator tooling: the review queue, filter rules and words, trust scores,
//! actions against users and moderator grants.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use chrono::{DateTime, Utc};
use forum_core::domain::{
    ContentFilterResult, FilterAction, FilterDecision, ModerationQueueItem, ModerationRule, ModerationRulePatch,
    ModeratorGrant, NewModerationRule, NewProhibitedWord, Page, PageRequest, PatternKind, Principal, ProhibitedWord,
    QueueDecision, QueueStatus, RuleScope, TargetKind, TargetRef, UserActionKind, UserModerationAction,
    UserTrustScore, WordAction,
};
use forum_core::services::moderation::{DecideRequest, GrantRequest, UserActionRequest};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::web::error::{ApiErrorResponse, HttpResult};
use crate::web::extract::{ApiJson, ApiPath, ApiQuery};
use crate::web::state::AppState;

//=========================================================================================
// Payloads
//=========================================================================================

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct QueueParams {
    /// `pending`, `inReview`, `approved` or `rejected`.
    #[param(value_type = Option<String>)]
    pub status: Option<QueueStatus>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignQueueRequest {
    pub assignee: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserActionBody {
    /// `warn`, `mute`, `suspend`, `temporaryBan` or `permanentBan`.
    #[schema(value_type = String)]
    pub kind: UserActionKind,
    pub reason: String,
    pub duration_hours: Option<u32>,
    #[schema(value_type = Option<String>)]
    pub related_target_kind: Option<TargetKind>,
    pub related_target_id: Option<u64>,
}

impl UserActionBody {
    fn into_request(self) -> UserActionRequest {
        let related_target = match (self.related_target_kind, self.related_target_id) {
            (Some(kind), Some(id)) => Some(TargetRef { kind, id }),
            _ => None,
        };
        UserActionRequest {
            kind: self.kind,
            reason: self.reason,
            duration_hours: self.duration_hours,
            related_target,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecideBody {
    /// `approve` or `reject`.
    #[schema(value_type = String)]
    pub decision: QueueDecision,
    #[serde(default)]
    pub notes: String,
    /// Explicit sanction for the author of rejected content.
    pub user_action: Option<UserActionBody>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleRequest {
    pub name: String,
    /// `topics`, `comments` or `all`.
    #[schema(value_type = String)]
    pub applies_to: RuleScope,
    /// `exact`, `regex` or `wildcard`.
    #[schema(value_type = String)]
    pub pattern_kind: PatternKind,
    pub pattern: String,
    /// `none`, `warn`, `flag`, `hide`, `remove`, `queue` or `autoFilter`.
    #[schema(value_type = String)]
    pub action: FilterAction,
    /// 1 to 5.
    pub severity: u8,
    #[serde(default = "active")]
    pub is_active: bool,
}

fn active() -> bool {
    true
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRuleRequest {
    pub name: Option<String>,
    #[schema(value_type = Option<String>)]
    pub applies_to: Option<RuleScope>,
    #[schema(value_type = Option<String>)]
    pub pattern_kind: Option<PatternKind>,
    pub pattern: Option<String>,
    #[schema(value_type = Option<String>)]
    pub action: Option<FilterAction>,
    pub severity: Option<u8>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateWordRequest {
    pub word: String,
    #[serde(default)]
    pub is_regex: bool,
    pub severity: u8,
    /// `warn`, `flag` or `block`.
    #[schema(value_type = String)]
    pub action: WordAction,
    pub replacement: Option<String>,
    #[serde(default)]
    pub is_auto_replace: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilterTestRequest {
    /// `topic` or `comment`.
    #[schema(value_type = String)]
    pub target_kind: TargetKind,
    pub body: String,
    /// Evaluate as if written by this user; defaults to the caller.
    pub author_id: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct FilterResultParams {
    #[param(value_type = String)]
    pub target_kind: TargetKind,
    pub target_id: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrustAdjustRequest {
    /// Added to the score, within `[-100, 100]`.
    pub delta: f64,
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrantBody {
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub can_approve_content: bool,
    #[serde(default)]
    pub can_reject_content: bool,
    #[serde(default)]
    pub can_delete_content: bool,
    #[serde(default)]
    pub can_ban_users: bool,
    #[serde(default)]
    pub can_edit_any_content: bool,
    #[serde(default)]
    pub can_manage_rules: bool,
    #[serde(default)]
    pub can_assign_moderators: bool,
    #[serde(default = "active")]
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

//=========================================================================================
// Queue
//=========================================================================================

/// Highest priority first, then oldest first.
#[utoipa::path(
    get,
    path = "/moderation/queue",
    tag = "moderation",
    params(QueueParams),
    responses((status = 200, description = "A page of queue items"), (status = 403, description = "Moderators only", body = ApiErrorResponse))
)]
pub async fn list_queue(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiQuery(params): ApiQuery<QueueParams>,
) -> HttpResult<Json<Page<ModerationQueueItem>>> {
    let page = PageRequest::new(params.page, params.page_size);
    Ok(Json(state.forum.moderation.list(&principal, params.status, page).await?))
}

#[utoipa::path(
    get,
    path = "/moderation/queue/{id}",
    tag = "moderation",
    params(("id" = u64, Path, description = "Queue item id")),
    responses((status = 200, description = "The queue item"), (status = 404, description = "No such item", body = ApiErrorResponse))
)]
pub async fn get_queue_item(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<ModerationQueueItem>> {
    Ok(Json(state.forum.moderation.get(&principal, id).await?))
}

#[utoipa::path(
    post,
    path = "/moderation/queue/{id}/claim",
    tag = "moderation",
    params(("id" = u64, Path, description = "Queue item id")),
    responses(
        (status = 200, description = "Item is in review by the caller"),
        (status = 409, description = "Item was claimed by someone else", body = ApiErrorResponse)
    )
)]
pub async fn claim_item(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<ModerationQueueItem>> {
    Ok(Json(state.forum.moderation.claim(&principal, id).await?))
}

/// Claims the most urgent pending item; 204 when the queue is empty.
#[utoipa::path(
    post,
    path = "/moderation/queue/claim-next",
    tag = "moderation",
    responses((status = 200, description = "The claimed item"), (status = 204, description = "Nothing pending"))
)]
pub async fn claim_next(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> HttpResult<Response> {
    Ok(match state.forum.moderation.claim_next(&principal).await? {
        Some(item) => Json(item).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

#[utoipa::path(
    post,
    path = "/moderation/queue/{id}/assign",
    tag = "moderation",
    params(("id" = u64, Path, description = "Queue item id")),
    request_body = AssignQueueRequest,
    responses((status = 200, description = "Item assigned"), (status = 403, description = "Needs assignModerators", body = ApiErrorResponse))
)]
pub async fn assign_item(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<AssignQueueRequest>,
) -> HttpResult<Json<ModerationQueueItem>> {
    Ok(Json(state.forum.moderation.assign(&principal, id, body.assignee).await?))
}

#[utoipa::path(
    post,
    path = "/moderation/queue/{id}/decide",
    tag = "moderation",
    params(("id" = u64, Path, description = "Queue item id")),
    request_body = DecideBody,
    responses(
        (status = 200, description = "Decision recorded and applied to the content"),
        (status = 409, description = "Item already decided or claimed by another moderator", body = ApiErrorResponse)
    )
)]
pub async fn decide_item(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<DecideBody>,
) -> HttpResult<Json<ModerationQueueItem>> {
    let request = DecideRequest {
        decision: body.decision,
        notes: body.notes,
        user_action: body.user_action.map(UserActionBody::into_request),
    };
    Ok(Json(state.forum.moderation.decide(&principal, id, request).await?))
}

//=========================================================================================
// Rules, words and filter tooling
//=========================================================================================

#[utoipa::path(
    get,
    path = "/moderation/rules",
    tag = "moderation",
    responses((status = 200, description = "Every rule, active or not"))
)]
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> HttpResult<Json<Vec<ModerationRule>>> {
    Ok(Json(state.forum.filter.list_rules(&principal).await?))
}

#[utoipa::path(
    post,
    path = "/moderation/rules",
    tag = "moderation",
    request_body = CreateRuleRequest,
    responses((status = 201, description = "Rule created"), (status = 400, description = "Invalid pattern or severity", body = ApiErrorResponse))
)]
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiJson(body): ApiJson<CreateRuleRequest>,
) -> HttpResult<(StatusCode, Json<ModerationRule>)> {
    let rule = NewModerationRule {
        name: body.name,
        applies_to: body.applies_to,
        pattern_kind: body.pattern_kind,
        pattern: body.pattern,
        action: body.action,
        severity: body.severity,
        is_active: body.is_active,
    };
    let created = state.forum.filter.create_rule(&principal, rule).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    patch,
    path = "/moderation/rules/{id}",
    tag = "moderation",
    params(("id" = u64, Path, description = "Rule id")),
    request_body = UpdateRuleRequest,
    responses((status = 200, description = "Rule updated"))
)]
pub async fn update_rule(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
    ApiJson(body): ApiJson<UpdateRuleRequest>,
) -> HttpResult<Json<ModerationRule>> {
    let patch = ModerationRulePatch {
        name: body.name,
        applies_to: body.applies_to,
        pattern_kind: body.pattern_kind,
        pattern: body.pattern,
        action: body.action,
        severity: body.severity,
        is_active: body.is_active,
    };
    Ok(Json(state.forum.filter.update_rule(&principal, id, patch).await?))
}

#[utoipa::path(
    delete,
    path = "/moderation/rules/{id}",
    tag = "moderation",
    params(("id" = u64, Path, description = "Rule id")),
    responses((status = 204, description = "Rule deleted"))
)]
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<StatusCode> {
    state.forum.filter.delete_rule(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/moderation/words",
    tag = "moderation",
    responses((status = 200, description = "The prohibited word list"))
)]
pub async fn list_words(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> HttpResult<Json<Vec<ProhibitedWord>>> {
    Ok(Json(state.forum.filter.list_words(&principal).await?))
}

#[utoipa::path(
    post,
    path = "/moderation/words",
    tag = "moderation",
    request_body = CreateWordRequest,
    responses((status = 201, description = "Word added"), (status = 409, description = "Word already listed", body = ApiErrorResponse))
)]
pub async fn create_word(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiJson(body): ApiJson<CreateWordRequest>,
) -> HttpResult<(StatusCode, Json<ProhibitedWord>)> {
    let word = NewProhibitedWord {
        word: body.word,
        is_regex: body.is_regex,
        severity: body.severity,
        action: body.action,
        replacement: body.replacement,
        is_auto_replace: body.is_auto_replace,
    };
    let created = state.forum.filter.create_word(&principal, word).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    delete,
    path = "/moderation/words/{id}",
    tag = "moderation",
    params(("id" = u64, Path, description = "Word id")),
    responses((status = 204, description = "Word removed"))
)]
pub async fn delete_word(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<StatusCode> {
    state.forum.filter.delete_word(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Runs the filter over a body without persisting anything.
#[utoipa::path(
    post,
    path = "/moderation/filter/test",
    tag = "moderation",
    request_body = FilterTestRequest,
    responses((status = 200, description = "What the filter would decide"))
)]
pub async fn test_filter(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiJson(body): ApiJson<FilterTestRequest>,
) -> HttpResult<Json<FilterDecision>> {
    let decision = state
        .forum
        .filter
        .dry_run(&principal, body.target_kind, &body.body, body.author_id)
        .await?;
    Ok(Json(decision))
}

#[utoipa::path(
    get,
    path = "/moderation/filter/results",
    tag = "moderation",
    params(FilterResultParams),
    responses((status = 200, description = "Recorded filter evaluations for the target, newest first"))
)]
pub async fn filter_results(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiQuery(params): ApiQuery<FilterResultParams>,
) -> HttpResult<Json<Vec<ContentFilterResult>>> {
    let target = TargetRef {
        kind: params.target_kind,
        id: params.target_id,
    };
    Ok(Json(state.forum.filter.results_for(&principal, target).await?))
}

//=========================================================================================
// Users: trust, sanctions and grants
//=========================================================================================

#[utoipa::path(
    get,
    path = "/moderation/trust/{userId}",
    tag = "moderation",
    params(("userId" = u64, Path, description = "User id")),
    responses((status = 200, description = "Current trust score and counters"))
)]
pub async fn get_trust(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(user_id): ApiPath<u64>,
) -> HttpResult<Json<UserTrustScore>> {
    Ok(Json(state.forum.moderation.trust_of(&principal, user_id).await?))
}

#[utoipa::path(
    post,
    path = "/moderation/trust/{userId}/adjust",
    tag = "moderation",
    params(("userId" = u64, Path, description = "User id")),
    request_body = TrustAdjustRequest,
    responses((status = 200, description = "Recalculated score including the adjustment"))
)]
pub async fn adjust_trust(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(user_id): ApiPath<u64>,
    ApiJson(body): ApiJson<TrustAdjustRequest>,
) -> HttpResult<Json<UserTrustScore>> {
    Ok(Json(
        state
            .forum
            .trust
            .adjust(&principal, user_id, body.delta, body.reason)
            .await?,
    ))
}

#[utoipa::path(
    post,
    path = "/moderation/users/{userId}/actions",
    tag = "moderation",
    params(("userId" = u64, Path, description = "User id")),
    request_body = UserActionBody,
    responses((status = 201, description = "Action applied"), (status = 403, description = "Needs banUsers", body = ApiErrorResponse))
)]
pub async fn apply_action(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(user_id): ApiPath<u64>,
    ApiJson(body): ApiJson<UserActionBody>,
) -> HttpResult<(StatusCode, Json<UserModerationAction>)> {
    let action = state
        .forum
        .moderation
        .apply_action(&principal, user_id, body.into_request())
        .await?;
    Ok((StatusCode::CREATED, Json(action)))
}

#[utoipa::path(
    get,
    path = "/moderation/users/{userId}/actions",
    tag = "moderation",
    params(("userId" = u64, Path, description = "User id")),
    responses((status = 200, description = "Every action taken against the user, newest first"))
)]
pub async fn list_actions(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(user_id): ApiPath<u64>,
) -> HttpResult<Json<Vec<UserModerationAction>>> {
    Ok(Json(state.forum.moderation.list_actions(&principal, user_id).await?))
}

#[utoipa::path(
    post,
    path = "/moderation/actions/{id}/revoke",
    tag = "moderation",
    params(("id" = u64, Path, description = "Action id")),
    responses((status = 200, description = "Action no longer in force"))
)]
pub async fn revoke_action(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<u64>,
) -> HttpResult<Json<UserModerationAction>> {
    Ok(Json(state.forum.moderation.revoke_action(&principal, id).await?))
}

#[utoipa::path(
    get,
    path = "/moderation/grants/{userId}",
    tag = "moderation",
    params(("userId" = u64, Path, description = "User id")),
    responses((status = 200, description = "The user's moderator grant"), (status = 404, description = "No grant", body = ApiErrorResponse))
)]
pub async fn get_grant(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(user_id): ApiPath<u64>,
) -> HttpResult<Json<ModeratorGrant>> {
    Ok(Json(state.forum.moderation.get_grant(&principal, user_id).await?))
}

#[utoipa::path(
    put,
    path = "/moderation/grants/{userId}",
    tag = "moderation",
    params(("userId" = u64, Path, description = "User id")),
    request_body = GrantBody,
    responses((status = 200, description = "Grant stored"), (status = 403, description = "Needs assignModerators", body = ApiErrorResponse))
)]
pub async fn put_grant(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiPath(user_id): ApiPath<u64>,
    ApiJson(body): ApiJson<GrantBody>,
) -> HttpResult<Json<ModeratorGrant>> {
    let request = GrantRequest {
        is_global: body.is_global,
        can_approve_content: body.can_approve_content,
        can_reject_content: body.can_reject_content,
        can_delete_content: body.can_delete_content,
        can_ban_users: body.can_ban_users,
        can_edit_any_content: body.can_edit_any_content,
        can_manage_rules: body.can_manage_rules,
        can_assign_moderators: body.can_assign_moderators,
        is_active: body.is_active,
        expires_at: body.expires_at,
    };
    Ok(Json(state.forum.moderation.grant(&principal, user_id, request).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn related_target_needs_both_halves() {
        let body: UserActionBody = serde_json::from_value(serde_json::json!({
            "kind": "warn",
            "reason": "spam",
            "relatedTargetKind": "comment"
        }))
        .unwrap();
        assert!(body.into_request().related_target.is_none());

        let body: UserActionBody = serde_json::from_value(serde_json::json!({
            "kind": "suspend",
            "reason": "spam",
            "durationHours": 24,
            "relatedTargetKind": "comment",
            "relatedTargetId": 7
        }))
        .unwrap();
        let request = body.into_request();
        assert_eq!(request.related_target, Some(TargetRef { kind: TargetKind::Comment, id: 7 }));
        assert_eq!(request.duration_hours, Some(24));
    }
}
