//! Reactions on topics and comments.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    Extension,
};
use forum_core::domain::{Principal, ReactionKind, ReactionOutcome, ReactionSummary, TargetKind, TargetRef};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::web::error::{ApiErrorResponse, HttpResult};
use crate::web::extract::{ApiJson, ApiQuery};
use crate::web::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    /// `topic` or `comment`.
    #[schema(value_type = String)]
    pub target_kind: TargetKind,
    pub target_id: u64,
    /// `like`, `celebrate`, `insightful`, `support`, `curious` or `love`.
    #[schema(value_type = String)]
    pub kind: ReactionKind,
}

impl ReactionRequest {
    fn target(&self) -> TargetRef {
        TargetRef {
            kind: self.target_kind,
            id: self.target_id,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReactionResponse {
    /// `added`, `alreadyPresent` or `replaced`.
    #[schema(value_type = String)]
    pub outcome: ReactionOutcome,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct TargetParams {
    #[param(value_type = String)]
    pub target_kind: TargetKind,
    pub target_id: u64,
}

/// React to a topic or comment. Repeating a reaction is a no-op.
#[utoipa::path(
    post,
    path = "/reactions",
    tag = "reactions",
    request_body = ReactionRequest,
    responses(
        (status = 200, description = "What the request changed", body = ReactionResponse),
        (status = 401, description = "Guests cannot react", body = ApiErrorResponse)
    )
)]
pub async fn add_reaction(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiJson(body): ApiJson<ReactionRequest>,
) -> HttpResult<Json<ReactionResponse>> {
    let outcome = state
        .forum
        .discussion
        .add_reaction(&principal, body.target(), body.kind)
        .await?;
    Ok(Json(ReactionResponse { outcome }))
}

#[utoipa::path(
    delete,
    path = "/reactions",
    tag = "reactions",
    request_body = ReactionRequest,
    responses((status = 204, description = "Reaction removed, or was not there"))
)]
pub async fn remove_reaction(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiJson(body): ApiJson<ReactionRequest>,
) -> HttpResult<StatusCode> {
    state
        .forum
        .discussion
        .remove_reaction(&principal, body.target(), body.kind)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/reactions/summary",
    tag = "reactions",
    params(TargetParams),
    responses((status = 200, description = "Per-kind counts, most frequent first"))
)]
pub async fn reaction_summary(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    ApiQuery(params): ApiQuery<TargetParams>,
) -> HttpResult<Json<ReactionSummary>> {
    let target = TargetRef {
        kind: params.target_kind,
        id: params.target_id,
    };
    Ok(Json(state.forum.discussion.reaction_summary(&principal, target).await?))
}
