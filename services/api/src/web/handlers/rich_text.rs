use axum::{extract::State, response::Json};
use forum_core::domain::{RichTextBundle, TargetKind, TargetRef};
use std::sync::Arc;

use crate::web::error::{ApiErrorResponse, HttpResult};
use crate::web::extract::ApiPath;
use crate::web::state::AppState;

/// Rendered body of a topic or comment with its attachments, code blocks,
/// quotes and mentions.
#[utoipa::path(
    get,
    path = "/rich-text/{targetKind}/{targetId}",
    tag = "discussion",
    params(
        ("targetKind" = String, Path, description = "`topic` or `comment`"),
        ("targetId" = u64, Path, description = "Target id")
    ),
    responses((status = 200, description = "The processed text"), (status = 404, description = "Nothing stored for the target", body = ApiErrorResponse))
)]
pub async fn get_rich_text(
    State(state): State<Arc<AppState>>,
    ApiPath((kind, id)): ApiPath<(TargetKind, u64)>,
) -> HttpResult<Json<RichTextBundle>> {
    Ok(Json(state.forum.rich_text.get(TargetRef { kind, id }).await?))
}
