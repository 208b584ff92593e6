//! services/api/src/web/error.rs
//!
//! Maps the discussion core's closed error set onto HTTP responses.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use forum_core::domain::UnknownVariant;
use forum_core::{ErrorKind, ForumError};
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// The error envelope returned by every endpoint.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    /// One of the stable error codes, e.g. `notFound` or `rateLimited`.
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Present on internal errors; quote it when reporting a problem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

/// A handler failure. Wraps [`ForumError`] so it can be returned from axum handlers.
#[derive(Debug)]
pub struct HttpError(pub ForumError);

pub type HttpResult<T> = Result<T, HttpError>;

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::InvalidContent => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::DuplicateReaction | ErrorKind::TopicLocked => StatusCode::CONFLICT,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Timeout | ErrorKind::DependencyFailure => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        let body = if kind == ErrorKind::Internal {
            let correlation_id = Uuid::new_v4();
            error!(%correlation_id, error = %self.0, "Request failed with an internal error");
            ApiErrorResponse {
                code: kind.to_string(),
                message: "an internal error occurred".to_string(),
                details: None,
                correlation_id: Some(correlation_id),
            }
        } else {
            if status == StatusCode::SERVICE_UNAVAILABLE {
                warn!(error = %self.0, "Request failed on a collaborator");
            }
            ApiErrorResponse {
                code: kind.to_string(),
                message: self.0.to_string(),
                details: self.0.details(),
                correlation_id: None,
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<ForumError> for HttpError {
    fn from(err: ForumError) -> Self {
        HttpError(err)
    }
}

impl From<UnknownVariant> for HttpError {
    fn from(err: UnknownVariant) -> Self {
        HttpError(err.into())
    }
}

// Extractor rejections are reported in the same envelope as every other error.

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        HttpError(ForumError::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for HttpError {
    fn from(rejection: QueryRejection) -> Self {
        HttpError(ForumError::validation(rejection.body_text()))
    }
}

impl From<PathRejection> for HttpError {
    fn from(rejection: PathRejection) -> Self {
        HttpError(ForumError::validation(rejection.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_its_status() {
        assert_eq!(status_for(ErrorKind::InvalidContent), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::TopicLocked), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::DuplicateReaction), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn internal_errors_hide_their_message() {
        let response = HttpError(ForumError::Internal("db password leaked".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
