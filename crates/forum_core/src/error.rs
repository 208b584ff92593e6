//! crates/forum_core/src/error.rs
//!
//! The closed set of error kinds every discussion operation can fail with.

use crate::domain::UnknownVariant;
use crate::ports::PortError;
use serde::{Deserialize, Serialize};

string_enum! {
    /// Stable, wire-visible error codes.
    pub enum ErrorKind {
        Validation => "validation",
        NotFound => "notFound",
        Conflict => "conflict",
        Forbidden => "forbidden",
        Unauthenticated => "unauthenticated",
        RateLimited => "rateLimited",
        TopicLocked => "topicLocked",
        InvalidContent => "invalidContent",
        DuplicateReaction => "duplicateReaction",
        DependencyFailure => "dependencyFailure",
        Timeout => "timeout",
        Internal => "internal",
    }
}

/// Extra structured context attached to an error for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRejection {
    pub triggered_rule_ids: Vec<u64>,
    pub triggered_word_ids: Vec<u64>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ForumError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("authentication required")]
    Unauthenticated,
    #[error("rate limit exceeded for {action}; retry after {retry_after_secs}s")]
    RateLimited { action: String, retry_after_secs: u64 },
    #[error("topic {0} is locked")]
    TopicLocked(u64),
    #[error("content rejected by the content filter")]
    InvalidContent(FilterRejection),
    #[error("reaction already present")]
    DuplicateReaction,
    #[error("dependency failure: {0}")]
    DependencyFailure(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// A convenience type alias for `Result<T, ForumError>`.
pub type ForumResult<T> = Result<T, ForumError>;

impl ForumError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForumError::Validation(_) => ErrorKind::Validation,
            ForumError::NotFound(_) => ErrorKind::NotFound,
            ForumError::Conflict(_) => ErrorKind::Conflict,
            ForumError::Forbidden(_) => ErrorKind::Forbidden,
            ForumError::Unauthenticated => ErrorKind::Unauthenticated,
            ForumError::RateLimited { .. } => ErrorKind::RateLimited,
            ForumError::TopicLocked(_) => ErrorKind::TopicLocked,
            ForumError::InvalidContent(_) => ErrorKind::InvalidContent,
            ForumError::DuplicateReaction => ErrorKind::DuplicateReaction,
            ForumError::DependencyFailure(_) => ErrorKind::DependencyFailure,
            ForumError::Timeout(_) => ErrorKind::Timeout,
            ForumError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only transient collaborator failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::DependencyFailure)
    }

    /// Structured details for the error envelope, when the kind carries any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            ForumError::RateLimited { action, retry_after_secs } => Some(serde_json::json!({
                "action": action,
                "retryAfterSecs": retry_after_secs,
            })),
            ForumError::InvalidContent(rejection) => serde_json::to_value(rejection).ok(),
            ForumError::TopicLocked(id) => Some(serde_json::json!({ "topicId": id })),
            _ => None,
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        ForumError::NotFound(what.to_string())
    }

    pub fn forbidden(why: impl Into<String>) -> Self {
        ForumError::Forbidden(why.into())
    }

    pub fn validation(why: impl Into<String>) -> Self {
        ForumError::Validation(why.into())
    }
}

impl From<PortError> for ForumError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => ForumError::NotFound(what),
            PortError::Conflict(what) => ForumError::Conflict(what),
            PortError::Timeout(what) => ForumError::Timeout(what),
            PortError::Unavailable(what) => ForumError::DependencyFailure(what),
            PortError::Unauthorized => ForumError::Unauthenticated,
            PortError::Unexpected(what) => ForumError::Internal(what),
        }
    }
}

impl From<UnknownVariant> for ForumError {
    fn from(err: UnknownVariant) -> Self {
        ForumError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_errors_map_onto_the_closed_set() {
        assert_eq!(
            ForumError::from(PortError::Conflict("dup".into())).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ForumError::from(PortError::Unavailable("redis".into())).kind(),
            ErrorKind::DependencyFailure
        );
        assert_eq!(ForumError::from(PortError::Unauthorized).kind(), ErrorKind::Unauthenticated);
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(ForumError::Timeout("store".into()).is_retryable());
        assert!(ForumError::DependencyFailure("notifier".into()).is_retryable());
        assert!(!ForumError::Conflict("dup".into()).is_retryable());
        assert!(!ForumError::Internal("boom".into()).is_retryable());
    }

    #[test]
    fn rate_limit_details_carry_retry_after() {
        let err = ForumError::RateLimited { action: "report".into(), retry_after_secs: 42 };
        let details = err.details().unwrap();
        assert_eq!(details["retryAfterSecs"], 42);
    }
}
