//! crates/forum_core/src/ports/mod.rs
//!
//! Defines the service contracts (traits) the discussion core depends on.
//! These traits form the boundary of the hexagonal architecture: the core never
//! talks to a database, cache or delivery channel except through them.

mod collaborators;
mod store;

pub use collaborators::*;
pub use store::*;

//=========================================================================================
// Port Errors
//=========================================================================================

/// Failure of a store, cache or collaborator call; services convert it into
/// `ForumError`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A uniqueness constraint or an optimistic version check failed.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

pub type PortResult<T> = Result<T, PortError>;

impl PortError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        PortError::NotFound(what.to_string())
    }

    pub fn conflict(what: impl std::fmt::Display) -> Self {
        PortError::Conflict(what.to_string())
    }
}

/// The whole persistence surface, implemented by every store backend.
pub trait DiscussionStore:
    CategoryStore
    + TopicStore
    + CommentStore
    + ReactionStore
    + TagStore
    + ContentLinkStore
    + ModerationStore
    + TrustStore
    + ReportStore
    + RichTextStore
    + SubscriptionStore
    + OutboxStore
    + Send
    + Sync
{
}

impl<T> DiscussionStore for T where
    T: CategoryStore
        + TopicStore
        + CommentStore
        + ReactionStore
        + TagStore
        + ContentLinkStore
        + ModerationStore
        + TrustStore
        + ReportStore
        + RichTextStore
        + SubscriptionStore
        + OutboxStore
        + Send
        + Sync
{
}
