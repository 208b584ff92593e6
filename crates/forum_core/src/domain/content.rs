//! Links between discussion entities and book content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    pub enum ContentKind {
        Book => "book",
        Chapter => "chapter",
        Section => "section",
        Resource => "resource",
        Project => "project",
        Report => "report",
    }
}

/// Topic ↔ book-content association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentLink {
    pub id: u64,
    pub topic_id: u64,
    pub content_kind: ContentKind,
    pub content_id: u64,
    pub created_by: u64,
    pub is_auto_generated: bool,
    pub is_highlighted: bool,
    /// Set when the topic was materialised from a template; dedupe key with the content.
    pub template_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContentLink {
    pub topic_id: u64,
    pub content_kind: ContentKind,
    pub content_id: u64,
    pub created_by: u64,
    pub is_auto_generated: bool,
    pub is_highlighted: bool,
    pub template_id: Option<u64>,
}

/// Comment ↔ book-content citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentContentLink {
    pub id: u64,
    pub comment_id: u64,
    pub content_kind: ContentKind,
    pub content_id: u64,
    pub citation_text: String,
    pub citation_context: String,
    pub created_by: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCitation {
    pub comment_id: u64,
    pub content_kind: ContentKind,
    pub content_id: u64,
    pub citation_text: String,
    pub citation_context: String,
    pub created_by: u64,
}

/// A title/body pair with `{placeholder}` markers expanded at auto-topic creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicTemplate {
    pub id: u64,
    pub name: String,
    pub content_kind: ContentKind,
    pub title_template: String,
    pub body_template: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTopicTemplate {
    pub name: String,
    pub content_kind: ContentKind,
    pub title_template: String,
    pub body_template: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDiscussionRecommendation {
    pub id: u64,
    pub content_kind: ContentKind,
    pub content_id: u64,
    pub topic_id: u64,
    /// In `[0, 1]`.
    pub recommendation_score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecommendation {
    pub topic_id: u64,
    pub recommendation_score: f64,
}

/// Read-only metadata served by the book-content collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetadata {
    pub title: String,
    pub summary: String,
    pub owner_id: u64,
    pub tags: Vec<String>,
}
