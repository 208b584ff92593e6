//! Categories, topics, comments, reactions and tags.

use super::{ContentKind, TargetRef, TrustLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A node of the category tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: u64,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub parent_id: Option<u64>,
    pub sort_order: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub parent_id: Option<u64>,
    pub sort_order: i32,
}

/// Partial update of a category; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    /// `Some(None)` moves the category to the root.
    #[serde(default, with = "double_option")]
    pub parent_id: Option<Option<u64>>,
    pub sort_order: Option<i32>,
    pub is_active: Option<bool>,
}

string_enum! {
    /// What happens to the replies of a deleted comment.
    pub enum DeletionPolicy {
        /// Replies stay attached to a tombstone of the deleted comment.
        DetachWithTombstone => "detachWithTombstone",
        /// Every descendant is soft-deleted with the comment.
        Cascade => "cascade",
    }
}

/// Posting rules and auto-moderation settings attached to a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryConfig {
    pub category_id: u64,
    /// Only moderators of the category may open topics or comment.
    pub is_restricted: bool,
    /// New content from users below `member` waits in the moderation queue.
    pub require_approval: bool,
    pub min_account_age_hours: u32,
    pub min_trust_level: TrustLevel,
    pub max_topics_per_hour: Option<u32>,
    pub max_comments_per_hour: Option<u32>,
    /// `None` means authors may edit for as long as the topic is unlocked.
    pub edit_window_minutes: Option<u32>,
    pub deletion_policy: DeletionPolicy,
    pub auto_moderation: bool,
    pub updated_at: DateTime<Utc>,
}

impl CategoryConfig {
    pub fn defaults_for(category_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            category_id,
            is_restricted: false,
            require_approval: false,
            min_account_age_hours: 0,
            min_trust_level: TrustLevel::NewUser,
            max_topics_per_hour: None,
            max_comments_per_hour: None,
            edit_window_minutes: None,
            deletion_policy: DeletionPolicy::DetachWithTombstone,
            auto_moderation: true,
            updated_at: now,
        }
    }
}

/// A per-category moderator assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryModerator {
    pub category_id: u64,
    pub user_id: u64,
    pub assigned_by: u64,
    pub assigned_at: DateTime<Utc>,
}

/// The root post of a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub author_id: u64,
    pub category_id: u64,
    pub is_pinned: bool,
    pub is_locked: bool,
    pub is_approved: bool,
    pub is_flagged: bool,
    pub flag_reason: Option<String>,
    pub view_count: u64,
    pub comment_count: u64,
    pub last_activity_at: DateTime<Utc>,
    pub book_id: Option<u64>,
    pub chapter_id: Option<u64>,
    pub section_id: Option<u64>,
    pub tag_ids: Vec<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Topic {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn target(&self) -> TargetRef {
        TargetRef::topic(self.id)
    }
}

/// A fully-resolved topic ready to be inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTopic {
    pub title: String,
    pub body: String,
    pub author_id: u64,
    pub category_id: u64,
    pub is_approved: bool,
    pub is_flagged: bool,
    pub flag_reason: Option<String>,
    pub book_id: Option<u64>,
    pub chapter_id: Option<u64>,
    pub section_id: Option<u64>,
    pub tag_ids: Vec<u64>,
    pub created_at: DateTime<Utc>,
}

/// A reply under a topic, optionally parented to another comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: u64,
    pub topic_id: u64,
    pub author_id: u64,
    pub body: String,
    pub parent_comment_id: Option<u64>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_approved: bool,
    pub is_flagged: bool,
    pub flag_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Comment {
    /// Body shown in place of a deleted comment that still has replies.
    pub const TOMBSTONE: &'static str = "[deleted]";

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn target(&self) -> TargetRef {
        TargetRef::comment(self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub topic_id: u64,
    pub author_id: u64,
    pub body: String,
    pub parent_comment_id: Option<u64>,
    pub is_approved: bool,
    pub is_flagged: bool,
    pub flag_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

string_enum! {
    pub enum TopicSort {
        /// Pinned first, then most recent activity.
        Activity => "activity",
        Newest => "newest",
        Oldest => "oldest",
        MostViewed => "mostViewed",
        MostCommented => "mostCommented",
    }
}

impl Default for TopicSort {
    fn default() -> Self {
        TopicSort::Activity
    }
}

/// Filter for topic listings; every set field narrows the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicQuery {
    pub category_id: Option<u64>,
    pub tag_ids: Vec<u64>,
    pub author_id: Option<u64>,
    pub book_id: Option<u64>,
    pub chapter_id: Option<u64>,
    pub section_id: Option<u64>,
    pub sort: TopicSort,
    pub include_deleted: bool,
    pub include_unapproved: bool,
}

string_enum! {
    pub enum ReactionKind {
        Like => "like",
        Celebrate => "celebrate",
        Insightful => "insightful",
        Support => "support",
        Curious => "curious",
        Love => "love",
    }
}

/// Unique on `(user_id, target, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: u64,
    pub target: TargetRef,
    pub kind: ReactionKind,
    pub created_at: DateTime<Utc>,
}

string_enum! {
    pub enum ReactionPolicy {
        /// A user may hold several reaction kinds on one target.
        MultiKind => "multiKind",
        /// A new kind replaces the user's previous kind on the target.
        SingleKind => "singleKind",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReactionOutcome {
    Added,
    AlreadyPresent,
    Replaced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionCount {
    pub kind: ReactionKind,
    pub count: u64,
}

/// Per-kind counts for one target, ordered by descending count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSummary {
    pub target: TargetRef,
    pub counts: Vec<ReactionCount>,
    pub total: u64,
}

impl ReactionSummary {
    pub fn from_counts(target: TargetRef, mut counts: Vec<ReactionCount>) -> Self {
        counts.retain(|c| c.count > 0);
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.kind.as_str().cmp(b.kind.as_str())));
        let total = counts.iter().map(|c| c.count).sum();
        Self { target, counts, total }
    }

    pub fn count_of(&self, kind: ReactionKind) -> u64 {
        self.counts
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: u64,
    pub name: String,
    pub slug: String,
    pub color: String,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTag {
    pub name: String,
    pub slug: String,
    pub color: String,
    pub is_system: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagPatch {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub color: Option<String>,
}

/// A book-content anchor carried by a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAnchor {
    pub book_id: Option<u64>,
    pub chapter_id: Option<u64>,
    pub section_id: Option<u64>,
}

impl BookAnchor {
    /// The most specific content the anchor points at, if any.
    pub fn most_specific(&self) -> Option<(ContentKind, u64)> {
        self.section_id
            .map(|id| (ContentKind::Section, id))
            .or(self.chapter_id.map(|id| (ContentKind::Chapter, id)))
            .or(self.book_id.map(|id| (ContentKind::Book, id)))
    }
}

/// Lets a JSON `null` mean "clear" while an absent field means "leave alone".
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaction_summary_orders_by_descending_count() {
        let summary = ReactionSummary::from_counts(
            TargetRef::topic(1),
            vec![
                ReactionCount { kind: ReactionKind::Like, count: 2 },
                ReactionCount { kind: ReactionKind::Insightful, count: 5 },
                ReactionCount { kind: ReactionKind::Love, count: 0 },
            ],
        );
        assert_eq!(summary.counts[0].kind, ReactionKind::Insightful);
        assert_eq!(summary.counts.len(), 2);
        assert_eq!(summary.total, 7);
    }

    #[test]
    fn category_patch_distinguishes_null_from_absent_parent() {
        let cleared: CategoryPatch = serde_json::from_str(r#"{"parentId": null}"#).unwrap();
        assert_eq!(cleared.parent_id, Some(None));

        let untouched: CategoryPatch = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert_eq!(untouched.parent_id, None);
    }

    #[test]
    fn book_anchor_prefers_the_narrowest_content() {
        let anchor = BookAnchor { book_id: Some(1), chapter_id: Some(2), section_id: None };
        assert_eq!(anchor.most_specific(), Some((ContentKind::Chapter, 2)));
    }
}
