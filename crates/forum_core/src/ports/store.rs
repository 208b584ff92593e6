//! Persistence ports, one trait per aggregate family.
//!
//! Every method that touches more than one row runs in a single store
//! transaction: either all of its writes land or none do. Unique-key
//! violations surface as [`PortError::Conflict`], missing rows as
//! [`PortError::NotFound`].

use super::PortResult;
use crate::domain::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn create_category(&self, category: NewCategory, now: DateTime<Utc>) -> PortResult<Category>;
    async fn get_category(&self, id: u64) -> PortResult<Category>;
    async fn list_categories(&self) -> PortResult<Vec<Category>>;
    async fn update_category(&self, id: u64, patch: CategoryPatch, now: DateTime<Utc>) -> PortResult<Category>;

    /// The config attached directly to the category, without inheritance.
    async fn get_category_config(&self, category_id: u64) -> PortResult<Option<CategoryConfig>>;
    async fn upsert_category_config(&self, config: CategoryConfig) -> PortResult<CategoryConfig>;

    async fn add_category_moderator(&self, moderator: CategoryModerator) -> PortResult<CategoryModerator>;
    async fn remove_category_moderator(&self, category_id: u64, user_id: u64) -> PortResult<bool>;
    async fn list_category_moderators(&self, category_id: u64) -> PortResult<Vec<CategoryModerator>>;
    /// Category ids the user moderates directly.
    async fn moderated_categories(&self, user_id: u64) -> PortResult<Vec<u64>>;

    /// Cheap round trip used by the health endpoint.
    async fn ping(&self) -> PortResult<()>;
}

#[async_trait]
pub trait TopicStore: Send + Sync {
    /// Inserts the topic, its tag links, its rich text and any moderation artefacts.
    async fn create_topic(
        &self,
        topic: NewTopic,
        rich_text: RichTextBundle,
        moderation: ModerationRecord,
    ) -> PortResult<Topic>;

    /// Returns soft-deleted topics too; callers decide visibility.
    async fn get_topic(&self, id: u64) -> PortResult<Topic>;
    async fn get_topics(&self, ids: &[u64]) -> PortResult<Vec<Topic>>;
    async fn list_topics(&self, query: &TopicQuery, page: PageRequest) -> PortResult<Page<Topic>>;

    /// Writes every mutable field of the topic. When `rich_text` is set the
    /// stored rich text and side tables are replaced.
    async fn update_topic(
        &self,
        topic: &Topic,
        rich_text: Option<RichTextBundle>,
        moderation: ModerationRecord,
    ) -> PortResult<Topic>;

    async fn soft_delete_topic(&self, id: u64, now: DateTime<Utc>) -> PortResult<()>;
    async fn increment_view_count(&self, id: u64) -> PortResult<u64>;

    async fn attach_tag(&self, topic_id: u64, tag_id: u64, now: DateTime<Utc>) -> PortResult<bool>;
    async fn detach_tag(&self, topic_id: u64, tag_id: u64, now: DateTime<Utc>) -> PortResult<bool>;
}

#[async_trait]
pub trait CommentStore: Send + Sync {
    /// Inserts the comment; when it is approved the topic's `commentCount`
    /// and `lastActivityAt` move with it.
    async fn create_comment(
        &self,
        comment: NewComment,
        rich_text: RichTextBundle,
        moderation: ModerationRecord,
    ) -> PortResult<Comment>;

    async fn get_comment(&self, id: u64) -> PortResult<Comment>;

    /// Ordered by creation time, oldest first.
    async fn list_comments(
        &self,
        topic_id: u64,
        include_hidden: bool,
        page: PageRequest,
    ) -> PortResult<Page<Comment>>;

    async fn update_comment(
        &self,
        comment: &Comment,
        rich_text: Option<RichTextBundle>,
        moderation: ModerationRecord,
    ) -> PortResult<Comment>;

    /// Soft-deletes the comment following `policy` and recomputes the topic's
    /// activity counters. Returns the ids of every comment that was deleted.
    async fn delete_comment(
        &self,
        id: u64,
        policy: DeletionPolicy,
        now: DateTime<Utc>,
    ) -> PortResult<Vec<u64>>;
}

#[async_trait]
pub trait ReactionStore: Send + Sync {
    async fn add_reaction(&self, reaction: Reaction, policy: ReactionPolicy) -> PortResult<ReactionOutcome>;
    /// Returns whether a row was removed.
    async fn remove_reaction(&self, user_id: u64, target: TargetRef, kind: ReactionKind) -> PortResult<bool>;
    async fn reaction_summary(&self, target: TargetRef) -> PortResult<ReactionSummary>;
}

#[async_trait]
pub trait TagStore: Send + Sync {
    async fn create_tag(&self, tag: NewTag, now: DateTime<Utc>) -> PortResult<Tag>;
    async fn get_tag(&self, id: u64) -> PortResult<Tag>;
    async fn get_tags(&self, ids: &[u64]) -> PortResult<Vec<Tag>>;
    async fn list_tags(&self) -> PortResult<Vec<Tag>>;
    async fn update_tag(&self, id: u64, patch: TagPatch, now: DateTime<Utc>) -> PortResult<Tag>;
    /// Removes the tag and every topic association.
    async fn delete_tag(&self, id: u64) -> PortResult<()>;
}

#[async_trait]
pub trait ContentLinkStore: Send + Sync {
    async fn create_content_link(&self, link: NewContentLink, now: DateTime<Utc>) -> PortResult<ContentLink>;
    async fn get_content_link(&self, id: u64) -> PortResult<ContentLink>;
    async fn delete_content_link(&self, id: u64) -> PortResult<()>;
    async fn set_link_highlight(&self, id: u64, highlighted: bool, now: DateTime<Utc>) -> PortResult<ContentLink>;
    async fn list_links_for_content(&self, kind: ContentKind, content_id: u64) -> PortResult<Vec<ContentLink>>;
    async fn list_links_for_topics(&self, topic_ids: &[u64]) -> PortResult<Vec<ContentLink>>;

    async fn create_citation(&self, citation: NewCitation, now: DateTime<Utc>) -> PortResult<CommentContentLink>;
    async fn get_citation(&self, id: u64) -> PortResult<CommentContentLink>;
    async fn delete_citation(&self, id: u64) -> PortResult<CommentContentLink>;
    async fn list_citations_for_comment(&self, comment_id: u64) -> PortResult<Vec<CommentContentLink>>;
    async fn list_citations_for_content(
        &self,
        kind: ContentKind,
        content_id: u64,
    ) -> PortResult<Vec<CommentContentLink>>;

    async fn create_template(&self, template: NewTopicTemplate, now: DateTime<Utc>) -> PortResult<TopicTemplate>;
    async fn list_templates(&self, kind: Option<ContentKind>, active_only: bool) -> PortResult<Vec<TopicTemplate>>;

    /// Creates a templated topic and its auto-generated link unless the
    /// `(templateId, contentKind, contentId)` triple already exists, in which
    /// case nothing is written and `None` is returned.
    async fn create_auto_topic(
        &self,
        topic: NewTopic,
        rich_text: RichTextBundle,
        link: NewContentLink,
    ) -> PortResult<Option<Topic>>;

    /// Replaces every stored recommendation for the content.
    async fn replace_recommendations(
        &self,
        kind: ContentKind,
        content_id: u64,
        recommendations: Vec<NewRecommendation>,
        now: DateTime<Utc>,
    ) -> PortResult<Vec<ContentDiscussionRecommendation>>;
    async fn list_recommendations(
        &self,
        kind: ContentKind,
        content_id: u64,
    ) -> PortResult<Vec<ContentDiscussionRecommendation>>;
}

#[async_trait]
pub trait ModerationStore: Send + Sync {
    // --- Rules and Words ---
    async fn create_rule(&self, rule: NewModerationRule, now: DateTime<Utc>) -> PortResult<ModerationRule>;
    async fn get_rule(&self, id: u64) -> PortResult<ModerationRule>;
    async fn list_rules(&self, active_only: bool) -> PortResult<Vec<ModerationRule>>;
    async fn update_rule(&self, id: u64, patch: ModerationRulePatch, now: DateTime<Utc>) -> PortResult<ModerationRule>;
    async fn delete_rule(&self, id: u64) -> PortResult<()>;

    async fn create_word(&self, word: NewProhibitedWord, now: DateTime<Utc>) -> PortResult<ProhibitedWord>;
    async fn list_words(&self, active_only: bool) -> PortResult<Vec<ProhibitedWord>>;
    async fn delete_word(&self, id: u64) -> PortResult<()>;

    // --- Filter Results ---
    async fn create_filter_result(&self, result: NewFilterResult) -> PortResult<ContentFilterResult>;
    async fn get_filter_result(&self, id: u64) -> PortResult<ContentFilterResult>;
    async fn list_filter_results(&self, target_kind: TargetKind, target_id: u64) -> PortResult<Vec<ContentFilterResult>>;

    // --- Queue ---
    async fn get_queue_item(&self, id: u64) -> PortResult<ModerationQueueItem>;
    /// Ordered by descending priority, then ascending creation time.
    async fn list_queue(&self, status: Option<QueueStatus>, page: PageRequest) -> PortResult<Page<ModerationQueueItem>>;
    async fn next_pending_queue_item(&self) -> PortResult<Option<ModerationQueueItem>>;
    async fn find_open_queue_item(&self, target: TargetRef) -> PortResult<Option<ModerationQueueItem>>;

    /// Moves an item to `status` with `assignee`, failing with a conflict when
    /// the stored version no longer equals `expected_version`.
    async fn transition_queue_item(
        &self,
        id: u64,
        expected_version: u64,
        status: QueueStatus,
        assignee: Option<u64>,
        now: DateTime<Utc>,
    ) -> PortResult<ModerationQueueItem>;

    /// Records the decision, applies the content mutation, the optional user
    /// action and the outbox notifications in one transaction.
    async fn resolve_queue_item(
        &self,
        id: u64,
        expected_version: u64,
        resolution: QueueResolution,
    ) -> PortResult<ModerationQueueItem>;

    /// Returns `inReview` items untouched since `cutoff` to `pending`.
    async fn revert_stale_reviews(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> PortResult<Vec<u64>>;

    // --- Grants and User Actions ---
    async fn get_moderator_grant(&self, user_id: u64) -> PortResult<Option<ModeratorGrant>>;
    async fn upsert_moderator_grant(&self, grant: ModeratorGrant) -> PortResult<ModeratorGrant>;

    async fn create_user_action(&self, action: NewUserModerationAction) -> PortResult<UserModerationAction>;
    async fn get_user_action(&self, id: u64) -> PortResult<UserModerationAction>;
    async fn list_user_actions(&self, user_id: u64) -> PortResult<Vec<UserModerationAction>>;
    async fn revoke_user_action(&self, id: u64, revoked_by: u64, now: DateTime<Utc>) -> PortResult<UserModerationAction>;
}

/// Counter deltas applied to a trust row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrustCounters {
    pub reports: u32,
    pub warnings: u32,
    pub rejections: u32,
}

#[async_trait]
pub trait TrustStore: Send + Sync {
    async fn get_trust_score(&self, user_id: u64) -> PortResult<Option<UserTrustScore>>;
    async fn save_trust_score(&self, score: UserTrustScore) -> PortResult<UserTrustScore>;

    /// Adds the deltas, creating the row when missing, and marks the score stale.
    async fn bump_trust_counters(
        &self,
        user_id: u64,
        counters: TrustCounters,
        now: DateTime<Utc>,
    ) -> PortResult<UserTrustScore>;

    /// Activity figures; `account_age_days` is left at zero for the caller to fill.
    async fn contribution_stats(&self, user_id: u64) -> PortResult<ContributionStats>;

    /// Users whose score was last calculated before `cutoff`.
    async fn stale_trust_users(&self, cutoff: DateTime<Utc>, limit: u32) -> PortResult<Vec<u64>>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Inserts the report with its `created` log entry. Fails with a conflict
    /// when the reporter already has an open report on the target.
    async fn create_report(&self, report: NewReport) -> PortResult<ContentReport>;
    async fn get_report(&self, id: u64) -> PortResult<ContentReport>;
    async fn list_reports(&self, query: &ReportQuery, page: PageRequest) -> PortResult<Page<ContentReport>>;

    async fn add_evidence(&self, evidence: NewEvidence, log: NewReportLogEntry) -> PortResult<ReportEvidence>;
    async fn list_evidence(&self, report_id: u64) -> PortResult<Vec<ReportEvidence>>;

    async fn add_report_comment(&self, comment: NewReportComment, log: NewReportLogEntry) -> PortResult<ReportComment>;
    async fn list_report_comments(&self, report_id: u64, include_internal: bool) -> PortResult<Vec<ReportComment>>;

    /// Fails with a conflict when the stored status differs from `assignment.expected_status`.
    async fn assign_report(&self, id: u64, assignment: ReportAssignment) -> PortResult<ContentReport>;

    /// Applies a terminal transition with all its side effects.
    async fn resolve_report(
        &self,
        id: u64,
        expected_status: ReportStatus,
        plan: ReportResolutionPlan,
    ) -> PortResult<ContentReport>;

    async fn append_report_log(&self, entry: NewReportLogEntry) -> PortResult<ReportActionLog>;
    async fn list_report_log(&self, report_id: u64) -> PortResult<Vec<ReportActionLog>>;
    async fn report_stats(&self) -> PortResult<ReportStats>;
}

#[async_trait]
pub trait RichTextStore: Send + Sync {
    async fn get_rich_text(&self, target: TargetRef) -> PortResult<Option<RichTextBundle>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Inserts or updates on `(userId, subjectKind, subjectId)`.
    async fn upsert_subscription(&self, subscription: NewSubscription) -> PortResult<Subscription>;
    async fn get_subscription(&self, id: u64) -> PortResult<Subscription>;
    async fn find_subscription(
        &self,
        user_id: u64,
        kind: SubjectKind,
        subject_id: u64,
    ) -> PortResult<Option<Subscription>>;
    async fn update_subscription(&self, id: u64, patch: SubscriptionPatch, now: DateTime<Utc>) -> PortResult<Subscription>;
    async fn delete_subscription(&self, id: u64) -> PortResult<()>;
    async fn list_user_subscriptions(&self, user_id: u64) -> PortResult<Vec<Subscription>>;
    async fn list_subscribers(&self, kind: SubjectKind, subject_id: u64) -> PortResult<Vec<Subscription>>;
    async fn mark_subscriptions_notified(&self, ids: &[u64], at: DateTime<Utc>) -> PortResult<()>;

    async fn get_preference(&self, user_id: u64) -> PortResult<Option<SubscriptionPreference>>;
    async fn save_preference(&self, preference: SubscriptionPreference) -> PortResult<SubscriptionPreference>;

    async fn record_activity(&self, events: Vec<NewActivityEvent>) -> PortResult<()>;
    /// Events on the subject with `after < occurredAt <= until`.
    async fn activity_for_subject(
        &self,
        kind: SubjectKind,
        subject_id: u64,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> PortResult<Vec<ActivityEvent>>;

    /// Users holding at least one subscription of `frequency`, restricted to
    /// `user_id % partitions == partition`.
    async fn digest_users(&self, frequency: Frequency, partitions: u32, partition: u32) -> PortResult<Vec<u64>>;

    /// Stores the digest and stamps `lastNotifiedAt` on the covered
    /// subscriptions. Conflicts on `(userId, frequency, scheduledFor)`.
    async fn create_digest(&self, digest: NewDigest) -> PortResult<SubscriptionDigest>;
    async fn due_digests(&self, now: DateTime<Utc>, limit: u32) -> PortResult<Vec<SubscriptionDigest>>;
    /// Sets `sent` only while the digest is still pending; returns whether it did.
    async fn mark_digest_sent(&self, id: u64, sent_at: DateTime<Utc>) -> PortResult<bool>;
    async fn mark_digest_failed(&self, id: u64, error: String) -> PortResult<bool>;
    async fn list_digests(&self, user_id: u64, page: PageRequest) -> PortResult<Page<SubscriptionDigest>>;

    /// Deletes non-pending digests and activity events older than `cutoff`.
    async fn purge_history(&self, cutoff: DateTime<Utc>) -> PortResult<u64>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue_outbox(&self, messages: Vec<NewOutboxMessage>) -> PortResult<()>;
    async fn due_outbox(&self, now: DateTime<Utc>, limit: u32) -> PortResult<Vec<OutboxMessage>>;
    async fn mark_outbox_delivered(&self, id: u64, now: DateTime<Utc>) -> PortResult<()>;
    async fn reschedule_outbox(
        &self,
        id: u64,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: String,
    ) -> PortResult<()>;
    async fn mark_outbox_dead(&self, id: u64, attempts: u32, error: String, now: DateTime<Utc>) -> PortResult<()>;
}
