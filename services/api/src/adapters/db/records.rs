//! "Impure" database record structs. Each mirrors one table row and knows how
//! to turn itself into the domain type; enum columns are stored as their
//! wire names and parsed back here.

use super::{opt_unsigned, parse, unsigned};
use chrono::{DateTime, Utc};
use forum_core::domain::*;
use forum_core::ports::PortResult;
use sqlx::types::Json;
use sqlx::FromRow;

fn target(kind: &str, id: i64) -> PortResult<TargetRef> {
    Ok(TargetRef {
        kind: parse(kind)?,
        id: unsigned(id),
    })
}

fn id_list(values: Vec<i64>) -> Vec<u64> {
    values.into_iter().map(unsigned).collect()
}

//=========================================================================================
// Discussion
//=========================================================================================

#[derive(FromRow)]
pub(super) struct CategoryRecord {
    id: i64,
    name: String,
    slug: String,
    description: String,
    parent_id: Option<i64>,
    sort_order: i32,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl CategoryRecord {
    pub(super) fn to_domain(self) -> Category {
        Category {
            id: unsigned(self.id),
            name: self.name,
            slug: self.slug,
            description: self.description,
            parent_id: opt_unsigned(self.parent_id),
            sort_order: self.sort_order,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
pub(super) struct CategoryConfigRecord {
    category_id: i64,
    is_restricted: bool,
    require_approval: bool,
    min_account_age_hours: i32,
    min_trust_level: String,
    max_topics_per_hour: Option<i32>,
    max_comments_per_hour: Option<i32>,
    edit_window_minutes: Option<i32>,
    deletion_policy: String,
    auto_moderation: bool,
    updated_at: DateTime<Utc>,
}
impl CategoryConfigRecord {
    pub(super) fn to_domain(self) -> PortResult<CategoryConfig> {
        let count = |v: Option<i32>| v.map(|v| v.max(0) as u32);
        Ok(CategoryConfig {
            category_id: unsigned(self.category_id),
            is_restricted: self.is_restricted,
            require_approval: self.require_approval,
            min_account_age_hours: self.min_account_age_hours.max(0) as u32,
            min_trust_level: parse(&self.min_trust_level)?,
            max_topics_per_hour: count(self.max_topics_per_hour),
            max_comments_per_hour: count(self.max_comments_per_hour),
            edit_window_minutes: count(self.edit_window_minutes),
            deletion_policy: parse(&self.deletion_policy)?,
            auto_moderation: self.auto_moderation,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct CategoryModeratorRecord {
    category_id: i64,
    user_id: i64,
    assigned_by: i64,
    assigned_at: DateTime<Utc>,
}
impl CategoryModeratorRecord {
    pub(super) fn to_domain(self) -> CategoryModerator {
        CategoryModerator {
            category_id: unsigned(self.category_id),
            user_id: unsigned(self.user_id),
            assigned_by: unsigned(self.assigned_by),
            assigned_at: self.assigned_at,
        }
    }
}

#[derive(FromRow)]
pub(super) struct TopicRecord {
    id: i64,
    title: String,
    body: String,
    author_id: i64,
    category_id: i64,
    is_pinned: bool,
    is_locked: bool,
    is_approved: bool,
    is_flagged: bool,
    flag_reason: Option<String>,
    view_count: i64,
    comment_count: i64,
    last_activity_at: DateTime<Utc>,
    book_id: Option<i64>,
    chapter_id: Option<i64>,
    section_id: Option<i64>,
    tag_ids: Vec<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}
impl TopicRecord {
    pub(super) fn to_domain(self) -> Topic {
        Topic {
            id: unsigned(self.id),
            title: self.title,
            body: self.body,
            author_id: unsigned(self.author_id),
            category_id: unsigned(self.category_id),
            is_pinned: self.is_pinned,
            is_locked: self.is_locked,
            is_approved: self.is_approved,
            is_flagged: self.is_flagged,
            flag_reason: self.flag_reason,
            view_count: unsigned(self.view_count),
            comment_count: unsigned(self.comment_count),
            last_activity_at: self.last_activity_at,
            book_id: opt_unsigned(self.book_id),
            chapter_id: opt_unsigned(self.chapter_id),
            section_id: opt_unsigned(self.section_id),
            tag_ids: id_list(self.tag_ids),
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

#[derive(FromRow)]
pub(super) struct CommentRecord {
    id: i64,
    topic_id: i64,
    author_id: i64,
    body: String,
    parent_comment_id: Option<i64>,
    is_edited: bool,
    edited_at: Option<DateTime<Utc>>,
    is_approved: bool,
    is_flagged: bool,
    flag_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}
impl CommentRecord {
    pub(super) fn to_domain(self) -> Comment {
        Comment {
            id: unsigned(self.id),
            topic_id: unsigned(self.topic_id),
            author_id: unsigned(self.author_id),
            body: self.body,
            parent_comment_id: opt_unsigned(self.parent_comment_id),
            is_edited: self.is_edited,
            edited_at: self.edited_at,
            is_approved: self.is_approved,
            is_flagged: self.is_flagged,
            flag_reason: self.flag_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

#[derive(FromRow)]
pub(super) struct TagRecord {
    id: i64,
    name: String,
    slug: String,
    color: String,
    is_system: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl TagRecord {
    pub(super) fn to_domain(self) -> Tag {
        Tag {
            id: unsigned(self.id),
            name: self.name,
            slug: self.slug,
            color: self.color,
            is_system: self.is_system,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

//=========================================================================================
// Rich Text
//=========================================================================================

#[derive(FromRow)]
pub(super) struct RichTextRecord {
    target_kind: String,
    target_id: i64,
    format: String,
    raw_body: String,
    rendered_html: String,
    has_mentions: bool,
    has_attachments: bool,
    contains_media: bool,
    contains_code: bool,
    last_processed_at: DateTime<Utc>,
}
impl RichTextRecord {
    pub(super) fn to_domain(self) -> PortResult<RichTextContent> {
        Ok(RichTextContent {
            target: target(&self.target_kind, self.target_id)?,
            format: parse(&self.format)?,
            raw_body: self.raw_body,
            rendered_html: self.rendered_html,
            flags: RichTextFlags {
                has_mentions: self.has_mentions,
                has_attachments: self.has_attachments,
                contains_media: self.contains_media,
                contains_code: self.contains_code,
            },
            last_processed_at: self.last_processed_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct AttachmentRecord {
    position: i32,
    handle: String,
    file_name: String,
    mime_type: String,
    size_bytes: i64,
    is_safe: bool,
}
impl AttachmentRecord {
    pub(super) fn to_domain(self, target: TargetRef) -> Attachment {
        Attachment {
            target,
            handle: self.handle,
            file_name: self.file_name,
            mime_type: self.mime_type,
            size_bytes: unsigned(self.size_bytes),
            is_safe: self.is_safe,
            position: self.position.max(0) as u32,
        }
    }
}

#[derive(FromRow)]
pub(super) struct CodeBlockRecord {
    position: i32,
    language: String,
    code: String,
}
impl CodeBlockRecord {
    pub(super) fn to_domain(self, target: TargetRef) -> CodeBlock {
        CodeBlock {
            target,
            language: self.language,
            code: self.code,
            position: self.position.max(0) as u32,
        }
    }
}

#[derive(FromRow)]
pub(super) struct QuoteRecord {
    position: i32,
    source_kind: String,
    source_id: i64,
    quoted_body: String,
}
impl QuoteRecord {
    pub(super) fn to_domain(self, target_ref: TargetRef) -> PortResult<Quote> {
        Ok(Quote {
            target: target_ref,
            source: target(&self.source_kind, self.source_id)?,
            quoted_body: self.quoted_body,
            position: self.position.max(0) as u32,
        })
    }
}

#[derive(FromRow)]
pub(super) struct MentionRecord {
    mentioned_user_id: i64,
    handle: String,
}
impl MentionRecord {
    pub(super) fn to_domain(self, target: TargetRef) -> TextMention {
        TextMention {
            target,
            mentioned_user_id: unsigned(self.mentioned_user_id),
            handle: self.handle,
        }
    }
}

//=========================================================================================
// Content Links
//=========================================================================================

#[derive(FromRow)]
pub(super) struct ContentLinkRecord {
    id: i64,
    topic_id: i64,
    content_kind: String,
    content_id: i64,
    created_by: i64,
    is_auto_generated: bool,
    is_highlighted: bool,
    template_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ContentLinkRecord {
    pub(super) fn to_domain(self) -> PortResult<ContentLink> {
        Ok(ContentLink {
            id: unsigned(self.id),
            topic_id: unsigned(self.topic_id),
            content_kind: parse(&self.content_kind)?,
            content_id: unsigned(self.content_id),
            created_by: unsigned(self.created_by),
            is_auto_generated: self.is_auto_generated,
            is_highlighted: self.is_highlighted,
            template_id: opt_unsigned(self.template_id),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct CitationRecord {
    id: i64,
    comment_id: i64,
    content_kind: String,
    content_id: i64,
    citation_text: String,
    citation_context: String,
    created_by: i64,
    created_at: DateTime<Utc>,
}
impl CitationRecord {
    pub(super) fn to_domain(self) -> PortResult<CommentContentLink> {
        Ok(CommentContentLink {
            id: unsigned(self.id),
            comment_id: unsigned(self.comment_id),
            content_kind: parse(&self.content_kind)?,
            content_id: unsigned(self.content_id),
            citation_text: self.citation_text,
            citation_context: self.citation_context,
            created_by: unsigned(self.created_by),
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct TemplateRecord {
    id: i64,
    name: String,
    content_kind: String,
    title_template: String,
    body_template: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl TemplateRecord {
    pub(super) fn to_domain(self) -> PortResult<TopicTemplate> {
        Ok(TopicTemplate {
            id: unsigned(self.id),
            name: self.name,
            content_kind: parse(&self.content_kind)?,
            title_template: self.title_template,
            body_template: self.body_template,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct RecommendationRecord {
    id: i64,
    content_kind: String,
    content_id: i64,
    topic_id: i64,
    recommendation_score: f64,
    created_at: DateTime<Utc>,
}
impl RecommendationRecord {
    pub(super) fn to_domain(self) -> PortResult<ContentDiscussionRecommendation> {
        Ok(ContentDiscussionRecommendation {
            id: unsigned(self.id),
            content_kind: parse(&self.content_kind)?,
            content_id: unsigned(self.content_id),
            topic_id: unsigned(self.topic_id),
            recommendation_score: self.recommendation_score,
            created_at: self.created_at,
        })
    }
}

//=========================================================================================
// Moderation and Trust
//=========================================================================================

#[derive(FromRow)]
pub(super) struct RuleRecord {
    id: i64,
    name: String,
    applies_to: String,
    pattern_kind: String,
    pattern: String,
    action: String,
    severity: i16,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl RuleRecord {
    pub(super) fn to_domain(self) -> PortResult<ModerationRule> {
        Ok(ModerationRule {
            id: unsigned(self.id),
            name: self.name,
            applies_to: parse(&self.applies_to)?,
            pattern_kind: parse(&self.pattern_kind)?,
            pattern: self.pattern,
            action: parse(&self.action)?,
            severity: self.severity.clamp(0, i16::from(u8::MAX)) as u8,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct WordRecord {
    id: i64,
    word: String,
    is_regex: bool,
    severity: i16,
    action: String,
    replacement: Option<String>,
    is_auto_replace: bool,
    is_active: bool,
    created_at: DateTime<Utc>,
}
impl WordRecord {
    pub(super) fn to_domain(self) -> PortResult<ProhibitedWord> {
        Ok(ProhibitedWord {
            id: unsigned(self.id),
            word: self.word,
            is_regex: self.is_regex,
            severity: self.severity.clamp(0, i16::from(u8::MAX)) as u8,
            action: parse(&self.action)?,
            replacement: self.replacement,
            is_auto_replace: self.is_auto_replace,
            is_active: self.is_active,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct FilterResultRecord {
    id: i64,
    target_kind: String,
    target_id: Option<i64>,
    author_id: i64,
    triggered_rule_ids: Vec<i64>,
    triggered_word_ids: Vec<i64>,
    action: String,
    raw_body: String,
    cleaned_body: Option<String>,
    automatically_processed: bool,
    moderator_id: Option<i64>,
    reviewed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}
impl FilterResultRecord {
    pub(super) fn to_domain(self) -> PortResult<ContentFilterResult> {
        Ok(ContentFilterResult {
            id: unsigned(self.id),
            target_kind: parse(&self.target_kind)?,
            target_id: opt_unsigned(self.target_id),
            author_id: unsigned(self.author_id),
            triggered_rule_ids: id_list(self.triggered_rule_ids),
            triggered_word_ids: id_list(self.triggered_word_ids),
            action: parse(&self.action)?,
            raw_body: self.raw_body,
            cleaned_body: self.cleaned_body,
            automatically_processed: self.automatically_processed,
            moderator_id: opt_unsigned(self.moderator_id),
            reviewed_at: self.reviewed_at,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct QueueItemRecord {
    id: i64,
    target_kind: String,
    target_id: i64,
    author_id: i64,
    reason: String,
    filter_result_id: Option<i64>,
    status: String,
    priority: i16,
    assigned_to: Option<i64>,
    reviewed_by: Option<i64>,
    reviewed_at: Option<DateTime<Utc>>,
    decision: Option<String>,
    notes: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl QueueItemRecord {
    pub(super) fn to_domain(self) -> PortResult<ModerationQueueItem> {
        Ok(ModerationQueueItem {
            id: unsigned(self.id),
            target: target(&self.target_kind, self.target_id)?,
            author_id: unsigned(self.author_id),
            reason: self.reason,
            filter_result_id: opt_unsigned(self.filter_result_id),
            status: parse(&self.status)?,
            priority: self.priority.clamp(1, 5) as u8,
            assigned_to: opt_unsigned(self.assigned_to),
            reviewed_by: opt_unsigned(self.reviewed_by),
            reviewed_at: self.reviewed_at,
            decision: self.decision.as_deref().map(parse).transpose()?,
            notes: self.notes,
            version: unsigned(self.version),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct GrantRecord {
    user_id: i64,
    is_global: bool,
    can_approve_content: bool,
    can_reject_content: bool,
    can_delete_content: bool,
    can_ban_users: bool,
    can_edit_any_content: bool,
    can_manage_rules: bool,
    can_assign_moderators: bool,
    is_active: bool,
    assigned_by: i64,
    assigned_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}
impl GrantRecord {
    pub(super) fn to_domain(self) -> ModeratorGrant {
        ModeratorGrant {
            user_id: unsigned(self.user_id),
            is_global: self.is_global,
            can_approve_content: self.can_approve_content,
            can_reject_content: self.can_reject_content,
            can_delete_content: self.can_delete_content,
            can_ban_users: self.can_ban_users,
            can_edit_any_content: self.can_edit_any_content,
            can_manage_rules: self.can_manage_rules,
            can_assign_moderators: self.can_assign_moderators,
            is_active: self.is_active,
            assigned_by: unsigned(self.assigned_by),
            assigned_at: self.assigned_at,
            expires_at: self.expires_at,
        }
    }
}

#[derive(FromRow)]
pub(super) struct UserActionRecord {
    id: i64,
    user_id: i64,
    action_kind: String,
    reason: String,
    applied_by: i64,
    applied_at: DateTime<Utc>,
    duration_hours: Option<i32>,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
    revoked_by: Option<i64>,
    revoked_at: Option<DateTime<Utc>>,
    related_target_kind: Option<String>,
    related_target_id: Option<i64>,
}
impl UserActionRecord {
    pub(super) fn to_domain(self) -> PortResult<UserModerationAction> {
        let related_target = match (self.related_target_kind.as_deref(), self.related_target_id) {
            (Some(kind), Some(id)) => Some(target(kind, id)?),
            _ => None,
        };
        Ok(UserModerationAction {
            id: unsigned(self.id),
            user_id: unsigned(self.user_id),
            action_kind: parse(&self.action_kind)?,
            reason: self.reason,
            applied_by: unsigned(self.applied_by),
            applied_at: self.applied_at,
            duration_hours: self.duration_hours.map(|h| h.max(0) as u32),
            expires_at: self.expires_at,
            is_active: self.is_active,
            revoked_by: opt_unsigned(self.revoked_by),
            revoked_at: self.revoked_at,
            related_target,
        })
    }
}

#[derive(FromRow)]
pub(super) struct TrustRecord {
    user_id: i64,
    level: String,
    score: f64,
    content_score: f64,
    community_score: f64,
    moderator_score: f64,
    report_count: i32,
    warning_count: i32,
    content_rejections: i32,
    last_calculated_at: DateTime<Utc>,
    manual_adjustment: f64,
    manual_adjustment_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl TrustRecord {
    pub(super) fn to_domain(self) -> PortResult<UserTrustScore> {
        Ok(UserTrustScore {
            user_id: unsigned(self.user_id),
            level: parse(&self.level)?,
            score: self.score,
            content_score: self.content_score,
            community_score: self.community_score,
            moderator_score: self.moderator_score,
            report_count: self.report_count.max(0) as u32,
            warning_count: self.warning_count.max(0) as u32,
            content_rejections: self.content_rejections.max(0) as u32,
            last_calculated_at: self.last_calculated_at,
            manual_adjustment: self.manual_adjustment,
            manual_adjustment_reason: self.manual_adjustment_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

//=========================================================================================
// Reports
//=========================================================================================

#[derive(FromRow)]
pub(super) struct ReportRecord {
    id: i64,
    reporter_id: i64,
    target_kind: String,
    target_id: i64,
    category: String,
    reason: String,
    additional_info: String,
    status: String,
    assigned_to: Option<i64>,
    resolved_by: Option<i64>,
    resolution: Option<String>,
    resolution_notes: String,
    reporter_notified: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ReportRecord {
    pub(super) fn to_domain(self) -> PortResult<ContentReport> {
        Ok(ContentReport {
            id: unsigned(self.id),
            reporter_id: unsigned(self.reporter_id),
            target: target(&self.target_kind, self.target_id)?,
            category: parse(&self.category)?,
            reason: self.reason,
            additional_info: self.additional_info,
            status: parse(&self.status)?,
            assigned_to: opt_unsigned(self.assigned_to),
            resolved_by: opt_unsigned(self.resolved_by),
            resolution: self.resolution.as_deref().map(parse).transpose()?,
            resolution_notes: self.resolution_notes,
            reporter_notified: self.reporter_notified,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct EvidenceRecord {
    id: i64,
    report_id: i64,
    kind: String,
    content: String,
    added_by: i64,
    created_at: DateTime<Utc>,
}
impl EvidenceRecord {
    pub(super) fn to_domain(self) -> PortResult<ReportEvidence> {
        Ok(ReportEvidence {
            id: unsigned(self.id),
            report_id: unsigned(self.report_id),
            kind: parse(&self.kind)?,
            content: self.content,
            added_by: unsigned(self.added_by),
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct ReportCommentRecord {
    id: i64,
    report_id: i64,
    author_id: i64,
    body: String,
    is_internal: bool,
    created_at: DateTime<Utc>,
}
impl ReportCommentRecord {
    pub(super) fn to_domain(self) -> ReportComment {
        ReportComment {
            id: unsigned(self.id),
            report_id: unsigned(self.report_id),
            author_id: unsigned(self.author_id),
            body: self.body,
            is_internal: self.is_internal,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
pub(super) struct ReportLogRecord {
    id: i64,
    report_id: i64,
    actor_id: i64,
    action: String,
    details: serde_json::Value,
    created_at: DateTime<Utc>,
}
impl ReportLogRecord {
    pub(super) fn to_domain(self) -> PortResult<ReportActionLog> {
        Ok(ReportActionLog {
            id: unsigned(self.id),
            report_id: unsigned(self.report_id),
            actor_id: unsigned(self.actor_id),
            action: parse(&self.action)?,
            details: self.details,
            created_at: self.created_at,
        })
    }
}

//=========================================================================================
// Subscriptions and Delivery
//=========================================================================================

#[derive(FromRow)]
pub(super) struct SubscriptionRecord {
    id: i64,
    user_id: i64,
    subject_kind: String,
    subject_id: i64,
    frequency: String,
    email_enabled: bool,
    push_enabled: bool,
    in_app_enabled: bool,
    muted: bool,
    last_notified_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl SubscriptionRecord {
    pub(super) fn to_domain(self) -> PortResult<Subscription> {
        Ok(Subscription {
            id: unsigned(self.id),
            user_id: unsigned(self.user_id),
            subject_kind: parse(&self.subject_kind)?,
            subject_id: unsigned(self.subject_id),
            frequency: parse(&self.frequency)?,
            email_enabled: self.email_enabled,
            push_enabled: self.push_enabled,
            in_app_enabled: self.in_app_enabled,
            muted: self.muted,
            last_notified_at: self.last_notified_at,
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct PreferenceRecord {
    user_id: i64,
    default_frequency: String,
    email_enabled: bool,
    push_enabled: bool,
    in_app_enabled: bool,
    digest_day: i16,
    digest_hour: i16,
    utc_offset_minutes: i32,
    auto_subscribe_to_created: bool,
    auto_subscribe_to_replies: bool,
    updated_at: DateTime<Utc>,
}
impl PreferenceRecord {
    pub(super) fn to_domain(self) -> PortResult<SubscriptionPreference> {
        Ok(SubscriptionPreference {
            user_id: unsigned(self.user_id),
            default_frequency: parse(&self.default_frequency)?,
            email_enabled: self.email_enabled,
            push_enabled: self.push_enabled,
            in_app_enabled: self.in_app_enabled,
            digest_day: self.digest_day.clamp(0, 6) as u8,
            digest_hour: self.digest_hour.clamp(0, 23) as u8,
            utc_offset_minutes: self.utc_offset_minutes,
            auto_subscribe_to_created: self.auto_subscribe_to_created,
            auto_subscribe_to_replies: self.auto_subscribe_to_replies,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct ActivityRecord {
    id: i64,
    subject_kind: String,
    subject_id: i64,
    kind: String,
    topic_id: i64,
    topic_title: String,
    actor_id: i64,
    occurred_at: DateTime<Utc>,
}
impl ActivityRecord {
    pub(super) fn to_domain(self) -> PortResult<ActivityEvent> {
        Ok(ActivityEvent {
            id: unsigned(self.id),
            subject_kind: parse(&self.subject_kind)?,
            subject_id: unsigned(self.subject_id),
            kind: parse(&self.kind)?,
            topic_id: unsigned(self.topic_id),
            topic_title: self.topic_title,
            actor_id: unsigned(self.actor_id),
            occurred_at: self.occurred_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct DigestRecord {
    id: i64,
    user_id: i64,
    frequency: String,
    payload: Json<DigestPayload>,
    scheduled_for: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    status: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
}
impl DigestRecord {
    pub(super) fn to_domain(self) -> PortResult<SubscriptionDigest> {
        Ok(SubscriptionDigest {
            id: unsigned(self.id),
            user_id: unsigned(self.user_id),
            frequency: parse(&self.frequency)?,
            payload: self.payload.0,
            scheduled_for: self.scheduled_for,
            sent_at: self.sent_at,
            status: parse(&self.status)?,
            error: self.error,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct OutboxRecord {
    id: i64,
    user_id: i64,
    channel: String,
    notification: Json<Notification>,
    status: String,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl OutboxRecord {
    pub(super) fn to_domain(self) -> PortResult<OutboxMessage> {
        Ok(OutboxMessage {
            id: unsigned(self.id),
            user_id: unsigned(self.user_id),
            channel: parse(&self.channel)?,
            notification: self.notification.0,
            status: parse(&self.status)?,
            attempts: self.attempts.max(0) as u32,
            next_attempt_at: self.next_attempt_at,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

//=========================================================================================
// Collaborator Mirrors
//=========================================================================================

#[derive(FromRow)]
pub(super) struct UserRecord {
    id: i64,
    handle: String,
    created_at: DateTime<Utc>,
}
impl UserRecord {
    pub(super) fn to_domain(self) -> UserProfile {
        UserProfile {
            id: unsigned(self.id),
            handle: self.handle,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
pub(super) struct ContentMetadataRecord {
    title: String,
    summary: String,
    owner_id: i64,
    tags: Vec<String>,
}
impl ContentMetadataRecord {
    pub(super) fn to_domain(self) -> ContentMetadata {
        ContentMetadata {
            title: self.title,
            summary: self.summary,
            owner_id: unsigned(self.owner_id),
            tags: self.tags,
        }
    }
}
