//! crates/forum_core/src/services/discussion/mod.rs
//!
//! The primary discussion API: categories, topics, comments, reactions and
//! tags, with the posting rules that gate them.

mod categories;
mod comments;
mod reactions;
mod topics;

pub use categories::CategoryConfigInput;
pub use comments::{CreateComment, EditComment};
pub use topics::{CreateTopic, UpdateTopic};

use crate::domain::{
    Category, CategoryConfig, FilterAction, FilterDecision, ModerationRecord, NewQueueEntry, Permissions, Principal,
    ProcessedText, TargetKind, TextFormat, TrustLevel,
};
use crate::error::{ForumError, ForumResult};
use crate::ports::{CacheService, Clock, DiscussionStore, PortError, TokenBucket, UserDirectory};
use crate::services::filter::moderation_record;
use crate::services::{
    enforce_rate_limit, AccessControl, ContentFilter, Ports, RichTextProcessor, SubscriptionEngine, TrustEngine,
};
use crate::settings::ForumSettings;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Priority of queue entries created by posting rules rather than the filter.
const HOLD_PRIORITY: u8 = 3;

/// The config in force for a category: its own, else the nearest ancestor's,
/// else the defaults.
pub(crate) async fn resolve_config(
    store: &dyn DiscussionStore,
    category_id: u64,
    now: DateTime<Utc>,
) -> ForumResult<CategoryConfig> {
    let mut seen = HashSet::new();
    let mut current = Some(store.get_category(category_id).await?);
    while let Some(category) = current {
        if !seen.insert(category.id) {
            break;
        }
        if let Some(mut config) = store.get_category_config(category.id).await? {
            config.category_id = category_id;
            return Ok(config);
        }
        current = match category.parent_id {
            Some(parent_id) => match store.get_category(parent_id).await {
                Ok(parent) => Some(parent),
                Err(PortError::NotFound(_)) => None,
                Err(err) => return Err(err.into()),
            },
            None => None,
        };
    }
    Ok(CategoryConfig::defaults_for(category_id, now))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PostKind {
    Topic,
    Comment,
}

impl PostKind {
    fn action(&self) -> &'static str {
        match self {
            PostKind::Topic => "topic",
            PostKind::Comment => "comment",
        }
    }

    fn target_kind(&self) -> TargetKind {
        match self {
            PostKind::Topic => TargetKind::Topic,
            PostKind::Comment => TargetKind::Comment,
        }
    }
}

/// What the posting rules and the content filter decided about a submission.
pub(crate) struct Screening {
    pub body: String,
    pub text: ProcessedText,
    pub decision: FilterDecision,
    pub is_approved: bool,
    pub is_flagged: bool,
    pub flag_reason: Option<String>,
    pub hold_reason: Option<&'static str>,
}

impl Screening {
    /// Filter result and queue entry to persist with the content.
    pub fn record(
        &self,
        kind: TargetKind,
        target_id: Option<u64>,
        author_id: u64,
        raw_body: &str,
        now: DateTime<Utc>,
    ) -> ModerationRecord {
        let mut record = moderation_record(kind, target_id, author_id, raw_body, &self.decision, now);
        if record.queue_entry.is_none() {
            if let Some(reason) = self.hold_reason {
                record.queue_entry = Some(NewQueueEntry {
                    target_kind: kind,
                    target_id,
                    author_id,
                    reason: reason.to_string(),
                    priority: HOLD_PRIORITY,
                    created_at: now,
                });
            }
        }
        record
    }
}

pub struct Discussion {
    store: Arc<dyn DiscussionStore>,
    cache: Arc<dyn CacheService>,
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    access: Arc<AccessControl>,
    trust: Arc<TrustEngine>,
    rich_text: Arc<RichTextProcessor>,
    filter: Arc<ContentFilter>,
    subscriptions: Arc<SubscriptionEngine>,
    settings: Arc<ForumSettings>,
}

impl Discussion {
    pub fn new(
        ports: &Ports,
        access: Arc<AccessControl>,
        trust: Arc<TrustEngine>,
        rich_text: Arc<RichTextProcessor>,
        filter: Arc<ContentFilter>,
        subscriptions: Arc<SubscriptionEngine>,
        settings: Arc<ForumSettings>,
    ) -> Self {
        Self {
            store: ports.store.clone(),
            cache: ports.cache.clone(),
            users: ports.users.clone(),
            clock: ports.clock.clone(),
            access,
            trust,
            rich_text,
            filter,
            subscriptions,
            settings,
        }
    }

    //=====================================================================================
    // Posting rules
    //=====================================================================================

    /// Checks every category rule for a new topic or comment. Moderators of
    /// the category skip the age, trust and rate rules.
    pub(crate) async fn check_posting(
        &self,
        principal: &Principal,
        category: &Category,
        config: &CategoryConfig,
        kind: PostKind,
    ) -> ForumResult<Permissions> {
        self.access.require_member(principal)?;
        if !category.is_active {
            return Err(ForumError::validation(format!("category {} is not active", category.id)));
        }
        let permissions = self.access.permissions(principal, Some(category.id)).await?;
        if config.is_restricted && !permissions.is_moderator() {
            return Err(ForumError::forbidden(format!(
                "only moderators may post in category {}",
                category.id
            )));
        }
        self.access.ensure_can_post(principal.user_id).await?;
        if permissions.is_moderator() {
            return Ok(permissions);
        }

        if config.min_account_age_hours > 0 {
            let profile = self.users.get_user(principal.user_id).await?;
            let age = self.clock.now() - profile.created_at;
            if age < Duration::hours(i64::from(config.min_account_age_hours)) {
                return Err(ForumError::forbidden(format!(
                    "accounts must be {} hours old to post here",
                    config.min_account_age_hours
                )));
            }
        }
        if config.min_trust_level > TrustLevel::NewUser {
            let level = self.trust.level(principal.user_id).await?;
            if level < config.min_trust_level {
                return Err(ForumError::forbidden(format!(
                    "trust level {} required, you are {level}",
                    config.min_trust_level
                )));
            }
        }
        let limit = match kind {
            PostKind::Topic => config.max_topics_per_hour,
            PostKind::Comment => config.max_comments_per_hour,
        };
        if let Some(capacity) = limit {
            enforce_rate_limit(
                self.cache.as_ref(),
                principal.user_id,
                kind.action(),
                TokenBucket::per_hour(capacity),
            )
            .await?;
        }
        Ok(permissions)
    }

    /// Runs the content filter and the rich-text processor over a submission.
    /// A `remove` verdict is persisted and returned as `invalidContent`.
    pub(crate) async fn screen(
        &self,
        kind: PostKind,
        author_id: u64,
        format: TextFormat,
        raw_body: &str,
        config: &CategoryConfig,
        permissions: Permissions,
    ) -> ForumResult<Screening> {
        if raw_body.trim().is_empty() {
            return Err(ForumError::validation("body cannot be empty"));
        }
        let decision = if config.auto_moderation {
            self.filter.evaluate(kind.target_kind(), raw_body, author_id).await?
        } else {
            FilterDecision::pass()
        };
        if decision.action == FilterAction::Remove {
            return Err(self.filter.reject(kind.target_kind(), author_id, raw_body, &decision).await?);
        }

        let body = decision.cleaned_body.clone().unwrap_or_else(|| raw_body.to_string());
        let text = self.rich_text.process(format, &body, author_id).await?;

        let needs_approval = config.require_approval
            && !permissions.is_moderator()
            && self.trust.level(author_id).await? < TrustLevel::Member;
        let hold_reason = if text.awaiting_scan() {
            Some("attachment awaiting scan")
        } else if needs_approval {
            Some("category requires approval")
        } else {
            None
        };
        let is_flagged = decision.action.implies_queue();
        let is_approved = !decision.action.withholds_publication() && hold_reason.is_none();
        debug!(
            author_id,
            action = %decision.action,
            is_approved,
            hold = ?hold_reason,
            "Submission screened"
        );
        Ok(Screening {
            flag_reason: is_flagged.then(|| decision.notes.join("; ")).filter(|r| !r.is_empty()),
            body,
            text,
            decision,
            is_approved,
            is_flagged,
            hold_reason,
        })
    }

    /// Checks the author's edit window for a post created at `created_at`.
    pub(crate) fn check_edit_window(&self, config: &CategoryConfig, created_at: DateTime<Utc>) -> ForumResult<()> {
        let window = config
            .edit_window_minutes
            .map(|minutes| Duration::minutes(i64::from(minutes)))
            .or(self.settings.default_edit_window);
        match window {
            Some(window) if self.clock.now() - created_at > window => {
                Err(ForumError::forbidden("the edit window for this post has closed"))
            }
            _ => Ok(()),
        }
    }

    /// Logs a non-fatal follow-up failure.
    fn follow_up(&self, what: &str, outcome: ForumResult<()>) {
        if let Err(err) = outcome {
            warn!(error = %err, "{} failed", what);
        }
    }
}
