//! The moderation queue, user moderation actions and moderator grants.

use crate::domain::{
    Channel, ContentMutation, ModerationQueueItem, ModeratorGrant, NewOutboxMessage, NewUserModerationAction,
    Notification, NotificationKind, Page, PageRequest, Permission, Permissions, Principal, QueueDecision, QueueResolution,
    QueueStatus, TargetKind, TargetRef, UserActionKind, UserModerationAction, UserTrustScore,
};
use crate::error::{ForumError, ForumResult};
use crate::ports::{Clock, DiscussionStore, PortError};
use crate::services::discussion::resolve_config;
use crate::services::{AccessControl, Ports, SubscriptionEngine, TrustEngine};
use crate::settings::ForumSettings;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const CLAIM_ATTEMPTS: usize = 5;

/// A moderator's verdict on a queue item.
#[derive(Debug, Clone)]
pub struct DecideRequest {
    pub decision: QueueDecision,
    pub notes: String,
    /// Explicit action against the author; rejection may derive one from severity otherwise.
    pub user_action: Option<UserActionRequest>,
}

#[derive(Debug, Clone)]
pub struct UserActionRequest {
    pub kind: UserActionKind,
    pub reason: String,
    pub duration_hours: Option<u32>,
    pub related_target: Option<TargetRef>,
}

/// Grant flags as set by an administrator.
#[derive(Debug, Clone, Default)]
pub struct GrantRequest {
    pub is_global: bool,
    pub can_approve_content: bool,
    pub can_reject_content: bool,
    pub can_delete_content: bool,
    pub can_ban_users: bool,
    pub can_edit_any_content: bool,
    pub can_manage_rules: bool,
    pub can_assign_moderators: bool,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct ModerationQueue {
    store: Arc<dyn DiscussionStore>,
    clock: Arc<dyn Clock>,
    access: Arc<AccessControl>,
    trust: Arc<TrustEngine>,
    subscriptions: Arc<SubscriptionEngine>,
    settings: Arc<ForumSettings>,
}

impl ModerationQueue {
    pub fn new(
        ports: &Ports,
        access: Arc<AccessControl>,
        trust: Arc<TrustEngine>,
        subscriptions: Arc<SubscriptionEngine>,
        settings: Arc<ForumSettings>,
    ) -> Self {
        Self {
            store: ports.store.clone(),
            clock: ports.clock.clone(),
            access,
            trust,
            subscriptions,
            settings,
        }
    }

    //=====================================================================================
    // Queue
    //=====================================================================================

    /// Highest priority first, then oldest first.
    pub async fn list(
        &self,
        principal: &Principal,
        status: Option<QueueStatus>,
        page: PageRequest,
    ) -> ForumResult<Page<ModerationQueueItem>> {
        self.access.require_moderator(principal, None).await?;
        Ok(self.store.list_queue(status, page).await?)
    }

    pub async fn get(&self, principal: &Principal, id: u64) -> ForumResult<ModerationQueueItem> {
        let item = self.store.get_queue_item(id).await?;
        self.require_for(principal, &item).await?;
        Ok(item)
    }

    /// `pending → inReview` for the caller. Claiming an item you already hold
    /// is a no-op; an item held by someone else is a conflict.
    pub async fn claim(&self, principal: &Principal, id: u64) -> ForumResult<ModerationQueueItem> {
        let item = self.store.get_queue_item(id).await?;
        self.require_for(principal, &item).await?;
        match item.status {
            QueueStatus::Pending => {
                let claimed = self
                    .store
                    .transition_queue_item(id, item.version, QueueStatus::InReview, Some(principal.user_id), self.clock.now())
                    .await?;
                info!(queue_id = id, moderator = principal.user_id, "Queue item claimed");
                Ok(claimed)
            }
            QueueStatus::InReview if item.assigned_to == Some(principal.user_id) => Ok(item),
            QueueStatus::InReview => Err(ForumError::Conflict(format!(
                "queue item {id} is already under review"
            ))),
            status => Err(ForumError::validation(format!("queue item {id} is already {status}"))),
        }
    }

    /// Claims the most urgent pending item, skipping items lost to other moderators.
    pub async fn claim_next(&self, principal: &Principal) -> ForumResult<Option<ModerationQueueItem>> {
        self.access.require_moderator(principal, None).await?;
        for _ in 0..CLAIM_ATTEMPTS {
            let Some(item) = self.store.next_pending_queue_item().await? else {
                return Ok(None);
            };
            match self
                .store
                .transition_queue_item(item.id, item.version, QueueStatus::InReview, Some(principal.user_id), self.clock.now())
                .await
            {
                Ok(claimed) => {
                    info!(queue_id = claimed.id, moderator = principal.user_id, "Queue item claimed");
                    return Ok(Some(claimed));
                }
                Err(PortError::Conflict(_)) => {
                    debug!(queue_id = item.id, "Lost claim race; trying the next item");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(None)
    }

    /// Assigns (or reassigns) an open item; the previous assignee loses it.
    pub async fn assign(&self, principal: &Principal, id: u64, assignee: u64) -> ForumResult<ModerationQueueItem> {
        let item = self.store.get_queue_item(id).await?;
        let permissions = self.require_for(principal, &item).await?;
        let own_item = item.assigned_to == Some(principal.user_id);
        if !permissions.assign_moderators && !own_item {
            return Err(ForumError::forbidden("missing permission assignModerators"));
        }
        if !item.status.can_transition_to(QueueStatus::InReview) {
            return Err(ForumError::validation(format!("queue item {id} is already {}", item.status)));
        }
        let assigned = self
            .store
            .transition_queue_item(id, item.version, QueueStatus::InReview, Some(assignee), self.clock.now())
            .await?;
        info!(queue_id = id, from = ?item.assigned_to, to = assignee, by = principal.user_id, "Queue item assigned");
        Ok(assigned)
    }

    /// `inReview → approved | rejected`, committed together with the content
    /// change, any user action and the author's notifications.
    pub async fn decide(&self, principal: &Principal, id: u64, request: DecideRequest) -> ForumResult<ModerationQueueItem> {
        let item = self.store.get_queue_item(id).await?;
        let category_id = self.access.category_of(item.target).await?;
        let needed = match request.decision {
            QueueDecision::Approve => Permission::ApproveContent,
            QueueDecision::Reject => Permission::RejectContent,
        };
        let permissions = self.access.require(principal, needed, Some(category_id)).await?;

        if item.status != QueueStatus::InReview {
            return Err(ForumError::validation(format!(
                "queue item {id} must be claimed before a decision ({})",
                item.status
            )));
        }
        if item.assigned_to != Some(principal.user_id) && !principal.is_admin() {
            return Err(ForumError::forbidden("queue item is assigned to another moderator"));
        }

        let now = self.clock.now();
        let (status, mutation) = match request.decision {
            QueueDecision::Approve => (QueueStatus::Approved, ContentMutation::Publish),
            QueueDecision::Reject => {
                let config = resolve_config(self.store.as_ref(), category_id, now).await?;
                (QueueStatus::Rejected, ContentMutation::SoftDelete { policy: config.deletion_policy })
            }
        };

        let user_action = match (request.decision, request.user_action) {
            (_, Some(explicit)) => {
                if explicit.kind != UserActionKind::Warn && !permissions.ban_users {
                    return Err(ForumError::forbidden("missing permission banUsers"));
                }
                Some(NewUserModerationAction {
                    user_id: item.author_id,
                    action_kind: explicit.kind,
                    reason: explicit.reason,
                    applied_by: principal.user_id,
                    applied_at: now,
                    duration_hours: explicit.duration_hours,
                    related_target: Some(explicit.related_target.unwrap_or(item.target)),
                })
            }
            (QueueDecision::Reject, None) => self.severity_action(&item, principal.user_id, now).await?,
            (QueueDecision::Approve, None) => None,
        };

        let mut notifications = vec![NewOutboxMessage {
            user_id: item.author_id,
            channel: Channel::InApp,
            notification: match request.decision {
                QueueDecision::Approve => Notification::new(
                    NotificationKind::ContentApproved,
                    "Your post was approved",
                    format!("Your {} is now visible.", item.target.kind),
                ),
                QueueDecision::Reject => Notification::new(
                    NotificationKind::ContentRejected,
                    "Your post was rejected",
                    if request.notes.is_empty() {
                        format!("Your {} was removed by a moderator.", item.target.kind)
                    } else {
                        request.notes.clone()
                    },
                ),
            }
            .with_target(item.target),
            created_at: now,
        }];
        if let Some(action) = &user_action {
            notifications.push(user_action_notice(action));
        }

        let resolved = self
            .store
            .resolve_queue_item(
                id,
                item.version,
                QueueResolution {
                    status,
                    decision: request.decision,
                    reviewed_by: principal.user_id,
                    notes: request.notes,
                    mutation,
                    user_action: user_action.clone(),
                    notifications,
                    reviewed_at: now,
                },
            )
            .await?;
        info!(
            queue_id = id,
            target = %item.target,
            decision = %request.decision,
            moderator = principal.user_id,
            "Queue item resolved"
        );

        self.after_decision(&resolved, user_action.as_ref()).await;
        Ok(resolved)
    }

    /// Reverts `inReview` items untouched for the stale interval back to `pending`.
    #[instrument(skip(self))]
    pub async fn reap_stale_reviews(&self) -> ForumResult<Vec<u64>> {
        let now = self.clock.now();
        let reverted = self
            .store
            .revert_stale_reviews(now - self.settings.queue_stale_after, now)
            .await?;
        if !reverted.is_empty() {
            info!(count = reverted.len(), ids = ?reverted, "Stale reviews returned to the queue");
        }
        Ok(reverted)
    }

    /// Moderator access in the category of the queued content.
    async fn require_for(&self, principal: &Principal, item: &ModerationQueueItem) -> ForumResult<Permissions> {
        let category_id = match self.access.category_of(item.target).await {
            Ok(id) => Some(id),
            Err(ForumError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };
        self.access.require_moderator(principal, category_id).await
    }

    /// Severity 5 suspends the author for a day and severity 4 warns them.
    async fn severity_action(
        &self,
        item: &ModerationQueueItem,
        moderator: u64,
        now: DateTime<Utc>,
    ) -> ForumResult<Option<NewUserModerationAction>> {
        let Some(result_id) = item.filter_result_id else {
            return Ok(None);
        };
        let result = self.store.get_filter_result(result_id).await?;
        let mut severity = 0;
        for rule_id in &result.triggered_rule_ids {
            match self.store.get_rule(*rule_id).await {
                Ok(rule) => severity = severity.max(rule.severity),
                Err(PortError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        if !result.triggered_word_ids.is_empty() {
            for word in self.store.list_words(false).await? {
                if result.triggered_word_ids.contains(&word.id) {
                    severity = severity.max(word.severity);
                }
            }
        }
        let (kind, duration_hours) = match severity {
            5 => (UserActionKind::Suspend, Some(24)),
            4 => (UserActionKind::Warn, None),
            _ => return Ok(None),
        };
        Ok(Some(NewUserModerationAction {
            user_id: item.author_id,
            action_kind: kind,
            reason: format!("content rejected at severity {severity}"),
            applied_by: moderator,
            applied_at: now,
            duration_hours,
            related_target: Some(item.target),
        }))
    }

    /// Fan-out and trust bookkeeping once the decision is committed.
    async fn after_decision(&self, item: &ModerationQueueItem, user_action: Option<&NewUserModerationAction>) {
        let outcome = match item.decision {
            Some(QueueDecision::Approve) => self.publish(item.target).await,
            Some(QueueDecision::Reject) => self.trust.record_rejection(item.author_id).await.map(|_| ()),
            None => Ok(()),
        };
        if let Err(err) = outcome {
            warn!(queue_id = item.id, error = %err, "Post-decision follow-up failed");
        }
        if let Some(action) = user_action.filter(|a| a.action_kind == UserActionKind::Warn) {
            if let Err(err) = self.trust.record_warning(action.user_id).await {
                warn!(user_id = action.user_id, error = %err, "Failed to record warning");
            }
        }
    }

    async fn publish(&self, target: TargetRef) -> ForumResult<()> {
        let mentioned = match self.store.get_rich_text(target).await? {
            Some(bundle) => bundle.mentions.iter().map(|m| m.mentioned_user_id).collect(),
            None => Vec::new(),
        };
        match target.kind {
            TargetKind::Topic => {
                let topic = self.store.get_topic(target.id).await?;
                self.subscriptions.topic_published(&topic).await?;
                self.subscriptions.notify_mentions(topic.author_id, target, &mentioned).await
            }
            TargetKind::Comment => {
                let comment = self.store.get_comment(target.id).await?;
                let topic = self.store.get_topic(comment.topic_id).await?;
                self.subscriptions.comment_published(&topic, &comment).await?;
                self.subscriptions.notify_mentions(comment.author_id, target, &mentioned).await
            }
        }
    }

    //=====================================================================================
    // User moderation actions
    //=====================================================================================

    /// Warnings need any moderation capability; everything else needs `banUsers`.
    pub async fn apply_action(
        &self,
        principal: &Principal,
        user_id: u64,
        request: UserActionRequest,
    ) -> ForumResult<UserModerationAction> {
        match request.kind {
            UserActionKind::Warn => self.access.require_moderator(principal, None).await?,
            _ => self.access.require(principal, Permission::BanUsers, None).await?,
        };
        if request.reason.trim().is_empty() {
            return Err(ForumError::validation("a moderation action needs a reason"));
        }
        let duration_hours = match request.kind {
            UserActionKind::PermanentBan | UserActionKind::Warn => None,
            UserActionKind::TemporaryBan | UserActionKind::Suspend if request.duration_hours.is_none() => {
                return Err(ForumError::validation(format!("{} needs a duration", request.kind)));
            }
            _ => request.duration_hours,
        };
        let new_action = NewUserModerationAction {
            user_id,
            action_kind: request.kind,
            reason: request.reason,
            applied_by: principal.user_id,
            applied_at: self.clock.now(),
            duration_hours,
            related_target: request.related_target,
        };
        let notice = user_action_notice(&new_action);
        let action = self.store.create_user_action(new_action).await?;
        info!(
            user_id,
            action = %action.action_kind,
            by = principal.user_id,
            expires_at = ?action.expires_at,
            "User moderation action applied"
        );
        if let Err(err) = self.store.enqueue_outbox(vec![notice]).await {
            warn!(user_id, error = %err, "Failed to queue moderation notice");
        }
        let trust = match action.action_kind {
            UserActionKind::Warn => self.trust.record_warning(user_id).await,
            _ => self.trust.recalculate(user_id).await,
        };
        if let Err(err) = trust {
            warn!(user_id, error = %err, "Trust update after moderation action failed");
        }
        Ok(action)
    }

    /// Moderators see anyone's history; members only their own.
    pub async fn list_actions(&self, principal: &Principal, user_id: u64) -> ForumResult<Vec<UserModerationAction>> {
        if principal.user_id != user_id || principal.is_guest() {
            self.access.require_moderator(principal, None).await?;
        }
        Ok(self.store.list_user_actions(user_id).await?)
    }

    pub async fn revoke_action(&self, principal: &Principal, id: u64) -> ForumResult<UserModerationAction> {
        let action = self.store.get_user_action(id).await?;
        match action.action_kind {
            UserActionKind::Warn => self.access.require_moderator(principal, None).await?,
            _ => self.access.require(principal, Permission::BanUsers, None).await?,
        };
        if !action.is_active {
            return Err(ForumError::validation(format!("action {id} is already revoked")));
        }
        let revoked = self.store.revoke_user_action(id, principal.user_id, self.clock.now()).await?;
        info!(action_id = id, user_id = revoked.user_id, by = principal.user_id, "User moderation action revoked");
        Ok(revoked)
    }

    //=====================================================================================
    // Grants
    //=====================================================================================

    pub async fn grant(&self, principal: &Principal, user_id: u64, request: GrantRequest) -> ForumResult<ModeratorGrant> {
        self.access.require(principal, Permission::AssignModerators, None).await?;
        let grant = self
            .store
            .upsert_moderator_grant(ModeratorGrant {
                user_id,
                is_global: request.is_global,
                can_approve_content: request.can_approve_content,
                can_reject_content: request.can_reject_content,
                can_delete_content: request.can_delete_content,
                can_ban_users: request.can_ban_users,
                can_edit_any_content: request.can_edit_any_content,
                can_manage_rules: request.can_manage_rules,
                can_assign_moderators: request.can_assign_moderators,
                is_active: request.is_active,
                assigned_by: principal.user_id,
                assigned_at: self.clock.now(),
                expires_at: request.expires_at,
            })
            .await?;
        info!(user_id, by = principal.user_id, global = grant.is_global, "Moderator grant saved");
        Ok(grant)
    }

    pub async fn get_grant(&self, principal: &Principal, user_id: u64) -> ForumResult<ModeratorGrant> {
        if principal.user_id != user_id || principal.is_guest() {
            self.access.require(principal, Permission::AssignModerators, None).await?;
        }
        self.store
            .get_moderator_grant(user_id)
            .await?
            .ok_or_else(|| ForumError::not_found(format!("moderator grant for user {user_id}")))
    }

    /// A user's trust row, visible to moderators and to the user themselves.
    pub async fn trust_of(&self, principal: &Principal, user_id: u64) -> ForumResult<UserTrustScore> {
        if principal.user_id != user_id || principal.is_guest() {
            self.access.require_moderator(principal, None).await?;
        }
        self.trust.score(user_id).await
    }
}

fn user_action_notice(action: &NewUserModerationAction) -> NewOutboxMessage {
    let body = match action.expires_at() {
        Some(until) => format!("{}: {} (until {})", action.action_kind, action.reason, until.to_rfc3339()),
        None => format!("{}: {}", action.action_kind, action.reason),
    };
    NewOutboxMessage {
        user_id: action.user_id,
        channel: Channel::InApp,
        notification: Notification::new(NotificationKind::UserAction, "A moderator took action on your account", body)
            .with_data(serde_json::json!({ "actionKind": action.action_kind })),
        created_at: action.applied_at,
    }
}
