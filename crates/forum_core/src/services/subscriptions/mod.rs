//! Subscriptions, instant fan-out and periodic digests.

pub mod digest;

use crate::domain::{
    ActivityKind, Channel, Comment, DigestStatus, Frequency, NewActivityEvent, NewDigest, NewOutboxMessage,
    NewSubscription, Notification, NotificationKind, Page, PageRequest, Principal, SubjectKind, Subscription,
    SubscriptionDigest, SubscriptionPatch, SubscriptionPreference, SubscriptionPreferencePatch, TargetRef, Topic,
};
use crate::error::{ForumError, ForumResult};
use crate::ports::{CacheService, Clock, DiscussionStore, Notifier, PortError};
use crate::services::Ports;
use crate::settings::{ttl, ForumSettings};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What a user asks for when subscribing; unset fields fall back to preferences.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub subject_kind: SubjectKind,
    pub subject_id: u64,
    pub frequency: Option<Frequency>,
    pub channels: Option<Vec<Channel>>,
}

/// Why a user is being subscribed implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoSubscribe {
    Created,
    Replied,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
}

pub struct SubscriptionEngine {
    store: Arc<dyn DiscussionStore>,
    cache: Arc<dyn CacheService>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: Arc<ForumSettings>,
}

impl SubscriptionEngine {
    pub fn new(ports: &Ports, settings: Arc<ForumSettings>) -> Self {
        Self {
            store: ports.store.clone(),
            cache: ports.cache.clone(),
            notifier: ports.notifier.clone(),
            clock: ports.clock.clone(),
            settings,
        }
    }

    //=====================================================================================
    // Subscriptions and preferences
    //=====================================================================================

    /// Upserts on `(user, subjectKind, subjectId)` after checking the subject exists.
    pub async fn subscribe(&self, principal: &Principal, request: SubscribeRequest) -> ForumResult<Subscription> {
        if principal.is_guest() {
            return Err(ForumError::Unauthenticated);
        }
        self.ensure_subject_exists(request.subject_kind, request.subject_id).await?;
        let preference = self.preference_for(principal.user_id).await?;
        let channels = request.channels.unwrap_or_else(|| preference.channels());
        let subscription = self
            .store
            .upsert_subscription(NewSubscription {
                user_id: principal.user_id,
                subject_kind: request.subject_kind,
                subject_id: request.subject_id,
                frequency: request.frequency.unwrap_or(preference.default_frequency),
                email_enabled: channels.contains(&Channel::Email),
                push_enabled: channels.contains(&Channel::Push),
                in_app_enabled: channels.contains(&Channel::InApp),
                muted: false,
                expires_at: None,
                created_at: self.clock.now(),
            })
            .await?;
        info!(
            user_id = principal.user_id,
            subject = %request.subject_kind,
            subject_id = request.subject_id,
            frequency = %subscription.frequency,
            "Subscribed"
        );
        Ok(subscription)
    }

    pub async fn unsubscribe(&self, principal: &Principal, id: u64) -> ForumResult<()> {
        self.owned(principal, id).await?;
        Ok(self.store.delete_subscription(id).await?)
    }

    /// Changes frequency or channels, or mutes and unmutes.
    pub async fn update(&self, principal: &Principal, id: u64, patch: SubscriptionPatch) -> ForumResult<Subscription> {
        self.owned(principal, id).await?;
        Ok(self.store.update_subscription(id, patch, self.clock.now()).await?)
    }

    pub async fn list(&self, principal: &Principal) -> ForumResult<Vec<Subscription>> {
        if principal.is_guest() {
            return Err(ForumError::Unauthenticated);
        }
        Ok(self.store.list_user_subscriptions(principal.user_id).await?)
    }

    pub async fn preferences(&self, principal: &Principal) -> ForumResult<SubscriptionPreference> {
        if principal.is_guest() {
            return Err(ForumError::Unauthenticated);
        }
        self.preference_for(principal.user_id).await
    }

    pub async fn update_preferences(
        &self,
        principal: &Principal,
        patch: SubscriptionPreferencePatch,
    ) -> ForumResult<SubscriptionPreference> {
        if principal.is_guest() {
            return Err(ForumError::Unauthenticated);
        }
        if patch.digest_day.is_some_and(|day| day > 6) {
            return Err(ForumError::validation("digestDay must be between 0 and 6"));
        }
        if patch.digest_hour.is_some_and(|hour| hour > 23) {
            return Err(ForumError::validation("digestHour must be between 0 and 23"));
        }
        if patch.utc_offset_minutes.is_some_and(|offset| offset.abs() > 14 * 60) {
            return Err(ForumError::validation("utcOffsetMinutes must be within ±14 hours"));
        }
        let current = self.preference_for(principal.user_id).await?;
        let updated = current.apply(patch, self.clock.now());
        Ok(self.store.save_preference(updated).await?)
    }

    pub async fn digests(&self, principal: &Principal, page: PageRequest) -> ForumResult<Page<SubscriptionDigest>> {
        if principal.is_guest() {
            return Err(ForumError::Unauthenticated);
        }
        Ok(self.store.list_digests(principal.user_id, page).await?)
    }

    /// Subscribes the user per their auto-subscribe preference, leaving any
    /// existing subscription (muted or not) untouched.
    pub async fn auto_subscribe(&self, user_id: u64, topic_id: u64, reason: AutoSubscribe) -> ForumResult<()> {
        let preference = self.preference_for(user_id).await?;
        let wanted = match reason {
            AutoSubscribe::Created => preference.auto_subscribe_to_created,
            AutoSubscribe::Replied => preference.auto_subscribe_to_replies,
        };
        if !wanted {
            return Ok(());
        }
        if self.store.find_subscription(user_id, SubjectKind::Topic, topic_id).await?.is_some() {
            return Ok(());
        }
        self.store
            .upsert_subscription(NewSubscription {
                user_id,
                subject_kind: SubjectKind::Topic,
                subject_id: topic_id,
                frequency: preference.default_frequency,
                email_enabled: preference.email_enabled,
                push_enabled: preference.push_enabled,
                in_app_enabled: preference.in_app_enabled,
                muted: false,
                expires_at: None,
                created_at: self.clock.now(),
            })
            .await?;
        debug!(user_id, topic_id, ?reason, "Auto-subscribed");
        Ok(())
    }

    async fn preference_for(&self, user_id: u64) -> ForumResult<SubscriptionPreference> {
        Ok(self
            .store
            .get_preference(user_id)
            .await?
            .unwrap_or_else(|| SubscriptionPreference::defaults_for(user_id, self.clock.now())))
    }

    async fn owned(&self, principal: &Principal, id: u64) -> ForumResult<Subscription> {
        if principal.is_guest() {
            return Err(ForumError::Unauthenticated);
        }
        let subscription = self.store.get_subscription(id).await?;
        if subscription.user_id != principal.user_id && !principal.is_admin() {
            return Err(ForumError::forbidden("not your subscription"));
        }
        Ok(subscription)
    }

    async fn ensure_subject_exists(&self, kind: SubjectKind, id: u64) -> ForumResult<()> {
        match kind {
            SubjectKind::Topic => {
                let topic = self.store.get_topic(id).await?;
                if topic.is_deleted() {
                    return Err(ForumError::not_found(format!("topic {id}")));
                }
            }
            SubjectKind::Category => {
                self.store.get_category(id).await?;
            }
            SubjectKind::Tag => {
                self.store.get_tag(id).await?;
            }
        }
        Ok(())
    }

    //=====================================================================================
    // Activity and instant fan-out
    //=====================================================================================

    /// Records a newly visible topic against its category and tags.
    pub async fn topic_published(&self, topic: &Topic) -> ForumResult<()> {
        let subjects = std::iter::once((SubjectKind::Category, topic.category_id))
            .chain(topic.tag_ids.iter().map(|tag_id| (SubjectKind::Tag, *tag_id)));
        let events = subjects
            .map(|(kind, id)| activity(kind, id, ActivityKind::TopicCreated, topic, topic.author_id, topic.created_at))
            .collect();
        let notification = Notification::new(
            NotificationKind::NewTopic,
            format!("New topic: {}", topic.title),
            excerpt(&topic.body),
        )
        .with_target(topic.target());
        self.publish(events, topic.author_id, notification).await
    }

    /// Records a newly visible comment against its topic.
    pub async fn comment_published(&self, topic: &Topic, comment: &Comment) -> ForumResult<()> {
        let events = vec![activity(
            SubjectKind::Topic,
            topic.id,
            ActivityKind::CommentCreated,
            topic,
            comment.author_id,
            comment.created_at,
        )];
        let notification = Notification::new(
            NotificationKind::NewComment,
            format!("New reply in {}", topic.title),
            excerpt(&comment.body),
        )
        .with_target(comment.target());
        self.publish(events, comment.author_id, notification).await
    }

    /// In-app notice for every user mentioned in newly visible content.
    pub async fn notify_mentions(&self, author_id: u64, target: TargetRef, mentioned: &[u64]) -> ForumResult<()> {
        let notification = Notification::new(
            NotificationKind::Mention,
            "You were mentioned",
            format!("You were mentioned in {target}."),
        )
        .with_target(target)
        .with_data(serde_json::json!({ "by": author_id }));
        let recipients: BTreeMap<u64, BTreeSet<Channel>> = mentioned
            .iter()
            .filter(|user_id| **user_id != author_id)
            .map(|user_id| (*user_id, BTreeSet::from([Channel::InApp])))
            .collect();
        self.deliver(recipients, &notification).await
    }

    async fn publish(&self, events: Vec<NewActivityEvent>, actor_id: u64, notification: Notification) -> ForumResult<()> {
        let subjects: Vec<(SubjectKind, u64)> = events.iter().map(|e| (e.subject_kind, e.subject_id)).collect();
        self.store.record_activity(events).await?;

        let now = self.clock.now();
        let mut recipients: BTreeMap<u64, BTreeSet<Channel>> = BTreeMap::new();
        for (kind, id) in subjects {
            for subscription in self.store.list_subscribers(kind, id).await? {
                if subscription.frequency != Frequency::Instant
                    || subscription.user_id == actor_id
                    || !subscription.is_live(now)
                {
                    continue;
                }
                recipients
                    .entry(subscription.user_id)
                    .or_default()
                    .extend(subscription.channels());
            }
        }
        self.deliver(recipients, &notification).await
    }

    /// Hands each message to the notifier; failures are queued in the outbox.
    async fn deliver(&self, recipients: BTreeMap<u64, BTreeSet<Channel>>, notification: &Notification) -> ForumResult<()> {
        let mut retry = Vec::new();
        for (user_id, channels) in recipients {
            for channel in channels {
                if let Err(err) = self.notifier.send(user_id, channel, notification).await {
                    warn!(user_id, channel = %channel, error = %err, "Instant notification failed; queued for retry");
                    retry.push(NewOutboxMessage {
                        user_id,
                        channel,
                        notification: notification.clone(),
                        created_at: self.clock.now(),
                    });
                }
            }
        }
        if !retry.is_empty() {
            self.store.enqueue_outbox(retry).await?;
        }
        Ok(())
    }

    //=====================================================================================
    // Digests
    //=====================================================================================

    /// Generates due digests for one partition of users; returns how many were stored.
    #[instrument(skip(self))]
    pub async fn generate_digests(&self, frequency: Frequency, partitions: u32, partition: u32) -> ForumResult<usize> {
        let users = self.store.digest_users(frequency, partitions.max(1), partition).await?;
        let mut created = 0;
        for user_id in users {
            match self.generate_digest_for(user_id, frequency).await {
                Ok(Some(_)) => created += 1,
                Ok(None) => {}
                Err(err) if err.is_retryable() => return Err(err),
                Err(err) => warn!(user_id, error = %err, "Digest generation failed"),
            }
        }
        Ok(created)
    }

    /// Builds the user's digest for the latest slot. Concurrent callers for
    /// the same `(user, frequency)` are no-ops on the loser.
    pub async fn generate_digest_for(&self, user_id: u64, frequency: Frequency) -> ForumResult<Option<SubscriptionDigest>> {
        let key = format!("digest:{user_id}:{frequency}");
        let held = match self.cache.try_lock(&key, ttl(Duration::minutes(5))).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(user_id, %frequency, "Digest generation already running");
                return Ok(None);
            }
            Err(err) => {
                warn!(user_id, error = %err, "Digest lock unavailable; relying on the store");
                false
            }
        };
        let result = self.build_digest(user_id, frequency).await;
        if held {
            if let Err(err) = self.cache.unlock(&key).await {
                warn!(user_id, error = %err, "Failed to release digest lock");
            }
        }
        result
    }

    async fn build_digest(&self, user_id: u64, frequency: Frequency) -> ForumResult<Option<SubscriptionDigest>> {
        let now = self.clock.now();
        let preference = self.preference_for(user_id).await?;
        let Some(slot) = digest::digest_slot(frequency, &preference, now) else {
            return Ok(None);
        };

        let subscriptions: Vec<Subscription> = self
            .store
            .list_user_subscriptions(user_id)
            .await?
            .into_iter()
            .filter(|s| s.frequency == frequency && s.is_live(now) && s.delivered_until() < slot)
            .collect();
        if subscriptions.is_empty() {
            return Ok(None);
        }

        let mut events = Vec::new();
        for subscription in &subscriptions {
            let found = self
                .store
                .activity_for_subject(
                    subscription.subject_kind,
                    subscription.subject_id,
                    subscription.delivered_until(),
                    slot,
                )
                .await?;
            events.extend(found.into_iter().filter(|e| e.actor_id != user_id));
        }
        let covered: Vec<u64> = subscriptions.iter().map(|s| s.id).collect();

        if events.is_empty() {
            self.store.mark_subscriptions_notified(&covered, slot).await?;
            return Ok(None);
        }

        let window_start = subscriptions
            .iter()
            .map(Subscription::delivered_until)
            .min()
            .unwrap_or(slot);
        let payload = digest::build_payload(frequency, window_start, slot, &events);
        let total = payload.total_updates;
        match self
            .store
            .create_digest(NewDigest {
                user_id,
                frequency,
                payload,
                scheduled_for: slot,
                covered_subscription_ids: covered,
                created_at: now,
            })
            .await
        {
            Ok(digest) => {
                info!(user_id, %frequency, digest_id = digest.id, total_updates = total, "Digest generated");
                Ok(Some(digest))
            }
            Err(PortError::Conflict(_)) => {
                debug!(user_id, %frequency, "Digest for this slot already exists");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Dispatches due pending digests. `sentAt` is the idempotency fence:
    /// a digest already marked by another worker is left alone.
    #[instrument(skip(self))]
    pub async fn process_pending_digests(&self, limit: u32) -> ForumResult<DispatchSummary> {
        let now = self.clock.now();
        let mut summary = DispatchSummary::default();
        for digest in self.store.due_digests(now, limit).await? {
            if digest.status != DigestStatus::Pending {
                continue;
            }
            if digest::has_expired(digest.frequency, digest.scheduled_for, now, self.settings.digest_drift_multiplier) {
                let reason = format!("expired: scheduled for {} and never dispatched", digest.scheduled_for.to_rfc3339());
                if self.store.mark_digest_failed(digest.id, reason).await? {
                    warn!(digest_id = digest.id, user_id = digest.user_id, "Dropped stale digest");
                    summary.failed += 1;
                }
                continue;
            }

            let channels = self.preference_for(digest.user_id).await?.channels();
            if channels.is_empty() {
                if self
                    .store
                    .mark_digest_failed(digest.id, "no delivery channel enabled".to_string())
                    .await?
                {
                    summary.failed += 1;
                }
                continue;
            }

            let notification = digest_notification(&digest);
            let mut errors = Vec::new();
            let mut delivered = 0;
            for channel in &channels {
                match self.notifier.send(digest.user_id, *channel, &notification).await {
                    Ok(()) => delivered += 1,
                    Err(err) => errors.push(format!("{channel}: {err}")),
                }
            }

            if delivered == 0 {
                if self.store.mark_digest_failed(digest.id, errors.join("; ")).await? {
                    warn!(digest_id = digest.id, user_id = digest.user_id, errors = ?errors, "Digest dispatch failed");
                    summary.failed += 1;
                }
                continue;
            }
            if self.store.mark_digest_sent(digest.id, self.clock.now()).await? {
                info!(digest_id = digest.id, user_id = digest.user_id, channels = delivered, "Digest sent");
                summary.sent += 1;
            } else {
                debug!(digest_id = digest.id, "Digest already settled by another worker");
            }
            if !errors.is_empty() {
                warn!(digest_id = digest.id, errors = ?errors, "Digest partially delivered");
            }
        }
        Ok(summary)
    }

    /// Drops digest and activity history older than the retention window.
    pub async fn purge_history(&self) -> ForumResult<u64> {
        let cutoff = self.clock.now() - self.settings.digest_retention;
        let purged = self.store.purge_history(cutoff).await?;
        if purged > 0 {
            info!(purged, "Purged digest history");
        }
        Ok(purged)
    }
}

fn activity(
    subject_kind: SubjectKind,
    subject_id: u64,
    kind: ActivityKind,
    topic: &Topic,
    actor_id: u64,
    occurred_at: DateTime<Utc>,
) -> NewActivityEvent {
    NewActivityEvent {
        subject_kind,
        subject_id,
        kind,
        topic_id: topic.id,
        topic_title: topic.title.clone(),
        actor_id,
        occurred_at,
    }
}

fn digest_notification(digest: &SubscriptionDigest) -> Notification {
    let payload = &digest.payload;
    Notification::new(
        NotificationKind::Digest,
        format!("Your {} digest", digest.frequency),
        format!(
            "{} updates across {} subscriptions",
            payload.total_updates,
            payload.subjects.len()
        ),
    )
    .with_data(serde_json::json!({ "digestId": digest.id, "payload": payload }))
}

fn excerpt(body: &str) -> String {
    const LIMIT: usize = 140;
    match body.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpts_are_cut_on_character_boundaries() {
        assert_eq!(excerpt("short"), "short");
        let long = "é".repeat(200);
        let cut = excerpt(&long);
        assert_eq!(cut.chars().count(), 141);
        assert!(cut.ends_with('…'));
    }
}
