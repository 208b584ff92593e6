//! Subscriptions, preferences, activity, digests and the notification outbox.

use super::MemoryStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forum_core::domain::*;
use forum_core::ports::{OutboxStore, PortError, PortResult, SubscriptionStore};
use std::cmp::Reverse;
use std::collections::BTreeSet;

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn upsert_subscription(&self, subscription: NewSubscription) -> PortResult<Subscription> {
        let mut state = self.write();
        let existing = state.subscriptions.values_mut().find(|s| {
            s.user_id == subscription.user_id
                && s.subject_kind == subscription.subject_kind
                && s.subject_id == subscription.subject_id
        });
        if let Some(stored) = existing {
            stored.frequency = subscription.frequency;
            stored.email_enabled = subscription.email_enabled;
            stored.push_enabled = subscription.push_enabled;
            stored.in_app_enabled = subscription.in_app_enabled;
            stored.muted = subscription.muted;
            stored.expires_at = subscription.expires_at;
            stored.updated_at = subscription.created_at;
            return Ok(stored.clone());
        }
        let id = state.next_id();
        let stored = Subscription {
            id,
            user_id: subscription.user_id,
            subject_kind: subscription.subject_kind,
            subject_id: subscription.subject_id,
            frequency: subscription.frequency,
            email_enabled: subscription.email_enabled,
            push_enabled: subscription.push_enabled,
            in_app_enabled: subscription.in_app_enabled,
            muted: subscription.muted,
            last_notified_at: None,
            expires_at: subscription.expires_at,
            created_at: subscription.created_at,
            updated_at: subscription.created_at,
        };
        state.subscriptions.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_subscription(&self, id: u64) -> PortResult<Subscription> {
        self.read()
            .subscriptions
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found(format!("subscription {id}")))
    }

    async fn find_subscription(&self, user_id: u64, kind: SubjectKind, subject_id: u64) -> PortResult<Option<Subscription>> {
        Ok(self
            .read()
            .subscriptions
            .values()
            .find(|s| s.user_id == user_id && s.subject_kind == kind && s.subject_id == subject_id)
            .cloned())
    }

    async fn update_subscription(&self, id: u64, patch: SubscriptionPatch, now: DateTime<Utc>) -> PortResult<Subscription> {
        let mut state = self.write();
        let stored = state
            .subscriptions
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("subscription {id}")))?;
        if let Some(frequency) = patch.frequency {
            stored.frequency = frequency;
        }
        if let Some(enabled) = patch.email_enabled {
            stored.email_enabled = enabled;
        }
        if let Some(enabled) = patch.push_enabled {
            stored.push_enabled = enabled;
        }
        if let Some(enabled) = patch.in_app_enabled {
            stored.in_app_enabled = enabled;
        }
        if let Some(muted) = patch.muted {
            stored.muted = muted;
        }
        if let Some(expires_at) = patch.expires_at {
            stored.expires_at = Some(expires_at);
        }
        stored.updated_at = now;
        Ok(stored.clone())
    }

    async fn delete_subscription(&self, id: u64) -> PortResult<()> {
        match self.write().subscriptions.remove(&id) {
            Some(_) => Ok(()),
            None => Err(PortError::not_found(format!("subscription {id}"))),
        }
    }

    async fn list_user_subscriptions(&self, user_id: u64) -> PortResult<Vec<Subscription>> {
        Ok(self
            .read()
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_subscribers(&self, kind: SubjectKind, subject_id: u64) -> PortResult<Vec<Subscription>> {
        Ok(self
            .read()
            .subscriptions
            .values()
            .filter(|s| s.subject_kind == kind && s.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn mark_subscriptions_notified(&self, ids: &[u64], at: DateTime<Utc>) -> PortResult<()> {
        let mut state = self.write();
        for id in ids {
            if let Some(subscription) = state.subscriptions.get_mut(id) {
                subscription.last_notified_at = Some(at);
            }
        }
        Ok(())
    }

    async fn get_preference(&self, user_id: u64) -> PortResult<Option<SubscriptionPreference>> {
        Ok(self.read().preferences.get(&user_id).cloned())
    }

    async fn save_preference(&self, preference: SubscriptionPreference) -> PortResult<SubscriptionPreference> {
        self.write().preferences.insert(preference.user_id, preference.clone());
        Ok(preference)
    }

    async fn record_activity(&self, events: Vec<NewActivityEvent>) -> PortResult<()> {
        let mut state = self.write();
        for event in events {
            let id = state.next_id();
            state.activity.insert(
                id,
                ActivityEvent {
                    id,
                    subject_kind: event.subject_kind,
                    subject_id: event.subject_id,
                    kind: event.kind,
                    topic_id: event.topic_id,
                    topic_title: event.topic_title,
                    actor_id: event.actor_id,
                    occurred_at: event.occurred_at,
                },
            );
        }
        Ok(())
    }

    async fn activity_for_subject(
        &self,
        kind: SubjectKind,
        subject_id: u64,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> PortResult<Vec<ActivityEvent>> {
        let mut events: Vec<ActivityEvent> = self
            .read()
            .activity
            .values()
            .filter(|e| {
                e.subject_kind == kind && e.subject_id == subject_id && e.occurred_at > after && e.occurred_at <= until
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.occurred_at, e.id));
        Ok(events)
    }

    async fn digest_users(&self, frequency: Frequency, partitions: u32, partition: u32) -> PortResult<Vec<u64>> {
        let partitions = u64::from(partitions.max(1));
        let users: BTreeSet<u64> = self
            .read()
            .subscriptions
            .values()
            .filter(|s| s.frequency == frequency && s.user_id % partitions == u64::from(partition))
            .map(|s| s.user_id)
            .collect();
        Ok(users.into_iter().collect())
    }

    async fn create_digest(&self, digest: NewDigest) -> PortResult<SubscriptionDigest> {
        let mut state = self.write();
        let duplicate = state.digests.values().any(|d| {
            d.user_id == digest.user_id && d.frequency == digest.frequency && d.scheduled_for == digest.scheduled_for
        });
        if duplicate {
            return Err(PortError::conflict(format!(
                "{} digest for user {} at {}",
                digest.frequency, digest.user_id, digest.scheduled_for
            )));
        }
        for id in &digest.covered_subscription_ids {
            if let Some(subscription) = state.subscriptions.get_mut(id) {
                subscription.last_notified_at = Some(digest.payload.window_end);
            }
        }
        let id = state.next_id();
        let stored = SubscriptionDigest {
            id,
            user_id: digest.user_id,
            frequency: digest.frequency,
            payload: digest.payload,
            scheduled_for: digest.scheduled_for,
            sent_at: None,
            status: DigestStatus::Pending,
            error: None,
            created_at: digest.created_at,
        };
        state.digests.insert(id, stored.clone());
        Ok(stored)
    }

    async fn due_digests(&self, now: DateTime<Utc>, limit: u32) -> PortResult<Vec<SubscriptionDigest>> {
        let mut due: Vec<SubscriptionDigest> = self
            .read()
            .digests
            .values()
            .filter(|d| d.status == DigestStatus::Pending && d.scheduled_for <= now)
            .cloned()
            .collect();
        due.sort_by_key(|d| (d.scheduled_for, d.id));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn mark_digest_sent(&self, id: u64, sent_at: DateTime<Utc>) -> PortResult<bool> {
        let mut state = self.write();
        let digest = state
            .digests
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("digest {id}")))?;
        if digest.status != DigestStatus::Pending {
            return Ok(false);
        }
        digest.status = DigestStatus::Sent;
        digest.sent_at = Some(sent_at);
        Ok(true)
    }

    async fn mark_digest_failed(&self, id: u64, error: String) -> PortResult<bool> {
        let mut state = self.write();
        let digest = state
            .digests
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("digest {id}")))?;
        if digest.status != DigestStatus::Pending {
            return Ok(false);
        }
        digest.status = DigestStatus::Failed;
        digest.error = Some(error);
        Ok(true)
    }

    async fn list_digests(&self, user_id: u64, page: PageRequest) -> PortResult<Page<SubscriptionDigest>> {
        let mut digests: Vec<SubscriptionDigest> = self
            .read()
            .digests
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        digests.sort_by_key(|d| (Reverse(d.scheduled_for), Reverse(d.id)));
        Ok(Page::from_vec(digests, page))
    }

    async fn purge_history(&self, cutoff: DateTime<Utc>) -> PortResult<u64> {
        let mut state = self.write();
        let before = state.digests.len() + state.activity.len();
        state
            .digests
            .retain(|_, d| d.status == DigestStatus::Pending || d.created_at >= cutoff);
        state.activity.retain(|_, e| e.occurred_at >= cutoff);
        Ok((before - state.digests.len() - state.activity.len()) as u64)
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn enqueue_outbox(&self, messages: Vec<NewOutboxMessage>) -> PortResult<()> {
        self.write().insert_outbox(messages);
        Ok(())
    }

    async fn due_outbox(&self, now: DateTime<Utc>, limit: u32) -> PortResult<Vec<OutboxMessage>> {
        let mut due: Vec<OutboxMessage> = self
            .read()
            .outbox
            .values()
            .filter(|m| m.status == OutboxStatus::Pending && m.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|m| (m.next_attempt_at, m.id));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn mark_outbox_delivered(&self, id: u64, now: DateTime<Utc>) -> PortResult<()> {
        let mut state = self.write();
        let message = state
            .outbox
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("outbox message {id}")))?;
        message.status = OutboxStatus::Delivered;
        message.attempts += 1;
        message.updated_at = now;
        Ok(())
    }

    async fn reschedule_outbox(
        &self,
        id: u64,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: String,
    ) -> PortResult<()> {
        let mut state = self.write();
        let message = state
            .outbox
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("outbox message {id}")))?;
        message.attempts = attempts;
        message.next_attempt_at = next_attempt_at;
        message.last_error = Some(error);
        Ok(())
    }

    async fn mark_outbox_dead(&self, id: u64, attempts: u32, error: String, now: DateTime<Utc>) -> PortResult<()> {
        let mut state = self.write();
        let message = state
            .outbox
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("outbox message {id}")))?;
        message.status = OutboxStatus::Dead;
        message.attempts = attempts;
        message.last_error = Some(error);
        message.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 2, hour, 0, 0).unwrap()
    }

    fn subscribe(user_id: u64, frequency: Frequency) -> NewSubscription {
        NewSubscription {
            user_id,
            subject_kind: SubjectKind::Category,
            subject_id: 1,
            frequency,
            email_enabled: true,
            push_enabled: false,
            in_app_enabled: true,
            muted: false,
            expires_at: None,
            created_at: at(0),
        }
    }

    fn digest(user_id: u64) -> NewDigest {
        NewDigest {
            user_id,
            frequency: Frequency::Daily,
            payload: DigestPayload {
                frequency: Frequency::Daily,
                window_start: at(0),
                window_end: at(9),
                total_updates: 1,
                subjects: vec![],
            },
            scheduled_for: at(9),
            covered_subscription_ids: vec![],
            created_at: at(9),
        }
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_per_subject() {
        let store = MemoryStore::new();
        let first = store.upsert_subscription(subscribe(4, Frequency::Instant)).await.unwrap();
        let second = store.upsert_subscription(subscribe(4, Frequency::Weekly)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.frequency, Frequency::Weekly);
        assert_eq!(store.list_user_subscriptions(4).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn digest_users_are_split_by_partition() {
        let store = MemoryStore::new();
        for user in 1..=6 {
            store.upsert_subscription(subscribe(user, Frequency::Daily)).await.unwrap();
        }
        store.upsert_subscription(subscribe(7, Frequency::Weekly)).await.unwrap();
        assert_eq!(store.digest_users(Frequency::Daily, 3, 0).await.unwrap(), vec![3, 6]);
        assert_eq!(store.digest_users(Frequency::Daily, 3, 1).await.unwrap(), vec![1, 4]);
    }

    #[tokio::test]
    async fn digests_are_unique_per_slot_and_sent_once() {
        let store = MemoryStore::new();
        let stored = store.create_digest(digest(4)).await.unwrap();
        assert!(matches!(store.create_digest(digest(4)).await, Err(PortError::Conflict(_))));

        assert_eq!(store.due_digests(at(8), 10).await.unwrap().len(), 0);
        assert_eq!(store.due_digests(at(9), 10).await.unwrap().len(), 1);
        assert!(store.mark_digest_sent(stored.id, at(10)).await.unwrap());
        assert!(!store.mark_digest_sent(stored.id, at(11)).await.unwrap());
        assert!(!store.mark_digest_failed(stored.id, "late".into()).await.unwrap());
    }
}
