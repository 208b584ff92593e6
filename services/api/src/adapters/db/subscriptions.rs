//! Subscriptions, preferences, activity, digests and the notification outbox.

use super::records::{ActivityRecord, DigestRecord, OutboxRecord, PreferenceRecord, SubscriptionRecord};
use super::*;
use async_trait::async_trait;
use forum_core::ports::{OutboxStore, SubscriptionStore};
use sqlx::types::Json;

fn subscriptions(rows: Vec<SubscriptionRecord>) -> PortResult<Vec<Subscription>> {
    rows.into_iter().map(SubscriptionRecord::to_domain).collect()
}

fn digests(rows: Vec<DigestRecord>) -> PortResult<Vec<SubscriptionDigest>> {
    rows.into_iter().map(DigestRecord::to_domain).collect()
}

/// Locks a digest row and reports whether it is still pending.
async fn lock_pending_digest(conn: &mut PgConnection, id: u64) -> PortResult<bool> {
    let status: String = sqlx::query_scalar("SELECT status FROM subscription_digests WHERE id = $1 FOR UPDATE")
        .bind(db_id(id))
        .fetch_one(conn)
        .await
        .map_err(port_err(format!("digest {id}")))?;
    Ok(status == DigestStatus::Pending.as_str())
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn upsert_subscription(&self, subscription: NewSubscription) -> PortResult<Subscription> {
        sqlx::query_as::<_, SubscriptionRecord>(
            "INSERT INTO subscriptions (user_id, subject_kind, subject_id, frequency, email_enabled, push_enabled, \
                 in_app_enabled, muted, expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10) \
             ON CONFLICT (user_id, subject_kind, subject_id) DO UPDATE SET \
                 frequency = EXCLUDED.frequency, email_enabled = EXCLUDED.email_enabled, \
                 push_enabled = EXCLUDED.push_enabled, in_app_enabled = EXCLUDED.in_app_enabled, \
                 muted = EXCLUDED.muted, expires_at = EXCLUDED.expires_at, updated_at = EXCLUDED.created_at \
             RETURNING *",
        )
        .bind(db_id(subscription.user_id))
        .bind(subscription.subject_kind.as_str())
        .bind(db_id(subscription.subject_id))
        .bind(subscription.frequency.as_str())
        .bind(subscription.email_enabled)
        .bind(subscription.push_enabled)
        .bind(subscription.in_app_enabled)
        .bind(subscription.muted)
        .bind(subscription.expires_at)
        .bind(subscription.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!(
            "subscription of user {} to {} {}",
            subscription.user_id, subscription.subject_kind, subscription.subject_id
        )))?
        .to_domain()
    }

    async fn get_subscription(&self, id: u64) -> PortResult<Subscription> {
        sqlx::query_as::<_, SubscriptionRecord>("SELECT * FROM subscriptions WHERE id = $1")
            .bind(db_id(id))
            .fetch_one(&self.pool)
            .await
            .map_err(port_err(format!("subscription {id}")))?
            .to_domain()
    }

    async fn find_subscription(&self, user_id: u64, kind: SubjectKind, subject_id: u64) -> PortResult<Option<Subscription>> {
        sqlx::query_as::<_, SubscriptionRecord>(
            "SELECT * FROM subscriptions WHERE user_id = $1 AND subject_kind = $2 AND subject_id = $3",
        )
        .bind(db_id(user_id))
        .bind(kind.as_str())
        .bind(db_id(subject_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(port_err("subscriptions"))?
        .map(SubscriptionRecord::to_domain)
        .transpose()
    }

    async fn update_subscription(&self, id: u64, patch: SubscriptionPatch, now: DateTime<Utc>) -> PortResult<Subscription> {
        sqlx::query_as::<_, SubscriptionRecord>(
            "UPDATE subscriptions SET \
                 frequency = COALESCE($2, frequency), \
                 email_enabled = COALESCE($3, email_enabled), \
                 push_enabled = COALESCE($4, push_enabled), \
                 in_app_enabled = COALESCE($5, in_app_enabled), \
                 muted = COALESCE($6, muted), \
                 expires_at = COALESCE($7, expires_at), \
                 updated_at = $8 \
             WHERE id = $1 RETURNING *",
        )
        .bind(db_id(id))
        .bind(patch.frequency.map(|f| f.as_str()))
        .bind(patch.email_enabled)
        .bind(patch.push_enabled)
        .bind(patch.in_app_enabled)
        .bind(patch.muted)
        .bind(patch.expires_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("subscription {id}")))?
        .to_domain()
    }

    async fn delete_subscription(&self, id: u64) -> PortResult<()> {
        let removed = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(db_id(id))
            .execute(&self.pool)
            .await
            .map_err(port_err(format!("subscription {id}")))?
            .rows_affected();
        if removed == 0 {
            return Err(PortError::not_found(format!("subscription {id}")));
        }
        Ok(())
    }

    async fn list_user_subscriptions(&self, user_id: u64) -> PortResult<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRecord>("SELECT * FROM subscriptions WHERE user_id = $1 ORDER BY id")
            .bind(db_id(user_id))
            .fetch_all(&self.pool)
            .await
            .map_err(port_err(format!("subscriptions of user {user_id}")))?;
        subscriptions(rows)
    }

    async fn list_subscribers(&self, kind: SubjectKind, subject_id: u64) -> PortResult<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRecord>(
            "SELECT * FROM subscriptions WHERE subject_kind = $1 AND subject_id = $2 ORDER BY id",
        )
        .bind(kind.as_str())
        .bind(db_id(subject_id))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err(format!("subscribers of {kind} {subject_id}")))?;
        subscriptions(rows)
    }

    async fn mark_subscriptions_notified(&self, subscription_ids: &[u64], at: DateTime<Utc>) -> PortResult<()> {
        sqlx::query("UPDATE subscriptions SET last_notified_at = $2 WHERE id = ANY($1)")
            .bind(ids(subscription_ids))
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(port_err("subscriptions"))?;
        Ok(())
    }

    async fn get_preference(&self, user_id: u64) -> PortResult<Option<SubscriptionPreference>> {
        sqlx::query_as::<_, PreferenceRecord>("SELECT * FROM subscription_preferences WHERE user_id = $1")
            .bind(db_id(user_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(port_err(format!("preferences of user {user_id}")))?
            .map(PreferenceRecord::to_domain)
            .transpose()
    }

    async fn save_preference(&self, preference: SubscriptionPreference) -> PortResult<SubscriptionPreference> {
        sqlx::query_as::<_, PreferenceRecord>(
            "INSERT INTO subscription_preferences (user_id, default_frequency, email_enabled, push_enabled, \
                 in_app_enabled, digest_day, digest_hour, utc_offset_minutes, auto_subscribe_to_created, \
                 auto_subscribe_to_replies, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 default_frequency = EXCLUDED.default_frequency, email_enabled = EXCLUDED.email_enabled, \
                 push_enabled = EXCLUDED.push_enabled, in_app_enabled = EXCLUDED.in_app_enabled, \
                 digest_day = EXCLUDED.digest_day, digest_hour = EXCLUDED.digest_hour, \
                 utc_offset_minutes = EXCLUDED.utc_offset_minutes, \
                 auto_subscribe_to_created = EXCLUDED.auto_subscribe_to_created, \
                 auto_subscribe_to_replies = EXCLUDED.auto_subscribe_to_replies, \
                 updated_at = EXCLUDED.updated_at \
             RETURNING *",
        )
        .bind(db_id(preference.user_id))
        .bind(preference.default_frequency.as_str())
        .bind(preference.email_enabled)
        .bind(preference.push_enabled)
        .bind(preference.in_app_enabled)
        .bind(i16::from(preference.digest_day))
        .bind(i16::from(preference.digest_hour))
        .bind(preference.utc_offset_minutes)
        .bind(preference.auto_subscribe_to_created)
        .bind(preference.auto_subscribe_to_replies)
        .bind(preference.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("preferences of user {}", preference.user_id)))?
        .to_domain()
    }

    async fn record_activity(&self, events: Vec<NewActivityEvent>) -> PortResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        for event in events {
            sqlx::query(
                "INSERT INTO activity_events (subject_kind, subject_id, kind, topic_id, topic_title, actor_id, \
                     occurred_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(event.subject_kind.as_str())
            .bind(db_id(event.subject_id))
            .bind(event.kind.as_str())
            .bind(db_id(event.topic_id))
            .bind(&event.topic_title)
            .bind(db_id(event.actor_id))
            .bind(event.occurred_at)
            .execute(&mut *tx)
            .await
            .map_err(port_err("activity"))?;
        }
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(())
    }

    async fn activity_for_subject(
        &self,
        kind: SubjectKind,
        subject_id: u64,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> PortResult<Vec<ActivityEvent>> {
        let rows = sqlx::query_as::<_, ActivityRecord>(
            "SELECT * FROM activity_events \
             WHERE subject_kind = $1 AND subject_id = $2 AND occurred_at > $3 AND occurred_at <= $4 \
             ORDER BY occurred_at, id",
        )
        .bind(kind.as_str())
        .bind(db_id(subject_id))
        .bind(after)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(port_err(format!("activity of {kind} {subject_id}")))?;
        rows.into_iter().map(ActivityRecord::to_domain).collect()
    }

    async fn digest_users(&self, frequency: Frequency, partitions: u32, partition: u32) -> PortResult<Vec<u64>> {
        let users: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT user_id FROM subscriptions WHERE frequency = $1 AND user_id % $2 = $3 ORDER BY user_id",
        )
        .bind(frequency.as_str())
        .bind(i64::from(partitions.max(1)))
        .bind(i64::from(partition))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err(format!("{frequency} digest users")))?;
        Ok(users.into_iter().map(unsigned).collect())
    }

    async fn create_digest(&self, digest: NewDigest) -> PortResult<SubscriptionDigest> {
        let what = format!(
            "{} digest for user {} at {}",
            digest.frequency, digest.user_id, digest.scheduled_for
        );
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        let stored = sqlx::query_as::<_, DigestRecord>(
            "INSERT INTO subscription_digests (user_id, frequency, payload, scheduled_for, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(db_id(digest.user_id))
        .bind(digest.frequency.as_str())
        .bind(Json(&digest.payload))
        .bind(digest.scheduled_for)
        .bind(DigestStatus::Pending.as_str())
        .bind(digest.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(port_err(&what))?
        .to_domain()?;
        sqlx::query("UPDATE subscriptions SET last_notified_at = $2 WHERE id = ANY($1)")
            .bind(ids(&digest.covered_subscription_ids))
            .bind(digest.payload.window_end)
            .execute(&mut *tx)
            .await
            .map_err(port_err(&what))?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(stored)
    }

    async fn due_digests(&self, now: DateTime<Utc>, limit: u32) -> PortResult<Vec<SubscriptionDigest>> {
        let rows = sqlx::query_as::<_, DigestRecord>(
            "SELECT * FROM subscription_digests WHERE status = $1 AND scheduled_for <= $2 \
             ORDER BY scheduled_for, id LIMIT $3",
        )
        .bind(DigestStatus::Pending.as_str())
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err("due digests"))?;
        digests(rows)
    }

    async fn mark_digest_sent(&self, id: u64, sent_at: DateTime<Utc>) -> PortResult<bool> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        if !lock_pending_digest(&mut *tx, id).await? {
            return Ok(false);
        }
        sqlx::query("UPDATE subscription_digests SET status = $2, sent_at = $3 WHERE id = $1")
            .bind(db_id(id))
            .bind(DigestStatus::Sent.as_str())
            .bind(sent_at)
            .execute(&mut *tx)
            .await
            .map_err(port_err(format!("digest {id}")))?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(true)
    }

    async fn mark_digest_failed(&self, id: u64, error: String) -> PortResult<bool> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        if !lock_pending_digest(&mut *tx, id).await? {
            return Ok(false);
        }
        sqlx::query("UPDATE subscription_digests SET status = $2, error = $3 WHERE id = $1")
            .bind(db_id(id))
            .bind(DigestStatus::Failed.as_str())
            .bind(&error)
            .execute(&mut *tx)
            .await
            .map_err(port_err(format!("digest {id}")))?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(true)
    }

    async fn list_digests(&self, user_id: u64, page: PageRequest) -> PortResult<Page<SubscriptionDigest>> {
        let what = format!("digests of user {user_id}");
        let total: i64 = sqlx::query_scalar("SELECT count(*) FROM subscription_digests WHERE user_id = $1")
            .bind(db_id(user_id))
            .fetch_one(&self.pool)
            .await
            .map_err(port_err(&what))?;
        let rows = sqlx::query_as::<_, DigestRecord>(
            "SELECT * FROM subscription_digests WHERE user_id = $1 \
             ORDER BY scheduled_for DESC, id DESC LIMIT $2 OFFSET $3",
        )
        .bind(db_id(user_id))
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(port_err(&what))?;
        Ok(page_of(digests(rows)?, total, page))
    }

    async fn purge_history(&self, cutoff: DateTime<Utc>) -> PortResult<u64> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        let digests = sqlx::query("DELETE FROM subscription_digests WHERE status <> $1 AND created_at < $2")
            .bind(DigestStatus::Pending.as_str())
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(port_err("digest history"))?
            .rows_affected();
        let activity = sqlx::query("DELETE FROM activity_events WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(port_err("activity history"))?
            .rows_affected();
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(digests + activity)
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn enqueue_outbox(&self, messages: Vec<NewOutboxMessage>) -> PortResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        insert_outbox(&mut *tx, messages).await?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(())
    }

    async fn due_outbox(&self, now: DateTime<Utc>, limit: u32) -> PortResult<Vec<OutboxMessage>> {
        let rows = sqlx::query_as::<_, OutboxRecord>(
            "SELECT * FROM outbox WHERE status = $1 AND next_attempt_at <= $2 \
             ORDER BY next_attempt_at, id LIMIT $3",
        )
        .bind(OutboxStatus::Pending.as_str())
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err("due outbox messages"))?;
        rows.into_iter().map(OutboxRecord::to_domain).collect()
    }

    async fn mark_outbox_delivered(&self, id: u64, now: DateTime<Utc>) -> PortResult<()> {
        let updated = sqlx::query("UPDATE outbox SET status = $2, attempts = attempts + 1, updated_at = $3 WHERE id = $1")
            .bind(db_id(id))
            .bind(OutboxStatus::Delivered.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(port_err(format!("outbox message {id}")))?
            .rows_affected();
        if updated == 0 {
            return Err(PortError::not_found(format!("outbox message {id}")));
        }
        Ok(())
    }

    async fn reschedule_outbox(
        &self,
        id: u64,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: String,
    ) -> PortResult<()> {
        let updated = sqlx::query("UPDATE outbox SET attempts = $2, next_attempt_at = $3, last_error = $4 WHERE id = $1")
            .bind(db_id(id))
            .bind(attempts.min(i32::MAX as u32) as i32)
            .bind(next_attempt_at)
            .bind(&error)
            .execute(&self.pool)
            .await
            .map_err(port_err(format!("outbox message {id}")))?
            .rows_affected();
        if updated == 0 {
            return Err(PortError::not_found(format!("outbox message {id}")));
        }
        Ok(())
    }

    async fn mark_outbox_dead(&self, id: u64, attempts: u32, error: String, now: DateTime<Utc>) -> PortResult<()> {
        let updated = sqlx::query(
            "UPDATE outbox SET status = $2, attempts = $3, last_error = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(db_id(id))
        .bind(OutboxStatus::Dead.as_str())
        .bind(attempts.min(i32::MAX as u32) as i32)
        .bind(&error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(port_err(format!("outbox message {id}")))?
        .rows_affected();
        if updated == 0 {
            return Err(PortError::not_found(format!("outbox message {id}")));
        }
        Ok(())
    }
}
