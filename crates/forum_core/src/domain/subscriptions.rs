//! Subscriptions, digests, activity events and the notification outbox.

use super::TargetRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    #[derive(PartialOrd, Ord)]
    pub enum SubjectKind {
        Topic => "topic",
        Category => "category",
        Tag => "tag",
    }
}

string_enum! {
    pub enum Frequency {
        Instant => "instant",
        Daily => "daily",
        Weekly => "weekly",
    }
}

impl Frequency {
    /// Length of one digest window; `None` for instant delivery.
    pub fn cadence(&self) -> Option<chrono::Duration> {
        match self {
            Frequency::Instant => None,
            Frequency::Daily => Some(chrono::Duration::days(1)),
            Frequency::Weekly => Some(chrono::Duration::weeks(1)),
        }
    }
}

string_enum! {
    #[derive(PartialOrd, Ord)]
    pub enum Channel {
        Email => "email",
        Push => "push",
        InApp => "inApp",
    }
}

string_enum! {
    pub enum DigestStatus {
        Pending => "pending",
        Sent => "sent",
        Failed => "failed",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: u64,
    pub user_id: u64,
    pub subject_kind: SubjectKind,
    pub subject_id: u64,
    pub frequency: Frequency,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub in_app_enabled: bool,
    pub muted: bool,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels = Vec::new();
        if self.email_enabled {
            channels.push(Channel::Email);
        }
        if self.push_enabled {
            channels.push(Channel::Push);
        }
        if self.in_app_enabled {
            channels.push(Channel::InApp);
        }
        channels
    }

    /// Unmuted and not yet expired.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.muted && self.expires_at.map(|at| at > now).unwrap_or(true)
    }

    /// Start of the window of events not yet delivered to this subscription.
    pub fn delivered_until(&self) -> DateTime<Utc> {
        self.last_notified_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubscription {
    pub user_id: u64,
    pub subject_kind: SubjectKind,
    pub subject_id: u64,
    pub frequency: Frequency,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub in_app_enabled: bool,
    pub muted: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPatch {
    pub frequency: Option<Frequency>,
    pub email_enabled: Option<bool>,
    pub push_enabled: Option<bool>,
    pub in_app_enabled: Option<bool>,
    pub muted: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// User-wide defaults for new subscriptions and digest scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPreference {
    pub user_id: u64,
    pub default_frequency: Frequency,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub in_app_enabled: bool,
    /// 0 = Sunday .. 6 = Saturday, in the user's local time.
    pub digest_day: u8,
    /// 0..=23, in the user's local time.
    pub digest_hour: u8,
    /// Offset of the user's local time from UTC.
    pub utc_offset_minutes: i32,
    pub auto_subscribe_to_created: bool,
    pub auto_subscribe_to_replies: bool,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionPreference {
    pub fn defaults_for(user_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            default_frequency: Frequency::Instant,
            email_enabled: true,
            push_enabled: false,
            in_app_enabled: true,
            digest_day: 1,
            digest_hour: 9,
            utc_offset_minutes: 0,
            auto_subscribe_to_created: true,
            auto_subscribe_to_replies: true,
            updated_at: now,
        }
    }
}

/// Partial update of the user-wide preferences; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPreferencePatch {
    pub default_frequency: Option<Frequency>,
    pub email_enabled: Option<bool>,
    pub push_enabled: Option<bool>,
    pub in_app_enabled: Option<bool>,
    pub digest_day: Option<u8>,
    pub digest_hour: Option<u8>,
    pub utc_offset_minutes: Option<i32>,
    pub auto_subscribe_to_created: Option<bool>,
    pub auto_subscribe_to_replies: Option<bool>,
}

impl SubscriptionPreference {
    pub fn apply(mut self, patch: SubscriptionPreferencePatch, now: DateTime<Utc>) -> Self {
        if let Some(value) = patch.default_frequency {
            self.default_frequency = value;
        }
        if let Some(value) = patch.email_enabled {
            self.email_enabled = value;
        }
        if let Some(value) = patch.push_enabled {
            self.push_enabled = value;
        }
        if let Some(value) = patch.in_app_enabled {
            self.in_app_enabled = value;
        }
        if let Some(value) = patch.digest_day {
            self.digest_day = value;
        }
        if let Some(value) = patch.digest_hour {
            self.digest_hour = value;
        }
        if let Some(value) = patch.utc_offset_minutes {
            self.utc_offset_minutes = value;
        }
        if let Some(value) = patch.auto_subscribe_to_created {
            self.auto_subscribe_to_created = value;
        }
        if let Some(value) = patch.auto_subscribe_to_replies {
            self.auto_subscribe_to_replies = value;
        }
        self.updated_at = now;
        self
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels = Vec::new();
        if self.email_enabled {
            channels.push(Channel::Email);
        }
        if self.push_enabled {
            channels.push(Channel::Push);
        }
        if self.in_app_enabled {
            channels.push(Channel::InApp);
        }
        channels
    }
}

string_enum! {
    pub enum ActivityKind {
        TopicCreated => "topicCreated",
        CommentCreated => "commentCreated",
    }
}

/// One unit of activity on a subscribable subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: u64,
    pub subject_kind: SubjectKind,
    pub subject_id: u64,
    pub kind: ActivityKind,
    pub topic_id: u64,
    pub topic_title: String,
    pub actor_id: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewActivityEvent {
    pub subject_kind: SubjectKind,
    pub subject_id: u64,
    pub kind: ActivityKind,
    pub topic_id: u64,
    pub topic_title: String,
    pub actor_id: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestTopic {
    pub topic_id: u64,
    pub title: String,
    pub update_count: u64,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestSubject {
    pub subject_kind: SubjectKind,
    pub subject_id: u64,
    pub activity_count: u64,
    pub topics: Vec<DigestTopic>,
}

/// The materialised content of one digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestPayload {
    pub frequency: Frequency,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_updates: u64,
    pub subjects: Vec<DigestSubject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDigest {
    pub id: u64,
    pub user_id: u64,
    pub frequency: Frequency,
    pub payload: DigestPayload,
    pub scheduled_for: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub status: DigestStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A digest to be stored together with the `lastNotifiedAt` stamp of the subscriptions it covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDigest {
    pub user_id: u64,
    pub frequency: Frequency,
    pub payload: DigestPayload,
    pub scheduled_for: DateTime<Utc>,
    pub covered_subscription_ids: Vec<u64>,
    pub created_at: DateTime<Utc>,
}

string_enum! {
    pub enum NotificationKind {
        NewTopic => "newTopic",
        NewComment => "newComment",
        Mention => "mention",
        ContentApproved => "contentApproved",
        ContentRejected => "contentRejected",
        ReportResolved => "reportResolved",
        ReportRejected => "reportRejected",
        UserAction => "userAction",
        TrustLevelChanged => "trustLevelChanged",
        Digest => "digest",
    }
}

/// The payload handed to the notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub target: Option<TargetRef>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            target: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_target(mut self, target: TargetRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

string_enum! {
    pub enum OutboxStatus {
        Pending => "pending",
        Delivered => "delivered",
        Dead => "dead",
    }
}

/// A notification awaiting (re)delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxMessage {
    pub id: u64,
    pub user_id: u64,
    pub channel: Channel,
    pub notification: Notification,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOutboxMessage {
    pub user_id: u64,
    pub channel: Channel,
    pub notification: Notification,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn subscription() -> Subscription {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        Subscription {
            id: 1,
            user_id: 7,
            subject_kind: SubjectKind::Category,
            subject_id: 3,
            frequency: Frequency::Daily,
            email_enabled: true,
            push_enabled: false,
            in_app_enabled: true,
            muted: false,
            last_notified_at: None,
            expires_at: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn channels_follow_the_enabled_flags() {
        assert_eq!(subscription().channels(), vec![Channel::Email, Channel::InApp]);
    }

    #[test]
    fn muted_or_expired_subscriptions_are_not_live() {
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let mut sub = subscription();
        assert!(sub.is_live(now));
        sub.muted = true;
        assert!(!sub.is_live(now));
        sub.muted = false;
        sub.expires_at = Some(now - chrono::Duration::minutes(1));
        assert!(!sub.is_live(now));
    }

    #[test]
    fn delivery_window_starts_at_creation_until_first_notification() {
        let mut sub = subscription();
        assert_eq!(sub.delivered_until(), sub.created_at);
        let later = sub.created_at + chrono::Duration::hours(3);
        sub.last_notified_at = Some(later);
        assert_eq!(sub.delivered_until(), later);
    }
}
