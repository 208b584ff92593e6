//! Ports for the collaborators the discussion core does not own.

use super::PortResult;
use crate::domain::{AttachmentInfo, Channel, ContentKind, ContentMetadata, Notification, UserProfile};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Token-bucket shape: `capacity` tokens refilled evenly over `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucket {
    pub capacity: u32,
    pub window: Duration,
}

impl TokenBucket {
    pub fn per_hour(capacity: u32) -> Self {
        Self { capacity, window: Duration::from_secs(3600) }
    }

    /// Seconds until one token has been refilled.
    pub fn refill_interval_secs(&self) -> f64 {
        self.window.as_secs_f64() / f64::from(self.capacity.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after_secs: u64,
}

/// Key-value cache used for dedupe markers, rate limits and advisory locks.
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Sets `key` when it is absent; returns whether this call created it.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> PortResult<bool>;
    async fn take_token(&self, key: &str, bucket: TokenBucket) -> PortResult<RateDecision>;
    async fn try_lock(&self, key: &str, ttl: Duration) -> PortResult<bool>;
    async fn unlock(&self, key: &str) -> PortResult<()>;
}

/// Outbound delivery sink. Success means the message was handed over, not delivered.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, user_id: u64, channel: Channel, notification: &Notification) -> PortResult<()>;
}

/// Read-only book-content lookups.
#[async_trait]
pub trait ContentMetadataService: Send + Sync {
    async fn get_content_metadata(&self, kind: ContentKind, id: u64) -> PortResult<ContentMetadata>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: u64) -> PortResult<UserProfile>;
    /// Case-insensitive; unknown handles are simply absent from the result.
    async fn find_by_handles(&self, handles: &[String]) -> PortResult<Vec<UserProfile>>;
}

/// Looks up uploaded files by opaque handle.
#[async_trait]
pub trait AttachmentInspector: Send + Sync {
    async fn describe(&self, handle: &str) -> PortResult<Option<AttachmentInfo>>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
