//! services/api/src/adapters/notifier.rs
//!
//! Delivery sinks implementing the `Notifier` port.

use async_trait::async_trait;
use forum_core::domain::{Channel, Notification};
use forum_core::ports::{Notifier, PortError, PortResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// Hands every notification to the log. Used when no delivery gateway is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, user_id: u64, channel: Channel, notification: &Notification) -> PortResult<()> {
        info!(
            user_id,
            %channel,
            kind = %notification.kind,
            title = %notification.title,
            "Notification handed over"
        );
        Ok(())
    }
}

/// One accepted delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub user_id: u64,
    pub channel: Channel,
    pub notification: Notification,
}

/// Keeps every delivery in memory and can be told to fail the next few calls.
#[derive(Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<Delivery>>,
    failures_left: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` sends fail with `PortError::Unavailable`.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn deliveries_to(&self, user_id: u64) -> Vec<Delivery> {
        self.deliveries().into_iter().filter(|d| d.user_id == user_id).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, user_id: u64, channel: Channel, notification: &Notification) -> PortResult<()> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PortError::Unavailable("notification gateway".to_string()));
        }
        self.deliveries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Delivery {
                user_id,
                channel,
                notification: notification.clone(),
            });
        Ok(())
    }
}

/// Bounds every send; an elapsed deadline surfaces as `PortError::Timeout`.
pub struct TimedNotifier {
    inner: Arc<dyn Notifier>,
    timeout: Duration,
}

impl TimedNotifier {
    pub fn new(inner: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Notifier for TimedNotifier {
    async fn send(&self, user_id: u64, channel: Channel, notification: &Notification) -> PortResult<()> {
        super::with_timeout("notifier", self.timeout, self.inner.send(user_id, channel, notification)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forum_core::domain::NotificationKind;

    #[tokio::test]
    async fn scheduled_failures_are_consumed_before_deliveries_resume() {
        let notifier = RecordingNotifier::new();
        notifier.fail_next(1);
        let note = Notification::new(NotificationKind::Mention, "Mentioned", "@reader");

        assert!(notifier.send(4, Channel::InApp, &note).await.is_err());
        notifier.send(4, Channel::InApp, &note).await.unwrap();
        assert_eq!(notifier.deliveries_to(4).len(), 1);
    }

    #[tokio::test]
    async fn slow_sinks_time_out() {
        struct Stalled;

        #[async_trait]
        impl Notifier for Stalled {
            async fn send(&self, _: u64, _: Channel, _: &Notification) -> PortResult<()> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        }

        let notifier = TimedNotifier::new(Arc::new(Stalled), Duration::from_millis(10));
        let note = Notification::new(NotificationKind::Mention, "Mentioned", "@reader");
        assert!(matches!(
            notifier.send(1, Channel::Email, &note).await,
            Err(PortError::Timeout(_))
        ));
    }
}
