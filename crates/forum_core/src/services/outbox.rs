//! Retried delivery of notifications parked in the outbox.

use crate::domain::OutboxMessage;
use crate::error::ForumResult;
use crate::ports::{Clock, DiscussionStore, Notifier, PortError};
use crate::services::Ports;
use crate::settings::ForumSettings;
use rand::Rng;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxSummary {
    pub delivered: usize,
    pub rescheduled: usize,
    pub dead: usize,
}

pub struct OutboxDispatcher {
    store: Arc<dyn DiscussionStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: Arc<ForumSettings>,
}

impl OutboxDispatcher {
    pub fn new(ports: &Ports, settings: Arc<ForumSettings>) -> Self {
        Self {
            store: ports.store.clone(),
            notifier: ports.notifier.clone(),
            clock: ports.clock.clone(),
            settings,
        }
    }

    /// Attempts every due message once. Failures back off exponentially
    /// with jitter until the attempt budget is spent, then go `dead`.
    #[instrument(skip(self))]
    pub async fn deliver_due(&self, limit: u32) -> ForumResult<OutboxSummary> {
        let mut summary = OutboxSummary::default();
        for message in self.store.due_outbox(self.clock.now(), limit).await? {
            match self.notifier.send(message.user_id, message.channel, &message.notification).await {
                Ok(()) => {
                    self.store.mark_outbox_delivered(message.id, self.clock.now()).await?;
                    summary.delivered += 1;
                }
                Err(err) => {
                    if self.retry_or_bury(&message, err).await? {
                        summary.rescheduled += 1;
                    } else {
                        summary.dead += 1;
                    }
                }
            }
        }
        if summary != OutboxSummary::default() {
            info!(
                delivered = summary.delivered,
                rescheduled = summary.rescheduled,
                dead = summary.dead,
                "Outbox pass finished"
            );
        }
        Ok(summary)
    }

    /// Returns `true` when the message was rescheduled.
    async fn retry_or_bury(&self, message: &OutboxMessage, err: PortError) -> ForumResult<bool> {
        let attempts = message.attempts + 1;
        let retryable = matches!(err, PortError::Timeout(_) | PortError::Unavailable(_));
        let policy = self.settings.retry;
        let now = self.clock.now();
        if retryable && attempts < policy.max_attempts {
            let jitter: f64 = rand::rng().random();
            let next = now + policy.delay(attempts, jitter);
            warn!(
                outbox_id = message.id,
                user_id = message.user_id,
                attempts,
                error = %err,
                "Notification delivery failed; rescheduled"
            );
            self.store
                .reschedule_outbox(message.id, attempts, next, err.to_string())
                .await?;
            Ok(true)
        } else {
            warn!(
                outbox_id = message.id,
                user_id = message.user_id,
                attempts,
                error = %err,
                "Notification delivery abandoned"
            );
            self.store
                .mark_outbox_dead(message.id, attempts, err.to_string(), now)
                .await?;
            Ok(false)
        }
    }
}
