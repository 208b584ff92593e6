//! Per-user trust scores and levels.

use crate::domain::{
    Channel, ContributionStats, NewOutboxMessage, Notification, NotificationKind, Principal, TrustLevel,
    UserTrustScore,
};
use crate::error::{ForumError, ForumResult};
use crate::ports::{CacheService, Clock, DiscussionStore, PortError, TokenBucket, TrustCounters, UserDirectory};
use crate::services::{AccessControl, Ports};
use crate::settings::{ttl, ForumSettings, TrustSettings};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the content filter needs to know about an author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorStanding {
    pub level: TrustLevel,
    pub recent_infraction: bool,
}

/// Component scores and the weighted total, all in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub content: f64,
    pub community: f64,
    pub moderator: f64,
    pub total: f64,
}

/// Scores a user from activity, penalty counters and the manual adjustment.
/// Every penalty counter enters with a non-positive coefficient.
pub fn compute_score(
    settings: &TrustSettings,
    stats: &ContributionStats,
    counters: &UserTrustScore,
) -> ScoreBreakdown {
    let approved = stats.approved_contributions as f64;
    let rejections = f64::from(counters.content_rejections);
    let warnings = f64::from(counters.warning_count);
    let reports = f64::from(counters.report_count);

    let content = (approved * 2.0 - rejections * 10.0).clamp(0.0, 100.0);
    let community =
        ((stats.reactions_received.min(70)) as f64 + (stats.account_age_days.min(60) as f64) * 0.5).clamp(0.0, 100.0);
    let standing = (100.0 - warnings * 20.0 - reports * 10.0 - rejections * 15.0).clamp(0.0, 100.0);
    let track_record = (approved / 20.0).min(1.0);
    let moderator = standing * track_record;

    let total = (settings.content_weight * content
        + settings.community_weight * community
        + settings.moderator_weight * moderator
        + counters.manual_adjustment)
        .clamp(0.0, 100.0);

    ScoreBreakdown { content, community, moderator, total }
}

pub struct TrustEngine {
    store: Arc<dyn DiscussionStore>,
    users: Arc<dyn UserDirectory>,
    cache: Arc<dyn CacheService>,
    clock: Arc<dyn Clock>,
    access: Arc<AccessControl>,
    settings: Arc<ForumSettings>,
}

impl TrustEngine {
    pub fn new(ports: &Ports, access: Arc<AccessControl>, settings: Arc<ForumSettings>) -> Self {
        Self {
            store: ports.store.clone(),
            users: ports.users.clone(),
            cache: ports.cache.clone(),
            clock: ports.clock.clone(),
            access,
            settings,
        }
    }

    /// The current score, recalculated first when it has gone stale.
    pub async fn score(&self, user_id: u64) -> ForumResult<UserTrustScore> {
        let now = self.clock.now();
        match self.store.get_trust_score(user_id).await? {
            Some(score) if now - score.last_calculated_at < self.settings.trust.recalculation_interval => Ok(score),
            _ => self.recalculate(user_id).await,
        }
    }

    pub async fn level(&self, user_id: u64) -> ForumResult<TrustLevel> {
        Ok(self.score(user_id).await?.level)
    }

    pub async fn standing(&self, user_id: u64) -> ForumResult<AuthorStanding> {
        let level = self.level(user_id).await?;
        let since = self.clock.now() - self.settings.trust.infraction_window;
        let recent_infraction = self
            .store
            .list_user_actions(user_id)
            .await?
            .iter()
            .any(|action| action.applied_at >= since);
        Ok(AuthorStanding { level, recent_infraction })
    }

    /// Recomputes and persists the score under the per-user advisory lock.
    /// When another worker holds the lock the stored row is returned as is.
    pub async fn recalculate(&self, user_id: u64) -> ForumResult<UserTrustScore> {
        let key = format!("trust:{user_id}");
        let held = match self.cache.try_lock(&key, ttl(self.settings.trust.lock_ttl)).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(user_id, "Trust recalculation already in progress");
                if let Some(score) = self.store.get_trust_score(user_id).await? {
                    return Ok(score);
                }
                false
            }
            Err(err) => {
                warn!(user_id, error = %err, "Trust lock unavailable; recalculating without it");
                false
            }
        };

        let result = self.recalculate_unlocked(user_id).await;

        if held {
            if let Err(err) = self.cache.unlock(&key).await {
                warn!(user_id, error = %err, "Failed to release trust lock");
            }
        }
        result
    }

    async fn recalculate_unlocked(&self, user_id: u64) -> ForumResult<UserTrustScore> {
        let now = self.clock.now();
        let previous = self.store.get_trust_score(user_id).await?;

        let mut stats = self.store.contribution_stats(user_id).await?;
        stats.account_age_days = match self.users.get_user(user_id).await {
            Ok(profile) => (now - profile.created_at).num_days().max(0) as u64,
            Err(PortError::NotFound(_)) => 0,
            Err(err) => return Err(err.into()),
        };

        let base = previous.clone().unwrap_or_else(|| UserTrustScore::fresh(user_id, now));
        let breakdown = compute_score(&self.settings.trust, &stats, &base);
        let level = self.settings.trust.level_for(breakdown.total);

        let saved = self
            .store
            .save_trust_score(UserTrustScore {
                level,
                score: breakdown.total,
                content_score: breakdown.content,
                community_score: breakdown.community,
                moderator_score: breakdown.moderator,
                last_calculated_at: now,
                updated_at: now,
                ..base
            })
            .await?;

        if let Some(previous) = previous {
            if previous.level != saved.level {
                info!(
                    user_id,
                    from = %previous.level,
                    to = %saved.level,
                    score = saved.score,
                    "Trust level changed"
                );
                self.announce_level_change(&previous, &saved).await;
            }
        }
        Ok(saved)
    }

    async fn announce_level_change(&self, previous: &UserTrustScore, current: &UserTrustScore) {
        let notification = Notification::new(
            NotificationKind::TrustLevelChanged,
            "Your trust level changed",
            format!("Your trust level is now {}.", current.level),
        )
        .with_data(serde_json::json!({
            "from": previous.level,
            "to": current.level,
        }));
        let message = NewOutboxMessage {
            user_id: current.user_id,
            channel: Channel::InApp,
            notification,
            created_at: self.clock.now(),
        };
        if let Err(err) = self.store.enqueue_outbox(vec![message]).await {
            warn!(user_id = current.user_id, error = %err, "Failed to queue trust level notification");
        }
    }

    async fn bump(&self, user_id: u64, counters: TrustCounters) -> ForumResult<UserTrustScore> {
        self.store.bump_trust_counters(user_id, counters, self.clock.now()).await?;
        self.recalculate(user_id).await
    }

    /// Counts a reaction on `author_id`'s content. Once the count in the burst
    /// window passes the threshold the score is recalculated, at most once per window.
    pub async fn record_reaction_received(&self, author_id: u64) -> ForumResult<Option<UserTrustScore>> {
        let burst = &self.settings.trust;
        let bucket = TokenBucket {
            capacity: burst.burst_reactions,
            window: ttl(burst.burst_window),
        };
        let decision = self.cache.take_token(&format!("reactions:{author_id}"), bucket).await?;
        if decision.allowed {
            return Ok(None);
        }
        if !self
            .cache
            .set_if_absent(&format!("trust-burst:{author_id}"), ttl(burst.burst_window))
            .await?
        {
            return Ok(None);
        }
        debug!(user_id = author_id, "Reaction burst; recalculating trust");
        self.recalculate(author_id).await.map(Some)
    }

    pub async fn record_warning(&self, user_id: u64) -> ForumResult<UserTrustScore> {
        self.bump(user_id, TrustCounters { warnings: 1, ..Default::default() }).await
    }

    pub async fn record_rejection(&self, user_id: u64) -> ForumResult<UserTrustScore> {
        self.bump(user_id, TrustCounters { rejections: 1, ..Default::default() }).await
    }

    pub async fn record_upheld_report(&self, user_id: u64) -> ForumResult<UserTrustScore> {
        self.bump(user_id, TrustCounters { reports: 1, ..Default::default() }).await
    }

    /// Additive moderator adjustment, persisted with its reason.
    pub async fn adjust(
        &self,
        principal: &Principal,
        user_id: u64,
        delta: f64,
        reason: String,
    ) -> ForumResult<UserTrustScore> {
        self.access.require_moderator(principal, None).await?;
        if !delta.is_finite() || delta.abs() > 100.0 {
            return Err(ForumError::validation("adjustment must be within [-100, 100]"));
        }
        if reason.trim().is_empty() {
            return Err(ForumError::validation("an adjustment needs a reason"));
        }
        let now = self.clock.now();
        let mut row = match self.store.get_trust_score(user_id).await? {
            Some(row) => row,
            None => UserTrustScore::fresh(user_id, now),
        };
        row.manual_adjustment += delta;
        row.manual_adjustment_reason = Some(reason);
        row.updated_at = now;
        self.store.save_trust_score(row).await?;
        info!(user_id, delta, by = principal.user_id, "Manual trust adjustment");
        self.recalculate(user_id).await
    }

    /// Recalculates scores that went stale; returns how many were refreshed.
    pub async fn recalculate_stale(&self, limit: u32) -> ForumResult<usize> {
        let cutoff = self.clock.now() - self.settings.trust.recalculation_interval;
        let users = self.store.stale_trust_users(cutoff, limit).await?;
        let mut refreshed = 0;
        for user_id in users {
            match self.recalculate(user_id).await {
                Ok(_) => refreshed += 1,
                Err(err) if err.is_retryable() => return Err(err),
                Err(err) => warn!(user_id, error = %err, "Skipping trust recalculation"),
            }
        }
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row() -> UserTrustScore {
        UserTrustScore::fresh(1, Utc::now())
    }

    #[test]
    fn newcomers_start_as_new_users() {
        let settings = TrustSettings::default();
        let breakdown = compute_score(&settings, &ContributionStats::default(), &row());
        assert_eq!(breakdown.total, 0.0);
        assert_eq!(settings.level_for(breakdown.total), TrustLevel::NewUser);
    }

    #[test]
    fn rejections_never_raise_the_score() {
        let settings = TrustSettings::default();
        let stats = ContributionStats {
            topics_created: 10,
            comments_created: 30,
            approved_contributions: 40,
            reactions_received: 50,
            account_age_days: 90,
        };
        let mut counters = row();
        let mut last = compute_score(&settings, &stats, &counters).total;
        for _ in 0..10 {
            counters.content_rejections += 1;
            let next = compute_score(&settings, &stats, &counters).total;
            assert!(next <= last);
            last = next;
        }
    }

    #[test]
    fn manual_adjustment_is_additive_and_clamped() {
        let settings = TrustSettings::default();
        let mut counters = row();
        counters.manual_adjustment = 30.0;
        assert_eq!(compute_score(&settings, &ContributionStats::default(), &counters).total, 30.0);
        counters.manual_adjustment = 500.0;
        assert_eq!(compute_score(&settings, &ContributionStats::default(), &counters).total, 100.0);
    }
}
