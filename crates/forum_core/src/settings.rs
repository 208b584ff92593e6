//! Tunables of the discussion subsystem.

use crate::domain::{ReactionPolicy, TrustLevel};
use crate::ports::TokenBucket;
use chrono::Duration;

/// Trust scoring weights and level boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustSettings {
    /// Lower bounds of `basic`, `member`, `regular` and `leader`.
    pub thresholds: [f64; 4],
    pub content_weight: f64,
    pub community_weight: f64,
    pub moderator_weight: f64,
    /// Scores older than this are recalculated on read.
    pub recalculation_interval: Duration,
    /// Window in which a moderation action counts as a recent infraction.
    pub infraction_window: Duration,
    pub lock_ttl: Duration,
    /// More reactions than this on one author's posts within `burst_window`
    /// recalculates the author's score at once.
    pub burst_reactions: u32,
    pub burst_window: Duration,
}

impl Default for TrustSettings {
    fn default() -> Self {
        Self {
            thresholds: [10.0, 25.0, 50.0, 80.0],
            content_weight: 0.4,
            community_weight: 0.35,
            moderator_weight: 0.25,
            recalculation_interval: Duration::hours(1),
            infraction_window: Duration::days(30),
            lock_ttl: Duration::seconds(30),
            burst_reactions: 20,
            burst_window: Duration::minutes(10),
        }
    }
}

impl TrustSettings {
    pub fn level_for(&self, score: f64) -> TrustLevel {
        let [basic, member, regular, leader] = self.thresholds;
        if score >= leader {
            TrustLevel::Leader
        } else if score >= regular {
            TrustLevel::Regular
        } else if score >= member {
            TrustLevel::Member
        } else if score >= basic {
            TrustLevel::Basic
        } else {
            TrustLevel::NewUser
        }
    }
}

/// Exponential backoff with jitter for background retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::seconds(2),
            max_delay: Duration::minutes(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based). `jitter` in `[0, 1)`
    /// stretches the delay by up to half of itself.
    pub fn delay(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base_ms = self.base_delay.num_milliseconds().saturating_mul(1_i64 << exponent);
        let capped = base_ms.min(self.max_delay.num_milliseconds());
        let jittered = capped as f64 * (1.0 + jitter.clamp(0.0, 1.0) / 2.0);
        Duration::milliseconds(jittered as i64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForumSettings {
    pub max_title_chars: usize,
    pub max_body_bytes: usize,
    /// Largest inline `data:image/...` URL kept by the renderer.
    pub max_data_image_bytes: usize,
    pub view_dedupe_window: Duration,
    /// Applies when the category config sets no edit window; `None` is unlimited.
    pub default_edit_window: Option<Duration>,
    pub reaction_policy: ReactionPolicy,
    pub trust: TrustSettings,
    pub queue_stale_after: Duration,
    /// Pending digests older than this many cadences are failed.
    pub digest_drift_multiplier: i32,
    pub digest_retention: Duration,
    /// Category that receives template-generated topics.
    pub auto_topic_category_id: Option<u64>,
    /// Author recorded on template-generated topics.
    pub system_user_id: u64,
    pub recommendation_top_n: usize,
    pub recommendation_candidates: u32,
    pub report_rate_limit: TokenBucket,
    pub retry: RetryPolicy,
}

impl Default for ForumSettings {
    fn default() -> Self {
        Self {
            max_title_chars: 200,
            max_body_bytes: 64 * 1024,
            max_data_image_bytes: 32 * 1024,
            view_dedupe_window: Duration::minutes(30),
            default_edit_window: None,
            reaction_policy: ReactionPolicy::MultiKind,
            trust: TrustSettings::default(),
            queue_stale_after: Duration::minutes(60),
            digest_drift_multiplier: 2,
            digest_retention: Duration::days(90),
            auto_topic_category_id: None,
            system_user_id: 1,
            recommendation_top_n: 10,
            recommendation_candidates: 200,
            report_rate_limit: TokenBucket::per_hour(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Converts a chrono span into a cache TTL, flooring negatives at zero.
pub(crate) fn ttl(span: Duration) -> std::time::Duration {
    span.to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_bands_follow_the_thresholds() {
        let trust = TrustSettings::default();
        assert_eq!(trust.level_for(0.0), TrustLevel::NewUser);
        assert_eq!(trust.level_for(9.99), TrustLevel::NewUser);
        assert_eq!(trust.level_for(10.0), TrustLevel::Basic);
        assert_eq!(trust.level_for(25.0), TrustLevel::Member);
        assert_eq!(trust.level_for(79.9), TrustLevel::Regular);
        assert_eq!(trust.level_for(100.0), TrustLevel::Leader);
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1, 0.0), Duration::seconds(2));
        assert_eq!(policy.delay(3, 0.0), Duration::seconds(8));
        assert_eq!(policy.delay(30, 0.0), Duration::minutes(10));
        assert_eq!(policy.delay(1, 1.0), Duration::seconds(3));
    }
}
