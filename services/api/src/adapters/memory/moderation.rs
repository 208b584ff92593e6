//! Rules, words, filter results, the review queue, grants, user actions and trust rows.

use super::MemoryStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forum_core::domain::*;
use forum_core::ports::{ModerationStore, PortError, PortResult, TrustCounters, TrustStore};
use std::cmp::Reverse;

fn queue_order(items: &mut [ModerationQueueItem]) {
    items.sort_by_key(|item| (Reverse(item.priority), item.created_at, item.id));
}

#[async_trait]
impl ModerationStore for MemoryStore {
    async fn create_rule(&self, rule: NewModerationRule, now: DateTime<Utc>) -> PortResult<ModerationRule> {
        let mut state = self.write();
        if state.rules.values().any(|r| r.name == rule.name) {
            return Err(PortError::conflict(format!("rule '{}'", rule.name)));
        }
        let id = state.next_id();
        let stored = ModerationRule {
            id,
            name: rule.name,
            applies_to: rule.applies_to,
            pattern_kind: rule.pattern_kind,
            pattern: rule.pattern,
            action: rule.action,
            severity: rule.severity,
            is_active: rule.is_active,
            created_at: now,
            updated_at: now,
        };
        state.rules.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_rule(&self, id: u64) -> PortResult<ModerationRule> {
        self.read()
            .rules
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found(format!("rule {id}")))
    }

    async fn list_rules(&self, active_only: bool) -> PortResult<Vec<ModerationRule>> {
        Ok(self
            .read()
            .rules
            .values()
            .filter(|r| !active_only || r.is_active)
            .cloned()
            .collect())
    }

    async fn update_rule(&self, id: u64, patch: ModerationRulePatch, now: DateTime<Utc>) -> PortResult<ModerationRule> {
        let mut state = self.write();
        if let Some(name) = &patch.name {
            if state.rules.values().any(|r| r.id != id && &r.name == name) {
                return Err(PortError::conflict(format!("rule '{name}'")));
            }
        }
        let rule = state
            .rules
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("rule {id}")))?;
        if let Some(name) = patch.name {
            rule.name = name;
        }
        if let Some(applies_to) = patch.applies_to {
            rule.applies_to = applies_to;
        }
        if let Some(pattern_kind) = patch.pattern_kind {
            rule.pattern_kind = pattern_kind;
        }
        if let Some(pattern) = patch.pattern {
            rule.pattern = pattern;
        }
        if let Some(action) = patch.action {
            rule.action = action;
        }
        if let Some(severity) = patch.severity {
            rule.severity = severity;
        }
        if let Some(is_active) = patch.is_active {
            rule.is_active = is_active;
        }
        rule.updated_at = now;
        Ok(rule.clone())
    }

    async fn delete_rule(&self, id: u64) -> PortResult<()> {
        match self.write().rules.remove(&id) {
            Some(_) => Ok(()),
            None => Err(PortError::not_found(format!("rule {id}"))),
        }
    }

    async fn create_word(&self, word: NewProhibitedWord, now: DateTime<Utc>) -> PortResult<ProhibitedWord> {
        let mut state = self.write();
        if state.words.values().any(|w| w.word.eq_ignore_ascii_case(&word.word)) {
            return Err(PortError::conflict(format!("prohibited word '{}'", word.word)));
        }
        let id = state.next_id();
        let stored = ProhibitedWord {
            id,
            word: word.word,
            is_regex: word.is_regex,
            severity: word.severity,
            action: word.action,
            replacement: word.replacement,
            is_auto_replace: word.is_auto_replace,
            is_active: true,
            created_at: now,
        };
        state.words.insert(id, stored.clone());
        Ok(stored)
    }

    async fn list_words(&self, active_only: bool) -> PortResult<Vec<ProhibitedWord>> {
        Ok(self
            .read()
            .words
            .values()
            .filter(|w| !active_only || w.is_active)
            .cloned()
            .collect())
    }

    async fn delete_word(&self, id: u64) -> PortResult<()> {
        match self.write().words.remove(&id) {
            Some(_) => Ok(()),
            None => Err(PortError::not_found(format!("prohibited word {id}"))),
        }
    }

    async fn create_filter_result(&self, result: NewFilterResult) -> PortResult<ContentFilterResult> {
        Ok(self.write().insert_filter_result(result))
    }

    async fn get_filter_result(&self, id: u64) -> PortResult<ContentFilterResult> {
        self.read()
            .filter_results
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found(format!("filter result {id}")))
    }

    async fn list_filter_results(&self, target_kind: TargetKind, target_id: u64) -> PortResult<Vec<ContentFilterResult>> {
        Ok(self
            .read()
            .filter_results
            .values()
            .filter(|r| r.target_kind == target_kind && r.target_id == Some(target_id))
            .cloned()
            .collect())
    }

    async fn get_queue_item(&self, id: u64) -> PortResult<ModerationQueueItem> {
        self.read()
            .queue
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found(format!("queue item {id}")))
    }

    async fn list_queue(&self, status: Option<QueueStatus>, page: PageRequest) -> PortResult<Page<ModerationQueueItem>> {
        let mut items: Vec<ModerationQueueItem> = self
            .read()
            .queue
            .values()
            .filter(|item| status.map_or(true, |s| item.status == s))
            .cloned()
            .collect();
        queue_order(&mut items);
        Ok(Page::from_vec(items, page))
    }

    async fn next_pending_queue_item(&self) -> PortResult<Option<ModerationQueueItem>> {
        let mut pending: Vec<ModerationQueueItem> = self
            .read()
            .queue
            .values()
            .filter(|item| item.status == QueueStatus::Pending)
            .cloned()
            .collect();
        queue_order(&mut pending);
        Ok(pending.into_iter().next())
    }

    async fn find_open_queue_item(&self, target: TargetRef) -> PortResult<Option<ModerationQueueItem>> {
        Ok(self
            .read()
            .queue
            .values()
            .find(|item| item.target == target && item.status.is_open())
            .cloned())
    }

    async fn transition_queue_item(
        &self,
        id: u64,
        expected_version: u64,
        status: QueueStatus,
        assignee: Option<u64>,
        now: DateTime<Utc>,
    ) -> PortResult<ModerationQueueItem> {
        let mut state = self.write();
        let item = state
            .queue
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("queue item {id}")))?;
        if item.version != expected_version {
            return Err(PortError::conflict(format!("queue item {id} changed concurrently")));
        }
        if !item.status.can_transition_to(status) {
            return Err(PortError::conflict(format!("queue item {id} cannot move from {} to {status}", item.status)));
        }
        item.status = status;
        item.assigned_to = assignee;
        item.version += 1;
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn resolve_queue_item(
        &self,
        id: u64,
        expected_version: u64,
        resolution: QueueResolution,
    ) -> PortResult<ModerationQueueItem> {
        let mut state = self.write();
        let item = state
            .queue
            .get(&id)
            .ok_or_else(|| PortError::not_found(format!("queue item {id}")))?;
        if item.version != expected_version {
            return Err(PortError::conflict(format!("queue item {id} changed concurrently")));
        }
        if !item.status.can_transition_to(resolution.status) {
            return Err(PortError::conflict(format!(
                "queue item {id} cannot move from {} to {}",
                item.status, resolution.status
            )));
        }
        let (target, filter_result_id) = (item.target, item.filter_result_id);
        state.ensure_target(target)?;

        let now = resolution.reviewed_at;
        state.apply_mutation(target, &resolution.mutation, now)?;
        if let Some(result) = filter_result_id.and_then(|rid| state.filter_results.get_mut(&rid)) {
            result.moderator_id = Some(resolution.reviewed_by);
            result.reviewed_at = Some(now);
        }
        if let Some(action) = resolution.user_action {
            state.insert_user_action(action);
        }
        state.insert_outbox(resolution.notifications);

        let item = state
            .queue
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("queue item {id}")))?;
        item.status = resolution.status;
        item.decision = Some(resolution.decision);
        item.reviewed_by = Some(resolution.reviewed_by);
        item.reviewed_at = Some(now);
        item.notes = resolution.notes;
        item.version += 1;
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn revert_stale_reviews(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> PortResult<Vec<u64>> {
        let mut state = self.write();
        let mut reverted = Vec::new();
        for item in state.queue.values_mut() {
            if item.status == QueueStatus::InReview && item.updated_at < cutoff {
                item.status = QueueStatus::Pending;
                item.assigned_to = None;
                item.version += 1;
                item.updated_at = now;
                reverted.push(item.id);
            }
        }
        Ok(reverted)
    }

    async fn get_moderator_grant(&self, user_id: u64) -> PortResult<Option<ModeratorGrant>> {
        Ok(self.read().grants.get(&user_id).cloned())
    }

    async fn upsert_moderator_grant(&self, grant: ModeratorGrant) -> PortResult<ModeratorGrant> {
        self.write().grants.insert(grant.user_id, grant.clone());
        Ok(grant)
    }

    async fn create_user_action(&self, action: NewUserModerationAction) -> PortResult<UserModerationAction> {
        Ok(self.write().insert_user_action(action))
    }

    async fn get_user_action(&self, id: u64) -> PortResult<UserModerationAction> {
        self.read()
            .user_actions
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found(format!("user action {id}")))
    }

    async fn list_user_actions(&self, user_id: u64) -> PortResult<Vec<UserModerationAction>> {
        let mut actions: Vec<UserModerationAction> = self
            .read()
            .user_actions
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        actions.sort_by_key(|a| (Reverse(a.applied_at), Reverse(a.id)));
        Ok(actions)
    }

    async fn revoke_user_action(&self, id: u64, revoked_by: u64, now: DateTime<Utc>) -> PortResult<UserModerationAction> {
        let mut state = self.write();
        let action = state
            .user_actions
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("user action {id}")))?;
        if !action.is_active {
            return Err(PortError::conflict(format!("user action {id} is already revoked")));
        }
        action.is_active = false;
        action.revoked_by = Some(revoked_by);
        action.revoked_at = Some(now);
        Ok(action.clone())
    }
}

#[async_trait]
impl TrustStore for MemoryStore {
    async fn get_trust_score(&self, user_id: u64) -> PortResult<Option<UserTrustScore>> {
        Ok(self.read().trust.get(&user_id).cloned())
    }

    async fn save_trust_score(&self, score: UserTrustScore) -> PortResult<UserTrustScore> {
        self.write().trust.insert(score.user_id, score.clone());
        Ok(score)
    }

    async fn bump_trust_counters(&self, user_id: u64, counters: TrustCounters, now: DateTime<Utc>) -> PortResult<UserTrustScore> {
        let mut state = self.write();
        let row = state
            .trust
            .entry(user_id)
            .or_insert_with(|| UserTrustScore::fresh(user_id, now));
        row.report_count += counters.reports;
        row.warning_count += counters.warnings;
        row.content_rejections += counters.rejections;
        row.last_calculated_at = DateTime::<Utc>::default();
        row.updated_at = now;
        Ok(row.clone())
    }

    async fn contribution_stats(&self, user_id: u64) -> PortResult<ContributionStats> {
        let state = self.read();
        let topics: Vec<&Topic> = state
            .topics
            .values()
            .filter(|t| t.author_id == user_id && !t.is_deleted())
            .collect();
        let comments: Vec<&Comment> = state
            .comments
            .values()
            .filter(|c| c.author_id == user_id && !c.is_deleted())
            .collect();
        let approved = topics.iter().filter(|t| t.is_approved).count() + comments.iter().filter(|c| c.is_approved).count();
        let reactions_received = state
            .reactions
            .iter()
            .filter(|r| r.user_id != user_id)
            .filter(|r| match r.target.kind {
                TargetKind::Topic => topics.iter().any(|t| t.id == r.target.id),
                TargetKind::Comment => comments.iter().any(|c| c.id == r.target.id),
            })
            .count();
        Ok(ContributionStats {
            topics_created: topics.len() as u64,
            comments_created: comments.len() as u64,
            approved_contributions: approved as u64,
            reactions_received: reactions_received as u64,
            account_age_days: 0,
        })
    }

    async fn stale_trust_users(&self, cutoff: DateTime<Utc>, limit: u32) -> PortResult<Vec<u64>> {
        let state = self.read();
        let mut stale: Vec<&UserTrustScore> = state
            .trust
            .values()
            .filter(|row| row.last_calculated_at < cutoff)
            .collect();
        stale.sort_by_key(|row| (row.last_calculated_at, row.user_id));
        Ok(stale.into_iter().take(limit as usize).map(|row| row.user_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 10, minute, 0).unwrap()
    }

    fn queued(store: &MemoryStore, priority: u8, minute: u32) -> u64 {
        let mut state = store.write();
        let id = state.next_id();
        state.queue.insert(
            id,
            ModerationQueueItem {
                id,
                target: TargetRef::comment(100 + id),
                author_id: 5,
                reason: "flagged".into(),
                filter_result_id: None,
                status: QueueStatus::Pending,
                priority,
                assigned_to: None,
                reviewed_by: None,
                reviewed_at: None,
                decision: None,
                notes: String::new(),
                version: 0,
                created_at: at(minute),
                updated_at: at(minute),
            },
        );
        id
    }

    #[tokio::test]
    async fn next_pending_prefers_priority_then_age() {
        let store = MemoryStore::new();
        let _low = queued(&store, 2, 0);
        let urgent_late = queued(&store, 5, 9);
        let urgent_early = queued(&store, 5, 3);
        let next = store.next_pending_queue_item().await.unwrap().unwrap();
        assert_eq!(next.id, urgent_early);
        assert_ne!(next.id, urgent_late);
    }

    #[tokio::test]
    async fn stale_versions_lose_the_claim() {
        let store = MemoryStore::new();
        let id = queued(&store, 3, 0);
        let claimed = store
            .transition_queue_item(id, 0, QueueStatus::InReview, Some(7), at(1))
            .await
            .unwrap();
        assert_eq!(claimed.version, 1);
        let lost = store.transition_queue_item(id, 0, QueueStatus::InReview, Some(8), at(1)).await;
        assert!(matches!(lost, Err(PortError::Conflict(_))));
    }

    #[tokio::test]
    async fn stale_reviews_return_to_pending() {
        let store = MemoryStore::new();
        let id = queued(&store, 3, 0);
        store
            .transition_queue_item(id, 0, QueueStatus::InReview, Some(7), at(1))
            .await
            .unwrap();
        let reverted = store.revert_stale_reviews(at(30), at(31)).await.unwrap();
        assert_eq!(reverted, vec![id]);
        let item = store.get_queue_item(id).await.unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.assigned_to, None);
    }

    #[tokio::test]
    async fn counter_bumps_mark_the_row_stale() {
        let store = MemoryStore::new();
        let counters = TrustCounters { warnings: 1, ..Default::default() };
        let row = store.bump_trust_counters(3, counters, at(0)).await.unwrap();
        assert_eq!(row.warning_count, 1);
        assert_eq!(store.stale_trust_users(at(0), 10).await.unwrap(), vec![3]);
    }
}
