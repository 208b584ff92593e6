//! Rules, words, filter results, the review queue, grants, user actions and trust rows.

use super::records::{
    FilterResultRecord, GrantRecord, QueueItemRecord, RuleRecord, TrustRecord, UserActionRecord, WordRecord,
};
use super::*;
use async_trait::async_trait;
use forum_core::ports::{ModerationStore, TrustCounters, TrustStore};

const QUEUE_ORDER: &str = " ORDER BY priority DESC, created_at, id";

fn queue_items(rows: Vec<QueueItemRecord>) -> PortResult<Vec<ModerationQueueItem>> {
    rows.into_iter().map(QueueItemRecord::to_domain).collect()
}

/// Loads a queue item under a row lock and checks the optimistic version
/// and the requested transition.
async fn lock_queue_item(
    conn: &mut PgConnection,
    id: u64,
    expected_version: u64,
    next: QueueStatus,
) -> PortResult<ModerationQueueItem> {
    let item = sqlx::query_as::<_, QueueItemRecord>("SELECT * FROM moderation_queue_items WHERE id = $1 FOR UPDATE")
        .bind(db_id(id))
        .fetch_one(conn)
        .await
        .map_err(port_err(format!("queue item {id}")))?
        .to_domain()?;
    if item.version != expected_version {
        return Err(PortError::conflict(format!("queue item {id} changed concurrently")));
    }
    if !item.status.can_transition_to(next) {
        return Err(PortError::conflict(format!(
            "queue item {id} cannot move from {} to {next}",
            item.status
        )));
    }
    Ok(item)
}

#[async_trait]
impl ModerationStore for PgStore {
    async fn create_rule(&self, rule: NewModerationRule, now: DateTime<Utc>) -> PortResult<ModerationRule> {
        sqlx::query_as::<_, RuleRecord>(
            "INSERT INTO moderation_rules (name, applies_to, pattern_kind, pattern, action, severity, is_active, \
                 created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) RETURNING *",
        )
        .bind(&rule.name)
        .bind(rule.applies_to.as_str())
        .bind(rule.pattern_kind.as_str())
        .bind(&rule.pattern)
        .bind(rule.action.as_str())
        .bind(i16::from(rule.severity))
        .bind(rule.is_active)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("rule '{}'", rule.name)))?
        .to_domain()
    }

    async fn get_rule(&self, id: u64) -> PortResult<ModerationRule> {
        sqlx::query_as::<_, RuleRecord>("SELECT * FROM moderation_rules WHERE id = $1")
            .bind(db_id(id))
            .fetch_one(&self.pool)
            .await
            .map_err(port_err(format!("rule {id}")))?
            .to_domain()
    }

    async fn list_rules(&self, active_only: bool) -> PortResult<Vec<ModerationRule>> {
        let rows = sqlx::query_as::<_, RuleRecord>(
            "SELECT * FROM moderation_rules WHERE NOT $1 OR is_active ORDER BY id",
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(port_err("rules"))?;
        rows.into_iter().map(RuleRecord::to_domain).collect()
    }

    async fn update_rule(&self, id: u64, patch: ModerationRulePatch, now: DateTime<Utc>) -> PortResult<ModerationRule> {
        sqlx::query_as::<_, RuleRecord>(
            "UPDATE moderation_rules SET name = COALESCE($2, name), applies_to = COALESCE($3, applies_to), \
                 pattern_kind = COALESCE($4, pattern_kind), pattern = COALESCE($5, pattern), \
                 action = COALESCE($6, action), severity = COALESCE($7, severity), \
                 is_active = COALESCE($8, is_active), updated_at = $9 \
             WHERE id = $1 RETURNING *",
        )
        .bind(db_id(id))
        .bind(patch.name)
        .bind(patch.applies_to.map(|v| v.as_str()))
        .bind(patch.pattern_kind.map(|v| v.as_str()))
        .bind(patch.pattern)
        .bind(patch.action.map(|v| v.as_str()))
        .bind(patch.severity.map(i16::from))
        .bind(patch.is_active)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("rule {id}")))?
        .to_domain()
    }

    async fn delete_rule(&self, id: u64) -> PortResult<()> {
        let removed = sqlx::query("DELETE FROM moderation_rules WHERE id = $1")
            .bind(db_id(id))
            .execute(&self.pool)
            .await
            .map_err(port_err(format!("rule {id}")))?
            .rows_affected();
        if removed == 0 {
            return Err(PortError::not_found(format!("rule {id}")));
        }
        Ok(())
    }

    async fn create_word(&self, word: NewProhibitedWord, now: DateTime<Utc>) -> PortResult<ProhibitedWord> {
        sqlx::query_as::<_, WordRecord>(
            "INSERT INTO prohibited_words (word, is_regex, severity, action, replacement, is_auto_replace, \
                 is_active, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7) RETURNING *",
        )
        .bind(&word.word)
        .bind(word.is_regex)
        .bind(i16::from(word.severity))
        .bind(word.action.as_str())
        .bind(&word.replacement)
        .bind(word.is_auto_replace)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("prohibited word '{}'", word.word)))?
        .to_domain()
    }

    async fn list_words(&self, active_only: bool) -> PortResult<Vec<ProhibitedWord>> {
        let rows = sqlx::query_as::<_, WordRecord>(
            "SELECT * FROM prohibited_words WHERE NOT $1 OR is_active ORDER BY id",
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(port_err("prohibited words"))?;
        rows.into_iter().map(WordRecord::to_domain).collect()
    }

    async fn delete_word(&self, id: u64) -> PortResult<()> {
        let removed = sqlx::query("DELETE FROM prohibited_words WHERE id = $1")
            .bind(db_id(id))
            .execute(&self.pool)
            .await
            .map_err(port_err(format!("prohibited word {id}")))?
            .rows_affected();
        if removed == 0 {
            return Err(PortError::not_found(format!("prohibited word {id}")));
        }
        Ok(())
    }

    async fn create_filter_result(&self, result: NewFilterResult) -> PortResult<ContentFilterResult> {
        let mut conn = self.pool.acquire().await.map_err(port_err("connection"))?;
        insert_filter_result(&mut *conn, result).await
    }

    async fn get_filter_result(&self, id: u64) -> PortResult<ContentFilterResult> {
        sqlx::query_as::<_, FilterResultRecord>("SELECT * FROM content_filter_results WHERE id = $1")
            .bind(db_id(id))
            .fetch_one(&self.pool)
            .await
            .map_err(port_err(format!("filter result {id}")))?
            .to_domain()
    }

    async fn list_filter_results(&self, target_kind: TargetKind, target_id: u64) -> PortResult<Vec<ContentFilterResult>> {
        let rows = sqlx::query_as::<_, FilterResultRecord>(
            "SELECT * FROM content_filter_results WHERE target_kind = $1 AND target_id = $2 ORDER BY id",
        )
        .bind(target_kind.as_str())
        .bind(db_id(target_id))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err(format!("filter results of {target_kind} {target_id}")))?;
        rows.into_iter().map(FilterResultRecord::to_domain).collect()
    }

    async fn get_queue_item(&self, id: u64) -> PortResult<ModerationQueueItem> {
        sqlx::query_as::<_, QueueItemRecord>("SELECT * FROM moderation_queue_items WHERE id = $1")
            .bind(db_id(id))
            .fetch_one(&self.pool)
            .await
            .map_err(port_err(format!("queue item {id}")))?
            .to_domain()
    }

    async fn list_queue(&self, status: Option<QueueStatus>, page: PageRequest) -> PortResult<Page<ModerationQueueItem>> {
        let status = status.map(|s| s.as_str());
        let total: i64 =
            sqlx::query_scalar("SELECT count(*) FROM moderation_queue_items WHERE $1::TEXT IS NULL OR status = $1")
                .bind(status)
                .fetch_one(&self.pool)
                .await
                .map_err(port_err("moderation queue"))?;
        let rows = sqlx::query_as::<_, QueueItemRecord>(&format!(
            "SELECT * FROM moderation_queue_items WHERE $1::TEXT IS NULL OR status = $1{QUEUE_ORDER} LIMIT $2 OFFSET $3"
        ))
        .bind(status)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(port_err("moderation queue"))?;
        Ok(page_of(queue_items(rows)?, total, page))
    }

    async fn next_pending_queue_item(&self) -> PortResult<Option<ModerationQueueItem>> {
        sqlx::query_as::<_, QueueItemRecord>(&format!(
            "SELECT * FROM moderation_queue_items WHERE status = $1{QUEUE_ORDER} LIMIT 1"
        ))
        .bind(QueueStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(port_err("moderation queue"))?
        .map(QueueItemRecord::to_domain)
        .transpose()
    }

    async fn find_open_queue_item(&self, target: TargetRef) -> PortResult<Option<ModerationQueueItem>> {
        sqlx::query_as::<_, QueueItemRecord>(
            "SELECT * FROM moderation_queue_items \
             WHERE target_kind = $1 AND target_id = $2 AND status IN ('pending', 'inReview')",
        )
        .bind(target.kind.as_str())
        .bind(db_id(target.id))
        .fetch_optional(&self.pool)
        .await
        .map_err(port_err(target))?
        .map(QueueItemRecord::to_domain)
        .transpose()
    }

    async fn transition_queue_item(
        &self,
        id: u64,
        expected_version: u64,
        status: QueueStatus,
        assignee: Option<u64>,
        now: DateTime<Utc>,
    ) -> PortResult<ModerationQueueItem> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        lock_queue_item(&mut *tx, id, expected_version, status).await?;
        let item = sqlx::query_as::<_, QueueItemRecord>(
            "UPDATE moderation_queue_items SET status = $2, assigned_to = $3, version = version + 1, updated_at = $4 \
             WHERE id = $1 RETURNING *",
        )
        .bind(db_id(id))
        .bind(status.as_str())
        .bind(opt_id(assignee))
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(port_err(format!("queue item {id}")))?
        .to_domain()?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(item)
    }

    async fn resolve_queue_item(
        &self,
        id: u64,
        expected_version: u64,
        resolution: QueueResolution,
    ) -> PortResult<ModerationQueueItem> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        let item = lock_queue_item(&mut *tx, id, expected_version, resolution.status).await?;
        let now = resolution.reviewed_at;
        apply_mutation(&mut *tx, item.target, &resolution.mutation, now).await?;
        if let Some(result_id) = item.filter_result_id {
            sqlx::query("UPDATE content_filter_results SET moderator_id = $2, reviewed_at = $3 WHERE id = $1")
                .bind(db_id(result_id))
                .bind(db_id(resolution.reviewed_by))
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(port_err(format!("filter result {result_id}")))?;
        }
        if let Some(action) = resolution.user_action {
            insert_user_action(&mut *tx, action).await?;
        }
        insert_outbox(&mut *tx, resolution.notifications).await?;
        let resolved = sqlx::query_as::<_, QueueItemRecord>(
            "UPDATE moderation_queue_items SET status = $2, decision = $3, reviewed_by = $4, reviewed_at = $5, \
                 notes = $6, version = version + 1, updated_at = $5 \
             WHERE id = $1 RETURNING *",
        )
        .bind(db_id(id))
        .bind(resolution.status.as_str())
        .bind(resolution.decision.as_str())
        .bind(db_id(resolution.reviewed_by))
        .bind(now)
        .bind(&resolution.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(port_err(format!("queue item {id}")))?
        .to_domain()?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(resolved)
    }

    async fn revert_stale_reviews(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> PortResult<Vec<u64>> {
        let mut reverted: Vec<u64> = sqlx::query_scalar::<_, i64>(
            "UPDATE moderation_queue_items SET status = $1, assigned_to = NULL, version = version + 1, updated_at = $4 \
             WHERE status = $2 AND updated_at < $3 RETURNING id",
        )
        .bind(QueueStatus::Pending.as_str())
        .bind(QueueStatus::InReview.as_str())
        .bind(cutoff)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(port_err("moderation queue"))?
        .into_iter()
        .map(unsigned)
        .collect();
        reverted.sort_unstable();
        Ok(reverted)
    }

    async fn get_moderator_grant(&self, user_id: u64) -> PortResult<Option<ModeratorGrant>> {
        let grant = sqlx::query_as::<_, GrantRecord>("SELECT * FROM moderator_grants WHERE user_id = $1")
            .bind(db_id(user_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(port_err(format!("grant of user {user_id}")))?;
        Ok(grant.map(GrantRecord::to_domain))
    }

    async fn upsert_moderator_grant(&self, grant: ModeratorGrant) -> PortResult<ModeratorGrant> {
        sqlx::query_as::<_, GrantRecord>(
            "INSERT INTO moderator_grants (user_id, is_global, can_approve_content, can_reject_content, \
                 can_delete_content, can_ban_users, can_edit_any_content, can_manage_rules, can_assign_moderators, \
                 is_active, assigned_by, assigned_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (user_id) DO UPDATE SET is_global = EXCLUDED.is_global, \
                 can_approve_content = EXCLUDED.can_approve_content, \
                 can_reject_content = EXCLUDED.can_reject_content, \
                 can_delete_content = EXCLUDED.can_delete_content, can_ban_users = EXCLUDED.can_ban_users, \
                 can_edit_any_content = EXCLUDED.can_edit_any_content, \
                 can_manage_rules = EXCLUDED.can_manage_rules, \
                 can_assign_moderators = EXCLUDED.can_assign_moderators, is_active = EXCLUDED.is_active, \
                 assigned_by = EXCLUDED.assigned_by, assigned_at = EXCLUDED.assigned_at, \
                 expires_at = EXCLUDED.expires_at \
             RETURNING *",
        )
        .bind(db_id(grant.user_id))
        .bind(grant.is_global)
        .bind(grant.can_approve_content)
        .bind(grant.can_reject_content)
        .bind(grant.can_delete_content)
        .bind(grant.can_ban_users)
        .bind(grant.can_edit_any_content)
        .bind(grant.can_manage_rules)
        .bind(grant.can_assign_moderators)
        .bind(grant.is_active)
        .bind(db_id(grant.assigned_by))
        .bind(grant.assigned_at)
        .bind(grant.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("grant of user {}", grant.user_id)))
        .map(GrantRecord::to_domain)
    }

    async fn create_user_action(&self, action: NewUserModerationAction) -> PortResult<UserModerationAction> {
        let mut conn = self.pool.acquire().await.map_err(port_err("connection"))?;
        insert_user_action(&mut *conn, action).await
    }

    async fn get_user_action(&self, id: u64) -> PortResult<UserModerationAction> {
        sqlx::query_as::<_, UserActionRecord>("SELECT * FROM user_moderation_actions WHERE id = $1")
            .bind(db_id(id))
            .fetch_one(&self.pool)
            .await
            .map_err(port_err(format!("user action {id}")))?
            .to_domain()
    }

    async fn list_user_actions(&self, user_id: u64) -> PortResult<Vec<UserModerationAction>> {
        let rows = sqlx::query_as::<_, UserActionRecord>(
            "SELECT * FROM user_moderation_actions WHERE user_id = $1 ORDER BY applied_at DESC, id DESC",
        )
        .bind(db_id(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err(format!("actions on user {user_id}")))?;
        rows.into_iter().map(UserActionRecord::to_domain).collect()
    }

    async fn revoke_user_action(&self, id: u64, revoked_by: u64, now: DateTime<Utc>) -> PortResult<UserModerationAction> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        let active: bool = sqlx::query_scalar("SELECT is_active FROM user_moderation_actions WHERE id = $1 FOR UPDATE")
            .bind(db_id(id))
            .fetch_one(&mut *tx)
            .await
            .map_err(port_err(format!("user action {id}")))?;
        if !active {
            return Err(PortError::conflict(format!("user action {id} is already revoked")));
        }
        let revoked = sqlx::query_as::<_, UserActionRecord>(
            "UPDATE user_moderation_actions SET is_active = FALSE, revoked_by = $2, revoked_at = $3 \
             WHERE id = $1 RETURNING *",
        )
        .bind(db_id(id))
        .bind(db_id(revoked_by))
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(port_err(format!("user action {id}")))?
        .to_domain()?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(revoked)
    }
}

//=========================================================================================
// Trust
//=========================================================================================

fn counter(value: u32) -> i32 {
    value.min(i32::MAX as u32) as i32
}

#[async_trait]
impl TrustStore for PgStore {
    async fn get_trust_score(&self, user_id: u64) -> PortResult<Option<UserTrustScore>> {
        sqlx::query_as::<_, TrustRecord>("SELECT * FROM user_trust_scores WHERE user_id = $1")
            .bind(db_id(user_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(port_err(format!("trust of user {user_id}")))?
            .map(TrustRecord::to_domain)
            .transpose()
    }

    async fn save_trust_score(&self, score: UserTrustScore) -> PortResult<UserTrustScore> {
        sqlx::query_as::<_, TrustRecord>(
            "INSERT INTO user_trust_scores (user_id, level, score, content_score, community_score, moderator_score, \
                 report_count, warning_count, content_rejections, last_calculated_at, manual_adjustment, \
                 manual_adjustment_reason, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (user_id) DO UPDATE SET level = EXCLUDED.level, score = EXCLUDED.score, \
                 content_score = EXCLUDED.content_score, community_score = EXCLUDED.community_score, \
                 moderator_score = EXCLUDED.moderator_score, report_count = EXCLUDED.report_count, \
                 warning_count = EXCLUDED.warning_count, content_rejections = EXCLUDED.content_rejections, \
                 last_calculated_at = EXCLUDED.last_calculated_at, manual_adjustment = EXCLUDED.manual_adjustment, \
                 manual_adjustment_reason = EXCLUDED.manual_adjustment_reason, updated_at = EXCLUDED.updated_at \
             RETURNING *",
        )
        .bind(db_id(score.user_id))
        .bind(score.level.as_str())
        .bind(score.score)
        .bind(score.content_score)
        .bind(score.community_score)
        .bind(score.moderator_score)
        .bind(counter(score.report_count))
        .bind(counter(score.warning_count))
        .bind(counter(score.content_rejections))
        .bind(score.last_calculated_at)
        .bind(score.manual_adjustment)
        .bind(&score.manual_adjustment_reason)
        .bind(score.created_at)
        .bind(score.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("trust of user {}", score.user_id)))?
        .to_domain()
    }

    async fn bump_trust_counters(
        &self,
        user_id: u64,
        counters: TrustCounters,
        now: DateTime<Utc>,
    ) -> PortResult<UserTrustScore> {
        let fresh = UserTrustScore::fresh(user_id, now);
        sqlx::query_as::<_, TrustRecord>(
            "INSERT INTO user_trust_scores (user_id, level, score, content_score, community_score, moderator_score, \
                 report_count, warning_count, content_rejections, last_calculated_at, manual_adjustment, \
                 created_at, updated_at) \
             VALUES ($1, $2, 0, 0, 0, 0, $3, $4, $5, $6, 0, $7, $7) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 report_count = user_trust_scores.report_count + EXCLUDED.report_count, \
                 warning_count = user_trust_scores.warning_count + EXCLUDED.warning_count, \
                 content_rejections = user_trust_scores.content_rejections + EXCLUDED.content_rejections, \
                 last_calculated_at = EXCLUDED.last_calculated_at, updated_at = EXCLUDED.updated_at \
             RETURNING *",
        )
        .bind(db_id(user_id))
        .bind(fresh.level.as_str())
        .bind(counter(counters.reports))
        .bind(counter(counters.warnings))
        .bind(counter(counters.rejections))
        .bind(fresh.last_calculated_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("trust of user {user_id}")))?
        .to_domain()
    }

    async fn contribution_stats(&self, user_id: u64) -> PortResult<ContributionStats> {
        let (topics, comments, approved, reactions): (i64, i64, i64, i64) = sqlx::query_as(
            "WITH mine AS ( \
                 SELECT 'topic' AS kind, id, is_approved FROM topics WHERE author_id = $1 AND deleted_at IS NULL \
                 UNION ALL \
                 SELECT 'comment', id, is_approved FROM comments WHERE author_id = $1 AND deleted_at IS NULL) \
             SELECT \
                 (SELECT count(*) FROM mine WHERE kind = 'topic'), \
                 (SELECT count(*) FROM mine WHERE kind = 'comment'), \
                 (SELECT count(*) FROM mine WHERE is_approved), \
                 (SELECT count(*) FROM reactions r JOIN mine m ON r.target_kind = m.kind AND r.target_id = m.id \
                  WHERE r.user_id <> $1)",
        )
        .bind(db_id(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("contributions of user {user_id}")))?;
        Ok(ContributionStats {
            topics_created: unsigned(topics),
            comments_created: unsigned(comments),
            approved_contributions: unsigned(approved),
            reactions_received: unsigned(reactions),
            account_age_days: 0,
        })
    }

    async fn stale_trust_users(&self, cutoff: DateTime<Utc>, limit: u32) -> PortResult<Vec<u64>> {
        let rows: Vec<i64> = sqlx::query_scalar(
            "SELECT user_id FROM user_trust_scores WHERE last_calculated_at < $1 \
             ORDER BY last_calculated_at, user_id LIMIT $2",
        )
        .bind(cutoff)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err("trust scores"))?;
        Ok(rows.into_iter().map(unsigned).collect())
    }
}
