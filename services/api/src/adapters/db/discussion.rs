//! Categories, topics, comments, reactions, tags and rich text.

use super::records::{
    AttachmentRecord, CategoryConfigRecord, CategoryModeratorRecord, CategoryRecord, CodeBlockRecord, CommentRecord,
    MentionRecord, QuoteRecord, RichTextRecord, TagRecord, TopicRecord,
};
use super::*;
use async_trait::async_trait;
use forum_core::ports::{CategoryStore, CommentStore, ReactionStore, RichTextStore, TagStore, TopicStore};
use sqlx::{Postgres, QueryBuilder};
use std::collections::HashMap;

//=========================================================================================
// Categories
//=========================================================================================

#[async_trait]
impl CategoryStore for PgStore {
    async fn create_category(&self, category: NewCategory, now: DateTime<Utc>) -> PortResult<Category> {
        sqlx::query_as::<_, CategoryRecord>(
            "INSERT INTO categories (name, slug, description, parent_id, sort_order, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, TRUE, $6, $6) RETURNING *",
        )
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.description)
        .bind(opt_id(category.parent_id))
        .bind(category.sort_order)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("category slug '{}'", category.slug)))
        .map(CategoryRecord::to_domain)
    }

    async fn get_category(&self, id: u64) -> PortResult<Category> {
        sqlx::query_as::<_, CategoryRecord>("SELECT * FROM categories WHERE id = $1")
            .bind(db_id(id))
            .fetch_one(&self.pool)
            .await
            .map_err(port_err(format!("category {id}")))
            .map(CategoryRecord::to_domain)
    }

    async fn list_categories(&self) -> PortResult<Vec<Category>> {
        let rows = sqlx::query_as::<_, CategoryRecord>("SELECT * FROM categories ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(port_err("categories"))?;
        Ok(rows.into_iter().map(CategoryRecord::to_domain).collect())
    }

    async fn update_category(&self, id: u64, patch: CategoryPatch, now: DateTime<Utc>) -> PortResult<Category> {
        let what = format!("category {id}");
        sqlx::query_as::<_, CategoryRecord>(
            "UPDATE categories SET name = COALESCE($2, name), slug = COALESCE($3, slug), \
                 description = COALESCE($4, description), \
                 parent_id = CASE WHEN $5 THEN $6 ELSE parent_id END, \
                 sort_order = COALESCE($7, sort_order), is_active = COALESCE($8, is_active), updated_at = $9 \
             WHERE id = $1 RETURNING *",
        )
        .bind(db_id(id))
        .bind(patch.name)
        .bind(patch.slug)
        .bind(patch.description)
        .bind(patch.parent_id.is_some())
        .bind(patch.parent_id.flatten().map(db_id))
        .bind(patch.sort_order)
        .bind(patch.is_active)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(what))
        .map(CategoryRecord::to_domain)
    }

    async fn get_category_config(&self, category_id: u64) -> PortResult<Option<CategoryConfig>> {
        sqlx::query_as::<_, CategoryConfigRecord>("SELECT * FROM category_configs WHERE category_id = $1")
            .bind(db_id(category_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(port_err(format!("config of category {category_id}")))?
            .map(CategoryConfigRecord::to_domain)
            .transpose()
    }

    async fn upsert_category_config(&self, config: CategoryConfig) -> PortResult<CategoryConfig> {
        let count = |v: Option<u32>| v.map(|v| v.min(i32::MAX as u32) as i32);
        sqlx::query_as::<_, CategoryConfigRecord>(
            "INSERT INTO category_configs (category_id, is_restricted, require_approval, min_account_age_hours, \
                 min_trust_level, max_topics_per_hour, max_comments_per_hour, edit_window_minutes, \
                 deletion_policy, auto_moderation, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (category_id) DO UPDATE SET is_restricted = EXCLUDED.is_restricted, \
                 require_approval = EXCLUDED.require_approval, \
                 min_account_age_hours = EXCLUDED.min_account_age_hours, \
                 min_trust_level = EXCLUDED.min_trust_level, max_topics_per_hour = EXCLUDED.max_topics_per_hour, \
                 max_comments_per_hour = EXCLUDED.max_comments_per_hour, \
                 edit_window_minutes = EXCLUDED.edit_window_minutes, deletion_policy = EXCLUDED.deletion_policy, \
                 auto_moderation = EXCLUDED.auto_moderation, updated_at = EXCLUDED.updated_at \
             RETURNING *",
        )
        .bind(db_id(config.category_id))
        .bind(config.is_restricted)
        .bind(config.require_approval)
        .bind(config.min_account_age_hours.min(i32::MAX as u32) as i32)
        .bind(config.min_trust_level.as_str())
        .bind(count(config.max_topics_per_hour))
        .bind(count(config.max_comments_per_hour))
        .bind(count(config.edit_window_minutes))
        .bind(config.deletion_policy.as_str())
        .bind(config.auto_moderation)
        .bind(config.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("category {}", config.category_id)))?
        .to_domain()
    }

    async fn add_category_moderator(&self, moderator: CategoryModerator) -> PortResult<CategoryModerator> {
        sqlx::query_as::<_, CategoryModeratorRecord>(
            "INSERT INTO category_moderators (category_id, user_id, assigned_by, assigned_at) \
             VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(db_id(moderator.category_id))
        .bind(db_id(moderator.user_id))
        .bind(db_id(moderator.assigned_by))
        .bind(moderator.assigned_at)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!(
            "moderator {} of category {}",
            moderator.user_id, moderator.category_id
        )))
        .map(CategoryModeratorRecord::to_domain)
    }

    async fn remove_category_moderator(&self, category_id: u64, user_id: u64) -> PortResult<bool> {
        let removed = sqlx::query("DELETE FROM category_moderators WHERE category_id = $1 AND user_id = $2")
            .bind(db_id(category_id))
            .bind(db_id(user_id))
            .execute(&self.pool)
            .await
            .map_err(port_err(format!("moderator {user_id} of category {category_id}")))?
            .rows_affected();
        Ok(removed > 0)
    }

    async fn list_category_moderators(&self, category_id: u64) -> PortResult<Vec<CategoryModerator>> {
        let rows = sqlx::query_as::<_, CategoryModeratorRecord>(
            "SELECT * FROM category_moderators WHERE category_id = $1 ORDER BY assigned_at, user_id",
        )
        .bind(db_id(category_id))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err(format!("moderators of category {category_id}")))?;
        Ok(rows.into_iter().map(CategoryModeratorRecord::to_domain).collect())
    }

    async fn moderated_categories(&self, user_id: u64) -> PortResult<Vec<u64>> {
        let rows: Vec<i64> =
            sqlx::query_scalar("SELECT category_id FROM category_moderators WHERE user_id = $1 ORDER BY category_id")
                .bind(db_id(user_id))
                .fetch_all(&self.pool)
                .await
                .map_err(port_err(format!("categories moderated by {user_id}")))?;
        Ok(rows.into_iter().map(unsigned).collect())
    }

    async fn ping(&self) -> PortResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(port_err("database"))?;
        Ok(())
    }
}

//=========================================================================================
// Topics
//=========================================================================================

fn push_topic_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &TopicQuery) {
    builder.push(" WHERE TRUE");
    if !query.include_deleted {
        builder.push(" AND t.deleted_at IS NULL");
    }
    if !query.include_unapproved {
        builder.push(" AND t.is_approved");
    }
    for (column, value) in [
        ("t.category_id", query.category_id),
        ("t.author_id", query.author_id),
        ("t.book_id", query.book_id),
        ("t.chapter_id", query.chapter_id),
        ("t.section_id", query.section_id),
    ] {
        if let Some(value) = value {
            builder.push(format!(" AND {column} = ")).push_bind(db_id(value));
        }
    }
    let mut tags = query.tag_ids.clone();
    tags.sort_unstable();
    tags.dedup();
    if !tags.is_empty() {
        let wanted = tags.len() as i64;
        builder
            .push(" AND (SELECT count(*) FROM topic_tags tt WHERE tt.topic_id = t.id AND tt.tag_id = ANY(")
            .push_bind(ids(&tags))
            .push(")) = ")
            .push_bind(wanted);
    }
}

fn topic_order(sort: TopicSort) -> &'static str {
    match sort {
        TopicSort::Activity => " ORDER BY t.is_pinned DESC, t.last_activity_at DESC, t.id DESC",
        TopicSort::Newest => " ORDER BY t.created_at DESC, t.id DESC",
        TopicSort::Oldest => " ORDER BY t.created_at ASC, t.id ASC",
        TopicSort::MostViewed => " ORDER BY t.view_count DESC, t.id DESC",
        TopicSort::MostCommented => " ORDER BY t.comment_count DESC, t.id DESC",
    }
}

#[async_trait]
impl TopicStore for PgStore {
    async fn create_topic(
        &self,
        topic: NewTopic,
        rich_text: RichTextBundle,
        moderation: ModerationRecord,
    ) -> PortResult<Topic> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        let created = insert_topic(&mut *tx, topic).await?;
        store_rich_text(&mut *tx, rich_text, created.target()).await?;
        apply_moderation(&mut *tx, moderation, created.target()).await?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(created)
    }

    async fn get_topic(&self, id: u64) -> PortResult<Topic> {
        let mut conn = self.pool.acquire().await.map_err(port_err("connection"))?;
        fetch_topic(&mut *conn, id).await
    }

    async fn get_topics(&self, topic_ids: &[u64]) -> PortResult<Vec<Topic>> {
        let sql = format!("SELECT {TOPIC_COLUMNS} FROM topics t WHERE t.id = ANY($1)");
        let rows = sqlx::query_as::<_, TopicRecord>(&sql)
            .bind(ids(topic_ids))
            .fetch_all(&self.pool)
            .await
            .map_err(port_err("topics"))?;
        let mut by_id: HashMap<u64, Topic> = rows
            .into_iter()
            .map(TopicRecord::to_domain)
            .map(|t| (t.id, t))
            .collect();
        Ok(topic_ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn list_topics(&self, query: &TopicQuery, page: PageRequest) -> PortResult<Page<Topic>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT count(*) FROM topics t");
        push_topic_filters(&mut count, query);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(port_err("topics"))?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {TOPIC_COLUMNS} FROM topics t"));
        push_topic_filters(&mut select, query);
        select
            .push(topic_order(query.sort))
            .push(" LIMIT ")
            .push_bind(page.limit() as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);
        let rows = select
            .build_query_as::<TopicRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(port_err("topics"))?;
        Ok(page_of(rows.into_iter().map(TopicRecord::to_domain).collect(), total, page))
    }

    async fn update_topic(
        &self,
        topic: &Topic,
        rich_text: Option<RichTextBundle>,
        moderation: ModerationRecord,
    ) -> PortResult<Topic> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        let updated = sqlx::query(
            "UPDATE topics SET title = $2, body = $3, author_id = $4, category_id = $5, is_pinned = $6, \
                 is_locked = $7, is_approved = $8, is_flagged = $9, flag_reason = $10, book_id = $11, \
                 chapter_id = $12, section_id = $13, updated_at = $14, deleted_at = $15 \
             WHERE id = $1",
        )
        .bind(db_id(topic.id))
        .bind(&topic.title)
        .bind(&topic.body)
        .bind(db_id(topic.author_id))
        .bind(db_id(topic.category_id))
        .bind(topic.is_pinned)
        .bind(topic.is_locked)
        .bind(topic.is_approved)
        .bind(topic.is_flagged)
        .bind(&topic.flag_reason)
        .bind(opt_id(topic.book_id))
        .bind(opt_id(topic.chapter_id))
        .bind(opt_id(topic.section_id))
        .bind(topic.updated_at)
        .bind(topic.deleted_at)
        .execute(&mut *tx)
        .await
        .map_err(port_err(format!("category {}", topic.category_id)))?
        .rows_affected();
        if updated == 0 {
            return Err(PortError::not_found(format!("topic {}", topic.id)));
        }
        write_topic_tags(&mut *tx, topic.id, &topic.tag_ids).await?;
        if let Some(bundle) = rich_text {
            store_rich_text(&mut *tx, bundle, topic.target()).await?;
        }
        apply_moderation(&mut *tx, moderation, topic.target()).await?;
        let stored = fetch_topic(&mut *tx, topic.id).await?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(stored)
    }

    async fn soft_delete_topic(&self, id: u64, now: DateTime<Utc>) -> PortResult<()> {
        let updated = sqlx::query(
            "UPDATE topics SET deleted_at = COALESCE(deleted_at, $2), updated_at = $2 WHERE id = $1",
        )
        .bind(db_id(id))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(port_err(format!("topic {id}")))?
        .rows_affected();
        if updated == 0 {
            return Err(PortError::not_found(format!("topic {id}")));
        }
        Ok(())
    }

    async fn increment_view_count(&self, id: u64) -> PortResult<u64> {
        let views: i64 =
            sqlx::query_scalar("UPDATE topics SET view_count = view_count + 1 WHERE id = $1 RETURNING view_count")
                .bind(db_id(id))
                .fetch_one(&self.pool)
                .await
                .map_err(port_err(format!("topic {id}")))?;
        Ok(unsigned(views))
    }

    async fn attach_tag(&self, topic_id: u64, tag_id: u64, now: DateTime<Utc>) -> PortResult<bool> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        fetch_topic(&mut *tx, topic_id).await?;
        let inserted = sqlx::query(
            "INSERT INTO topic_tags (topic_id, tag_id, position) \
             SELECT $1, $2, COALESCE(MAX(position) + 1, 0) FROM topic_tags WHERE topic_id = $1 \
             ON CONFLICT DO NOTHING",
        )
        .bind(db_id(topic_id))
        .bind(db_id(tag_id))
        .execute(&mut *tx)
        .await
        .map_err(port_err(format!("tag {tag_id}")))?
        .rows_affected();
        if inserted > 0 {
            touch_topic(&mut *tx, topic_id, now).await?;
        }
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(inserted > 0)
    }

    async fn detach_tag(&self, topic_id: u64, tag_id: u64, now: DateTime<Utc>) -> PortResult<bool> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        fetch_topic(&mut *tx, topic_id).await?;
        let removed = sqlx::query("DELETE FROM topic_tags WHERE topic_id = $1 AND tag_id = $2")
            .bind(db_id(topic_id))
            .bind(db_id(tag_id))
            .execute(&mut *tx)
            .await
            .map_err(port_err(format!("tag {tag_id}")))?
            .rows_affected();
        if removed > 0 {
            touch_topic(&mut *tx, topic_id, now).await?;
        }
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(removed > 0)
    }
}

async fn touch_topic(conn: &mut PgConnection, topic_id: u64, now: DateTime<Utc>) -> PortResult<()> {
    sqlx::query("UPDATE topics SET updated_at = $2 WHERE id = $1")
        .bind(db_id(topic_id))
        .bind(now)
        .execute(conn)
        .await
        .map_err(port_err(format!("topic {topic_id}")))?;
    Ok(())
}

//=========================================================================================
// Comments
//=========================================================================================

fn push_comment_filter(builder: &mut QueryBuilder<'_, Postgres>, topic_id: u64, include_hidden: bool) {
    builder.push(" WHERE c.topic_id = ").push_bind(db_id(topic_id));
    if !include_hidden {
        // A hidden comment is still listed as a tombstone while it has a visible reply.
        builder
            .push(" AND ((c.is_approved AND c.deleted_at IS NULL) OR (c.deleted_at IS NOT NULL AND c.body = ")
            .push_bind(Comment::TOMBSTONE)
            .push(
                " AND EXISTS (SELECT 1 FROM comments r \
                 WHERE r.parent_comment_id = c.id AND r.is_approved AND r.deleted_at IS NULL)))",
            );
    }
}

#[async_trait]
impl CommentStore for PgStore {
    async fn create_comment(
        &self,
        comment: NewComment,
        rich_text: RichTextBundle,
        moderation: ModerationRecord,
    ) -> PortResult<Comment> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        fetch_topic(&mut *tx, comment.topic_id).await?;
        if let Some(parent_id) = comment.parent_comment_id {
            let parent_topic: Option<i64> = sqlx::query_scalar("SELECT topic_id FROM comments WHERE id = $1")
                .bind(db_id(parent_id))
                .fetch_optional(&mut *tx)
                .await
                .map_err(port_err(format!("comment {parent_id}")))?;
            if parent_topic != Some(db_id(comment.topic_id)) {
                return Err(PortError::not_found(format!(
                    "comment {parent_id} in topic {}",
                    comment.topic_id
                )));
            }
        }
        let created = sqlx::query_as::<_, CommentRecord>(
            "INSERT INTO comments (topic_id, author_id, body, parent_comment_id, is_approved, is_flagged, \
                 flag_reason, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) RETURNING *",
        )
        .bind(db_id(comment.topic_id))
        .bind(db_id(comment.author_id))
        .bind(&comment.body)
        .bind(opt_id(comment.parent_comment_id))
        .bind(comment.is_approved)
        .bind(comment.is_flagged)
        .bind(&comment.flag_reason)
        .bind(comment.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(port_err(format!("topic {}", comment.topic_id)))?
        .to_domain();
        if created.is_approved {
            refresh_topic_activity(&mut *tx, created.topic_id).await?;
        }
        store_rich_text(&mut *tx, rich_text, created.target()).await?;
        apply_moderation(&mut *tx, moderation, created.target()).await?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(created)
    }

    async fn get_comment(&self, id: u64) -> PortResult<Comment> {
        sqlx::query_as::<_, CommentRecord>("SELECT * FROM comments WHERE id = $1")
            .bind(db_id(id))
            .fetch_one(&self.pool)
            .await
            .map_err(port_err(format!("comment {id}")))
            .map(CommentRecord::to_domain)
    }

    async fn list_comments(&self, topic_id: u64, include_hidden: bool, page: PageRequest) -> PortResult<Page<Comment>> {
        let mut conn = self.pool.acquire().await.map_err(port_err("connection"))?;
        fetch_topic(&mut *conn, topic_id).await?;
        let mut count = QueryBuilder::<Postgres>::new("SELECT count(*) FROM comments c");
        push_comment_filter(&mut count, topic_id, include_hidden);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&mut *conn)
            .await
            .map_err(port_err(format!("comments of topic {topic_id}")))?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT c.* FROM comments c");
        push_comment_filter(&mut select, topic_id, include_hidden);
        select
            .push(" ORDER BY c.created_at, c.id LIMIT ")
            .push_bind(page.limit() as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);
        let rows = select
            .build_query_as::<CommentRecord>()
            .fetch_all(&mut *conn)
            .await
            .map_err(port_err(format!("comments of topic {topic_id}")))?;
        Ok(page_of(rows.into_iter().map(CommentRecord::to_domain).collect(), total, page))
    }

    async fn update_comment(
        &self,
        comment: &Comment,
        rich_text: Option<RichTextBundle>,
        moderation: ModerationRecord,
    ) -> PortResult<Comment> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        let updated = sqlx::query_as::<_, CommentRecord>(
            "UPDATE comments SET body = $2, is_edited = $3, edited_at = $4, is_approved = $5, is_flagged = $6, \
                 flag_reason = $7, updated_at = $8 \
             WHERE id = $1 RETURNING *",
        )
        .bind(db_id(comment.id))
        .bind(&comment.body)
        .bind(comment.is_edited)
        .bind(comment.edited_at)
        .bind(comment.is_approved)
        .bind(comment.is_flagged)
        .bind(&comment.flag_reason)
        .bind(comment.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(port_err(format!("comment {}", comment.id)))?
        .to_domain();
        refresh_topic_activity(&mut *tx, updated.topic_id).await?;
        if let Some(bundle) = rich_text {
            store_rich_text(&mut *tx, bundle, updated.target()).await?;
        }
        apply_moderation(&mut *tx, moderation, updated.target()).await?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(updated)
    }

    async fn delete_comment(&self, id: u64, policy: DeletionPolicy, now: DateTime<Utc>) -> PortResult<Vec<u64>> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        let deleted = soft_delete_comment(&mut *tx, id, policy, now).await?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(deleted)
    }
}

//=========================================================================================
// Reactions
//=========================================================================================

#[async_trait]
impl ReactionStore for PgStore {
    async fn add_reaction(&self, reaction: Reaction, policy: ReactionPolicy) -> PortResult<ReactionOutcome> {
        let target = reaction.target;
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        ensure_target(&mut *tx, target).await?;
        let present: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM reactions \
             WHERE user_id = $1 AND target_kind = $2 AND target_id = $3 AND kind = $4)",
        )
        .bind(db_id(reaction.user_id))
        .bind(target.kind.as_str())
        .bind(db_id(target.id))
        .bind(reaction.kind.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(port_err(target))?;
        if present {
            return Ok(ReactionOutcome::AlreadyPresent);
        }
        let mut outcome = ReactionOutcome::Added;
        if policy == ReactionPolicy::SingleKind {
            let replaced = sqlx::query("DELETE FROM reactions WHERE user_id = $1 AND target_kind = $2 AND target_id = $3")
                .bind(db_id(reaction.user_id))
                .bind(target.kind.as_str())
                .bind(db_id(target.id))
                .execute(&mut *tx)
                .await
                .map_err(port_err(target))?
                .rows_affected();
            if replaced > 0 {
                outcome = ReactionOutcome::Replaced;
            }
        }
        sqlx::query(
            "INSERT INTO reactions (user_id, target_kind, target_id, kind, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(db_id(reaction.user_id))
        .bind(target.kind.as_str())
        .bind(db_id(target.id))
        .bind(reaction.kind.as_str())
        .bind(reaction.created_at)
        .execute(&mut *tx)
        .await
        .map_err(port_err(target))?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(outcome)
    }

    async fn remove_reaction(&self, user_id: u64, target: TargetRef, kind: ReactionKind) -> PortResult<bool> {
        let removed = sqlx::query(
            "DELETE FROM reactions WHERE user_id = $1 AND target_kind = $2 AND target_id = $3 AND kind = $4",
        )
        .bind(db_id(user_id))
        .bind(target.kind.as_str())
        .bind(db_id(target.id))
        .bind(kind.as_str())
        .execute(&self.pool)
        .await
        .map_err(port_err(target))?
        .rows_affected();
        Ok(removed > 0)
    }

    async fn reaction_summary(&self, target: TargetRef) -> PortResult<ReactionSummary> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT kind, count(*) FROM reactions WHERE target_kind = $1 AND target_id = $2 GROUP BY kind",
        )
        .bind(target.kind.as_str())
        .bind(db_id(target.id))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err(target))?;
        let counts = rows
            .into_iter()
            .map(|(kind, count)| {
                Ok(ReactionCount {
                    kind: parse(&kind)?,
                    count: unsigned(count),
                })
            })
            .collect::<PortResult<Vec<_>>>()?;
        Ok(ReactionSummary::from_counts(target, counts))
    }
}

//=========================================================================================
// Tags
//=========================================================================================

#[async_trait]
impl TagStore for PgStore {
    async fn create_tag(&self, tag: NewTag, now: DateTime<Utc>) -> PortResult<Tag> {
        sqlx::query_as::<_, TagRecord>(
            "INSERT INTO tags (name, slug, color, is_system, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $5) RETURNING *",
        )
        .bind(&tag.name)
        .bind(&tag.slug)
        .bind(&tag.color)
        .bind(tag.is_system)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("tag slug '{}'", tag.slug)))
        .map(TagRecord::to_domain)
    }

    async fn get_tag(&self, id: u64) -> PortResult<Tag> {
        sqlx::query_as::<_, TagRecord>("SELECT * FROM tags WHERE id = $1")
            .bind(db_id(id))
            .fetch_one(&self.pool)
            .await
            .map_err(port_err(format!("tag {id}")))
            .map(TagRecord::to_domain)
    }

    async fn get_tags(&self, tag_ids: &[u64]) -> PortResult<Vec<Tag>> {
        let rows = sqlx::query_as::<_, TagRecord>("SELECT * FROM tags WHERE id = ANY($1)")
            .bind(ids(tag_ids))
            .fetch_all(&self.pool)
            .await
            .map_err(port_err("tags"))?;
        let mut by_id: HashMap<u64, Tag> = rows.into_iter().map(TagRecord::to_domain).map(|t| (t.id, t)).collect();
        Ok(tag_ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn list_tags(&self) -> PortResult<Vec<Tag>> {
        let rows = sqlx::query_as::<_, TagRecord>("SELECT * FROM tags ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(port_err("tags"))?;
        Ok(rows.into_iter().map(TagRecord::to_domain).collect())
    }

    async fn update_tag(&self, id: u64, patch: TagPatch, now: DateTime<Utc>) -> PortResult<Tag> {
        sqlx::query_as::<_, TagRecord>(
            "UPDATE tags SET name = COALESCE($2, name), slug = COALESCE($3, slug), color = COALESCE($4, color), \
                 updated_at = $5 WHERE id = $1 RETURNING *",
        )
        .bind(db_id(id))
        .bind(patch.name)
        .bind(patch.slug)
        .bind(patch.color)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("tag {id}")))
        .map(TagRecord::to_domain)
    }

    async fn delete_tag(&self, id: u64) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        sqlx::query("DELETE FROM subscriptions WHERE subject_kind = $1 AND subject_id = $2")
            .bind(SubjectKind::Tag.as_str())
            .bind(db_id(id))
            .execute(&mut *tx)
            .await
            .map_err(port_err(format!("tag {id}")))?;
        // topic_tags rows go with the tag through ON DELETE CASCADE.
        let removed = sqlx::query("DELETE FROM tags WHERE id = $1")
            .bind(db_id(id))
            .execute(&mut *tx)
            .await
            .map_err(port_err(format!("tag {id}")))?
            .rows_affected();
        if removed == 0 {
            return Err(PortError::not_found(format!("tag {id}")));
        }
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(())
    }
}

//=========================================================================================
// Rich Text
//=========================================================================================

#[async_trait]
impl RichTextStore for PgStore {
    async fn get_rich_text(&self, target: TargetRef) -> PortResult<Option<RichTextBundle>> {
        let mut conn = self.pool.acquire().await.map_err(port_err("connection"))?;
        let kind = target.kind.as_str();
        let id = db_id(target.id);
        let Some(content) = sqlx::query_as::<_, RichTextRecord>(
            "SELECT * FROM rich_text_contents WHERE target_kind = $1 AND target_id = $2",
        )
        .bind(kind)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(port_err(target))?
        else {
            return Ok(None);
        };

        let attachments = sqlx::query_as::<_, AttachmentRecord>(
            "SELECT * FROM rich_text_attachments WHERE target_kind = $1 AND target_id = $2 ORDER BY position",
        )
        .bind(kind)
        .bind(id)
        .fetch_all(&mut *conn)
        .await
        .map_err(port_err(target))?;
        let code_blocks = sqlx::query_as::<_, CodeBlockRecord>(
            "SELECT * FROM rich_text_code_blocks WHERE target_kind = $1 AND target_id = $2 ORDER BY position",
        )
        .bind(kind)
        .bind(id)
        .fetch_all(&mut *conn)
        .await
        .map_err(port_err(target))?;
        let quotes = sqlx::query_as::<_, QuoteRecord>(
            "SELECT * FROM rich_text_quotes WHERE target_kind = $1 AND target_id = $2 ORDER BY position",
        )
        .bind(kind)
        .bind(id)
        .fetch_all(&mut *conn)
        .await
        .map_err(port_err(target))?;
        let mentions = sqlx::query_as::<_, MentionRecord>(
            "SELECT * FROM rich_text_mentions WHERE target_kind = $1 AND target_id = $2 ORDER BY mentioned_user_id",
        )
        .bind(kind)
        .bind(id)
        .fetch_all(&mut *conn)
        .await
        .map_err(port_err(target))?;

        Ok(Some(RichTextBundle {
            content: content.to_domain()?,
            attachments: attachments.into_iter().map(|a| a.to_domain(target)).collect(),
            code_blocks: code_blocks.into_iter().map(|c| c.to_domain(target)).collect(),
            quotes: quotes
                .into_iter()
                .map(|q| q.to_domain(target))
                .collect::<PortResult<Vec<_>>>()?,
            mentions: mentions.into_iter().map(|m| m.to_domain(target)).collect(),
        }))
    }
}
