//! services/api/src/adapters/db/mod.rs
//!
//! This module contains the PostgreSQL adapter, the production implementation
//! of every store port in `forum_core`. It handles all interactions with the
//! database using `sqlx`; each multi-row port method runs inside one
//! transaction, so a failure part-way through leaves nothing behind.

mod content;
mod directory;
mod discussion;
mod moderation;
mod records;
mod reports;
mod subscriptions;

use chrono::{DateTime, Utc};
use forum_core::domain::*;
use forum_core::ports::{PortError, PortResult};
use sqlx::{PgConnection, PgPool};
use std::fmt::Display;
use std::str::FromStr;

use records::TopicRecord;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter implementing every store port.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new `PgStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

//=========================================================================================
// Error and Value Conversions
//=========================================================================================

/// Maps a sqlx failure onto the port error set. `what` names the row for
/// `NotFound` messages.
pub(super) fn port_err(what: impl Display) -> impl FnOnce(sqlx::Error) -> PortError {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what.to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PortError::Conflict(format!("{what}: {}", db.message()))
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            PortError::NotFound(format!("{what}: {}", db.constraint().unwrap_or("referenced row")))
        }
        sqlx::Error::PoolTimedOut => PortError::Timeout("database pool".to_string()),
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            PortError::Unavailable(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

/// Parses a stored enum name; an unknown name means the row is corrupt.
pub(super) fn parse<T>(value: &str) -> PortResult<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    value.parse().map_err(|e: UnknownVariant| PortError::Unexpected(e.to_string()))
}

/// Ids are minted by a `BIGINT` sequence and never exceed `i64::MAX`.
pub(super) fn db_id(id: u64) -> i64 {
    id as i64
}

pub(super) fn opt_id(id: Option<u64>) -> Option<i64> {
    id.map(db_id)
}

pub(super) fn ids(values: &[u64]) -> Vec<i64> {
    values.iter().map(|v| db_id(*v)).collect()
}

pub(super) fn unsigned(value: i64) -> u64 {
    value.max(0) as u64
}

pub(super) fn opt_unsigned(value: Option<i64>) -> Option<u64> {
    value.map(unsigned)
}

fn page_of<T>(items: Vec<T>, total: i64, page: PageRequest) -> Page<T> {
    Page {
        items,
        total: unsigned(total),
        page: page.page,
        page_size: page.page_size,
    }
}

/// Columns of a topic row, with its tag ids folded in from `topic_tags`.
pub(super) const TOPIC_COLUMNS: &str = "t.id, t.title, t.body, t.author_id, t.category_id, t.is_pinned, \
     t.is_locked, t.is_approved, t.is_flagged, t.flag_reason, t.view_count, t.comment_count, \
     t.last_activity_at, t.book_id, t.chapter_id, t.section_id, t.created_at, t.updated_at, t.deleted_at, \
     COALESCE((SELECT array_agg(tt.tag_id ORDER BY tt.position) FROM topic_tags tt WHERE tt.topic_id = t.id), \
     '{}') AS tag_ids";

//=========================================================================================
// Shared Transactional Steps
//=========================================================================================
// These run on a connection borrowed from an open transaction so the calling
// port method commits or rolls back everything together.

pub(super) async fn fetch_topic(conn: &mut PgConnection, id: u64) -> PortResult<Topic> {
    let sql = format!("SELECT {TOPIC_COLUMNS} FROM topics t WHERE t.id = $1");
    sqlx::query_as::<_, TopicRecord>(&sql)
        .bind(db_id(id))
        .fetch_one(conn)
        .await
        .map_err(port_err(format!("topic {id}")))
        .map(TopicRecord::to_domain)
}

pub(super) async fn ensure_target(conn: &mut PgConnection, target: TargetRef) -> PortResult<()> {
    let sql = match target.kind {
        TargetKind::Topic => "SELECT EXISTS (SELECT 1 FROM topics WHERE id = $1)",
        TargetKind::Comment => "SELECT EXISTS (SELECT 1 FROM comments WHERE id = $1)",
    };
    let exists: bool = sqlx::query_scalar(sql)
        .bind(db_id(target.id))
        .fetch_one(conn)
        .await
        .map_err(port_err(target))?;
    if exists {
        Ok(())
    } else {
        Err(PortError::not_found(target))
    }
}

/// Replaces the ordered tag list of a topic. Unknown tags fail with `NotFound`.
pub(super) async fn write_topic_tags(conn: &mut PgConnection, topic_id: u64, tag_ids: &[u64]) -> PortResult<()> {
    sqlx::query("DELETE FROM topic_tags WHERE topic_id = $1")
        .bind(db_id(topic_id))
        .execute(&mut *conn)
        .await
        .map_err(port_err(format!("topic {topic_id}")))?;
    let mut seen = Vec::with_capacity(tag_ids.len());
    for tag_id in tag_ids {
        if seen.contains(tag_id) {
            continue;
        }
        seen.push(*tag_id);
        sqlx::query("INSERT INTO topic_tags (topic_id, tag_id, position) VALUES ($1, $2, $3)")
            .bind(db_id(topic_id))
            .bind(db_id(*tag_id))
            .bind(seen.len() as i32 - 1)
            .execute(&mut *conn)
            .await
            .map_err(port_err(format!("tag {tag_id}")))?;
    }
    Ok(())
}

pub(super) async fn insert_topic(conn: &mut PgConnection, topic: NewTopic) -> PortResult<Topic> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO topics (title, body, author_id, category_id, is_approved, is_flagged, flag_reason, \
         last_activity_at, book_id, chapter_id, section_id, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $8, $8) RETURNING id",
    )
    .bind(&topic.title)
    .bind(&topic.body)
    .bind(db_id(topic.author_id))
    .bind(db_id(topic.category_id))
    .bind(topic.is_approved)
    .bind(topic.is_flagged)
    .bind(&topic.flag_reason)
    .bind(topic.created_at)
    .bind(opt_id(topic.book_id))
    .bind(opt_id(topic.chapter_id))
    .bind(opt_id(topic.section_id))
    .fetch_one(&mut *conn)
    .await
    .map_err(port_err(format!("category {}", topic.category_id)))?;
    let id = unsigned(id);
    write_topic_tags(&mut *conn, id, &topic.tag_ids).await?;
    fetch_topic(conn, id).await
}

/// Recomputes `comment_count` and `last_activity_at` from the visible comments.
pub(super) async fn refresh_topic_activity(conn: &mut PgConnection, topic_id: u64) -> PortResult<()> {
    sqlx::query(
        "UPDATE topics t SET comment_count = s.visible, \
             last_activity_at = GREATEST(t.created_at, COALESCE(s.latest, t.created_at)) \
         FROM (SELECT COUNT(*) AS visible, MAX(created_at) AS latest FROM comments \
               WHERE topic_id = $1 AND is_approved AND deleted_at IS NULL) s \
         WHERE t.id = $1",
    )
    .bind(db_id(topic_id))
    .execute(conn)
    .await
    .map_err(port_err(format!("topic {topic_id}")))?;
    Ok(())
}

async fn clear_rich_text_side_tables(conn: &mut PgConnection, target: TargetRef) -> PortResult<()> {
    for table in [
        "rich_text_attachments",
        "rich_text_code_blocks",
        "rich_text_quotes",
        "rich_text_mentions",
    ] {
        sqlx::query(&format!("DELETE FROM {table} WHERE target_kind = $1 AND target_id = $2"))
            .bind(target.kind.as_str())
            .bind(db_id(target.id))
            .execute(&mut *conn)
            .await
            .map_err(port_err(target))?;
    }
    Ok(())
}

/// Upserts the rich text of `target` and rewrites its side tables.
pub(super) async fn store_rich_text(
    conn: &mut PgConnection,
    bundle: RichTextBundle,
    target: TargetRef,
) -> PortResult<()> {
    let bundle = bundle.retarget(target.kind, target.id);
    let content = &bundle.content;
    sqlx::query(
        "INSERT INTO rich_text_contents (target_kind, target_id, format, raw_body, rendered_html, \
             has_mentions, has_attachments, contains_media, contains_code, last_processed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         ON CONFLICT (target_kind, target_id) DO UPDATE SET format = EXCLUDED.format, \
             raw_body = EXCLUDED.raw_body, rendered_html = EXCLUDED.rendered_html, \
             has_mentions = EXCLUDED.has_mentions, has_attachments = EXCLUDED.has_attachments, \
             contains_media = EXCLUDED.contains_media, contains_code = EXCLUDED.contains_code, \
             last_processed_at = EXCLUDED.last_processed_at",
    )
    .bind(target.kind.as_str())
    .bind(db_id(target.id))
    .bind(content.format.as_str())
    .bind(&content.raw_body)
    .bind(&content.rendered_html)
    .bind(content.flags.has_mentions)
    .bind(content.flags.has_attachments)
    .bind(content.flags.contains_media)
    .bind(content.flags.contains_code)
    .bind(content.last_processed_at)
    .execute(&mut *conn)
    .await
    .map_err(port_err(target))?;

    clear_rich_text_side_tables(&mut *conn, target).await?;
    for attachment in &bundle.attachments {
        sqlx::query(
            "INSERT INTO rich_text_attachments (target_kind, target_id, position, handle, file_name, \
             mime_type, size_bytes, is_safe) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(target.kind.as_str())
        .bind(db_id(target.id))
        .bind(attachment.position as i32)
        .bind(&attachment.handle)
        .bind(&attachment.file_name)
        .bind(&attachment.mime_type)
        .bind(attachment.size_bytes as i64)
        .bind(attachment.is_safe)
        .execute(&mut *conn)
        .await
        .map_err(port_err(target))?;
    }
    for block in &bundle.code_blocks {
        sqlx::query(
            "INSERT INTO rich_text_code_blocks (target_kind, target_id, position, language, code) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(target.kind.as_str())
        .bind(db_id(target.id))
        .bind(block.position as i32)
        .bind(&block.language)
        .bind(&block.code)
        .execute(&mut *conn)
        .await
        .map_err(port_err(target))?;
    }
    for quote in &bundle.quotes {
        sqlx::query(
            "INSERT INTO rich_text_quotes (target_kind, target_id, position, source_kind, source_id, quoted_body) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(target.kind.as_str())
        .bind(db_id(target.id))
        .bind(quote.position as i32)
        .bind(quote.source.kind.as_str())
        .bind(db_id(quote.source.id))
        .bind(&quote.quoted_body)
        .execute(&mut *conn)
        .await
        .map_err(port_err(target))?;
    }
    for mention in &bundle.mentions {
        sqlx::query(
            "INSERT INTO rich_text_mentions (target_kind, target_id, mentioned_user_id, handle) \
             VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
        )
        .bind(target.kind.as_str())
        .bind(db_id(target.id))
        .bind(db_id(mention.mentioned_user_id))
        .bind(&mention.handle)
        .execute(&mut *conn)
        .await
        .map_err(port_err(target))?;
    }
    Ok(())
}

/// A moderator-supplied body is stored as escaped plain text.
async fn replace_rendered_body(
    conn: &mut PgConnection,
    target: TargetRef,
    body: &str,
    now: DateTime<Utc>,
) -> PortResult<()> {
    let updated = sqlx::query(
        "UPDATE rich_text_contents SET format = $3, raw_body = $4, rendered_html = $5, \
             has_mentions = FALSE, has_attachments = FALSE, contains_media = FALSE, contains_code = FALSE, \
             last_processed_at = $6 \
         WHERE target_kind = $1 AND target_id = $2",
    )
    .bind(target.kind.as_str())
    .bind(db_id(target.id))
    .bind(TextFormat::Plain.as_str())
    .bind(body)
    .bind(format!("<p>{}</p>", html_escape::encode_text(body)))
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(port_err(target))?
    .rows_affected();
    if updated > 0 {
        clear_rich_text_side_tables(conn, target).await?;
    }
    Ok(())
}

pub(super) async fn insert_filter_result(
    conn: &mut PgConnection,
    result: NewFilterResult,
) -> PortResult<ContentFilterResult> {
    sqlx::query_as::<_, records::FilterResultRecord>(
        "INSERT INTO content_filter_results (target_kind, target_id, author_id, triggered_rule_ids, \
             triggered_word_ids, action, raw_body, cleaned_body, automatically_processed, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $9) RETURNING *",
    )
    .bind(result.target_kind.as_str())
    .bind(opt_id(result.target_id))
    .bind(db_id(result.author_id))
    .bind(ids(&result.triggered_rule_ids))
    .bind(ids(&result.triggered_word_ids))
    .bind(result.action.as_str())
    .bind(&result.raw_body)
    .bind(&result.cleaned_body)
    .bind(result.created_at)
    .fetch_one(conn)
    .await
    .map_err(port_err("filter result"))?
    .to_domain()
}

/// Persists the filter result and queue entry produced alongside content.
/// A queue entry is skipped while the target already has an open item.
pub(super) async fn apply_moderation(
    conn: &mut PgConnection,
    record: ModerationRecord,
    target: TargetRef,
) -> PortResult<()> {
    let mut filter_result_id = None;
    if let Some(result) = record.filter_result {
        let stored = insert_filter_result(
            &mut *conn,
            NewFilterResult {
                target_id: Some(result.target_id.unwrap_or(target.id)),
                ..result
            },
        )
        .await?;
        filter_result_id = Some(stored.id);
    }
    if let Some(entry) = record.queue_entry {
        sqlx::query(
            "INSERT INTO moderation_queue_items (target_kind, target_id, author_id, reason, filter_result_id, \
                 status, priority, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) \
             ON CONFLICT (target_kind, target_id) WHERE status IN ('pending', 'inReview') DO NOTHING",
        )
        .bind(entry.target_kind.as_str())
        .bind(db_id(entry.target_id.unwrap_or(target.id)))
        .bind(db_id(entry.author_id))
        .bind(&entry.reason)
        .bind(opt_id(filter_result_id))
        .bind(QueueStatus::Pending.as_str())
        .bind(i16::from(entry.priority.clamp(1, 5)))
        .bind(entry.created_at)
        .execute(conn)
        .await
        .map_err(port_err(format!("queue entry for {target}")))?;
    }
    Ok(())
}

/// Soft-deletes a comment under `policy`; returns every id deleted.
pub(super) async fn soft_delete_comment(
    conn: &mut PgConnection,
    id: u64,
    policy: DeletionPolicy,
    now: DateTime<Utc>,
) -> PortResult<Vec<u64>> {
    let topic_id: i64 = sqlx::query_scalar("SELECT topic_id FROM comments WHERE id = $1")
        .bind(db_id(id))
        .fetch_one(&mut *conn)
        .await
        .map_err(port_err(format!("comment {id}")))?;
    let mut deleted: Vec<u64> = match policy {
        DeletionPolicy::DetachWithTombstone => {
            sqlx::query(
                "UPDATE comments SET body = $2, deleted_at = COALESCE(deleted_at, $3), updated_at = $3 WHERE id = $1",
            )
            .bind(db_id(id))
            .bind(Comment::TOMBSTONE)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(port_err(format!("comment {id}")))?;
            vec![id]
        }
        DeletionPolicy::Cascade => sqlx::query_scalar::<_, i64>(
            "WITH RECURSIVE subtree AS ( \
                 SELECT id FROM comments WHERE id = $1 \
                 UNION ALL \
                 SELECT c.id FROM comments c JOIN subtree s ON c.parent_comment_id = s.id \
                 WHERE c.deleted_at IS NULL) \
             UPDATE comments SET deleted_at = COALESCE(deleted_at, $2), updated_at = $2 \
             WHERE id IN (SELECT id FROM subtree) RETURNING id",
        )
        .bind(db_id(id))
        .bind(now)
        .fetch_all(&mut *conn)
        .await
        .map_err(port_err(format!("comment {id}")))?
        .into_iter()
        .map(unsigned)
        .collect(),
    };
    deleted.sort_unstable();
    refresh_topic_activity(conn, unsigned(topic_id)).await?;
    Ok(deleted)
}

/// Applies a moderation mutation; the target must exist.
pub(super) async fn apply_mutation(
    conn: &mut PgConnection,
    target: TargetRef,
    mutation: &ContentMutation,
    now: DateTime<Utc>,
) -> PortResult<()> {
    ensure_target(&mut *conn, target).await?;
    let id = db_id(target.id);
    let result = match (target.kind, mutation) {
        (TargetKind::Topic, ContentMutation::Publish) => {
            sqlx::query("UPDATE topics SET is_approved = TRUE, is_flagged = FALSE, updated_at = $2 WHERE id = $1")
                .bind(id)
                .bind(now)
                .execute(&mut *conn)
                .await
        }
        (TargetKind::Topic, ContentMutation::SoftDelete { .. }) => {
            sqlx::query(
                "UPDATE topics SET is_approved = FALSE, deleted_at = COALESCE(deleted_at, $2), updated_at = $2 \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(now)
            .execute(&mut *conn)
            .await
        }
        (TargetKind::Topic, ContentMutation::ReplaceBody { body }) => {
            sqlx::query("UPDATE topics SET body = $2, updated_at = $3 WHERE id = $1")
                .bind(id)
                .bind(body)
                .bind(now)
                .execute(&mut *conn)
                .await
        }
        (TargetKind::Comment, ContentMutation::Publish) => {
            sqlx::query("UPDATE comments SET is_approved = TRUE, is_flagged = FALSE, updated_at = $2 WHERE id = $1")
                .bind(id)
                .bind(now)
                .execute(&mut *conn)
                .await
        }
        (TargetKind::Comment, ContentMutation::SoftDelete { .. }) => {
            sqlx::query("UPDATE comments SET is_approved = FALSE WHERE id = $1")
                .bind(id)
                .execute(&mut *conn)
                .await
        }
        (TargetKind::Comment, ContentMutation::ReplaceBody { body }) => {
            sqlx::query(
                "UPDATE comments SET body = $2, is_edited = TRUE, edited_at = $3, updated_at = $3 WHERE id = $1",
            )
            .bind(id)
            .bind(body)
            .bind(now)
            .execute(&mut *conn)
            .await
        }
    };
    result.map_err(port_err(target))?;

    match (target.kind, mutation) {
        (_, ContentMutation::ReplaceBody { body }) => replace_rendered_body(conn, target, body, now).await?,
        (TargetKind::Comment, ContentMutation::Publish) => {
            let topic_id: i64 = sqlx::query_scalar("SELECT topic_id FROM comments WHERE id = $1")
                .bind(id)
                .fetch_one(&mut *conn)
                .await
                .map_err(port_err(target))?;
            refresh_topic_activity(conn, unsigned(topic_id)).await?;
        }
        (TargetKind::Comment, ContentMutation::SoftDelete { policy }) => {
            soft_delete_comment(conn, target.id, *policy, now).await?;
        }
        _ => {}
    }
    Ok(())
}

pub(super) async fn insert_user_action(
    conn: &mut PgConnection,
    action: NewUserModerationAction,
) -> PortResult<UserModerationAction> {
    sqlx::query_as::<_, records::UserActionRecord>(
        "INSERT INTO user_moderation_actions (user_id, action_kind, reason, applied_by, applied_at, \
             duration_hours, expires_at, is_active, related_target_kind, related_target_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, $8, $9) RETURNING *",
    )
    .bind(db_id(action.user_id))
    .bind(action.action_kind.as_str())
    .bind(&action.reason)
    .bind(db_id(action.applied_by))
    .bind(action.applied_at)
    .bind(action.duration_hours.map(|h| h as i32))
    .bind(action.expires_at())
    .bind(action.related_target.map(|t| t.kind.as_str()))
    .bind(action.related_target.map(|t| db_id(t.id)))
    .fetch_one(conn)
    .await
    .map_err(port_err(format!("action on user {}", action.user_id)))?
    .to_domain()
}

pub(super) async fn insert_outbox(conn: &mut PgConnection, messages: Vec<NewOutboxMessage>) -> PortResult<()> {
    for message in messages {
        sqlx::query(
            "INSERT INTO outbox (user_id, channel, notification, status, next_attempt_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $5, $5)",
        )
        .bind(db_id(message.user_id))
        .bind(message.channel.as_str())
        .bind(sqlx::types::Json(&message.notification))
        .bind(OutboxStatus::Pending.as_str())
        .bind(message.created_at)
        .execute(&mut *conn)
        .await
        .map_err(port_err(format!("outbox message for user {}", message.user_id)))?;
    }
    Ok(())
}

pub(super) async fn insert_report_log(
    conn: &mut PgConnection,
    entry: NewReportLogEntry,
) -> PortResult<ReportActionLog> {
    sqlx::query_as::<_, records::ReportLogRecord>(
        "INSERT INTO report_action_logs (report_id, actor_id, action, details, created_at) \
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(db_id(entry.report_id))
    .bind(db_id(entry.actor_id))
    .bind(entry.action.as_str())
    .bind(&entry.details)
    .bind(entry.created_at)
    .fetch_one(conn)
    .await
    .map_err(port_err(format!("report {}", entry.report_id)))?
    .to_domain()
}
