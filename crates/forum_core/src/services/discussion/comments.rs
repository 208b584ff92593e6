//! Comments and threaded replies.

use super::{resolve_config, Discussion, PostKind};
use crate::domain::{Comment, NewComment, Page, PageRequest, Permission, Principal, TargetKind, TargetRef, TextFormat};
use crate::error::{ForumError, ForumResult};
use crate::services::subscriptions::AutoSubscribe;
use tracing::info;

#[derive(Debug, Clone)]
pub struct CreateComment {
    pub body: String,
    pub format: TextFormat,
    /// Makes the comment a reply; the parent must live under the same topic.
    pub parent_comment_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct EditComment {
    pub body: String,
    pub format: TextFormat,
}

impl Discussion {
    /// Locked topics only accept comments from their moderators.
    pub async fn create_comment(
        &self,
        principal: &Principal,
        topic_id: u64,
        request: CreateComment,
    ) -> ForumResult<Comment> {
        self.access.require_member(principal)?;
        let topic = self.live_topic(topic_id).await?;
        self.ensure_visible(principal, &topic).await?;
        let category = self.store.get_category(topic.category_id).await?;
        let now = self.clock.now();
        let config = resolve_config(self.store.as_ref(), category.id, now).await?;

        if topic.is_locked
            && !self
                .access
                .permissions(principal, Some(topic.category_id))
                .await?
                .is_moderator()
        {
            return Err(ForumError::TopicLocked(topic.id));
        }
        let permissions = self.check_posting(principal, &category, &config, PostKind::Comment).await?;

        if let Some(parent_id) = request.parent_comment_id {
            let parent = self.store.get_comment(parent_id).await?;
            if parent.topic_id != topic.id || parent.is_deleted() {
                return Err(ForumError::validation(format!(
                    "comment {parent_id} cannot be replied to in topic {topic_id}"
                )));
            }
        }

        let screening = self
            .screen(PostKind::Comment, principal.user_id, request.format, &request.body, &config, permissions)
            .await?;
        let record = screening.record(TargetKind::Comment, None, principal.user_id, &request.body, now);
        let mentioned = screening.text.mentioned_user_ids.clone();

        let comment = self
            .store
            .create_comment(
                NewComment {
                    topic_id: topic.id,
                    author_id: principal.user_id,
                    body: screening.body.clone(),
                    parent_comment_id: request.parent_comment_id,
                    is_approved: screening.is_approved,
                    is_flagged: screening.is_flagged,
                    flag_reason: screening.flag_reason.clone(),
                    created_at: now,
                },
                screening.text.into_bundle(TargetRef::comment(0), now),
                record,
            )
            .await?;
        info!(
            comment_id = comment.id,
            topic_id = topic.id,
            author_id = comment.author_id,
            parent = ?comment.parent_comment_id,
            approved = comment.is_approved,
            "Comment created"
        );

        if comment.is_approved {
            self.follow_up(
                "Comment fan-out",
                self.subscriptions.comment_published(&topic, &comment).await,
            );
            self.follow_up(
                "Mention notification",
                self.subscriptions
                    .notify_mentions(comment.author_id, comment.target(), &mentioned)
                    .await,
            );
        }
        self.follow_up(
            "Auto-subscribe",
            self.subscriptions
                .auto_subscribe(comment.author_id, topic.id, AutoSubscribe::Replied)
                .await,
        );
        Ok(comment)
    }

    pub async fn get_comment(&self, principal: &Principal, id: u64) -> ForumResult<Comment> {
        let comment = self.store.get_comment(id).await?;
        let topic = self.store.get_topic(comment.topic_id).await?;
        self.ensure_visible(principal, &topic).await?;
        let own = !principal.is_guest() && comment.author_id == principal.user_id;
        if (comment.is_deleted() || !comment.is_approved) && !own && !self.moderates(principal, topic.category_id).await? {
            return Err(ForumError::not_found(format!("comment {id}")));
        }
        Ok(comment)
    }

    /// Oldest first. Moderators also see unapproved and deleted comments.
    pub async fn list_comments(&self, principal: &Principal, topic_id: u64, page: PageRequest) -> ForumResult<Page<Comment>> {
        let topic = self.store.get_topic(topic_id).await?;
        self.ensure_visible(principal, &topic).await?;
        let include_hidden = self.moderates(principal, topic.category_id).await?;
        Ok(self.store.list_comments(topic_id, include_hidden, page).await?)
    }

    /// Marks the comment edited. Authors are bound by the edit window and the
    /// topic lock; holders of `editAnyContent` are not.
    pub async fn edit_comment(&self, principal: &Principal, id: u64, request: EditComment) -> ForumResult<Comment> {
        self.access.require_member(principal)?;
        let mut comment = self.store.get_comment(id).await?;
        if comment.is_deleted() {
            return Err(ForumError::not_found(format!("comment {id}")));
        }
        let topic = self.live_topic(comment.topic_id).await?;
        let now = self.clock.now();
        let config = resolve_config(self.store.as_ref(), topic.category_id, now).await?;
        let permissions = self.access.permissions(principal, Some(topic.category_id)).await?;
        if !permissions.has(Permission::EditAnyContent) {
            if comment.author_id != principal.user_id {
                return Err(ForumError::forbidden("only the author or a moderator may edit this comment"));
            }
            if topic.is_locked {
                return Err(ForumError::TopicLocked(topic.id));
            }
            self.check_edit_window(&config, comment.created_at)?;
        }

        let screening = self
            .screen(PostKind::Comment, comment.author_id, request.format, &request.body, &config, permissions)
            .await?;
        let record = screening.record(TargetKind::Comment, Some(comment.id), comment.author_id, &request.body, now);
        comment.body = screening.body.clone();
        comment.is_edited = true;
        comment.edited_at = Some(now);
        comment.is_approved = comment.is_approved && screening.is_approved;
        comment.is_flagged = comment.is_flagged || screening.is_flagged;
        if screening.flag_reason.is_some() {
            comment.flag_reason = screening.flag_reason.clone();
        }
        comment.updated_at = now;
        let bundle = screening.text.into_bundle(comment.target(), now);

        let updated = self.store.update_comment(&comment, Some(bundle), record).await?;
        info!(comment_id = id, by = principal.user_id, "Comment edited");
        Ok(updated)
    }

    /// Soft-deletes the comment under the category's deletion policy and
    /// returns the ids of every comment removed with it.
    pub async fn delete_comment(&self, principal: &Principal, id: u64, report_id: Option<u64>) -> ForumResult<Vec<u64>> {
        self.access.require_member(principal)?;
        let comment = self.store.get_comment(id).await?;
        if comment.is_deleted() {
            return Err(ForumError::not_found(format!("comment {id}")));
        }
        let topic = self.store.get_topic(comment.topic_id).await?;
        let by_moderator = self.authorize_delete(principal, comment.author_id, topic.category_id).await?;
        let now = self.clock.now();
        let config = resolve_config(self.store.as_ref(), topic.category_id, now).await?;
        let deleted = self.store.delete_comment(id, config.deletion_policy, now).await?;
        info!(
            comment_id = id,
            by = principal.user_id,
            moderator = by_moderator,
            policy = %config.deletion_policy,
            removed = deleted.len(),
            "Comment deleted"
        );
        if by_moderator {
            self.log_report_deletion(principal, report_id, comment.target()).await?;
        }
        Ok(deleted)
    }

    async fn moderates(&self, principal: &Principal, category_id: u64) -> ForumResult<bool> {
        if principal.is_guest() {
            return Ok(false);
        }
        Ok(self.access.permissions(principal, Some(category_id)).await?.is_moderator())
    }
}
