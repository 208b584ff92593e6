//! Topic lifecycle: create, read, edit, delete, pin, lock, views and tags.

use super::{resolve_config, Discussion, PostKind};
use crate::domain::{
    NewReportLogEntry, NewTopic, Page, PageRequest, Permission, Principal, ReportLogAction, TargetKind, TargetRef,
    TextFormat, Topic, TopicQuery,
};
use crate::error::{ForumError, ForumResult};
use crate::services::subscriptions::AutoSubscribe;
use crate::settings::ttl;
use std::collections::BTreeSet;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CreateTopic {
    pub category_id: u64,
    pub title: String,
    pub body: String,
    pub format: TextFormat,
    pub tag_ids: Vec<u64>,
    pub book_id: Option<u64>,
    pub chapter_id: Option<u64>,
    pub section_id: Option<u64>,
}

/// Partial topic edit; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateTopic {
    pub title: Option<String>,
    pub body: Option<String>,
    pub format: Option<TextFormat>,
    pub tag_ids: Option<Vec<u64>>,
    pub category_id: Option<u64>,
}

impl Discussion {
    pub async fn create_topic(&self, principal: &Principal, request: CreateTopic) -> ForumResult<Topic> {
        let category = self.store.get_category(request.category_id).await?;
        let now = self.clock.now();
        let config = resolve_config(self.store.as_ref(), category.id, now).await?;
        let permissions = self.check_posting(principal, &category, &config, PostKind::Topic).await?;

        let title = self.validate_title(&request.title)?;
        let tag_ids = self.validate_tags(&request.tag_ids).await?;
        let screening = self
            .screen(PostKind::Topic, principal.user_id, request.format, &request.body, &config, permissions)
            .await?;
        let record = screening.record(TargetKind::Topic, None, principal.user_id, &request.body, now);
        let mentioned = screening.text.mentioned_user_ids.clone();

        let topic = self
            .store
            .create_topic(
                NewTopic {
                    title,
                    body: screening.body.clone(),
                    author_id: principal.user_id,
                    category_id: category.id,
                    is_approved: screening.is_approved,
                    is_flagged: screening.is_flagged,
                    flag_reason: screening.flag_reason.clone(),
                    book_id: request.book_id,
                    chapter_id: request.chapter_id,
                    section_id: request.section_id,
                    tag_ids,
                    created_at: now,
                },
                screening.text.into_bundle(TargetRef::topic(0), now),
                record,
            )
            .await?;
        info!(
            topic_id = topic.id,
            category_id = topic.category_id,
            author_id = topic.author_id,
            approved = topic.is_approved,
            flagged = topic.is_flagged,
            "Topic created"
        );

        if topic.is_approved {
            self.follow_up("Topic fan-out", self.subscriptions.topic_published(&topic).await);
            self.follow_up(
                "Mention notification",
                self.subscriptions
                    .notify_mentions(topic.author_id, topic.target(), &mentioned)
                    .await,
            );
        }
        self.follow_up(
            "Auto-subscribe",
            self.subscriptions
                .auto_subscribe(topic.author_id, topic.id, AutoSubscribe::Created)
                .await,
        );
        Ok(topic)
    }

    /// Deleted topics are visible to moderators only; unapproved ones to their
    /// author and moderators.
    pub async fn get_topic(&self, principal: &Principal, id: u64) -> ForumResult<Topic> {
        let topic = self.store.get_topic(id).await?;
        self.ensure_visible(principal, &topic).await?;
        Ok(topic)
    }

    pub async fn list_topics(
        &self,
        principal: &Principal,
        mut query: TopicQuery,
        page: PageRequest,
    ) -> ForumResult<Page<Topic>> {
        if query.include_deleted || query.include_unapproved {
            let is_moderator = !principal.is_guest()
                && self
                    .access
                    .permissions(principal, query.category_id)
                    .await?
                    .is_moderator();
            if !is_moderator {
                query.include_deleted = false;
                query.include_unapproved = false;
            }
        }
        Ok(self.store.list_topics(&query, page).await?)
    }

    /// Authors edit within the edit window while the topic is unlocked;
    /// holders of `editAnyContent` always may.
    pub async fn update_topic(&self, principal: &Principal, id: u64, request: UpdateTopic) -> ForumResult<Topic> {
        self.access.require_member(principal)?;
        let mut topic = self.live_topic(id).await?;
        let now = self.clock.now();
        let config = resolve_config(self.store.as_ref(), topic.category_id, now).await?;
        let permissions = self.access.permissions(principal, Some(topic.category_id)).await?;
        let moderating = permissions.has(Permission::EditAnyContent);
        if !moderating {
            if topic.author_id != principal.user_id {
                return Err(ForumError::forbidden("only the author or a moderator may edit this topic"));
            }
            if topic.is_locked {
                return Err(ForumError::TopicLocked(topic.id));
            }
            self.check_edit_window(&config, topic.created_at)?;
        }

        if let Some(category_id) = request.category_id.filter(|c| *c != topic.category_id) {
            let category = self.store.get_category(category_id).await?;
            let target_config = resolve_config(self.store.as_ref(), category_id, now).await?;
            if !moderating {
                self.check_posting(principal, &category, &target_config, PostKind::Topic).await?;
            }
            topic.category_id = category_id;
        }
        if let Some(title) = &request.title {
            topic.title = self.validate_title(title)?;
        }
        if let Some(tag_ids) = &request.tag_ids {
            topic.tag_ids = self.validate_tags(tag_ids).await?;
        }

        let mut rich_text = None;
        let mut record = Default::default();
        if let Some(body) = request.body.as_deref() {
            let format = request.format.unwrap_or_default();
            let screening = self
                .screen(PostKind::Topic, topic.author_id, format, body, &config, permissions)
                .await?;
            record = screening.record(TargetKind::Topic, Some(topic.id), topic.author_id, body, now);
            topic.body = screening.body.clone();
            topic.is_approved = topic.is_approved && screening.is_approved;
            topic.is_flagged = topic.is_flagged || screening.is_flagged;
            if screening.flag_reason.is_some() {
                topic.flag_reason = screening.flag_reason.clone();
            }
            rich_text = Some(screening.text.into_bundle(topic.target(), now));
        }
        topic.updated_at = now;

        let updated = self.store.update_topic(&topic, rich_text, record).await?;
        info!(topic_id = id, by = principal.user_id, "Topic updated");
        Ok(updated)
    }

    /// Soft-deletes the topic. A moderator deletion made on behalf of a
    /// report is recorded in that report's log.
    pub async fn delete_topic(&self, principal: &Principal, id: u64, report_id: Option<u64>) -> ForumResult<()> {
        self.access.require_member(principal)?;
        let topic = self.live_topic(id).await?;
        let by_moderator = self.authorize_delete(principal, topic.author_id, topic.category_id).await?;
        self.store.soft_delete_topic(id, self.clock.now()).await?;
        info!(topic_id = id, by = principal.user_id, moderator = by_moderator, "Topic deleted");
        if by_moderator {
            self.log_report_deletion(principal, report_id, topic.target()).await?;
        }
        Ok(())
    }

    pub async fn pin_topic(&self, principal: &Principal, id: u64, pinned: bool) -> ForumResult<Topic> {
        let mut topic = self.live_topic(id).await?;
        self.access.require_moderator(principal, Some(topic.category_id)).await?;
        if topic.is_pinned == pinned {
            return Ok(topic);
        }
        topic.is_pinned = pinned;
        topic.updated_at = self.clock.now();
        let topic = self.store.update_topic(&topic, None, Default::default()).await?;
        info!(topic_id = id, pinned, by = principal.user_id, "Topic pin changed");
        Ok(topic)
    }

    pub async fn lock_topic(&self, principal: &Principal, id: u64, locked: bool) -> ForumResult<Topic> {
        let mut topic = self.live_topic(id).await?;
        self.access.require_moderator(principal, Some(topic.category_id)).await?;
        if topic.is_locked == locked {
            return Ok(topic);
        }
        topic.is_locked = locked;
        topic.updated_at = self.clock.now();
        let topic = self.store.update_topic(&topic, None, Default::default()).await?;
        info!(topic_id = id, locked, by = principal.user_id, "Topic lock changed");
        Ok(topic)
    }

    /// Counts at most one view per user and topic within the dedupe window.
    /// Guests are not counted. Returns the resulting view count.
    pub async fn record_view(&self, principal: &Principal, id: u64) -> ForumResult<u64> {
        let topic = self.store.get_topic(id).await?;
        self.ensure_visible(principal, &topic).await?;
        if principal.is_guest() {
            return Ok(topic.view_count);
        }
        let key = format!("view:{}:{}", principal.user_id, id);
        let first = match self
            .cache
            .set_if_absent(&key, ttl(self.settings.view_dedupe_window))
            .await
        {
            Ok(first) => first,
            Err(err) => {
                warn!(topic_id = id, user_id = principal.user_id, error = %err, "View dedupe unavailable; counting view");
                true
            }
        };
        if first {
            Ok(self.store.increment_view_count(id).await?)
        } else {
            Ok(topic.view_count)
        }
    }

    pub async fn attach_tag(&self, principal: &Principal, topic_id: u64, tag_id: u64) -> ForumResult<()> {
        let topic = self.live_topic(topic_id).await?;
        self.require_author_or(principal, &topic, Permission::EditAnyContent).await?;
        self.store.get_tag(tag_id).await?;
        if self.store.attach_tag(topic_id, tag_id, self.clock.now()).await? {
            info!(topic_id, tag_id, by = principal.user_id, "Tag attached");
        }
        Ok(())
    }

    pub async fn detach_tag(&self, principal: &Principal, topic_id: u64, tag_id: u64) -> ForumResult<()> {
        let topic = self.live_topic(topic_id).await?;
        self.require_author_or(principal, &topic, Permission::EditAnyContent).await?;
        if self.store.detach_tag(topic_id, tag_id, self.clock.now()).await? {
            info!(topic_id, tag_id, by = principal.user_id, "Tag detached");
        }
        Ok(())
    }

    //-------------------------------------------------------------------------------------
    // Helpers shared with comments
    //-------------------------------------------------------------------------------------

    /// A topic that has not been deleted.
    pub(crate) async fn live_topic(&self, id: u64) -> ForumResult<Topic> {
        let topic = self.store.get_topic(id).await?;
        if topic.is_deleted() {
            return Err(ForumError::not_found(format!("topic {id}")));
        }
        Ok(topic)
    }

    pub(crate) async fn ensure_visible(&self, principal: &Principal, topic: &Topic) -> ForumResult<()> {
        if !topic.is_deleted() && (topic.is_approved || (topic.author_id == principal.user_id && !principal.is_guest())) {
            return Ok(());
        }
        let is_moderator = !principal.is_guest()
            && self
                .access
                .permissions(principal, Some(topic.category_id))
                .await?
                .is_moderator();
        if is_moderator {
            Ok(())
        } else {
            Err(ForumError::not_found(format!("topic {}", topic.id)))
        }
    }

    async fn require_author_or(&self, principal: &Principal, topic: &Topic, permission: Permission) -> ForumResult<()> {
        self.access.require_member(principal)?;
        if topic.author_id == principal.user_id {
            return Ok(());
        }
        self.access.require(principal, permission, Some(topic.category_id)).await?;
        Ok(())
    }

    /// Returns `true` when the deletion is a moderator acting on someone else's post.
    pub(crate) async fn authorize_delete(&self, principal: &Principal, author_id: u64, category_id: u64) -> ForumResult<bool> {
        if author_id == principal.user_id {
            return Ok(false);
        }
        self.access
            .require(principal, Permission::DeleteContent, Some(category_id))
            .await?;
        Ok(true)
    }

    pub(crate) async fn log_report_deletion(
        &self,
        principal: &Principal,
        report_id: Option<u64>,
        target: TargetRef,
    ) -> ForumResult<()> {
        let Some(report_id) = report_id else {
            return Ok(());
        };
        let report = self.store.get_report(report_id).await?;
        if report.target != target {
            return Err(ForumError::validation(format!(
                "report {report_id} is not about {target}"
            )));
        }
        self.store
            .append_report_log(NewReportLogEntry {
                report_id,
                actor_id: principal.user_id,
                action: ReportLogAction::ContentDeleted,
                details: serde_json::json!({ "target": target }),
                created_at: self.clock.now(),
            })
            .await?;
        Ok(())
    }

    fn validate_title(&self, title: &str) -> ForumResult<String> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ForumError::validation("title cannot be empty"));
        }
        if title.chars().count() > self.settings.max_title_chars {
            return Err(ForumError::validation(format!(
                "title exceeds {} characters",
                self.settings.max_title_chars
            )));
        }
        Ok(title.to_string())
    }

    /// Deduplicated, all existing.
    async fn validate_tags(&self, tag_ids: &[u64]) -> ForumResult<Vec<u64>> {
        let unique: Vec<u64> = tag_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        if unique.is_empty() {
            return Ok(unique);
        }
        let found = self.store.get_tags(&unique).await?;
        if found.len() != unique.len() {
            let missing: Vec<u64> = unique
                .iter()
                .filter(|id| !found.iter().any(|tag| tag.id == **id))
                .copied()
                .collect();
            return Err(ForumError::validation(format!("unknown tags {missing:?}")));
        }
        Ok(unique)
    }
}
