//! services/api/src/adapters/memory/mod.rs
//!
//! An in-process implementation of every store port. All state sits behind
//! one `RwLock`, so each method observes and writes a consistent snapshot;
//! multi-row methods validate before they mutate, which gives them the same
//! all-or-nothing behaviour as a database transaction.

mod content;
mod discussion;
mod moderation;
mod reports;
mod subscriptions;

use chrono::{DateTime, Utc};
use forum_core::domain::*;
use forum_core::ports::{PortError, PortResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

//=========================================================================================
// State
//=========================================================================================

#[derive(Default)]
pub(crate) struct State {
    next_id: u64,

    categories: BTreeMap<u64, Category>,
    category_configs: HashMap<u64, CategoryConfig>,
    category_moderators: Vec<CategoryModerator>,
    topics: BTreeMap<u64, Topic>,
    comments: BTreeMap<u64, Comment>,
    reactions: Vec<Reaction>,
    tags: BTreeMap<u64, Tag>,
    rich_text: HashMap<TargetRef, RichTextBundle>,

    content_links: BTreeMap<u64, ContentLink>,
    citations: BTreeMap<u64, CommentContentLink>,
    templates: BTreeMap<u64, TopicTemplate>,
    recommendations: BTreeMap<u64, ContentDiscussionRecommendation>,

    rules: BTreeMap<u64, ModerationRule>,
    words: BTreeMap<u64, ProhibitedWord>,
    filter_results: BTreeMap<u64, ContentFilterResult>,
    queue: BTreeMap<u64, ModerationQueueItem>,
    grants: HashMap<u64, ModeratorGrant>,
    user_actions: BTreeMap<u64, UserModerationAction>,
    trust: HashMap<u64, UserTrustScore>,

    reports: BTreeMap<u64, ContentReport>,
    evidence: BTreeMap<u64, ReportEvidence>,
    report_comments: BTreeMap<u64, ReportComment>,
    report_log: BTreeMap<u64, ReportActionLog>,

    subscriptions: BTreeMap<u64, Subscription>,
    preferences: HashMap<u64, SubscriptionPreference>,
    activity: BTreeMap<u64, ActivityEvent>,
    digests: BTreeMap<u64, SubscriptionDigest>,
    outbox: BTreeMap<u64, OutboxMessage>,
}

impl State {
    /// One sequence for every table keeps ids unique across the whole store.
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn topic(&self, id: u64) -> PortResult<&Topic> {
        self.topics.get(&id).ok_or_else(|| PortError::not_found(format!("topic {id}")))
    }

    fn topic_mut(&mut self, id: u64) -> PortResult<&mut Topic> {
        self.topics.get_mut(&id).ok_or_else(|| PortError::not_found(format!("topic {id}")))
    }

    fn comment(&self, id: u64) -> PortResult<&Comment> {
        self.comments.get(&id).ok_or_else(|| PortError::not_found(format!("comment {id}")))
    }

    fn comment_mut(&mut self, id: u64) -> PortResult<&mut Comment> {
        self.comments.get_mut(&id).ok_or_else(|| PortError::not_found(format!("comment {id}")))
    }

    fn ensure_target(&self, target: TargetRef) -> PortResult<()> {
        match target.kind {
            TargetKind::Topic => self.topic(target.id).map(|_| ()),
            TargetKind::Comment => self.comment(target.id).map(|_| ()),
        }
    }

    /// Recomputes `commentCount` and `lastActivityAt` from the visible comments.
    fn refresh_topic_activity(&mut self, topic_id: u64) {
        let (count, latest) = self
            .comments
            .values()
            .filter(|c| c.topic_id == topic_id && c.is_approved && !c.is_deleted())
            .fold((0_u64, None::<DateTime<Utc>>), |(count, latest), c| {
                (count + 1, Some(latest.map_or(c.created_at, |l| l.max(c.created_at))))
            });
        if let Some(topic) = self.topics.get_mut(&topic_id) {
            topic.comment_count = count;
            topic.last_activity_at = latest.map_or(topic.created_at, |l| l.max(topic.created_at));
        }
    }

    fn store_rich_text(&mut self, bundle: RichTextBundle, target: TargetRef) {
        let bundle = bundle.retarget(target.kind, target.id);
        self.rich_text.insert(target, bundle);
    }

    /// Persists the filter result and queue entry produced alongside content.
    /// A queue entry is skipped while the target already has an open item.
    fn apply_moderation(&mut self, record: ModerationRecord, target: TargetRef) {
        let mut filter_result_id = None;
        if let Some(result) = record.filter_result {
            let stored = self.insert_filter_result(NewFilterResult {
                target_id: Some(result.target_id.unwrap_or(target.id)),
                ..result
            });
            filter_result_id = Some(stored.id);
        }
        if let Some(entry) = record.queue_entry {
            let open = self
                .queue
                .values()
                .any(|item| item.target == target && item.status.is_open());
            if !open {
                let id = self.next_id();
                self.queue.insert(
                    id,
                    ModerationQueueItem {
                        id,
                        target: TargetRef {
                            kind: entry.target_kind,
                            id: entry.target_id.unwrap_or(target.id),
                        },
                        author_id: entry.author_id,
                        reason: entry.reason,
                        filter_result_id,
                        status: QueueStatus::Pending,
                        priority: entry.priority.clamp(1, 5),
                        assigned_to: None,
                        reviewed_by: None,
                        reviewed_at: None,
                        decision: None,
                        notes: String::new(),
                        version: 0,
                        created_at: entry.created_at,
                        updated_at: entry.created_at,
                    },
                );
            }
        }
    }

    fn insert_filter_result(&mut self, result: NewFilterResult) -> ContentFilterResult {
        let id = self.next_id();
        let stored = ContentFilterResult {
            id,
            target_kind: result.target_kind,
            target_id: result.target_id,
            author_id: result.author_id,
            triggered_rule_ids: result.triggered_rule_ids,
            triggered_word_ids: result.triggered_word_ids,
            action: result.action,
            raw_body: result.raw_body,
            cleaned_body: result.cleaned_body,
            automatically_processed: true,
            moderator_id: None,
            reviewed_at: None,
            created_at: result.created_at,
        };
        self.filter_results.insert(id, stored.clone());
        stored
    }

    /// Soft-deletes a comment under `policy`; returns every id deleted.
    fn soft_delete_comment(&mut self, id: u64, policy: DeletionPolicy, now: DateTime<Utc>) -> PortResult<Vec<u64>> {
        let topic_id = self.comment(id)?.topic_id;
        let mut deleted = vec![id];
        match policy {
            DeletionPolicy::DetachWithTombstone => {
                let comment = self.comment_mut(id)?;
                comment.body = Comment::TOMBSTONE.to_string();
                comment.deleted_at.get_or_insert(now);
                comment.updated_at = now;
            }
            DeletionPolicy::Cascade => {
                let mut frontier = vec![id];
                while let Some(parent) = frontier.pop() {
                    let children: Vec<u64> = self
                        .comments
                        .values()
                        .filter(|c| c.parent_comment_id == Some(parent) && !c.is_deleted())
                        .map(|c| c.id)
                        .collect();
                    frontier.extend(&children);
                    deleted.extend(children);
                }
                for comment_id in &deleted {
                    let comment = self.comment_mut(*comment_id)?;
                    comment.deleted_at.get_or_insert(now);
                    comment.updated_at = now;
                }
            }
        }
        self.refresh_topic_activity(topic_id);
        Ok(deleted)
    }

    /// Applies a moderation mutation; the target must exist.
    fn apply_mutation(&mut self, target: TargetRef, mutation: &ContentMutation, now: DateTime<Utc>) -> PortResult<()> {
        match (target.kind, mutation) {
            (TargetKind::Topic, ContentMutation::Publish) => {
                let topic = self.topic_mut(target.id)?;
                topic.is_approved = true;
                topic.is_flagged = false;
                topic.updated_at = now;
            }
            (TargetKind::Topic, ContentMutation::SoftDelete { .. }) => {
                let topic = self.topic_mut(target.id)?;
                topic.is_approved = false;
                topic.deleted_at.get_or_insert(now);
                topic.updated_at = now;
            }
            (TargetKind::Topic, ContentMutation::ReplaceBody { body }) => {
                let topic = self.topic_mut(target.id)?;
                topic.body = body.clone();
                topic.updated_at = now;
                self.replace_rendered_body(target, body, now);
            }
            (TargetKind::Comment, ContentMutation::Publish) => {
                let comment = self.comment_mut(target.id)?;
                comment.is_approved = true;
                comment.is_flagged = false;
                comment.updated_at = now;
                let topic_id = comment.topic_id;
                self.refresh_topic_activity(topic_id);
            }
            (TargetKind::Comment, ContentMutation::SoftDelete { policy }) => {
                self.comment_mut(target.id)?.is_approved = false;
                self.soft_delete_comment(target.id, *policy, now)?;
            }
            (TargetKind::Comment, ContentMutation::ReplaceBody { body }) => {
                let comment = self.comment_mut(target.id)?;
                comment.body = body.clone();
                comment.is_edited = true;
                comment.edited_at = Some(now);
                comment.updated_at = now;
                self.replace_rendered_body(target, body, now);
            }
        }
        Ok(())
    }

    /// A moderator-supplied body is stored as escaped plain text.
    fn replace_rendered_body(&mut self, target: TargetRef, body: &str, now: DateTime<Utc>) {
        if let Some(bundle) = self.rich_text.get_mut(&target) {
            bundle.content.format = TextFormat::Plain;
            bundle.content.raw_body = body.to_string();
            bundle.content.rendered_html = format!("<p>{}</p>", html_escape::encode_text(body));
            bundle.content.last_processed_at = now;
            bundle.attachments.clear();
            bundle.code_blocks.clear();
            bundle.quotes.clear();
            bundle.mentions.clear();
        }
    }

    fn insert_user_action(&mut self, action: NewUserModerationAction) -> UserModerationAction {
        let id = self.next_id();
        let stored = UserModerationAction {
            id,
            user_id: action.user_id,
            action_kind: action.action_kind,
            expires_at: action.expires_at(),
            reason: action.reason,
            applied_by: action.applied_by,
            applied_at: action.applied_at,
            duration_hours: action.duration_hours,
            is_active: true,
            revoked_by: None,
            revoked_at: None,
            related_target: action.related_target,
        };
        self.user_actions.insert(id, stored.clone());
        stored
    }

    fn insert_outbox(&mut self, messages: Vec<NewOutboxMessage>) {
        for message in messages {
            let id = self.next_id();
            self.outbox.insert(
                id,
                OutboxMessage {
                    id,
                    user_id: message.user_id,
                    channel: message.channel,
                    notification: message.notification,
                    status: OutboxStatus::Pending,
                    attempts: 0,
                    next_attempt_at: message.created_at,
                    last_error: None,
                    created_at: message.created_at,
                    updated_at: message.created_at,
                },
            );
        }
    }

    fn insert_report_log(&mut self, entry: NewReportLogEntry) -> ReportActionLog {
        let id = self.next_id();
        let stored = ReportActionLog {
            id,
            report_id: entry.report_id,
            actor_id: entry.actor_id,
            action: entry.action,
            details: entry.details,
            created_at: entry.created_at,
        };
        self.report_log.insert(id, stored.clone());
        stored
    }

    fn ensure_tags(&self, tag_ids: &[u64]) -> PortResult<()> {
        match tag_ids.iter().find(|id| !self.tags.contains_key(id)) {
            Some(id) => Err(PortError::not_found(format!("tag {id}"))),
            None => Ok(()),
        }
    }

    fn insert_topic(&mut self, topic: NewTopic) -> Topic {
        let id = self.next_id();
        let mut seen = HashSet::new();
        let stored = Topic {
            id,
            title: topic.title,
            body: topic.body,
            author_id: topic.author_id,
            category_id: topic.category_id,
            is_pinned: false,
            is_locked: false,
            is_approved: topic.is_approved,
            is_flagged: topic.is_flagged,
            flag_reason: topic.flag_reason,
            view_count: 0,
            comment_count: 0,
            last_activity_at: topic.created_at,
            book_id: topic.book_id,
            chapter_id: topic.chapter_id,
            section_id: topic.section_id,
            tag_ids: topic.tag_ids.into_iter().filter(|id| seen.insert(*id)).collect(),
            created_at: topic.created_at,
            updated_at: topic.created_at,
            deleted_at: None,
        };
        self.topics.insert(id, stored.clone());
        stored
    }
}

//=========================================================================================
// MemoryStore
//=========================================================================================

/// Store backend for local development and the integration tests.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Every outbox message, for inspection by tests and operators.
    pub fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.read().outbox.values().cloned().collect()
    }

    /// Every stored queue item regardless of status.
    pub fn queue_items(&self) -> Vec<ModerationQueueItem> {
        self.read().queue.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    fn seeded() -> (State, u64) {
        let mut state = State::default();
        let topic = state.insert_topic(NewTopic {
            title: "Chapter one".into(),
            body: "Thoughts?".into(),
            author_id: 1,
            category_id: 1,
            is_approved: true,
            is_flagged: false,
            flag_reason: None,
            book_id: None,
            chapter_id: None,
            section_id: None,
            tag_ids: vec![],
            created_at: at(0),
        });
        (state, topic.id)
    }

    fn comment(state: &mut State, topic_id: u64, parent: Option<u64>, minute: u32) -> u64 {
        let id = state.next_id();
        state.comments.insert(
            id,
            Comment {
                id,
                topic_id,
                author_id: 2,
                body: format!("reply at {minute}"),
                parent_comment_id: parent,
                is_edited: false,
                edited_at: None,
                is_approved: true,
                is_flagged: false,
                flag_reason: None,
                created_at: at(minute),
                updated_at: at(minute),
                deleted_at: None,
            },
        );
        state.refresh_topic_activity(topic_id);
        id
    }

    #[test]
    fn cascade_deletes_the_whole_subtree() {
        let (mut state, topic_id) = seeded();
        let root = comment(&mut state, topic_id, None, 1);
        let child = comment(&mut state, topic_id, Some(root), 2);
        let grandchild = comment(&mut state, topic_id, Some(child), 3);
        let sibling = comment(&mut state, topic_id, None, 4);

        let mut deleted = state.soft_delete_comment(root, DeletionPolicy::Cascade, at(5)).unwrap();
        deleted.sort();
        assert_eq!(deleted, vec![root, child, grandchild]);
        let topic = state.topic(topic_id).unwrap();
        assert_eq!(topic.comment_count, 1);
        assert_eq!(topic.last_activity_at, state.comment(sibling).unwrap().created_at);
    }

    #[test]
    fn tombstones_keep_replies_attached() {
        let (mut state, topic_id) = seeded();
        let root = comment(&mut state, topic_id, None, 1);
        let child = comment(&mut state, topic_id, Some(root), 2);

        let deleted = state
            .soft_delete_comment(root, DeletionPolicy::DetachWithTombstone, at(3))
            .unwrap();
        assert_eq!(deleted, vec![root]);
        assert_eq!(state.comment(root).unwrap().body, Comment::TOMBSTONE);
        assert_eq!(state.comment(child).unwrap().parent_comment_id, Some(root));
        assert!(!state.comment(child).unwrap().is_deleted());
    }

    #[test]
    fn second_queue_entry_for_an_open_target_is_skipped() {
        let (mut state, topic_id) = seeded();
        let entry = || ModerationRecord {
            filter_result: None,
            queue_entry: Some(NewQueueEntry {
                target_kind: TargetKind::Topic,
                target_id: None,
                author_id: 1,
                reason: "held".into(),
                priority: 3,
                created_at: at(1),
            }),
        };
        state.apply_moderation(entry(), TargetRef::topic(topic_id));
        state.apply_moderation(entry(), TargetRef::topic(topic_id));
        assert_eq!(state.queue.len(), 1);
    }
}
