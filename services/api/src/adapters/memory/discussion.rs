//! Categories, topics, comments, reactions, tags and rich text.

use super::MemoryStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forum_core::domain::*;
use forum_core::ports::{
    CategoryStore, CommentStore, PortError, PortResult, ReactionStore, RichTextStore, TagStore, TopicStore,
};
use std::cmp::Reverse;
use std::collections::HashSet;

#[async_trait]
impl CategoryStore for MemoryStore {
    async fn create_category(&self, category: NewCategory, now: DateTime<Utc>) -> PortResult<Category> {
        let mut state = self.write();
        if state.categories.values().any(|c| c.slug == category.slug) {
            return Err(PortError::conflict(format!("category slug '{}'", category.slug)));
        }
        let id = state.next_id();
        let created = Category {
            id,
            name: category.name,
            slug: category.slug,
            description: category.description,
            parent_id: category.parent_id,
            sort_order: category.sort_order,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.categories.insert(id, created.clone());
        Ok(created)
    }

    async fn get_category(&self, id: u64) -> PortResult<Category> {
        self.read()
            .categories
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found(format!("category {id}")))
    }

    async fn list_categories(&self) -> PortResult<Vec<Category>> {
        Ok(self.read().categories.values().cloned().collect())
    }

    async fn update_category(&self, id: u64, patch: CategoryPatch, now: DateTime<Utc>) -> PortResult<Category> {
        let mut state = self.write();
        if let Some(slug) = &patch.slug {
            if state.categories.values().any(|c| c.id != id && &c.slug == slug) {
                return Err(PortError::conflict(format!("category slug '{slug}'")));
            }
        }
        let category = state
            .categories
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("category {id}")))?;
        if let Some(name) = patch.name {
            category.name = name;
        }
        if let Some(slug) = patch.slug {
            category.slug = slug;
        }
        if let Some(description) = patch.description {
            category.description = description;
        }
        if let Some(parent_id) = patch.parent_id {
            category.parent_id = parent_id;
        }
        if let Some(sort_order) = patch.sort_order {
            category.sort_order = sort_order;
        }
        if let Some(is_active) = patch.is_active {
            category.is_active = is_active;
        }
        category.updated_at = now;
        Ok(category.clone())
    }

    async fn get_category_config(&self, category_id: u64) -> PortResult<Option<CategoryConfig>> {
        Ok(self.read().category_configs.get(&category_id).cloned())
    }

    async fn upsert_category_config(&self, config: CategoryConfig) -> PortResult<CategoryConfig> {
        let mut state = self.write();
        if !state.categories.contains_key(&config.category_id) {
            return Err(PortError::not_found(format!("category {}", config.category_id)));
        }
        state.category_configs.insert(config.category_id, config.clone());
        Ok(config)
    }

    async fn add_category_moderator(&self, moderator: CategoryModerator) -> PortResult<CategoryModerator> {
        let mut state = self.write();
        if !state.categories.contains_key(&moderator.category_id) {
            return Err(PortError::not_found(format!("category {}", moderator.category_id)));
        }
        if state
            .category_moderators
            .iter()
            .any(|m| m.category_id == moderator.category_id && m.user_id == moderator.user_id)
        {
            return Err(PortError::conflict(format!(
                "user {} already moderates category {}",
                moderator.user_id, moderator.category_id
            )));
        }
        state.category_moderators.push(moderator.clone());
        Ok(moderator)
    }

    async fn remove_category_moderator(&self, category_id: u64, user_id: u64) -> PortResult<bool> {
        let mut state = self.write();
        let before = state.category_moderators.len();
        state
            .category_moderators
            .retain(|m| !(m.category_id == category_id && m.user_id == user_id));
        Ok(state.category_moderators.len() != before)
    }

    async fn list_category_moderators(&self, category_id: u64) -> PortResult<Vec<CategoryModerator>> {
        Ok(self
            .read()
            .category_moderators
            .iter()
            .filter(|m| m.category_id == category_id)
            .cloned()
            .collect())
    }

    async fn moderated_categories(&self, user_id: u64) -> PortResult<Vec<u64>> {
        Ok(self
            .read()
            .category_moderators
            .iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.category_id)
            .collect())
    }

    async fn ping(&self) -> PortResult<()> {
        Ok(())
    }
}

fn visible(comment: &Comment) -> bool {
    comment.is_approved && !comment.is_deleted()
}

fn matches_query(topic: &Topic, query: &TopicQuery) -> bool {
    (query.include_deleted || !topic.is_deleted())
        && (query.include_unapproved || topic.is_approved)
        && query.category_id.map_or(true, |id| topic.category_id == id)
        && query.author_id.map_or(true, |id| topic.author_id == id)
        && query.book_id.map_or(true, |id| topic.book_id == Some(id))
        && query.chapter_id.map_or(true, |id| topic.chapter_id == Some(id))
        && query.section_id.map_or(true, |id| topic.section_id == Some(id))
        && query.tag_ids.iter().all(|tag| topic.tag_ids.contains(tag))
}

fn sort_topics(topics: &mut [Topic], sort: TopicSort) {
    match sort {
        TopicSort::Activity => {
            topics.sort_by_key(|t| (Reverse(t.is_pinned), Reverse(t.last_activity_at), Reverse(t.id)))
        }
        TopicSort::Newest => topics.sort_by_key(|t| (Reverse(t.created_at), Reverse(t.id))),
        TopicSort::Oldest => topics.sort_by_key(|t| (t.created_at, t.id)),
        TopicSort::MostViewed => topics.sort_by_key(|t| (Reverse(t.view_count), Reverse(t.id))),
        TopicSort::MostCommented => topics.sort_by_key(|t| (Reverse(t.comment_count), Reverse(t.id))),
    }
}

#[async_trait]
impl TopicStore for MemoryStore {
    async fn create_topic(
        &self,
        topic: NewTopic,
        rich_text: RichTextBundle,
        moderation: ModerationRecord,
    ) -> PortResult<Topic> {
        let mut state = self.write();
        if !state.categories.contains_key(&topic.category_id) {
            return Err(PortError::not_found(format!("category {}", topic.category_id)));
        }
        state.ensure_tags(&topic.tag_ids)?;
        let created = state.insert_topic(topic);
        state.store_rich_text(rich_text, created.target());
        state.apply_moderation(moderation, created.target());
        Ok(created)
    }

    async fn get_topic(&self, id: u64) -> PortResult<Topic> {
        self.read().topic(id).cloned()
    }

    async fn get_topics(&self, ids: &[u64]) -> PortResult<Vec<Topic>> {
        let state = self.read();
        Ok(ids.iter().filter_map(|id| state.topics.get(id).cloned()).collect())
    }

    async fn list_topics(&self, query: &TopicQuery, page: PageRequest) -> PortResult<Page<Topic>> {
        let mut topics: Vec<Topic> = self
            .read()
            .topics
            .values()
            .filter(|t| matches_query(t, query))
            .cloned()
            .collect();
        sort_topics(&mut topics, query.sort);
        Ok(Page::from_vec(topics, page))
    }

    async fn update_topic(
        &self,
        topic: &Topic,
        rich_text: Option<RichTextBundle>,
        moderation: ModerationRecord,
    ) -> PortResult<Topic> {
        let mut state = self.write();
        if !state.categories.contains_key(&topic.category_id) {
            return Err(PortError::not_found(format!("category {}", topic.category_id)));
        }
        state.ensure_tags(&topic.tag_ids)?;
        let stored = state.topic_mut(topic.id)?;
        // Counters are owned by the store and survive a stale caller copy.
        *stored = Topic {
            view_count: stored.view_count,
            comment_count: stored.comment_count,
            last_activity_at: stored.last_activity_at,
            created_at: stored.created_at,
            ..topic.clone()
        };
        let updated = stored.clone();
        if let Some(bundle) = rich_text {
            state.store_rich_text(bundle, updated.target());
        }
        state.apply_moderation(moderation, updated.target());
        Ok(updated)
    }

    async fn soft_delete_topic(&self, id: u64, now: DateTime<Utc>) -> PortResult<()> {
        let mut state = self.write();
        let topic = state.topic_mut(id)?;
        topic.deleted_at.get_or_insert(now);
        topic.updated_at = now;
        Ok(())
    }

    async fn increment_view_count(&self, id: u64) -> PortResult<u64> {
        let mut state = self.write();
        let topic = state.topic_mut(id)?;
        topic.view_count += 1;
        Ok(topic.view_count)
    }

    async fn attach_tag(&self, topic_id: u64, tag_id: u64, now: DateTime<Utc>) -> PortResult<bool> {
        let mut state = self.write();
        state.ensure_tags(&[tag_id])?;
        let topic = state.topic_mut(topic_id)?;
        if topic.tag_ids.contains(&tag_id) {
            return Ok(false);
        }
        topic.tag_ids.push(tag_id);
        topic.updated_at = now;
        Ok(true)
    }

    async fn detach_tag(&self, topic_id: u64, tag_id: u64, now: DateTime<Utc>) -> PortResult<bool> {
        let mut state = self.write();
        let topic = state.topic_mut(topic_id)?;
        let before = topic.tag_ids.len();
        topic.tag_ids.retain(|id| *id != tag_id);
        if topic.tag_ids.len() == before {
            return Ok(false);
        }
        topic.updated_at = now;
        Ok(true)
    }
}

#[async_trait]
impl CommentStore for MemoryStore {
    async fn create_comment(
        &self,
        comment: NewComment,
        rich_text: RichTextBundle,
        moderation: ModerationRecord,
    ) -> PortResult<Comment> {
        let mut state = self.write();
        state.topic(comment.topic_id)?;
        if let Some(parent_id) = comment.parent_comment_id {
            if state.comment(parent_id)?.topic_id != comment.topic_id {
                return Err(PortError::not_found(format!("comment {parent_id} in topic {}", comment.topic_id)));
            }
        }
        let id = state.next_id();
        let created = Comment {
            id,
            topic_id: comment.topic_id,
            author_id: comment.author_id,
            body: comment.body,
            parent_comment_id: comment.parent_comment_id,
            is_edited: false,
            edited_at: None,
            is_approved: comment.is_approved,
            is_flagged: comment.is_flagged,
            flag_reason: comment.flag_reason,
            created_at: comment.created_at,
            updated_at: comment.created_at,
            deleted_at: None,
        };
        state.comments.insert(id, created.clone());
        if created.is_approved {
            state.refresh_topic_activity(created.topic_id);
        }
        state.store_rich_text(rich_text, created.target());
        state.apply_moderation(moderation, created.target());
        Ok(created)
    }

    async fn get_comment(&self, id: u64) -> PortResult<Comment> {
        self.read().comment(id).cloned()
    }

    async fn list_comments(&self, topic_id: u64, include_hidden: bool, page: PageRequest) -> PortResult<Page<Comment>> {
        let state = self.read();
        state.topic(topic_id)?;
        let in_topic: Vec<&Comment> = state.comments.values().filter(|c| c.topic_id == topic_id).collect();
        let mut comments: Vec<Comment> = if include_hidden {
            in_topic.into_iter().cloned().collect()
        } else {
            // A tombstone stays listed while it still carries visible replies.
            let live_parents: HashSet<u64> = in_topic
                .iter()
                .filter(|c| visible(c))
                .filter_map(|c| c.parent_comment_id)
                .collect();
            in_topic
                .into_iter()
                .filter(|c| {
                    visible(c) || (c.is_deleted() && c.body == Comment::TOMBSTONE && live_parents.contains(&c.id))
                })
                .cloned()
                .collect()
        };
        comments.sort_by_key(|c| (c.created_at, c.id));
        Ok(Page::from_vec(comments, page))
    }

    async fn update_comment(
        &self,
        comment: &Comment,
        rich_text: Option<RichTextBundle>,
        moderation: ModerationRecord,
    ) -> PortResult<Comment> {
        let mut state = self.write();
        let stored = state.comment_mut(comment.id)?;
        stored.body = comment.body.clone();
        stored.is_edited = comment.is_edited;
        stored.edited_at = comment.edited_at;
        stored.is_approved = comment.is_approved;
        stored.is_flagged = comment.is_flagged;
        stored.flag_reason = comment.flag_reason.clone();
        stored.updated_at = comment.updated_at;
        let updated = stored.clone();
        state.refresh_topic_activity(updated.topic_id);
        if let Some(bundle) = rich_text {
            state.store_rich_text(bundle, updated.target());
        }
        state.apply_moderation(moderation, updated.target());
        Ok(updated)
    }

    async fn delete_comment(&self, id: u64, policy: DeletionPolicy, now: DateTime<Utc>) -> PortResult<Vec<u64>> {
        self.write().soft_delete_comment(id, policy, now)
    }
}

#[async_trait]
impl ReactionStore for MemoryStore {
    async fn add_reaction(&self, reaction: Reaction, policy: ReactionPolicy) -> PortResult<ReactionOutcome> {
        let mut state = self.write();
        state.ensure_target(reaction.target)?;
        let mine = |r: &Reaction| r.user_id == reaction.user_id && r.target == reaction.target;
        if state.reactions.iter().any(|r| mine(r) && r.kind == reaction.kind) {
            return Ok(ReactionOutcome::AlreadyPresent);
        }
        let mut outcome = ReactionOutcome::Added;
        if policy == ReactionPolicy::SingleKind {
            let before = state.reactions.len();
            state.reactions.retain(|r| !mine(r));
            if state.reactions.len() != before {
                outcome = ReactionOutcome::Replaced;
            }
        }
        state.reactions.push(reaction);
        Ok(outcome)
    }

    async fn remove_reaction(&self, user_id: u64, target: TargetRef, kind: ReactionKind) -> PortResult<bool> {
        let mut state = self.write();
        let before = state.reactions.len();
        state
            .reactions
            .retain(|r| !(r.user_id == user_id && r.target == target && r.kind == kind));
        Ok(state.reactions.len() != before)
    }

    async fn reaction_summary(&self, target: TargetRef) -> PortResult<ReactionSummary> {
        let state = self.read();
        let counts = ReactionKind::ALL
            .iter()
            .map(|kind| ReactionCount {
                kind: *kind,
                count: state
                    .reactions
                    .iter()
                    .filter(|r| r.target == target && r.kind == *kind)
                    .count() as u64,
            })
            .collect();
        Ok(ReactionSummary::from_counts(target, counts))
    }
}

#[async_trait]
impl TagStore for MemoryStore {
    async fn create_tag(&self, tag: NewTag, now: DateTime<Utc>) -> PortResult<Tag> {
        let mut state = self.write();
        if state.tags.values().any(|t| t.slug == tag.slug) {
            return Err(PortError::conflict(format!("tag slug '{}'", tag.slug)));
        }
        let id = state.next_id();
        let created = Tag {
            id,
            name: tag.name,
            slug: tag.slug,
            color: tag.color,
            is_system: tag.is_system,
            created_at: now,
            updated_at: now,
        };
        state.tags.insert(id, created.clone());
        Ok(created)
    }

    async fn get_tag(&self, id: u64) -> PortResult<Tag> {
        self.read()
            .tags
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found(format!("tag {id}")))
    }

    async fn get_tags(&self, ids: &[u64]) -> PortResult<Vec<Tag>> {
        let state = self.read();
        Ok(ids.iter().filter_map(|id| state.tags.get(id).cloned()).collect())
    }

    async fn list_tags(&self) -> PortResult<Vec<Tag>> {
        Ok(self.read().tags.values().cloned().collect())
    }

    async fn update_tag(&self, id: u64, patch: TagPatch, now: DateTime<Utc>) -> PortResult<Tag> {
        let mut state = self.write();
        if let Some(slug) = &patch.slug {
            if state.tags.values().any(|t| t.id != id && &t.slug == slug) {
                return Err(PortError::conflict(format!("tag slug '{slug}'")));
            }
        }
        let tag = state
            .tags
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("tag {id}")))?;
        if let Some(name) = patch.name {
            tag.name = name;
        }
        if let Some(slug) = patch.slug {
            tag.slug = slug;
        }
        if let Some(color) = patch.color {
            tag.color = color;
        }
        tag.updated_at = now;
        Ok(tag.clone())
    }

    async fn delete_tag(&self, id: u64) -> PortResult<()> {
        let mut state = self.write();
        if state.tags.remove(&id).is_none() {
            return Err(PortError::not_found(format!("tag {id}")));
        }
        for topic in state.topics.values_mut() {
            topic.tag_ids.retain(|tag| *tag != id);
        }
        state
            .subscriptions
            .retain(|_, s| !(s.subject_kind == SubjectKind::Tag && s.subject_id == id));
        Ok(())
    }
}

#[async_trait]
impl RichTextStore for MemoryStore {
    async fn get_rich_text(&self, target: TargetRef) -> PortResult<Option<RichTextBundle>> {
        Ok(self.read().rich_text.get(&target).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    fn topic(id: u64, pinned: bool, activity: u32, views: u64) -> Topic {
        Topic {
            id,
            title: format!("topic {id}"),
            body: String::new(),
            author_id: 1,
            category_id: 1,
            is_pinned: pinned,
            is_locked: false,
            is_approved: true,
            is_flagged: false,
            flag_reason: None,
            view_count: views,
            comment_count: 0,
            last_activity_at: at(activity),
            book_id: None,
            chapter_id: None,
            section_id: None,
            tag_ids: vec![],
            created_at: at(0),
            updated_at: at(0),
            deleted_at: None,
        }
    }

    #[test]
    fn activity_sort_puts_pinned_topics_first() {
        let mut topics = vec![topic(1, false, 30, 0), topic(2, true, 5, 0), topic(3, false, 40, 0)];
        sort_topics(&mut topics, TopicSort::Activity);
        let ids: Vec<u64> = topics.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);

        sort_topics(&mut topics, TopicSort::MostViewed);
        assert_eq!(topics[0].id, 3);
    }

    #[test]
    fn tag_filter_requires_every_tag() {
        let mut tagged = topic(1, false, 0, 0);
        tagged.tag_ids = vec![4, 5];
        let query = TopicQuery { tag_ids: vec![4, 5], ..Default::default() };
        assert!(matches_query(&tagged, &query));
        tagged.tag_ids = vec![4];
        assert!(!matches_query(&tagged, &query));
    }

    #[tokio::test]
    async fn single_kind_policy_replaces_the_previous_reaction() {
        let store = MemoryStore::new();
        let category = store
            .create_category(
                NewCategory {
                    name: "General".into(),
                    slug: "general".into(),
                    description: String::new(),
                    parent_id: None,
                    sort_order: 0,
                },
                at(0),
            )
            .await
            .unwrap();
        let target = store
            .write()
            .insert_topic(NewTopic {
                title: "Welcome".into(),
                body: "Say hello".into(),
                author_id: 1,
                category_id: category.id,
                is_approved: true,
                is_flagged: false,
                flag_reason: None,
                book_id: None,
                chapter_id: None,
                section_id: None,
                tag_ids: vec![],
                created_at: at(0),
            })
            .target();
        let react = |kind| Reaction { user_id: 9, target, kind, created_at: at(1) };

        let first = store.add_reaction(react(ReactionKind::Like), ReactionPolicy::SingleKind).await.unwrap();
        let again = store.add_reaction(react(ReactionKind::Like), ReactionPolicy::SingleKind).await.unwrap();
        let swapped = store.add_reaction(react(ReactionKind::Love), ReactionPolicy::SingleKind).await.unwrap();
        assert_eq!(first, ReactionOutcome::Added);
        assert_eq!(again, ReactionOutcome::AlreadyPresent);
        assert_eq!(swapped, ReactionOutcome::Replaced);

        let summary = store.reaction_summary(target).await.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.count_of(ReactionKind::Love), 1);
    }
}
