//! Topic links, citations, templates and recommendations.

use super::{MemoryStore, State};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forum_core::domain::*;
use forum_core::ports::{ContentLinkStore, PortError, PortResult};
use std::cmp::Ordering;

impl State {
    fn insert_content_link(&mut self, link: NewContentLink, now: DateTime<Utc>) -> PortResult<ContentLink> {
        let duplicate = self.content_links.values().any(|l| {
            l.topic_id == link.topic_id && l.content_kind == link.content_kind && l.content_id == link.content_id
        });
        if duplicate {
            return Err(PortError::conflict(format!(
                "topic {} is already linked to {} {}",
                link.topic_id, link.content_kind, link.content_id
            )));
        }
        let id = self.next_id();
        let stored = ContentLink {
            id,
            topic_id: link.topic_id,
            content_kind: link.content_kind,
            content_id: link.content_id,
            created_by: link.created_by,
            is_auto_generated: link.is_auto_generated,
            is_highlighted: link.is_highlighted,
            template_id: link.template_id,
            created_at: now,
            updated_at: now,
        };
        self.content_links.insert(id, stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl ContentLinkStore for MemoryStore {
    async fn create_content_link(&self, link: NewContentLink, now: DateTime<Utc>) -> PortResult<ContentLink> {
        let mut state = self.write();
        state.topic(link.topic_id)?;
        state.insert_content_link(link, now)
    }

    async fn get_content_link(&self, id: u64) -> PortResult<ContentLink> {
        self.read()
            .content_links
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found(format!("content link {id}")))
    }

    async fn delete_content_link(&self, id: u64) -> PortResult<()> {
        match self.write().content_links.remove(&id) {
            Some(_) => Ok(()),
            None => Err(PortError::not_found(format!("content link {id}"))),
        }
    }

    async fn set_link_highlight(&self, id: u64, highlighted: bool, now: DateTime<Utc>) -> PortResult<ContentLink> {
        let mut state = self.write();
        let link = state
            .content_links
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("content link {id}")))?;
        link.is_highlighted = highlighted;
        link.updated_at = now;
        Ok(link.clone())
    }

    async fn list_links_for_content(&self, kind: ContentKind, content_id: u64) -> PortResult<Vec<ContentLink>> {
        Ok(self
            .read()
            .content_links
            .values()
            .filter(|l| l.content_kind == kind && l.content_id == content_id)
            .cloned()
            .collect())
    }

    async fn list_links_for_topics(&self, topic_ids: &[u64]) -> PortResult<Vec<ContentLink>> {
        Ok(self
            .read()
            .content_links
            .values()
            .filter(|l| topic_ids.contains(&l.topic_id))
            .cloned()
            .collect())
    }

    async fn create_citation(&self, citation: NewCitation, now: DateTime<Utc>) -> PortResult<CommentContentLink> {
        let mut state = self.write();
        state.comment(citation.comment_id)?;
        let id = state.next_id();
        let stored = CommentContentLink {
            id,
            comment_id: citation.comment_id,
            content_kind: citation.content_kind,
            content_id: citation.content_id,
            citation_text: citation.citation_text,
            citation_context: citation.citation_context,
            created_by: citation.created_by,
            created_at: now,
        };
        state.citations.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_citation(&self, id: u64) -> PortResult<CommentContentLink> {
        self.read()
            .citations
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found(format!("citation {id}")))
    }

    async fn delete_citation(&self, id: u64) -> PortResult<CommentContentLink> {
        self.write()
            .citations
            .remove(&id)
            .ok_or_else(|| PortError::not_found(format!("citation {id}")))
    }

    async fn list_citations_for_comment(&self, comment_id: u64) -> PortResult<Vec<CommentContentLink>> {
        Ok(self
            .read()
            .citations
            .values()
            .filter(|c| c.comment_id == comment_id)
            .cloned()
            .collect())
    }

    async fn list_citations_for_content(&self, kind: ContentKind, content_id: u64) -> PortResult<Vec<CommentContentLink>> {
        Ok(self
            .read()
            .citations
            .values()
            .filter(|c| c.content_kind == kind && c.content_id == content_id)
            .cloned()
            .collect())
    }

    async fn create_template(&self, template: NewTopicTemplate, now: DateTime<Utc>) -> PortResult<TopicTemplate> {
        let mut state = self.write();
        if state
            .templates
            .values()
            .any(|t| t.name == template.name && t.content_kind == template.content_kind)
        {
            return Err(PortError::conflict(format!("template '{}'", template.name)));
        }
        let id = state.next_id();
        let stored = TopicTemplate {
            id,
            name: template.name,
            content_kind: template.content_kind,
            title_template: template.title_template,
            body_template: template.body_template,
            is_active: template.is_active,
            created_at: now,
            updated_at: now,
        };
        state.templates.insert(id, stored.clone());
        Ok(stored)
    }

    async fn list_templates(&self, kind: Option<ContentKind>, active_only: bool) -> PortResult<Vec<TopicTemplate>> {
        Ok(self
            .read()
            .templates
            .values()
            .filter(|t| kind.map_or(true, |k| t.content_kind == k) && (!active_only || t.is_active))
            .cloned()
            .collect())
    }

    async fn create_auto_topic(
        &self,
        topic: NewTopic,
        rich_text: RichTextBundle,
        link: NewContentLink,
    ) -> PortResult<Option<Topic>> {
        let mut state = self.write();
        let materialised = state.content_links.values().any(|l| {
            l.template_id.is_some()
                && l.template_id == link.template_id
                && l.content_kind == link.content_kind
                && l.content_id == link.content_id
        });
        if materialised {
            return Ok(None);
        }
        if !state.categories.contains_key(&topic.category_id) {
            return Err(PortError::not_found(format!("category {}", topic.category_id)));
        }
        let now = topic.created_at;
        let created = state.insert_topic(topic);
        state.store_rich_text(rich_text, created.target());
        state.insert_content_link(NewContentLink { topic_id: created.id, ..link }, now)?;
        Ok(Some(created))
    }

    async fn replace_recommendations(
        &self,
        kind: ContentKind,
        content_id: u64,
        recommendations: Vec<NewRecommendation>,
        now: DateTime<Utc>,
    ) -> PortResult<Vec<ContentDiscussionRecommendation>> {
        let mut state = self.write();
        state
            .recommendations
            .retain(|_, r| !(r.content_kind == kind && r.content_id == content_id));
        let mut stored = Vec::with_capacity(recommendations.len());
        for recommendation in recommendations {
            let id = state.next_id();
            let row = ContentDiscussionRecommendation {
                id,
                content_kind: kind,
                content_id,
                topic_id: recommendation.topic_id,
                recommendation_score: recommendation.recommendation_score.clamp(0.0, 1.0),
                created_at: now,
            };
            state.recommendations.insert(id, row.clone());
            stored.push(row);
        }
        Ok(stored)
    }

    async fn list_recommendations(&self, kind: ContentKind, content_id: u64) -> PortResult<Vec<ContentDiscussionRecommendation>> {
        let mut rows: Vec<ContentDiscussionRecommendation> = self
            .read()
            .recommendations
            .values()
            .filter(|r| r.content_kind == kind && r.content_id == content_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.recommendation_score
                .partial_cmp(&a.recommendation_score)
                .unwrap_or(Ordering::Equal)
                .then(a.topic_id.cmp(&b.topic_id))
        });
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forum_core::ports::CategoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn empty_bundle() -> RichTextBundle {
        ProcessedText {
            format: TextFormat::Markdown,
            raw_body: "Body".into(),
            rendered_html: "<p>Body</p>".into(),
            mentioned_user_ids: vec![],
            mentions: vec![],
            attachments: vec![],
            code_blocks: vec![],
            quotes: vec![],
            flags: RichTextFlags::default(),
        }
        .into_bundle(TargetRef::topic(0), now())
    }

    #[tokio::test]
    async fn auto_topics_are_created_once_per_template_and_content() {
        let store = MemoryStore::new();
        let category = store
            .create_category(
                NewCategory {
                    name: "Book club".into(),
                    slug: "book-club".into(),
                    description: String::new(),
                    parent_id: None,
                    sort_order: 0,
                },
                now(),
            )
            .await
            .unwrap();
        let topic = || NewTopic {
            title: "Discuss: Dune".into(),
            body: "Body".into(),
            author_id: 1,
            category_id: category.id,
            is_approved: true,
            is_flagged: false,
            flag_reason: None,
            book_id: Some(42),
            chapter_id: None,
            section_id: None,
            tag_ids: vec![],
            created_at: now(),
        };
        let link = || NewContentLink {
            topic_id: 0,
            content_kind: ContentKind::Book,
            content_id: 42,
            created_by: 1,
            is_auto_generated: true,
            is_highlighted: false,
            template_id: Some(7),
        };

        let first = store.create_auto_topic(topic(), empty_bundle(), link()).await.unwrap();
        let second = store.create_auto_topic(topic(), empty_bundle(), link()).await.unwrap();
        let created = first.expect("first call creates the topic");
        assert!(second.is_none());

        let links = store.list_links_for_content(ContentKind::Book, 42).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].topic_id, created.id);
        assert!(links[0].is_auto_generated);
    }
}
