//! Links between discussions and book content: topic links, comment
//! citations, templated auto-topics and discussion recommendations.

use crate::domain::{
    BookAnchor, CommentContentLink, ContentDiscussionRecommendation, ContentKind, ContentLink, ContentMetadata,
    NewCitation, NewContentLink, NewRecommendation, NewTopic, NewTopicTemplate, Page, PageRequest, Permission,
    Principal, TargetRef, TextFormat, Topic, TopicQuery, TopicSort, TopicTemplate,
};
use crate::error::{ForumError, ForumResult};
use crate::ports::{Clock, ContentMetadataService, DiscussionStore};
use crate::services::{AccessControl, Ports, RichTextProcessor, SubscriptionEngine};
use crate::settings::ForumSettings;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const TAG_WEIGHT: f64 = 0.35;
const COLINK_WEIGHT: f64 = 0.25;
const TEXT_WEIGHT: f64 = 0.3;
const TRUST_WEIGHT: f64 = 0.1;
const MIN_TOKEN_CHARS: usize = 3;
const PLACEHOLDERS: &[&str] = &["title", "summary", "kind", "id", "tags"];

//=========================================================================================
// Template expansion
//=========================================================================================

/// Replaces every `{name}` with its value; unknown markers stay literal.
pub fn expand_template(template: &str, values: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => match values.get(&after[..close]) {
                Some(value) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            },
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn template_values(kind: ContentKind, id: u64, metadata: &ContentMetadata) -> HashMap<&'static str, String> {
    HashMap::from([
        ("title", metadata.title.clone()),
        ("summary", metadata.summary.clone()),
        ("kind", kind.to_string()),
        ("id", id.to_string()),
        ("tags", metadata.tags.join(", ")),
    ])
}

fn anchor_for(kind: ContentKind, id: u64) -> BookAnchor {
    BookAnchor {
        book_id: (kind == ContentKind::Book).then_some(id),
        chapter_id: (kind == ContentKind::Chapter).then_some(id),
        section_id: (kind == ContentKind::Section).then_some(id),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].trim_end().to_string(),
        None => text.to_string(),
    }
}

//=========================================================================================
// Recommendation scoring
//=========================================================================================

pub(crate) fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_lowercase)
        .collect()
}

fn jaccard<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    shared / union
}

/// Similarity signals between one candidate topic and the content.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Signals {
    /// Jaccard overlap of tag names.
    pub tags: f64,
    /// Share of the topic's links that point at content co-linked with this content.
    pub colink: f64,
    /// Jaccard overlap of word tokens.
    pub text: f64,
    /// Author trust score in `[0, 100]`.
    pub author_trust: f64,
}

impl Signals {
    pub fn score(&self) -> f64 {
        (TAG_WEIGHT * self.tags
            + COLINK_WEIGHT * self.colink
            + TEXT_WEIGHT * self.text
            + TRUST_WEIGHT * (self.author_trust / 100.0))
            .clamp(0.0, 1.0)
    }
}

/// Keeps the `top_n` best positive scores, best first, ties by topic id.
pub fn rank(mut scored: Vec<(u64, f64)>, top_n: usize) -> Vec<NewRecommendation> {
    scored.retain(|(_, score)| *score > 0.0);
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored
        .into_iter()
        .take(top_n)
        .map(|(topic_id, recommendation_score)| NewRecommendation { topic_id, recommendation_score })
        .collect()
}

//=========================================================================================
// ContentLinkIndex
//=========================================================================================

pub struct ContentLinkIndex {
    store: Arc<dyn DiscussionStore>,
    content: Arc<dyn ContentMetadataService>,
    clock: Arc<dyn Clock>,
    access: Arc<AccessControl>,
    rich_text: Arc<RichTextProcessor>,
    subscriptions: Arc<SubscriptionEngine>,
    settings: Arc<ForumSettings>,
}

impl ContentLinkIndex {
    pub fn new(
        ports: &Ports,
        access: Arc<AccessControl>,
        rich_text: Arc<RichTextProcessor>,
        subscriptions: Arc<SubscriptionEngine>,
        settings: Arc<ForumSettings>,
    ) -> Self {
        Self {
            store: ports.store.clone(),
            content: ports.content.clone(),
            clock: ports.clock.clone(),
            access,
            rich_text,
            subscriptions,
            settings,
        }
    }

    //-------------------------------------------------------------------------------------
    // Topic links
    //-------------------------------------------------------------------------------------

    /// Links a topic to book content; only the topic's author or a moderator may.
    pub async fn link_topic(
        &self,
        principal: &Principal,
        topic_id: u64,
        kind: ContentKind,
        content_id: u64,
        highlighted: bool,
    ) -> ForumResult<ContentLink> {
        let topic = self.live_topic(topic_id).await?;
        self.require_author_or_editor(principal, topic.author_id, topic.category_id).await?;
        if highlighted {
            self.access.require_moderator(principal, Some(topic.category_id)).await?;
        }
        self.content.get_content_metadata(kind, content_id).await?;
        let link = self
            .store
            .create_content_link(
                NewContentLink {
                    topic_id,
                    content_kind: kind,
                    content_id,
                    created_by: principal.user_id,
                    is_auto_generated: false,
                    is_highlighted: highlighted,
                    template_id: None,
                },
                self.clock.now(),
            )
            .await?;
        info!(link_id = link.id, topic_id, kind = %kind, content_id, "Topic linked to content");
        Ok(link)
    }

    pub async fn unlink(&self, principal: &Principal, link_id: u64) -> ForumResult<()> {
        let link = self.store.get_content_link(link_id).await?;
        let topic = self.store.get_topic(link.topic_id).await?;
        self.access.require_member(principal)?;
        if link.created_by != principal.user_id {
            self.require_author_or_editor(principal, topic.author_id, topic.category_id).await?;
        }
        self.store.delete_content_link(link_id).await?;
        info!(link_id, topic_id = link.topic_id, by = principal.user_id, "Content link removed");
        Ok(())
    }

    pub async fn highlight(&self, principal: &Principal, link_id: u64, highlighted: bool) -> ForumResult<ContentLink> {
        let link = self.store.get_content_link(link_id).await?;
        let topic = self.store.get_topic(link.topic_id).await?;
        self.access.require_moderator(principal, Some(topic.category_id)).await?;
        Ok(self.store.set_link_highlight(link_id, highlighted, self.clock.now()).await?)
    }

    /// Visible topics discussing the content, highlighted links first.
    pub async fn topics_for_content(&self, kind: ContentKind, content_id: u64) -> ForumResult<Vec<Topic>> {
        let mut links = self.store.list_links_for_content(kind, content_id).await?;
        links.sort_by(|a, b| b.is_highlighted.cmp(&a.is_highlighted).then(a.created_at.cmp(&b.created_at)));
        let mut seen = HashSet::new();
        let ids: Vec<u64> = links.iter().map(|l| l.topic_id).filter(|id| seen.insert(*id)).collect();
        let mut by_id: HashMap<u64, Topic> = self
            .store
            .get_topics(&ids)
            .await?
            .into_iter()
            .filter(|t| !t.is_deleted() && t.is_approved)
            .map(|t| (t.id, t))
            .collect();
        Ok(ids.into_iter().filter_map(|id| by_id.remove(&id)).collect())
    }

    pub async fn content_for_topic(&self, topic_id: u64) -> ForumResult<Vec<ContentLink>> {
        self.live_topic(topic_id).await?;
        Ok(self.store.list_links_for_topics(&[topic_id]).await?)
    }

    //-------------------------------------------------------------------------------------
    // Citations
    //-------------------------------------------------------------------------------------

    pub async fn cite(
        &self,
        principal: &Principal,
        comment_id: u64,
        kind: ContentKind,
        content_id: u64,
        citation_text: String,
        citation_context: String,
    ) -> ForumResult<CommentContentLink> {
        let comment = self.store.get_comment(comment_id).await?;
        if comment.is_deleted() {
            return Err(ForumError::not_found(format!("comment {comment_id}")));
        }
        let topic = self.store.get_topic(comment.topic_id).await?;
        self.require_author_or_editor(principal, comment.author_id, topic.category_id).await?;
        if citation_text.trim().is_empty() {
            return Err(ForumError::validation("citation text cannot be empty"));
        }
        self.content.get_content_metadata(kind, content_id).await?;
        let citation = self
            .store
            .create_citation(
                NewCitation {
                    comment_id,
                    content_kind: kind,
                    content_id,
                    citation_text,
                    citation_context,
                    created_by: principal.user_id,
                },
                self.clock.now(),
            )
            .await?;
        debug!(citation_id = citation.id, comment_id, kind = %kind, content_id, "Citation added");
        Ok(citation)
    }

    /// The citing user, the comment's author or an editor may remove a citation.
    pub async fn remove_citation(&self, principal: &Principal, id: u64) -> ForumResult<()> {
        self.access.require_member(principal)?;
        let citation = self.store.get_citation(id).await?;
        if citation.created_by != principal.user_id {
            let comment = self.store.get_comment(citation.comment_id).await?;
            let topic = self.store.get_topic(comment.topic_id).await?;
            self.require_author_or_editor(principal, comment.author_id, topic.category_id).await?;
        }
        self.store.delete_citation(id).await?;
        debug!(citation_id = id, by = principal.user_id, "Citation removed");
        Ok(())
    }

    pub async fn citations_for_comment(&self, comment_id: u64) -> ForumResult<Vec<CommentContentLink>> {
        self.store.get_comment(comment_id).await?;
        Ok(self.store.list_citations_for_comment(comment_id).await?)
    }

    pub async fn citations_for_content(&self, kind: ContentKind, content_id: u64) -> ForumResult<Vec<CommentContentLink>> {
        Ok(self.store.list_citations_for_content(kind, content_id).await?)
    }

    //-------------------------------------------------------------------------------------
    // Templates and auto-topics
    //-------------------------------------------------------------------------------------

    pub async fn list_templates(&self, kind: Option<ContentKind>) -> ForumResult<Vec<TopicTemplate>> {
        Ok(self.store.list_templates(kind, false).await?)
    }

    pub async fn create_template(&self, principal: &Principal, template: NewTopicTemplate) -> ForumResult<TopicTemplate> {
        self.access.require(principal, Permission::ManageRules, None).await?;
        if template.name.trim().is_empty() || template.title_template.trim().is_empty() {
            return Err(ForumError::validation("a template needs a name and a title"));
        }
        for source in [&template.title_template, &template.body_template] {
            let probe: HashMap<&str, String> = PLACEHOLDERS.iter().map(|p| (*p, String::new())).collect();
            let expanded = expand_template(source, &probe);
            if let Some(unknown) = unknown_placeholder(&expanded) {
                return Err(ForumError::validation(format!(
                    "unknown placeholder {{{unknown}}}; use one of {}",
                    PLACEHOLDERS.join(", ")
                )));
            }
        }
        let created = self.store.create_template(template, self.clock.now()).await?;
        info!(template_id = created.id, kind = %created.content_kind, "Topic template created");
        Ok(created)
    }

    /// Materialises every active template for the content once. Returns the
    /// ids of topics created by this call; templates already materialised for
    /// the content are skipped.
    #[instrument(skip(self, principal))]
    pub async fn generate_topics_for_content(
        &self,
        principal: &Principal,
        kind: ContentKind,
        content_id: u64,
    ) -> ForumResult<Vec<u64>> {
        self.access.require_moderator(principal, None).await?;
        let category_id = self
            .settings
            .auto_topic_category_id
            .ok_or_else(|| ForumError::validation("no category is configured for generated topics"))?;
        self.store.get_category(category_id).await?;
        let templates = self.store.list_templates(Some(kind), true).await?;
        if templates.is_empty() {
            return Ok(Vec::new());
        }
        let metadata = self.content.get_content_metadata(kind, content_id).await?;
        let values = template_values(kind, content_id, &metadata);
        let anchor = anchor_for(kind, content_id);
        let author_id = self.settings.system_user_id;

        let mut created = Vec::new();
        for template in templates {
            let title = truncate_chars(
                expand_template(&template.title_template, &values).trim(),
                self.settings.max_title_chars,
            );
            let body = expand_template(&template.body_template, &values);
            let body = if body.trim().is_empty() { title.clone() } else { body };
            let now = self.clock.now();
            let text = self.rich_text.process(TextFormat::Markdown, &body, author_id).await?;
            let topic = self
                .store
                .create_auto_topic(
                    NewTopic {
                        title,
                        body,
                        author_id,
                        category_id,
                        is_approved: true,
                        is_flagged: false,
                        flag_reason: None,
                        book_id: anchor.book_id,
                        chapter_id: anchor.chapter_id,
                        section_id: anchor.section_id,
                        tag_ids: Vec::new(),
                        created_at: now,
                    },
                    text.into_bundle(TargetRef::topic(0), now),
                    NewContentLink {
                        topic_id: 0,
                        content_kind: kind,
                        content_id,
                        created_by: author_id,
                        is_auto_generated: true,
                        is_highlighted: false,
                        template_id: Some(template.id),
                    },
                )
                .await?;
            match topic {
                Some(topic) => {
                    info!(topic_id = topic.id, template_id = template.id, kind = %kind, content_id, "Generated topic");
                    if let Err(err) = self.subscriptions.topic_published(&topic).await {
                        warn!(topic_id = topic.id, error = %err, "Generated topic fan-out failed");
                    }
                    created.push(topic.id);
                }
                None => debug!(template_id = template.id, kind = %kind, content_id, "Template already materialised"),
            }
        }
        Ok(created)
    }

    //-------------------------------------------------------------------------------------
    // Recommendations
    //-------------------------------------------------------------------------------------

    /// Scores recent visible topics against the content and stores the top N.
    #[instrument(skip(self, principal))]
    pub async fn generate_recommendations(
        &self,
        principal: &Principal,
        kind: ContentKind,
        content_id: u64,
    ) -> ForumResult<Vec<ContentDiscussionRecommendation>> {
        self.access.require_moderator(principal, None).await?;
        let metadata = self.content.get_content_metadata(kind, content_id).await?;
        let candidates = self.candidates().await?;

        let content_tags: HashSet<String> = metadata.tags.iter().map(|t| t.to_lowercase()).collect();
        let content_tokens = tokens(&format!("{} {}", metadata.title, metadata.summary));

        let linked_here: HashSet<u64> = self
            .store
            .list_links_for_content(kind, content_id)
            .await?
            .into_iter()
            .map(|l| l.topic_id)
            .collect();
        let neighbours: HashSet<(ContentKind, u64)> = self
            .store
            .list_links_for_topics(&linked_here.iter().copied().collect::<Vec<_>>())
            .await?
            .into_iter()
            .map(|l| (l.content_kind, l.content_id))
            .filter(|key| *key != (kind, content_id))
            .collect();
        let candidate_ids: Vec<u64> = candidates.iter().map(|t| t.id).collect();
        let mut links_by_topic: HashMap<u64, Vec<(ContentKind, u64)>> = HashMap::new();
        for link in self.store.list_links_for_topics(&candidate_ids).await? {
            links_by_topic
                .entry(link.topic_id)
                .or_default()
                .push((link.content_kind, link.content_id));
        }
        let tag_names: HashMap<u64, String> = self
            .store
            .list_tags()
            .await?
            .into_iter()
            .map(|t| (t.id, t.name.to_lowercase()))
            .collect();

        let mut trust_cache: HashMap<u64, f64> = HashMap::new();
        let mut scored = Vec::with_capacity(candidates.len());
        for topic in &candidates {
            let topic_tags: HashSet<String> = topic.tag_ids.iter().filter_map(|id| tag_names.get(id).cloned()).collect();
            let colink = if linked_here.contains(&topic.id) {
                1.0
            } else {
                match links_by_topic.get(&topic.id) {
                    Some(links) if !links.is_empty() => {
                        links.iter().filter(|key| neighbours.contains(key)).count() as f64 / links.len() as f64
                    }
                    _ => 0.0,
                }
            };
            let author_trust = match trust_cache.get(&topic.author_id) {
                Some(score) => *score,
                None => {
                    let score = self
                        .store
                        .get_trust_score(topic.author_id)
                        .await?
                        .map(|row| row.score)
                        .unwrap_or(0.0);
                    trust_cache.insert(topic.author_id, score);
                    score
                }
            };
            let signals = Signals {
                tags: jaccard(&content_tags, &topic_tags),
                colink,
                text: jaccard(&content_tokens, &tokens(&format!("{} {}", topic.title, topic.body))),
                author_trust,
            };
            scored.push((topic.id, signals.score()));
        }

        let ranked = rank(scored, self.settings.recommendation_top_n);
        let stored = self
            .store
            .replace_recommendations(kind, content_id, ranked, self.clock.now())
            .await?;
        info!(kind = %kind, content_id, kept = stored.len(), candidates = candidates.len(), "Recommendations refreshed");
        Ok(stored)
    }

    pub async fn recommendations(&self, kind: ContentKind, content_id: u64) -> ForumResult<Vec<ContentDiscussionRecommendation>> {
        Ok(self.store.list_recommendations(kind, content_id).await?)
    }

    /// The most recently active visible topics, up to the candidate budget.
    async fn candidates(&self) -> ForumResult<Vec<Topic>> {
        let budget = self.settings.recommendation_candidates as usize;
        let query = TopicQuery { sort: TopicSort::Activity, ..Default::default() };
        let mut topics = Vec::new();
        let mut page = 1;
        while topics.len() < budget {
            let batch: Page<Topic> = self
                .store
                .list_topics(&query, PageRequest::new(Some(page), Some(PageRequest::MAX_PAGE_SIZE)))
                .await?;
            let fetched = batch.items.len();
            topics.extend(batch.items);
            if fetched < PageRequest::MAX_PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }
        topics.truncate(budget);
        Ok(topics)
    }

    //-------------------------------------------------------------------------------------
    // Helpers
    //-------------------------------------------------------------------------------------

    async fn live_topic(&self, topic_id: u64) -> ForumResult<Topic> {
        let topic = self.store.get_topic(topic_id).await?;
        if topic.is_deleted() {
            return Err(ForumError::not_found(format!("topic {topic_id}")));
        }
        Ok(topic)
    }

    async fn require_author_or_editor(&self, principal: &Principal, author_id: u64, category_id: u64) -> ForumResult<()> {
        self.access.require_member(principal)?;
        if author_id == principal.user_id {
            return Ok(());
        }
        self.access
            .require(principal, Permission::EditAnyContent, Some(category_id))
            .await?;
        Ok(())
    }
}

/// The first `{name}` marker left after expanding every known placeholder.
fn unknown_placeholder(expanded: &str) -> Option<&str> {
    let mut rest = expanded;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after.find('}')?;
        let name = &after[..close];
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Some(name);
        }
        rest = after;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ContentMetadata {
        ContentMetadata {
            title: "The Tide".into(),
            summary: "Rivers and the sea".into(),
            owner_id: 9,
            tags: vec!["ocean".into(), "poetry".into()],
        }
    }

    #[test]
    fn templates_expand_known_placeholders() {
        let values = template_values(ContentKind::Section, 42, &metadata());
        assert_eq!(
            expand_template("Discuss {title} ({kind} {id})", &values),
            "Discuss The Tide (section 42)"
        );
        assert_eq!(expand_template("{tags}", &values), "ocean, poetry");
    }

    #[test]
    fn unknown_or_unbalanced_markers_stay_literal() {
        let values = template_values(ContentKind::Book, 1, &metadata());
        assert_eq!(expand_template("{nope} {title}", &values), "{nope} The Tide");
        assert_eq!(expand_template("open {title", &values), "open {title");
        assert_eq!(unknown_placeholder("{nope} x"), Some("nope"));
        assert_eq!(unknown_placeholder("a { b"), None);
    }

    #[test]
    fn anchors_follow_the_content_kind() {
        let anchor = anchor_for(ContentKind::Chapter, 5);
        assert_eq!(anchor.most_specific(), Some((ContentKind::Chapter, 5)));
        assert_eq!(anchor_for(ContentKind::Resource, 5).most_specific(), None);
    }

    #[test]
    fn scores_stay_in_the_unit_interval() {
        let perfect = Signals { tags: 1.0, colink: 1.0, text: 1.0, author_trust: 100.0 };
        assert!((perfect.score() - 1.0).abs() < 1e-9);
        assert_eq!(Signals::default().score(), 0.0);
        let over = Signals { author_trust: 1000.0, ..perfect };
        assert_eq!(over.score(), 1.0);
    }

    #[test]
    fn ranking_keeps_the_best_positive_scores() {
        let ranked = rank(vec![(1, 0.2), (2, 0.0), (3, 0.9), (4, 0.2), (5, 0.5)], 3);
        let ids: Vec<u64> = ranked.iter().map(|r| r.topic_id).collect();
        assert_eq!(ids, vec![3, 5, 1]);
    }

    #[test]
    fn tokens_ignore_case_and_short_words() {
        let words = tokens("The tide, the TIDE and a sea");
        assert!(words.contains("tide"));
        assert!(words.contains("the"));
        assert!(!words.contains("a"));
        assert_eq!(words.len(), 4);
    }
}
