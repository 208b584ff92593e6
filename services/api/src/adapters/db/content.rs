//! Topic links, citations, templates and recommendations.

use super::records::{CitationRecord, ContentLinkRecord, RecommendationRecord, TemplateRecord};
use super::*;
use async_trait::async_trait;
use forum_core::ports::ContentLinkStore;

async fn insert_content_link(
    conn: &mut PgConnection,
    link: &NewContentLink,
    now: DateTime<Utc>,
) -> PortResult<ContentLink> {
    sqlx::query_as::<_, ContentLinkRecord>(
        "INSERT INTO content_links (topic_id, content_kind, content_id, created_by, is_auto_generated, \
             is_highlighted, template_id, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) RETURNING *",
    )
    .bind(db_id(link.topic_id))
    .bind(link.content_kind.as_str())
    .bind(db_id(link.content_id))
    .bind(db_id(link.created_by))
    .bind(link.is_auto_generated)
    .bind(link.is_highlighted)
    .bind(opt_id(link.template_id))
    .bind(now)
    .fetch_one(conn)
    .await
    .map_err(port_err(format!(
        "link of topic {} to {} {}",
        link.topic_id, link.content_kind, link.content_id
    )))?
    .to_domain()
}

fn links(rows: Vec<ContentLinkRecord>) -> PortResult<Vec<ContentLink>> {
    rows.into_iter().map(ContentLinkRecord::to_domain).collect()
}

fn citations(rows: Vec<CitationRecord>) -> PortResult<Vec<CommentContentLink>> {
    rows.into_iter().map(CitationRecord::to_domain).collect()
}

#[async_trait]
impl ContentLinkStore for PgStore {
    async fn create_content_link(&self, link: NewContentLink, now: DateTime<Utc>) -> PortResult<ContentLink> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        fetch_topic(&mut *tx, link.topic_id).await?;
        let stored = insert_content_link(&mut *tx, &link, now).await?;
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(stored)
    }

    async fn get_content_link(&self, id: u64) -> PortResult<ContentLink> {
        sqlx::query_as::<_, ContentLinkRecord>("SELECT * FROM content_links WHERE id = $1")
            .bind(db_id(id))
            .fetch_one(&self.pool)
            .await
            .map_err(port_err(format!("content link {id}")))?
            .to_domain()
    }

    async fn delete_content_link(&self, id: u64) -> PortResult<()> {
        let removed = sqlx::query("DELETE FROM content_links WHERE id = $1")
            .bind(db_id(id))
            .execute(&self.pool)
            .await
            .map_err(port_err(format!("content link {id}")))?
            .rows_affected();
        if removed == 0 {
            return Err(PortError::not_found(format!("content link {id}")));
        }
        Ok(())
    }

    async fn set_link_highlight(&self, id: u64, highlighted: bool, now: DateTime<Utc>) -> PortResult<ContentLink> {
        sqlx::query_as::<_, ContentLinkRecord>(
            "UPDATE content_links SET is_highlighted = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(db_id(id))
        .bind(highlighted)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("content link {id}")))?
        .to_domain()
    }

    async fn list_links_for_content(&self, kind: ContentKind, content_id: u64) -> PortResult<Vec<ContentLink>> {
        let rows = sqlx::query_as::<_, ContentLinkRecord>(
            "SELECT * FROM content_links WHERE content_kind = $1 AND content_id = $2 ORDER BY id",
        )
        .bind(kind.as_str())
        .bind(db_id(content_id))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err(format!("links to {kind} {content_id}")))?;
        links(rows)
    }

    async fn list_links_for_topics(&self, topic_ids: &[u64]) -> PortResult<Vec<ContentLink>> {
        let rows = sqlx::query_as::<_, ContentLinkRecord>(
            "SELECT * FROM content_links WHERE topic_id = ANY($1) ORDER BY id",
        )
        .bind(ids(topic_ids))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err("content links"))?;
        links(rows)
    }

    async fn create_citation(&self, citation: NewCitation, now: DateTime<Utc>) -> PortResult<CommentContentLink> {
        // A missing comment trips the foreign key and surfaces as NotFound.
        sqlx::query_as::<_, CitationRecord>(
            "INSERT INTO comment_content_links (comment_id, content_kind, content_id, citation_text, \
                 citation_context, created_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(db_id(citation.comment_id))
        .bind(citation.content_kind.as_str())
        .bind(db_id(citation.content_id))
        .bind(&citation.citation_text)
        .bind(&citation.citation_context)
        .bind(db_id(citation.created_by))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("comment {}", citation.comment_id)))?
        .to_domain()
    }

    async fn get_citation(&self, id: u64) -> PortResult<CommentContentLink> {
        sqlx::query_as::<_, CitationRecord>("SELECT * FROM comment_content_links WHERE id = $1")
            .bind(db_id(id))
            .fetch_one(&self.pool)
            .await
            .map_err(port_err(format!("citation {id}")))?
            .to_domain()
    }

    async fn delete_citation(&self, id: u64) -> PortResult<CommentContentLink> {
        sqlx::query_as::<_, CitationRecord>("DELETE FROM comment_content_links WHERE id = $1 RETURNING *")
            .bind(db_id(id))
            .fetch_one(&self.pool)
            .await
            .map_err(port_err(format!("citation {id}")))?
            .to_domain()
    }

    async fn list_citations_for_comment(&self, comment_id: u64) -> PortResult<Vec<CommentContentLink>> {
        let rows = sqlx::query_as::<_, CitationRecord>(
            "SELECT * FROM comment_content_links WHERE comment_id = $1 ORDER BY id",
        )
        .bind(db_id(comment_id))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err(format!("citations of comment {comment_id}")))?;
        citations(rows)
    }

    async fn list_citations_for_content(
        &self,
        kind: ContentKind,
        content_id: u64,
    ) -> PortResult<Vec<CommentContentLink>> {
        let rows = sqlx::query_as::<_, CitationRecord>(
            "SELECT * FROM comment_content_links WHERE content_kind = $1 AND content_id = $2 ORDER BY id",
        )
        .bind(kind.as_str())
        .bind(db_id(content_id))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err(format!("citations of {kind} {content_id}")))?;
        citations(rows)
    }

    async fn create_template(&self, template: NewTopicTemplate, now: DateTime<Utc>) -> PortResult<TopicTemplate> {
        sqlx::query_as::<_, TemplateRecord>(
            "INSERT INTO topic_templates (name, content_kind, title_template, body_template, is_active, \
                 created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) RETURNING *",
        )
        .bind(&template.name)
        .bind(template.content_kind.as_str())
        .bind(&template.title_template)
        .bind(&template.body_template)
        .bind(template.is_active)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(port_err(format!("template '{}'", template.name)))?
        .to_domain()
    }

    async fn list_templates(&self, kind: Option<ContentKind>, active_only: bool) -> PortResult<Vec<TopicTemplate>> {
        let rows = sqlx::query_as::<_, TemplateRecord>(
            "SELECT * FROM topic_templates \
             WHERE ($1::TEXT IS NULL OR content_kind = $1) AND (NOT $2 OR is_active) ORDER BY id",
        )
        .bind(kind.map(|k| k.as_str()))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(port_err("templates"))?;
        rows.into_iter().map(TemplateRecord::to_domain).collect()
    }

    async fn create_auto_topic(
        &self,
        topic: NewTopic,
        rich_text: RichTextBundle,
        link: NewContentLink,
    ) -> PortResult<Option<Topic>> {
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        let materialised: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM content_links \
             WHERE template_id = $1 AND content_kind = $2 AND content_id = $3)",
        )
        .bind(opt_id(link.template_id))
        .bind(link.content_kind.as_str())
        .bind(db_id(link.content_id))
        .fetch_one(&mut *tx)
        .await
        .map_err(port_err("content links"))?;
        if materialised {
            return Ok(None);
        }
        let now = topic.created_at;
        let created = insert_topic(&mut *tx, topic).await?;
        store_rich_text(&mut *tx, rich_text, created.target()).await?;
        let link = NewContentLink {
            topic_id: created.id,
            ..link
        };
        match insert_content_link(&mut *tx, &link, now).await {
            Ok(_) => {}
            // A concurrent run materialised the same template first.
            Err(PortError::Conflict(_)) => return Ok(None),
            Err(e) => return Err(e),
        }
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(Some(created))
    }

    async fn replace_recommendations(
        &self,
        kind: ContentKind,
        content_id: u64,
        recommendations: Vec<NewRecommendation>,
        now: DateTime<Utc>,
    ) -> PortResult<Vec<ContentDiscussionRecommendation>> {
        let what = format!("recommendations for {kind} {content_id}");
        let mut tx = self.pool.begin().await.map_err(port_err("transaction"))?;
        sqlx::query("DELETE FROM content_discussion_recommendations WHERE content_kind = $1 AND content_id = $2")
            .bind(kind.as_str())
            .bind(db_id(content_id))
            .execute(&mut *tx)
            .await
            .map_err(port_err(&what))?;
        let mut stored = Vec::with_capacity(recommendations.len());
        for recommendation in recommendations {
            let row = sqlx::query_as::<_, RecommendationRecord>(
                "INSERT INTO content_discussion_recommendations (content_kind, content_id, topic_id, \
                     recommendation_score, created_at) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING *",
            )
            .bind(kind.as_str())
            .bind(db_id(content_id))
            .bind(db_id(recommendation.topic_id))
            .bind(recommendation.recommendation_score.clamp(0.0, 1.0))
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(port_err(&what))?;
            stored.push(row.to_domain()?);
        }
        tx.commit().await.map_err(port_err("transaction"))?;
        Ok(stored)
    }

    async fn list_recommendations(
        &self,
        kind: ContentKind,
        content_id: u64,
    ) -> PortResult<Vec<ContentDiscussionRecommendation>> {
        let rows = sqlx::query_as::<_, RecommendationRecord>(
            "SELECT * FROM content_discussion_recommendations WHERE content_kind = $1 AND content_id = $2 \
             ORDER BY recommendation_score DESC, topic_id",
        )
        .bind(kind.as_str())
        .bind(db_id(content_id))
        .fetch_all(&self.pool)
        .await
        .map_err(port_err(format!("recommendations for {kind} {content_id}")))?;
        rows.into_iter().map(RecommendationRecord::to_domain).collect()
    }
}
