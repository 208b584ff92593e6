//! services/api/src/web/rest.rs
//!
//! The master definition of the OpenAPI document.

use utoipa::OpenApi;

use crate::web::error::ApiErrorResponse;
use crate::web::handlers::{
    categories, comments, content, health, moderation, reactions, reports, rich_text, subscriptions, tags, topics,
};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        categories::list_categories,
        categories::create_category,
        categories::get_category,
        categories::update_category,
        categories::get_category_config,
        categories::put_category_config,
        categories::list_category_moderators,
        categories::add_category_moderator,
        categories::remove_category_moderator,
        topics::list_topics,
        topics::create_topic,
        topics::get_topic,
        topics::update_topic,
        topics::delete_topic,
        topics::pin_topic,
        topics::unpin_topic,
        topics::lock_topic,
        topics::unlock_topic,
        topics::record_view,
        topics::attach_tag,
        topics::detach_tag,
        comments::list_comments,
        comments::create_comment,
        comments::get_comment,
        comments::edit_comment,
        comments::delete_comment,
        comments::create_citation,
        comments::list_citations,
        comments::delete_citation,
        reactions::add_reaction,
        reactions::remove_reaction,
        reactions::reaction_summary,
        tags::list_tags,
        tags::create_tag,
        tags::update_tag,
        tags::delete_tag,
        content::create_link,
        content::delete_link,
        content::highlight_link,
        content::topics_for_content,
        content::citations_for_content,
        content::content_for_topic,
        content::list_templates,
        content::create_template,
        content::generate_topics,
        content::generate_recommendations,
        content::list_recommendations,
        rich_text::get_rich_text,
        reports::create_report,
        reports::list_reports,
        reports::report_stats,
        reports::get_report,
        reports::assign_report,
        reports::resolve_report,
        reports::reject_report,
        reports::add_evidence,
        reports::list_evidence,
        reports::add_report_comment,
        reports::list_report_comments,
        reports::report_log,
        moderation::list_queue,
        moderation::get_queue_item,
        moderation::claim_item,
        moderation::claim_next,
        moderation::assign_item,
        moderation::decide_item,
        moderation::list_rules,
        moderation::create_rule,
        moderation::update_rule,
        moderation::delete_rule,
        moderation::list_words,
        moderation::create_word,
        moderation::delete_word,
        moderation::test_filter,
        moderation::filter_results,
        moderation::get_trust,
        moderation::adjust_trust,
        moderation::apply_action,
        moderation::list_actions,
        moderation::revoke_action,
        moderation::get_grant,
        moderation::put_grant,
        subscriptions::subscribe,
        subscriptions::list_subscriptions,
        subscriptions::update_subscription,
        subscriptions::unsubscribe,
        subscriptions::get_preferences,
        subscriptions::put_preferences,
        subscriptions::list_digests,
    ),
    components(
        schemas(
            ApiErrorResponse,
            categories::CreateCategoryRequest,
            categories::UpdateCategoryRequest,
            categories::CategoryConfigRequest,
            categories::AddModeratorRequest,
            topics::CreateTopicRequest,
            topics::UpdateTopicRequest,
            topics::ViewCountResponse,
            comments::CreateCommentRequest,
            comments::EditCommentRequest,
            comments::CitationRequest,
            reactions::ReactionRequest,
            reactions::ReactionResponse,
            tags::CreateTagRequest,
            tags::UpdateTagRequest,
            content::CreateLinkRequest,
            content::HighlightRequest,
            content::CreateTemplateRequest,
            content::GeneratedTopicsResponse,
            reports::CreateReportRequest,
            reports::AssignReportRequest,
            reports::ResolveReportRequest,
            reports::RejectReportRequest,
            reports::EvidenceRequest,
            reports::ReportCommentRequest,
            moderation::AssignQueueRequest,
            moderation::UserActionBody,
            moderation::DecideBody,
            moderation::CreateRuleRequest,
            moderation::UpdateRuleRequest,
            moderation::CreateWordRequest,
            moderation::FilterTestRequest,
            moderation::TrustAdjustRequest,
            moderation::GrantBody,
            subscriptions::SubscribeBody,
            subscriptions::UpdateSubscriptionBody,
            subscriptions::PreferencesBody,
        )
    ),
    tags(
        (name = "categories", description = "Category tree, configuration and moderators."),
        (name = "topics", description = "Topics, pinning, locking, views and tags."),
        (name = "comments", description = "Threaded comments and their citations."),
        (name = "reactions", description = "Reactions on topics and comments."),
        (name = "tags", description = "Tag administration."),
        (name = "content", description = "Links between discussions and book content."),
        (name = "discussion", description = "Processed rich text."),
        (name = "reports", description = "User reports and their resolution."),
        (name = "moderation", description = "Review queue, filter rules, trust and sanctions."),
        (name = "subscriptions", description = "Subscriptions, preferences and digests."),
        (name = "health", description = "Liveness of the service and its store.")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route_group() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/topics/{id}",
            "/comments/{id}/citations",
            "/reports/{id}/resolve",
            "/moderation/queue/claim-next",
            "/subscriptions/preferences",
            "/rich-text/{targetKind}/{targetId}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let components = doc.components.expect("components");
        assert!(components.schemas.contains_key("ApiErrorResponse"));
    }
}
