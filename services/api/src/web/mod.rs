//! services/api/src/web/mod.rs
//!
//! The HTTP surface: routing, authentication, error mapping and the OpenAPI
//! document.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod rest;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use self::handlers::{
    categories, comments, content, health, moderation, reactions, reports, rich_text, subscriptions, tags, topics,
};
use self::middleware::authenticate;
use self::rest::ApiDoc;
use self::state::AppState;

/// JSON bodies may carry inline data-URL images.
const MAX_REQUEST_BYTES: usize = 10 * 1024 * 1024;

/// Builds the complete application: API routes behind authentication, plus
/// the health check and Swagger UI.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // Categories
        .route("/categories", get(categories::list_categories).post(categories::create_category))
        .route("/categories/{id}", get(categories::get_category).patch(categories::update_category))
        .route(
            "/categories/{id}/config",
            get(categories::get_category_config).put(categories::put_category_config),
        )
        .route(
            "/categories/{id}/moderators",
            get(categories::list_category_moderators).post(categories::add_category_moderator),
        )
        .route(
            "/categories/{id}/moderators/{userId}",
            delete(categories::remove_category_moderator),
        )
        // Topics
        .route("/topics", get(topics::list_topics).post(topics::create_topic))
        .route(
            "/topics/{id}",
            get(topics::get_topic).patch(topics::update_topic).delete(topics::delete_topic),
        )
        .route("/topics/{id}/pin", post(topics::pin_topic))
        .route("/topics/{id}/unpin", post(topics::unpin_topic))
        .route("/topics/{id}/lock", post(topics::lock_topic))
        .route("/topics/{id}/unlock", post(topics::unlock_topic))
        .route("/topics/{id}/views", post(topics::record_view))
        .route("/topics/{id}/tags/{tagId}", post(topics::attach_tag).delete(topics::detach_tag))
        .route("/topics/{id}/content", get(content::content_for_topic))
        // Comments and citations
        .route("/topics/{id}/comments", get(comments::list_comments).post(comments::create_comment))
        .route(
            "/comments/{id}",
            get(comments::get_comment).patch(comments::edit_comment).delete(comments::delete_comment),
        )
        .route(
            "/comments/{id}/citations",
            get(comments::list_citations).post(comments::create_citation),
        )
        .route("/citations/{id}", delete(comments::delete_citation))
        // Reactions and tags
        .route("/reactions", post(reactions::add_reaction).delete(reactions::remove_reaction))
        .route("/reactions/summary", get(reactions::reaction_summary))
        .route("/tags", get(tags::list_tags).post(tags::create_tag))
        .route("/tags/{id}", patch(tags::update_tag).delete(tags::delete_tag))
        // Book content
        .route("/content-links", post(content::create_link))
        .route("/content-links/{id}", delete(content::delete_link))
        .route("/content-links/{id}/highlight", post(content::highlight_link))
        .route("/content/{kind}/{id}/topics", get(content::topics_for_content))
        .route("/content/{kind}/{id}/citations", get(content::citations_for_content))
        .route("/content/{kind}/{id}/generate-topics", post(content::generate_topics))
        .route(
            "/content/{kind}/{id}/recommendations",
            get(content::list_recommendations).post(content::generate_recommendations),
        )
        .route("/topic-templates", get(content::list_templates).post(content::create_template))
        .route("/rich-text/{targetKind}/{targetId}", get(rich_text::get_rich_text))
        // Reports
        .route("/reports", get(reports::list_reports).post(reports::create_report))
        .route("/reports/stats", get(reports::report_stats))
        .route("/reports/{id}", get(reports::get_report))
        .route("/reports/{id}/assign", post(reports::assign_report))
        .route("/reports/{id}/resolve", post(reports::resolve_report))
        .route("/reports/{id}/reject", post(reports::reject_report))
        .route("/reports/{id}/evidence", get(reports::list_evidence).post(reports::add_evidence))
        .route(
            "/reports/{id}/comments",
            get(reports::list_report_comments).post(reports::add_report_comment),
        )
        .route("/reports/{id}/log", get(reports::report_log))
        // Moderation
        .route("/moderation/queue", get(moderation::list_queue))
        .route("/moderation/queue/claim-next", post(moderation::claim_next))
        .route("/moderation/queue/{id}", get(moderation::get_queue_item))
        .route("/moderation/queue/{id}/claim", post(moderation::claim_item))
        .route("/moderation/queue/{id}/assign", post(moderation::assign_item))
        .route("/moderation/queue/{id}/decide", post(moderation::decide_item))
        .route("/moderation/rules", get(moderation::list_rules).post(moderation::create_rule))
        .route(
            "/moderation/rules/{id}",
            patch(moderation::update_rule).delete(moderation::delete_rule),
        )
        .route("/moderation/words", get(moderation::list_words).post(moderation::create_word))
        .route("/moderation/words/{id}", delete(moderation::delete_word))
        .route("/moderation/filter/test", post(moderation::test_filter))
        .route("/moderation/filter/results", get(moderation::filter_results))
        .route("/moderation/trust/{userId}", get(moderation::get_trust))
        .route("/moderation/trust/{userId}/adjust", post(moderation::adjust_trust))
        .route(
            "/moderation/users/{userId}/actions",
            get(moderation::list_actions).post(moderation::apply_action),
        )
        .route("/moderation/actions/{id}/revoke", post(moderation::revoke_action))
        .route("/moderation/grants/{userId}", get(moderation::get_grant).put(moderation::put_grant))
        // Subscriptions
        .route("/subscriptions", get(subscriptions::list_subscriptions).post(subscriptions::subscribe))
        .route(
            "/subscriptions/preferences",
            get(subscriptions::get_preferences).put(subscriptions::put_preferences),
        )
        .route("/subscriptions/digests", get(subscriptions::list_digests))
        .route(
            "/subscriptions/{id}",
            patch(subscriptions::update_subscription).delete(subscriptions::unsubscribe),
        )
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .merge(api)
        .route("/health", get(health::health_check))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(state.config.cors_origin.as_deref()))
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

/// A configured origin gets a credentialed CORS policy; otherwise any origin
/// is allowed.
fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let Some(origin) = origin else {
        return CorsLayer::permissive();
    };
    match origin.parse::<HeaderValue>() {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_credentials(true)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]),
        Err(_) => {
            warn!(origin, "CORS_ORIGIN is not a valid header value; allowing any origin");
            CorsLayer::permissive()
        }
    }
}
