//! Drives the axum router directly, without a listener.

mod common;

use api_lib::adapters::JwtAuthenticator;
use api_lib::config::Config;
use api_lib::web::{self, state::AppState};
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::*;
use forum_core::domain::Principal;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "integration-test-secret";

struct TestApp {
    router: Router,
    auth: Arc<JwtAuthenticator>,
    harness: Harness,
}

impl TestApp {
    fn new() -> Self {
        let config = Config::from_lookup(|name| match name {
            "STORE_BACKEND" => Some("memory".to_string()),
            "JWT_SECRET" => Some(SECRET.to_string()),
            _ => None,
        })
        .expect("test configuration is valid");
        let harness = Harness::new();
        let auth = Arc::new(JwtAuthenticator::new(SECRET));
        let state = Arc::new(AppState {
            forum: harness.forum.clone(),
            auth: auth.clone(),
            config: Arc::new(config),
        });
        Self {
            router: web::router(state),
            auth,
            harness,
        }
    }

    fn token(&self, principal: Principal) -> String {
        self.auth.issue_for_an_hour(principal).expect("token is signed")
    }

    async fn send(&self, method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

#[tokio::test]
async fn health_reports_a_running_service() {
    let app = TestApp::new();
    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn guests_cannot_post_topics() {
    let app = TestApp::new();
    let category = app.harness.category("general").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/topics",
            None,
            Some(json!({ "categoryId": category.id, "title": "Hi", "body": "Anyone here?" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");
}

#[tokio::test]
async fn invalid_bearer_tokens_are_rejected() {
    let app = TestApp::new();
    let (status, body) = app.send(Method::GET, "/categories", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");
}

#[tokio::test]
async fn members_create_and_read_topics() {
    let app = TestApp::new();
    let category = app.harness.category("general").await;
    let token = app.token(member(ALICE));

    let (status, created) = app
        .send(
            Method::POST,
            "/topics",
            Some(&token),
            Some(json!({
                "categoryId": category.id,
                "title": "First impressions",
                "body": "The **prologue** hooked me"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["title"], "First impressions");
    assert_eq!(created["authorId"], ALICE);

    let id = created["id"].as_u64().unwrap();
    let (status, read) = app.send(Method::GET, &format!("/topics/{id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["id"], id);

    let (status, rich) = app
        .send(Method::GET, &format!("/rich-text/topic/{id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(rich.to_string().contains("<strong>prologue</strong>"));
}

#[tokio::test]
async fn validation_failures_use_the_error_envelope() {
    let app = TestApp::new();
    let category = app.harness.category("general").await;
    let token = app.token(member(ALICE));

    let (status, body) = app
        .send(
            Method::POST,
            "/topics",
            Some(&token),
            Some(json!({ "categoryId": category.id, "title": "   ", "body": "text" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");
    assert!(body["message"].as_str().unwrap().contains("title"));

    let (status, body) = app
        .send(Method::POST, "/topics", Some(&token), Some(json!({ "title": 7 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");
}

#[tokio::test]
async fn locked_topics_answer_conflict() {
    let app = TestApp::new();
    let category = app.harness.category("general").await;
    let topic = app.harness.topic(ALICE, category.id, "Spoilers", "Ending talk").await;

    let (status, _) = app
        .send(
            Method::POST,
            &format!("/topics/{}/lock", topic.id),
            Some(&app.token(moderator())),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/topics/{}/comments", topic.id),
            Some(&app.token(member(BOB))),
            Some(json!({ "body": "too late?" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "topicLocked");
}

#[tokio::test]
async fn deleting_a_comment_answers_no_content() {
    let app = TestApp::new();
    let category = app.harness.category("general").await;
    let topic = app.harness.topic(ALICE, category.id, "Audiobooks", "Best narrator?").await;
    let token = app.token(member(BOB));

    let (status, comment) = app
        .send(
            Method::POST,
            &format!("/topics/{}/comments", topic.id),
            Some(&token),
            Some(json!({ "body": "The second one" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = comment["id"].as_u64().unwrap();

    let (status, body) = app
        .send(Method::DELETE, &format!("/comments/{id}"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = app.send(Method::GET, &format!("/comments/{id}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_review_queue_claims_nothing() {
    let app = TestApp::new();
    let (status, body) = app
        .send(
            Method::POST,
            "/moderation/queue/claim-next",
            Some(&app.token(moderator())),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
}
