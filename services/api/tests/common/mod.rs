//! Shared harness for the integration suites: a forum wired to the in-memory
//! store, cache and collaborators, with a hand-driven clock.

#![allow(dead_code)]

use api_lib::adapters::{ManualClock, MemoryCache, MemoryStore, RecordingNotifier, StaticDirectory};
use chrono::{DateTime, Duration, TimeZone, Utc};
use forum_core::domain::{Category, NewCategory, Principal, TextFormat, Topic};
use forum_core::services::discussion::{CreateComment, CreateTopic};
use forum_core::{Forum, ForumSettings, Ports};
use std::sync::Arc;

pub const ADMIN: u64 = 1;
pub const MODERATOR: u64 = 2;
pub const ALICE: u64 = 10;
pub const BOB: u64 = 11;
pub const CAROL: u64 = 12;

pub struct Harness {
    pub forum: Forum,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub directory: Arc<StaticDirectory>,
    pub clock: Arc<ManualClock>,
}

/// 2024-03-04 08:00 UTC, a Monday.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap()
}

pub fn admin() -> Principal {
    Principal::admin(ADMIN)
}

pub fn moderator() -> Principal {
    Principal::moderator(MODERATOR)
}

pub fn member(user_id: u64) -> Principal {
    Principal::member(user_id)
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ForumSettings::default())
    }

    pub fn with_settings(settings: ForumSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let directory = Arc::new(StaticDirectory::new());
        let clock = Arc::new(ManualClock::new(start_time()));

        // Accounts old enough to clear any account-age rule.
        let joined = start_time() - Duration::days(400);
        for (id, handle) in [
            (ADMIN, "admin"),
            (MODERATOR, "mod"),
            (ALICE, "alice"),
            (BOB, "bob"),
            (CAROL, "carol"),
        ] {
            directory.add_user(id, handle, joined);
        }

        let ports = Ports {
            store: store.clone(),
            cache: Arc::new(MemoryCache::new()),
            notifier: notifier.clone(),
            content: directory.clone(),
            users: directory.clone(),
            attachments: directory.clone(),
            clock: clock.clone(),
        };
        Self {
            forum: Forum::new(ports, settings),
            store,
            notifier,
            directory,
            clock,
        }
    }

    pub async fn category(&self, slug: &str) -> Category {
        self.forum
            .discussion
            .create_category(
                &admin(),
                NewCategory {
                    name: slug.to_uppercase(),
                    slug: slug.to_string(),
                    description: String::new(),
                    parent_id: None,
                    sort_order: 0,
                },
            )
            .await
            .expect("category is created")
    }

    pub async fn topic(&self, author: u64, category_id: u64, title: &str, body: &str) -> Topic {
        self.forum
            .discussion
            .create_topic(&member(author), topic_request(category_id, title, body))
            .await
            .expect("topic is created")
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(Duration::minutes(minutes));
    }
}

pub fn topic_request(category_id: u64, title: &str, body: &str) -> CreateTopic {
    CreateTopic {
        category_id,
        title: title.to_string(),
        body: body.to_string(),
        format: TextFormat::Markdown,
        tag_ids: Vec::new(),
        book_id: None,
        chapter_id: None,
        section_id: None,
    }
}

pub fn comment_request(body: &str, parent_comment_id: Option<u64>) -> CreateComment {
    CreateComment {
        body: body.to_string(),
        format: TextFormat::Markdown,
        parent_comment_id,
    }
}
