//! Invariants of the discussion core, exercised against the in-memory backend.

mod common;

use chrono::Duration;
use common::*;
use forum_core::domain::{
    CategoryPatch, ContentKind, ContentMetadata, DeletionPolicy, NewProhibitedWord, NewTopicTemplate, PageRequest,
    QueueDecision, QueueStatus, ReactionKind, ReactionOutcome, ReportCategory, ReportLogAction, ReportStatus,
    ResolutionType, TargetRef, TrustLevel, WordAction,
};
use forum_core::services::discussion::{CategoryConfigInput, EditComment};
use forum_core::services::moderation::DecideRequest;
use forum_core::services::reports::{CreateReport, ResolveReport};
use forum_core::{ErrorKind, ForumError, ForumSettings};

#[tokio::test]
async fn topic_reads_back_as_written() {
    let h = Harness::new();
    let category = h.category("general").await;
    let created = h.topic(ALICE, category.id, "Chapter one pacing", "Does the opening *drag*?").await;

    let read = h.forum.discussion.get_topic(&member(BOB), created.id).await.unwrap();
    assert_eq!(read.title, "Chapter one pacing");
    assert_eq!(read.body, "Does the opening *drag*?");
    assert_eq!(read.author_id, ALICE);
    assert_eq!(read.category_id, category.id);
    assert!(read.is_approved);
    assert!(!read.is_locked);
    assert!(read.created_at <= read.updated_at);
    assert_eq!(read.created_at, created.created_at);
}

#[tokio::test]
async fn locked_topic_refuses_member_comments() {
    let h = Harness::new();
    let category = h.category("general").await;
    let topic = h.topic(ALICE, category.id, "Ending", "Thoughts on the ending?").await;

    h.forum.discussion.lock_topic(&moderator(), topic.id, true).await.unwrap();

    let err = h
        .forum
        .discussion
        .create_comment(&member(BOB), topic.id, comment_request("Loved it", None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TopicLocked);

    // Moderators may still post.
    h.forum
        .discussion
        .create_comment(&moderator(), topic.id, comment_request("Locked for spoilers", None))
        .await
        .unwrap();
}

#[tokio::test]
async fn adding_the_same_reaction_twice_counts_once() {
    let h = Harness::new();
    let category = h.category("general").await;
    let topic = h.topic(ALICE, category.id, "Favourite quote", "Share yours").await;
    let target = TargetRef::topic(topic.id);

    let first = h
        .forum
        .discussion
        .add_reaction(&member(BOB), target, ReactionKind::Like)
        .await
        .unwrap();
    let second = h
        .forum
        .discussion
        .add_reaction(&member(BOB), target, ReactionKind::Like)
        .await
        .unwrap();
    assert_eq!(first, ReactionOutcome::Added);
    assert_eq!(second, ReactionOutcome::AlreadyPresent);

    let summary = h.forum.discussion.reaction_summary(&member(CAROL), target).await.unwrap();
    let likes = summary
        .counts
        .iter()
        .find(|c| c.kind == ReactionKind::Like)
        .map(|c| c.count);
    assert_eq!(likes, Some(1));
    assert_eq!(summary.total, 1);
}

#[tokio::test]
async fn removing_an_absent_reaction_succeeds() {
    let h = Harness::new();
    let category = h.category("general").await;
    let topic = h.topic(ALICE, category.id, "Glossary", "Unknown words").await;

    h.forum
        .discussion
        .remove_reaction(&member(BOB), TargetRef::topic(topic.id), ReactionKind::Love)
        .await
        .unwrap();
    let summary = h
        .forum
        .discussion
        .reaction_summary(&member(BOB), TargetRef::topic(topic.id))
        .await
        .unwrap();
    assert_eq!(summary.total, 0);
}

#[tokio::test]
async fn content_removal_hides_the_topic_and_logs_one_resolution() {
    let h = Harness::new();
    let category = h.category("general").await;
    let topic = h.topic(ALICE, category.id, "Buy cheap pills", "Visit my shop").await;

    let report = h
        .forum
        .reports
        .create(
            &member(BOB),
            CreateReport {
                target: TargetRef::topic(topic.id),
                category: ReportCategory::Spam,
                reason: "advertising".to_string(),
                additional_info: String::new(),
            },
        )
        .await
        .unwrap();
    let resolved = h
        .forum
        .reports
        .resolve(
            &moderator(),
            report.id,
            ResolveReport {
                resolution: ResolutionType::ContentRemoved,
                notes: "spam".to_string(),
                edited_body: None,
                duration_hours: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, ReportStatus::Resolved);
    assert_eq!(resolved.resolution, Some(ResolutionType::ContentRemoved));

    let removed = h.forum.discussion.get_topic(&admin(), topic.id).await.unwrap();
    assert!(!removed.is_approved);
    assert!(removed.deleted_at.is_some());

    let log = h.forum.reports.log(&moderator(), report.id).await.unwrap();
    let resolutions: Vec<_> = log.iter().filter(|e| e.action == ReportLogAction::Resolved).collect();
    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0].details["resolution"], "contentRemoved");
}

#[tokio::test]
async fn dispatching_twice_sends_each_digest_once() {
    let h = Harness::new();
    let category = h.category("books").await;
    subscribe_daily(&h, CAROL, category.id).await;

    h.advance_minutes(10);
    h.topic(ALICE, category.id, "New release", "Out today").await;
    h.advance_minutes(60);

    let created = h
        .forum
        .subscriptions
        .generate_digests(forum_core::domain::Frequency::Daily, 1, 0)
        .await
        .unwrap();
    assert_eq!(created, 1);

    let first = h.forum.subscriptions.process_pending_digests(10).await.unwrap();
    let second = h.forum.subscriptions.process_pending_digests(10).await.unwrap();
    assert_eq!(first.sent, 1);
    assert_eq!(second.sent, 0);
    assert_eq!(second.failed, 0);

    let digests = h
        .forum
        .subscriptions
        .digests(&member(CAROL), Default::default())
        .await
        .unwrap();
    assert_eq!(digests.items.len(), 1);
    assert!(digests.items[0].sent_at.is_some());
}

#[tokio::test]
async fn generated_topics_are_created_once_per_template() {
    let mut settings = ForumSettings::default();
    settings.auto_topic_category_id = Some(1);
    let h = Harness::with_settings(settings);
    let category = h.category("reading-guide").await;
    assert_eq!(category.id, 1);

    for name in ["Summary", "Questions"] {
        h.forum
            .content_links
            .create_template(
                &admin(),
                NewTopicTemplate {
                    name: name.to_string(),
                    content_kind: ContentKind::Chapter,
                    title_template: format!("{name}: {{title}}"),
                    body_template: "Discuss {title}.".to_string(),
                    is_active: true,
                },
            )
            .await
            .unwrap();
    }
    h.directory.add_content(
        ContentKind::Chapter,
        7,
        ContentMetadata {
            title: "The Storm".to_string(),
            summary: String::new(),
            owner_id: ALICE,
            tags: Vec::new(),
        },
    );

    for _ in 0..3 {
        h.forum
            .content_links
            .generate_topics_for_content(&moderator(), ContentKind::Chapter, 7)
            .await
            .unwrap();
        let linked = h
            .forum
            .content_links
            .topics_for_content(ContentKind::Chapter, 7)
            .await
            .unwrap();
        assert_eq!(linked.len(), 2);
    }
}

#[tokio::test]
async fn auto_replaced_words_are_persisted_and_recorded() {
    let h = Harness::new();
    let category = h.category("general").await;
    let word = h
        .forum
        .filter
        .create_word(
            &admin(),
            NewProhibitedWord {
                word: "darn".to_string(),
                is_regex: false,
                severity: 1,
                action: WordAction::Warn,
                replacement: Some("d**n".to_string()),
                is_auto_replace: true,
            },
        )
        .await
        .unwrap();
    let topic = h.topic(ALICE, category.id, "Plot holes", "Spot them").await;

    let comment = h
        .forum
        .discussion
        .create_comment(&member(BOB), topic.id, comment_request("darn it, DARN the twist", None))
        .await
        .unwrap();
    assert_eq!(comment.body, "d**n it, d**n the twist");

    let results = h
        .forum
        .filter
        .results_for(&moderator(), TargetRef::comment(comment.id))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].triggered_word_ids, vec![word.id]);
    assert_eq!(results[0].cleaned_body.as_deref(), Some("d**n it, d**n the twist"));
}

#[tokio::test]
async fn rejections_never_raise_trust() {
    let h = Harness::new();
    let mut previous = h.forum.trust.recalculate(BOB).await.unwrap();
    for _ in 0..6 {
        let next = h.forum.trust.record_rejection(BOB).await.unwrap();
        assert!(next.score <= previous.score, "{} > {}", next.score, previous.score);
        assert!(next.level <= previous.level);
        previous = next;
    }
    assert_eq!(previous.content_rejections, 6);
}

#[tokio::test]
async fn concurrent_views_by_one_user_count_once() {
    let h = Harness::new();
    let category = h.category("general").await;
    let topic = h.topic(ALICE, category.id, "Audiobook narrators", "Who reads best?").await;
    let before = h.forum.discussion.get_topic(&member(BOB), topic.id).await.unwrap().view_count;

    let viewer = member(BOB);
    let views = (0..16).map(|_| h.forum.discussion.record_view(&viewer, topic.id));
    for outcome in futures::future::join_all(views).await {
        outcome.unwrap();
    }

    let after = h.forum.discussion.get_topic(&member(BOB), topic.id).await.unwrap().view_count;
    assert_eq!(after, before + 1);
}

#[tokio::test]
async fn queue_decisions_publish_or_remove_flagged_topics() {
    let h = Harness::new();
    let category = h.category("general").await;
    h.forum
        .filter
        .create_word(
            &admin(),
            NewProhibitedWord {
                word: "spoiler".to_string(),
                is_regex: false,
                severity: 2,
                action: WordAction::Flag,
                replacement: None,
                is_auto_replace: false,
            },
        )
        .await
        .unwrap();

    let kept = h.topic(ALICE, category.id, "Book two", "spoiler: the twist works").await;
    let dropped = h.topic(ALICE, category.id, "Book three", "another spoiler here").await;
    assert!(!kept.is_approved && kept.is_flagged);

    let pending = h
        .forum
        .moderation
        .list(&moderator(), Some(QueueStatus::Pending), PageRequest::default())
        .await
        .unwrap();
    let item_for = |topic_id: u64| {
        pending
            .items
            .iter()
            .find(|item| item.target == TargetRef::topic(topic_id))
            .map(|item| item.id)
            .expect("flagged topic is queued")
    };
    let (kept_item, dropped_item) = (item_for(kept.id), item_for(dropped.id));

    for (id, decision) in [(kept_item, QueueDecision::Approve), (dropped_item, QueueDecision::Reject)] {
        h.forum.moderation.claim(&moderator(), id).await.unwrap();
        h.forum
            .moderation
            .decide(
                &moderator(),
                id,
                DecideRequest {
                    decision,
                    notes: String::new(),
                    user_action: None,
                },
            )
            .await
            .unwrap();
    }

    let published = h.forum.discussion.get_topic(&member(BOB), kept.id).await.unwrap();
    assert!(published.is_approved);
    assert!(!published.is_flagged);

    let removed = h.forum.discussion.get_topic(&admin(), dropped.id).await.unwrap();
    assert!(!removed.is_approved);
    assert!(removed.deleted_at.is_some());
    assert_eq!(h.forum.trust.score(ALICE).await.unwrap().content_rejections, 1);
}

#[tokio::test]
async fn hourly_comment_limit_answers_rate_limited() {
    let h = Harness::new();
    let category = h.category("general").await;
    h.forum
        .discussion
        .set_category_config(
            &admin(),
            category.id,
            CategoryConfigInput {
                max_comments_per_hour: Some(2),
                ..open_config()
            },
        )
        .await
        .unwrap();
    let topic = h.topic(ALICE, category.id, "Translations", "Which one reads best?").await;

    for body in ["The older one", "Also the newer one"] {
        h.forum
            .discussion
            .create_comment(&member(BOB), topic.id, comment_request(body, None))
            .await
            .unwrap();
    }
    let err = h
        .forum
        .discussion
        .create_comment(&member(BOB), topic.id, comment_request("One more thing", None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);
    assert!(matches!(err, ForumError::RateLimited { retry_after_secs, .. } if retry_after_secs > 0));
    assert!(err.details().unwrap()["retryAfterSecs"].as_u64().unwrap() > 0);

    // The limit is per user, and moderators are exempt.
    h.forum
        .discussion
        .create_comment(&member(CAROL), topic.id, comment_request("My turn", None))
        .await
        .unwrap();
    for _ in 0..3 {
        h.forum
            .discussion
            .create_comment(&moderator(), topic.id, comment_request("Please keep it civil", None))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn edits_are_marked_and_bounded_by_the_window() {
    let h = Harness::new();
    let category = h.category("general").await;
    h.forum
        .discussion
        .set_category_config(
            &admin(),
            category.id,
            CategoryConfigInput {
                edit_window_minutes: Some(15),
                ..open_config()
            },
        )
        .await
        .unwrap();
    let topic = h.topic(ALICE, category.id, "Maps", "Is there a map of the city?").await;
    let comment = h
        .forum
        .discussion
        .create_comment(&member(BOB), topic.id, comment_request("Page 2", None))
        .await
        .unwrap();
    assert!(!comment.is_edited);

    h.advance_minutes(5);
    let edited = h
        .forum
        .discussion
        .edit_comment(&member(BOB), comment.id, edit_request("Page 3, actually"))
        .await
        .unwrap();
    assert!(edited.is_edited);
    assert_eq!(edited.edited_at, Some(start_time() + Duration::minutes(5)));
    assert_eq!(edited.body, "Page 3, actually");

    h.advance_minutes(20);
    let err = h
        .forum
        .discussion
        .edit_comment(&member(BOB), comment.id, edit_request("Page 4"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let moderated = h
        .forum
        .discussion
        .edit_comment(&moderator(), comment.id, edit_request("Page 3 (map on the endpaper)"))
        .await
        .unwrap();
    assert_eq!(moderated.edited_at, Some(start_time() + Duration::minutes(25)));
}

#[tokio::test]
async fn category_cannot_become_its_own_ancestor() {
    let h = Harness::new();
    let fiction = h.category("fiction").await;
    let fantasy = h.category("fantasy").await;

    let nested = h
        .forum
        .discussion
        .update_category(&admin(), fantasy.id, reparent(fiction.id))
        .await
        .unwrap();
    assert_eq!(nested.parent_id, Some(fiction.id));

    for (id, parent) in [(fiction.id, fantasy.id), (fiction.id, fiction.id)] {
        let err = h
            .forum
            .discussion
            .update_category(&admin(), id, reparent(parent))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    let unchanged = h.forum.discussion.get_category(&admin(), fiction.id).await.unwrap();
    assert_eq!(unchanged.parent_id, None);
}

#[tokio::test]
async fn reaction_burst_refreshes_the_author_score() {
    let mut settings = ForumSettings::default();
    settings.trust.burst_reactions = 3;
    let h = Harness::with_settings(settings);
    let category = h.category("general").await;
    let topic = h.topic(ALICE, category.id, "Cover art", "The new edition cover").await;
    let before = h.forum.trust.score(ALICE).await.unwrap();

    for fan in 20..=23 {
        h.forum
            .discussion
            .add_reaction(&member(fan), TargetRef::topic(topic.id), ReactionKind::Like)
            .await
            .unwrap();
        if fan == 22 {
            let within_limit = h.forum.trust.score(ALICE).await.unwrap();
            assert_eq!(within_limit.community_score, before.community_score);
        }
    }
    let refreshed = h.forum.trust.score(ALICE).await.unwrap();
    assert!(refreshed.community_score > before.community_score);
    assert!(refreshed.level >= before.level);
}

fn open_config() -> CategoryConfigInput {
    CategoryConfigInput {
        is_restricted: false,
        require_approval: false,
        min_account_age_hours: 0,
        min_trust_level: TrustLevel::NewUser,
        max_topics_per_hour: None,
        max_comments_per_hour: None,
        edit_window_minutes: None,
        deletion_policy: DeletionPolicy::DetachWithTombstone,
        auto_moderation: true,
    }
}

fn edit_request(body: &str) -> EditComment {
    EditComment {
        body: body.to_string(),
        format: forum_core::domain::TextFormat::Markdown,
    }
}

fn reparent(parent_id: u64) -> CategoryPatch {
    CategoryPatch {
        parent_id: Some(Some(parent_id)),
        ..Default::default()
    }
}

async fn subscribe_daily(h: &Harness, user_id: u64, category_id: u64) {
    use forum_core::domain::{Frequency, SubjectKind, SubscriptionPreferencePatch};
    use forum_core::services::subscriptions::SubscribeRequest;

    h.forum
        .subscriptions
        .update_preferences(
            &member(user_id),
            SubscriptionPreferencePatch {
                digest_hour: Some(9),
                utc_offset_minutes: Some(0),
                in_app_enabled: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.forum
        .subscriptions
        .subscribe(
            &member(user_id),
            SubscribeRequest {
                subject_kind: SubjectKind::Category,
                subject_id: category_id,
                frequency: Some(Frequency::Daily),
                channels: None,
            },
        )
        .await
        .unwrap();
}
