//! End-to-end flows through several components at once.

mod common;

use chrono::Duration;
use common::*;
use forum_core::domain::{
    ContentKind, ContentMetadata, DigestStatus, FilterAction, Frequency, NewProhibitedWord, NewTopicTemplate,
    PageRequest, ReportCategory, ReportLogAction, ReportStatus, ResolutionType, SubjectKind,
    SubscriptionPreferencePatch, TargetRef, WordAction,
};
use forum_core::services::reports::{CreateReport, ResolveReport};
use forum_core::services::subscriptions::SubscribeRequest;
use forum_core::{ErrorKind, ForumSettings};

#[tokio::test]
async fn threaded_reply_updates_topic_activity() {
    let h = Harness::new();
    let category = h.category("general").await;
    let topic = h.topic(ALICE, category.id, "Who is the narrator?", "I have a theory").await;

    h.advance_minutes(5);
    let first = h
        .forum
        .discussion
        .create_comment(&member(BOB), topic.id, comment_request("It is the brother", None))
        .await
        .unwrap();
    h.advance_minutes(5);
    let reply = h
        .forum
        .discussion
        .create_comment(&member(ALICE), topic.id, comment_request("Agreed, see chapter 3", Some(first.id)))
        .await
        .unwrap();

    let listed = h
        .forum
        .discussion
        .list_comments(&member(CAROL), topic.id, PageRequest::default())
        .await
        .unwrap();
    let ids: Vec<u64> = listed.items.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![first.id, reply.id]);
    assert_eq!(reply.parent_comment_id, Some(first.id));

    let topic = h.forum.discussion.get_topic(&member(CAROL), topic.id).await.unwrap();
    assert_eq!(topic.last_activity_at, reply.created_at);
    assert_eq!(topic.comment_count, 2);
}

#[tokio::test]
async fn lock_stops_replies() {
    let h = Harness::new();
    let category = h.category("general").await;
    let topic = h.topic(ALICE, category.id, "Sequel rumours", "Anyone heard anything?").await;

    let locked = h.forum.discussion.lock_topic(&moderator(), topic.id, true).await.unwrap();
    assert!(locked.is_locked);

    let err = h
        .forum
        .discussion
        .create_comment(&member(BOB), topic.id, comment_request("Next spring!", None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TopicLocked);
}

#[tokio::test]
async fn prohibited_word_is_replaced_before_publishing() {
    let h = Harness::new();
    let category = h.category("general").await;
    let word = h
        .forum
        .filter
        .create_word(
            &admin(),
            NewProhibitedWord {
                word: "badword".to_string(),
                is_regex: false,
                severity: 2,
                action: WordAction::Warn,
                replacement: Some("****".to_string()),
                is_auto_replace: true,
            },
        )
        .await
        .unwrap();

    let topic = h.topic(ALICE, category.id, "Greetings", "hello badword").await;
    assert_eq!(topic.body, "hello ****");
    assert!(topic.is_approved);

    let results = h
        .forum
        .filter
        .results_for(&moderator(), TargetRef::topic(topic.id))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].action, FilterAction::AutoFilter);
    assert_eq!(results[0].triggered_word_ids, vec![word.id]);
    assert_eq!(results[0].raw_body, "hello badword");
}

#[tokio::test]
async fn report_leads_to_comment_removal() {
    let h = Harness::new();
    let category = h.category("general").await;
    let topic = h.topic(ALICE, category.id, "Book club night", "Friday at eight").await;
    let comment = h
        .forum
        .discussion
        .create_comment(&member(BOB), topic.id, comment_request("Nobody wants you there", None))
        .await
        .unwrap();

    let report = h
        .forum
        .reports
        .create(
            &member(CAROL),
            CreateReport {
                target: TargetRef::comment(comment.id),
                category: ReportCategory::Harassment,
                reason: "targets another member".to_string(),
                additional_info: String::new(),
            },
        )
        .await
        .unwrap();
    assert_eq!(report.status, ReportStatus::Pending);

    let resolved = h
        .forum
        .reports
        .resolve(
            &moderator(),
            report.id,
            ResolveReport {
                resolution: ResolutionType::ContentRemoved,
                notes: "harassment".to_string(),
                edited_body: None,
                duration_hours: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, ReportStatus::Resolved);
    assert_eq!(resolved.resolved_by, Some(MODERATOR));

    let removed = h.forum.discussion.get_comment(&admin(), comment.id).await.unwrap();
    assert!(!removed.is_approved);
    assert!(removed.deleted_at.is_some());

    let actions: Vec<ReportLogAction> = h
        .forum
        .reports
        .log(&moderator(), report.id)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    for expected in [ReportLogAction::Created, ReportLogAction::Assigned, ReportLogAction::Resolved] {
        assert!(actions.contains(&expected), "missing {expected} in {actions:?}");
    }

    // The reporter hears about the outcome through the outbox.
    let delivered = h.forum.outbox.deliver_due(10).await.unwrap();
    assert!(delivered.delivered >= 1);
    assert!(!h.notifier.deliveries_to(CAROL).is_empty());
}

#[tokio::test]
async fn daily_digest_collects_the_hour_of_activity() {
    let h = Harness::new();
    for slug in ["news", "reviews", "fantasy"] {
        h.category(slug).await;
    }
    let fantasy = 3;

    // 08:00
    h.forum
        .subscriptions
        .update_preferences(
            &member(CAROL),
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
            &member(CAROL),
            SubscribeRequest {
                subject_kind: SubjectKind::Category,
                subject_id: fantasy,
                frequency: Some(Frequency::Daily),
                channels: None,
            },
        )
        .await
        .unwrap();

    for n in 1..=5 {
        h.advance_minutes(10);
        h.topic(ALICE, fantasy, &format!("Dragon book {n}"), "Worth reading?").await;
    }
    h.clock.set(start_time() + Duration::hours(1));

    let created = h
        .forum
        .subscriptions
        .generate_digests(Frequency::Daily, 1, 0)
        .await
        .unwrap();
    assert_eq!(created, 1);

    let page = h
        .forum
        .subscriptions
        .digests(&member(CAROL), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].payload.total_updates, 5);
    assert_eq!(page.items[0].status, DigestStatus::Pending);
    assert_eq!(page.items[0].scheduled_for, start_time() + Duration::hours(1));

    let summary = h.forum.subscriptions.process_pending_digests(10).await.unwrap();
    assert_eq!(summary.sent, 1);
    let page = h
        .forum
        .subscriptions
        .digests(&member(CAROL), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.items[0].status, DigestStatus::Sent);
    assert!(!h.notifier.deliveries_to(CAROL).is_empty());

    // The same slot is not generated again.
    let again = h
        .forum
        .subscriptions
        .generate_digests(Frequency::Daily, 1, 0)
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn auto_topic_generation_is_deduplicated() {
    let mut settings = ForumSettings::default();
    settings.auto_topic_category_id = Some(1);
    let h = Harness::with_settings(settings);
    let category = h.category("sections").await;
    assert_eq!(category.id, 1);

    h.forum
        .content_links
        .create_template(
            &admin(),
            NewTopicTemplate {
                name: "Section discussion".to_string(),
                content_kind: ContentKind::Section,
                title_template: "Discussing {title}".to_string(),
                body_template: "{summary}".to_string(),
                is_active: true,
            },
        )
        .await
        .unwrap();
    h.directory.add_content(
        ContentKind::Section,
        42,
        ContentMetadata {
            title: "The Harbour".to_string(),
            summary: "Where the ships come in.".to_string(),
            owner_id: ALICE,
            tags: vec!["sea".to_string()],
        },
    );

    let first = h
        .forum
        .content_links
        .generate_topics_for_content(&moderator(), ContentKind::Section, 42)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    let second = h
        .forum
        .content_links
        .generate_topics_for_content(&moderator(), ContentKind::Section, 42)
        .await
        .unwrap();
    assert!(second.is_empty());

    let linked = h
        .forum
        .content_links
        .topics_for_content(ContentKind::Section, 42)
        .await
        .unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].id, first[0]);
    assert_eq!(linked[0].title, "Discussing The Harbour");
    assert_eq!(linked[0].section_id, Some(42));
}
