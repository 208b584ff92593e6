//! Digest scheduling and payload assembly.

use crate::domain::{
    ActivityEvent, DigestPayload, DigestSubject, DigestTopic, Frequency, SubjectKind, SubscriptionPreference,
};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use std::collections::{BTreeMap, HashSet};

/// The most recent digest slot at or before `now`, in the user's local time:
/// today's (or yesterday's) `digestHour` for daily digests and the latest
/// `digestDay` at `digestHour` for weekly ones. `None` for instant delivery.
pub fn digest_slot(
    frequency: Frequency,
    preference: &SubscriptionPreference,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let offset = FixedOffset::east_opt(preference.utc_offset_minutes.saturating_mul(60))?;
    let local_now = now.with_timezone(&offset).naive_local();
    let today = local_now.date();
    let hour = u32::from(preference.digest_hour.min(23));

    let at_hour = |date: NaiveDate| date.and_hms_opt(hour, 0, 0);

    let slot = match frequency {
        Frequency::Instant => return None,
        Frequency::Daily => {
            let candidate = at_hour(today)?;
            if candidate <= local_now {
                candidate
            } else {
                at_hour(today - Duration::days(1))?
            }
        }
        Frequency::Weekly => {
            let weekday = i64::from(today.weekday().num_days_from_sunday());
            let wanted = i64::from(preference.digest_day.min(6));
            let back = (weekday - wanted).rem_euclid(7);
            let candidate = at_hour(today - Duration::days(back))?;
            if candidate <= local_now {
                candidate
            } else {
                at_hour(today - Duration::days(back + 7))?
            }
        }
    };
    offset
        .from_local_datetime(&slot)
        .single()
        .map(|at| at.with_timezone(&Utc))
}

/// True when a pending digest has drifted past `multiplier` cadences.
pub fn has_expired(frequency: Frequency, scheduled_for: DateTime<Utc>, now: DateTime<Utc>, multiplier: i32) -> bool {
    match frequency.cadence() {
        Some(cadence) => now - scheduled_for > cadence * multiplier.max(1),
        None => false,
    }
}

/// Groups events by subject (busiest first) and topic (most recent first).
pub fn build_payload(
    frequency: Frequency,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    events: &[ActivityEvent],
) -> DigestPayload {
    let mut subjects: BTreeMap<(SubjectKind, u64), BTreeMap<u64, DigestTopic>> = BTreeMap::new();
    let mut distinct = HashSet::new();

    for event in events {
        distinct.insert((event.topic_id, event.kind, event.occurred_at, event.actor_id));
        let topics = subjects.entry((event.subject_kind, event.subject_id)).or_default();
        let topic = topics.entry(event.topic_id).or_insert_with(|| DigestTopic {
            topic_id: event.topic_id,
            title: event.topic_title.clone(),
            update_count: 0,
            last_activity_at: event.occurred_at,
        });
        topic.update_count += 1;
        if event.occurred_at >= topic.last_activity_at {
            topic.last_activity_at = event.occurred_at;
            topic.title = event.topic_title.clone();
        }
    }

    let mut subjects: Vec<DigestSubject> = subjects
        .into_iter()
        .map(|((subject_kind, subject_id), topics)| {
            let mut topics: Vec<DigestTopic> = topics.into_values().collect();
            topics.sort_by(|a, b| {
                b.last_activity_at
                    .cmp(&a.last_activity_at)
                    .then(a.topic_id.cmp(&b.topic_id))
            });
            DigestSubject {
                subject_kind,
                subject_id,
                activity_count: topics.iter().map(|t| t.update_count).sum(),
                topics,
            }
        })
        .collect();
    subjects.sort_by(|a, b| {
        b.activity_count
            .cmp(&a.activity_count)
            .then(a.subject_kind.as_str().cmp(b.subject_kind.as_str()))
            .then(a.subject_id.cmp(&b.subject_id))
    });

    DigestPayload {
        frequency,
        window_start,
        window_end,
        total_updates: distinct.len() as u64,
        subjects,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ActivityKind;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        // 2024-03-04 is a Monday.
        Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
    }

    fn preference(hour: u8, day: u8, offset: i32) -> SubscriptionPreference {
        let mut preference = SubscriptionPreference::defaults_for(1, at(1, 0, 0));
        preference.digest_hour = hour;
        preference.digest_day = day;
        preference.utc_offset_minutes = offset;
        preference
    }

    fn event(subject_id: u64, topic_id: u64, minute: u32) -> ActivityEvent {
        ActivityEvent {
            id: u64::from(minute),
            subject_kind: SubjectKind::Category,
            subject_id,
            kind: ActivityKind::TopicCreated,
            topic_id,
            topic_title: format!("topic {topic_id}"),
            actor_id: 2,
            occurred_at: at(4, 8, minute),
        }
    }

    #[test]
    fn daily_slot_is_the_latest_digest_hour() {
        let pref = preference(9, 1, 0);
        assert_eq!(digest_slot(Frequency::Daily, &pref, at(4, 9, 0)), Some(at(4, 9, 0)));
        assert_eq!(digest_slot(Frequency::Daily, &pref, at(4, 8, 59)), Some(at(3, 9, 0)));
        assert_eq!(digest_slot(Frequency::Instant, &pref, at(4, 9, 0)), None);
    }

    #[test]
    fn daily_slot_honours_the_local_offset() {
        // 09:00 at UTC+2 is 07:00 UTC.
        let pref = preference(9, 1, 120);
        assert_eq!(digest_slot(Frequency::Daily, &pref, at(4, 7, 30)), Some(at(4, 7, 0)));
    }

    #[test]
    fn weekly_slot_waits_for_the_digest_day() {
        let monday = preference(9, 1, 0);
        assert_eq!(digest_slot(Frequency::Weekly, &monday, at(6, 12, 0)), Some(at(4, 9, 0)));
        assert_eq!(digest_slot(Frequency::Weekly, &monday, at(4, 8, 0)), Some(at(4, 9, 0) - Duration::weeks(1)));
    }

    #[test]
    fn expired_digests_are_detected_after_two_cadences() {
        let scheduled = at(4, 9, 0);
        assert!(!has_expired(Frequency::Daily, scheduled, scheduled + Duration::hours(47), 2));
        assert!(has_expired(Frequency::Daily, scheduled, scheduled + Duration::hours(49), 2));
    }

    #[test]
    fn payload_orders_subjects_and_topics() {
        let events = vec![event(3, 10, 5), event(3, 11, 20), event(3, 10, 30), event(4, 12, 10)];
        let payload = build_payload(Frequency::Daily, at(4, 8, 0), at(4, 9, 0), &events);
        assert_eq!(payload.total_updates, 4);
        assert_eq!(payload.subjects[0].subject_id, 3);
        assert_eq!(payload.subjects[0].activity_count, 3);
        let order: Vec<u64> = payload.subjects[0].topics.iter().map(|t| t.topic_id).collect();
        assert_eq!(order, vec![10, 11]);
        assert_eq!(payload.subjects[1].subject_id, 4);
    }
}
