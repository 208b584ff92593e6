//! Content reports, their evidence, discussion and audit log.

use super::MemoryStore;
use async_trait::async_trait;
use forum_core::domain::*;
use forum_core::ports::{PortError, PortResult, ReportStore};
use std::cmp::Reverse;

#[async_trait]
impl ReportStore for MemoryStore {
    async fn create_report(&self, report: NewReport) -> PortResult<ContentReport> {
        let mut state = self.write();
        state.ensure_target(report.target)?;
        let open = state
            .reports
            .values()
            .any(|r| r.reporter_id == report.reporter_id && r.target == report.target && r.status.is_open());
        if open {
            return Err(PortError::conflict(format!(
                "user {} already has an open report on {}",
                report.reporter_id, report.target
            )));
        }
        let id = state.next_id();
        let stored = ContentReport {
            id,
            reporter_id: report.reporter_id,
            target: report.target,
            category: report.category,
            reason: report.reason,
            additional_info: report.additional_info,
            status: ReportStatus::Pending,
            assigned_to: None,
            resolved_by: None,
            resolution: None,
            resolution_notes: String::new(),
            reporter_notified: false,
            created_at: report.created_at,
            updated_at: report.created_at,
        };
        state.reports.insert(id, stored.clone());
        state.insert_report_log(NewReportLogEntry {
            report_id: id,
            actor_id: stored.reporter_id,
            action: ReportLogAction::Created,
            details: serde_json::json!({ "category": stored.category, "target": stored.target }),
            created_at: stored.created_at,
        });
        Ok(stored)
    }

    async fn get_report(&self, id: u64) -> PortResult<ContentReport> {
        self.read()
            .reports
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::not_found(format!("report {id}")))
    }

    async fn list_reports(&self, query: &ReportQuery, page: PageRequest) -> PortResult<Page<ContentReport>> {
        let mut reports: Vec<ContentReport> = self
            .read()
            .reports
            .values()
            .filter(|r| {
                query.status.map_or(true, |s| r.status == s)
                    && query.category.map_or(true, |c| r.category == c)
                    && query.assigned_to.map_or(true, |a| r.assigned_to == Some(a))
                    && query.reporter_id.map_or(true, |u| r.reporter_id == u)
            })
            .cloned()
            .collect();
        reports.sort_by_key(|r| (Reverse(r.created_at), Reverse(r.id)));
        Ok(Page::from_vec(reports, page))
    }

    async fn add_evidence(&self, evidence: NewEvidence, log: NewReportLogEntry) -> PortResult<ReportEvidence> {
        let mut state = self.write();
        if !state.reports.contains_key(&evidence.report_id) {
            return Err(PortError::not_found(format!("report {}", evidence.report_id)));
        }
        let id = state.next_id();
        let stored = ReportEvidence {
            id,
            report_id: evidence.report_id,
            kind: evidence.kind,
            content: evidence.content,
            added_by: evidence.added_by,
            created_at: evidence.created_at,
        };
        state.evidence.insert(id, stored.clone());
        state.insert_report_log(log);
        Ok(stored)
    }

    async fn list_evidence(&self, report_id: u64) -> PortResult<Vec<ReportEvidence>> {
        Ok(self
            .read()
            .evidence
            .values()
            .filter(|e| e.report_id == report_id)
            .cloned()
            .collect())
    }

    async fn add_report_comment(&self, comment: NewReportComment, log: NewReportLogEntry) -> PortResult<ReportComment> {
        let mut state = self.write();
        if !state.reports.contains_key(&comment.report_id) {
            return Err(PortError::not_found(format!("report {}", comment.report_id)));
        }
        let id = state.next_id();
        let stored = ReportComment {
            id,
            report_id: comment.report_id,
            author_id: comment.author_id,
            body: comment.body,
            is_internal: comment.is_internal,
            created_at: comment.created_at,
        };
        state.report_comments.insert(id, stored.clone());
        state.insert_report_log(log);
        Ok(stored)
    }

    async fn list_report_comments(&self, report_id: u64, include_internal: bool) -> PortResult<Vec<ReportComment>> {
        Ok(self
            .read()
            .report_comments
            .values()
            .filter(|c| c.report_id == report_id && (include_internal || !c.is_internal))
            .cloned()
            .collect())
    }

    async fn assign_report(&self, id: u64, assignment: ReportAssignment) -> PortResult<ContentReport> {
        let mut state = self.write();
        let report = state
            .reports
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("report {id}")))?;
        if report.status != assignment.expected_status || !report.status.can_transition_to(ReportStatus::InReview) {
            return Err(PortError::conflict(format!("report {id} is {}", report.status)));
        }
        report.status = ReportStatus::InReview;
        report.assigned_to = Some(assignment.assignee);
        report.updated_at = assignment.updated_at;
        let assigned = report.clone();
        state.insert_report_log(assignment.log);
        Ok(assigned)
    }

    async fn resolve_report(
        &self,
        id: u64,
        expected_status: ReportStatus,
        plan: ReportResolutionPlan,
    ) -> PortResult<ContentReport> {
        let mut state = self.write();
        let report = state
            .reports
            .get(&id)
            .ok_or_else(|| PortError::not_found(format!("report {id}")))?;
        if report.status != expected_status || !report.status.can_transition_to(plan.status) {
            return Err(PortError::conflict(format!("report {id} is {}", report.status)));
        }
        let (target, reporter_id) = (report.target, report.reporter_id);
        if plan.mutation.is_some() {
            state.ensure_target(target)?;
        }

        if let Some(mutation) = &plan.mutation {
            state.apply_mutation(target, mutation, plan.updated_at)?;
        }
        if let Some(action) = plan.user_action {
            state.insert_user_action(action);
        }
        for entry in plan.log {
            state.insert_report_log(entry);
        }
        let reporter_notified = plan.notifications.iter().any(|n| n.user_id == reporter_id);
        state.insert_outbox(plan.notifications);

        let report = state
            .reports
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found(format!("report {id}")))?;
        report.status = plan.status;
        report.resolution = plan.resolution;
        report.resolved_by = Some(plan.resolved_by);
        report.resolution_notes = plan.resolution_notes;
        report.reporter_notified = report.reporter_notified || reporter_notified;
        report.updated_at = plan.updated_at;
        Ok(report.clone())
    }

    async fn append_report_log(&self, entry: NewReportLogEntry) -> PortResult<ReportActionLog> {
        let mut state = self.write();
        if !state.reports.contains_key(&entry.report_id) {
            return Err(PortError::not_found(format!("report {}", entry.report_id)));
        }
        Ok(state.insert_report_log(entry))
    }

    async fn list_report_log(&self, report_id: u64) -> PortResult<Vec<ReportActionLog>> {
        Ok(self
            .read()
            .report_log
            .values()
            .filter(|entry| entry.report_id == report_id)
            .cloned()
            .collect())
    }

    async fn report_stats(&self) -> PortResult<ReportStats> {
        let state = self.read();
        let by_status = ReportStatus::ALL
            .iter()
            .map(|status| (*status, state.reports.values().filter(|r| r.status == *status).count() as u64))
            .filter(|(_, count)| *count > 0)
            .collect();
        let by_category = ReportCategory::ALL
            .iter()
            .map(|category| (*category, state.reports.values().filter(|r| r.category == *category).count() as u64))
            .filter(|(_, count)| *count > 0)
            .collect();
        Ok(ReportStats {
            total: state.reports.len() as u64,
            by_status,
            by_category,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 1, 15, minute, 0).unwrap()
    }

    fn store_with_topic() -> (MemoryStore, TargetRef) {
        let store = MemoryStore::new();
        let topic = store.write().insert_topic(NewTopic {
            title: "Spoilers".into(),
            body: "Ending talk".into(),
            author_id: 1,
            category_id: 1,
            is_approved: true,
            is_flagged: false,
            flag_reason: None,
            book_id: None,
            chapter_id: None,
            section_id: None,
            tag_ids: vec![],
            created_at: at(0),
        });
        (store, topic.target())
    }

    fn report(target: TargetRef) -> NewReport {
        NewReport {
            reporter_id: 2,
            target,
            category: ReportCategory::Spam,
            reason: "ads".into(),
            additional_info: String::new(),
            created_at: at(1),
        }
    }

    #[tokio::test]
    async fn one_open_report_per_reporter_and_target() {
        let (store, target) = store_with_topic();
        let first = store.create_report(report(target)).await.unwrap();
        assert!(matches!(store.create_report(report(target)).await, Err(PortError::Conflict(_))));

        let log = store.list_report_log(first.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, ReportLogAction::Created);
    }

    #[tokio::test]
    async fn resolution_removes_content_and_notifies_the_reporter() {
        let (store, target) = store_with_topic();
        let filed = store.create_report(report(target)).await.unwrap();
        let entry = |action| NewReportLogEntry {
            report_id: filed.id,
            actor_id: 9,
            action,
            details: serde_json::Value::Null,
            created_at: at(2),
        };
        store
            .assign_report(
                filed.id,
                ReportAssignment {
                    assignee: 9,
                    expected_status: ReportStatus::Pending,
                    log: entry(ReportLogAction::Assigned),
                    updated_at: at(2),
                },
            )
            .await
            .unwrap();

        let resolved = store
            .resolve_report(
                filed.id,
                ReportStatus::InReview,
                ReportResolutionPlan {
                    status: ReportStatus::Resolved,
                    resolution: Some(ResolutionType::ContentRemoved),
                    resolved_by: 9,
                    resolution_notes: "spam".into(),
                    mutation: Some(ContentMutation::SoftDelete { policy: DeletionPolicy::Cascade }),
                    user_action: None,
                    log: vec![entry(ReportLogAction::Resolved), entry(ReportLogAction::ContentDeleted)],
                    notifications: vec![NewOutboxMessage {
                        user_id: 2,
                        channel: Channel::InApp,
                        notification: Notification::new(NotificationKind::ReportResolved, "Resolved", "Thanks"),
                        created_at: at(3),
                    }],
                    updated_at: at(3),
                },
            )
            .await
            .unwrap();

        assert_eq!(resolved.status, ReportStatus::Resolved);
        assert!(resolved.reporter_notified);
        assert!(store.read().topic(target.id).unwrap().is_deleted());
        assert_eq!(store.list_report_log(filed.id).await.unwrap().len(), 4);
        assert_eq!(store.outbox_messages().len(), 1);
    }
}
