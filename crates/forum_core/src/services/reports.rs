//! User reports against topics and comments, from filing to resolution.

use crate::domain::{
    Channel, ContentMutation, ContentReport, DeletionPolicy, EvidenceKind, NewEvidence, NewOutboxMessage, NewReport,
    NewReportComment, NewReportLogEntry, NewUserModerationAction, Notification, NotificationKind, Page, PageRequest,
    Permission, Principal, ReportActionLog, ReportAssignment, ReportCategory, ReportComment, ReportEvidence,
    ReportLogAction, ReportQuery, ReportResolutionPlan, ReportStats, ReportStatus, ResolutionType, TargetKind,
    TargetRef, UserActionKind,
};
use crate::error::{ForumError, ForumResult};
use crate::ports::{CacheService, Clock, DiscussionStore};
use crate::services::discussion::resolve_config;
use crate::services::{enforce_rate_limit, AccessControl, Ports, TrustEngine};
use crate::settings::ForumSettings;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const MAX_REASON_CHARS: usize = 2000;
const DEFAULT_SUSPENSION_HOURS: u32 = 72;

#[derive(Debug, Clone)]
pub struct CreateReport {
    pub target: TargetRef,
    pub category: ReportCategory,
    pub reason: String,
    pub additional_info: String,
}

#[derive(Debug, Clone)]
pub struct ResolveReport {
    pub resolution: ResolutionType,
    pub notes: String,
    /// Replacement body for `contentEdited`.
    pub edited_body: Option<String>,
    /// Suspension length, or the length of a temporary ban; a ban without it is permanent.
    pub duration_hours: Option<u32>,
}

pub struct ReportPipeline {
    store: Arc<dyn DiscussionStore>,
    cache: Arc<dyn CacheService>,
    clock: Arc<dyn Clock>,
    access: Arc<AccessControl>,
    trust: Arc<TrustEngine>,
    settings: Arc<ForumSettings>,
}

impl ReportPipeline {
    pub fn new(ports: &Ports, access: Arc<AccessControl>, trust: Arc<TrustEngine>, settings: Arc<ForumSettings>) -> Self {
        Self {
            store: ports.store.clone(),
            cache: ports.cache.clone(),
            clock: ports.clock.clone(),
            access,
            trust,
            settings,
        }
    }

    /// Files a report. One open report per `(reporter, target)`.
    pub async fn create(&self, principal: &Principal, request: CreateReport) -> ForumResult<ContentReport> {
        self.access.require_member(principal)?;
        let reason = request.reason.trim();
        if reason.is_empty() {
            return Err(ForumError::validation("a report needs a reason"));
        }
        if reason.chars().count() > MAX_REASON_CHARS {
            return Err(ForumError::validation(format!("reason exceeds {MAX_REASON_CHARS} characters")));
        }
        self.target_author(request.target).await?;
        enforce_rate_limit(self.cache.as_ref(), principal.user_id, "report", self.settings.report_rate_limit).await?;

        let report = self
            .store
            .create_report(NewReport {
                reporter_id: principal.user_id,
                target: request.target,
                category: request.category,
                reason: reason.to_string(),
                additional_info: request.additional_info,
                created_at: self.clock.now(),
            })
            .await
            .map_err(|err| match ForumError::from(err) {
                ForumError::Conflict(_) => ForumError::Conflict(format!(
                    "you already have an open report on {}",
                    request.target
                )),
                other => other,
            })?;
        info!(
            report_id = report.id,
            reporter = principal.user_id,
            target = %report.target,
            category = %report.category,
            "Report filed"
        );
        Ok(report)
    }

    /// Visible to the reporter and to moderators.
    pub async fn get(&self, principal: &Principal, id: u64) -> ForumResult<ContentReport> {
        let report = self.store.get_report(id).await?;
        self.require_reporter_or_moderator(principal, &report).await?;
        Ok(report)
    }

    /// Moderators see every report; members only their own.
    pub async fn list(
        &self,
        principal: &Principal,
        mut query: ReportQuery,
        page: PageRequest,
    ) -> ForumResult<Page<ContentReport>> {
        self.access.require_member(principal)?;
        if !self.access.permissions(principal, None).await?.is_moderator() {
            query.reporter_id = Some(principal.user_id);
        }
        Ok(self.store.list_reports(&query, page).await?)
    }

    pub async fn add_evidence(
        &self,
        principal: &Principal,
        id: u64,
        kind: EvidenceKind,
        content: String,
    ) -> ForumResult<ReportEvidence> {
        let report = self.open_report(principal, id).await?;
        if content.trim().is_empty() {
            return Err(ForumError::validation("evidence cannot be empty"));
        }
        let now = self.clock.now();
        let evidence = self
            .store
            .add_evidence(
                NewEvidence {
                    report_id: report.id,
                    kind,
                    content,
                    added_by: principal.user_id,
                    created_at: now,
                },
                log_entry(report.id, principal.user_id, ReportLogAction::EvidenceAdded, json!({ "kind": kind }), now),
            )
            .await?;
        Ok(evidence)
    }

    pub async fn list_evidence(&self, principal: &Principal, id: u64) -> ForumResult<Vec<ReportEvidence>> {
        self.get(principal, id).await?;
        Ok(self.store.list_evidence(id).await?)
    }

    /// Internal comments may only be written, and read, by moderators.
    pub async fn add_comment(
        &self,
        principal: &Principal,
        id: u64,
        body: String,
        is_internal: bool,
    ) -> ForumResult<ReportComment> {
        let report = self.open_report(principal, id).await?;
        if body.trim().is_empty() {
            return Err(ForumError::validation("comment cannot be empty"));
        }
        if is_internal {
            self.require_moderator_for(principal, &report).await?;
        }
        let now = self.clock.now();
        let comment = self
            .store
            .add_report_comment(
                NewReportComment {
                    report_id: report.id,
                    author_id: principal.user_id,
                    body,
                    is_internal,
                    created_at: now,
                },
                log_entry(
                    report.id,
                    principal.user_id,
                    ReportLogAction::Commented,
                    json!({ "internal": is_internal }),
                    now,
                ),
            )
            .await?;
        Ok(comment)
    }

    pub async fn list_comments(&self, principal: &Principal, id: u64) -> ForumResult<Vec<ReportComment>> {
        let report = self.store.get_report(id).await?;
        let is_moderator = self.require_reporter_or_moderator(principal, &report).await?;
        Ok(self.store.list_report_comments(id, is_moderator).await?)
    }

    /// `pending → inReview`, or reassignment while in review.
    pub async fn assign(&self, principal: &Principal, id: u64, assignee: u64) -> ForumResult<ContentReport> {
        let report = self.store.get_report(id).await?;
        self.require_moderator_for(principal, &report).await?;
        self.assign_report(&report, principal.user_id, assignee).await
    }

    /// Resolves an open report, applying the side effect its resolution implies.
    pub async fn resolve(&self, principal: &Principal, id: u64, request: ResolveReport) -> ForumResult<ContentReport> {
        let report = self.store.get_report(id).await?;
        let category_id = self.category_of(report.target).await?;
        let permissions = self.access.require_moderator(principal, category_id).await?;
        let needed = match request.resolution {
            ResolutionType::ContentRemoved => Some(Permission::DeleteContent),
            ResolutionType::ContentEdited => Some(Permission::EditAnyContent),
            ResolutionType::UserSuspended | ResolutionType::UserBanned => Some(Permission::BanUsers),
            ResolutionType::NoAction | ResolutionType::Warning => None,
        };
        if let Some(permission) = needed.filter(|p| !permissions.has(*p)) {
            return Err(ForumError::forbidden(format!("missing permission {permission}")));
        }
        let report = self.ensure_in_review(report, principal.user_id).await?;
        let author_id = self.target_author(report.target).await.ok();
        let now = self.clock.now();

        let mutation = match request.resolution {
            ResolutionType::ContentRemoved => {
                let policy = match category_id {
                    Some(category_id) => resolve_config(self.store.as_ref(), category_id, now).await?.deletion_policy,
                    None => DeletionPolicy::DetachWithTombstone,
                };
                Some(ContentMutation::SoftDelete { policy })
            }
            ResolutionType::ContentEdited => {
                let body = request
                    .edited_body
                    .clone()
                    .filter(|body| !body.trim().is_empty())
                    .ok_or_else(|| ForumError::validation("contentEdited needs the edited body"))?;
                if body.len() > self.settings.max_body_bytes {
                    return Err(ForumError::validation(format!(
                        "body exceeds {} bytes",
                        self.settings.max_body_bytes
                    )));
                }
                Some(ContentMutation::ReplaceBody { body })
            }
            _ => None,
        };

        let user_action = match (author_id, action_for(&request)) {
            (Some(user_id), Some((kind, duration_hours))) => Some(NewUserModerationAction {
                user_id,
                action_kind: kind,
                reason: format!("report {}: {}", report.id, report.category),
                applied_by: principal.user_id,
                applied_at: now,
                duration_hours,
                related_target: Some(report.target),
            }),
            _ => None,
        };

        let mut log = vec![log_entry(
            report.id,
            principal.user_id,
            ReportLogAction::Resolved,
            json!({ "resolution": request.resolution, "notes": request.notes }),
            now,
        )];
        if request.resolution == ResolutionType::ContentRemoved {
            log.push(log_entry(
                report.id,
                principal.user_id,
                ReportLogAction::ContentDeleted,
                json!({ "target": report.target }),
                now,
            ));
        }

        let mut notifications = vec![reporter_notice(&report, NotificationKind::ReportResolved, request.resolution, now)];
        if let Some(action) = &user_action {
            notifications.push(NewOutboxMessage {
                user_id: action.user_id,
                channel: Channel::InApp,
                notification: Notification::new(
                    NotificationKind::UserAction,
                    "A moderator took action on your account",
                    format!("{} after a report on your {}", action.action_kind, report.target.kind),
                )
                .with_target(report.target),
                created_at: now,
            });
        }

        let resolved = self
            .store
            .resolve_report(
                report.id,
                ReportStatus::InReview,
                ReportResolutionPlan {
                    status: ReportStatus::Resolved,
                    resolution: Some(request.resolution),
                    resolved_by: principal.user_id,
                    resolution_notes: request.notes,
                    mutation,
                    user_action,
                    log,
                    notifications,
                    updated_at: now,
                },
            )
            .await?;
        info!(
            report_id = resolved.id,
            moderator = principal.user_id,
            resolution = %request.resolution,
            target = %resolved.target,
            "Report resolved"
        );

        if let Some(author_id) = author_id.filter(|_| request.resolution != ResolutionType::NoAction) {
            let outcome = match request.resolution {
                ResolutionType::Warning => self.trust.record_warning(author_id).await,
                _ => self.trust.record_upheld_report(author_id).await,
            };
            if let Err(err) = outcome {
                warn!(user_id = author_id, error = %err, "Trust update after report resolution failed");
            }
        }
        Ok(resolved)
    }

    /// Closes an open report with no action taken.
    pub async fn reject(&self, principal: &Principal, id: u64, notes: String) -> ForumResult<ContentReport> {
        let report = self.store.get_report(id).await?;
        self.require_moderator_for(principal, &report).await?;
        let report = self.ensure_in_review(report, principal.user_id).await?;
        let now = self.clock.now();
        let rejected = self
            .store
            .resolve_report(
                report.id,
                ReportStatus::InReview,
                ReportResolutionPlan {
                    status: ReportStatus::Rejected,
                    resolution: Some(ResolutionType::NoAction),
                    resolved_by: principal.user_id,
                    resolution_notes: notes.clone(),
                    mutation: None,
                    user_action: None,
                    log: vec![log_entry(
                        report.id,
                        principal.user_id,
                        ReportLogAction::Rejected,
                        json!({ "notes": notes }),
                        now,
                    )],
                    notifications: vec![reporter_notice(
                        &report,
                        NotificationKind::ReportRejected,
                        ResolutionType::NoAction,
                        now,
                    )],
                    updated_at: now,
                },
            )
            .await?;
        info!(report_id = rejected.id, moderator = principal.user_id, "Report rejected");
        Ok(rejected)
    }

    pub async fn log(&self, principal: &Principal, id: u64) -> ForumResult<Vec<ReportActionLog>> {
        let report = self.store.get_report(id).await?;
        self.require_moderator_for(principal, &report).await?;
        Ok(self.store.list_report_log(id).await?)
    }

    pub async fn stats(&self, principal: &Principal) -> ForumResult<ReportStats> {
        self.access.require_moderator(principal, None).await?;
        Ok(self.store.report_stats().await?)
    }

    //-------------------------------------------------------------------------------------
    // Helpers
    //-------------------------------------------------------------------------------------

    async fn assign_report(&self, report: &ContentReport, actor: u64, assignee: u64) -> ForumResult<ContentReport> {
        if !report.status.can_transition_to(ReportStatus::InReview) {
            return Err(ForumError::validation(format!("report {} is already {}", report.id, report.status)));
        }
        let now = self.clock.now();
        let assigned = self
            .store
            .assign_report(
                report.id,
                ReportAssignment {
                    assignee,
                    expected_status: report.status,
                    log: log_entry(
                        report.id,
                        actor,
                        ReportLogAction::Assigned,
                        json!({ "from": report.assigned_to, "to": assignee }),
                        now,
                    ),
                    updated_at: now,
                },
            )
            .await?;
        info!(report_id = report.id, assignee, by = actor, "Report assigned");
        Ok(assigned)
    }

    /// Pending reports are assigned to the resolving moderator first.
    async fn ensure_in_review(&self, report: ContentReport, moderator: u64) -> ForumResult<ContentReport> {
        match report.status {
            ReportStatus::Pending => self.assign_report(&report, moderator, moderator).await,
            ReportStatus::InReview => Ok(report),
            status => Err(ForumError::validation(format!("report {} is already {status}", report.id))),
        }
    }

    async fn open_report(&self, principal: &Principal, id: u64) -> ForumResult<ContentReport> {
        let report = self.store.get_report(id).await?;
        self.require_reporter_or_moderator(principal, &report).await?;
        if !report.status.is_open() {
            return Err(ForumError::validation(format!("report {id} is closed")));
        }
        Ok(report)
    }

    /// Returns whether the caller is acting as a moderator.
    async fn require_reporter_or_moderator(&self, principal: &Principal, report: &ContentReport) -> ForumResult<bool> {
        self.access.require_member(principal)?;
        let category_id = self.category_of(report.target).await?;
        let is_moderator = self.access.permissions(principal, category_id).await?.is_moderator();
        if is_moderator || report.reporter_id == principal.user_id {
            Ok(is_moderator)
        } else {
            Err(ForumError::not_found(format!("report {}", report.id)))
        }
    }

    async fn require_moderator_for(&self, principal: &Principal, report: &ContentReport) -> ForumResult<()> {
        let category_id = self.category_of(report.target).await?;
        self.access.require_moderator(principal, category_id).await?;
        Ok(())
    }

    /// The target's category, or `None` when the target is gone.
    async fn category_of(&self, target: TargetRef) -> ForumResult<Option<u64>> {
        match self.access.category_of(target).await {
            Ok(id) => Ok(Some(id)),
            Err(ForumError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Author of a live target; deleted targets cannot be reported.
    async fn target_author(&self, target: TargetRef) -> ForumResult<u64> {
        match target.kind {
            TargetKind::Topic => {
                let topic = self.store.get_topic(target.id).await?;
                if topic.is_deleted() {
                    return Err(ForumError::not_found(format!("topic {}", target.id)));
                }
                Ok(topic.author_id)
            }
            TargetKind::Comment => {
                let comment = self.store.get_comment(target.id).await?;
                if comment.is_deleted() {
                    return Err(ForumError::not_found(format!("comment {}", target.id)));
                }
                Ok(comment.author_id)
            }
        }
    }
}

fn action_for(request: &ResolveReport) -> Option<(UserActionKind, Option<u32>)> {
    match request.resolution {
        ResolutionType::Warning => Some((UserActionKind::Warn, None)),
        ResolutionType::UserSuspended => Some((
            UserActionKind::Suspend,
            Some(request.duration_hours.unwrap_or(DEFAULT_SUSPENSION_HOURS)),
        )),
        ResolutionType::UserBanned => match request.duration_hours {
            Some(hours) => Some((UserActionKind::TemporaryBan, Some(hours))),
            None => Some((UserActionKind::PermanentBan, None)),
        },
        _ => None,
    }
}

fn log_entry(
    report_id: u64,
    actor_id: u64,
    action: ReportLogAction,
    details: serde_json::Value,
    now: DateTime<Utc>,
) -> NewReportLogEntry {
    NewReportLogEntry {
        report_id,
        actor_id,
        action,
        details,
        created_at: now,
    }
}

fn reporter_notice(
    report: &ContentReport,
    kind: NotificationKind,
    resolution: ResolutionType,
    now: DateTime<Utc>,
) -> NewOutboxMessage {
    let body = match kind {
        NotificationKind::ReportRejected => "A moderator reviewed your report and took no action.".to_string(),
        _ => format!("A moderator resolved your report: {resolution}."),
    };
    NewOutboxMessage {
        user_id: report.reporter_id,
        channel: Channel::InApp,
        notification: Notification::new(kind, "Your report was reviewed", body)
            .with_target(report.target)
            .with_data(json!({ "reportId": report.id, "resolution": resolution })),
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(resolution: ResolutionType, duration_hours: Option<u32>) -> ResolveReport {
        ResolveReport {
            resolution,
            notes: String::new(),
            edited_body: None,
            duration_hours,
        }
    }

    #[test]
    fn resolutions_map_onto_user_actions() {
        assert_eq!(action_for(&request(ResolutionType::NoAction, None)), None);
        assert_eq!(action_for(&request(ResolutionType::ContentRemoved, None)), None);
        assert_eq!(
            action_for(&request(ResolutionType::Warning, None)),
            Some((UserActionKind::Warn, None))
        );
        assert_eq!(
            action_for(&request(ResolutionType::UserSuspended, None)),
            Some((UserActionKind::Suspend, Some(DEFAULT_SUSPENSION_HOURS)))
        );
    }

    #[test]
    fn bans_without_a_duration_are_permanent() {
        assert_eq!(
            action_for(&request(ResolutionType::UserBanned, None)),
            Some((UserActionKind::PermanentBan, None))
        );
        assert_eq!(
            action_for(&request(ResolutionType::UserBanned, Some(48))),
            Some((UserActionKind::TemporaryBan, Some(48)))
        );
    }
}
