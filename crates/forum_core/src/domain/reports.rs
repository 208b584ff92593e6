//! User-initiated content reports and their audit trail.

use super::{ContentMutation, NewOutboxMessage, NewUserModerationAction, TargetRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    pub enum ReportCategory {
        Spam => "spam",
        Harassment => "harassment",
        HateSpeech => "hateSpeech",
        Violence => "violence",
        IllegalContent => "illegalContent",
        PrivacyViolation => "privacyViolation",
        Copyright => "copyright",
        Misinformation => "misinformation",
        Other => "other",
    }
}

string_enum! {
    pub enum ReportStatus {
        Pending => "pending",
        InReview => "inReview",
        Resolved => "resolved",
        Rejected => "rejected",
    }
}

impl ReportStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, ReportStatus::Pending | ReportStatus::InReview)
    }

    pub fn can_transition_to(&self, next: ReportStatus) -> bool {
        matches!(
            (self, next),
            (ReportStatus::Pending, ReportStatus::InReview)
                | (ReportStatus::InReview, ReportStatus::InReview)
                | (ReportStatus::InReview, ReportStatus::Resolved)
                | (ReportStatus::InReview, ReportStatus::Rejected)
        )
    }
}

string_enum! {
    pub enum ResolutionType {
        NoAction => "noAction",
        Warning => "warning",
        ContentRemoved => "contentRemoved",
        ContentEdited => "contentEdited",
        UserSuspended => "userSuspended",
        UserBanned => "userBanned",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentReport {
    pub id: u64,
    pub reporter_id: u64,
    pub target: TargetRef,
    pub category: ReportCategory,
    pub reason: String,
    pub additional_info: String,
    pub status: ReportStatus,
    pub assigned_to: Option<u64>,
    pub resolved_by: Option<u64>,
    pub resolution: Option<ResolutionType>,
    pub resolution_notes: String,
    pub reporter_notified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReport {
    pub reporter_id: u64,
    pub target: TargetRef,
    pub category: ReportCategory,
    pub reason: String,
    pub additional_info: String,
    pub created_at: DateTime<Utc>,
}

string_enum! {
    pub enum EvidenceKind {
        Url => "url",
        Screenshot => "screenshot",
        Text => "text",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEvidence {
    pub id: u64,
    pub report_id: u64,
    pub kind: EvidenceKind,
    pub content: String,
    pub added_by: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvidence {
    pub report_id: u64,
    pub kind: EvidenceKind,
    pub content: String,
    pub added_by: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportComment {
    pub id: u64,
    pub report_id: u64,
    pub author_id: u64,
    pub body: String,
    /// Only visible to holders of a moderator grant.
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReportComment {
    pub report_id: u64,
    pub author_id: u64,
    pub body: String,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}

string_enum! {
    pub enum ReportLogAction {
        Created => "created",
        Assigned => "assigned",
        EvidenceAdded => "evidenceAdded",
        Commented => "commented",
        Resolved => "resolved",
        Rejected => "rejected",
        ContentDeleted => "contentDeleted",
    }
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportActionLog {
    pub id: u64,
    pub report_id: u64,
    pub actor_id: u64,
    pub action: ReportLogAction,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReportLogEntry {
    pub report_id: u64,
    pub actor_id: u64,
    pub action: ReportLogAction,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub status: Option<ReportStatus>,
    pub category: Option<ReportCategory>,
    pub assigned_to: Option<u64>,
    pub reporter_id: Option<u64>,
}

/// Assignment of a report to a moderator; moves `pending` reports into review.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAssignment {
    pub assignee: u64,
    pub expected_status: ReportStatus,
    pub log: NewReportLogEntry,
    pub updated_at: DateTime<Utc>,
}

/// Everything resolving or rejecting a report writes, applied atomically by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResolutionPlan {
    pub status: ReportStatus,
    pub resolution: Option<ResolutionType>,
    pub resolved_by: u64,
    pub resolution_notes: String,
    pub mutation: Option<ContentMutation>,
    pub user_action: Option<NewUserModerationAction>,
    pub log: Vec<NewReportLogEntry>,
    pub notifications: Vec<NewOutboxMessage>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStats {
    pub total: u64,
    pub by_status: Vec<(ReportStatus, u64)>,
    pub by_category: Vec<(ReportCategory, u64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_transitions_follow_the_review_machine() {
        assert!(ReportStatus::Pending.can_transition_to(ReportStatus::InReview));
        assert!(ReportStatus::InReview.can_transition_to(ReportStatus::Resolved));
        assert!(ReportStatus::InReview.can_transition_to(ReportStatus::Rejected));
        assert!(!ReportStatus::Pending.can_transition_to(ReportStatus::Resolved));
        assert!(!ReportStatus::Resolved.can_transition_to(ReportStatus::InReview));
    }
}
