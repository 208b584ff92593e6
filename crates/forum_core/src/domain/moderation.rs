//! Content filtering, the moderation queue, trust scores and moderator grants.

use super::{DeletionPolicy, NewOutboxMessage, TargetKind, TargetRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    /// Banded classification derived from the trust score, lowest first.
    #[derive(PartialOrd, Ord)]
    pub enum TrustLevel {
        NewUser => "newUser",
        Basic => "basic",
        Member => "member",
        Regular => "regular",
        Leader => "leader",
    }
}

impl TrustLevel {
    /// 0 for `newUser` up to 4 for `leader`.
    pub fn rank(&self) -> u8 {
        match self {
            TrustLevel::NewUser => 0,
            TrustLevel::Basic => 1,
            TrustLevel::Member => 2,
            TrustLevel::Regular => 3,
            TrustLevel::Leader => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTrustScore {
    pub user_id: u64,
    pub level: TrustLevel,
    /// In `[0, 100]`.
    pub score: f64,
    pub content_score: f64,
    pub community_score: f64,
    pub moderator_score: f64,
    pub report_count: u32,
    pub warning_count: u32,
    pub content_rejections: u32,
    pub last_calculated_at: DateTime<Utc>,
    pub manual_adjustment: f64,
    pub manual_adjustment_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserTrustScore {
    /// A zeroed row whose `last_calculated_at` is the epoch, so the next read recalculates it.
    pub fn fresh(user_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            level: TrustLevel::NewUser,
            score: 0.0,
            content_score: 0.0,
            community_score: 0.0,
            moderator_score: 0.0,
            report_count: 0,
            warning_count: 0,
            content_rejections: 0,
            last_calculated_at: DateTime::<Utc>::default(),
            manual_adjustment: 0.0,
            manual_adjustment_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Raw activity figures the trust engine scores from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionStats {
    pub topics_created: u64,
    pub comments_created: u64,
    pub approved_contributions: u64,
    pub reactions_received: u64,
    pub account_age_days: u64,
}

string_enum! {
    pub enum RuleScope {
        Topics => "topics",
        Comments => "comments",
        All => "all",
    }
}

impl RuleScope {
    pub fn applies_to(&self, kind: TargetKind) -> bool {
        matches!(
            (self, kind),
            (RuleScope::All, _)
                | (RuleScope::Topics, TargetKind::Topic)
                | (RuleScope::Comments, TargetKind::Comment)
        )
    }
}

string_enum! {
    pub enum PatternKind {
        Exact => "exact",
        Regex => "regex",
        Wildcard => "wildcard",
    }
}

string_enum! {
    /// Outcome of a filter evaluation, see [`FilterAction::precedence`].
    pub enum FilterAction {
        None => "none",
        Warn => "warn",
        Flag => "flag",
        Hide => "hide",
        Remove => "remove",
        Queue => "queue",
        AutoFilter => "autoFilter",
    }
}

impl FilterAction {
    /// `remove > hide > queue > flag > warn > autoFilter > none`.
    pub fn precedence(&self) -> u8 {
        match self {
            FilterAction::None => 0,
            FilterAction::AutoFilter => 1,
            FilterAction::Warn => 2,
            FilterAction::Flag => 3,
            FilterAction::Queue => 4,
            FilterAction::Hide => 5,
            FilterAction::Remove => 6,
        }
    }

    /// Keeps whichever of the two actions has the higher precedence.
    pub fn combine(self, other: FilterAction) -> FilterAction {
        if other.precedence() > self.precedence() {
            other
        } else {
            self
        }
    }

    /// Actions that put an item into the moderation queue.
    pub fn implies_queue(&self) -> bool {
        matches!(self, FilterAction::Flag | FilterAction::Queue | FilterAction::Hide)
    }

    /// Actions that keep content invisible until a moderator approves it.
    pub fn withholds_publication(&self) -> bool {
        matches!(self, FilterAction::Queue | FilterAction::Hide)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRule {
    pub id: u64,
    pub name: String,
    pub applies_to: RuleScope,
    pub pattern_kind: PatternKind,
    pub pattern: String,
    pub action: FilterAction,
    /// 1 (lowest) to 5.
    pub severity: u8,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewModerationRule {
    pub name: String,
    pub applies_to: RuleScope,
    pub pattern_kind: PatternKind,
    pub pattern: String,
    pub action: FilterAction,
    pub severity: u8,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRulePatch {
    pub name: Option<String>,
    pub applies_to: Option<RuleScope>,
    pub pattern_kind: Option<PatternKind>,
    pub pattern: Option<String>,
    pub action: Option<FilterAction>,
    pub severity: Option<u8>,
    pub is_active: Option<bool>,
}

string_enum! {
    pub enum WordAction {
        Warn => "warn",
        Flag => "flag",
        Block => "block",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProhibitedWord {
    pub id: u64,
    pub word: String,
    pub is_regex: bool,
    pub severity: u8,
    pub action: WordAction,
    pub replacement: Option<String>,
    pub is_auto_replace: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProhibitedWord {
    pub word: String,
    pub is_regex: bool,
    pub severity: u8,
    pub action: WordAction,
    pub replacement: Option<String>,
    pub is_auto_replace: bool,
}

/// `(action, triggeredRuleIds, cleanedBody?, notes)` plus the bookkeeping the queue needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDecision {
    pub action: FilterAction,
    pub triggered_rule_ids: Vec<u64>,
    pub triggered_word_ids: Vec<u64>,
    pub cleaned_body: Option<String>,
    pub notes: Vec<String>,
    /// Highest severity among the triggered rules and words.
    pub severity: Option<u8>,
    /// Queue priority when the action implies queuing.
    pub priority: u8,
}

impl FilterDecision {
    pub fn pass() -> Self {
        Self {
            action: FilterAction::None,
            triggered_rule_ids: Vec::new(),
            triggered_word_ids: Vec::new(),
            cleaned_body: None,
            notes: Vec::new(),
            severity: None,
            priority: 3,
        }
    }

    pub fn triggered_anything(&self) -> bool {
        !self.triggered_rule_ids.is_empty() || !self.triggered_word_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentFilterResult {
    pub id: u64,
    pub target_kind: TargetKind,
    /// `None` when the content was rejected outright and never persisted.
    pub target_id: Option<u64>,
    pub author_id: u64,
    pub triggered_rule_ids: Vec<u64>,
    pub triggered_word_ids: Vec<u64>,
    pub action: FilterAction,
    pub raw_body: String,
    pub cleaned_body: Option<String>,
    pub automatically_processed: bool,
    pub moderator_id: Option<u64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFilterResult {
    pub target_kind: TargetKind,
    pub target_id: Option<u64>,
    pub author_id: u64,
    pub triggered_rule_ids: Vec<u64>,
    pub triggered_word_ids: Vec<u64>,
    pub action: FilterAction,
    pub raw_body: String,
    pub cleaned_body: Option<String>,
    pub created_at: DateTime<Utc>,
}

string_enum! {
    pub enum QueueStatus {
        Pending => "pending",
        InReview => "inReview",
        Approved => "approved",
        Rejected => "rejected",
    }
}

impl QueueStatus {
    /// The explicit transition table of the review state machine.
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Pending, QueueStatus::InReview)
                | (QueueStatus::InReview, QueueStatus::InReview)
                | (QueueStatus::InReview, QueueStatus::Pending)
                | (QueueStatus::InReview, QueueStatus::Approved)
                | (QueueStatus::InReview, QueueStatus::Rejected)
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::InReview)
    }
}

string_enum! {
    pub enum QueueDecision {
        Approve => "approve",
        Reject => "reject",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationQueueItem {
    pub id: u64,
    pub target: TargetRef,
    pub author_id: u64,
    pub reason: String,
    pub filter_result_id: Option<u64>,
    pub status: QueueStatus,
    /// 1 (lowest) to 5.
    pub priority: u8,
    pub assigned_to: Option<u64>,
    pub reviewed_by: Option<u64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub decision: Option<QueueDecision>,
    pub notes: String,
    /// Optimistic-lock counter bumped by every transition.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A queue entry to be created alongside (or for) a piece of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQueueEntry {
    pub target_kind: TargetKind,
    /// Filled in by the store when created together with the content.
    pub target_id: Option<u64>,
    pub author_id: u64,
    pub reason: String,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
}

/// Moderation artefacts persisted in the same transaction as new content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRecord {
    pub filter_result: Option<NewFilterResult>,
    pub queue_entry: Option<NewQueueEntry>,
}

impl ModerationRecord {
    pub fn is_empty(&self) -> bool {
        self.filter_result.is_none() && self.queue_entry.is_none()
    }
}

/// A change to a topic or comment performed as part of a moderation resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ContentMutation {
    /// Clears `isFlagged` and sets `isApproved`.
    Publish,
    /// Sets `isApproved = false` and soft-deletes the content.
    SoftDelete { policy: DeletionPolicy },
    /// Replaces the body and marks the content as edited.
    ReplaceBody { body: String },
}

/// Everything a queue decision writes, applied atomically by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueResolution {
    pub status: QueueStatus,
    pub decision: QueueDecision,
    pub reviewed_by: u64,
    pub notes: String,
    pub mutation: ContentMutation,
    pub user_action: Option<NewUserModerationAction>,
    pub notifications: Vec<NewOutboxMessage>,
    pub reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeratorGrant {
    pub user_id: u64,
    pub is_global: bool,
    pub can_approve_content: bool,
    pub can_reject_content: bool,
    pub can_delete_content: bool,
    pub can_ban_users: bool,
    pub can_edit_any_content: bool,
    pub can_manage_rules: bool,
    pub can_assign_moderators: bool,
    pub is_active: bool,
    pub assigned_by: u64,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ModeratorGrant {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

string_enum! {
    pub enum Permission {
        ApproveContent => "approveContent",
        RejectContent => "rejectContent",
        DeleteContent => "deleteContent",
        BanUsers => "banUsers",
        EditAnyContent => "editAnyContent",
        ManageRules => "manageRules",
        AssignModerators => "assignModerators",
    }
}

/// The resolved set of moderation permissions of one principal in one context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub approve_content: bool,
    pub reject_content: bool,
    pub delete_content: bool,
    pub ban_users: bool,
    pub edit_any_content: bool,
    pub manage_rules: bool,
    pub assign_moderators: bool,
}

impl Permissions {
    pub fn all() -> Self {
        Self {
            approve_content: true,
            reject_content: true,
            delete_content: true,
            ban_users: true,
            edit_any_content: true,
            manage_rules: true,
            assign_moderators: true,
        }
    }

    /// What a bare `moderator` role gets without an explicit grant.
    pub fn moderator_baseline() -> Self {
        Self {
            approve_content: true,
            reject_content: true,
            delete_content: true,
            edit_any_content: true,
            ..Self::default()
        }
    }

    pub fn from_grant(grant: &ModeratorGrant) -> Self {
        Self {
            approve_content: grant.can_approve_content,
            reject_content: grant.can_reject_content,
            delete_content: grant.can_delete_content,
            ban_users: grant.can_ban_users,
            edit_any_content: grant.can_edit_any_content,
            manage_rules: grant.can_manage_rules,
            assign_moderators: grant.can_assign_moderators,
        }
    }

    pub fn union(self, other: Permissions) -> Self {
        Self {
            approve_content: self.approve_content || other.approve_content,
            reject_content: self.reject_content || other.reject_content,
            delete_content: self.delete_content || other.delete_content,
            ban_users: self.ban_users || other.ban_users,
            edit_any_content: self.edit_any_content || other.edit_any_content,
            manage_rules: self.manage_rules || other.manage_rules,
            assign_moderators: self.assign_moderators || other.assign_moderators,
        }
    }

    pub fn has(&self, permission: Permission) -> bool {
        match permission {
            Permission::ApproveContent => self.approve_content,
            Permission::RejectContent => self.reject_content,
            Permission::DeleteContent => self.delete_content,
            Permission::BanUsers => self.ban_users,
            Permission::EditAnyContent => self.edit_any_content,
            Permission::ManageRules => self.manage_rules,
            Permission::AssignModerators => self.assign_moderators,
        }
    }

    /// True when any moderation capability is present.
    pub fn is_moderator(&self) -> bool {
        *self != Permissions::default()
    }
}

string_enum! {
    #[derive(PartialOrd, Ord)]
    pub enum UserActionKind {
        Warn => "warn",
        Mute => "mute",
        Suspend => "suspend",
        TemporaryBan => "temporaryBan",
        PermanentBan => "permanentBan",
    }
}

impl UserActionKind {
    /// Kinds that stop the user from posting while active.
    pub fn blocks_posting(&self) -> bool {
        !matches!(self, UserActionKind::Warn)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserModerationAction {
    pub id: u64,
    pub user_id: u64,
    pub action_kind: UserActionKind,
    pub reason: String,
    pub applied_by: u64,
    pub applied_at: DateTime<Utc>,
    pub duration_hours: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub revoked_by: Option<u64>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub related_target: Option<TargetRef>,
}

impl UserModerationAction {
    pub fn is_in_force(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserModerationAction {
    pub user_id: u64,
    pub action_kind: UserActionKind,
    pub reason: String,
    pub applied_by: u64,
    pub applied_at: DateTime<Utc>,
    pub duration_hours: Option<u32>,
    pub related_target: Option<TargetRef>,
}

impl NewUserModerationAction {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.duration_hours
            .map(|hours| self.applied_at + chrono::Duration::hours(i64::from(hours)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_actions_combine_by_precedence() {
        assert_eq!(FilterAction::Warn.combine(FilterAction::Queue), FilterAction::Queue);
        assert_eq!(FilterAction::Remove.combine(FilterAction::Hide), FilterAction::Remove);
        assert_eq!(FilterAction::None.combine(FilterAction::AutoFilter), FilterAction::AutoFilter);
        assert_eq!(FilterAction::Flag.combine(FilterAction::Warn), FilterAction::Flag);
    }

    #[test]
    fn queue_state_machine_rejects_arbitrary_jumps() {
        assert!(QueueStatus::Pending.can_transition_to(QueueStatus::InReview));
        assert!(QueueStatus::InReview.can_transition_to(QueueStatus::Approved));
        assert!(!QueueStatus::Pending.can_transition_to(QueueStatus::Approved));
        assert!(!QueueStatus::Rejected.can_transition_to(QueueStatus::InReview));
    }

    #[test]
    fn trust_levels_are_ordered() {
        assert!(TrustLevel::NewUser < TrustLevel::Basic);
        assert!(TrustLevel::Regular < TrustLevel::Leader);
        assert_eq!(TrustLevel::Member.rank(), 2);
    }

    #[test]
    fn rule_scope_matches_target_kinds() {
        assert!(RuleScope::All.applies_to(TargetKind::Comment));
        assert!(RuleScope::Topics.applies_to(TargetKind::Topic));
        assert!(!RuleScope::Topics.applies_to(TargetKind::Comment));
    }
}
