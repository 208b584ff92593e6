//! Prohibited-word and rule-pattern filtering of submitted bodies.

use crate::domain::{
    ContentFilterResult, FilterAction, FilterDecision, ModerationRecord, ModerationRule, ModerationRulePatch,
    NewFilterResult, NewModerationRule, NewProhibitedWord, NewQueueEntry, PatternKind, Permission, Principal,
    ProhibitedWord, TargetKind, TargetRef, TrustLevel, WordAction,
};
use crate::error::{FilterRejection, ForumError, ForumResult};
use crate::ports::{Clock, DiscussionStore};
use crate::services::trust::AuthorStanding;
use crate::services::{AccessControl, Ports, TrustEngine};
use crate::settings::ForumSettings;
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PATTERN_SIZE_LIMIT: usize = 1 << 20;
const DEFAULT_SEVERITY: u8 = 3;

//=========================================================================================
// Pattern compilation
//=========================================================================================

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// A case-insensitive literal, word-bounded on the ends that are word characters.
fn bounded(escaped: String, raw: &str) -> String {
    let starts = raw.chars().next().map(is_word_char).unwrap_or(false);
    let ends = raw.chars().last().map(is_word_char).unwrap_or(false);
    format!(
        "{}{}{}",
        if starts { r"\b" } else { "" },
        escaped,
        if ends { r"\b" } else { "" }
    )
}

fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*?"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out
}

fn build(source: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(source)
        .case_insensitive(true)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
}

pub(crate) fn compile_rule(kind: PatternKind, pattern: &str) -> Result<Regex, regex::Error> {
    let source = match kind {
        PatternKind::Exact => bounded(regex::escape(pattern), pattern),
        PatternKind::Regex => pattern.to_string(),
        PatternKind::Wildcard => bounded(wildcard_to_regex(pattern), pattern),
    };
    build(&source)
}

pub(crate) fn compile_word(word: &ProhibitedWord) -> Result<Regex, regex::Error> {
    if word.is_regex {
        build(&word.word)
    } else {
        build(&bounded(regex::escape(&word.word), &word.word))
    }
}

fn word_action(action: WordAction) -> FilterAction {
    match action {
        WordAction::Block => FilterAction::Remove,
        WordAction::Flag => FilterAction::Queue,
        WordAction::Warn => FilterAction::Warn,
    }
}

//=========================================================================================
// Decision
//=========================================================================================

/// Evaluates `body` against the active words and rules, then applies the
/// author's standing. Pure; nothing is persisted.
pub fn decide(
    target_kind: TargetKind,
    body: &str,
    rules: &[ModerationRule],
    words: &[ProhibitedWord],
    standing: AuthorStanding,
) -> FilterDecision {
    let mut decision = FilterDecision::pass();
    if body.trim().is_empty() {
        return decision;
    }

    let mut severity: Option<u8> = None;
    let mut cleaned = body.to_string();
    let mut replaced = false;
    let mut word_outcome = FilterAction::None;

    for word in words.iter().filter(|w| w.is_active) {
        let pattern = match compile_word(word) {
            Ok(pattern) => pattern,
            Err(err) => {
                warn!(word_id = word.id, error = %err, "Skipping prohibited word that fails to compile");
                continue;
            }
        };
        if !pattern.is_match(body) {
            continue;
        }
        decision.triggered_word_ids.push(word.id);
        severity = severity.max(Some(word.severity));
        word_outcome = word_outcome.combine(word_action(word.action));
        match (&word.replacement, word.is_auto_replace) {
            (Some(replacement), true) => {
                cleaned = pattern
                    .replace_all(&cleaned, regex::NoExpand(replacement.as_str()))
                    .into_owned();
                replaced = true;
                decision.notes.push(format!("prohibited word {} replaced", word.id));
            }
            _ => decision.notes.push(format!("prohibited word {} ({})", word.id, word.action)),
        }
    }
    if word_outcome == FilterAction::Warn && replaced {
        word_outcome = FilterAction::AutoFilter;
    }
    if replaced {
        decision.cleaned_body = Some(cleaned);
    }

    let mut rule_outcome = FilterAction::None;
    let mut ordered: Vec<&ModerationRule> = rules
        .iter()
        .filter(|r| r.is_active && r.applies_to.applies_to(target_kind))
        .collect();
    ordered.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.id.cmp(&b.id)));
    for rule in ordered {
        let pattern = match compile_rule(rule.pattern_kind, &rule.pattern) {
            Ok(pattern) => pattern,
            Err(err) => {
                warn!(rule_id = rule.id, error = %err, "Skipping rule that fails to compile");
                continue;
            }
        };
        if pattern.is_match(body) {
            decision.triggered_rule_ids.push(rule.id);
            severity = severity.max(Some(rule.severity));
            rule_outcome = rule_outcome.combine(rule.action);
            decision.notes.push(format!("rule '{}' matched ({})", rule.name, rule.action));
        }
    }

    let mut action = word_outcome.combine(rule_outcome);

    if standing.level == TrustLevel::Leader && !standing.recent_infraction {
        action = match action {
            FilterAction::Warn | FilterAction::Flag if decision.cleaned_body.is_some() => FilterAction::AutoFilter,
            FilterAction::Warn | FilterAction::Flag => FilterAction::None,
            FilterAction::Queue => FilterAction::Warn,
            other => other,
        };
    } else if standing.level == TrustLevel::NewUser && action == FilterAction::Warn {
        action = FilterAction::Queue;
    }

    let base = i16::from(severity.unwrap_or(DEFAULT_SEVERITY));
    let offset = 2 - i16::from(standing.level.rank());
    decision.priority = (base + offset).clamp(1, 5) as u8;
    decision.severity = severity;
    decision.action = action;
    decision
}

/// Filter result and queue entry to persist together with new or edited content.
pub fn moderation_record(
    target_kind: TargetKind,
    target_id: Option<u64>,
    author_id: u64,
    raw_body: &str,
    decision: &FilterDecision,
    now: DateTime<Utc>,
) -> ModerationRecord {
    let filter_result = decision.triggered_anything().then(|| NewFilterResult {
        target_kind,
        target_id,
        author_id,
        triggered_rule_ids: decision.triggered_rule_ids.clone(),
        triggered_word_ids: decision.triggered_word_ids.clone(),
        action: decision.action,
        raw_body: raw_body.to_string(),
        cleaned_body: decision.cleaned_body.clone(),
        created_at: now,
    });
    let queue_entry = decision.action.implies_queue().then(|| NewQueueEntry {
        target_kind,
        target_id,
        author_id,
        reason: if decision.notes.is_empty() {
            format!("content filter: {}", decision.action)
        } else {
            decision.notes.join("; ")
        },
        priority: decision.priority,
        created_at: now,
    });
    ModerationRecord { filter_result, queue_entry }
}

//=========================================================================================
// ContentFilter
//=========================================================================================

pub struct ContentFilter {
    store: Arc<dyn DiscussionStore>,
    clock: Arc<dyn Clock>,
    access: Arc<AccessControl>,
    trust: Arc<TrustEngine>,
    settings: Arc<ForumSettings>,
}

impl ContentFilter {
    pub fn new(
        ports: &Ports,
        access: Arc<AccessControl>,
        trust: Arc<TrustEngine>,
        settings: Arc<ForumSettings>,
    ) -> Self {
        Self {
            store: ports.store.clone(),
            clock: ports.clock.clone(),
            access,
            trust,
            settings,
        }
    }

    /// `evaluate(targetKind, rawBody, authorId) → FilterDecision`.
    pub async fn evaluate(&self, target_kind: TargetKind, raw_body: &str, author_id: u64) -> ForumResult<FilterDecision> {
        if raw_body.len() > self.settings.max_body_bytes {
            return Err(ForumError::validation(format!(
                "body exceeds {} bytes",
                self.settings.max_body_bytes
            )));
        }
        if raw_body.trim().is_empty() {
            return Ok(FilterDecision::pass());
        }
        let rules = self.store.list_rules(true).await?;
        let words = self.store.list_words(true).await?;
        let standing = self.trust.standing(author_id).await?;
        let decision = decide(target_kind, raw_body, &rules, &words, standing);
        if decision.triggered_anything() {
            info!(
                author_id,
                target_kind = %target_kind,
                action = %decision.action,
                rules = ?decision.triggered_rule_ids,
                words = ?decision.triggered_word_ids,
                "Content filter triggered"
            );
        } else {
            debug!(author_id, target_kind = %target_kind, "Content filter passed");
        }
        Ok(decision)
    }

    /// Records a `remove` decision for content that was never stored and
    /// returns the error to hand back to the author.
    pub async fn reject(
        &self,
        target_kind: TargetKind,
        author_id: u64,
        raw_body: &str,
        decision: &FilterDecision,
    ) -> ForumResult<ForumError> {
        let record = moderation_record(target_kind, None, author_id, raw_body, decision, self.clock.now());
        if let Some(result) = record.filter_result {
            self.store.create_filter_result(result).await?;
        }
        Ok(ForumError::InvalidContent(FilterRejection {
            triggered_rule_ids: decision.triggered_rule_ids.clone(),
            triggered_word_ids: decision.triggered_word_ids.clone(),
            notes: decision.notes.clone(),
        }))
    }

    /// Runs the filter for `principal` without persisting anything.
    pub async fn dry_run(
        &self,
        principal: &Principal,
        target_kind: TargetKind,
        raw_body: &str,
        author_id: Option<u64>,
    ) -> ForumResult<FilterDecision> {
        self.access.require(principal, Permission::ManageRules, None).await?;
        self.evaluate(target_kind, raw_body, author_id.unwrap_or(principal.user_id)).await
    }

    //-------------------------------------------------------------------------------------
    // Rule and word administration
    //-------------------------------------------------------------------------------------

    pub async fn list_rules(&self, principal: &Principal) -> ForumResult<Vec<ModerationRule>> {
        self.access.require_moderator(principal, None).await?;
        Ok(self.store.list_rules(false).await?)
    }

    pub async fn create_rule(&self, principal: &Principal, rule: NewModerationRule) -> ForumResult<ModerationRule> {
        self.access.require(principal, Permission::ManageRules, None).await?;
        validate_rule(&rule.name, rule.pattern_kind, &rule.pattern, rule.severity)?;
        let created = self.store.create_rule(rule, self.clock.now()).await?;
        info!(rule_id = created.id, by = principal.user_id, "Moderation rule created");
        Ok(created)
    }

    pub async fn update_rule(
        &self,
        principal: &Principal,
        id: u64,
        patch: ModerationRulePatch,
    ) -> ForumResult<ModerationRule> {
        self.access.require(principal, Permission::ManageRules, None).await?;
        let current = self.store.get_rule(id).await?;
        validate_rule(
            patch.name.as_deref().unwrap_or(&current.name),
            patch.pattern_kind.unwrap_or(current.pattern_kind),
            patch.pattern.as_deref().unwrap_or(&current.pattern),
            patch.severity.unwrap_or(current.severity),
        )?;
        Ok(self.store.update_rule(id, patch, self.clock.now()).await?)
    }

    pub async fn delete_rule(&self, principal: &Principal, id: u64) -> ForumResult<()> {
        self.access.require(principal, Permission::ManageRules, None).await?;
        self.store.delete_rule(id).await?;
        info!(rule_id = id, by = principal.user_id, "Moderation rule deleted");
        Ok(())
    }

    pub async fn list_words(&self, principal: &Principal) -> ForumResult<Vec<ProhibitedWord>> {
        self.access.require_moderator(principal, None).await?;
        Ok(self.store.list_words(false).await?)
    }

    pub async fn create_word(&self, principal: &Principal, word: NewProhibitedWord) -> ForumResult<ProhibitedWord> {
        self.access.require(principal, Permission::ManageRules, None).await?;
        if word.word.trim().is_empty() {
            return Err(ForumError::validation("word must not be empty"));
        }
        if !(1..=5).contains(&word.severity) {
            return Err(ForumError::validation("severity must be between 1 and 5"));
        }
        if word.is_auto_replace && word.replacement.is_none() {
            return Err(ForumError::validation("auto-replace needs a replacement"));
        }
        if word.is_regex {
            build(&word.word).map_err(|err| ForumError::validation(format!("invalid pattern: {err}")))?;
        }
        Ok(self.store.create_word(word, self.clock.now()).await?)
    }

    pub async fn delete_word(&self, principal: &Principal, id: u64) -> ForumResult<()> {
        self.access.require(principal, Permission::ManageRules, None).await?;
        Ok(self.store.delete_word(id).await?)
    }

    pub async fn results_for(&self, principal: &Principal, target: TargetRef) -> ForumResult<Vec<ContentFilterResult>> {
        self.access.require_moderator(principal, None).await?;
        Ok(self.store.list_filter_results(target.kind, target.id).await?)
    }
}

fn validate_rule(name: &str, kind: PatternKind, pattern: &str, severity: u8) -> ForumResult<()> {
    if name.trim().is_empty() {
        return Err(ForumError::validation("rule name must not be empty"));
    }
    if pattern.is_empty() {
        return Err(ForumError::validation("pattern must not be empty"));
    }
    if !(1..=5).contains(&severity) {
        return Err(ForumError::validation("severity must be between 1 and 5"));
    }
    compile_rule(kind, pattern).map_err(|err| ForumError::validation(format!("invalid pattern: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RuleScope;

    fn member() -> AuthorStanding {
        AuthorStanding { level: TrustLevel::Member, recent_infraction: false }
    }

    fn word(id: u64, text: &str, action: WordAction, replacement: Option<&str>) -> ProhibitedWord {
        ProhibitedWord {
            id,
            word: text.into(),
            is_regex: false,
            severity: 2,
            action,
            replacement: replacement.map(str::to_string),
            is_auto_replace: replacement.is_some(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn rule(id: u64, kind: PatternKind, pattern: &str, action: FilterAction, severity: u8) -> ModerationRule {
        ModerationRule {
            id,
            name: format!("rule {id}"),
            applies_to: RuleScope::All,
            pattern_kind: kind,
            pattern: pattern.into(),
            action,
            severity,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn auto_replace_rewrites_every_occurrence() {
        let words = [word(7, "badword", WordAction::Warn, Some("****"))];
        let decision = decide(TargetKind::Comment, "hello badword, BADWORD!", &[], &words, member());
        assert_eq!(decision.action, FilterAction::AutoFilter);
        assert_eq!(decision.cleaned_body.as_deref(), Some("hello ****, ****!"));
        assert_eq!(decision.triggered_word_ids, vec![7]);
    }

    #[test]
    fn literal_words_respect_word_boundaries() {
        let words = [word(1, "ass", WordAction::Flag, None)];
        let decision = decide(TargetKind::Comment, "a classic assessment", &[], &words, member());
        assert_eq!(decision.action, FilterAction::None);
        assert!(!decision.triggered_anything());
    }

    #[test]
    fn block_beats_flag() {
        let words = [
            word(1, "spam", WordAction::Flag, None),
            word(2, "scam", WordAction::Block, None),
        ];
        let decision = decide(TargetKind::Topic, "spam and scam", &[], &words, member());
        assert_eq!(decision.action, FilterAction::Remove);
    }

    #[test]
    fn rules_combine_by_precedence() {
        let rules = [
            rule(1, PatternKind::Exact, "buy now", FilterAction::Flag, 2),
            rule(2, PatternKind::Wildcard, "free*money", FilterAction::Hide, 4),
        ];
        let decision = decide(TargetKind::Topic, "Buy now: free easy money", &[], &[], member());
        assert_eq!(decision.action, FilterAction::None);
        let decision = decide(TargetKind::Topic, "Buy now: free easy money", &rules, &[], member());
        assert_eq!(decision.action, FilterAction::Hide);
        assert_eq!(decision.triggered_rule_ids, vec![2, 1]);
        assert_eq!(decision.severity, Some(4));
    }

    #[test]
    fn broken_regex_rules_are_skipped() {
        let rules = [
            rule(1, PatternKind::Regex, "(unclosed", FilterAction::Remove, 5),
            rule(2, PatternKind::Regex, r"\d{4}-\d{4}", FilterAction::Flag, 3),
        ];
        let decision = decide(TargetKind::Comment, "call 1234-5678", &rules, &[], member());
        assert_eq!(decision.action, FilterAction::Flag);
        assert_eq!(decision.triggered_rule_ids, vec![2]);
    }

    #[test]
    fn rules_scoped_to_topics_ignore_comments() {
        let mut scoped = rule(1, PatternKind::Exact, "offtopic", FilterAction::Queue, 3);
        scoped.applies_to = RuleScope::Topics;
        let decision = decide(TargetKind::Comment, "offtopic", &[scoped], &[], member());
        assert_eq!(decision.action, FilterAction::None);
    }

    #[test]
    fn trusted_leaders_skip_warnings_and_soften_queueing() {
        let leader = AuthorStanding { level: TrustLevel::Leader, recent_infraction: false };
        let rules = [rule(1, PatternKind::Exact, "hmm", FilterAction::Warn, 2)];
        assert_eq!(decide(TargetKind::Comment, "hmm", &rules, &[], leader).action, FilterAction::None);

        let rules = [rule(1, PatternKind::Exact, "hmm", FilterAction::Queue, 2)];
        assert_eq!(decide(TargetKind::Comment, "hmm", &rules, &[], leader).action, FilterAction::Warn);

        let reprimanded = AuthorStanding { level: TrustLevel::Leader, recent_infraction: true };
        assert_eq!(decide(TargetKind::Comment, "hmm", &rules, &[], reprimanded).action, FilterAction::Queue);
    }

    #[test]
    fn new_users_are_queued_instead_of_warned() {
        let newcomer = AuthorStanding { level: TrustLevel::NewUser, recent_infraction: false };
        let rules = [rule(1, PatternKind::Exact, "hmm", FilterAction::Warn, 3)];
        let decision = decide(TargetKind::Comment, "hmm", &rules, &[], newcomer);
        assert_eq!(decision.action, FilterAction::Queue);
        assert_eq!(decision.priority, 5);
    }

    #[test]
    fn empty_bodies_pass() {
        let rules = [rule(1, PatternKind::Regex, ".*", FilterAction::Remove, 5)];
        assert_eq!(decide(TargetKind::Topic, "   ", &rules, &[], member()), FilterDecision::pass());
    }

    #[test]
    fn moderation_record_queues_flagged_content() {
        let rules = [rule(3, PatternKind::Exact, "link", FilterAction::Flag, 3)];
        let decision = decide(TargetKind::Comment, "a link", &rules, &[], member());
        let record = moderation_record(TargetKind::Comment, None, 9, "a link", &decision, Utc::now());
        let result = record.filter_result.unwrap();
        assert_eq!(result.triggered_rule_ids, vec![3]);
        assert_eq!(record.queue_entry.unwrap().priority, 3);
    }
}
