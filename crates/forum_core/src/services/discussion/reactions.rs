//! Reactions on topics and comments, and the tag vocabulary.

use super::categories::{validate_name, validate_slug};
use super::Discussion;
use crate::domain::{
    NewTag, Permission, Principal, Reaction, ReactionKind, ReactionOutcome, ReactionSummary, Tag, TagPatch,
    TargetKind, TargetRef,
};
use crate::error::{ForumError, ForumResult};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

static COLOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("valid color pattern"));

fn validate_color(color: &str) -> ForumResult<()> {
    if COLOR.is_match(color) {
        Ok(())
    } else {
        Err(ForumError::validation(format!("color '{color}' must look like #1a2b3c")))
    }
}

impl Discussion {
    //=====================================================================================
    // Reactions
    //=====================================================================================

    /// Re-adding a kind the user already holds is a no-op. Under the
    /// single-kind policy a different kind replaces the previous one.
    pub async fn add_reaction(
        &self,
        principal: &Principal,
        target: TargetRef,
        kind: ReactionKind,
    ) -> ForumResult<ReactionOutcome> {
        self.access.require_member(principal)?;
        let author_id = self.ensure_reactable(principal, target).await?;
        let outcome = self
            .store
            .add_reaction(
                Reaction {
                    user_id: principal.user_id,
                    target,
                    kind,
                    created_at: self.clock.now(),
                },
                self.settings.reaction_policy,
            )
            .await?;
        debug!(user_id = principal.user_id, target = %target, kind = %kind, ?outcome, "Reaction added");

        if outcome == ReactionOutcome::Added && author_id != principal.user_id {
            if let Err(err) = self.trust.record_reaction_received(author_id).await {
                warn!(user_id = author_id, error = %err, "Reaction burst check failed");
            }
        }
        Ok(outcome)
    }

    /// Removing a reaction that is not there succeeds.
    pub async fn remove_reaction(&self, principal: &Principal, target: TargetRef, kind: ReactionKind) -> ForumResult<()> {
        self.access.require_member(principal)?;
        let removed = self.store.remove_reaction(principal.user_id, target, kind).await?;
        debug!(user_id = principal.user_id, target = %target, kind = %kind, removed, "Reaction removed");
        Ok(())
    }

    pub async fn reaction_summary(&self, principal: &Principal, target: TargetRef) -> ForumResult<ReactionSummary> {
        self.ensure_reactable(principal, target).await?;
        Ok(self.store.reaction_summary(target).await?)
    }

    /// Returns the author of the visible target.
    async fn ensure_reactable(&self, principal: &Principal, target: TargetRef) -> ForumResult<u64> {
        Ok(match target.kind {
            TargetKind::Topic => self.get_topic(principal, target.id).await?.author_id,
            TargetKind::Comment => self.get_comment(principal, target.id).await?.author_id,
        })
    }

    //=====================================================================================
    // Tags
    //=====================================================================================

    pub async fn list_tags(&self) -> ForumResult<Vec<Tag>> {
        let mut tags = self.store.list_tags().await?;
        tags.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(tags)
    }

    pub async fn create_tag(&self, principal: &Principal, tag: NewTag) -> ForumResult<Tag> {
        self.access.require(principal, Permission::ManageRules, None).await?;
        validate_name(&tag.name)?;
        validate_slug(&tag.slug)?;
        validate_color(&tag.color)?;
        if tag.is_system {
            self.access.require_admin(principal)?;
        }
        let created = self.store.create_tag(tag, self.clock.now()).await?;
        info!(tag_id = created.id, slug = %created.slug, by = principal.user_id, "Tag created");
        Ok(created)
    }

    pub async fn update_tag(&self, principal: &Principal, id: u64, patch: TagPatch) -> ForumResult<Tag> {
        self.access.require(principal, Permission::ManageRules, None).await?;
        let tag = self.store.get_tag(id).await?;
        if tag.is_system {
            self.access.require_admin(principal)?;
        }
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        if let Some(slug) = &patch.slug {
            validate_slug(slug)?;
        }
        if let Some(color) = &patch.color {
            validate_color(color)?;
        }
        Ok(self.store.update_tag(id, patch, self.clock.now()).await?)
    }

    /// System tags may only be removed by an admin.
    pub async fn delete_tag(&self, principal: &Principal, id: u64) -> ForumResult<()> {
        self.access.require(principal, Permission::ManageRules, None).await?;
        let tag = self.store.get_tag(id).await?;
        if tag.is_system {
            self.access.require_admin(principal)?;
        }
        self.store.delete_tag(id).await?;
        info!(tag_id = id, by = principal.user_id, "Tag deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_colors_are_hex_triplets() {
        assert!(validate_color("#1a2B3c").is_ok());
        assert!(validate_color("1a2b3c").is_err());
        assert!(validate_color("#abc").is_err());
    }
}
