//! Category tree, category configuration and category moderators.

use super::{resolve_config, Discussion};
use crate::domain::{
    Category, CategoryConfig, CategoryModerator, CategoryPatch, DeletionPolicy, NewCategory, Permission, Principal,
    TrustLevel,
};
use crate::error::{ForumError, ForumResult};
use crate::ports::PortError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::info;

static SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid slug pattern"));

const MAX_NAME_CHARS: usize = 100;

pub(crate) fn validate_slug(slug: &str) -> ForumResult<()> {
    if SLUG.is_match(slug) && slug.len() <= MAX_NAME_CHARS {
        Ok(())
    } else {
        Err(ForumError::validation(format!(
            "slug '{slug}' must be lowercase letters, digits and single dashes"
        )))
    }
}

pub(crate) fn validate_name(name: &str) -> ForumResult<()> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
        Err(ForumError::validation(format!(
            "name must be between 1 and {MAX_NAME_CHARS} characters"
        )))
    } else {
        Ok(())
    }
}

/// Writable fields of a category's own config.
#[derive(Debug, Clone)]
pub struct CategoryConfigInput {
    pub is_restricted: bool,
    pub require_approval: bool,
    pub min_account_age_hours: u32,
    pub min_trust_level: TrustLevel,
    pub max_topics_per_hour: Option<u32>,
    pub max_comments_per_hour: Option<u32>,
    pub edit_window_minutes: Option<u32>,
    pub deletion_policy: DeletionPolicy,
    pub auto_moderation: bool,
}

impl Discussion {
    /// Active categories ordered by `sortOrder`; admins also see archived ones.
    pub async fn list_categories(&self, principal: &Principal) -> ForumResult<Vec<Category>> {
        let mut categories = self.store.list_categories().await?;
        if !principal.is_admin() {
            categories.retain(|c| c.is_active);
        }
        categories.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.id.cmp(&b.id)));
        Ok(categories)
    }

    pub async fn get_category(&self, principal: &Principal, id: u64) -> ForumResult<Category> {
        let category = self.store.get_category(id).await?;
        if !category.is_active && !principal.is_admin() {
            return Err(ForumError::not_found(format!("category {id}")));
        }
        Ok(category)
    }

    pub async fn create_category(&self, principal: &Principal, category: NewCategory) -> ForumResult<Category> {
        self.access.require_admin(principal)?;
        validate_name(&category.name)?;
        validate_slug(&category.slug)?;
        if let Some(parent_id) = category.parent_id {
            self.store.get_category(parent_id).await?;
        }
        let created = self.store.create_category(category, self.clock.now()).await?;
        info!(category_id = created.id, slug = %created.slug, by = principal.user_id, "Category created");
        Ok(created)
    }

    /// Re-parenting under the category itself or one of its descendants is rejected.
    pub async fn update_category(&self, principal: &Principal, id: u64, patch: CategoryPatch) -> ForumResult<Category> {
        self.access.require_admin(principal)?;
        self.store.get_category(id).await?;
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        if let Some(slug) = &patch.slug {
            validate_slug(slug)?;
        }
        if let Some(Some(parent_id)) = patch.parent_id {
            self.ensure_not_descendant(id, parent_id).await?;
        }
        let updated = self.store.update_category(id, patch, self.clock.now()).await?;
        info!(category_id = id, by = principal.user_id, "Category updated");
        Ok(updated)
    }

    async fn ensure_not_descendant(&self, id: u64, new_parent: u64) -> ForumResult<()> {
        let mut seen = HashSet::new();
        let mut current = Some(new_parent);
        while let Some(ancestor) = current {
            if ancestor == id || !seen.insert(ancestor) {
                return Err(ForumError::validation(format!(
                    "category {new_parent} cannot become the parent of {id}"
                )));
            }
            current = match self.store.get_category(ancestor).await {
                Ok(category) => category.parent_id,
                Err(PortError::NotFound(_)) if ancestor == new_parent => {
                    return Err(ForumError::not_found(format!("category {new_parent}")));
                }
                Err(PortError::NotFound(_)) => None,
                Err(err) => return Err(err.into()),
            };
        }
        Ok(())
    }

    /// The effective, inherited config.
    pub async fn category_config(&self, id: u64) -> ForumResult<CategoryConfig> {
        resolve_config(self.store.as_ref(), id, self.clock.now()).await
    }

    pub async fn set_category_config(
        &self,
        principal: &Principal,
        id: u64,
        input: CategoryConfigInput,
    ) -> ForumResult<CategoryConfig> {
        self.access.require_admin(principal)?;
        self.store.get_category(id).await?;
        if input.max_topics_per_hour == Some(0) || input.max_comments_per_hour == Some(0) {
            return Err(ForumError::validation("hourly limits must be at least 1"));
        }
        let config = self
            .store
            .upsert_category_config(CategoryConfig {
                category_id: id,
                is_restricted: input.is_restricted,
                require_approval: input.require_approval,
                min_account_age_hours: input.min_account_age_hours,
                min_trust_level: input.min_trust_level,
                max_topics_per_hour: input.max_topics_per_hour,
                max_comments_per_hour: input.max_comments_per_hour,
                edit_window_minutes: input.edit_window_minutes,
                deletion_policy: input.deletion_policy,
                auto_moderation: input.auto_moderation,
                updated_at: self.clock.now(),
            })
            .await?;
        info!(category_id = id, by = principal.user_id, "Category config saved");
        Ok(config)
    }

    pub async fn add_category_moderator(
        &self,
        principal: &Principal,
        category_id: u64,
        user_id: u64,
    ) -> ForumResult<CategoryModerator> {
        self.access
            .require(principal, Permission::AssignModerators, Some(category_id))
            .await?;
        self.store.get_category(category_id).await?;
        self.users.get_user(user_id).await?;
        let moderator = self
            .store
            .add_category_moderator(CategoryModerator {
                category_id,
                user_id,
                assigned_by: principal.user_id,
                assigned_at: self.clock.now(),
            })
            .await?;
        info!(category_id, user_id, by = principal.user_id, "Category moderator added");
        Ok(moderator)
    }

    /// Removing someone who is not a moderator is a no-op.
    pub async fn remove_category_moderator(
        &self,
        principal: &Principal,
        category_id: u64,
        user_id: u64,
    ) -> ForumResult<()> {
        self.access
            .require(principal, Permission::AssignModerators, Some(category_id))
            .await?;
        if self.store.remove_category_moderator(category_id, user_id).await? {
            info!(category_id, user_id, by = principal.user_id, "Category moderator removed");
        }
        Ok(())
    }

    pub async fn list_category_moderators(&self, category_id: u64) -> ForumResult<Vec<CategoryModerator>> {
        self.store.get_category(category_id).await?;
        Ok(self.store.list_category_moderators(category_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_lowercase_dash_separated() {
        assert!(validate_slug("book-club").is_ok());
        assert!(validate_slug("chapter-12").is_ok());
        assert!(validate_slug("Book-Club").is_err());
        assert!(validate_slug("double--dash").is_err());
        assert!(validate_slug("-leading").is_err());
        assert!(validate_slug("").is_err());
    }

    #[test]
    fn names_must_not_be_blank() {
        assert!(validate_name("General").is_ok());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_CHARS + 1)).is_err());
    }
}
