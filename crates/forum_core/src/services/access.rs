//! Resolves what a principal may do, globally or inside a category.

use crate::domain::{Permission, Permissions, Principal, Role, TargetKind, TargetRef};
use crate::error::{ForumError, ForumResult};
use crate::ports::{Clock, DiscussionStore, PortError};
use crate::services::Ports;
use std::collections::HashSet;
use std::sync::Arc;

pub struct AccessControl {
    store: Arc<dyn DiscussionStore>,
    clock: Arc<dyn Clock>,
}

impl AccessControl {
    pub fn new(ports: &Ports) -> Self {
        Self {
            store: ports.store.clone(),
            clock: ports.clock.clone(),
        }
    }

    /// Permissions of `principal`, optionally scoped to a category.
    ///
    /// Admins hold everything and guests nothing. An effective grant applies
    /// when it is global or the user moderates the category (or one of its
    /// ancestors); category moderators without a grant and bare `moderator`
    /// roles get the baseline set.
    pub async fn permissions(&self, principal: &Principal, category_id: Option<u64>) -> ForumResult<Permissions> {
        match principal.role {
            Role::Admin => return Ok(Permissions::all()),
            Role::Guest => return Ok(Permissions::default()),
            Role::Member | Role::Moderator => {}
        }

        let now = self.clock.now();
        let grant = self
            .store
            .get_moderator_grant(principal.user_id)
            .await?
            .filter(|grant| grant.is_effective(now));
        let moderates_here = match category_id {
            Some(category_id) => self.moderates_category(principal.user_id, category_id).await?,
            None => false,
        };

        let mut permissions = Permissions::default();
        if let Some(grant) = &grant {
            if grant.is_global || moderates_here {
                permissions = permissions.union(Permissions::from_grant(grant));
            }
        } else if moderates_here {
            permissions = permissions.union(Permissions::moderator_baseline());
        }
        if principal.role == Role::Moderator {
            permissions = permissions.union(Permissions::moderator_baseline());
        }
        Ok(permissions)
    }

    pub async fn has(&self, principal: &Principal, permission: Permission, category_id: Option<u64>) -> ForumResult<bool> {
        Ok(self.permissions(principal, category_id).await?.has(permission))
    }

    /// Fails with `unauthenticated` for guests and `forbidden` otherwise.
    pub async fn require(
        &self,
        principal: &Principal,
        permission: Permission,
        category_id: Option<u64>,
    ) -> ForumResult<Permissions> {
        if principal.is_guest() {
            return Err(ForumError::Unauthenticated);
        }
        let permissions = self.permissions(principal, category_id).await?;
        if permissions.has(permission) {
            Ok(permissions)
        } else {
            Err(ForumError::forbidden(format!("missing permission {permission}")))
        }
    }

    /// Any moderation capability at all.
    pub async fn require_moderator(&self, principal: &Principal, category_id: Option<u64>) -> ForumResult<Permissions> {
        if principal.is_guest() {
            return Err(ForumError::Unauthenticated);
        }
        let permissions = self.permissions(principal, category_id).await?;
        if permissions.is_moderator() {
            Ok(permissions)
        } else {
            Err(ForumError::forbidden("moderator access required"))
        }
    }

    pub fn require_admin(&self, principal: &Principal) -> ForumResult<()> {
        match principal.role {
            Role::Admin => Ok(()),
            Role::Guest => Err(ForumError::Unauthenticated),
            _ => Err(ForumError::forbidden("admin access required")),
        }
    }

    pub fn require_member(&self, principal: &Principal) -> ForumResult<()> {
        if principal.is_guest() {
            Err(ForumError::Unauthenticated)
        } else {
            Ok(())
        }
    }

    /// Fails with `forbidden` while a suspension, ban or mute is in force.
    pub async fn ensure_can_post(&self, user_id: u64) -> ForumResult<()> {
        let now = self.clock.now();
        let blocking = self
            .store
            .list_user_actions(user_id)
            .await?
            .into_iter()
            .filter(|action| action.action_kind.blocks_posting() && action.is_in_force(now))
            .max_by_key(|action| action.action_kind);
        match blocking {
            Some(action) => Err(ForumError::forbidden(match action.expires_at {
                Some(until) => format!("posting blocked by {} until {}", action.action_kind, until.to_rfc3339()),
                None => format!("posting blocked by {}", action.action_kind),
            })),
            None => Ok(()),
        }
    }

    /// Category of the topic a target belongs to, deleted content included.
    pub async fn category_of(&self, target: TargetRef) -> ForumResult<u64> {
        let topic_id = match target.kind {
            TargetKind::Topic => target.id,
            TargetKind::Comment => self.store.get_comment(target.id).await?.topic_id,
        };
        Ok(self.store.get_topic(topic_id).await?.category_id)
    }

    /// True when the user moderates `category_id` or any of its ancestors.
    async fn moderates_category(&self, user_id: u64, category_id: u64) -> ForumResult<bool> {
        let moderated: HashSet<u64> = self.store.moderated_categories(user_id).await?.into_iter().collect();
        if moderated.is_empty() {
            return Ok(false);
        }
        let mut seen = HashSet::new();
        let mut current = Some(category_id);
        while let Some(id) = current {
            if moderated.contains(&id) {
                return Ok(true);
            }
            if !seen.insert(id) {
                break;
            }
            current = match self.store.get_category(id).await {
                Ok(category) => category.parent_id,
                Err(PortError::NotFound(_)) => None,
                Err(err) => return Err(err.into()),
            };
        }
        Ok(false)
    }
}
