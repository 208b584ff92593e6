//! services/api/src/adapters/directory.rs
//!
//! In-memory stand-ins for the identity, book-content and upload
//! collaborators, used by the memory backend and the test suites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forum_core::domain::{AttachmentInfo, ContentKind, ContentMetadata, UserProfile};
use forum_core::ports::{
    AttachmentInspector, ContentMetadataService, PortError, PortResult, UserDirectory,
};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct Entries {
    users: HashMap<u64, UserProfile>,
    content: HashMap<(ContentKind, u64), ContentMetadata>,
    attachments: HashMap<String, AttachmentInfo>,
}

/// Users, content metadata and attachments registered up front.
///
/// A permissive directory answers for unregistered users and content with
/// generated placeholders instead of `NotFound`.
#[derive(Default)]
pub struct StaticDirectory {
    entries: RwLock<Entries>,
    permissive_since: Option<DateTime<Utc>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown users are treated as having joined at `since`.
    pub fn permissive(since: DateTime<Utc>) -> Self {
        Self {
            entries: RwLock::default(),
            permissive_since: Some(since),
        }
    }

    pub fn add_user(&self, id: u64, handle: &str, created_at: DateTime<Utc>) {
        self.write().users.insert(
            id,
            UserProfile {
                id,
                handle: handle.to_string(),
                created_at,
            },
        );
    }

    pub fn add_content(&self, kind: ContentKind, id: u64, metadata: ContentMetadata) {
        self.write().content.insert((kind, id), metadata);
    }

    pub fn add_attachment(&self, info: AttachmentInfo) {
        self.write().attachments.insert(info.handle.clone(), info);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn get_user(&self, user_id: u64) -> PortResult<UserProfile> {
        if let Some(user) = self.read().users.get(&user_id) {
            return Ok(user.clone());
        }
        match self.permissive_since {
            Some(since) => Ok(UserProfile {
                id: user_id,
                handle: format!("user{user_id}"),
                created_at: since,
            }),
            None => Err(PortError::not_found(format!("user {user_id}"))),
        }
    }

    async fn find_by_handles(&self, handles: &[String]) -> PortResult<Vec<UserProfile>> {
        let entries = self.read();
        let mut found: Vec<UserProfile> = entries
            .users
            .values()
            .filter(|user| handles.iter().any(|h| h.eq_ignore_ascii_case(&user.handle)))
            .cloned()
            .collect();
        found.sort_by_key(|user| user.id);
        Ok(found)
    }
}

#[async_trait]
impl ContentMetadataService for StaticDirectory {
    async fn get_content_metadata(&self, kind: ContentKind, id: u64) -> PortResult<ContentMetadata> {
        if let Some(metadata) = self.read().content.get(&(kind, id)) {
            return Ok(metadata.clone());
        }
        match self.permissive_since {
            Some(_) => Ok(ContentMetadata {
                title: format!("{kind} {id}"),
                summary: String::new(),
                owner_id: 0,
                tags: Vec::new(),
            }),
            None => Err(PortError::not_found(format!("{kind} {id}"))),
        }
    }
}

#[async_trait]
impl AttachmentInspector for StaticDirectory {
    async fn describe(&self, handle: &str) -> PortResult<Option<AttachmentInfo>> {
        Ok(self.read().attachments.get(handle).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn handles_match_case_insensitively() {
        let directory = StaticDirectory::new();
        let joined = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        directory.add_user(1, "Ada", joined);
        directory.add_user(2, "grace", joined);

        let found = directory
            .find_by_handles(&["ada".to_string(), "GRACE".to_string(), "linus".to_string()])
            .await
            .unwrap();
        assert_eq!(found.iter().map(|u| u.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn strict_directory_reports_unknown_entries() {
        let directory = StaticDirectory::new();
        assert!(matches!(directory.get_user(9).await, Err(PortError::NotFound(_))));
        assert!(matches!(
            directory.get_content_metadata(ContentKind::Section, 42).await,
            Err(PortError::NotFound(_))
        ));

        let open = StaticDirectory::permissive(Utc::now());
        assert_eq!(open.get_user(9).await.unwrap().handle, "user9");
    }
}
